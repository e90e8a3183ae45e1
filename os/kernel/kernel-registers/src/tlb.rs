//! Local TLB invalidation.
//!
//! These only affect the executing CPU. Other CPUs that may cache the same
//! translations need a shootdown, which is the caller's business.

use kernel_memory_addresses::VirtualAddress;

/// Drop the cached translation for the page containing `va`.
///
/// # Safety
/// Ring 0 only.
#[cfg(feature = "asm")]
#[inline]
pub unsafe fn invalidate_page(va: VirtualAddress) {
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) va.as_u64(), options(nostack, preserves_flags));
    }
}

/// Drop all non-global cached translations by reloading CR3.
///
/// # Safety
/// Ring 0 only.
#[cfg(feature = "asm")]
#[inline]
pub unsafe fn invalidate_all() {
    use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe, cr3::Cr3};
    unsafe { Cr3::load_unsafe().store_unsafe() }
}

/// CR4.PGE: global pages enabled.
#[cfg(feature = "asm")]
const CR4_PGE: u64 = 1 << 7;

/// Drop all cached translations, global ones included, by toggling CR4.PGE.
///
/// # Safety
/// Ring 0 only. Interrupts should be disabled so nothing runs between the two
/// CR4 writes.
#[cfg(feature = "asm")]
#[inline]
pub unsafe fn invalidate_all_global() {
    let mut cr4: u64;
    unsafe {
        core::arch::asm!("mov {}, cr4", out(reg) cr4, options(nomem, nostack, preserves_flags));
        if cr4 & CR4_PGE == 0 {
            // No global pages; a CR3 reload is enough.
            invalidate_all();
            return;
        }
        core::arch::asm!("mov cr4, {}", in(reg) cr4 & !CR4_PGE, options(nostack, preserves_flags));
        core::arch::asm!("mov cr4, {}", in(reg) cr4, options(nostack, preserves_flags));
    }
}

/// Host builds have no TLB to invalidate.
///
/// # Safety
/// Always safe without the `asm` feature; the signature matches the
/// privileged version.
#[cfg(not(feature = "asm"))]
#[inline]
pub unsafe fn invalidate_page(va: VirtualAddress) {
    let _ = va;
}

/// Host builds have no TLB to invalidate.
///
/// # Safety
/// Always safe without the `asm` feature; the signature matches the
/// privileged version.
#[cfg(not(feature = "asm"))]
#[inline]
pub const unsafe fn invalidate_all() {}

/// Host builds have no TLB to invalidate.
///
/// # Safety
/// Always safe without the `asm` feature; the signature matches the
/// privileged version.
#[cfg(not(feature = "asm"))]
#[inline]
pub const unsafe fn invalidate_all_global() {}
