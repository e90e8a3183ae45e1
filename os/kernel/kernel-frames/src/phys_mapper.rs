//! # Physical memory access
//!
//! Page tables live in physical frames, but code can only dereference
//! virtual addresses. A [`PhysMapper`] tells the paging code where a frame
//! can be reached:
//!
//! - [`IdentityMapper`]: before the direct map exists, firmware maps physical
//!   memory 1:1.
//! - [`DirectMapper`]: afterwards, every frame below the window size is
//!   visible at `window base + pa`.

use kernel_info::memory::{DIRECT_MAP_BASE, DIRECT_MAP_SIZE};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_paging::PhysMapper;

/// [`PhysMapper`] for a direct-map window.
///
/// # Safety
/// The window must actually be mapped (writable) in the active address space
/// before any table is reached through it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DirectMapper {
    base: VirtualAddress,
    size: u64,
}

impl DirectMapper {
    /// The kernel's direct map as built by
    /// [`bootstrap_direct_map`](kernel_paging::bootstrap_direct_map).
    #[must_use]
    pub const fn kernel() -> Self {
        Self::new(VirtualAddress::new(DIRECT_MAP_BASE), DIRECT_MAP_SIZE)
    }

    /// A window of `size` bytes at `base`, mapping physical address 0 at `base`.
    #[must_use]
    pub const fn new(base: VirtualAddress, size: u64) -> Self {
        Self { base, size }
    }

    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }
}

impl PhysMapper for DirectMapper {
    #[inline]
    fn phys_to_direct(&self, pa: PhysicalAddress) -> VirtualAddress {
        debug_assert!(pa.as_u64() < self.size, "{pa:?} is outside the direct map");
        VirtualAddress::new(self.base.as_u64() + pa.as_u64())
    }

    #[inline]
    fn direct_to_phys(&self, va: VirtualAddress) -> PhysicalAddress {
        let offset = va.as_u64().wrapping_sub(self.base.as_u64());
        debug_assert!(offset < self.size, "{va:?} is outside the direct map");
        PhysicalAddress::new(offset)
    }
}

/// [`PhysMapper`] for identity-mapped physical memory.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct IdentityMapper;

impl PhysMapper for IdentityMapper {
    #[inline]
    fn phys_to_direct(&self, pa: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(pa.as_u64())
    }

    #[inline]
    fn direct_to_phys(&self, va: VirtualAddress) -> PhysicalAddress {
        PhysicalAddress::new(va.as_u64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_window_offsets() {
        let m = DirectMapper::kernel();
        assert_eq!(
            m.phys_to_direct(PhysicalAddress::new(0x1234_5000)).as_u64(),
            DIRECT_MAP_BASE + 0x1234_5000
        );
        assert_eq!(
            m.direct_to_phys(VirtualAddress::new(DIRECT_MAP_BASE + 0x42)),
            PhysicalAddress::new(0x42)
        );
    }

    #[test]
    #[should_panic(expected = "outside the direct map")]
    #[cfg(debug_assertions)]
    fn addresses_past_the_window_are_rejected() {
        let m = DirectMapper::kernel();
        let _ = m.phys_to_direct(PhysicalAddress::new(DIRECT_MAP_SIZE));
    }

    #[test]
    fn identity_is_a_no_op() {
        let pa = PhysicalAddress::new(0x7000);
        assert_eq!(IdentityMapper.phys_to_direct(pa).as_u64(), 0x7000);
        assert_eq!(IdentityMapper.direct_to_phys(VirtualAddress::new(0x7000)), pa);
    }
}
