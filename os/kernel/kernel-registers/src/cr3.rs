#[cfg(feature = "asm")]
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// CR3: root table base register (4-level paging, PCID disabled).
///
/// Holds the physical frame of the level-3 table and the cache-control flags
/// the MMU uses when it reads that table.
#[bitfield(u64)]
pub struct Cr3 {
    /// Bits 0–2: reserved (must be 0).
    #[bits(3)]
    __: u8,

    /// Bit 3: page-level write-through for root table reads.
    pub pwt: bool,

    /// Bit 4: page-level cache disable for root table reads.
    pub pcd: bool,

    /// Bits 5–11: reserved (must be 0 when written).
    #[bits(7)]
    __: u8,

    /// Bits 12–51: root table physical frame number.
    #[bits(40)]
    root_frame: u64,

    /// Bits 52–63: reserved.
    #[bits(12)]
    __: u16,
}

impl Cr3 {
    /// Value that activates the root table at `root` with write-back caching.
    #[must_use]
    pub const fn for_root(root: PhysicalPage<Size4K>) -> Self {
        Self::new().with_root_frame(root.base().frame_number())
    }

    /// Physical frame of the active root table.
    #[must_use]
    pub const fn root(&self) -> PhysicalPage<Size4K> {
        PhysicalAddress::from_frame_number(self.root_frame()).page()
    }
}

#[cfg(feature = "asm")]
impl LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        let mut cr3: u64;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}

#[cfg(feature = "asm")]
impl StoreRegisterUnsafe for Cr3 {
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_round_trips() {
        let root = PhysicalAddress::new(0x0012_3000).page::<Size4K>();
        let cr3 = Cr3::for_root(root);
        assert_eq!(cr3.into_bits(), 0x0012_3000);
        assert_eq!(cr3.root(), root);
    }

    #[test]
    fn flags_do_not_leak_into_root() {
        let cr3 = Cr3::from_bits(0x0045_6018);
        assert!(cr3.pwt());
        assert!(cr3.pcd());
        assert_eq!(cr3.root().base().as_u64(), 0x0045_6000);
    }
}
