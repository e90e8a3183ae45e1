//! # Memory Layout

/// End of userspace VA range after which Kernel space begins.
pub const LAST_USERSPACE_ADDRESS: u64 = 0x0000_7fff_ffff_ffff;

/// Base of the direct map. Anything mapped at [`DIRECT_MAP_BASE`] + `pa`
/// lets the kernel access physical memory via a fixed offset.
pub const DIRECT_MAP_BASE: u64 = 0xffff_8880_0000_0000;

/// Size of the direct map window. Physical memory above this is not reachable
/// through the direct map.
pub const DIRECT_MAP_SIZE: u64 = 256 * GIB;

/// Base of the kernel heap window.
pub const KERNEL_HEAP_BASE: u64 = 0xffff_c900_0000_0000;

/// Where the kernel executes (VMA).
pub const KERNEL_BASE: u64 = 0xffff_ffff_8000_0000;

/// Number of entries in one page table.
pub const TABLE_ENTRIES: usize = 512;

const GIB: u64 = 1 << 30;

/// Bytes covered by a single top-level slot.
pub const ROOT_SLOT_SPAN: u64 = 1 << 39;

/// Top-level slot index of a virtual address.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn root_slot(va: u64) -> usize {
    ((va >> 39) & 0x1FF) as usize
}

/// Top-level slot that holds the direct map.
pub const DIRECT_MAP_SLOT: usize = root_slot(DIRECT_MAP_BASE);

/// Top-level slot that holds the kernel heap window.
pub const KERNEL_HEAP_SLOT: usize = root_slot(KERNEL_HEAP_BASE);

/// Top-level slot that holds the kernel image.
pub const KERNEL_IMAGE_SLOT: usize = root_slot(KERNEL_BASE);

/// Top-level slots copied by value into every root table.
pub const SHARED_ROOT_SLOTS: [usize; 3] = [DIRECT_MAP_SLOT, KERNEL_HEAP_SLOT, KERNEL_IMAGE_SLOT];

/// Whether `slot` is one of the [`SHARED_ROOT_SLOTS`].
#[inline]
#[must_use]
pub const fn is_shared_slot(slot: usize) -> bool {
    slot == DIRECT_MAP_SLOT || slot == KERNEL_HEAP_SLOT || slot == KERNEL_IMAGE_SLOT
}

const _: () = {
    assert!(DIRECT_MAP_BASE > LAST_USERSPACE_ADDRESS);
    assert!(KERNEL_HEAP_BASE > DIRECT_MAP_BASE);
    assert!(KERNEL_BASE > KERNEL_HEAP_BASE);

    // The direct map starts at PDPT index 0 of its slot and fits in it.
    assert!(DIRECT_MAP_BASE.is_multiple_of(ROOT_SLOT_SPAN));
    assert!(DIRECT_MAP_SIZE <= ROOT_SLOT_SPAN);
    assert!(DIRECT_MAP_SIZE.is_multiple_of(GIB));

    // Every shared region owns a distinct slot.
    assert!(DIRECT_MAP_SLOT == 273);
    assert!(KERNEL_HEAP_SLOT == 402);
    assert!(KERNEL_IMAGE_SLOT == 511);
    assert!(root_slot(DIRECT_MAP_BASE + DIRECT_MAP_SIZE - 1) == DIRECT_MAP_SLOT);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_slots_are_recognized() {
        for slot in SHARED_ROOT_SLOTS {
            assert!(is_shared_slot(slot));
        }
        assert!(!is_shared_slot(0));
        assert!(!is_shared_slot(256));
    }

    #[test]
    fn root_slot_of_lower_half() {
        assert_eq!(root_slot(0), 0);
        assert_eq!(root_slot(LAST_USERSPACE_ADDRESS), 255);
    }
}
