//! # Kernel mappings
//!
//! The first root table and the parts of it every other root shares.
//!
//! [`bootstrap_direct_map`] runs once, while physical memory is still reached
//! through the firmware's identity mapping. It builds a root whose
//! [`DIRECT_MAP_SLOT`] maps the first [`DIRECT_MAP_SIZE`] bytes of physical
//! memory with 1 GiB leaves, and pre-creates the level-2 tables of the kernel
//! heap and kernel image slots. Those three top-level entries never change
//! afterwards, so copying them into a new root shares everything below them.
//!
//! ```text
//! root[273] ─► L2 ─► 256 × 1 GiB leaves  (direct map)
//! root[402] ─► L2 ─► (kernel heap, filled later)
//! root[511] ─► L2 ─► (kernel image, filled later)
//! ```

use crate::address_space::{AddressSpace, RootPage};
use crate::entry::PageTableEntry;
use crate::error::BootstrapError;
use crate::level::{Level, TableIndex};
use crate::{FrameAlloc, MapFlags, PhysMapper};
use kernel_info::memory::{
    DIRECT_MAP_BASE, DIRECT_MAP_SIZE, DIRECT_MAP_SLOT, KERNEL_HEAP_SLOT, KERNEL_IMAGE_SLOT,
    SHARED_ROOT_SLOTS,
};
use kernel_memory_addresses::{
    PageSize, PhysicalAddress, PhysicalPage, Size1G, Size4K, VirtualAddress,
};
use kernel_sync::{SpinLock, SpinLockGuard};

/// Number of 1 GiB leaves in the direct map.
#[allow(clippy::cast_possible_truncation)]
const DIRECT_MAP_LEAVES: usize = (DIRECT_MAP_SIZE >> Size1G::SHIFT) as usize;

/// The kernel's root table, the lock guarding the shared slots below it, and
/// the structural lock every handle over the kernel root borrows.
pub struct KernelMappings {
    root: RootPage,
    lock: SpinLock<()>,
    root_lock: SpinLock<()>,
}

impl KernelMappings {
    /// Adopt a root that already carries the shared kernel slots.
    ///
    /// # Safety
    /// Every slot in [`SHARED_ROOT_SLOTS`] of `root` must link to an L2 table,
    /// and those links must never be rewritten.
    #[inline]
    #[must_use]
    pub const unsafe fn from_root(root: RootPage) -> Self {
        Self {
            root,
            lock: SpinLock::new(()),
            root_lock: SpinLock::new(()),
        }
    }

    /// The kernel's own root table.
    #[inline]
    #[must_use]
    pub const fn root_page(&self) -> RootPage {
        self.root
    }

    /// Serializes structural changes below the shared slots.
    pub(crate) fn lock(&self) -> SpinLockGuard<'_, ()> {
        self.lock.lock()
    }

    /// Serializes structural changes anywhere in the kernel root; shared by
    /// all of its handles.
    pub(crate) const fn root_lock(&self) -> &SpinLock<()> {
        &self.root_lock
    }

    /// Copy the shared top-level entries into `new_root`.
    ///
    /// # Safety
    /// `new_root` must be a table reachable through `phys` that no CPU uses yet.
    pub unsafe fn copy_kernel_mappings<M: PhysMapper>(&self, phys: &M, new_root: RootPage) {
        let (source, target) = unsafe { (phys.table(self.root), phys.table(new_root)) };
        for slot in SHARED_ROOT_SLOTS {
            let index = TableIndex::from_usize(slot);
            target.store(index, source.load(index));
        }
    }

    /// Address space over the kernel's own root.
    ///
    /// Any number of these may exist at once; they share one structural lock.
    pub fn address_space<'a, M: PhysMapper, A: FrameAlloc>(
        &'a self,
        phys: &'a M,
        alloc: &'a A,
    ) -> AddressSpace<'a, M, A> {
        // Safety: the root is a valid kernel root, and handles over it share
        // `root_lock`.
        unsafe { AddressSpace::from_root(phys, alloc, self.root, Some(self)) }
    }
}

/// Build the kernel root with the direct map in place.
///
/// `phys` must reach freshly allocated frames; before the direct map is live
/// that is the identity mapping.
///
/// # Errors
/// [`BootstrapError::NoMemory`] naming the table that could not be allocated.
pub fn bootstrap_direct_map<M: PhysMapper, A: FrameAlloc>(
    phys: &M,
    alloc: &A,
) -> Result<KernelMappings, BootstrapError> {
    let root = alloc_zeroed(phys, alloc, "root")?;
    let direct = alloc_zeroed(phys, alloc, "direct map")?;
    let heap = alloc_zeroed(phys, alloc, "kernel heap")?;
    let image = alloc_zeroed(phys, alloc, "kernel image")?;

    // Safety: all four frames are fresh tables reachable through `phys`.
    let (root_table, direct_table) = unsafe { (phys.table(root), phys.table(direct)) };

    let flags = MapFlags::KERNEL_DATA | MapFlags::HUGE;
    let first = TableIndex::of(VirtualAddress::new(DIRECT_MAP_BASE), Level::L2);
    let mut frame = PhysicalAddress::zero();
    for index in TableIndex::all().skip(first.as_usize()).take(DIRECT_MAP_LEAVES) {
        direct_table.store(index, PageTableEntry::encode_leaf(Level::L2, frame, flags));
        frame += Size1G::SIZE;
    }

    // Copied into every root by value, so the mapper never widens them.
    let link = MapFlags::SHARED_LINK;
    for (slot, table) in [
        (DIRECT_MAP_SLOT, direct),
        (KERNEL_HEAP_SLOT, heap),
        (KERNEL_IMAGE_SLOT, image),
    ] {
        root_table.store(
            TableIndex::from_usize(slot),
            PageTableEntry::encode_table(table, link),
        );
    }

    log::info!(
        "direct map: {DIRECT_MAP_LEAVES} GiB at {DIRECT_MAP_BASE:#018x} in root {root}"
    );
    // Safety: the shared slots were just linked and are never rewritten.
    Ok(unsafe { KernelMappings::from_root(root) })
}

fn alloc_zeroed<M: PhysMapper, A: FrameAlloc>(
    phys: &M,
    alloc: &A,
    stage: &'static str,
) -> Result<PhysicalPage<Size4K>, BootstrapError> {
    let Some(frame) = alloc.alloc_table_frame() else {
        log::warn!("bootstrap ran out of frames allocating the {stage} table");
        return Err(BootstrapError::NoMemory { stage });
    };
    // Safety: fresh frame, not linked anywhere.
    unsafe { phys.zero_table(frame) };
    log::trace!("bootstrap {stage} table at {frame}");
    Ok(frame)
}
