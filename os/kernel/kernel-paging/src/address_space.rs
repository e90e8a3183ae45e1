//! # Address Space (x86-64, L3-rooted)
//!
//! A handle to a **single** translation tree plus the lock that serializes
//! structural changes to it.
//!
//! ## Highlights
//!
//! - [`AddressSpace::map`] / [`AddressSpace::unmap`] for page ranges of any
//!   length, with huge-page selection and demotion.
//! - [`AddressSpace::translate`] and [`AddressSpace::access_attributes`], both
//!   lock-free.
//! - [`AddressSpace::new_user`] for a fresh root sharing the kernel's
//!   top-level slots, and [`AddressSpace::destroy`] to tear it down again.
//! - [`AddressSpace::activate`] to load CR3 with this space's root.
//!
//! ## Locking
//!
//! `map` and `unmap` hold this space's lock for their whole walk. When the
//! range intersects one of the shared kernel slots they also hold the
//! [`KernelMappings`] lock, always taken second, because the tables behind
//! those slots are reachable from every root.
//!
//! Handles over the kernel's own root all borrow one lock held by
//! [`KernelMappings`]. Any other root must have exactly one handle, since two
//! handles would hold two independent locks.
//!
//! ## Safety
//!
//! - Mutating active mappings requires TLB maintenance; every mutation
//!   returns a [`TlbFlush`] for that.
//! - The provided [`PhysMapper`] must yield **writable** references to table
//!   frames.

use crate::dump::TableDump;
use crate::error::MapError;
use crate::kernel::KernelMappings;
use crate::mapper::{self, AccessAttributes, Mapper};
use crate::tlb::TlbFlush;
use crate::{FrameAlloc, MapFlags, PhysMapper, TableIndex};
use kernel_info::memory::{is_shared_slot, root_slot};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_sync::{SpinLock, SpinLockGuard};

/// The root (L3) table frame of an [`AddressSpace`].
pub type RootPage = PhysicalPage<Size4K>;

/// Handle to a single, concrete address space.
pub struct AddressSpace<'a, M: PhysMapper, A: FrameAlloc> {
    root: RootPage,
    phys: &'a M,
    alloc: &'a A,
    lock: RootLock<'a>,
    kernel: Option<&'a KernelMappings>,
}

/// The structural lock of a root: private to one handle, or shared by every
/// handle over the kernel root.
enum RootLock<'a> {
    Owned(SpinLock<()>),
    Shared(&'a SpinLock<()>),
}

impl RootLock<'_> {
    fn lock(&self) -> SpinLockGuard<'_, ()> {
        match self {
            Self::Owned(lock) => lock.lock(),
            Self::Shared(lock) => lock.lock(),
        }
    }
}

impl<'a, M: PhysMapper, A: FrameAlloc> AddressSpace<'a, M, A> {
    /// Wrap an existing root table.
    ///
    /// Pass `kernel` when the root carries the shared kernel slots, so edits
    /// inside them are serialized with every other address space.
    ///
    /// When `root` is the kernel root itself, the handle borrows the kernel
    /// root's lock and may coexist with other handles over it.
    ///
    /// # Safety
    /// `root` must hold a valid L3 table reachable through `phys`. Unless it
    /// is `kernel`'s own root, no other `AddressSpace` may manage it.
    #[inline]
    pub unsafe fn from_root(
        phys: &'a M,
        alloc: &'a A,
        root: RootPage,
        kernel: Option<&'a KernelMappings>,
    ) -> Self {
        let lock = match kernel {
            Some(kernel) if kernel.root_page() == root => RootLock::Shared(kernel.root_lock()),
            _ => RootLock::Owned(SpinLock::new(())),
        };
        Self {
            root,
            phys,
            alloc,
            lock,
            kernel,
        }
    }

    /// Allocate an empty root that shares the kernel's top-level slots.
    ///
    /// # Errors
    /// [`MapError::NoMemory`] if no frame is available for the root.
    pub fn new_user(phys: &'a M, alloc: &'a A, kernel: &'a KernelMappings) -> Result<Self, MapError> {
        let Some(root) = alloc.alloc_table_frame() else {
            log::warn!("frame supplier exhausted while allocating a root table");
            return Err(MapError::NoMemory);
        };
        // Safety: the frame is fresh and becomes the new root.
        unsafe {
            phys.zero_table(root);
            kernel.copy_kernel_mappings(phys, root);
        }
        log::debug!("created address space with root {root}");
        // Safety: nobody else knows about this root yet.
        Ok(unsafe { Self::from_root(phys, alloc, root, Some(kernel)) })
    }

    /// View the **currently active** address space by reading CR3.
    ///
    /// # Safety
    /// - Must run at CPL0 with paging enabled.
    /// - As for [`from_root`](Self::from_root).
    #[cfg(feature = "asm")]
    #[inline]
    pub unsafe fn from_current(phys: &'a M, alloc: &'a A, kernel: Option<&'a KernelMappings>) -> Self {
        use kernel_registers::LoadRegisterUnsafe;
        let root = unsafe { kernel_registers::cr3::Cr3::load_unsafe() }.root();
        unsafe { Self::from_root(phys, alloc, root, kernel) }
    }

    /// Load CR3 with this address space's root.
    ///
    /// # Safety
    /// The code and data the CPU is executing with must be mapped identically
    /// in this space (the shared kernel slots take care of that for kernel
    /// code).
    #[cfg(feature = "asm")]
    #[inline]
    pub unsafe fn activate(&self) {
        use kernel_registers::StoreRegisterUnsafe;
        unsafe { kernel_registers::cr3::Cr3::for_root(self.root).store_unsafe() };
    }

    /// Physical page of the root table.
    #[inline]
    #[must_use]
    pub const fn root_page(&self) -> RootPage {
        self.root
    }

    /// Map `count` 4 KiB pages at `va` to the physical range at `pa`.
    ///
    /// With [`MapFlags::HUGE`], 2 MiB and 1 GiB leaves are used wherever both
    /// addresses are aligned and enough pages remain.
    ///
    /// # Errors
    /// [`MapError::NoMemory`] if a table frame could not be allocated. What
    /// was mapped before the failure stays mapped.
    pub fn map(
        &self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        count: u64,
        flags: MapFlags,
    ) -> Result<TlbFlush, MapError> {
        let _guard = self.lock.lock();
        let _kernel = self.kernel_lock_for(va, count);
        let result = self.mapper().map(va, pa, count, flags);
        log::debug!("map {va} -> {pa} ({count} pages, {flags:?}) in {}: {result:?}", self.root);
        result
    }

    /// Remove the translations of `count` 4 KiB pages at `va`.
    ///
    /// Unmapped holes are skipped. Page tables are kept, even when they end
    /// up empty.
    ///
    /// # Errors
    /// [`MapError::NoMemory`] if a huge leaf straddling the range boundary
    /// could not be split.
    pub fn unmap(&self, va: VirtualAddress, count: u64) -> Result<TlbFlush, MapError> {
        let _guard = self.lock.lock();
        let _kernel = self.kernel_lock_for(va, count);
        let result = self.mapper().unmap(va, count);
        log::debug!("unmap {va} ({count} pages) in {}: {result:?}", self.root);
        result
    }

    /// Translate `va` to the physical address it maps to, if any.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        mapper::translate(self.phys, self.root, va)
    }

    /// Report whether `va` is mapped and writeable, and whether it was
    /// accessed or written since the previous query. Clears the accessed and
    /// dirty bits.
    #[must_use]
    pub fn access_attributes(&self, va: VirtualAddress) -> AccessAttributes {
        mapper::access_attributes(self.phys, self.root, va)
    }

    /// Printable view of every present entry.
    #[must_use]
    pub const fn dump(&self) -> TableDump<'_, M> {
        TableDump::new(self.phys, self.root)
    }

    /// Emit [`dump`](Self::dump) at debug level.
    pub fn log_dump(&self) {
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("address space {}:\n{}", self.root, self.dump());
        }
    }

    /// Free every page table of this space, including the root.
    ///
    /// Tables behind the shared kernel slots are kept when the space was
    /// created with [`KernelMappings`]. Mapped frames are not freed. Returns
    /// the number of tables released.
    ///
    /// # Safety
    /// The root must not be loaded on any CPU, and nothing may still walk it.
    pub unsafe fn destroy(self) -> usize {
        let guard = self.lock.lock();
        let freed = unsafe { self.mapper().free_tables(self.kernel.is_some()) };
        drop(guard);
        log::debug!("destroyed address space {}, freed {freed} tables", self.root);
        freed
    }

    const fn mapper(&self) -> Mapper<'a, M, A> {
        Mapper::new(self.root, self.phys, self.alloc)
    }

    fn kernel_lock_for(&self, va: VirtualAddress, count: u64) -> Option<SpinLockGuard<'a, ()>> {
        let kernel = self.kernel?;
        touches_shared_slot(va, count).then(|| kernel.lock())
    }
}

/// Whether `count` pages from `va` intersect a shared top-level slot.
fn touches_shared_slot(va: VirtualAddress, count: u64) -> bool {
    let first = root_slot(va.as_u64());
    let last = va
        .checked_add_pages::<Size4K>(count.saturating_sub(1))
        .map_or(TableIndex::LAST.as_usize(), |end| root_slot(end.as_u64()));
    (first..=last).any(is_shared_slot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::bootstrap_direct_map;
    use crate::level::Level;
    use crate::testing::TestMemory;
    use kernel_info::memory::{DIRECT_MAP_BASE, KERNEL_HEAP_BASE, ROOT_SLOT_SPAN};
    use kernel_memory_addresses::{PageSize, Size1G};
    use std::sync::Barrier;

    fn va(v: u64) -> VirtualAddress {
        VirtualAddress::new(v)
    }

    fn pa(v: u64) -> PhysicalAddress {
        PhysicalAddress::new(v)
    }

    #[test]
    fn shared_slot_detection() {
        assert!(!touches_shared_slot(va(0x1000), 10));
        assert!(touches_shared_slot(va(DIRECT_MAP_BASE), 1));
        assert!(touches_shared_slot(va(KERNEL_HEAP_BASE - 4096), 2));
        assert!(!touches_shared_slot(va(KERNEL_HEAP_BASE - 4096), 1));
        assert!(touches_shared_slot(va(0xffff_ffff_ffff_f000), 1));
        // Spans the slot right before the direct map into it.
        assert!(touches_shared_slot(
            va(DIRECT_MAP_BASE - ROOT_SLOT_SPAN),
            (ROOT_SLOT_SPAN >> 12) + 1
        ));
    }

    #[test]
    fn user_space_shares_kernel_tables() {
        let mem = TestMemory::new(32);
        let kernel = bootstrap_direct_map(&mem, &mem).unwrap();
        let user = AddressSpace::new_user(&mem, &mem, &kernel).unwrap();
        assert_ne!(user.root_page(), kernel.root_page());

        assert_eq!(user.translate(va(DIRECT_MAP_BASE + 0x1234)), Some(pa(0x1234)));

        // A kernel heap mapping made through the user space shows up in the
        // kernel's own view, since the slot's tables are shared.
        user.map(va(KERNEL_HEAP_BASE), pa(0x5000), 1, MapFlags::KERNEL_DATA)
            .unwrap()
            .ignore();
        let kernel_space = kernel.address_space(&mem, &mem);
        assert_eq!(kernel_space.translate(va(KERNEL_HEAP_BASE)), Some(pa(0x5000)));
    }

    #[test]
    fn shared_root_links_are_never_widened() {
        let mem = TestMemory::new(32);
        let kernel = bootstrap_direct_map(&mem, &mem).unwrap();
        let a = AddressSpace::new_user(&mem, &mem, &kernel).unwrap();
        let b = AddressSpace::new_user(&mem, &mem, &kernel).unwrap();

        a.map(va(KERNEL_HEAP_BASE), pa(0x5000), 1, MapFlags::USER_DATA | MapFlags::EXECUTABLE)
            .unwrap()
            .ignore();

        let slot = TableIndex::of(va(KERNEL_HEAP_BASE), Level::ROOT);
        let links: Vec<_> = [kernel.root_page(), a.root_page(), b.root_page()]
            .into_iter()
            .map(|root| unsafe { mem.table(root) }.load(slot))
            .collect();
        assert!(!links[1].user());
        assert_eq!(links[0], links[1]);
        assert_eq!(links[1], links[2]);
        // Below the shared slot the request still widens as usual.
        assert!(mem.entry_at(a.root_page(), va(KERNEL_HEAP_BASE), Level::L2).user());
    }

    #[test]
    fn empty_requests_change_nothing() {
        let mem = TestMemory::new(8);
        let root = mem.new_root();
        let space = unsafe { AddressSpace::from_root(&mem, &mem, root, None) };
        let flush = space.map(va(0x1000), pa(0x1000), 0, MapFlags::USER_DATA).unwrap();
        assert_eq!(flush.pages(), 0);
        flush.ignore();
        space.unmap(va(0x1000), 0).unwrap().ignore();
        assert_eq!(mem.allocated(), 1);
        assert_eq!(space.dump().to_string(), "");
    }

    #[test]
    fn private_ranges_skip_the_kernel_lock() {
        let mem = TestMemory::new(32);
        let kernel = bootstrap_direct_map(&mem, &mem).unwrap();
        let user = AddressSpace::new_user(&mem, &mem, &kernel).unwrap();

        // Would spin forever if the lower half needed the kernel lock.
        let _held = kernel.lock();
        user.map(va(0x1000), pa(0x1000), 1, MapFlags::USER_DATA)
            .unwrap()
            .ignore();
        user.unmap(va(0x1000), 1).unwrap().ignore();
    }

    #[test]
    fn user_mappings_stay_private() {
        let mem = TestMemory::new(32);
        let kernel = bootstrap_direct_map(&mem, &mem).unwrap();
        let a = AddressSpace::new_user(&mem, &mem, &kernel).unwrap();
        let b = AddressSpace::new_user(&mem, &mem, &kernel).unwrap();

        a.map(va(0x40_0000), pa(0x9000), 1, MapFlags::USER_DATA)
            .unwrap()
            .ignore();
        assert_eq!(a.translate(va(0x40_0000)), Some(pa(0x9000)));
        assert_eq!(b.translate(va(0x40_0000)), None);
    }

    #[test]
    fn new_user_reports_exhaustion() {
        let mem = TestMemory::new(32);
        let kernel = bootstrap_direct_map(&mem, &mem).unwrap();
        mem.fail_from_call(1);
        assert_eq!(
            AddressSpace::new_user(&mem, &mem, &kernel).err(),
            Some(MapError::NoMemory)
        );
    }

    #[test]
    fn destroy_keeps_shared_tables() {
        let mem = TestMemory::new(32);
        let kernel = bootstrap_direct_map(&mem, &mem).unwrap();
        let before = mem.allocated();
        let user = AddressSpace::new_user(&mem, &mem, &kernel).unwrap();

        user.map(va(0x1000), pa(0x1000), 1, MapFlags::USER_DATA)
            .unwrap()
            .ignore();
        user.map(va(0x7f00_0000_0000), pa(0x1000), 600, MapFlags::USER_DATA)
            .unwrap()
            .ignore();
        user.map(va(KERNEL_HEAP_BASE), pa(0x2000), 1, MapFlags::KERNEL_DATA)
            .unwrap()
            .ignore();
        let kernel_heap_tables = 2;
        let owned = mem.allocated() - before - kernel_heap_tables;

        let freed = unsafe { user.destroy() };
        assert_eq!(freed, owned);
        assert_eq!(mem.freed(), owned);

        let kernel_space = kernel.address_space(&mem, &mem);
        assert_eq!(kernel_space.translate(va(KERNEL_HEAP_BASE)), Some(pa(0x2000)));
        assert_eq!(kernel_space.translate(va(DIRECT_MAP_BASE)), Some(pa(0)));
    }

    #[test]
    fn destroy_without_kernel_frees_everything() {
        let mem = TestMemory::new(16);
        let root = mem.new_root();
        let space = unsafe { AddressSpace::from_root(&mem, &mem, root, None) };
        space
            .map(va(DIRECT_MAP_BASE), pa(0), 512, MapFlags::HUGE)
            .unwrap()
            .ignore();
        let freed = unsafe { space.destroy() };
        assert_eq!(freed, mem.allocated());
    }

    #[test]
    fn dump_lists_mappings() {
        let mem = TestMemory::new(16);
        let root = mem.new_root();
        let space = unsafe { AddressSpace::from_root(&mem, &mem, root, None) };
        space
            .map(va(0x20_0000), pa(0x20_0000), 512, MapFlags::HUGE | MapFlags::WRITEABLE)
            .unwrap()
            .ignore();
        let text = space.dump().to_string();
        assert!(text.contains("2M"), "{text}");
        assert_eq!(text.lines().count(), 3, "{text}");
        space.log_dump();
    }

    #[test]
    fn concurrent_maps_in_one_space() {
        const THREADS: u64 = 4;
        const PAGES: u64 = 300;

        let mem = TestMemory::new(64);
        let kernel = bootstrap_direct_map(&mem, &mem).unwrap();
        let space = AddressSpace::new_user(&mem, &mem, &kernel).unwrap();
        let barrier = Barrier::new(usize::try_from(THREADS).unwrap());

        std::thread::scope(|s| {
            for t in 0..THREADS {
                let space = &space;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    // Neighbouring ranges share L1 and L0 tables.
                    let base = 0x40_0000 + t * PAGES * 4096;
                    space
                        .map(va(base), pa(0x100_0000 + t * PAGES * 4096), PAGES, MapFlags::USER_DATA)
                        .unwrap()
                        .ignore();
                    for k in 0..PAGES {
                        let _ = space.access_attributes(va(base + k * 4096));
                        let _ = space.translate(va(base + k * 4096));
                    }
                });
            }
        });

        for k in 0..THREADS * PAGES {
            assert_eq!(
                space.translate(va(0x40_0000 + k * 4096)),
                Some(pa(0x100_0000 + k * 4096))
            );
        }
        assert!(mem.entry_at(space.root_page(), va(0x40_0000), Level::L1).user());
    }

    #[test]
    fn kernel_handles_share_one_lock() {
        const ROUNDS: u64 = 300;
        // Upper-half slot outside the shared ones, so only the root lock
        // serializes table creation below it.
        const MMIO_BASE: u64 = 0xffff_9000_0000_0000;

        let mem = TestMemory::new(8 + 2 * usize::try_from(ROUNDS).unwrap());
        let kernel = bootstrap_direct_map(&mem, &mem).unwrap();
        assert!(!touches_shared_slot(va(MMIO_BASE), 1));
        let barrier = Barrier::new(2);

        std::thread::scope(|s| {
            for t in 0..2u64 {
                let kernel = &kernel;
                let mem = &mem;
                let barrier = &barrier;
                s.spawn(move || {
                    for round in 0..ROUNDS {
                        let space = kernel.address_space(mem, mem);
                        barrier.wait();
                        // Both threads race for the same missing L1 and L0 tables.
                        let base = MMIO_BASE + round * Size1G::SIZE;
                        space
                            .map(va(base + t * 4096), pa(0x10_0000 + t * 4096), 1, MapFlags::KERNEL_DATA)
                            .unwrap()
                            .ignore();
                    }
                });
            }
        });

        let space = kernel.address_space(&mem, &mem);
        for round in 0..ROUNDS {
            let base = MMIO_BASE + round * Size1G::SIZE;
            assert_eq!(space.translate(va(base)), Some(pa(0x10_0000)), "round {round}");
            assert_eq!(space.translate(va(base + 4096)), Some(pa(0x10_1000)), "round {round}");
        }
        // Bootstrap tables, one L2 for the slot, then one L1 and one L0 per round.
        assert_eq!(mem.allocated(), 4 + 1 + 2 * usize::try_from(ROUNDS).unwrap());
    }
}
