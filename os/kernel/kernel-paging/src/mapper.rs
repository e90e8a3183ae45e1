//! # Mapper
//!
//! The map / unmap / translate / query engine over one root table.
//!
//! [`Mapper`] performs structural changes and expects the caller to hold the
//! address-space lock; [`AddressSpace`](crate::AddressSpace) takes care of
//! that. [`translate`] and [`access_attributes`] are lock-free.
//!
//! ## Leaf selection
//!
//! At every position the deepest usable granularity is chosen anew: a 1 GiB
//! leaf when [`MapFlags::HUGE`] is requested, both addresses are 1 GiB-aligned
//! and at least 262144 pages remain; likewise 2 MiB; otherwise 4 KiB. A slot
//! that already links to a child table is never replaced by a huge leaf; the
//! walk descends into it instead.
//!
//! ## Demotion
//!
//! A huge leaf in the way of a finer mapping (or a partial unmap) is replaced
//! by a full child table whose 512 entries reproduce the original mapping, so
//! everything outside the edited range keeps translating as before.

use crate::entry::{EntryKind, PageTableEntry};
use crate::error::MapError;
use crate::level::{Level, TableIndex};
use crate::table::PageTable;
use crate::tlb::TlbFlush;
use crate::walk::WalkStack;
use crate::{FrameAlloc, MapFlags, PhysMapper};
use kernel_info::memory::is_shared_slot;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};

/// Outcome of [`access_attributes`].
#[allow(clippy::struct_excessive_bools)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct AccessAttributes {
    /// A leaf translates the address.
    pub mapped: bool,
    /// Writes are allowed along the whole walk.
    pub writeable: bool,
    /// The CPU used the translation since the last query.
    pub accessed: bool,
    /// The CPU wrote through the translation since the last query.
    pub dirty: bool,
}

/// Structural mutation over the tree rooted at `root`.
pub(crate) struct Mapper<'a, M: PhysMapper, A: FrameAlloc> {
    root: PhysicalPage<Size4K>,
    phys: &'a M,
    alloc: &'a A,
}

impl<'a, M: PhysMapper, A: FrameAlloc> Mapper<'a, M, A> {
    pub const fn new(root: PhysicalPage<Size4K>, phys: &'a M, alloc: &'a A) -> Self {
        Self { root, phys, alloc }
    }

    /// Map `count` pages at `va` to the physical range starting at `pa`.
    ///
    /// On [`MapError::NoMemory`] everything written so far stays in place.
    pub fn map(
        &self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        count: u64,
        flags: MapFlags,
    ) -> Result<TlbFlush, MapError> {
        debug_assert!(va.is_aligned_to(4096), "unaligned virtual address {va:?}");
        debug_assert!(pa.is_aligned_to(4096), "unaligned physical address {pa:?}");
        debug_assert!(va.is_canonical(), "non-canonical address {va:?}");
        debug_assert!(
            va.checked_add_pages::<Size4K>(count.saturating_sub(1)).is_some(),
            "range runs past the end of the address space"
        );

        if count == 0 {
            return Ok(TlbFlush::new(va, 0, false));
        }

        let start = va;
        let link_flags = flags.for_table_link();
        let (mut va, mut pa, mut remaining) = (va, pa, count);
        let mut stack = WalkStack::starting_at(self.root, va);

        while let Some((frame, index)) = stack.current() {
            let level = stack.level();
            let table = self.table(frame);
            let entry = table.load(index);

            if level > leaf_level(va, pa, remaining, flags) || entry.is_table(level) {
                // Shared root links are identical in every root; never widened.
                let shared = level == Level::ROOT && is_shared_slot(index.as_usize());
                let link = if shared { MapFlags::SHARED_LINK } else { link_flags };
                let child = match entry.kind(level) {
                    EntryKind::NotPresent => self.link_new_table(table, index, link)?,
                    EntryKind::Leaf { .. } => self.demote(table, index, level, entry)?,
                    EntryKind::Table(child) => child,
                };
                if !shared {
                    table.widen(index, link_flags);
                }
                stack.descend(child, va);
                continue;
            }

            table.store(index, PageTableEntry::encode_leaf(level, pa, flags));
            remaining -= level.page_count();
            if remaining == 0 {
                break;
            }
            pa += level.page_size();
            match va.checked_add_pages::<Size4K>(level.page_count()) {
                Some(next) if stack.advance() => va = next,
                _ => break,
            }
        }

        debug_assert_eq!(remaining, 0, "walk ended with pages left to map");
        Ok(TlbFlush::new(
            start,
            count,
            flags.contains(MapFlags::GLOBAL) || is_upper_half(start),
        ))
    }

    /// Remove every translation in `count` pages starting at `va`.
    ///
    /// Holes are skipped without allocating. A huge leaf only partly inside
    /// the range is split first, so the part outside stays mapped; splitting
    /// is the only reason this can fail.
    pub fn unmap(&self, va: VirtualAddress, count: u64) -> Result<TlbFlush, MapError> {
        debug_assert!(va.is_aligned_to(4096), "unaligned virtual address {va:?}");
        debug_assert!(va.is_canonical(), "non-canonical address {va:?}");
        if count == 0 {
            return Ok(TlbFlush::new(va, 0, false));
        }

        let start = va;
        let (mut va, mut remaining) = (va, count);
        let mut stack = WalkStack::starting_at(self.root, va);

        while let Some((frame, index)) = stack.current() {
            let level = stack.level();
            let table = self.table(frame);
            let entry = table.load(index);

            let step = match entry.kind(level) {
                EntryKind::NotPresent => pages_to_boundary(va, level).min(remaining),
                EntryKind::Table(child) => {
                    stack.descend(child, va);
                    continue;
                }
                EntryKind::Leaf { .. } if covers(va, remaining, level) => {
                    table.store(index, PageTableEntry::zero());
                    level.page_count()
                }
                EntryKind::Leaf { .. } => {
                    let child = self.demote(table, index, level, entry)?;
                    stack.descend(child, va);
                    continue;
                }
            };

            remaining -= step;
            if remaining == 0 {
                break;
            }
            match va.checked_add_pages::<Size4K>(step) {
                Some(next) if stack.advance() => va = next,
                _ => break,
            }
        }

        Ok(TlbFlush::new(start, count, is_upper_half(start)))
    }

    /// Free every table reachable from the root, and the root itself.
    ///
    /// With `keep_shared`, the subtrees behind the shared kernel slots are
    /// left alone. Leaf frames are never freed. Returns the number of tables
    /// released.
    ///
    /// # Safety
    /// No CPU may be using the root, and nothing may hold references into the
    /// freed tables.
    pub unsafe fn free_tables(&self, keep_shared: bool) -> usize {
        let mut freed = 0;
        let mut stack = WalkStack::starting_at(self.root, VirtualAddress::zero());

        while let Some((frame, index)) = stack.current() {
            let level = stack.level();
            let shared = keep_shared && level == Level::ROOT && is_shared_slot(index.as_usize());

            if !shared && let EntryKind::Table(child) = self.table(frame).load(index).kind(level) {
                if level == Level::L1 {
                    // L0 tables hold only leaves.
                    unsafe { self.alloc.free_table_frame(child) };
                    freed += 1;
                } else {
                    let va = stack.address();
                    stack.descend(child, va);
                    continue;
                }
            }

            stack.advance_with(|_, table| {
                unsafe { self.alloc.free_table_frame(table) };
                freed += 1;
            });
        }
        freed
    }

    fn table(&self, frame: PhysicalPage<Size4K>) -> &'a PageTable {
        // Safety: every frame reached from the root is a table this crate
        // initialized (or the caller vouched for when handing us the root).
        unsafe { self.phys.table(frame) }
    }

    fn alloc_table(&self) -> Result<PhysicalPage<Size4K>, MapError> {
        let Some(frame) = self.alloc.alloc_table_frame() else {
            log::warn!("frame supplier exhausted while allocating a page table");
            return Err(MapError::NoMemory);
        };
        // Safety: the frame is fresh; nothing links to it yet.
        unsafe { self.phys.zero_table(frame) };
        log::trace!("allocated page table {frame}");
        Ok(frame)
    }

    fn link_new_table(
        &self,
        table: &PageTable,
        index: TableIndex,
        flags: MapFlags,
    ) -> Result<PhysicalPage<Size4K>, MapError> {
        let child = self.alloc_table()?;
        table.store(index, PageTableEntry::encode_table(child, flags));
        Ok(child)
    }

    /// Replace the huge leaf at `table[index]` with an equivalent child table.
    fn demote(
        &self,
        table: &PageTable,
        index: TableIndex,
        level: Level,
        mut leaf: PageTableEntry,
    ) -> Result<PhysicalPage<Size4K>, MapError> {
        let child = self.alloc_table()?;
        let child_table = self.table(child);
        loop {
            for i in TableIndex::all() {
                child_table.store(i, leaf.split_child(level, i));
            }
            match table.compare_exchange(index, leaf, leaf.demoted_link(child)) {
                Ok(()) => break,
                // The CPU updated A/D on the leaf meanwhile; carry them over.
                Err(current) => leaf = current,
            }
        }
        log::trace!(
            "demoted {level} leaf {} into table {child}",
            leaf.address_at(level)
        );
        Ok(child)
    }
}

/// Translate `va` through the tree rooted at `root`.
pub(crate) fn translate<M: PhysMapper>(
    phys: &M,
    root: PhysicalPage<Size4K>,
    va: VirtualAddress,
) -> Option<PhysicalAddress> {
    let slot = find_leaf(phys, root, va)?;
    Some(slot.base + (va.as_u64() & (slot.level.page_size() - 1)))
}

/// Report and clear the accessed/dirty state of the leaf translating `va`.
///
/// The read and the clear are one atomic operation, so no update by the CPU
/// in between is lost.
pub(crate) fn access_attributes<M: PhysMapper>(
    phys: &M,
    root: PhysicalPage<Size4K>,
    va: VirtualAddress,
) -> AccessAttributes {
    let Some(slot) = find_leaf(phys, root, va) else {
        return AccessAttributes::default();
    };
    let old = slot.table.clear_bits(slot.index, PageTableEntry::ACCESS_BITS);
    if !old.present() {
        // Unmapped between the walk and the clear.
        return AccessAttributes::default();
    }
    AccessAttributes {
        mapped: true,
        writeable: slot.links_writeable && old.writable(),
        accessed: old.accessed(),
        dirty: old.dirty(),
    }
}

struct LeafSlot<'t> {
    table: &'t PageTable,
    index: TableIndex,
    level: Level,
    base: PhysicalAddress,
    links_writeable: bool,
}

fn find_leaf<M: PhysMapper>(
    phys: &M,
    root: PhysicalPage<Size4K>,
    va: VirtualAddress,
) -> Option<LeafSlot<'_>> {
    let mut frame = root;
    let mut level = Level::ROOT;
    let mut links_writeable = true;
    loop {
        // Safety: see `Mapper::table`.
        let table = unsafe { phys.table(frame) };
        let index = TableIndex::of(va, level);
        let entry = table.load(index);
        match entry.kind(level) {
            EntryKind::NotPresent => return None,
            EntryKind::Leaf { frame: base, .. } => {
                return Some(LeafSlot {
                    table,
                    index,
                    level,
                    base,
                    links_writeable,
                });
            }
            EntryKind::Table(child) => {
                links_writeable &= entry.writable();
                frame = child;
                level = level.child()?;
            }
        }
    }
}

/// Deepest leaf level usable at this position.
fn leaf_level(va: VirtualAddress, pa: PhysicalAddress, remaining: u64, flags: MapFlags) -> Level {
    if flags.contains(MapFlags::HUGE) {
        for level in [Level::L2, Level::L1] {
            if remaining >= level.page_count()
                && va.is_aligned_to(level.page_size())
                && pa.is_aligned_to(level.page_size())
            {
                return level;
            }
        }
    }
    Level::L0
}

/// Whether `remaining` pages from `va` cover the whole `level` slot at `va`.
const fn covers(va: VirtualAddress, remaining: u64, level: Level) -> bool {
    va.is_aligned_to(level.page_size()) && remaining >= level.page_count()
}

/// Pages from `va` to the end of its `level` slot.
const fn pages_to_boundary(va: VirtualAddress, level: Level) -> u64 {
    let count = level.page_count();
    count - ((va.as_u64() >> 12) & (count - 1))
}

const fn is_upper_half(va: VirtualAddress) -> bool {
    va.as_u64() >> 63 == 1
}
