//! # Page table storage
//!
//! A [`PageTable`] is one 4 KiB frame holding 512 entries. Every slot is an
//! [`AtomicU64`], so walkers that don't hold the address-space lock
//! (`translate`, `access_attributes`) always observe whole entries, and the
//! CPU's own A/D updates are never lost to a read-modify-write.
//!
//! Ordering: links to freshly initialized child tables are published with
//! `Release` and read with `Acquire`, so a reader that sees the link also sees
//! the zeroed/filled child.

use crate::entry::{PageTableEntry, WidenMask};
use crate::level::{ENTRIES_PER_TABLE, TableIndex};
use crate::MapFlags;
use core::sync::atomic::{AtomicU64, Ordering};

/// One page table at any level: 512 entries, 4 KiB-aligned.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [AtomicU64; ENTRIES_PER_TABLE],
}

const _: () = {
    assert!(size_of::<PageTable>() == 4096);
    assert!(align_of::<PageTable>() == 4096);
};

impl PageTable {
    /// A table with all entries non-present.
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [const { AtomicU64::new(0) }; ENTRIES_PER_TABLE],
        }
    }

    #[inline]
    pub fn load(&self, i: TableIndex) -> PageTableEntry {
        PageTableEntry::from_bits(self.entries[i.as_usize()].load(Ordering::Acquire))
    }

    /// Write the entry at `i`.
    ///
    /// Caller must handle any required TLB invalidation when changing active mappings.
    #[inline]
    pub fn store(&self, i: TableIndex, e: PageTableEntry) {
        self.entries[i.as_usize()].store(e.into_bits(), Ordering::Release);
    }

    /// Replace `current` with `new` unless the entry changed in between.
    ///
    /// # Errors
    /// Returns the entry actually found when it differs from `current`.
    #[inline]
    pub fn compare_exchange(
        &self,
        i: TableIndex,
        current: PageTableEntry,
        new: PageTableEntry,
    ) -> Result<(), PageTableEntry> {
        self.entries[i.as_usize()]
            .compare_exchange(
                current.into_bits(),
                new.into_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(PageTableEntry::from_bits)
    }

    /// Atomically OR `bits` into the entry; returns the previous entry.
    #[inline]
    pub fn set_bits(&self, i: TableIndex, bits: u64) -> PageTableEntry {
        PageTableEntry::from_bits(self.entries[i.as_usize()].fetch_or(bits, Ordering::AcqRel))
    }

    /// Atomically clear `bits` in the entry; returns the previous entry.
    #[inline]
    pub fn clear_bits(&self, i: TableIndex, bits: u64) -> PageTableEntry {
        PageTableEntry::from_bits(self.entries[i.as_usize()].fetch_and(!bits, Ordering::AcqRel))
    }

    /// Widen the entry at `i` in place (see [`PageTableEntry::widen`]).
    ///
    /// Both halves are monotonic, so concurrent readers only ever see the old
    /// or a more permissive entry.
    #[inline]
    pub fn widen(&self, i: TableIndex, flags: MapFlags) {
        let WidenMask { set, clear } = PageTableEntry::widen_mask(flags);
        let old = self.load(i);
        if old.into_bits() & set != set {
            self.set_bits(i, set);
        }
        if old.into_bits() & clear != 0 {
            self.clear_bits(i, clear);
        }
    }

    /// Mark every entry non-present.
    pub fn zero(&self) {
        for e in &self.entries {
            e.store(0, Ordering::Relaxed);
        }
    }

    /// Iterate over all entries with their index.
    pub fn iter(&self) -> impl Iterator<Item = (TableIndex, PageTableEntry)> + '_ {
        TableIndex::all().map(|i| (i, self.load(i)))
    }

    /// Whether no entry is present.
    pub fn is_empty(&self) -> bool {
        self.iter().all(|(_, e)| !e.present())
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::zeroed()
    }
}
