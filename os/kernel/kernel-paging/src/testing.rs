//! Simulated physical memory for host tests.
//!
//! A contiguous arena of [`PageTable`]-sized frames stands in for RAM at
//! [`TestMemory::PHYS_BASE`]. It is both the [`FrameAlloc`] (a bump allocator
//! that can be told to fail) and the [`PhysMapper`] (an offset into the
//! arena). Leaf targets used by tests don't need to lie inside the arena;
//! only tables are ever dereferenced.

use crate::level::{Level, TableIndex};
use crate::{FrameAlloc, PageTable, PageTableEntry, PhysMapper};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct TestMemory {
    frames: Vec<PageTable>,
    next: AtomicUsize,
    calls: AtomicUsize,
    fail_on: AtomicUsize,
    freed: AtomicUsize,
}

impl TestMemory {
    /// Physical address of the first arena frame.
    pub const PHYS_BASE: u64 = 0x0000_0010_0000_0000;

    pub fn new(frames: usize) -> Self {
        Self {
            frames: (0..frames).map(|_| PageTable::zeroed()).collect(),
            next: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            fail_on: AtomicUsize::new(usize::MAX),
            freed: AtomicUsize::new(0),
        }
    }

    /// Make the `k`-th allocation from now (1-based) and every later one fail.
    pub fn fail_from_call(&self, k: usize) {
        let calls = self.calls.load(Ordering::SeqCst);
        self.fail_on.store(calls + k, Ordering::SeqCst);
    }

    /// Allocate normally again.
    pub fn stop_failing(&self) {
        self.fail_on.store(usize::MAX, Ordering::SeqCst);
    }

    /// Frames handed out so far.
    pub fn allocated(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }

    /// Frames returned so far.
    pub fn freed(&self) -> usize {
        self.freed.load(Ordering::SeqCst)
    }

    /// A zeroed root table.
    pub fn new_root(&self) -> PhysicalPage<Size4K> {
        self.alloc_table_frame().expect("arena too small for a root")
    }

    /// Entry at `level` on the walk for `va`, following links only.
    pub fn entry_at(
        &self,
        root: PhysicalPage<Size4K>,
        va: VirtualAddress,
        level: Level,
    ) -> PageTableEntry {
        let mut frame = root;
        let mut current = Level::ROOT;
        loop {
            let entry = unsafe { self.table(frame) }.load(TableIndex::of(va, current));
            if current == level {
                return entry;
            }
            assert!(entry.is_table(current), "no table at {current} for {va:?}");
            frame = entry.address().page();
            current = current.child().unwrap();
        }
    }

    /// Simulate the CPU setting A (and D on writes) on the leaf for `va`.
    pub fn touch(&self, root: PhysicalPage<Size4K>, va: VirtualAddress, level: Level, write: bool) {
        let table_entry = if level == Level::ROOT {
            None
        } else {
            Some(self.entry_at(root, va, level.parent().unwrap()))
        };
        let frame = table_entry.map_or(root, |e| e.address().page());
        let bits = PageTableEntry::new()
            .with_accessed(true)
            .with_dirty(write)
            .into_bits();
        unsafe { self.table(frame) }.set_bits(TableIndex::of(va, level), bits);
    }

    fn frame_index(&self, pa: PhysicalAddress) -> usize {
        let offset = pa.as_u64() - Self::PHYS_BASE;
        assert_eq!(offset % 4096, 0, "unaligned table frame {pa:?}");
        let index = usize::try_from(offset / 4096).unwrap();
        assert!(index < self.frames.len(), "{pa:?} is outside the arena");
        index
    }
}

impl FrameAlloc for TestMemory {
    fn alloc_frames(&self, rank: u8) -> Option<PhysicalAddress> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call >= self.fail_on.load(Ordering::SeqCst) {
            return None;
        }
        let run = 1usize << rank;
        let mut start = 0;
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| {
                start = next.next_multiple_of(run);
                (start + run <= self.frames.len()).then_some(start + run)
            })
            .ok()?;
        Some(PhysicalAddress::new(Self::PHYS_BASE + start as u64 * 4096))
    }

    unsafe fn free_frames(&self, base: PhysicalAddress, rank: u8) {
        let _ = self.frame_index(base);
        self.freed.fetch_add(1 << rank, Ordering::SeqCst);
    }
}

impl PhysMapper for TestMemory {
    fn phys_to_direct(&self, pa: PhysicalAddress) -> VirtualAddress {
        let index = self.frame_index(pa);
        VirtualAddress::from_ptr(&raw const self.frames[index])
    }

    fn direct_to_phys(&self, va: VirtualAddress) -> PhysicalAddress {
        let base = VirtualAddress::from_ptr(self.frames.as_ptr()).as_u64();
        PhysicalAddress::new(va.as_u64() - base + Self::PHYS_BASE)
    }
}

#[test]
fn arena_round_trips_addresses() {
    let mem = TestMemory::new(4);
    let a = mem.alloc_frames(0).unwrap();
    let b = mem.alloc_frames(1).unwrap();
    assert_eq!(a.as_u64(), TestMemory::PHYS_BASE);
    assert_eq!(b.as_u64(), TestMemory::PHYS_BASE + 2 * 4096, "rank 1 is 8K aligned");
    assert_eq!(mem.direct_to_phys(mem.phys_to_direct(b)), b);
    assert_eq!(mem.alloc_frames(1), None);
}

#[test]
fn injected_failure_is_sticky() {
    let mem = TestMemory::new(8);
    mem.fail_from_call(2);
    assert!(mem.alloc_frames(0).is_some());
    assert!(mem.alloc_frames(0).is_none());
    assert!(mem.alloc_frames(0).is_none());
    mem.stop_failing();
    assert!(mem.alloc_frames(0).is_some());
}
