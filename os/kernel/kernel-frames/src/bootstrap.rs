//! Bump allocation over the firmware memory map.

use crate::FRAME_SIZE;
use kernel_memory_addresses::PhysicalAddress;
use kernel_paging::FrameAlloc;
use kernel_sync::SpinLock;

/// A usable physical range reported by firmware.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MemoryRegion {
    pub start: PhysicalAddress,
    /// Length in bytes.
    pub len: u64,
}

impl MemoryRegion {
    #[inline]
    #[must_use]
    pub const fn new(start: PhysicalAddress, len: u64) -> Self {
        Self { start, len }
    }

    /// One past the last byte.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.start.as_u64().saturating_add(self.len)
    }
}

/// Early-boot frame supplier.
///
/// Walks the regions in order and never reuses a frame. Runs are aligned to
/// their size, so a rank-`n` request may skip up to `2^n - 1` frames. Frees
/// are ignored (with a warning); once [`seal`](Self::seal)ed, every allocation
/// fails.
pub struct BootstrapFrameAlloc<'r> {
    state: SpinLock<BumpState<'r>>,
}

struct BumpState<'r> {
    regions: &'r [MemoryRegion],
    /// Region currently being consumed.
    region: usize,
    /// Next unused address in that region.
    next: u64,
    used: u64,
    sealed: bool,
}

impl<'r> BootstrapFrameAlloc<'r> {
    #[must_use]
    pub const fn new(regions: &'r [MemoryRegion]) -> Self {
        let next = match regions.first() {
            Some(region) => region.start.as_u64(),
            None => 0,
        };
        Self {
            state: SpinLock::new(BumpState {
                regions,
                region: 0,
                next,
                used: 0,
                sealed: false,
            }),
        }
    }

    /// Stop handing out frames; the steady-state allocator takes over.
    ///
    /// Returns the high-water mark as `(region index, address)`: regions
    /// before the index may be in use anywhere, the indexed one below the
    /// address.
    pub fn seal(&self) -> (usize, PhysicalAddress) {
        let mut state = self.state.lock();
        state.sealed = true;
        log::info!(
            "bootstrap frame allocator sealed after {} frames",
            state.used
        );
        (state.region, PhysicalAddress::new(state.next))
    }

    /// Frames handed out so far.
    pub fn used_frames(&self) -> u64 {
        self.state.lock().used
    }
}

impl FrameAlloc for BootstrapFrameAlloc<'_> {
    fn alloc_frames(&self, rank: u8) -> Option<PhysicalAddress> {
        let mut state = self.state.lock();
        if state.sealed {
            log::error!("allocation from sealed bootstrap frame allocator");
            return None;
        }
        let size = FRAME_SIZE.checked_shl(u32::from(rank))?;

        while let Some(region) = state.regions.get(state.region).copied() {
            let start = state.next.max(region.start.as_u64()).next_multiple_of(size);
            if let Some(end) = start.checked_add(size)
                && end <= region.end()
            {
                state.next = end;
                state.used += size / FRAME_SIZE;
                return Some(PhysicalAddress::new(start));
            }
            state.region += 1;
            if let Some(next) = state.regions.get(state.region) {
                state.next = next.start.as_u64();
            }
        }

        log::warn!("bootstrap frame allocator exhausted (rank {rank})");
        None
    }

    unsafe fn free_frames(&self, base: PhysicalAddress, rank: u8) {
        log::warn!("bootstrap frame allocator cannot free {base} (rank {rank}); leaking");
    }
}
