//! Steady-state frame allocation with one bit per frame.

use crate::FRAME_SIZE;
use kernel_memory_addresses::PhysicalAddress;
use kernel_paging::FrameAlloc;
use kernel_sync::SpinLock;

/// Frame supplier over one contiguous physical range.
///
/// `WORDS` sizes the bitmap: the allocator can manage up to `64 * WORDS`
/// frames. A set bit means "in use". Allocation is first-fit over runs of
/// `2^rank` frames aligned to their size in physical memory.
pub struct BitmapFrameAlloc<const WORDS: usize> {
    base: PhysicalAddress,
    frames: usize,
    state: SpinLock<Bitmap<WORDS>>,
}

struct Bitmap<const WORDS: usize> {
    bits: [u64; WORDS],
    free: usize,
}

impl<const WORDS: usize> Bitmap<WORDS> {
    const fn is_used(&self, frame: usize) -> bool {
        self.bits[frame / 64] & (1 << (frame % 64)) != 0
    }

    fn set(&mut self, frame: usize, used: bool) {
        let mask = 1 << (frame % 64);
        if used {
            self.bits[frame / 64] |= mask;
        } else {
            self.bits[frame / 64] &= !mask;
        }
    }

    fn run_is_free(&self, first: usize, len: usize) -> bool {
        (first..first + len).all(|frame| !self.is_used(frame))
    }
}

impl<const WORDS: usize> BitmapFrameAlloc<WORDS> {
    /// Manage `frames` frames starting at `base`, all initially free.
    #[must_use]
    pub const fn new(base: PhysicalAddress, frames: usize) -> Self {
        debug_assert!(base.is_aligned_to(FRAME_SIZE), "unaligned allocator base");
        debug_assert!(frames <= WORDS * 64, "bitmap too small");
        Self {
            base,
            frames,
            state: SpinLock::new(Bitmap {
                bits: [0; WORDS],
                free: frames,
            }),
        }
    }

    /// Mark `count` frames from `start` as used, e.g. frames the bootstrap
    /// allocator handed out. Frames outside the managed range are ignored.
    pub fn reserve(&self, start: PhysicalAddress, count: u64) {
        let mut state = self.state.lock();
        for n in 0..count {
            let Some(frame) = self.frame_index(start + n * FRAME_SIZE) else {
                continue;
            };
            if !state.is_used(frame) {
                state.set(frame, true);
                state.free -= 1;
            }
        }
    }

    /// Frames currently free.
    #[must_use]
    pub fn available_frames(&self) -> usize {
        self.state.lock().free
    }

    /// Number of frames under management.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.frames
    }

    fn frame_index(&self, pa: PhysicalAddress) -> Option<usize> {
        let offset = pa.as_u64().checked_sub(self.base.as_u64())?;
        let index = usize::try_from(offset / FRAME_SIZE).ok()?;
        (index < self.frames).then_some(index)
    }

    fn address_of(&self, frame: usize) -> PhysicalAddress {
        self.base + frame as u64 * FRAME_SIZE
    }
}

impl<const WORDS: usize> FrameAlloc for BitmapFrameAlloc<WORDS> {
    fn alloc_frames(&self, rank: u8) -> Option<PhysicalAddress> {
        let len = 1usize.checked_shl(u32::from(rank))?;
        let len_u64 = u64::try_from(len).ok()?;

        // First index whose physical frame number is a multiple of `len`.
        let base_frame = self.base.frame_number();
        let skew = usize::try_from((len_u64 - base_frame % len_u64) % len_u64).ok()?;

        let mut state = self.state.lock();
        if state.free < len {
            return None;
        }
        let mut first = skew;
        while first + len <= self.frames {
            if state.run_is_free(first, len) {
                for frame in first..first + len {
                    state.set(frame, true);
                }
                state.free -= len;
                return Some(self.address_of(first));
            }
            first += len;
        }
        None
    }

    unsafe fn free_frames(&self, base: PhysicalAddress, rank: u8) {
        let len = 1usize << rank;
        let Some(first) = self.frame_index(base) else {
            log::warn!("freeing {base}, which this allocator doesn't manage");
            return;
        };
        debug_assert!(first + len <= self.frames, "run exceeds the managed range");

        let mut state = self.state.lock();
        for frame in first..(first + len).min(self.frames) {
            if state.is_used(frame) {
                state.set(frame, false);
                state.free += 1;
            } else {
                log::warn!("double free of frame {}", self.address_of(frame));
            }
        }
    }
}
