//! # TLB maintenance obligations
//!
//! The mapper never invalidates translations itself: it may run with locks
//! held, and a cross-CPU shootdown from inside it would hide IPIs in a hot
//! path. Instead every mutation hands back a [`TlbFlush`] that the caller has
//! to consume.

use kernel_memory_addresses::{PageSize, Size4K, VirtualAddress};

/// How [`TlbFlush::flush`] invalidates its range.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FlushMethod {
    /// One `invlpg` per page.
    PerPage,
    /// Reload CR3; drops every non-global translation.
    NonGlobal,
    /// Toggle CR4.PGE; drops global translations too.
    Global,
}

/// Pending invalidation for a virtual range touched by `map` or `unmap`.
#[must_use = "stale translations stay cached until the range is flushed or explicitly ignored"]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TlbFlush {
    start: VirtualAddress,
    pages: u64,
    global: bool,
}

impl TlbFlush {
    /// Above this many pages a full flush (CR3 reload, or a CR4.PGE toggle
    /// for global ranges) is cheaper than per-page `invlpg`.
    pub const FULL_FLUSH_THRESHOLD: u64 = 64;

    pub(crate) const fn new(start: VirtualAddress, pages: u64, global: bool) -> Self {
        Self {
            start,
            pages,
            global,
        }
    }

    /// First page of the affected range.
    #[inline]
    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.start
    }

    /// Number of 4 KiB pages in the affected range.
    #[inline]
    #[must_use]
    pub const fn pages(&self) -> u64 {
        self.pages
    }

    /// Whether the range may hold global translations, which a CR3 reload
    /// does not evict.
    #[inline]
    #[must_use]
    pub const fn may_be_global(&self) -> bool {
        self.global
    }

    /// Combine with another pending flush into one covering both ranges.
    pub fn merge(self, other: Self) -> Self {
        let start = self.start.min(other.start);
        let end = self.end().max(other.end());
        Self {
            start,
            pages: (end - start.as_u64()) >> Size4K::SHIFT,
            global: self.global || other.global,
        }
    }

    /// Invalidate the range on the executing CPU.
    ///
    /// Other CPUs that may have used the address space still need a
    /// shootdown covering [`start`](Self::start) and [`pages`](Self::pages).
    ///
    /// # Safety
    /// Ring 0 only (with the `asm` feature).
    pub unsafe fn flush(self) {
        match self.method() {
            FlushMethod::NonGlobal => {
                log::trace!("full TLB flush for {} pages at {}", self.pages, self.start);
                unsafe { kernel_registers::tlb::invalidate_all() };
                return;
            }
            FlushMethod::Global => {
                log::trace!("global TLB flush for {} pages at {}", self.pages, self.start);
                unsafe { kernel_registers::tlb::invalidate_all_global() };
                return;
            }
            FlushMethod::PerPage => {}
        }
        let mut va = self.start;
        for _ in 0..self.pages {
            unsafe { kernel_registers::tlb::invalidate_page(va) };
            match va.checked_add_pages::<Size4K>(1) {
                Some(next) => va = next,
                None => break,
            }
        }
    }

    /// What [`flush`](Self::flush) will do for this range.
    #[must_use]
    pub const fn method(&self) -> FlushMethod {
        if self.pages <= Self::FULL_FLUSH_THRESHOLD {
            FlushMethod::PerPage
        } else if self.global {
            FlushMethod::Global
        } else {
            FlushMethod::NonGlobal
        }
    }

    /// Drop the obligation, e.g. because the root isn't loaded on any CPU.
    #[inline]
    pub const fn ignore(self) {}

    fn end(self) -> u64 {
        self.start.as_u64().saturating_add(self.pages << Size4K::SHIFT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_covers_both_ranges() {
        let a = TlbFlush::new(VirtualAddress::new(0x1000), 2, false);
        let b = TlbFlush::new(VirtualAddress::new(0x8000), 1, true);
        let m = a.merge(b);
        assert_eq!(m.start().as_u64(), 0x1000);
        assert_eq!(m.pages(), 8);
        assert!(m.may_be_global());
    }

    #[test]
    fn large_ranges_use_a_full_flush() {
        let va = VirtualAddress::new(0xffff_8880_0000_0000);
        let small = TlbFlush::new(va, TlbFlush::FULL_FLUSH_THRESHOLD, true);
        assert_eq!(small.method(), FlushMethod::PerPage);

        let user = TlbFlush::new(VirtualAddress::new(0x1000), 1000, false);
        assert_eq!(user.method(), FlushMethod::NonGlobal);

        // The whole direct map: never 2^26 single-page invalidations.
        let direct_map = TlbFlush::new(va, 256 << 18, true);
        assert_eq!(direct_map.method(), FlushMethod::Global);
        unsafe { direct_map.flush() };
    }

    #[test]
    fn host_flush_is_harmless() {
        let f = TlbFlush::new(VirtualAddress::new(0x4000_0000), 1000, false);
        unsafe { f.flush() };
        TlbFlush::new(VirtualAddress::new(0x1000), 1, true).ignore();
    }
}
