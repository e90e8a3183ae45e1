//! Bounded, non-recursive tree walk.
//!
//! Every walker in this crate keeps one [`ResumePoint`] per level instead of
//! recursing, so kernel stack use is fixed no matter how much of the tree an
//! operation touches.

use crate::level::{Level, TableIndex};
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};

/// Where to continue at one level of the walk.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum ResumePoint {
    /// Nothing left to visit at this level.
    Done,
    /// Continue at `index` of the table in frame `table`.
    Pending {
        table: PhysicalPage<Size4K>,
        index: TableIndex,
    },
}

/// Four resume points (one per level) plus the level currently visited.
#[derive(Debug)]
pub(crate) struct WalkStack {
    points: [ResumePoint; 4],
    level: Level,
}

impl WalkStack {
    /// Start at the root slot covering `va`.
    pub fn starting_at(root: PhysicalPage<Size4K>, va: VirtualAddress) -> Self {
        let mut points = [ResumePoint::Done; 4];
        points[Level::ROOT.as_usize()] = ResumePoint::Pending {
            table: root,
            index: TableIndex::of(va, Level::ROOT),
        };
        Self {
            points,
            level: Level::ROOT,
        }
    }

    #[inline]
    pub const fn level(&self) -> Level {
        self.level
    }

    /// Table and slot to visit next, or `None` once the root is exhausted.
    #[inline]
    pub const fn current(&self) -> Option<(PhysicalPage<Size4K>, TableIndex)> {
        match self.points[self.level.as_usize()] {
            ResumePoint::Pending { table, index } => Some((table, index)),
            ResumePoint::Done => None,
        }
    }

    /// Virtual address of the first byte covered by the current slot.
    pub fn address(&self) -> VirtualAddress {
        let mut va = 0;
        for point in self.points[self.level.as_usize()..].iter().rev() {
            if let ResumePoint::Pending { index, .. } = point {
                va = (va << 9) | index.as_u64();
            }
        }
        // `va` now holds the concatenated indices from the root down.
        VirtualAddress::new(va << self.level.shift()).canonical()
    }

    /// Enter `child`, the table behind the current slot, at the slot covering `va`.
    pub fn descend(&mut self, child: PhysicalPage<Size4K>, va: VirtualAddress) {
        debug_assert_ne!(self.level, Level::L0, "cannot descend below L0");
        let Some(level) = self.level.child() else {
            return;
        };
        self.level = level;
        self.points[level.as_usize()] = ResumePoint::Pending {
            table: child,
            index: TableIndex::of(va, level),
        };
    }

    /// Step to the next slot, leaving tables whose last slot was visited.
    ///
    /// Returns `false` when the root itself is exhausted.
    #[inline]
    pub fn advance(&mut self) -> bool {
        self.advance_with(|_, _| {})
    }

    /// Like [`advance`](Self::advance), calling `exhausted` for every table
    /// left behind (including the root).
    pub fn advance_with(&mut self, mut exhausted: impl FnMut(Level, PhysicalPage<Size4K>)) -> bool {
        loop {
            let ResumePoint::Pending { table, index } = self.points[self.level.as_usize()] else {
                return false;
            };
            if let Some(next) = index.next() {
                self.points[self.level.as_usize()] = ResumePoint::Pending { table, index: next };
                return true;
            }
            self.points[self.level.as_usize()] = ResumePoint::Done;
            exhausted(self.level, table);
            match self.level.parent() {
                Some(parent) => self.level = parent,
                None => return false,
            }
        }
    }
}
