//! Paging levels and per-level table indices.
//!
//! Levels count from the leaf upwards: [`Level::L0`] tables map 4 KiB pages,
//! [`Level::L3`] is the root referenced by CR3.
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  L3   |  L2   |  L1   |  L0   | Offset |
//! ```

use core::fmt;
use kernel_memory_addresses::VirtualAddress;

/// Number of entries in every table.
pub const ENTRIES_PER_TABLE: usize = 512;

/// One level of the 4-level translation tree.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u8)]
pub enum Level {
    /// Leaf tables; every present entry maps a 4 KiB page.
    L0 = 0,
    /// Entries point to an `L0` table or map a 2 MiB page.
    L1 = 1,
    /// Entries point to an `L1` table or map a 1 GiB page.
    L2 = 2,
    /// The root table; entries always point to an `L2` table.
    L3 = 3,
}

impl Level {
    pub const ROOT: Self = Self::L3;

    /// Bit position of this level's index within a virtual address.
    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        12 + 9 * self as u32
    }

    /// Bytes covered by one entry at this level.
    #[inline]
    #[must_use]
    pub const fn page_size(self) -> u64 {
        1 << self.shift()
    }

    /// Number of 4 KiB pages covered by one entry at this level.
    #[inline]
    #[must_use]
    pub const fn page_count(self) -> u64 {
        1 << (9 * self as u32)
    }

    /// The level of the tables this level's entries point to.
    #[inline]
    #[must_use]
    pub const fn child(self) -> Option<Self> {
        match self {
            Self::L0 => None,
            Self::L1 => Some(Self::L0),
            Self::L2 => Some(Self::L1),
            Self::L3 => Some(Self::L2),
        }
    }

    #[inline]
    #[must_use]
    pub const fn parent(self) -> Option<Self> {
        match self {
            Self::L0 => Some(Self::L1),
            Self::L1 => Some(Self::L2),
            Self::L2 => Some(Self::L3),
            Self::L3 => None,
        }
    }

    /// Whether an entry at this level may be a huge leaf (PS=1).
    #[inline]
    #[must_use]
    pub const fn supports_huge(self) -> bool {
        matches!(self, Self::L1 | Self::L2)
    }

    /// Short name of the page size an entry at this level covers.
    #[inline]
    #[must_use]
    pub const fn size_name(self) -> &'static str {
        match self {
            Self::L0 => "4K",
            Self::L1 => "2M",
            Self::L2 => "1G",
            Self::L3 => "512G",
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", *self as u8)
    }
}

/// Index into a table at some level, always in `0..512`.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

impl TableIndex {
    pub const FIRST: Self = Self(0);
    pub const LAST: Self = Self(511);

    /// Extract the index for `level` from `va`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn of(va: VirtualAddress, level: Level) -> Self {
        Self(((va.as_u64() >> level.shift()) & 0x1FF) as u16)
    }

    /// Construct from a raw value.
    ///
    /// ### Debug assertions
    /// - Asserts `v < 512` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!(v < 512);
        Self(v)
    }

    /// Construct from a slot number such as [`kernel_info::memory::DIRECT_MAP_SLOT`].
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_usize(v: usize) -> Self {
        debug_assert!(v < ENTRIES_PER_TABLE);
        Self(v as u16)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0 as u64
    }

    /// The following index, or `None` past the end of the table.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        if self.0 < Self::LAST.0 {
            Some(Self(self.0 + 1))
        } else {
            None
        }
    }

    /// All 512 indices in ascending order.
    #[allow(clippy::cast_possible_truncation)]
    pub fn all() -> impl Iterator<Item = Self> {
        (0..ENTRIES_PER_TABLE).map(|i| Self(i as u16))
    }
}

impl fmt::Display for TableIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:3}", self.0)
    }
}
