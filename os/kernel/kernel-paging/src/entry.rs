//! # Page-table entry codec
//!
//! One [`PageTableEntry`] bit layout serves every level; which bits mean what
//! depends on the level the entry is read at and on the PS bit. Callers read
//! entries through [`PageTableEntry::kind`], which never exposes a leaf as a
//! table pointer or the other way around.
//!
//! ## Huge leaves and PAT
//!
//! In a 4 KiB leaf bit 7 is the PAT selector. In 2 MiB / 1 GiB leaves bit 7 is
//! PS and PAT moves to bit 12, the lowest bit of the frame field. Splitting a
//! huge leaf moves PAT back to bit 7 for 4 KiB children.

use crate::MapFlags;
use crate::level::{Level, TableIndex};
use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// x86-64 page-table entry (identical layout at all four levels).
#[bitfield(u64)]
#[derive(PartialEq, Eq, Hash)]
pub struct PageTableEntry {
    /// **Present** (bit 0): entry is valid. All other bits are ignored when clear.
    pub present: bool,

    /// **Writable** (bit 1): write permission; intersects across the walk.
    pub writable: bool,

    /// **User** (bit 2): allow CPL 3 access; intersects across the walk.
    pub user: bool,

    /// **Page Write-Through** (PWT, bit 3).
    pub write_through: bool,

    /// **Page Cache Disable** (PCD, bit 4).
    pub cache_disable: bool,

    /// **Accessed** (bit 5): set by the CPU on first use.
    pub accessed: bool,

    /// **Dirty** (bit 6): set by the CPU on first write through a leaf.
    pub dirty: bool,

    /// **PS** (bit 7) in L1/L2 entries; **PAT** in L0 entries. Must be 0 at L3.
    pub huge: bool,

    /// **Global** (bit 8): leaf survives CR3 reloads. Ignored in table links.
    pub global: bool,

    /// OS-available (bits 9..11).
    #[bits(3)]
    pub os_available_low: u8,

    /// Physical frame number (bits 12..51).
    #[bits(40)]
    frame: u64,

    /// OS-available (bits 52..58).
    #[bits(7)]
    pub os_available_high: u8,

    /// Protection key (bits 59..62).
    #[bits(4)]
    pub protection_key: u8,

    /// **No-Execute** (bit 63).
    pub no_execute: bool,
}

/// Tagged view of an entry read at a known level.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EntryKind {
    NotPresent,
    /// Maps `frame` (aligned to the level's page size) directly.
    Leaf { frame: PhysicalAddress, flags: MapFlags },
    /// Points to a child table one level down.
    Table(PhysicalPage<Size4K>),
}

/// Bit masks applied by [`PageTableEntry::widen`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WidenMask {
    /// Bits to set.
    pub set: u64,
    /// Bits to clear.
    pub clear: u64,
}

/// PAT selector of a huge leaf (lowest frame bit).
const HUGE_PAT_BIT: u64 = 1 << 12;

impl PageTableEntry {
    /// Bits the CPU sets on access; cleared by access tracking.
    pub const ACCESS_BITS: u64 = Self::new().with_accessed(true).with_dirty(true).into_bits();

    /// A non-present entry.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new()
    }

    /// Present entry pointing at `frame` with bits derived from `flags`.
    ///
    /// PS is left clear; use [`encode_leaf`](Self::encode_leaf) for leaves and
    /// [`encode_table`](Self::encode_table) for table links.
    #[inline]
    #[must_use]
    pub const fn encode(frame: PhysicalAddress, flags: MapFlags) -> Self {
        debug_assert!(frame.is_aligned_to(4096), "frame must be 4K aligned");
        Self::new()
            .with_present(true)
            .with_writable(flags.contains(MapFlags::WRITEABLE))
            .with_user(flags.contains(MapFlags::USER))
            .with_write_through(flags.contains(MapFlags::WRITE_THROUGH))
            .with_cache_disable(flags.contains(MapFlags::CACHE_DISABLE))
            .with_global(flags.contains(MapFlags::GLOBAL))
            .with_no_execute(!flags.contains(MapFlags::EXECUTABLE))
            .with_frame(frame.frame_number())
    }

    /// Leaf mapping `frame` at `level`; PS is set for L1/L2.
    #[inline]
    #[must_use]
    pub const fn encode_leaf(level: Level, frame: PhysicalAddress, flags: MapFlags) -> Self {
        debug_assert!(frame.is_aligned_to(level.page_size()), "leaf frame misaligned");
        debug_assert!(!matches!(level, Level::L3), "no leaves in the root table");
        Self::encode(frame, flags).with_huge(level.supports_huge())
    }

    /// Link to a child table; huge and global are never set on links.
    #[inline]
    #[must_use]
    pub const fn encode_table(child: PhysicalPage<Size4K>, flags: MapFlags) -> Self {
        Self::encode(child.base(), flags.for_table_link())
    }

    /// Masks that make an entry at least as permissive as `flags` asks for.
    ///
    /// Writable, user and global are only ever added. Cache-disable,
    /// write-through and no-execute are only ever removed, and only when the
    /// request itself doesn't want them.
    #[inline]
    #[must_use]
    pub const fn widen_mask(flags: MapFlags) -> WidenMask {
        let set = Self::new()
            .with_writable(flags.contains(MapFlags::WRITEABLE))
            .with_user(flags.contains(MapFlags::USER))
            .with_global(flags.contains(MapFlags::GLOBAL))
            .into_bits();
        let clear = Self::new()
            .with_cache_disable(!flags.contains(MapFlags::CACHE_DISABLE))
            .with_write_through(!flags.contains(MapFlags::WRITE_THROUGH))
            .with_no_execute(flags.contains(MapFlags::EXECUTABLE))
            .into_bits();
        WidenMask { set, clear }
    }

    /// This entry with permissions widened for `flags`. Never narrows.
    #[inline]
    #[must_use]
    pub const fn widen(self, flags: MapFlags) -> Self {
        let mask = Self::widen_mask(flags);
        Self::from_bits((self.into_bits() | mask.set) & !mask.clear)
    }

    /// The 4 KiB-aligned address in the frame field (`frame_number * 4096`).
    ///
    /// For huge leaves this includes the PAT bit; see [`address_at`](Self::address_at).
    #[inline]
    #[must_use]
    pub const fn address(self) -> PhysicalAddress {
        PhysicalAddress::from_frame_number(self.frame())
    }

    /// The mapped base when read at `level`, with PAT masked off for huge leaves.
    #[inline]
    #[must_use]
    pub const fn address_at(self, level: Level) -> PhysicalAddress {
        if level.supports_huge() && self.huge() {
            PhysicalAddress::new(self.address().as_u64() & !(level.page_size() - 1))
        } else {
            self.address()
        }
    }

    /// Whether reading this entry at `level` yields a table link.
    #[inline]
    #[must_use]
    pub const fn is_table(self, level: Level) -> bool {
        matches!(self.kind(level), EntryKind::Table(_))
    }

    /// Decode this entry as read at `level`.
    #[must_use]
    pub const fn kind(self, level: Level) -> EntryKind {
        if !self.present() {
            return EntryKind::NotPresent;
        }
        let is_leaf = match level {
            Level::L0 => true,
            Level::L1 | Level::L2 => self.huge(),
            Level::L3 => false,
        };
        if is_leaf {
            EntryKind::Leaf {
                frame: self.address_at(level),
                flags: self.map_flags(level),
            }
        } else {
            EntryKind::Table(self.address().page())
        }
    }

    /// The permission and caching bits as [`MapFlags`].
    #[must_use]
    pub const fn map_flags(self, level: Level) -> MapFlags {
        let mut flags = MapFlags::empty();
        if self.writable() {
            flags = flags.union(MapFlags::WRITEABLE);
        }
        if self.user() {
            flags = flags.union(MapFlags::USER);
        }
        if self.global() {
            flags = flags.union(MapFlags::GLOBAL);
        }
        if self.cache_disable() {
            flags = flags.union(MapFlags::CACHE_DISABLE);
        }
        if self.write_through() {
            flags = flags.union(MapFlags::WRITE_THROUGH);
        }
        if !self.no_execute() {
            flags = flags.union(MapFlags::EXECUTABLE);
        }
        if level.supports_huge() && self.huge() {
            flags = flags.union(MapFlags::HUGE);
        }
        flags
    }

    /// Entry `index` of the table that replaces this huge leaf at `level`.
    ///
    /// The child maps `base + index * child_size` with every other bit copied,
    /// so the 512 children together translate exactly like the original.
    #[must_use]
    pub const fn split_child(self, level: Level, index: TableIndex) -> Self {
        debug_assert!(level.supports_huge() && self.huge(), "only huge leaves split");
        let pat = self.address().as_u64() & HUGE_PAT_BIT != 0;
        let Some(child) = level.child() else {
            return self;
        };
        let base = self.address_at(level).as_u64() + index.as_u64() * child.page_size();
        if matches!(child, Level::L0) {
            self.with_frame(base >> 12).with_huge(pat)
        } else {
            let pat_bit = if pat { HUGE_PAT_BIT } else { 0 };
            self.with_frame((base | pat_bit) >> 12)
        }
    }

    /// Link to `child` carrying this huge leaf's permissions, used when the
    /// leaf is demoted into `child`.
    #[inline]
    #[must_use]
    pub const fn demoted_link(self, child: PhysicalPage<Size4K>) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(self.writable())
            .with_user(self.user())
            .with_write_through(self.write_through())
            .with_cache_disable(self.cache_disable())
            .with_no_execute(self.no_execute())
            .with_frame(child.base().frame_number())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pa(v: u64) -> PhysicalAddress {
        PhysicalAddress::new(v)
    }

    #[test]
    fn encode_sets_present_and_inverts_executable() {
        let e = PageTableEntry::encode(pa(0x5555_0000), MapFlags::WRITEABLE);
        assert!(e.present());
        assert!(e.writable());
        assert!(!e.user());
        assert!(e.no_execute());
        assert_eq!(e.address(), pa(0x5555_0000));

        let x = PageTableEntry::encode(pa(0x1000), MapFlags::EXECUTABLE);
        assert!(!x.no_execute());
        assert!(!x.writable());
    }

    #[test]
    fn bit_positions_match_hardware() {
        let e = PageTableEntry::encode_leaf(
            Level::L1,
            pa(0x4020_0000),
            MapFlags::WRITEABLE | MapFlags::USER | MapFlags::GLOBAL | MapFlags::CACHE_DISABLE,
        );
        assert_eq!(e.into_bits(), 0x8000_0000_4020_0000 | 0x197);
        assert_eq!(PageTableEntry::ACCESS_BITS, 0x60);
    }

    #[test]
    fn table_links_never_carry_huge_or_global() {
        let child = pa(0x7000).page();
        let e = PageTableEntry::encode_table(child, MapFlags::all());
        assert!(!e.huge());
        assert!(!e.global());
        assert!(e.writable());
        assert_eq!(e.kind(Level::L2), EntryKind::Table(child));
    }

    #[test]
    fn kind_depends_on_level() {
        assert_eq!(PageTableEntry::zero().kind(Level::L1), EntryKind::NotPresent);

        let huge = PageTableEntry::encode_leaf(Level::L1, pa(0x20_0000), MapFlags::empty());
        assert_eq!(
            huge.kind(Level::L1),
            EntryKind::Leaf {
                frame: pa(0x20_0000),
                flags: MapFlags::HUGE
            }
        );

        // Bit 7 is PAT at L0, so a "huge" looking entry is still a 4K leaf.
        let leaf = PageTableEntry::encode(pa(0x3000), MapFlags::WRITEABLE).with_huge(true);
        assert!(matches!(leaf.kind(Level::L0), EntryKind::Leaf { .. }));
    }

    #[test]
    fn widen_only_adds_permissions() {
        let ro = PageTableEntry::encode(pa(0x1000), MapFlags::CACHE_DISABLE);
        let widened = ro.widen(MapFlags::WRITEABLE | MapFlags::EXECUTABLE);
        assert!(widened.writable());
        assert!(!widened.no_execute());
        assert!(!widened.cache_disable());

        // A narrower request leaves the entry alone.
        let rw = PageTableEntry::encode(pa(0x1000), MapFlags::WRITEABLE | MapFlags::EXECUTABLE);
        assert_eq!(rw.widen(MapFlags::empty()), rw);
    }

    #[test]
    fn widen_keeps_cache_disable_when_requested_again() {
        let uc = PageTableEntry::encode(pa(0x1000), MapFlags::CACHE_DISABLE);
        assert!(uc.widen(MapFlags::CACHE_DISABLE).cache_disable());
    }

    #[test]
    fn split_2m_moves_pat_to_bit_7() {
        let huge = PageTableEntry::encode_leaf(Level::L1, pa(0x40_0000), MapFlags::WRITEABLE)
            .with_frame((0x40_0000 | HUGE_PAT_BIT) >> 12)
            .with_dirty(true);
        assert_eq!(huge.address_at(Level::L1), pa(0x40_0000));

        let child = huge.split_child(Level::L1, TableIndex::new(3));
        assert_eq!(child.address(), pa(0x40_3000));
        assert!(child.huge(), "PAT carried into bit 7");
        assert!(child.writable());
        assert!(child.dirty());
        assert!(child.no_execute());
    }

    #[test]
    fn split_1g_yields_2m_leaves() {
        let huge = PageTableEntry::encode_leaf(Level::L2, pa(0x4000_0000), MapFlags::GLOBAL);
        let child = huge.split_child(Level::L2, TableIndex::new(5));
        assert_eq!(
            child.kind(Level::L1),
            EntryKind::Leaf {
                frame: pa(0x4000_0000 + 5 * 0x20_0000),
                flags: MapFlags::GLOBAL | MapFlags::HUGE
            }
        );
    }

    #[test]
    fn demoted_link_keeps_permissions_only() {
        let huge = PageTableEntry::encode_leaf(
            Level::L1,
            pa(0x20_0000),
            MapFlags::USER | MapFlags::GLOBAL | MapFlags::EXECUTABLE,
        )
        .with_accessed(true);
        let link = huge.demoted_link(pa(0x9000).page());
        assert!(link.user());
        assert!(!link.no_execute());
        assert!(!link.global());
        assert!(!link.huge());
        assert!(!link.accessed());
        assert_eq!(link.address(), pa(0x9000));
    }
}
