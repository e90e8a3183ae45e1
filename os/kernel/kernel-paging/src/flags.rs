use bitflags::bitflags;

bitflags! {
    /// What a caller asks for when mapping a range.
    ///
    /// Not stored anywhere; [`PageTableEntry::encode`](crate::PageTableEntry::encode)
    /// turns it into entry bits. The empty set is a present, read-only,
    /// supervisor-only, non-executable, cacheable mapping.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
    pub struct MapFlags: u8 {
        /// Allow writes.
        const WRITEABLE     = 1 << 0;

        /// Allow access from CPL 3.
        const USER          = 1 << 1;

        /// Keep the translation across CR3 reloads (needs CR4.PGE).
        /// Only ever applied to leaves.
        const GLOBAL        = 1 << 2;

        /// Bypass the caches, typically for MMIO.
        const CACHE_DISABLE = 1 << 3;

        /// Permit 2 MiB / 1 GiB leaves where size and alignment allow.
        const HUGE          = 1 << 4;

        /// Allow instruction fetch. Without it the entry gets NX.
        const EXECUTABLE    = 1 << 5;

        /// Write-through caching.
        const WRITE_THROUGH = 1 << 6;
    }
}

impl MapFlags {
    /// Kernel data: writable, global, not executable.
    pub const KERNEL_DATA: Self = Self::WRITEABLE.union(Self::GLOBAL);

    /// Kernel text: executable, global, read-only.
    pub const KERNEL_CODE: Self = Self::EXECUTABLE.union(Self::GLOBAL);

    /// User data: writable, user, not executable.
    pub const USER_DATA: Self = Self::WRITEABLE.union(Self::USER);

    /// Links in the shared kernel root slots. Leaves below decide NX and
    /// write access, and `USER` never reaches kernel regions.
    pub const SHARED_LINK: Self = Self::WRITEABLE.union(Self::EXECUTABLE);

    /// Flags for intermediate (non-leaf) entries derived from a leaf request.
    #[inline]
    #[must_use]
    pub const fn for_table_link(self) -> Self {
        self.difference(Self::GLOBAL.union(Self::HUGE))
    }
}
