use core::fmt;
use core::hash::Hash;

mod sealed {
    pub trait Sealed {}
}

/// Marker trait for the three x86-64 translation granularities.
///
/// Sealed: the hardware knows no other leaf sizes.
pub trait PageSize:
    sealed::Sealed + Copy + Ord + Hash + fmt::Display + fmt::Debug
{
    /// log2 of the page size; the number of in-page offset bits.
    const SHIFT: u32;
    /// Page size in bytes.
    const SIZE: u64 = 1 << Self::SHIFT;
    /// Short label used in dumps and log lines, e.g. `"2M"`.
    const NAME: &'static str;
}

macro_rules! page_size {
    ($(#[$doc:meta])* $ty:ident, $shift:literal, $name:literal) => {
        $(#[$doc])*
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $ty;

        impl sealed::Sealed for $ty {}

        impl PageSize for $ty {
            const SHIFT: u32 = $shift;
            const NAME: &'static str = $name;
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(Self::NAME)
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(Self::NAME)
            }
        }
    };
}

page_size!(
    /// 4 KiB page, the leaf granularity of a level-0 table.
    Size4K, 12, "4K"
);
page_size!(
    /// 2 MiB huge page, a leaf in a level-1 table.
    Size2M, 21, "2M"
);
page_size!(
    /// 1 GiB huge page, a leaf in a level-2 table.
    Size1G, 30, "1G"
);

const _: () = {
    assert!(Size4K::SIZE == 4096);
    assert!(Size2M::SIZE == 512 * Size4K::SIZE);
    assert!(Size1G::SIZE == 512 * Size2M::SIZE);
};
