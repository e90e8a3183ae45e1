use crate::{PageSize, VirtualPage};
use core::fmt;

/// Number of implemented virtual-address bits with 4-level paging.
pub const VIRTUAL_ADDRESS_BITS: u32 = 48;

/// Virtual memory address.
///
/// ### Canonical form
/// With 4-level paging only bits `0..48` are translated; bits `48..64` must
/// all equal bit 47. [`VirtualAddress::new`] does not enforce this (a
/// non-canonical value is still a meaningful *number*), but
/// [`VirtualAddress::canonical`] and [`VirtualAddress::checked_add_pages`]
/// always produce canonical results, so walks that step across the lower/upper
/// half boundary stay valid.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let va = VirtualAddress::new(0x0000_8000_0000_0000);
/// assert!(!va.is_canonical());
/// assert_eq!(va.canonical().as_u64(), 0xFFFF_8000_0000_0000);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr.addr() as u64)
    }

    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Reinterpret as a raw pointer.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn as_ptr<T>(self) -> *const T {
        self.as_u64() as usize as *const T
    }

    /// Sign-extend bit 47 into bits `48..64`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    pub const fn canonical(self) -> Self {
        let shift = 64 - VIRTUAL_ADDRESS_BITS;
        Self::new((((self.as_u64() << shift) as i64) >> shift) as u64)
    }

    #[inline]
    #[must_use]
    pub const fn is_canonical(self) -> bool {
        self.canonical().as_u64() == self.as_u64()
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned_to(self, align: u64) -> bool {
        debug_assert!(align.is_power_of_two());
        self.0 & (align - 1) == 0
    }

    #[inline]
    #[must_use]
    pub const fn page<S: PageSize>(self) -> VirtualPage<S> {
        VirtualPage::from_addr(self)
    }

    #[inline]
    #[must_use]
    pub const fn offset<S: PageSize>(self) -> u64 {
        self.0 & (S::SIZE - 1)
    }

    /// Advance by `count` pages of size `S` within the 48-bit space, keeping
    /// the result canonical.
    ///
    /// Returns `None` when the result would lie at or beyond the end of the
    /// translatable range (i.e. wraps past the last upper-half page).
    #[inline]
    #[must_use]
    pub const fn checked_add_pages<S: PageSize>(self, count: u64) -> Option<Self> {
        let low = self.as_u64() & ((1 << VIRTUAL_ADDRESS_BITS) - 1);
        let Some(bytes) = count.checked_mul(S::SIZE) else {
            return None;
        };
        let Some(next) = low.checked_add(bytes) else {
            return None;
        };
        if next >= (1 << VIRTUAL_ADDRESS_BITS) {
            return None;
        }
        Some(Self::new(next).canonical())
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:016X})", self.as_u64())
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.as_u64())
    }
}

impl<S> From<VirtualPage<S>> for VirtualAddress
where
    S: PageSize,
{
    fn from(value: VirtualPage<S>) -> Self {
        value.base()
    }
}
