//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for raw memory addresses and page bases used by the
//! paging code.
//!
//! | Wrapper | Meaning |
//! |----------|----------|
//! | [`VirtualAddress`] / [`VirtualPage<S>`] | Refer to virtual (page-table translated) memory. |
//! | [`PhysicalAddress`] / [`PhysicalPage<S>`] | Refer to physical memory or MMIO regions. |
//!
//! ## Page Sizes
//!
//! The three x86-64 translation granularities are marker types implementing
//! [`PageSize`]:
//!
//! - [`Size4K`]: 4 KiB pages, mapped by level-0 tables
//! - [`Size2M`]: 2 MiB huge pages, mapped by level-1 tables
//! - [`Size1G`]: 1 GiB huge pages, mapped by level-2 tables
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0xFFFF_FFFF_8000_1234);
//! let page = va.page::<Size4K>();
//! assert_eq!(page.base().as_u64(), 0xFFFF_FFFF_8000_1000);
//! assert_eq!(page.join(va.offset::<Size4K>()), va);
//!
//! // Stepping across the non-canonical hole lands in the upper half.
//! let last_low = VirtualAddress::new(0x0000_7FFF_FFFF_F000);
//! let next = last_low.checked_add_pages::<Size4K>(1).unwrap();
//! assert_eq!(next.as_u64(), 0xFFFF_8000_0000_0000);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod page_size;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use page_size::{PageSize, Size1G, Size2M, Size4K};
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::{VIRTUAL_ADDRESS_BITS, VirtualAddress};
pub use virtual_page::VirtualPage;
