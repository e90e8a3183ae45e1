//! # x86-64 Page-Table Manager
//!
//! Builds, mutates, queries and tears down 4-level x86-64 translation trees.
//!
//! ## What you get
//! - A bit-exact [`PageTableEntry`] codec with a tagged [`EntryKind`] view.
//! - An atomic, 4 KiB-aligned [`PageTable`].
//! - [`AddressSpace`] with `map` / `unmap` / `translate` / `access_attributes`,
//!   huge-page selection and demotion, and a per-root structural lock.
//! - [`bootstrap_direct_map`] building the first root and the 256 GiB direct
//!   map, and [`KernelMappings`] sharing the kernel's top-level slots with
//!   every other root.
//! - [`TlbFlush`], the invalidation obligation handed back by every mutation.
//! - [`TableDump`] for diagnostics.
//!
//! ## Virtual Address → Physical Address Walk
//!
//! ```text
//!  L3 (root) →  L2  →  L1  →  L0  →  Physical Page
//!   │            │      │      │
//!   │            │      │      └───► maps 4 KiB page
//!   │            │      └──────────► PS=1 → 2 MiB page
//!   │            └─────────────────► PS=1 → 1 GiB page
//!   └──────────────────────────────► always points to an L2 table
//! ```
//!
//! ## Collaborators
//!
//! Physical memory comes from a [`FrameAlloc`]; tables are reached through a
//! [`PhysMapper`] (the direct map once it exists, an identity mapping before).
//! Both must be internally synchronized, which is why their methods take
//! `&self`.
//!
//! ## Concurrency
//!
//! `map` and `unmap` serialize on the address space's lock (and on the shared
//! kernel lock when they touch a shared top-level slot). `translate` and
//! `access_attributes` take no lock; entries are read with atomic 64-bit loads
//! and concurrent structural changes only ever widen permissions or publish
//! fully initialized child tables.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

mod address_space;
mod dump;
mod entry;
mod error;
mod flags;
mod kernel;
mod level;
mod mapper;
mod table;
mod tlb;
mod walk;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::address_space::{AddressSpace, RootPage};
pub use crate::dump::TableDump;
pub use crate::entry::{EntryKind, PageTableEntry, WidenMask};
pub use crate::error::{BootstrapError, MapError};
pub use crate::flags::MapFlags;
pub use crate::kernel::{KernelMappings, bootstrap_direct_map};
pub use crate::level::{ENTRIES_PER_TABLE, Level, TableIndex};
pub use crate::mapper::AccessAttributes;
pub use crate::table::PageTable;
pub use crate::tlb::{FlushMethod, TlbFlush};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};

/// Physical frame supplier.
///
/// Hands out naturally aligned runs of `2^rank` 4 KiB frames. Page tables
/// only ever use rank 0.
///
/// Implementations must be internally synchronized: the mapper calls them
/// through `&self`, possibly from several CPUs.
pub trait FrameAlloc {
    /// Allocate `2^rank` contiguous frames aligned to their size.
    ///
    /// Returns `None` when the supplier is exhausted.
    fn alloc_frames(&self, rank: u8) -> Option<PhysicalAddress>;

    /// Return a run previously obtained from [`alloc_frames`](Self::alloc_frames).
    ///
    /// # Safety
    /// `base` and `rank` must match an earlier allocation, and nothing may
    /// reference the frames anymore.
    unsafe fn free_frames(&self, base: PhysicalAddress, rank: u8);

    /// Allocate one 4 KiB frame for a page table.
    fn alloc_table_frame(&self) -> Option<PhysicalPage<Size4K>> {
        let base = self.alloc_frames(0)?;
        debug_assert!(base.is_aligned_to(4096), "frame supplier returned {base:?}");
        Some(base.page())
    }

    /// Return a page-table frame.
    ///
    /// # Safety
    /// As for [`free_frames`](Self::free_frames); no table may still link to it.
    unsafe fn free_table_frame(&self, frame: PhysicalPage<Size4K>) {
        unsafe { self.free_frames(frame.base(), 0) }
    }
}

/// Converts between physical addresses and the virtual alias the kernel uses
/// to reach them.
///
/// Typical patterns:
/// - **Early boot**: firmware identity mapping; both conversions are no-ops.
/// - **Kernel**: the direct map; a constant offset is added/subtracted.
///
/// Every frame a [`FrameAlloc`] hands out for page tables must be reachable
/// (readable and writable) through this mapping.
pub trait PhysMapper {
    fn phys_to_direct(&self, pa: PhysicalAddress) -> VirtualAddress;

    fn direct_to_phys(&self, va: VirtualAddress) -> PhysicalAddress;

    /// View the page table stored in `frame`.
    ///
    /// # Safety
    /// `frame` must hold a page table (or be a fresh frame about to become
    /// one) for as long as the returned reference lives.
    #[inline]
    unsafe fn table(&self, frame: PhysicalPage<Size4K>) -> &PageTable {
        let va = self.phys_to_direct(frame.base());
        unsafe { &*va.as_ptr::<PageTable>() }
    }

    /// Mark every entry of the table in `frame` non-present.
    ///
    /// # Safety
    /// As for [`table`](Self::table); no live tree may link to `frame`.
    #[inline]
    unsafe fn zero_table(&self, frame: PhysicalPage<Size4K>) {
        unsafe { self.table(frame) }.zero();
    }
}

impl<T: FrameAlloc + ?Sized> FrameAlloc for &T {
    #[inline]
    fn alloc_frames(&self, rank: u8) -> Option<PhysicalAddress> {
        (**self).alloc_frames(rank)
    }

    #[inline]
    unsafe fn free_frames(&self, base: PhysicalAddress, rank: u8) {
        unsafe { (**self).free_frames(base, rank) }
    }
}

impl<T: PhysMapper + ?Sized> PhysMapper for &T {
    #[inline]
    fn phys_to_direct(&self, pa: PhysicalAddress) -> VirtualAddress {
        (**self).phys_to_direct(pa)
    }

    #[inline]
    fn direct_to_phys(&self, va: VirtualAddress) -> PhysicalAddress {
        (**self).direct_to_phys(va)
    }
}
