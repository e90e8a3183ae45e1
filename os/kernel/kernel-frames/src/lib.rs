//! # Physical Frame Suppliers
//!
//! [`FrameAlloc`](kernel_paging::FrameAlloc) and
//! [`PhysMapper`](kernel_paging::PhysMapper) implementations for the two
//! phases of kernel memory management.
//!
//! ```text
//! ┌──────────────────────────────┐      ┌──────────────────────────────┐
//! │ Early boot                   │      │ Steady state                 │
//! │  BootstrapFrameAlloc (bump)  │ ───► │  BitmapFrameAlloc            │
//! │  IdentityMapper              │      │  DirectMapper                │
//! └──────────────────────────────┘      └──────────────────────────────┘
//! ```
//!
//! The bootstrap allocator hands out frames from the firmware memory map
//! until the direct map exists; it is then sealed and the bitmap allocator
//! takes over, with every frame the bootstrap phase used reserved.
//!
//! All allocators are internally synchronized with a
//! [`SpinLock`](kernel_sync::SpinLock) and may be shared between CPUs.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

mod bitmap;
mod bootstrap;
mod phys_mapper;

pub use crate::bitmap::BitmapFrameAlloc;
pub use crate::bootstrap::{BootstrapFrameAlloc, MemoryRegion};
pub use crate::phys_mapper::{DirectMapper, IdentityMapper};

/// Size of one physical frame.
pub const FRAME_SIZE: u64 = 4096;
