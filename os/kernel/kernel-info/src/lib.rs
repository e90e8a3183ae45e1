//! # Kernel Memory Layout
//!
//! Compile-time constants that fix where the shared kernel regions live in
//! every address space. The paging code consumes them to place the direct map
//! and to know which top-level slots are shared between roots.
//!
//! ```text
//! Virtual Address Space Layout (4-level paging):
//!
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │           User Space            │
//! 0x0000_7fff_ffff_ffff ├─────────────────────────────────┤
//!                       │     Non-canonical hole          │
//! 0xffff_8000_0000_0000 ├─────────────────────────────────┤
//!                       │           (unused)              │
//! DIRECT_MAP_BASE       ├─────────────────────────────────┤ 0xffff_8880_0000_0000
//!                       │   Direct map, 256 GiB, 1G pages │
//! KERNEL_HEAP_BASE      ├─────────────────────────────────┤ 0xffff_c900_0000_0000
//!                       │        Kernel heap window       │
//! KERNEL_BASE           ├─────────────────────────────────┤ 0xffff_ffff_8000_0000
//!                       │       Kernel text and data      │
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! Each of the three kernel regions occupies its own top-level (level-3) slot,
//! see [`memory::SHARED_ROOT_SLOTS`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
