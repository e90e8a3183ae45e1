//! # Kernel synchronization primitives
//!
//! The paging code needs exactly one kind of lock: a short-held, non-sleeping
//! spin lock that serializes structural page-table mutation and keeps frame
//! suppliers internally synchronized.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
