//! # Typed `X86_64` Paging Registers
//!
//! [`cr3::Cr3`] names the active root table; [`tlb`] invalidates cached
//! translations. The privileged instructions are only compiled with the `asm`
//! feature so the crate stays usable in host tests.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod cr3;
pub mod tlb;

/// Read a control register.
pub trait LoadRegisterUnsafe {
    /// # Safety
    /// Privileged: ring 0 only.
    unsafe fn load_unsafe() -> Self;
}

/// Write a control register.
pub trait StoreRegisterUnsafe {
    /// # Safety
    /// Privileged: ring 0 only. The new value must describe state the CPU can
    /// keep running on, e.g. a root table that maps the executing code.
    unsafe fn store_unsafe(self);
}
