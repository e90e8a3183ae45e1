/// Error returned by [`AddressSpace::map`](crate::AddressSpace::map) and
/// [`AddressSpace::unmap`](crate::AddressSpace::unmap).
///
/// The tree keeps whatever was written before the failure; there is no
/// rollback.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    /// The frame supplier could not provide a table frame.
    #[error("out of memory while allocating a page table")]
    NoMemory,
}

/// Error returned by [`bootstrap_direct_map`](crate::bootstrap_direct_map).
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootstrapError {
    #[error("out of memory while allocating the {stage} table")]
    NoMemory { stage: &'static str },
}
