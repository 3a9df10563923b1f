//! Kernel result codes

use thiserror::Error;

/// Flat kernel error taxonomy. Success is `Ok(())`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RtosError {
    #[error("operation failed")]
    Generic,

    /// Reserved; nothing in the kernel times out.
    #[error("operation timed out")]
    Timeout,

    #[error("out of memory")]
    NoMemory,

    #[error("invalid parameter")]
    InvalidParameter,
}

pub type Result<T> = core::result::Result<T, RtosError>;
