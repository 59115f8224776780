//! Error types for the ttlcached engine.
//!
//! All errors are variants of [`CacheError`]. Error codes exist so logs
//! and tests can match on a stable string instead of a `Display` message.

use thiserror::Error;

/// Result type alias for ttlcached operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Error, Debug)]
pub enum CacheError {
    /// SYS-001: `shm_open`/`ftruncate`/`mmap` failed.
    #[error("SYS-001 ShmFailure: {reason}")]
    ShmFailure { reason: String },

    /// SYS-002: a named semaphore operation (`sem_open`/`sem_wait`/`sem_post`) failed.
    #[error("SYS-002 SemFailure: {reason}")]
    SemFailure { reason: String },

    /// SYS-003: binding or configuring the listening TCP socket failed.
    #[error("SYS-003 BindError: cannot bind to {addr}: {reason}")]
    BindError { addr: String, reason: String },

    /// SYS-004: descriptor hand-off over the control channel failed or was malformed.
    #[error("SYS-004 DescriptorTransfer: {reason}")]
    DescriptorTransfer { reason: String },

    /// SYS-005: `fork` itself failed.
    #[error("SYS-005 ForkFailure: {reason}")]
    ForkFailure { reason: String },

    /// CFG-001: invalid configuration (propagated from `ttlcached-config`).
    #[error("CFG-001 Config: {0}")]
    Config(#[from] ttlcached_config::ConfigError),

    /// IO-001: a plain I/O error not covered by a more specific variant above.
    #[error("IO-001 Io: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// Returns the stable error code string (e.g. `"SYS-001"`).
    pub fn code(&self) -> &'static str {
        match self {
            CacheError::ShmFailure { .. } => "SYS-001",
            CacheError::SemFailure { .. } => "SYS-002",
            CacheError::BindError { .. } => "SYS-003",
            CacheError::DescriptorTransfer { .. } => "SYS-004",
            CacheError::ForkFailure { .. } => "SYS-005",
            CacheError::Config(_) => "CFG-001",
            CacheError::Io(_) => "IO-001",
        }
    }
}
