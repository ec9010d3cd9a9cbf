//! Error types shared across the emulator

use thiserror::Error;

/// Top-level emulator error
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration could not be loaded or is inconsistent
    #[error("configuration error: {0}")]
    Config(String),

    /// No usable compiler backend exists for the host architecture
    #[error("no compiler backend available for this host")]
    NoBackend,

    /// The emulation session is in the wrong state for the request
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience result alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
