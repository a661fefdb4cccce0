use thiserror::Error;

/// Failure classes shared by every crate in the workspace.
///
/// Schema drift on legacy tables is deliberately absent: it is logged and
/// never surfaces as an error value.
#[derive(Debug, Error)]
pub enum Error {
    /// Model or storage not ready. Fatal for the current operation; callers retry.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// A single embedding or inference could not be produced.
    #[error("Computation failed: {0}")]
    Computation(String),

    /// Query, add or delete against the storage engine failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Destructive operation refused before touching any row.
    #[error("Refusing destructive operation: {0}")]
    IntegrityGuard(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn storage(e: impl std::fmt::Display) -> Self { Self::Storage(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, Error>;
