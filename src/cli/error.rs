//! CLI error types and conversions

use crate::fetcher::{BackendConfigError, FetcherError};
use crate::identifier::IdentifierError;
use crate::output::OutputError;
use crate::retrieval::RetrievalError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Identifier error
    #[error("identifier error: {0}")]
    IdentifierError(#[from] IdentifierError),

    /// Retrieval error
    #[error("retrieval error: {0}")]
    RetrievalError(#[from] RetrievalError),

    /// Fetcher error
    #[error("fetcher error: {0}")]
    FetcherError(#[from] FetcherError),

    /// Output error
    #[error("output error: {0}")]
    OutputError(#[from] OutputError),

    /// Backend configuration error
    #[error("backend error: {0}")]
    BackendError(#[from] BackendConfigError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}
