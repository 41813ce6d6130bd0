//! Light curve retrieval pipeline
//!
//! This module provides the execution engine that turns an identifier list into
//! an assembled [`Collection`](crate::collection::Collection) or a directory of
//! saved light curves.
//!
//! # Overview
//!
//! 1. **Blocking**: [`blocker::partition`] splits identifiers into bounded blocks
//! 2. **Routing**: [`shard::ShardResolver`] assigns each attempt of a block to a shard
//! 3. **Retrying**: [`retry::RetryController`] fails over across shards with escalating backoff
//! 4. **Dispatching**: [`dispatcher::Dispatcher`] runs blocks concurrently, restoring block order
//! 5. **Assembling**: [`assembler::assemble`] concatenates tables and classifies filters
//!
//! [`executor::RetrievalExecutor`] wires the stages together.
//!
//! # Error Handling
//!
//! - Transport failures are retried on other shards and only surface as
//!   [`RetrievalError::ServiceUnavailable`] once every cycle is exhausted
//! - "No data" answers are absorbed as empty tables
//! - Invalid settings fail with [`RetrievalError::Configuration`] before any request

pub mod assembler;
pub mod blocker;
pub mod config;
pub mod dispatcher;
pub mod executor;
pub mod job;
pub mod progress;
pub mod retry;
pub mod shard;

pub use assembler::assemble;
pub use blocker::{partition, Block};
pub use dispatcher::Dispatcher;
pub use executor::{RetrievalExecutor, RetrievalOutput};
pub use job::{JobProgress, JobStatus, RetrievalJob};
pub use retry::{BlockOutcome, BlockState, RetryController, RetryPolicy};
pub use shard::{ShardCursor, ShardResolver};

use crate::fetcher::BackendConfigError;
use crate::output::OutputError;

/// Message surfaced when every shard keeps failing
pub const SERVICE_UNAVAILABLE_MESSAGE: &str = "Lightcurve servers unavailable, try again later";

/// Retrieval errors
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// A block exhausted every shard for every cycle
    #[error("Lightcurve servers unavailable, try again later (block {block_index} failed after {attempts} attempts: {last_error})")]
    ServiceUnavailable {
        /// Block that failed
        block_index: usize,
        /// Attempts made for that block
        attempts: usize,
        /// Last transport error observed
        last_error: String,
    },

    /// Invalid settings, detected before any network activity
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Retrieval cancelled by the caller
    #[error("retrieval cancelled")]
    Cancelled,

    /// Persisting results failed
    #[error("output error: {0}")]
    Output(#[from] OutputError),
}

impl From<BackendConfigError> for RetrievalError {
    fn from(err: BackendConfigError) -> Self {
        RetrievalError::Configuration(err.to_string())
    }
}
