//! Block sources: transport, payload decoding and backend configuration

use crate::identifier::Identifier;
use crate::{DatasetCategory, Observation};
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;

pub mod backend_config;
pub mod http;
pub mod retry_formatter;

pub use backend_config::{BackendConfig, BackendConfigError, Credentials, ShardEndpoint};
pub use http::{discover_shards, HttpBlockSource};

use retry_formatter::RetryErrorType;

/// Failures that warrant failover to another shard
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    /// Connection could not be established
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Attempt exceeded its time budget
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    /// Non-success HTTP status
    #[error("HTTP {status}: {body}")]
    Http {
        /// Status code
        status: u16,
        /// Response body (possibly truncated)
        body: String,
    },

    /// Payload could not be decoded into measurement rows
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Any other network failure
    #[error("network error: {0}")]
    Network(String),
}

impl TransportError {
    /// Classification used for retry messages
    pub fn error_type(&self) -> RetryErrorType {
        match self {
            TransportError::ConnectionFailed(_) => RetryErrorType::NetworkOffline,
            TransportError::Timeout(_) => RetryErrorType::NetworkTimeout,
            TransportError::Http { status, .. } => RetryErrorType::from_status(*status),
            TransportError::MalformedPayload(_) => RetryErrorType::MalformedPayload,
            TransportError::Network(_) => RetryErrorType::NetworkGeneric,
        }
    }
}

/// Fetcher errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetcherError {
    /// Shard unreachable or misbehaving; retried on another shard
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Backend explicitly reports no data for the request
    #[error("no data: {0}")]
    NotFound(String),
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// One block request as sent to a shard
#[derive(Debug, Clone, Copy)]
pub struct BlockRequest<'a> {
    /// Position of the block within the retrieval
    pub block_index: usize,
    /// Dataset category
    pub category: DatasetCategory,
    /// Optional catalog forwarded verbatim
    pub catalog: Option<&'a str>,
    /// Identifiers in the block
    pub ids: &'a [Identifier],
}

impl BlockRequest<'_> {
    /// JSON body of the `get_block` call
    pub fn to_body(&self) -> serde_json::Value {
        serde_json::json!({
            "block_idx": self.block_index,
            "category": self.category.as_str(),
            "catalog": self.catalog,
            "id_column": self.category.id_column(),
            "ids": self.ids,
            "format": "json",
        })
    }
}

/// Transport seam for block retrieval
///
/// Implementations perform exactly one round trip per call and return the raw
/// payload; decoding happens in [`decode_block`].
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Fetch one block from the given shard
    async fn fetch_block(
        &self,
        shard: &ShardEndpoint,
        request: &BlockRequest<'_>,
    ) -> FetcherResult<Vec<u8>>;

    /// Name used in logs
    fn name(&self) -> &str;
}

/// Typed rows recovered from one block
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementTable<O> {
    /// Rows in payload order
    pub rows: Vec<O>,
    /// Number of distinct identifiers among the rows
    pub distinct_ids: usize,
}

impl<O: Observation> MeasurementTable<O> {
    /// Table with no rows
    pub fn empty() -> Self {
        Self {
            rows: Vec::new(),
            distinct_ids: 0,
        }
    }

    /// Build from rows, counting distinct identifiers
    pub fn from_rows(rows: Vec<O>) -> Self {
        let distinct_ids = rows
            .iter()
            .map(|row| row.target_id())
            .collect::<HashSet<_>>()
            .len();
        Self { rows, distinct_ids }
    }

    /// Whether the table has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Decode a block payload into validated rows of the category's schema
pub fn decode_block<O: Observation>(
    payload: &[u8],
    category: DatasetCategory,
) -> FetcherResult<MeasurementTable<O>> {
    if !O::supports(category) {
        return Err(TransportError::MalformedPayload(format!(
            "row schema does not serve category {category}"
        ))
        .into());
    }

    let rows: Vec<O> = serde_json::from_slice(payload)
        .map_err(|e| TransportError::MalformedPayload(e.to_string()))?;

    for (i, row) in rows.iter().enumerate() {
        row.validate()
            .map_err(|e| TransportError::MalformedPayload(format!("row {i}: {e}")))?;
    }

    Ok(MeasurementTable::from_rows(rows))
}

/// One round trip plus decoding
pub async fn fetch_table<O: Observation>(
    source: &dyn BlockSource,
    shard: &ShardEndpoint,
    request: &BlockRequest<'_>,
) -> FetcherResult<MeasurementTable<O>> {
    let payload = source.fetch_block(shard, request).await?;
    decode_block(&payload, request.category)
}
