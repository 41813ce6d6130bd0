//! Per-block retry state machine
//!
//! A block moves `Pending -> Attempting -> {Succeeded | Failed}`. Transport
//! failures send it back to `Attempting` on the next shard after a backoff;
//! "no data" answers succeed with an empty table; exhausting the cycle
//! ceiling fails it with [`RetrievalError::ServiceUnavailable`].

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::fetcher::retry_formatter::RetryContext;
use crate::fetcher::{
    fetch_table, BlockRequest, BlockSource, FetcherError, MeasurementTable, ShardEndpoint,
    TransportError,
};
use crate::metrics::{record_failover, record_retry_backoff, AttemptMetrics};
use crate::retrieval::blocker::Block;
use crate::retrieval::config::{
    calculate_backoff, DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_BACKOFF_UNIT, DEFAULT_MAX_CYCLES,
};
use crate::retrieval::shard::{ShardCursor, ShardResolver};
use crate::retrieval::RetrievalError;
use crate::shutdown::{SharedShutdown, ShutdownCoordinator};
use crate::{DatasetCategory, Observation};

/// Retry bounds and pacing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Full shard cycles before a block fails
    pub max_cycles: u32,
    /// Backoff unit; the sleep is `unit * (completed_cycles + 1)`
    pub backoff_unit: Duration,
    /// Time budget of one attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_cycles: DEFAULT_MAX_CYCLES,
            backoff_unit: DEFAULT_BACKOFF_UNIT,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Set the cycle ceiling
    pub fn with_max_cycles(mut self, max_cycles: u32) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    /// Set the backoff unit
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Set the per-attempt timeout
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Reject policies that could never make an attempt
    pub fn validate(&self) -> Result<(), RetrievalError> {
        if self.max_cycles == 0 {
            return Err(RetrievalError::Configuration(
                "max cycles must be at least 1".to_string(),
            ));
        }
        if self.attempt_timeout.is_zero() {
            return Err(RetrievalError::Configuration(
                "attempt timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of a block that reached `Succeeded`
#[derive(Debug, Clone, PartialEq)]
pub struct BlockOutcome<O> {
    /// Block position
    pub block_index: usize,
    /// Rows recovered (empty when the backend had no data)
    pub table: MeasurementTable<O>,
    /// Attempts made, including the successful one
    pub attempts: usize,
    /// Shard that answered
    pub shard: ShardEndpoint,
    /// Whether the backend reported "no data"
    pub not_found: bool,
}

/// Lifecycle of one block
#[derive(Debug)]
pub enum BlockState<O> {
    /// Not yet attempted
    Pending,
    /// Next attempt goes to the cursor's current shard
    Attempting,
    /// Terminal success
    Succeeded(BlockOutcome<O>),
    /// Terminal failure
    Failed(RetrievalError),
}

/// Fetches blocks with shard failover and escalating backoff
pub struct RetryController {
    source: Arc<dyn BlockSource>,
    resolver: Arc<ShardResolver>,
    policy: RetryPolicy,
    shutdown: Option<SharedShutdown>,
}

impl RetryController {
    /// Create a controller over a source and shard set
    pub fn new(
        source: Arc<dyn BlockSource>,
        resolver: Arc<ShardResolver>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            source,
            resolver,
            policy,
            shutdown: None,
        }
    }

    /// Attach a caller-owned shutdown handle
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Attempts a block may make before failing
    pub fn max_attempts(&self) -> usize {
        self.resolver.shard_count() * self.policy.max_cycles as usize
    }

    /// Drive one block to `Succeeded` or `Failed`
    ///
    /// `abort` is the retrieval-wide cancellation signal raised by the
    /// dispatcher when another block fails terminally.
    pub async fn fetch<O: Observation>(
        &self,
        block: &Block,
        category: DatasetCategory,
        catalog: Option<&str>,
        abort: &ShutdownCoordinator,
    ) -> Result<BlockOutcome<O>, RetrievalError> {
        let request = BlockRequest {
            block_index: block.index,
            category,
            catalog,
            ids: &block.ids,
        };
        let mut cursor = self.resolver.cursor(block.index);
        let mut state = BlockState::Pending;

        loop {
            state = match state {
                BlockState::Pending => {
                    debug!(
                        block_index = block.index,
                        ids = block.len(),
                        shard = %self.resolver.shard(cursor.current()),
                        "Block pending"
                    );
                    BlockState::Attempting
                }
                BlockState::Attempting => self.attempt(&request, &mut cursor, abort).await,
                BlockState::Succeeded(outcome) => return Ok(outcome),
                BlockState::Failed(err) => return Err(err),
            };
        }
    }

    async fn attempt<O: Observation>(
        &self,
        request: &BlockRequest<'_>,
        cursor: &mut ShardCursor,
        abort: &ShutdownCoordinator,
    ) -> BlockState<O> {
        if self.is_cancelled(abort) {
            return BlockState::Failed(RetrievalError::Cancelled);
        }

        let shard = self.resolver.shard(cursor.current());
        let attempt = cursor.failures() + 1;
        let metrics = AttemptMetrics::start(shard.to_string(), request.block_index, attempt);

        let fetch = tokio::time::timeout(
            self.policy.attempt_timeout,
            fetch_table::<O>(self.source.as_ref(), shard, request),
        );

        let result = tokio::select! {
            result = fetch => match result {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(self.policy.attempt_timeout).into()),
            },
            _ = self.cancelled(abort) => return BlockState::Failed(RetrievalError::Cancelled),
        };

        match result {
            Ok(table) => {
                metrics.record_success(table.rows.len());
                if attempt > 1 {
                    let context = self.context(request, attempt, shard, None, Duration::ZERO);
                    info!(block_index = request.block_index, "{}", context.format_success());
                }
                BlockState::Succeeded(BlockOutcome {
                    block_index: request.block_index,
                    table,
                    attempts: attempt,
                    shard: shard.clone(),
                    not_found: false,
                })
            }
            Err(FetcherError::NotFound(reason)) => {
                metrics.record_not_found();
                debug!(
                    block_index = request.block_index,
                    reason = %reason,
                    "Block yielded no data"
                );
                BlockState::Succeeded(BlockOutcome {
                    block_index: request.block_index,
                    table: MeasurementTable::empty(),
                    attempts: attempt,
                    shard: shard.clone(),
                    not_found: true,
                })
            }
            Err(FetcherError::Transport(err)) => {
                metrics.record_transport_error(&err.to_string());
                self.fail_over(request, cursor, shard, err, abort).await
            }
        }
    }

    async fn fail_over<O: Observation>(
        &self,
        request: &BlockRequest<'_>,
        cursor: &mut ShardCursor,
        failed_shard: &ShardEndpoint,
        err: TransportError,
        abort: &ShutdownCoordinator,
    ) -> BlockState<O> {
        let attempt = cursor.failures() + 1;
        let cycles_before = cursor.completed_cycles();
        cursor.advance();

        if cursor.completed_cycles() >= self.policy.max_cycles {
            let context = self.context(request, attempt, failed_shard, Some(&err), Duration::ZERO);
            error!(block_index = request.block_index, "{}", context.format_failure());
            return BlockState::Failed(RetrievalError::ServiceUnavailable {
                block_index: request.block_index,
                attempts: cursor.failures(),
                last_error: err.to_string(),
            });
        }

        let backoff = calculate_backoff(self.policy.backoff_unit, cycles_before);
        let next_shard = self.resolver.shard(cursor.current());
        let context = self.context(request, attempt, next_shard, Some(&err), backoff);
        warn!(
            block_index = request.block_index,
            shard = %failed_shard,
            attempt = attempt,
            backoff_ms = backoff.as_millis() as u64,
            "{}",
            context.format_retry()
        );

        record_failover(&failed_shard.to_string(), &next_shard.to_string());
        record_retry_backoff(backoff, cycles_before);

        tokio::select! {
            _ = tokio::time::sleep(backoff) => BlockState::Attempting,
            _ = self.cancelled(abort) => BlockState::Failed(RetrievalError::Cancelled),
        }
    }

    fn context(
        &self,
        request: &BlockRequest<'_>,
        attempt: usize,
        shard: &ShardEndpoint,
        err: Option<&TransportError>,
        backoff: Duration,
    ) -> RetryContext {
        let error_type = err
            .map(TransportError::error_type)
            .unwrap_or(crate::fetcher::retry_formatter::RetryErrorType::NetworkGeneric);
        RetryContext::new(
            attempt,
            self.max_attempts(),
            self.policy.max_cycles,
            error_type,
            backoff,
            request.block_index,
            request.ids.len(),
            shard.to_string(),
            err.map(|e| e.to_string()).unwrap_or_default(),
        )
    }

    fn is_cancelled(&self, abort: &ShutdownCoordinator) -> bool {
        abort.is_shutdown_requested()
            || self
                .shutdown
                .as_ref()
                .map(|s| s.is_shutdown_requested())
                .unwrap_or(false)
    }

    async fn cancelled(&self, abort: &ShutdownCoordinator) {
        match &self.shutdown {
            Some(shutdown) => {
                tokio::select! {
                    _ = abort.wait_for_shutdown() => {},
                    _ = shutdown.wait_for_shutdown() => {},
                }
            }
            None => abort.wait_for_shutdown().await,
        }
    }
}
