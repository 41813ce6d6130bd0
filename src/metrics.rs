//! Observability metrics for light curve retrieval
//!
//! This module records shard health, failover behavior and retrieval outcomes.
//!
//! ## Architecture
//!
//! - Uses `metrics` crate for low-overhead metric collection
//! - Prometheus exporter for scraping endpoint (enabled with `--metrics-addr`)
//! - Recording is a no-op until an exporter is installed

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Initialize metrics system with Prometheus exporter
///
/// This should be called once at application startup, typically in main().
/// The function is idempotent and will not reinitialize if already called.
///
/// # Arguments
/// * `addr` - Socket address to bind Prometheus scrape endpoint (e.g., "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "block_attempts_total",
        Unit::Count,
        "Total number of block fetch attempts, labelled by shard and outcome"
    );

    describe_histogram!(
        "block_attempt_duration_seconds",
        Unit::Seconds,
        "Duration of a single block fetch attempt"
    );

    describe_counter!(
        "shard_failovers_total",
        Unit::Count,
        "Total number of times a block moved to another shard"
    );

    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of backoff sleeps between attempts"
    );

    describe_counter!(
        "blocks_completed_total",
        Unit::Count,
        "Total number of blocks fetched successfully"
    );

    describe_counter!(
        "blocks_empty_total",
        Unit::Count,
        "Total number of blocks for which the backend had no data"
    );

    describe_counter!(
        "retrievals_completed_total",
        Unit::Count,
        "Total number of retrievals completed"
    );

    describe_counter!(
        "retrievals_failed_total",
        Unit::Count,
        "Total number of failed retrievals"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Timing and outcome of one block fetch attempt
pub struct AttemptMetrics {
    shard: String,
    block_index: usize,
    attempt: usize,
    start_time: Instant,
}

impl AttemptMetrics {
    /// Start recording an attempt
    pub fn start(shard: impl Into<String>, block_index: usize, attempt: usize) -> Self {
        Self {
            shard: shard.into(),
            block_index,
            attempt,
            start_time: Instant::now(),
        }
    }

    fn record(&self, outcome: &'static str) -> Duration {
        let duration = self.start_time.elapsed();

        counter!(
            "block_attempts_total",
            "shard" => self.shard.clone(),
            "outcome" => outcome,
        )
        .increment(1);

        histogram!(
            "block_attempt_duration_seconds",
            "shard" => self.shard.clone(),
        )
        .record(duration.as_secs_f64());

        duration
    }

    /// Attempt returned rows
    pub fn record_success(&self, rows: usize) {
        let duration = self.record("success");
        counter!("blocks_completed_total").increment(1);

        debug!(
            block_index = self.block_index,
            shard = %self.shard,
            attempt = self.attempt,
            rows = rows,
            duration_ms = duration.as_millis(),
            "Block attempt succeeded"
        );
    }

    /// Backend reported no data
    pub fn record_not_found(&self) {
        let duration = self.record("not_found");
        counter!("blocks_completed_total").increment(1);
        counter!("blocks_empty_total").increment(1);

        debug!(
            block_index = self.block_index,
            shard = %self.shard,
            attempt = self.attempt,
            duration_ms = duration.as_millis(),
            "Block has no data"
        );
    }

    /// Attempt failed in transport
    pub fn record_transport_error(&self, error: &str) {
        let duration = self.record("transport_error");

        warn!(
            block_index = self.block_index,
            shard = %self.shard,
            attempt = self.attempt,
            duration_ms = duration.as_millis(),
            error = %error,
            "Block attempt failed"
        );
    }
}

/// Record a block moving to another shard
pub fn record_failover(from: &str, to: &str) {
    counter!(
        "shard_failovers_total",
        "from" => from.to_string(),
    )
    .increment(1);

    debug!(from = %from, to = %to, "Shard failover recorded");
}

/// Record retry backoff duration
pub fn record_retry_backoff(duration: Duration, completed_cycles: u32) {
    histogram!(
        "retry_backoff_duration_seconds",
        "cycle" => completed_cycles.to_string(),
    )
    .record(duration.as_secs_f64());

    debug!(
        completed_cycles = completed_cycles,
        backoff_ms = duration.as_millis(),
        "Retry backoff recorded"
    );
}

/// Retrieval job metrics
pub struct RetrievalMetrics {
    category: String,
    start_time: Instant,
}

impl RetrievalMetrics {
    /// Start tracking a retrieval
    pub fn start(category: impl Into<String>, id_count: usize, block_count: usize) -> Self {
        let category = category.into();

        info!(
            category = %category,
            id_count = id_count,
            block_count = block_count,
            "Retrieval started"
        );

        Self {
            category,
            start_time: Instant::now(),
        }
    }

    /// Record successful completion
    pub fn record_success(&self, rows: usize, ids_fetched: u64) {
        let duration = self.start_time.elapsed();

        counter!(
            "retrievals_completed_total",
            "category" => self.category.clone(),
        )
        .increment(1);

        info!(
            category = %self.category,
            rows = rows,
            ids_fetched = ids_fetched,
            duration_secs = duration.as_secs(),
            "Retrieval completed successfully"
        );
    }

    /// Record failed retrieval
    pub fn record_failure(&self, error: &str) {
        let duration = self.start_time.elapsed();

        counter!(
            "retrievals_failed_total",
            "category" => self.category.clone(),
        )
        .increment(1);

        error!(
            category = %self.category,
            error = %error,
            duration_secs = duration.as_secs(),
            "Retrieval failed"
        );
    }
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}
