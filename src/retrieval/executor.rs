//! Retrieval executor
//!
//! Wires blocker, shard resolver, retry controller, dispatcher and assembler
//! into one call. In save mode each block's rows are flushed to disk as soon
//! as the block finishes, so memory stays bounded by the blocks in flight.

use indicatif::ProgressBar;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, Instrument};

use crate::collection::Collection;
use crate::fetcher::{BackendConfig, BlockSource};
use crate::metrics::RetrievalMetrics;
use crate::output::CollectionWriter;
use crate::retrieval::assembler::assemble;
use crate::retrieval::blocker::{partition, Block};
use crate::retrieval::config::{DEFAULT_BLOCK_SIZE, DEFAULT_CONCURRENCY};
use crate::retrieval::dispatcher::{validate_concurrency, Dispatcher};
use crate::retrieval::job::{JobStatus, RetrievalJob};
use crate::retrieval::progress::ProgressTracker;
use crate::retrieval::retry::{BlockOutcome, RetryController, RetryPolicy};
use crate::retrieval::shard::ShardResolver;
use crate::retrieval::RetrievalError;
use crate::shutdown::SharedShutdown;
use crate::Observation;

/// Result of a retrieval
#[derive(Debug)]
pub enum RetrievalOutput<O> {
    /// Assembled in-memory collection
    Collection(Collection<O>),
    /// Files written in save mode: the index manifest first, then one file per
    /// target that had data, in index order
    Files(Vec<PathBuf>),
}

impl<O> RetrievalOutput<O> {
    /// The collection, if the retrieval was not in save mode
    pub fn into_collection(self) -> Option<Collection<O>> {
        match self {
            RetrievalOutput::Collection(collection) => Some(collection),
            RetrievalOutput::Files(_) => None,
        }
    }
}

/// Retrieval executor orchestrates the complete retrieval workflow
pub struct RetrievalExecutor {
    source: Arc<dyn BlockSource>,
    backend: BackendConfig,
    concurrency: usize,
    block_size: usize,
    policy: RetryPolicy,
    progress_tracker: ProgressTracker,
    progress_bar: Option<ProgressBar>,
    shutdown: Option<SharedShutdown>,
}

impl RetrievalExecutor {
    /// Create an executor over a block source and the backend it talks to
    pub fn new(source: Arc<dyn BlockSource>, backend: BackendConfig) -> Self {
        Self {
            source,
            backend,
            concurrency: DEFAULT_CONCURRENCY,
            block_size: DEFAULT_BLOCK_SIZE,
            policy: RetryPolicy::default(),
            progress_tracker: ProgressTracker::default(),
            progress_bar: None,
            shutdown: None,
        }
    }

    /// Set the number of blocks fetched in parallel
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the maximum identifiers per block
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Override the retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Attach a shared shutdown handle for graceful cancellation.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Override progress tracking configuration.
    pub fn with_progress_tracker(mut self, tracker: ProgressTracker) -> Self {
        self.progress_tracker = tracker;
        self
    }

    /// Advance a progress bar by one per finished block
    pub fn with_progress_bar(mut self, bar: ProgressBar) -> Self {
        self.progress_bar = Some(bar);
        self
    }

    /// Backend configuration
    pub fn backend(&self) -> &BackendConfig {
        &self.backend
    }

    /// Run a retrieval to completion
    ///
    /// # Errors
    ///
    /// - [`RetrievalError::Configuration`] for invalid settings, before any request is sent
    /// - [`RetrievalError::ServiceUnavailable`] when a block exhausts every shard
    /// - [`RetrievalError::Cancelled`] when the shutdown handle fires
    /// - [`RetrievalError::Output`] when saving fails
    pub async fn retrieve<O: Observation>(
        &self,
        job: RetrievalJob,
    ) -> Result<RetrievalOutput<O>, RetrievalError> {
        let span = info_span!(
            "retrieval",
            category = %job.category,
            ids = job.ids.len(),
            save = job.save_dir.is_some()
        );
        self.run_job(job).instrument(span).await
    }

    async fn run_job<O: Observation>(
        &self,
        mut job: RetrievalJob,
    ) -> Result<RetrievalOutput<O>, RetrievalError> {
        let blocks = self.prepare::<O>(&job)?;
        let resolver = Arc::new(ShardResolver::for_category(&self.backend, job.category)?);

        info!(
            ids = job.ids.len(),
            blocks = blocks.len(),
            shards = resolver.shard_count(),
            concurrency = self.concurrency,
            "Starting retrieval"
        );

        job.status = JobStatus::InProgress;
        job.progress.total_blocks = blocks.len();
        let metrics = RetrievalMetrics::start(job.category.as_str(), job.ids.len(), blocks.len());

        let mut writer = match &job.save_dir {
            Some(dir) => {
                let writer = CollectionWriter::new(dir)?;
                writer.write_index(job.category, &job.index)?;
                Some(writer)
            }
            None => None,
        };

        let mut controller = RetryController::new(Arc::clone(&self.source), resolver, self.policy);
        if let Some(shutdown) = &self.shutdown {
            controller = controller.with_shutdown(Arc::clone(shutdown));
        }
        let dispatcher = Dispatcher::new(Arc::new(controller), self.concurrency)?;

        let mut progress = self
            .progress_tracker
            .create_state(job.index.len() as u64, blocks.len());
        let max_cycles = self.policy.max_cycles;

        let result = {
            let job_progress = &mut job.progress;
            let index = job.index.lookup();
            let mut writer = writer.as_mut();
            let bar = self.progress_bar.as_ref();

            let on_complete = |outcome: &mut BlockOutcome<O>| -> Result<(), RetrievalError> {
                let targets = outcome.table.distinct_ids as u64;
                let rows = outcome.table.rows.len() as u64;

                job_progress.completed_blocks += 1;
                job_progress.targets_fetched += targets;
                job_progress.rows_fetched += rows;
                job_progress.attempts += outcome.attempts as u64;
                job_progress.retries += outcome.attempts.saturating_sub(1) as u64;
                if outcome.not_found {
                    job_progress.empty_blocks += 1;
                }

                progress.record_block(targets);
                if progress.should_emit_update() {
                    info!("{}", progress.format_progress());
                    progress.mark_emitted();
                }
                if let Some(bar) = bar {
                    bar.inc(1);
                }

                if let Some(writer) = writer.as_deref_mut() {
                    let rows = std::mem::take(&mut outcome.table.rows);
                    let known = rows.iter().filter(|row| index.contains(&row.target_id()));
                    writer.write_rows(&index, known)?;
                }

                debug!(
                    block_index = outcome.block_index,
                    shard = %outcome.shard,
                    attempts = outcome.attempts,
                    max_cycles = max_cycles,
                    rows = rows,
                    "Block complete"
                );
                Ok(())
            };

            dispatcher
                .run::<O, _>(&blocks, job.category, job.catalog.as_deref(), on_complete)
                .await
        };

        let outcomes = match result {
            Ok(outcomes) => outcomes,
            Err(err) => {
                job.status = match err {
                    RetrievalError::Cancelled => JobStatus::Cancelled,
                    _ => JobStatus::Failed,
                };
                job.progress.error = Some(err.to_string());
                metrics.record_failure(&err.to_string());
                if let Some(bar) = &self.progress_bar {
                    bar.abandon_with_message("failed");
                }
                error!(
                    status = ?job.status,
                    completed_blocks = job.progress.completed_blocks,
                    total_blocks = job.progress.total_blocks,
                    error = %err,
                    "Retrieval failed"
                );
                return Err(err);
            }
        };

        job.status = JobStatus::Completed;
        metrics.record_success(
            job.progress.rows_fetched as usize,
            job.progress.targets_fetched,
        );
        if let Some(bar) = &self.progress_bar {
            bar.finish_with_message("done");
        }

        info!(
            blocks = job.progress.total_blocks,
            empty_blocks = job.progress.empty_blocks,
            targets = job.progress.targets_fetched,
            rows = job.progress.rows_fetched,
            retries = job.progress.retries,
            "Retrieval complete"
        );

        match writer {
            Some(writer) => {
                let mut files = vec![writer.layout().index_path()];
                files.extend(writer.written_paths(&job.index));
                Ok(RetrievalOutput::Files(files))
            }
            None => {
                let tables = outcomes.into_iter().map(|outcome| outcome.table);
                Ok(RetrievalOutput::Collection(assemble(tables, job.index, job.category)))
            }
        }
    }

    /// Check every setting and partition the identifiers
    fn prepare<O: Observation>(&self, job: &RetrievalJob) -> Result<Vec<Block>, RetrievalError> {
        validate_concurrency(self.concurrency)?;
        self.policy.validate()?;
        if !O::supports(job.category) {
            return Err(RetrievalError::Configuration(format!(
                "row type does not match category {}",
                job.category
            )));
        }
        job.validate().map_err(RetrievalError::Configuration)?;
        partition(&job.ids, self.block_size)
    }
}
