//! Bounded-concurrency block dispatch
//!
//! Runs one retry-controlled fetch per block with at most `concurrency` blocks
//! in flight. Results land in a slot per block so the returned order never
//! depends on completion order. The first terminal failure raises the
//! retrieval-wide abort signal, stops scheduling and drops in-flight blocks.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::retrieval::blocker::Block;
use crate::retrieval::config::MAX_CONCURRENCY;
use crate::retrieval::retry::{BlockOutcome, RetryController};
use crate::retrieval::RetrievalError;
use crate::shutdown::ShutdownCoordinator;
use crate::{DatasetCategory, Observation};

/// Worker pool over blocks
pub struct Dispatcher {
    controller: Arc<RetryController>,
    concurrency: usize,
}

impl Dispatcher {
    /// Create a dispatcher
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Configuration`] unless `1 <= concurrency <= MAX_CONCURRENCY`.
    pub fn new(
        controller: Arc<RetryController>,
        concurrency: usize,
    ) -> Result<Self, RetrievalError> {
        validate_concurrency(concurrency)?;
        Ok(Self {
            controller,
            concurrency,
        })
    }

    /// Blocks allowed in flight
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Fetch every block, returning outcomes ordered by block index
    ///
    /// `on_complete` runs once per finished block in completion order and may
    /// take the rows out of the outcome (e.g. after persisting them). An error
    /// from it aborts the run like a failed block does.
    pub async fn run<O, F>(
        &self,
        blocks: &[Block],
        category: DatasetCategory,
        catalog: Option<&str>,
        mut on_complete: F,
    ) -> Result<Vec<BlockOutcome<O>>, RetrievalError>
    where
        O: Observation,
        F: FnMut(&mut BlockOutcome<O>) -> Result<(), RetrievalError>,
    {
        let abort = ShutdownCoordinator::new();
        let mut slots: Vec<Option<BlockOutcome<O>>> = (0..blocks.len()).map(|_| None).collect();

        debug!(
            blocks = blocks.len(),
            concurrency = self.concurrency,
            "Dispatching blocks"
        );

        let controller = self.controller.as_ref();
        let abort_ref = &abort;
        let mut in_flight = stream::iter(blocks.iter().enumerate())
            .map(|(slot, block)| async move {
                let result = controller
                    .fetch::<O>(block, category, catalog, abort_ref)
                    .await;
                (slot, result)
            })
            .buffer_unordered(self.concurrency);

        while let Some((slot, result)) = in_flight.next().await {
            let mut outcome = match result {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(block_index = slot, error = %err, "Block failed, aborting retrieval");
                    abort.request_shutdown();
                    return Err(err);
                }
            };

            if let Err(err) = on_complete(&mut outcome) {
                abort.request_shutdown();
                return Err(err);
            }

            slots[slot] = Some(outcome);
        }

        // Every block yields exactly one item, so every slot is filled here
        Ok(slots.into_iter().flatten().collect())
    }
}

/// Check a concurrency setting
pub fn validate_concurrency(concurrency: usize) -> Result<(), RetrievalError> {
    if concurrency == 0 || concurrency > MAX_CONCURRENCY {
        return Err(RetrievalError::Configuration(format!(
            "concurrency must be between 1 and {MAX_CONCURRENCY}, got {concurrency}"
        )));
    }
    Ok(())
}
