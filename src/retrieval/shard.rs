//! Shard selection and failover ordering
//!
//! Blocks are spread round-robin over the shards by block index. A failed
//! attempt moves the block to the next shard; wrapping back to the shard it
//! started on completes one cycle, which the retry controller uses to
//! escalate backoff and bound the total number of attempts.

use crate::fetcher::{BackendConfig, ShardEndpoint};
use crate::retrieval::RetrievalError;
use crate::DatasetCategory;

/// Maps blocks and attempts to shard endpoints
#[derive(Debug, Clone)]
pub struct ShardResolver {
    shards: Vec<ShardEndpoint>,
}

impl ShardResolver {
    /// Resolver over an explicit shard list
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Configuration`] if `shards` is empty.
    pub fn new(shards: Vec<ShardEndpoint>) -> Result<Self, RetrievalError> {
        if shards.is_empty() {
            return Err(RetrievalError::Configuration(
                "shard set is empty".to_string(),
            ));
        }
        Ok(Self { shards })
    }

    /// Resolver over the shards serving `category`
    pub fn for_category(
        config: &BackendConfig,
        category: DatasetCategory,
    ) -> Result<Self, RetrievalError> {
        let shards = config.shards_for(category)?;
        Self::new(shards.to_vec())
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard position a block starts on
    pub fn initial_index(&self, block_index: usize) -> usize {
        block_index % self.shards.len()
    }

    /// Shard serving the given 0-based attempt of a block
    pub fn next(&self, block_index: usize, attempt: usize) -> &ShardEndpoint {
        let position = (self.initial_index(block_index) + attempt % self.shards.len())
            % self.shards.len();
        &self.shards[position]
    }

    /// Shard at a position
    pub fn shard(&self, position: usize) -> &ShardEndpoint {
        &self.shards[position % self.shards.len()]
    }

    /// Fresh failover cursor for a block
    pub fn cursor(&self, block_index: usize) -> ShardCursor {
        let start = self.initial_index(block_index);
        ShardCursor {
            start,
            current: start,
            shard_count: self.shards.len(),
            completed_cycles: 0,
            failures: 0,
        }
    }
}

/// Per-block failover state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardCursor {
    start: usize,
    current: usize,
    shard_count: usize,
    completed_cycles: u32,
    failures: usize,
}

impl ShardCursor {
    /// Position of the shard for the next attempt
    pub fn current(&self) -> usize {
        self.current
    }

    /// Record a failed attempt and move to the next shard
    ///
    /// Returns `true` when the move wraps back to the starting shard, i.e. a
    /// full cycle has just completed.
    pub fn advance(&mut self) -> bool {
        self.failures += 1;
        self.current = (self.current + 1) % self.shard_count;
        if self.current == self.start {
            self.completed_cycles += 1;
            true
        } else {
            false
        }
    }

    /// Full passes over all shards so far
    pub fn completed_cycles(&self) -> u32 {
        self.completed_cycles
    }

    /// Failed attempts so far
    pub fn failures(&self) -> usize {
        self.failures
    }
}
