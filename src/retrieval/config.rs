//! Retrieval configuration constants

use std::time::Duration;

/// Identifiers per block.
/// Matches what a single block server can answer in one round trip.
pub const DEFAULT_BLOCK_SIZE: usize = 1_000;

/// Full passes over the shard list before a block is declared failed.
pub const DEFAULT_MAX_CYCLES: u32 = 5;

/// Base backoff between attempts; multiplied by the cycle number.
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// Upper bound on a single fetch attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Blocks in flight when the caller does not say otherwise.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Hard ceiling on blocks in flight.
pub const MAX_CONCURRENCY: usize = 32;

/// Backoff before the next attempt
///
/// One unit while the first cycle is in progress, one more unit for every
/// completed cycle.
pub fn calculate_backoff(unit: Duration, completed_cycles: u32) -> Duration {
    unit.saturating_mul(completed_cycles.saturating_add(1))
}
