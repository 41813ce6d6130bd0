//! Progress tracking for long-running retrievals.
//!
//! The dispatcher reports every finished block; this module accumulates the
//! number of targets recovered against the index length, estimates the
//! remaining time, and formats the `[PROGRESS]` lines logged by the executor.

use std::time::{Duration, Instant};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const MIN_RETRIEVAL_DURATION: Duration = Duration::from_secs(30);

/// Lightweight builder that controls update cadence.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    update_interval: Duration,
    min_percentage_step: f64,
}

impl ProgressTracker {
    /// Create a tracker with custom interval and percentage step.
    pub fn new(update_interval: Duration, min_percentage_step: f64) -> Self {
        Self {
            update_interval,
            min_percentage_step,
        }
    }

    /// Build a [`ProgressState`] configured with the tracker defaults.
    pub fn create_state(&self, total_targets: u64, total_blocks: usize) -> ProgressState {
        let mut state = ProgressState::new(total_targets, total_blocks);
        state.update_interval = self.update_interval;
        state.min_percentage_step = self.min_percentage_step;
        state
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(DEFAULT_UPDATE_INTERVAL, 10.0)
    }
}

/// Progress state of one retrieval.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Distinct targets recovered so far (summed per block).
    pub targets_fetched: u64,
    /// Index table length.
    pub total_targets: u64,
    /// Blocks finished.
    pub blocks_completed: usize,
    /// Blocks in the retrieval.
    pub total_blocks: usize,
    /// Timestamp when the retrieval started.
    pub start_time: Instant,
    /// Last time progress was reported.
    pub last_update: Instant,
    /// Minimum interval between progress updates.
    pub update_interval: Duration,
    /// Current rate (targets per second).
    pub current_rate: f64,
    /// Last reported completion percentage (0-100).
    pub last_reported_percentage: f64,
    /// Minimum percentage delta required to emit a new update.
    pub min_percentage_step: f64,
}

impl ProgressState {
    /// Create a new progress state with default intervals.
    pub fn new(total_targets: u64, total_blocks: usize) -> Self {
        let now = Instant::now();
        Self {
            targets_fetched: 0,
            total_targets,
            blocks_completed: 0,
            total_blocks,
            start_time: now,
            last_update: now,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            current_rate: 0.0,
            last_reported_percentage: 0.0,
            min_percentage_step: 10.0,
        }
    }

    /// Record one finished block.
    pub fn record_block(&mut self, targets: u64) {
        self.blocks_completed = self.blocks_completed.saturating_add(1);
        self.targets_fetched = self.targets_fetched.saturating_add(targets);
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.current_rate = self.targets_fetched as f64 / elapsed;
        }
    }

    /// Whether a progress update should be emitted based on time or percentage.
    pub fn should_emit_update(&self) -> bool {
        if self.blocks_completed == 0 {
            return false;
        }

        if self.blocks_completed == self.total_blocks {
            return true;
        }

        if self.percentage() - self.last_reported_percentage >= self.min_percentage_step {
            return true;
        }

        self.start_time.elapsed() >= MIN_RETRIEVAL_DURATION
            && self.last_update.elapsed() >= self.update_interval
    }

    /// Call after emitting a progress log to reset timers and cached percentage.
    pub fn mark_emitted(&mut self) {
        self.last_update = Instant::now();
        self.last_reported_percentage = self.percentage();
    }

    /// Completion percentage (0-100) by blocks finished.
    ///
    /// Targets without data never show up in the fetched count, so blocks are
    /// the reliable measure of completion.
    pub fn percentage(&self) -> f64 {
        if self.total_blocks == 0 {
            return 100.0;
        }
        (self.blocks_completed as f64 / self.total_blocks as f64) * 100.0
    }

    /// Estimate remaining time from the block completion rate.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        if self.blocks_completed == 0 || self.blocks_completed >= self.total_blocks {
            return None;
        }
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let per_block = elapsed / self.blocks_completed as f64;
        let remaining = (self.total_blocks - self.blocks_completed) as f64 * per_block;
        Some(Duration::from_secs_f64(remaining))
    }

    /// Human-readable progress string for logging.
    pub fn format_progress(&self) -> String {
        let mut parts = vec![
            format!(
                "[PROGRESS] Pulled {} of {} targets",
                self.targets_fetched, self.total_targets
            ),
            format!("- {:.1}% complete", self.percentage()),
            format!("(block {}/{})", self.blocks_completed, self.total_blocks),
        ];

        if self.current_rate > 0.0 {
            parts.push(format!("at {:.0} targets/sec", self.current_rate));
        }

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
