//! Retry message formatting for block failover.
//!
//! Keeps the retry, recovery and terminal-failure log lines consistent across
//! the retry controller and the CLI. The controller fills a [`RetryContext`]
//! per attempt and logs whichever message applies.

use std::time::Duration;

/// Classification of transport errors for user messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Attempt exceeded its time budget
    NetworkTimeout,
    /// Connection refused, DNS failure, or other offline scenarios
    NetworkOffline,
    /// HTTP 429
    RateLimit,
    /// HTTP 5xx server error
    ServerError(u16),
    /// Authentication failures (401/403)
    AuthFailed(u16),
    /// Other client errors (4xx)
    ClientError(u16),
    /// Body could not be decoded into measurement rows
    MalformedPayload,
    /// Generic fallback when no better classification fits
    NetworkGeneric,
}

impl RetryErrorType {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::AuthFailed(status),
            429 => Self::RateLimit,
            500..=599 => Self::ServerError(status),
            400..=499 => Self::ClientError(status),
            _ => Self::NetworkGeneric,
        }
    }

    /// User-friendly description string used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::RateLimit => "too many requests",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::AuthFailed(code) => match code {
                401 => "authentication failed (401)",
                403 => "authentication failed (403)",
                _ => "authentication failed",
            },
            Self::ClientError(_) => "client error",
            Self::MalformedPayload => "malformed payload",
            Self::NetworkGeneric => "network error",
        }
    }

    /// Suggested remediation presented with actionable guidance after failures.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Try a longer --attempt-timeout or a smaller --block-size",
            Self::NetworkOffline => "Verify connectivity to the block servers and DNS resolution",
            Self::RateLimit => "Reduce --concurrency",
            Self::ServerError(_) => "Light curve servers may be under maintenance, try again later",
            Self::AuthFailed(_) => "Verify SKYPATROL_USER and SKYPATROL_PASSWORD",
            Self::ClientError(_) => "Check the dataset category and catalog arguments",
            Self::MalformedPayload => "Check that the category matches the identifiers requested",
            Self::NetworkGeneric => "Check network connectivity and try again",
        }
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempt that just failed or succeeded (1-based)
    pub attempt: usize,
    /// Attempt ceiling (shards times cycles)
    pub max_attempts: usize,
    /// Completed cycles ceiling
    pub max_cycles: u32,
    /// Type of error that triggered retry
    pub error_type: RetryErrorType,
    /// Backoff duration until next attempt
    pub backoff_duration: Duration,
    /// Block being fetched
    pub block_index: usize,
    /// Identifiers in the block
    pub block_len: usize,
    /// Shard of the attempt
    pub shard: String,
    /// Original error message for details
    pub error_message: String,
}

impl RetryContext {
    /// Convenience constructor used throughout the retry logic.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        attempt: usize,
        max_attempts: usize,
        max_cycles: u32,
        error_type: RetryErrorType,
        backoff_duration: Duration,
        block_index: usize,
        block_len: usize,
        shard: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            max_cycles,
            error_type,
            backoff_duration,
            block_index,
            block_len,
            shard: shard.into(),
            error_message: error_message.into(),
        }
    }

    /// Format standardized retry message with attempt counters and context.
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying block {} (attempt {}/{}) after {} on {} - waiting {:.1} seconds...",
            self.block_index,
            self.attempt,
            self.max_attempts,
            self.error_type.description(),
            self.shard,
            self.backoff_duration.as_secs_f64()
        )
    }

    /// Format recovery message when a failed-over attempt eventually works.
    pub fn format_success(&self) -> String {
        format!(
            "Block {} succeeded on attempt {}/{} via {} - resuming retrieval",
            self.block_index, self.attempt, self.max_attempts, self.shard
        )
    }

    /// Format final failure summary with actionable suggestions.
    pub fn format_failure(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!(
            "[FAILED] Light curve servers unavailable after {} attempts",
            self.attempt
        ));
        lines.push(format!("  Last error: {}", self.error_message));
        lines.push(format!(
            "  Block: {} ({} identifiers)",
            self.block_index, self.block_len
        ));
        lines.push(format!("  Last shard: {}", self.shard));
        lines.push("  Suggestions:".to_string());

        for suggestion in self.format_suggestions() {
            lines.push(format!("    - {suggestion}"));
        }

        lines.join("\n")
    }

    /// Derive suggestions tailored to the current retry context.
    pub fn format_suggestions(&self) -> Vec<String> {
        vec![
            self.error_type.suggestion().to_string(),
            format!(
                "Try increasing --max-cycles (current: {})",
                self.max_cycles
            ),
            "Try again later".to_string(),
        ]
    }
}
