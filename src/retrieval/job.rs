//! Retrieval job structures and status tracking

use crate::collection::IndexTable;
use crate::identifier::Identifier;
use crate::DatasetCategory;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Retrieval job specification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalJob {
    /// Dataset category, fixed for the whole retrieval
    pub category: DatasetCategory,
    /// Catalog forwarded to the backend
    pub catalog: Option<String>,
    /// Identifiers to fetch, in order
    pub ids: Vec<Identifier>,
    /// Index table the results are correlated with
    pub index: IndexTable,
    /// Directory to save light curves into instead of returning them
    pub save_dir: Option<PathBuf>,
    /// Current job status
    #[serde(default)]
    pub status: JobStatus,
    /// Job progress tracking
    #[serde(default)]
    pub progress: JobProgress,
}

impl RetrievalJob {
    /// Create a job returning an in-memory collection
    pub fn new(category: DatasetCategory, ids: Vec<Identifier>, index: IndexTable) -> Self {
        Self {
            category,
            catalog: None,
            ids,
            index,
            save_dir: None,
            status: JobStatus::Pending,
            progress: JobProgress::default(),
        }
    }

    /// Job over the identifiers of an index table
    pub fn from_index(category: DatasetCategory, index: IndexTable) -> Self {
        let ids = index.ids().cloned().collect();
        Self::new(category, ids, index)
    }

    /// Forward a catalog name to the backend
    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    /// Save light curves to a directory instead of returning them
    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = Some(dir.into());
        self
    }

    /// Validate job parameters
    pub fn validate(&self) -> Result<(), String> {
        let expected = self.category.id_column();
        if self.index.id_column != expected {
            return Err(format!(
                "Index id column '{}' does not match category {} (expected '{}')",
                self.index.id_column, self.category, expected
            ));
        }

        if self.category.is_solar_system() {
            if let Some(id) = self.ids.iter().find(|id| id.is_numeric()) {
                return Err(format!(
                    "{} are keyed by designation, got numeric id {id}; pass it as a name",
                    self.category
                ));
            }
        } else if let Some(id) = self.ids.iter().find(|id| !id.is_numeric()) {
            return Err(format!("Stellar identifiers must be numeric, got '{id}'"));
        }

        if let Some(catalog) = &self.catalog {
            if catalog.trim().is_empty() {
                return Err("Catalog cannot be empty".to_string());
            }
        }

        Ok(())
    }
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum JobStatus {
    /// Job has not started yet
    #[default]
    Pending,
    /// Job is currently running
    InProgress,
    /// Job completed successfully
    Completed,
    /// Job failed with error
    Failed,
    /// Job was cancelled
    Cancelled,
}

/// Job progress tracking
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobProgress {
    /// Blocks in the retrieval
    pub total_blocks: usize,
    /// Blocks finished
    pub completed_blocks: usize,
    /// Blocks for which the backend had no data
    pub empty_blocks: usize,
    /// Distinct targets recovered (summed per block)
    pub targets_fetched: u64,
    /// Rows recovered
    pub rows_fetched: u64,
    /// Fetch attempts across all blocks
    pub attempts: u64,
    /// Attempts beyond the first per block
    pub retries: u64,
    /// Error message if job failed
    pub error: Option<String>,
}

impl JobProgress {
    /// Completion percentage (0.0 to 100.0)
    pub fn percentage(&self) -> f64 {
        if self.total_blocks == 0 {
            100.0
        } else {
            (self.completed_blocks as f64 / self.total_blocks as f64) * 100.0
        }
    }

    /// Check if every block finished
    pub fn is_complete(&self) -> bool {
        self.completed_blocks >= self.total_blocks
    }
}
