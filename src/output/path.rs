//! File layout of a saved collection
//!
//! ```text
//! {dir}/index.json          manifest: category, id column, index entries
//! {dir}/{stem}.csv          one light curve per target
//! ```
//!
//! `stem` is [`Identifier::file_stem`]: the numeric id for stellar targets, or
//! the filesystem-safe designation plus a digest for asteroids and comets, so
//! `C/2020 F3 (NEOWISE)` becomes `c_2020_f3_neowise_<digest>.csv`.

use super::{OutputError, OutputResult};
use crate::identifier::Identifier;
use std::path::{Path, PathBuf};

/// Name of the manifest file
pub const INDEX_FILE_NAME: &str = "index.json";

/// Extension of curve files
pub const CURVE_EXTENSION: &str = "csv";

/// Paths inside a collection directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionLayout {
    root: PathBuf,
}

impl CollectionLayout {
    /// Layout rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Collection directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the index manifest
    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE_NAME)
    }

    /// Path of a target's curve file
    pub fn curve_path(&self, id: &Identifier) -> PathBuf {
        self.root.join(format!("{}.{CURVE_EXTENSION}", id.file_stem()))
    }

    /// Create the directory if it does not exist
    ///
    /// # Errors
    ///
    /// Fails if the path exists but is not a directory, or cannot be created.
    pub fn ensure_directory(&self) -> OutputResult<()> {
        if self.root.exists() && !self.root.is_dir() {
            return Err(OutputError::InvalidLayout(format!(
                "{} exists and is not a directory",
                self.root.display()
            )));
        }
        std::fs::create_dir_all(&self.root)
            .map_err(|e| OutputError::IoError(format!("Failed to create directory: {}", e)))
    }
}
