//! Light curve persistence
//!
//! A saved collection is a directory holding `index.json` plus one CSV file
//! per target. Each CSV file starts with a `# {json}` comment line carrying the
//! target's index entry.

use crate::collection::{IndexEntry, IndexLookup, IndexTable};
use crate::identifier::Identifier;
use crate::{DatasetCategory, Observation};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub mod csv;
pub mod path;

pub use self::csv::{read_curve_file, read_index, write_index, CsvCurveWriter};
pub use self::path::CollectionLayout;

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV read or write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Buffer flush error
    #[error("flush error: {0}")]
    FlushError(String),

    /// Directory or file does not look like a saved collection
    #[error("invalid collection layout: {0}")]
    InvalidLayout(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Generic output writer trait
pub trait OutputWriter {
    /// Flush any buffered data to disk
    fn flush(&mut self) -> OutputResult<()>;

    /// Close the writer and finalize output
    fn close(self) -> OutputResult<()>;
}

/// Trait for writing measurement rows
pub trait ObservationWriter<O: Observation>: OutputWriter {
    /// Write a single row
    fn write_observation(&mut self, observation: &O) -> OutputResult<()>;

    /// Write multiple rows at once
    fn write_observations<'a, I>(&mut self, observations: I) -> OutputResult<()>
    where
        I: IntoIterator<Item = &'a O>,
    {
        for observation in observations {
            self.write_observation(observation)?;
        }
        Ok(())
    }
}

/// Writes a collection directory incrementally
///
/// The first write for a target creates its file; later writes (the target
/// appeared in another block) append to it. Two targets never share a file: a
/// path already owned by another identifier is an error, not a truncation.
pub struct CollectionWriter {
    layout: CollectionLayout,
    written: HashMap<Identifier, PathBuf>,
    owners: HashMap<PathBuf, Identifier>,
}

impl CollectionWriter {
    /// Writer over `dir`, creating it if needed
    pub fn new(dir: &Path) -> OutputResult<Self> {
        let layout = CollectionLayout::new(dir);
        layout.ensure_directory()?;
        Ok(Self {
            layout,
            written: HashMap::new(),
            owners: HashMap::new(),
        })
    }

    /// Directory layout
    pub fn layout(&self) -> &CollectionLayout {
        &self.layout
    }

    /// Write the index manifest
    pub fn write_index(
        &self,
        category: DatasetCategory,
        index: &IndexTable,
    ) -> OutputResult<PathBuf> {
        let path = self.layout.index_path();
        write_index(&path, category, index)?;
        Ok(path)
    }

    /// Write rows grouped by target, returning the number of rows written
    ///
    /// # Errors
    ///
    /// Fails with [`OutputError::InvalidLayout`] if a target's file name is
    /// already taken by another target.
    pub fn write_rows<'a, O, I>(
        &mut self,
        index: &IndexLookup<'_>,
        rows: I,
    ) -> OutputResult<usize>
    where
        O: Observation,
        I: IntoIterator<Item = &'a O>,
    {
        let mut order: Vec<Identifier> = Vec::new();
        let mut grouped: HashMap<Identifier, Vec<&O>> = HashMap::new();
        for row in rows {
            let id = row.target_id();
            grouped
                .entry(id.clone())
                .or_insert_with(|| {
                    order.push(id);
                    Vec::new()
                })
                .push(row);
        }

        let mut total = 0;
        for id in order {
            let rows = grouped.remove(&id).unwrap_or_default();
            let mut writer = match self.written.get(&id) {
                Some(path) => CsvCurveWriter::<O>::append(path)?,
                None => {
                    let path = self.claim(&id)?;
                    let meta = index
                        .get(&id)
                        .cloned()
                        .unwrap_or_else(|| IndexEntry::new(id.clone()));
                    CsvCurveWriter::<O>::create(&path, &meta)?
                }
            };
            writer.write_observations(rows)?;
            total += writer.rows_written() as usize;
            writer.close()?;
        }

        debug!(rows = total, files = self.written.len(), "Rows persisted");
        Ok(total)
    }

    /// Reserve the curve path of a target that has no file yet
    fn claim(&mut self, id: &Identifier) -> OutputResult<PathBuf> {
        let path = self.layout.curve_path(id);
        if let Some(owner) = self.owners.get(&path) {
            return Err(OutputError::InvalidLayout(format!(
                "targets '{owner}' and '{id}' map to the same file {}",
                path.display()
            )));
        }
        self.owners.insert(path.clone(), id.clone());
        self.written.insert(id.clone(), path.clone());
        Ok(path)
    }

    /// Curve files written so far, in index order
    pub fn written_paths(&self, index: &IndexTable) -> Vec<PathBuf> {
        let mut seen = std::collections::HashSet::new();
        index
            .ids()
            .filter_map(|id| self.written.get(id))
            .filter(|path| seen.insert((*path).clone()))
            .cloned()
            .collect()
    }
}
