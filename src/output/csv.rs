//! CSV light curve files and the JSON index manifest

use crate::collection::{IndexEntry, IndexTable};
use crate::{DatasetCategory, Observation};
use csv::{Reader, Writer, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::Path;
use tracing::{debug, info};

use super::{ObservationWriter, OutputError, OutputResult, OutputWriter};

const DEFAULT_BUFFER_SIZE: usize = 8192; // 8KB buffer

/// Prefix of the metadata line at the top of every curve file
pub const META_PREFIX: &str = "# ";

/// On-disk form of `index.json`
#[derive(Debug, Serialize, Deserialize)]
struct IndexManifest {
    category: DatasetCategory,
    id_column: String,
    entries: Vec<IndexEntry>,
}

/// CSV writer for one target's light curve
pub struct CsvCurveWriter<O> {
    writer: Writer<BufWriter<File>>,
    rows_written: u64,
    _row: PhantomData<O>,
}

impl<O: Observation> CsvCurveWriter<O> {
    /// Create (or truncate) a curve file, writing the metadata line
    ///
    /// The CSV header is written with the first row.
    pub fn create<P: AsRef<Path>>(path: P, meta: &IndexEntry) -> OutputResult<Self> {
        let path = path.as_ref();
        debug!("Creating curve file: path={}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OutputError::IoError(format!("Failed to create directory: {}", e)))?;
        }

        let file = File::create(path)
            .map_err(|e| OutputError::IoError(format!("Failed to create file: {}", e)))?;
        let mut buf_writer = BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file);

        let meta_json = serde_json::to_string(meta)
            .map_err(|e| OutputError::SerializationError(e.to_string()))?;
        writeln!(buf_writer, "{META_PREFIX}{meta_json}")
            .map_err(|e| OutputError::IoError(format!("Failed to write metadata: {}", e)))?;

        Ok(Self {
            writer: Writer::from_writer(buf_writer),
            rows_written: 0,
            _row: PhantomData,
        })
    }

    /// Open an existing curve file for appending rows (no header)
    pub fn append<P: AsRef<Path>>(path: P) -> OutputResult<Self> {
        let path = path.as_ref();
        debug!("Appending to curve file: path={}", path.display());

        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| OutputError::IoError(format!("Failed to open file: {}", e)))?;

        Ok(Self {
            writer: WriterBuilder::new()
                .has_headers(false)
                .from_writer(BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file)),
            rows_written: 0,
            _row: PhantomData,
        })
    }

    /// Rows written by this writer
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

impl<O: Observation> ObservationWriter<O> for CsvCurveWriter<O> {
    fn write_observation(&mut self, observation: &O) -> OutputResult<()> {
        self.writer
            .serialize(observation)
            .map_err(|e| OutputError::CsvError(format!("Failed to write row: {}", e)))?;
        self.rows_written += 1;
        Ok(())
    }
}

impl<O: Observation> OutputWriter for CsvCurveWriter<O> {
    fn flush(&mut self) -> OutputResult<()> {
        self.writer
            .flush()
            .map_err(|e| OutputError::FlushError(format!("Failed to flush: {}", e)))
    }

    fn close(mut self) -> OutputResult<()> {
        self.flush()?;

        let buf_writer = self.writer.into_inner().map_err(|e| {
            OutputError::IoError(format!("Failed to get inner writer: {}", e))
        })?;

        let file = buf_writer.into_inner().map_err(|e| {
            OutputError::IoError(format!("Failed to get file handle: {}", e))
        })?;

        file.sync_all()
            .map_err(|e| OutputError::IoError(format!("Failed to sync file: {}", e)))?;

        debug!("Curve file closed: {} rows written", self.rows_written);
        Ok(())
    }
}

/// Read a curve file back into its metadata and rows
pub fn read_curve_file<O: Observation>(path: &Path) -> OutputResult<(IndexEntry, Vec<O>)> {
    let file = File::open(path)
        .map_err(|e| OutputError::IoError(format!("Failed to open {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);

    let mut first_line = String::new();
    reader
        .read_line(&mut first_line)
        .map_err(|e| OutputError::IoError(e.to_string()))?;

    let meta_json = first_line.trim_end().strip_prefix(META_PREFIX).ok_or_else(|| {
        OutputError::InvalidLayout(format!("{} has no metadata line", path.display()))
    })?;
    let meta: IndexEntry = serde_json::from_str(meta_json)
        .map_err(|e| OutputError::SerializationError(format!("{}: {}", path.display(), e)))?;

    let mut rest = String::new();
    reader
        .read_to_string(&mut rest)
        .map_err(|e| OutputError::IoError(e.to_string()))?;

    let rows = Reader::from_reader(rest.as_bytes())
        .deserialize()
        .collect::<Result<Vec<O>, _>>()
        .map_err(|e| OutputError::CsvError(format!("{}: {}", path.display(), e)))?;

    Ok((meta, rows))
}

/// Write the index manifest
pub fn write_index(path: &Path, category: DatasetCategory, index: &IndexTable) -> OutputResult<()> {
    let manifest = IndexManifest {
        category,
        id_column: index.id_column.clone(),
        entries: index.entries.clone(),
    };

    let json = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| OutputError::SerializationError(e.to_string()))?;
    std::fs::write(path, json)
        .map_err(|e| OutputError::IoError(format!("Failed to write {}: {}", path.display(), e)))?;

    info!(path = %path.display(), entries = index.len(), "Index written");
    Ok(())
}

/// Read the index manifest
pub fn read_index(path: &Path) -> OutputResult<(DatasetCategory, IndexTable)> {
    let data = std::fs::read(path).map_err(|e| {
        OutputError::InvalidLayout(format!("cannot read {}: {}", path.display(), e))
    })?;
    let manifest: IndexManifest = serde_json::from_slice(&data)
        .map_err(|e| OutputError::SerializationError(format!("{}: {}", path.display(), e)))?;

    Ok((
        manifest.category,
        IndexTable::new(manifest.id_column, manifest.entries),
    ))
}
