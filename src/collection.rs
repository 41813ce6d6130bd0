//! Assembled light curve collections
//!
//! A [`Collection`] pairs the measurement rows of one retrieval with the
//! caller's [`IndexTable`]. Rows only ever reference identifiers present in
//! the index; identifiers without data simply have no rows.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use crate::identifier::Identifier;
use crate::output::csv::{read_curve_file, read_index};
use crate::output::path::CollectionLayout;
use crate::output::{CollectionWriter, OutputError, OutputResult};
use crate::{DatasetCategory, Observation, PhotFilter};

/// Metadata of one target in the index table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Target identifier
    pub id: Identifier,
    /// Right ascension (degrees)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ra_deg: Option<f64>,
    /// Declination (degrees)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dec_deg: Option<f64>,
    /// Common name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Input catalogs the target was matched in
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catalog_sources: Vec<String>,
    /// Any other columns carried by the caller
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl IndexEntry {
    /// Entry carrying only an identifier
    pub fn new(id: Identifier) -> Self {
        Self {
            id,
            ra_deg: None,
            dec_deg: None,
            name: None,
            catalog_sources: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Attach a sky position
    pub fn with_position(mut self, ra_deg: f64, dec_deg: f64) -> Self {
        self.ra_deg = Some(ra_deg);
        self.dec_deg = Some(dec_deg);
        self
    }

    /// Attach a common name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Caller-supplied table describing the requested targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexTable {
    /// Identifier column name ("asas_sn_id" or "name")
    pub id_column: String,
    /// Entries in caller order
    pub entries: Vec<IndexEntry>,
}

impl IndexTable {
    /// Table from explicit entries
    pub fn new(id_column: impl Into<String>, entries: Vec<IndexEntry>) -> Self {
        Self {
            id_column: id_column.into(),
            entries,
        }
    }

    /// Bare table carrying only identifiers
    pub fn from_ids(id_column: impl Into<String>, ids: Vec<Identifier>) -> Self {
        Self::new(id_column, ids.into_iter().map(IndexEntry::new).collect())
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identifiers in table order
    pub fn ids(&self) -> impl Iterator<Item = &Identifier> {
        self.entries.iter().map(|e| &e.id)
    }

    /// Entry for an identifier
    ///
    /// Scans the table; use [`IndexTable::lookup`] for per-row checks.
    pub fn get(&self, id: &Identifier) -> Option<&IndexEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    /// Whether the table lists an identifier
    pub fn contains(&self, id: &Identifier) -> bool {
        self.get(id).is_some()
    }

    /// Hashed view of the table, built once per retrieval or save
    pub fn lookup(&self) -> IndexLookup<'_> {
        let mut entries = HashMap::with_capacity(self.entries.len());
        for entry in &self.entries {
            entries.entry(&entry.id).or_insert(entry);
        }
        IndexLookup { entries }
    }
}

/// Constant-time identifier lookups over an [`IndexTable`]
///
/// When an identifier is listed twice the first entry wins.
#[derive(Debug, Clone)]
pub struct IndexLookup<'a> {
    entries: HashMap<&'a Identifier, &'a IndexEntry>,
}

impl<'a> IndexLookup<'a> {
    /// Entry for an identifier
    pub fn get(&self, id: &Identifier) -> Option<&'a IndexEntry> {
        self.entries.get(id).copied()
    }

    /// Whether the table lists an identifier
    pub fn contains(&self, id: &Identifier) -> bool {
        self.entries.contains_key(id)
    }
}

/// One classified measurement row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement<O> {
    /// Observation as served by the backend
    #[serde(flatten)]
    pub observation: O,
    /// Filter derived from the camera tag
    pub phot_filter: PhotFilter,
}

impl<O: Observation> Measurement<O> {
    /// Classify an observation; `None` for unknown cameras
    pub fn classify(observation: O) -> Option<Self> {
        let phot_filter = PhotFilter::from_camera(observation.camera())?;
        Some(Self {
            observation,
            phot_filter,
        })
    }
}

/// Which epochs count towards summary statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsFilter {
    /// Keep non-detections (upper limits)
    pub include_non_detections: bool,
    /// Keep images not graded good
    pub include_poor_quality: bool,
    /// Restrict to one photometric filter
    pub phot_filter: Option<PhotFilter>,
}

impl StatsFilter {
    fn accepts<O: Observation>(&self, m: &Measurement<O>) -> bool {
        (self.include_non_detections || !m.observation.is_non_detection())
            && (self.include_poor_quality || m.observation.is_good_quality())
            && self.phot_filter.map_or(true, |f| f == m.phot_filter)
    }
}

/// Summary statistics of one light curve
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurveStats {
    /// Target identifier
    pub id: Identifier,
    /// Mean magnitude
    pub mean_mag: f64,
    /// Sample standard deviation of the magnitude; `None` with fewer than two epochs
    pub std_mag: Option<f64>,
    /// Epochs used
    pub epochs: usize,
}

/// Flux and magnitude the backend reports when photometry failed
const FAILED_PHOTOMETRY: f64 = 99.99;

/// Default multiple of the median flux error kept by [`LightCurve::quality_cut`]
pub const DEFAULT_SIGMA_CUT: f64 = 5.0;

/// Numeric measurement column an aggregate runs over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Column {
    /// Julian date
    Jd,
    /// Magnitude
    #[default]
    Mag,
    /// Magnitude uncertainty
    MagErr,
    /// Flux
    Flux,
    /// Flux uncertainty
    FluxErr,
}

impl Column {
    /// Value of this column in one observation
    pub fn value<O: Observation>(&self, observation: &O) -> f64 {
        match self {
            Column::Jd => observation.jd(),
            Column::Mag => observation.mag(),
            Column::MagErr => observation.mag_err(),
            Column::Flux => observation.flux(),
            Column::FluxErr => observation.flux_err(),
        }
    }

    /// Column name as persisted
    pub fn as_str(&self) -> &'static str {
        match self {
            Column::Jd => "jd",
            Column::Mag => "mag",
            Column::MagErr => "mag_err",
            Column::Flux => "flux",
            Column::FluxErr => "flux_err",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Column {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jd" => Ok(Column::Jd),
            "mag" => Ok(Column::Mag),
            "mag_err" => Ok(Column::MagErr),
            "flux" => Ok(Column::Flux),
            "flux_err" => Ok(Column::FluxErr),
            _ => Err(format!(
                "Invalid column: {s}. Valid options: jd, mag, mag_err, flux, flux_err"
            )),
        }
    }
}

/// Mean, sample standard deviation and epoch count of non-empty magnitudes
fn summarize(id: Identifier, mags: &[f64]) -> CurveStats {
    let n = mags.len() as f64;
    let mean = mags.iter().sum::<f64>() / n;
    let std = (mags.len() > 1).then(|| {
        let var = mags.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / (n - 1.0);
        var.sqrt()
    });

    CurveStats {
        id,
        mean_mag: mean,
        std_mag: std,
        epochs: mags.len(),
    }
}

/// Median of a set of values; `None` when empty
fn median(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut values: Vec<f64> = values.collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

fn is_failed(value: f64) -> bool {
    (value - FAILED_PHOTOMETRY).abs() < 1e-9
}

/// Whether an epoch survives a quality cut at `flux_err_limit`
fn passes_quality_cut<O: Observation>(observation: &O, flux_err_limit: f64) -> bool {
    observation.flux_err() < flux_err_limit
        && observation.flux() > 0.0
        && !is_failed(observation.flux())
        && !is_failed(observation.mag())
        && !observation.is_non_detection()
}

/// Time-ordered measurements of one target
#[derive(Debug, Clone, PartialEq)]
pub struct LightCurve<O> {
    /// Index metadata of the target
    pub meta: IndexEntry,
    /// Measurements sorted by Julian date
    pub measurements: Vec<Measurement<O>>,
}

impl<O: Observation> LightCurve<O> {
    fn new(meta: IndexEntry, mut measurements: Vec<Measurement<O>>) -> Self {
        measurements.sort_by(|a, b| a.observation.jd().total_cmp(&b.observation.jd()));
        Self { meta, measurements }
    }

    /// Target identifier
    pub fn id(&self) -> &Identifier {
        &self.meta.id
    }

    /// Number of epochs
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    /// Whether the curve has no epochs
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Measurements taken through one filter
    pub fn filter(&self, phot_filter: PhotFilter) -> impl Iterator<Item = &Measurement<O>> {
        self.measurements
            .iter()
            .filter(move |m| m.phot_filter == phot_filter)
    }

    /// Summary statistics; `None` when no epoch passes the filter
    pub fn stats(&self, filter: &StatsFilter) -> Option<CurveStats> {
        let mags: Vec<f64> = self
            .measurements
            .iter()
            .filter(|m| filter.accepts(*m))
            .map(|m| m.observation.mag())
            .collect();
        (!mags.is_empty()).then(|| summarize(self.id().clone(), &mags))
    }

    /// Drop epochs with unreliable photometry
    ///
    /// Keeps epochs whose flux error is below `sigma_cut` times the curve's
    /// median flux error and whose flux is positive, excluding non-detections
    /// and failed photometry.
    pub fn quality_cut(&self, sigma_cut: f64) -> Self {
        let Some(median_err) = median(self.measurements.iter().map(|m| m.observation.flux_err()))
        else {
            return self.clone();
        };
        let limit = sigma_cut * median_err;
        let measurements = self
            .measurements
            .iter()
            .filter(|m| passes_quality_cut(&m.observation, limit))
            .cloned()
            .collect();
        Self {
            meta: self.meta.clone(),
            measurements,
        }
    }
}

/// Measurements of one retrieval correlated with the index table
#[derive(Debug, Clone, PartialEq)]
pub struct Collection<O> {
    category: DatasetCategory,
    index: IndexTable,
    rows: Vec<Measurement<O>>,
}

impl<O: Observation> Collection<O> {
    /// Pair rows with an index table
    pub fn new(category: DatasetCategory, index: IndexTable, rows: Vec<Measurement<O>>) -> Self {
        Self {
            category,
            index,
            rows,
        }
    }

    /// Dataset category
    pub fn category(&self) -> DatasetCategory {
        self.category
    }

    /// Identifier column
    pub fn id_column(&self) -> &str {
        &self.index.id_column
    }

    /// Index table
    pub fn index(&self) -> &IndexTable {
        &self.index
    }

    /// Measurement rows in assembly order
    pub fn rows(&self) -> &[Measurement<O>] {
        &self.rows
    }

    /// Consume into rows
    pub fn into_rows(self) -> Vec<Measurement<O>> {
        self.rows
    }

    /// Number of targets in the index table
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the index table is empty
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of measurement rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Identifiers in index order
    pub fn ids(&self) -> Vec<&Identifier> {
        self.index.ids().collect()
    }

    /// Light curve of one target; `None` if the index does not list it
    pub fn curve(&self, id: &Identifier) -> Option<LightCurve<O>> {
        let meta = self.index.get(id)?.clone();
        let measurements = self
            .rows
            .iter()
            .filter(|m| &m.observation.target_id() == id)
            .cloned()
            .collect();
        Some(LightCurve::new(meta, measurements))
    }

    /// Light curves of every indexed target, in index order
    ///
    /// Targets without rows yield empty curves.
    pub fn iter_curves(&self) -> impl Iterator<Item = LightCurve<O>> + '_ {
        let mut grouped: HashMap<Identifier, Vec<Measurement<O>>> = HashMap::new();
        for m in &self.rows {
            grouped
                .entry(m.observation.target_id())
                .or_default()
                .push(m.clone());
        }

        let mut seen = HashSet::new();
        self.index
            .entries
            .iter()
            .filter(move |e| seen.insert(e.id.clone()))
            .map(move |e| LightCurve::new(e.clone(), grouped.remove(&e.id).unwrap_or_default()))
    }

    /// Collection restricted to some identifiers
    pub fn subset(&self, ids: &[Identifier]) -> Self {
        let wanted: HashSet<&Identifier> = ids.iter().collect();
        let index = IndexTable::new(
            self.index.id_column.clone(),
            self.index
                .entries
                .iter()
                .filter(|e| wanted.contains(&e.id))
                .cloned()
                .collect(),
        );
        let rows = self
            .rows
            .iter()
            .filter(|m| wanted.contains(&m.observation.target_id()))
            .cloned()
            .collect();
        Self::new(self.category, index, rows)
    }

    /// Aggregate one column per target, in index order
    ///
    /// `func` receives the column values of every epoch passing `filter`, in
    /// row order. Targets with no such epoch are omitted.
    pub fn apply<T, F>(
        &self,
        column: Column,
        filter: &StatsFilter,
        mut func: F,
    ) -> Vec<(Identifier, T)>
    where
        F: FnMut(&[f64]) -> T,
    {
        let mut grouped: HashMap<Identifier, Vec<f64>> = HashMap::new();
        for m in self.rows.iter().filter(|m| filter.accepts(*m)) {
            grouped
                .entry(m.observation.target_id())
                .or_default()
                .push(column.value(&m.observation));
        }

        let mut seen = HashSet::new();
        self.index
            .ids()
            .filter(|id| seen.insert(*id))
            .filter_map(|id| {
                let values = grouped.remove(id)?;
                Some((id.clone(), func(&values)))
            })
            .collect()
    }

    /// Per-target summary statistics in index order
    ///
    /// Targets with no epoch passing `filter` are omitted.
    pub fn stats(&self, filter: &StatsFilter) -> Vec<CurveStats> {
        self.apply(Column::Mag, filter, |mags| mags.to_vec())
            .into_iter()
            .map(|(id, mags)| summarize(id, &mags))
            .collect()
    }

    /// Collection with [`LightCurve::quality_cut`] applied to every target
    ///
    /// Each target is cut against its own median flux error; row order is kept.
    pub fn quality_cut(&self, sigma_cut: f64) -> Self {
        let mut flux_errs: HashMap<Identifier, Vec<f64>> = HashMap::new();
        for m in &self.rows {
            flux_errs
                .entry(m.observation.target_id())
                .or_default()
                .push(m.observation.flux_err());
        }
        let limits: HashMap<Identifier, f64> = flux_errs
            .into_iter()
            .filter_map(|(id, errs)| Some((id, sigma_cut * median(errs.into_iter())?)))
            .collect();

        let rows = self
            .rows
            .iter()
            .filter(|m| {
                limits
                    .get(&m.observation.target_id())
                    .is_some_and(|limit| passes_quality_cut(&m.observation, *limit))
            })
            .cloned()
            .collect();
        Self::new(self.category, self.index.clone(), rows)
    }

    /// Fold every target into one light curve under a new designation
    ///
    /// Used for a solar-system object catalogued under several designations.
    /// Rows keep the designation they were served under.
    pub fn merge(&self, name: impl Into<String>) -> LightCurve<O> {
        let name = name.into();
        let meta = IndexEntry::new(Identifier::Name(name.clone())).with_name(name);
        LightCurve::new(meta, self.rows.clone())
    }

    /// Write one CSV file per target (and optionally the index manifest)
    ///
    /// Returns the written paths: the manifest first when included, then the
    /// curve files in index order.
    pub fn save(&self, dir: impl AsRef<Path>, include_index: bool) -> OutputResult<Vec<PathBuf>> {
        let mut writer = CollectionWriter::new(dir.as_ref())?;
        let mut paths = Vec::new();

        if include_index {
            paths.push(writer.write_index(self.category, &self.index)?);
        }

        let lookup = self.index.lookup();
        writer.write_rows(&lookup, self.rows.iter().map(|m| &m.observation))?;
        paths.extend(writer.written_paths(&self.index));

        info!(
            dir = %dir.as_ref().display(),
            files = paths.len(),
            "Collection saved"
        );
        Ok(paths)
    }
}

/// Rebuild a collection from a directory written by [`Collection::save`]
///
/// Reads curves in index order and re-classifies every row.
pub fn load_collection<O: Observation>(dir: impl AsRef<Path>) -> OutputResult<Collection<O>> {
    let layout = CollectionLayout::new(dir.as_ref());
    let (category, index) = read_index(&layout.index_path())?;

    if !O::supports(category) {
        return Err(OutputError::InvalidLayout(format!(
            "directory holds {category} light curves, which this row type cannot represent"
        )));
    }

    let mut rows = Vec::new();
    let mut visited = HashSet::new();
    let mut unclassified = 0usize;

    for id in index.ids() {
        let path = layout.curve_path(id);
        if !visited.insert(path.clone()) || !path.exists() {
            continue;
        }

        let (_meta, observations) = read_curve_file::<O>(&path)?;
        for observation in observations {
            match Measurement::classify(observation) {
                Some(m) => rows.push(m),
                None => unclassified += 1,
            }
        }
    }

    debug!(
        dir = %layout.root().display(),
        rows = rows.len(),
        unclassified = unclassified,
        "Collection loaded"
    );

    Ok(Collection::new(category, index, rows))
}
