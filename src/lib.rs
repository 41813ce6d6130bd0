//! # Sky Patrol Downloader Library
//!
//! A library for retrieving large collections of astronomical light curves from a
//! sharded photometry backend. Designed for survey-scale pulls where a single
//! request covers thousands to millions of targets.
//!
//! ## Features
//!
//! - **Bounded Blocks**: Identifier lists are partitioned into fixed-size blocks
//! - **Shard Failover**: Each block is routed round-robin and fails over across replicas
//! - **Escalating Backoff**: Persistent outages surface as a single terminal error
//! - **Bounded Concurrency**: Blocks are fetched in parallel up to a caller limit
//! - **Deterministic Assembly**: Output order never depends on completion order
//! - **Persistence**: Per-target CSV files plus an index manifest, reloadable later
//!
//! ## Quick Start
//!
//! ```no_run
//! use skypatrol_downloader::collection::IndexTable;
//! use skypatrol_downloader::fetcher::{BackendConfig, HttpBlockSource, ShardEndpoint};
//! use skypatrol_downloader::retrieval::{RetrievalExecutor, RetrievalJob, RetrievalOutput};
//! use skypatrol_downloader::{DatasetCategory, StellarObservation};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = BackendConfig::new(vec![
//!     ShardEndpoint::parse("asassn-db01")?,
//!     ShardEndpoint::parse("asassn-db02")?,
//! ]);
//! let source = Arc::new(HttpBlockSource::new(&backend)?);
//!
//! let ids = vec![17180097.into(), 661430583515.into()];
//! let index = IndexTable::from_ids(DatasetCategory::Stellar.id_column(), ids.clone());
//! let job = RetrievalJob::new(DatasetCategory::Stellar, ids, index);
//!
//! let executor = RetrievalExecutor::new(source, backend).with_concurrency(4);
//! if let RetrievalOutput::Collection(collection) =
//!     executor.retrieve::<StellarObservation>(job).await?
//! {
//!     println!("{} rows for {} targets", collection.row_count(), collection.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`identifier`] - Target identifier parsing
//! - [`fetcher`] - Block sources (HTTP transport, payload decoding, backend configuration)
//! - [`retrieval`] - Blocker, shard resolver, retry controller, dispatcher, assembler
//! - [`collection`] - Assembled collections, index tables, light curves
//! - [`output`] - CSV persistence of collections
//!
//! ## Data Types
//!
//! - [`DatasetCategory`] - Which backend collection and schema a retrieval targets
//! - [`StellarObservation`] - One epoch of point-source photometry
//! - [`SolarSystemObservation`] - One epoch of asteroid or comet photometry
//! - [`PhotFilter`] - Photometric filter derived from the camera tag

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::str::FromStr;

/// CLI command implementations
pub mod cli;

/// Assembled light curve collections
pub mod collection;

/// Block sources and backend configuration
pub mod fetcher;

/// Target identifier parsing
pub mod identifier;

/// Observability metrics
pub mod metrics;

/// Collection persistence
pub mod output;

/// Retrieval pipeline
pub mod retrieval;

/// Cancellation coordination shared across modules
pub mod shutdown;

pub use identifier::Identifier;

/// Cameras observing through a Johnson V filter
pub const V_CAMERAS: &[&str] = &["ba", "bb", "bc", "bd", "be", "bf", "bg", "bh"];

/// Cameras observing through a Sloan g filter
pub const G_CAMERAS: &[&str] = &[
    "bi", "bj", "bk", "bl", "bm", "bn", "bo", "bp", "bq", "br", "bs", "bt",
];

/// Magnitude error reported for non-detections (upper limits)
pub const NON_DETECTION_MAG_ERR: f64 = 99.0;

/// Julian date of the Unix epoch
const UNIX_EPOCH_JD: f64 = 2_440_587.5;

/// Dataset category selecting backend collection and measurement schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetCategory {
    /// Point-source photometry from the stellar input catalogs
    Stellar,
    /// Asteroid photometry
    Asteroids,
    /// Comet photometry
    Comets,
}

impl DatasetCategory {
    /// Name of the identifier column joining measurements to the index table
    pub fn id_column(&self) -> &'static str {
        match self {
            DatasetCategory::Stellar => "asas_sn_id",
            DatasetCategory::Asteroids | DatasetCategory::Comets => "name",
        }
    }

    /// Whether the category holds moving (solar-system) targets
    pub fn is_solar_system(&self) -> bool {
        matches!(self, DatasetCategory::Asteroids | DatasetCategory::Comets)
    }

    /// Wire name used in backend requests
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetCategory::Stellar => "stellar",
            DatasetCategory::Asteroids => "asteroids",
            DatasetCategory::Comets => "comets",
        }
    }
}

impl std::fmt::Display for DatasetCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DatasetCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stellar" | "extrasolar" => Ok(DatasetCategory::Stellar),
            "asteroids" | "asteroid" => Ok(DatasetCategory::Asteroids),
            "comets" | "comet" => Ok(DatasetCategory::Comets),
            _ => Err(format!(
                "Invalid dataset category: {s}. Valid options: stellar, asteroids, comets"
            )),
        }
    }
}

/// Photometric filter of an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhotFilter {
    /// Johnson V
    #[serde(rename = "V")]
    V,
    /// Sloan g
    #[serde(rename = "g")]
    G,
}

impl PhotFilter {
    /// Classify a camera tag; `None` for cameras outside the fixed lookup
    pub fn from_camera(camera: &str) -> Option<Self> {
        let camera = camera.trim();
        if V_CAMERAS.contains(&camera) {
            Some(PhotFilter::V)
        } else if G_CAMERAS.contains(&camera) {
            Some(PhotFilter::G)
        } else {
            None
        }
    }
}

impl std::fmt::Display for PhotFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PhotFilter::V => "V",
            PhotFilter::G => "g",
        };
        write!(f, "{s}")
    }
}

impl FromStr for PhotFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "V" | "v" => Ok(PhotFilter::V),
            "g" | "G" => Ok(PhotFilter::G),
            _ => Err(format!("Invalid photometric filter: {s}. Valid options: V, g")),
        }
    }
}

/// Typed measurement row for one dataset category
///
/// Rows are deserialized straight from the wire payload and validated once;
/// the rest of the pipeline only sees typed fields.
pub trait Observation:
    Serialize + DeserializeOwned + Clone + Debug + PartialEq + Send + Sync + 'static
{
    /// Column names in persisted order
    const COLUMNS: &'static [&'static str];

    /// Whether rows of this type are served for the given category
    fn supports(category: DatasetCategory) -> bool;

    /// Identifier of the owning target
    fn target_id(&self) -> Identifier;

    /// Observation time (Julian date)
    fn jd(&self) -> f64;

    /// Magnitude
    fn mag(&self) -> f64;

    /// Magnitude uncertainty
    fn mag_err(&self) -> f64;

    /// Flux
    fn flux(&self) -> f64;

    /// Flux uncertainty
    fn flux_err(&self) -> f64;

    /// Camera tag
    fn camera(&self) -> &str;

    /// Image quality flag ("G" for good)
    fn quality(&self) -> &str;

    /// Validate row integrity
    fn validate(&self) -> Result<(), String>;

    /// Whether this epoch is a non-detection (magnitude is an upper limit)
    fn is_non_detection(&self) -> bool {
        self.mag_err() >= NON_DETECTION_MAG_ERR
    }

    /// Whether the image was graded good
    fn is_good_quality(&self) -> bool {
        self.quality() == "G"
    }

    /// Observation time as UTC
    fn observed_at(&self) -> Option<DateTime<Utc>> {
        jd_to_datetime(self.jd())
    }
}

/// Convert a Julian date to UTC, `None` when out of range
pub fn jd_to_datetime(jd: f64) -> Option<DateTime<Utc>> {
    if !jd.is_finite() {
        return None;
    }
    let millis = ((jd - UNIX_EPOCH_JD) * 86_400_000.0).round();
    if millis.abs() > i64::MAX as f64 {
        return None;
    }
    DateTime::<Utc>::from_timestamp_millis(millis as i64)
}

fn validate_common(jd: f64, mag_err: f64, camera: &str) -> Result<(), String> {
    if !jd.is_finite() || jd <= 0.0 {
        return Err(format!("Julian date must be positive, got {jd}"));
    }
    if mag_err.is_nan() || mag_err < 0.0 {
        return Err(format!("Magnitude error must be non-negative, got {mag_err}"));
    }
    if camera.trim().is_empty() {
        return Err("Camera tag cannot be empty".to_string());
    }
    Ok(())
}

/// One epoch of point-source photometry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StellarObservation {
    /// Catalog id of the target
    pub asas_sn_id: u64,
    /// Observation time (Julian date)
    pub jd: f64,
    /// Flux (mJy)
    pub flux: f64,
    /// Flux uncertainty
    pub flux_err: f64,
    /// Magnitude
    pub mag: f64,
    /// Magnitude uncertainty (99 for non-detections)
    pub mag_err: f64,
    /// Limiting magnitude of the image
    pub limit: f64,
    /// Full width at half maximum of the image PSF
    pub fwhm: f64,
    /// Image quality flag
    pub quality: String,
    /// Camera tag
    pub camera: String,
    /// Image identifier
    pub image_id: String,
}

impl Observation for StellarObservation {
    const COLUMNS: &'static [&'static str] = &[
        "asas_sn_id",
        "jd",
        "flux",
        "flux_err",
        "mag",
        "mag_err",
        "limit",
        "fwhm",
        "quality",
        "camera",
        "image_id",
    ];

    fn supports(category: DatasetCategory) -> bool {
        category == DatasetCategory::Stellar
    }

    fn target_id(&self) -> Identifier {
        Identifier::Numeric(self.asas_sn_id)
    }

    fn jd(&self) -> f64 {
        self.jd
    }

    fn mag(&self) -> f64 {
        self.mag
    }

    fn mag_err(&self) -> f64 {
        self.mag_err
    }

    fn flux(&self) -> f64 {
        self.flux
    }

    fn flux_err(&self) -> f64 {
        self.flux_err
    }

    fn camera(&self) -> &str {
        &self.camera
    }

    fn quality(&self) -> &str {
        &self.quality
    }

    fn validate(&self) -> Result<(), String> {
        validate_common(self.jd, self.mag_err, &self.camera)?;

        if self.flux_err.is_nan() || self.flux_err < 0.0 {
            return Err(format!(
                "Flux error must be non-negative, got {}",
                self.flux_err
            ));
        }

        Ok(())
    }
}

/// One epoch of asteroid or comet photometry
///
/// Moving targets are measured through several co-temporal apertures; the
/// primary aperture fills `mag`/`flux`, the small and large apertures are
/// optional sub-band measurements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SolarSystemObservation {
    /// Designation of the target
    pub name: String,
    /// Observation time (Julian date)
    pub jd: f64,
    /// Right ascension of the target at this epoch (degrees)
    #[serde(default)]
    pub ra_deg: Option<f64>,
    /// Declination of the target at this epoch (degrees)
    #[serde(default)]
    pub dec_deg: Option<f64>,
    /// Flux through the primary aperture
    pub flux: f64,
    /// Flux uncertainty
    pub flux_err: f64,
    /// Magnitude through the primary aperture
    pub mag: f64,
    /// Magnitude uncertainty (99 for non-detections)
    pub mag_err: f64,
    /// Magnitude through the small aperture
    #[serde(default)]
    pub mag_small: Option<f64>,
    /// Uncertainty of the small-aperture magnitude
    #[serde(default)]
    pub mag_err_small: Option<f64>,
    /// Magnitude through the large aperture
    #[serde(default)]
    pub mag_large: Option<f64>,
    /// Uncertainty of the large-aperture magnitude
    #[serde(default)]
    pub mag_err_large: Option<f64>,
    /// Image quality flag
    pub quality: String,
    /// Camera tag
    pub camera: String,
}

impl Observation for SolarSystemObservation {
    const COLUMNS: &'static [&'static str] = &[
        "name",
        "jd",
        "ra_deg",
        "dec_deg",
        "flux",
        "flux_err",
        "mag",
        "mag_err",
        "mag_small",
        "mag_err_small",
        "mag_large",
        "mag_err_large",
        "quality",
        "camera",
    ];

    fn supports(category: DatasetCategory) -> bool {
        category.is_solar_system()
    }

    fn target_id(&self) -> Identifier {
        Identifier::Name(self.name.clone())
    }

    fn jd(&self) -> f64 {
        self.jd
    }

    fn mag(&self) -> f64 {
        self.mag
    }

    fn mag_err(&self) -> f64 {
        self.mag_err
    }

    fn flux(&self) -> f64 {
        self.flux
    }

    fn flux_err(&self) -> f64 {
        self.flux_err
    }

    fn camera(&self) -> &str {
        &self.camera
    }

    fn quality(&self) -> &str {
        &self.quality
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Target name cannot be empty".to_string());
        }

        validate_common(self.jd, self.mag_err, &self.camera)?;

        if let Some(dec) = self.dec_deg {
            if !(-90.0..=90.0).contains(&dec) {
                return Err(format!("Declination out of range: {dec}"));
            }
        }

        Ok(())
    }
}
