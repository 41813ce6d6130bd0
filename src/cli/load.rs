//! Load command: summarise a saved light curve directory

use crate::collection::{load_collection, Collection, CurveStats, StatsFilter};
use crate::output::{read_index, CollectionLayout};
use crate::{DatasetCategory, Observation, PhotFilter, SolarSystemObservation, StellarObservation};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

use super::{CliError, OutputFormat};

/// Load command arguments
#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Directory written by `fetch --save-dir`
    pub dir: PathBuf,

    /// Print per-target magnitude statistics
    #[arg(long, default_value_t = false)]
    pub stats: bool,

    /// Count non-detections in the statistics
    #[arg(long, default_value_t = false)]
    pub include_non_detections: bool,

    /// Count images not graded good in the statistics
    #[arg(long, default_value_t = false)]
    pub include_poor_quality: bool,

    /// Restrict statistics to one photometric filter (V or g)
    #[arg(long)]
    pub filter: Option<PhotFilter>,

    /// Drop epochs whose flux error exceeds SIGMA times the target's median
    #[arg(long, value_name = "SIGMA", num_args = 0..=1, default_missing_value = "5")]
    pub quality_cut: Option<f64>,
}

#[derive(Debug, Serialize)]
struct LoadSummary {
    dir: String,
    category: String,
    targets: usize,
    targets_with_data: usize,
    rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<Vec<CurveStats>>,
}

impl LoadArgs {
    fn stats_filter(&self) -> StatsFilter {
        StatsFilter {
            include_non_detections: self.include_non_detections,
            include_poor_quality: self.include_poor_quality,
            phot_filter: self.filter,
        }
    }

    fn summarise<O: Observation>(&self, collection: Collection<O>) -> LoadSummary {
        let collection = match self.quality_cut {
            Some(sigma) => collection.quality_cut(sigma),
            None => collection,
        };
        LoadSummary {
            dir: self.dir.display().to_string(),
            category: collection.category().to_string(),
            targets: collection.len(),
            targets_with_data: collection.iter_curves().filter(|c| !c.is_empty()).count(),
            rows: collection.row_count(),
            stats: self.stats.then(|| collection.stats(&self.stats_filter())),
        }
    }

    /// Execute the load command
    pub fn execute(&self, format: OutputFormat) -> Result<(), CliError> {
        let (category, _) = read_index(&CollectionLayout::new(&self.dir).index_path())?;
        info!(dir = %self.dir.display(), category = %category, "Loading collection");

        let summary = if category == DatasetCategory::Stellar {
            self.summarise(load_collection::<StellarObservation>(&self.dir)?)
        } else {
            self.summarise(load_collection::<SolarSystemObservation>(&self.dir)?)
        };

        match format {
            OutputFormat::Json => {
                let json = serde_json::to_string(&summary).map_err(|e| {
                    CliError::InvalidArgument(format!("Failed to serialize summary: {e}"))
                })?;
                println!("{json}");
            }
            OutputFormat::Human => print_human(&summary),
        }
        Ok(())
    }
}

fn print_human(summary: &LoadSummary) {
    println!("Collection: {}", summary.dir);
    println!("Category: {}", summary.category);
    println!("Targets: {}", summary.targets);
    println!("Targets with data: {}", summary.targets_with_data);
    println!("Rows: {}", summary.rows);

    if let Some(stats) = &summary.stats {
        println!("\n{:<24} {:>10} {:>10} {:>8}", "id", "mean_mag", "std_mag", "epochs");
        for s in stats {
            let std = s.std_mag.map_or_else(|| "-".to_string(), |v| format!("{v:.3}"));
            println!(
                "{:<24} {:>10.3} {:>10} {:>8}",
                s.id.to_string(),
                s.mean_mag,
                std,
                s.epochs
            );
        }
    }
}
