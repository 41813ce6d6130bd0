//! Fetch command implementation

use crate::collection::IndexTable;
use crate::fetcher::backend_config::{
    DEFAULT_LOAD_BALANCER, DEFAULT_PORT, HTTP_CONNECT_TIMEOUT_SECS, HTTP_REQUEST_TIMEOUT_SECS,
};
use crate::fetcher::http::build_http_client;
use crate::fetcher::{discover_shards, BackendConfig, Credentials, HttpBlockSource, ShardEndpoint};
use crate::identifier::Identifier;
use crate::retrieval::config::{DEFAULT_BLOCK_SIZE, DEFAULT_MAX_CYCLES, MAX_CONCURRENCY};
use crate::retrieval::{RetrievalExecutor, RetrievalJob, RetrievalOutput, RetryPolicy};
use crate::shutdown::SharedShutdown;
use crate::{DatasetCategory, Observation, SolarSystemObservation, StellarObservation};
use clap::builder::TypedValueParser;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::CliError;

/// Parse and validate concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

/// Sky Patrol light curve downloader
#[derive(Parser, Debug)]
#[command(name = "skypatrol-downloader")]
#[command(about = "Retrieve ASAS-SN Sky Patrol light curves from the sharded photometry backend", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Number of blocks fetched in parallel (default: 4, max: 32)
    ///
    /// Every block in flight holds one connection to one shard. Values above
    /// the number of shards mostly add load without adding throughput.
    #[arg(long, global = true, default_value = "4", value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Full passes over the shard list before a block fails (default: 5, range: 1-20)
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_CYCLES, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_cycles: u32,

    /// Expose Prometheus metrics on this address (e.g. 127.0.0.1:9000)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,

    /// Backend connection settings
    #[command(flatten)]
    pub backend: BackendArgs,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Retrieve light curves for a list of identifiers
    Fetch(FetchArgs),

    /// Summarise a saved light curve directory
    Load(super::LoadArgs),

    /// List the block servers the load balancer reports
    Servers(super::ServersArgs),
}

/// Backend connection settings shared by all commands
#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
    /// Block server(s) to query; skips discovery through the load balancer
    #[arg(long = "shard", global = true, env = "SKYPATROL_SHARDS", value_delimiter = ',')]
    pub shards: Vec<String>,

    /// Load balancer used to discover block servers
    #[arg(long, global = true, env = "SKYPATROL_LOAD_BALANCER", default_value = DEFAULT_LOAD_BALANCER)]
    pub load_balancer: String,

    /// Port of the block servers when a host omits it
    #[arg(long, global = true, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Basic auth user
    #[arg(long, global = true, env = "SKYPATROL_USER")]
    pub username: Option<String>,

    /// Basic auth password
    #[arg(long, global = true, env = "SKYPATROL_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Connect timeout in seconds
    #[arg(long, global = true, default_value_t = HTTP_CONNECT_TIMEOUT_SECS)]
    pub connect_timeout: u64,

    /// Per-attempt request timeout in seconds
    #[arg(long, global = true, default_value_t = HTTP_REQUEST_TIMEOUT_SECS)]
    pub request_timeout: u64,
}

impl BackendArgs {
    /// Configuration without shards, carrying credentials and timeouts
    fn base_config(&self) -> Result<BackendConfig, CliError> {
        if self.connect_timeout == 0 || self.request_timeout == 0 {
            return Err(CliError::InvalidArgument(
                "timeouts must be at least 1 second".to_string(),
            ));
        }

        let mut config = BackendConfig::new(Vec::new()).with_timeouts(
            Duration::from_secs(self.connect_timeout),
            Duration::from_secs(self.request_timeout),
        );
        match (&self.username, &self.password) {
            (Some(user), Some(password)) => {
                config = config.with_credentials(Credentials::new(user, password));
            }
            (None, None) => {}
            _ => {
                return Err(CliError::InvalidArgument(
                    "--username and --password must be given together".to_string(),
                ))
            }
        }
        Ok(config)
    }

    /// Build the backend configuration, discovering shards when none are given
    pub async fn resolve(&self) -> Result<BackendConfig, CliError> {
        let mut config = self.base_config()?;

        if self.shards.is_empty() {
            config.shards = self.discover().await?;
        } else {
            config.shards = self
                .shards
                .iter()
                .map(|s| ShardEndpoint::parse_with_default_port(s, self.port))
                .collect::<Result<_, _>>()?;
        }

        if config.shards.is_empty() {
            return Err(CliError::ConfigurationError(
                "no block servers available".to_string(),
            ));
        }
        Ok(config)
    }

    /// Ask the load balancer for the current block servers
    pub async fn discover(&self) -> Result<Vec<ShardEndpoint>, CliError> {
        let client = build_http_client(&self.base_config()?)?;
        info!(load_balancer = %self.load_balancer, "Discovering block servers");
        let shards = discover_shards(&client, &self.load_balancer, self.port).await?;
        info!(count = shards.len(), "Block servers discovered");
        Ok(shards)
    }
}

/// Fetch command arguments
#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Dataset category: stellar, asteroids or comets
    #[arg(long, default_value = "stellar")]
    pub category: DatasetCategory,

    /// Identifiers to fetch (ASAS-SN ids for stellar, names for asteroids and comets)
    pub ids: Vec<String>,

    /// File with identifiers, one per line or comma separated
    #[arg(long)]
    pub ids_file: Option<PathBuf>,

    /// Catalog forwarded to the backend
    #[arg(long)]
    pub catalog: Option<String>,

    /// Maximum identifiers per block
    #[arg(
        long,
        default_value_t = DEFAULT_BLOCK_SIZE,
        value_parser = clap::value_parser!(u64).range(1..).map(|v| v as usize)
    )]
    pub block_size: usize,

    /// Backoff unit in milliseconds; the n-th full cycle sleeps n units
    #[arg(long, default_value_t = 1000)]
    pub backoff_ms: u64,

    /// Save light curves to this directory instead of summarising them
    #[arg(long)]
    pub save_dir: Option<PathBuf>,
}

/// Output format options
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

/// Summary printed after a fetch
#[derive(Debug, Serialize)]
struct FetchSummary {
    success: bool,
    category: String,
    targets: usize,
    targets_with_data: usize,
    rows: usize,
    files: Vec<String>,
    error: Option<String>,
}

impl FetchSummary {
    fn failed(category: DatasetCategory, targets: usize, error: String) -> Self {
        Self {
            success: false,
            category: category.to_string(),
            targets,
            targets_with_data: 0,
            rows: 0,
            files: Vec::new(),
            error: Some(error),
        }
    }
}

fn create_progress_bar(total_blocks: u64, category: DatasetCategory) -> ProgressBar {
    let pb = ProgressBar::new(total_blocks);
    match ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
    {
        Ok(style) => pb.set_style(style.progress_chars("#>-")),
        Err(e) => error!("Invalid progress template: {}", e),
    }
    pb.set_message(format!("Fetching {category} blocks"));
    pb
}

fn print_summary(format: OutputFormat, summary: &FetchSummary) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string(summary).map_err(|e| {
                CliError::InvalidArgument(format!("Failed to serialize summary: {e}"))
            })?;
            println!("{json}");
        }
        OutputFormat::Human => {
            if let Some(err) = &summary.error {
                eprintln!("\nRetrieval failed!");
                eprintln!("Error: {err}");
            } else {
                println!("\nRetrieval completed successfully!");
                println!("Category: {}", summary.category);
                println!("Targets requested: {}", summary.targets);
                if summary.files.is_empty() {
                    println!("Targets with data: {}", summary.targets_with_data);
                    println!("Rows: {}", summary.rows);
                } else {
                    println!("Files written: {}", summary.files.len());
                    for file in &summary.files {
                        println!("  {file}");
                    }
                }
            }
        }
    }
    Ok(())
}

impl FetchArgs {
    /// Identifiers from the positional arguments and the ids file, in order
    pub fn identifiers(&self) -> Result<Vec<Identifier>, CliError> {
        let mut ids = Vec::new();
        for raw in &self.ids {
            ids.extend(Identifier::parse_list_for(raw, self.category)?);
        }
        if let Some(path) = &self.ids_file {
            let content = std::fs::read_to_string(path).map_err(|e| {
                CliError::InvalidArgument(format!("Failed to read {}: {e}", path.display()))
            })?;
            ids.extend(Identifier::parse_list_for(&content, self.category)?);
        }
        if ids.is_empty() {
            return Err(CliError::InvalidArgument("no identifiers given".to_string()));
        }
        Ok(ids)
    }

    /// Execute the fetch command
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let ids = self.identifiers()?;
        let index = IndexTable::from_ids(self.category.id_column(), ids.clone());
        let mut job = RetrievalJob::new(self.category, ids, index);
        if let Some(catalog) = &self.catalog {
            job = job.with_catalog(catalog.clone());
        }
        if let Some(dir) = &self.save_dir {
            job = job.with_save_dir(dir.clone());
        }
        job.validate().map_err(CliError::InvalidArgument)?;

        let backend = cli.backend.resolve().await?;
        let source = Arc::new(HttpBlockSource::new(&backend)?);
        let total_blocks = job.ids.len().div_ceil(self.block_size) as u64;
        let progress = create_progress_bar(total_blocks, self.category);

        let executor = RetrievalExecutor::new(source, backend)
            .with_concurrency(cli.concurrency)
            .with_block_size(self.block_size)
            .with_retry_policy(
                RetryPolicy::default()
                    .with_max_cycles(cli.max_cycles)
                    .with_backoff_unit(Duration::from_millis(self.backoff_ms))
                    .with_attempt_timeout(Duration::from_secs(cli.backend.request_timeout)),
            )
            .with_shutdown(shutdown)
            .with_progress_bar(progress.clone());

        let targets = job.ids.len();
        let result = if self.category == DatasetCategory::Stellar {
            run::<StellarObservation>(&executor, job).await
        } else {
            run::<SolarSystemObservation>(&executor, job).await
        };
        progress.finish_and_clear();

        match result {
            Ok(summary) => print_summary(cli.output_format, &summary),
            Err(e) => {
                print_summary(
                    cli.output_format,
                    &FetchSummary::failed(self.category, targets, e.to_string()),
                )?;
                Err(e)
            }
        }
    }
}

async fn run<O: Observation>(
    executor: &RetrievalExecutor,
    job: RetrievalJob,
) -> Result<FetchSummary, CliError> {
    let category = job.category;
    let targets = job.ids.len();

    let summary = match executor.retrieve::<O>(job).await? {
        RetrievalOutput::Collection(collection) => FetchSummary {
            success: true,
            category: category.to_string(),
            targets,
            targets_with_data: collection.iter_curves().filter(|c| !c.is_empty()).count(),
            rows: collection.row_count(),
            files: Vec::new(),
            error: None,
        },
        RetrievalOutput::Files(files) => FetchSummary {
            success: true,
            category: category.to_string(),
            targets,
            // The first file is the index manifest
            targets_with_data: files.len().saturating_sub(1),
            rows: 0,
            files: files.iter().map(|f| f.display().to_string()).collect(),
            error: None,
        },
    };
    Ok(summary)
}
