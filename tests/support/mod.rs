//! Shared test doubles

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use skypatrol_downloader::fetcher::{
    BackendConfig, BlockRequest, BlockSource, FetcherError, FetcherResult, ShardEndpoint,
    TransportError,
};
use skypatrol_downloader::identifier::Identifier;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

/// One request seen by a [`ScriptedSource`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Host of the shard asked
    pub shard: String,
    /// Block requested
    pub block_index: usize,
}

/// In-memory backend with scriptable outages
///
/// Stellar id `n` has `n % 3 + 1` epochs, except multiples of 7 which have
/// none. Named targets have two epochs, except names starting with `Unknown`.
/// A block whose targets all lack data is answered with "not found".
pub struct ScriptedSource {
    down: Mutex<HashSet<String>>,
    failing_blocks: Mutex<HashSet<usize>>,
    calls: Mutex<Vec<Call>>,
    jitter: bool,
}

impl ScriptedSource {
    /// Every shard up
    pub fn new() -> Self {
        Self {
            down: Mutex::new(HashSet::new()),
            failing_blocks: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            jitter: false,
        }
    }

    /// Delay answers by a block-dependent amount so completion order differs
    /// from block order
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Take a shard down
    pub fn take_down(&self, host: &str) {
        self.down.lock().unwrap().insert(host.to_string());
    }

    /// Bring a shard back
    pub fn bring_up(&self, host: &str) {
        self.down.lock().unwrap().remove(host);
    }

    /// Make every shard fail requests for one block
    pub fn fail_block(&self, block_index: usize) {
        self.failing_blocks.lock().unwrap().insert(block_index);
    }

    /// Requests seen so far, in arrival order
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Requests for one block, in arrival order
    pub fn calls_for(&self, block_index: usize) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.block_index == block_index)
            .map(|c| c.shard)
            .collect()
    }
}

#[async_trait]
impl BlockSource for ScriptedSource {
    async fn fetch_block(
        &self,
        shard: &ShardEndpoint,
        request: &BlockRequest<'_>,
    ) -> FetcherResult<Vec<u8>> {
        self.calls.lock().unwrap().push(Call {
            shard: shard.host.clone(),
            block_index: request.block_index,
        });

        if self.jitter {
            let ms = ((request.block_index * 7919) % 13) as u64;
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        if self.down.lock().unwrap().contains(&shard.host)
            || self.failing_blocks.lock().unwrap().contains(&request.block_index)
        {
            return Err(TransportError::ConnectionFailed(format!("{} refused", shard.host)).into());
        }

        let rows: Vec<Value> = request.ids.iter().flat_map(rows_for).collect();
        if rows.is_empty() {
            return Err(FetcherError::NotFound(format!(
                "no light curves for block {}",
                request.block_index
            )));
        }
        Ok(serde_json::to_vec(&rows).unwrap())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Rows the scripted backend holds for one target
pub fn rows_for(id: &Identifier) -> Vec<Value> {
    match id {
        Identifier::Numeric(n) if n % 7 == 0 => Vec::new(),
        Identifier::Numeric(n) => (0..(n % 3 + 1))
            .map(|epoch| {
                json!({
                    "asas_sn_id": n,
                    // Epochs are emitted newest first to exercise sorting
                    "jd": 2_458_010.5 - epoch as f64,
                    "flux": 1.5,
                    "flux_err": 0.1,
                    "mag": 14.0 + 0.1 * epoch as f64,
                    "mag_err": if epoch == 2 { 99.0 } else { 0.03 },
                    "limit": 17.2,
                    "fwhm": 1.7,
                    "quality": "G",
                    "camera": if epoch % 2 == 0 { "bd" } else { "bk" },
                    "image_id": format!("img-{n}-{epoch}")
                })
            })
            .collect(),
        Identifier::Name(name) if name.starts_with("Unknown") => Vec::new(),
        Identifier::Name(name) => (0..2)
            .map(|epoch| {
                json!({
                    "name": name,
                    "jd": 2_459_000.5 + epoch as f64,
                    "ra_deg": 120.0,
                    "dec_deg": -5.0,
                    "flux": 3.0,
                    "flux_err": 0.2,
                    "mag": 12.0 + epoch as f64,
                    "mag_err": 0.05,
                    "quality": "G",
                    "camera": "bq"
                })
            })
            .collect(),
    }
}

/// Number of epochs the scripted backend holds for a stellar id
pub fn epochs_for(n: u64) -> usize {
    if n % 7 == 0 {
        0
    } else {
        (n % 3 + 1) as usize
    }
}

/// Backend config with shards named `db0`, `db1`, ...
pub fn backend(shards: usize) -> BackendConfig {
    BackendConfig::new(
        (0..shards)
            .map(|i| ShardEndpoint::new(format!("db{i}"), 9006))
            .collect(),
    )
}

/// Numeric identifiers `1..=n`
pub fn numeric_ids(n: u64) -> Vec<Identifier> {
    (1..=n).map(Identifier::Numeric).collect()
}
