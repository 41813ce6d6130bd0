//! HTTP block source
//!
//! Provides the production [`BlockSource`] talking to the block servers:
//! - One POST per attempt (failover and backoff belong to the retry controller)
//! - Status mapping into "no data" versus transport failures
//! - Optional basic auth
//! - Shard discovery through the load balancer

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::fetcher::backend_config::{BackendConfig, BackendConfigError, Credentials, ShardEndpoint};
use crate::fetcher::{BlockRequest, BlockSource, FetcherError, FetcherResult, TransportError};

/// Longest response body kept in error messages
const MAX_ERROR_BODY: usize = 512;

/// `error` value of the block server's "no such data" reply
pub const NO_DATA_ERROR: &str = "no_data";

/// JSON body a block server sends with 404 when the block has no light curves
#[derive(Debug, serde::Deserialize)]
struct ErrorReply {
    error: String,
}

/// Whether a 404 body is the block server's own "no such data" reply
///
/// Anything else (a proxy page, a missing route, an empty body) means the
/// request never reached a block server that understood it.
fn is_no_data_reply(body: &str) -> bool {
    serde_json::from_str::<ErrorReply>(body).map_or(false, |reply| reply.error == NO_DATA_ERROR)
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

/// Build an HTTP client honoring the configured timeouts
pub fn build_http_client(config: &BackendConfig) -> Result<Client, BackendConfigError> {
    Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .build()
        .map_err(|e| BackendConfigError::HttpClient(e.to_string()))
}

/// Block source backed by the `get_block` HTTP endpoint
pub struct HttpBlockSource {
    client: Client,
    credentials: Option<Credentials>,
    request_timeout: std::time::Duration,
}

impl HttpBlockSource {
    /// Create a source from backend configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built (e.g. TLS setup failure).
    pub fn new(config: &BackendConfig) -> Result<Self, BackendConfigError> {
        Ok(Self {
            client: build_http_client(config)?,
            credentials: config.credentials.clone(),
            request_timeout: config.request_timeout,
        })
    }

    fn block_url(shard: &ShardEndpoint) -> String {
        format!("{}/get_block", shard.base_url())
    }

    fn classify(&self, err: &reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.request_timeout)
        } else if err.is_connect() {
            TransportError::ConnectionFailed(err.to_string())
        } else if err.is_decode() || err.is_body() {
            TransportError::MalformedPayload(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl BlockSource for HttpBlockSource {
    async fn fetch_block(
        &self,
        shard: &ShardEndpoint,
        request: &BlockRequest<'_>,
    ) -> FetcherResult<Vec<u8>> {
        let url = Self::block_url(shard);

        debug!(
            block_index = request.block_index,
            shard = %shard,
            ids = request.ids.len(),
            "POST {}",
            url
        );

        let mut builder = self.client.post(&url).json(&request.to_body());
        if let Some(creds) = &self.credentials {
            builder = builder.basic_auth(&creds.username, Some(&creds.password));
        }

        let response = builder.send().await.map_err(|e| {
            warn!(block_index = request.block_index, shard = %shard, "Request failed: {}", e);
            self.classify(&e)
        })?;

        let status = response.status();

        if status == StatusCode::NO_CONTENT {
            return Err(FetcherError::NotFound(format!(
                "block {} on {} returned {}",
                request.block_index,
                shard,
                status.as_u16()
            )));
        }

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            if status == StatusCode::NOT_FOUND && is_no_data_reply(&body) {
                return Err(FetcherError::NotFound(format!(
                    "block {} on {} has no light curves",
                    request.block_index, shard
                )));
            }
            return Err(TransportError::Http {
                status: status.as_u16(),
                body: truncate_body(body),
            }
            .into());
        }

        let bytes = response.bytes().await.map_err(|e| self.classify(&e))?;
        Ok(bytes.to_vec())
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Ask the load balancer which block servers are currently up
///
/// The response is a JSON list of host names; each is combined with `port`.
pub async fn discover_shards(
    client: &Client,
    load_balancer: &str,
    port: u16,
) -> FetcherResult<Vec<ShardEndpoint>> {
    let url = format!("{}/get_block_servers", load_balancer.trim_end_matches('/'));
    debug!("GET {}", url);

    let response = client.get(&url).send().await.map_err(|e| {
        if e.is_timeout() {
            TransportError::Network(format!("discovery timed out: {e}"))
        } else {
            TransportError::ConnectionFailed(e.to_string())
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Http {
            status: status.as_u16(),
            body: truncate_body(response.text().await.unwrap_or_default()),
        }
        .into());
    }

    let hosts: Vec<String> = response
        .json()
        .await
        .map_err(|e| TransportError::MalformedPayload(e.to_string()))?;

    hosts
        .iter()
        .map(|host| {
            ShardEndpoint::parse_with_default_port(host, port)
                .map_err(|e| FetcherError::from(TransportError::MalformedPayload(e.to_string())))
        })
        .collect()
}
