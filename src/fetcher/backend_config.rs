//! Backend configuration
//!
//! Every knob that the original service client kept in process-wide state
//! lives here and is passed explicitly to the sources and the executor.
//! Shards are interchangeable read replicas; any of them can serve any block.

use crate::DatasetCategory;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Port the block servers listen on
pub const DEFAULT_PORT: u16 = 9006;

/// Load balancer answering shard discovery requests
pub const DEFAULT_LOAD_BALANCER: &str = "http://asassn-lb01.ifa.hawaii.edu:9006";

/// HTTP connect timeout (seconds) - time to establish TCP connection
pub const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;

/// HTTP request timeout (seconds) - overall time for the entire request
pub const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Backend configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendConfigError {
    /// Endpoint string could not be parsed
    #[error("invalid shard endpoint '{0}'")]
    InvalidEndpoint(String),

    /// No shards configured for a category
    #[error("no shards configured for category {0}")]
    EmptyShardSet(DatasetCategory),

    /// HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// One block server
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardEndpoint {
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// URL scheme ("http" or "https")
    pub scheme: String,
}

impl ShardEndpoint {
    /// Plain-HTTP endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            scheme: "http".to_string(),
        }
    }

    /// Parse `host`, `host:port` or `scheme://host[:port]`, defaulting the port to 9006
    pub fn parse(input: &str) -> Result<Self, BackendConfigError> {
        Self::parse_with_default_port(input, DEFAULT_PORT)
    }

    /// Parse an endpoint, using `default_port` when none is given
    pub fn parse_with_default_port(
        input: &str,
        default_port: u16,
    ) -> Result<Self, BackendConfigError> {
        let invalid = || BackendConfigError::InvalidEndpoint(input.to_string());

        let trimmed = input.trim().trim_end_matches('/');
        let (scheme, rest) = match trimmed.split_once("://") {
            Some((scheme, rest)) => {
                let scheme = scheme.to_ascii_lowercase();
                if scheme != "http" && scheme != "https" {
                    return Err(invalid());
                }
                (scheme, rest)
            }
            None => ("http".to_string(), trimmed),
        };

        if rest.is_empty() || rest.contains('/') || rest.contains(char::is_whitespace) {
            return Err(invalid());
        }

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
            None => (rest, default_port),
        };

        if host.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            host: host.to_string(),
            port,
            scheme,
        })
    }

    /// URL prefix for requests to this shard
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl fmt::Display for ShardEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Basic-auth credentials for the block servers
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name
    pub username: String,
    /// Password
    pub password: String,
}

impl Credentials {
    /// Create credentials
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Explicit backend configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Default shard list
    pub shards: Vec<ShardEndpoint>,
    /// Per-category shard lists overriding the default
    pub category_shards: HashMap<DatasetCategory, Vec<ShardEndpoint>>,
    /// Optional basic-auth credentials
    pub credentials: Option<Credentials>,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Whole-request timeout enforced by the HTTP client
    pub request_timeout: Duration,
}

impl BackendConfig {
    /// Configuration with default timeouts and no credentials
    pub fn new(shards: Vec<ShardEndpoint>) -> Self {
        Self {
            shards,
            category_shards: HashMap::new(),
            credentials: None,
            connect_timeout: Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Use a dedicated shard list for one category
    pub fn with_category_shards(
        mut self,
        category: DatasetCategory,
        shards: Vec<ShardEndpoint>,
    ) -> Self {
        self.category_shards.insert(category, shards);
        self
    }

    /// Set basic-auth credentials
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set HTTP timeouts
    pub fn with_timeouts(mut self, connect: Duration, request: Duration) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self
    }

    /// Shards serving a category
    ///
    /// # Errors
    ///
    /// Returns [`BackendConfigError::EmptyShardSet`] if the resolved list is empty.
    pub fn shards_for(
        &self,
        category: DatasetCategory,
    ) -> Result<&[ShardEndpoint], BackendConfigError> {
        let shards = self
            .category_shards
            .get(&category)
            .unwrap_or(&self.shards);

        if shards.is_empty() {
            return Err(BackendConfigError::EmptyShardSet(category));
        }
        Ok(shards)
    }
}
