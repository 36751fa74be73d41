use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::graph::{Direction, MAX_TRAVERSAL_DEPTH};
use crate::jobs::chunk::HARD_MAX_LIMIT;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub refgraph: RefgraphConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub traversal: TraversalConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub http_server: HttpServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

/// Process-wide settings
#[derive(Debug, Clone, Deserialize)]
pub struct RefgraphConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for RefgraphConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Asset index location
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            migrations_dir: default_migrations_dir(),
        }
    }
}

/// Defaults applied to traversal requests that omit parameters
#[derive(Debug, Clone, Deserialize)]
pub struct TraversalConfig {
    #[serde(default = "default_depth")]
    pub default_depth: u32,
    #[serde(default = "default_direction")]
    pub default_direction: String,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            default_depth: default_depth(),
            default_direction: default_direction(),
        }
    }
}

/// Job store and scheduler tuning
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_dispatch_workers")]
    pub dispatch_workers: usize,
    /// Traversals producing fewer nodes than this are answered inline by the auto route.
    #[serde(default = "default_inline_node_threshold")]
    pub inline_node_threshold: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            dispatch_workers: default_dispatch_workers(),
            inline_node_threshold: default_inline_node_threshold(),
        }
    }
}

/// Chunked result retrieval limits
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "default_http_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: default_http_host(),
            port: default_http_port(),
            allowed_origins: Vec::new(),
        }
    }
}

/// Settings for the polling client
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_limit")]
    pub chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            poll_interval_ms: default_poll_interval_ms(),
            timeout_secs: default_timeout_secs(),
            chunk_size: default_limit(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("refgraph.db")
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_depth() -> u32 {
    3
}

fn default_direction() -> String {
    "both".to_string()
}

fn default_retention_secs() -> u64 {
    600
}

fn default_dispatch_workers() -> usize {
    2
}

fn default_inline_node_threshold() -> usize {
    50
}

fn default_limit() -> usize {
    65_536
}

fn default_max_limit() -> usize {
    HARD_MAX_LIMIT
}

fn default_http_host() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_timeout_secs() -> u64 {
    120
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in REFGRAPH_CONFIG environment variable (must exist)
    /// 2. ./config.toml in current directory (optional, defaults otherwise)
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config = match std::env::var("REFGRAPH_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => {
                let path = PathBuf::from("config.toml");
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    log::debug!("No config.toml found, using defaults");
                    Config::default()
                }
            }
        };

        config.validate()?;

        Ok(config)
    }

    /// Parse a config file without validating it
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.traversal.default_depth > MAX_TRAVERSAL_DEPTH {
            anyhow::bail!(
                "traversal.default_depth must be at most {}",
                MAX_TRAVERSAL_DEPTH
            );
        }

        self.traversal
            .default_direction
            .parse::<Direction>()
            .map_err(|e| anyhow::anyhow!("traversal.default_direction: {}", e))?;

        if self.jobs.retention_secs == 0 {
            anyhow::bail!("jobs.retention_secs must be greater than 0");
        }

        if self.jobs.dispatch_workers == 0 {
            anyhow::bail!("jobs.dispatch_workers must be greater than 0");
        }

        if self.chunking.max_limit == 0 || self.chunking.max_limit > HARD_MAX_LIMIT {
            anyhow::bail!(
                "chunking.max_limit must be between 1 and {}",
                HARD_MAX_LIMIT
            );
        }

        if self.chunking.default_limit == 0 || self.chunking.default_limit > self.chunking.max_limit {
            anyhow::bail!("chunking.default_limit must be between 1 and chunking.max_limit");
        }

        if self.client.chunk_size == 0 {
            anyhow::bail!("client.chunk_size must be greater than 0");
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.index.db_path
    }

    /// Job retention window
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.jobs.retention_secs)
    }

    /// Direction used when a request omits it. Validated at load time.
    pub fn default_direction(&self) -> Direction {
        self.traversal
            .default_direction
            .parse()
            .unwrap_or(Direction::Both)
    }
}
