//! Configuration for the sermon-relay upload service.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Serde adapter for humantime-formatted durations ("15m", "1h", "30s").
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(de)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Bucket holding the audio objects and their sidecars
    #[serde(default = "default_primary_bucket")]
    pub primary_bucket: String,

    /// Bucket holding the service's own state (hash-index snapshot)
    #[serde(default = "default_system_bucket")]
    pub system_bucket: String,

    /// Suffix inserted before the extension at key derivation
    #[serde(default = "default_filename_suffix")]
    pub filename_suffix: String,

    /// Switch to multipart upload at this object size
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: u64,

    /// Switch reads to a streaming buffer at this size
    #[serde(default = "default_streaming_threshold")]
    pub streaming_threshold_bytes: u64,

    /// Cadence of hash-index snapshot writes
    #[serde(with = "duration_str", default = "default_autosave_interval")]
    pub index_autosave_interval: Duration,

    /// Sessions idle longer than this are garbage-collected
    #[serde(with = "duration_str", default = "default_session_max_age")]
    pub session_max_age: Duration,

    /// Directory for resumable-session temp files
    #[serde(default = "default_session_temp_dir")]
    pub session_temp_dir: PathBuf,

    /// Object store backend configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Retry policy for transient store errors
    #[serde(default)]
    pub retry: RetryConfig,

    /// Progress event bus limits
    #[serde(default)]
    pub event_bus: EventBusConfig,

    /// Presigned URL lifetimes
    #[serde(default)]
    pub presign_ttl: PresignTtlConfig,
}

/// Object store backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// In-memory backend for tests and local development
    Memory,

    /// S3-compatible backend (MinIO, AWS) for production use
    S3 {
        /// Endpoint URL (for MinIO or custom S3-compatible services).
        /// If not specified, uses the AWS default endpoint.
        #[serde(default)]
        endpoint: Option<String>,

        /// AWS region
        #[serde(default = "default_region")]
        region: String,

        /// Use path-style URLs (required for MinIO)
        #[serde(default = "default_force_path_style")]
        force_path_style: bool,

        /// Access key (optional, can use env/instance credentials)
        #[serde(default)]
        access_key_id: Option<String>,

        /// Secret key (optional, can use env/instance credentials)
        #[serde(default)]
        secret_access_key: Option<String>,

        /// Host used when minting presigned URLs for clients that reach the
        /// store through a different hostname than the server does.
        #[serde(default)]
        public_endpoint: Option<String>,
    },
}

/// Retry policy for transient store errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_max")]
    pub max_attempts: u32,

    #[serde(with = "duration_str", default = "default_retry_initial_delay")]
    pub initial_delay: Duration,

    #[serde(with = "duration_str", default = "default_retry_max_delay")]
    pub max_delay: Duration,

    #[serde(default = "default_retry_factor")]
    pub factor: f64,
}

/// Progress event bus limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    #[serde(default = "default_max_subscribers")]
    pub max_subscribers: usize,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

/// Presigned URL lifetimes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresignTtlConfig {
    #[serde(with = "duration_str", default = "default_put_ttl")]
    pub put: Duration,

    #[serde(with = "duration_str", default = "default_part_ttl")]
    pub part: Duration,

    #[serde(with = "duration_str", default = "default_get_ttl")]
    pub get: Duration,
}

// Default value functions for serde
fn default_listen_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_primary_bucket() -> String {
    "sermons".to_string()
}

fn default_system_bucket() -> String {
    "system-cache".to_string()
}

fn default_filename_suffix() -> String {
    "_raw".to_string()
}

fn default_multipart_threshold() -> u64 {
    64 * 1024 * 1024 // 64 MiB
}

fn default_streaming_threshold() -> u64 {
    1024 * 1024 // 1 MiB
}

fn default_autosave_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_session_max_age() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_session_temp_dir() -> PathBuf {
    PathBuf::from("/tmp/tus-uploads")
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_force_path_style() -> bool {
    true
}

fn default_retry_max() -> u32 {
    3
}

fn default_retry_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_retry_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_retry_factor() -> f64 {
    2.0
}

fn default_max_subscribers() -> usize {
    20
}

fn default_buffer_size() -> usize {
    256
}

fn default_put_ttl() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_part_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_get_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max(),
            initial_delay: default_retry_initial_delay(),
            max_delay: default_retry_max_delay(),
            factor: default_retry_factor(),
        }
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_subscribers: default_max_subscribers(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl Default for PresignTtlConfig {
    fn default() -> Self {
        Self {
            put: default_put_ttl(),
            part: default_part_ttl(),
            get: default_get_ttl(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            primary_bucket: default_primary_bucket(),
            system_bucket: default_system_bucket(),
            filename_suffix: default_filename_suffix(),
            multipart_threshold_bytes: default_multipart_threshold(),
            streaming_threshold_bytes: default_streaming_threshold(),
            index_autosave_interval: default_autosave_interval(),
            session_max_age: default_session_max_age(),
            session_temp_dir: default_session_temp_dir(),
            store: StoreConfig::default(),
            retry: RetryConfig::default(),
            event_bus: EventBusConfig::default(),
            presign_ttl: PresignTtlConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("SERMON_RELAY_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.listen_addr = parsed;
            }
        }

        // S3 store configuration: presence of an endpoint selects the S3 backend
        if let Ok(endpoint) = std::env::var("SERMON_RELAY_S3_ENDPOINT") {
            config.store = StoreConfig::S3 {
                endpoint: Some(endpoint),
                region: std::env::var("SERMON_RELAY_S3_REGION")
                    .unwrap_or_else(|_| default_region()),
                force_path_style: std::env::var("SERMON_RELAY_S3_FORCE_PATH_STYLE")
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(true),
                access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok(),
                secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
                public_endpoint: std::env::var("SERMON_RELAY_PUBLIC_ENDPOINT").ok(),
            };
        }

        if let Ok(bucket) = std::env::var("SERMON_RELAY_PRIMARY_BUCKET") {
            config.primary_bucket = bucket;
        }

        if let Ok(bucket) = std::env::var("SERMON_RELAY_SYSTEM_BUCKET") {
            config.system_bucket = bucket;
        }

        if let Ok(suffix) = std::env::var("SERMON_RELAY_FILENAME_SUFFIX") {
            config.filename_suffix = suffix;
        }

        if let Ok(size) = std::env::var("SERMON_RELAY_MULTIPART_THRESHOLD") {
            if let Ok(parsed) = size.parse() {
                config.multipart_threshold_bytes = parsed;
            }
        }

        if let Ok(interval) = std::env::var("SERMON_RELAY_INDEX_AUTOSAVE_INTERVAL") {
            if let Ok(parsed) = humantime::parse_duration(&interval) {
                config.index_autosave_interval = parsed;
            }
        }

        if let Ok(age) = std::env::var("SERMON_RELAY_SESSION_MAX_AGE") {
            if let Ok(parsed) = humantime::parse_duration(&age) {
                config.session_max_age = parsed;
            }
        }

        if let Ok(dir) = std::env::var("SERMON_RELAY_SESSION_TEMP_DIR") {
            config.session_temp_dir = PathBuf::from(dir);
        }

        config
    }

    /// Load configuration from file if it exists, otherwise from environment
    pub fn load() -> Self {
        // Try config file first
        if let Ok(path) = std::env::var("SERMON_RELAY_CONFIG") {
            if let Ok(config) = Self::from_file(&path) {
                return config;
            }
        }

        // Try default config file locations
        for path in &["sermon-relay.toml", "/etc/sermon-relay/config.toml"] {
            if std::path::Path::new(path).exists() {
                if let Ok(config) = Self::from_file(path) {
                    return config;
                }
            }
        }

        // Fall back to environment variables
        Self::from_env()
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
