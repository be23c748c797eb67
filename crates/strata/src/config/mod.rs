use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, StrataError};
use crate::storage::EndpointKey;

/// Main configuration structure for Strata
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Hot tier (pooled key-value store)
    #[serde(default)]
    pub hot: HotConfig,
    /// Warm tier (document store)
    #[serde(default)]
    pub warm: WarmConfig,
    /// Cold tier (vector store)
    #[serde(default)]
    pub cold: ColdConfig,
    /// In-process L1 cache
    #[serde(default)]
    pub l1: L1Config,
    /// Distributed L2 cache
    #[serde(default)]
    pub l2: L2Config,
    /// Embedding-similarity cache
    #[serde(default)]
    pub semantic: SemanticConfig,
    /// Hot→Warm→Cold migration policy
    #[serde(default)]
    pub migration: MigrationConfig,
    /// Backoff policy for transient backend failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Load configuration from an explicit path, or from the first default
    /// location that exists. Falls back to defaults when nothing is found.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(path);
        }

        let default_paths = [
            dirs::home_dir().map(|h| h.join(".strata").join("config.toml")),
            dirs::config_dir().map(|c| c.join("strata").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StrataError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| StrataError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a component unusable.
    pub fn validate(&self) -> Result<()> {
        if self.hot.pool_size == 0 {
            return Err(StrataError::Config("hot.pool_size must be at least 1".into()));
        }
        if self.hot.pool_min > self.hot.pool_size {
            return Err(StrataError::Config(format!(
                "hot.pool_min ({}) exceeds hot.pool_size ({})",
                self.hot.pool_min, self.hot.pool_size
            )));
        }
        if self.hot.batch_size == 0 {
            return Err(StrataError::Config("hot.batch_size must be at least 1".into()));
        }
        if self.warm.batch_limit == 0 {
            return Err(StrataError::Config("warm.batch_limit must be at least 1".into()));
        }
        if self.cold.vector_dim == 0 {
            return Err(StrataError::Config("cold.vector_dim must be at least 1".into()));
        }
        if self.l1.max_size == 0 {
            return Err(StrataError::Config("l1.max_size must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.semantic.similarity_threshold) {
            return Err(StrataError::Config(format!(
                "semantic.similarity_threshold must be within [0, 1], got {}",
                self.semantic.similarity_threshold
            )));
        }
        if self.semantic.max_cache_size == 0 {
            return Err(StrataError::Config(
                "semantic.max_cache_size must be at least 1".into(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(StrataError::Config("retry.multiplier must be >= 1.0".into()));
        }
        for (name, secs) in [
            ("hot.health_check_interval_secs", self.hot.health_check_interval_secs),
            ("warm.sweep_interval", self.warm.sweep_interval),
            ("migration.scan_interval_secs", self.migration.scan_interval_secs),
        ] {
            if secs == 0 {
                return Err(StrataError::Config(format!("{name} must be at least 1")));
            }
        }
        if self.l2_shares_hot_endpoint()
            && namespaces_overlap(&self.hot.namespace, &self.l2.namespace)
        {
            return Err(StrataError::Config(format!(
                "hot.namespace {:?} and l2.namespace {:?} overlap on the same endpoint",
                self.hot.namespace, self.l2.namespace
            )));
        }
        Ok(())
    }

    /// True when L2 resolves to the hot tier's pool.
    fn l2_shares_hot_endpoint(&self) -> bool {
        let Some(ref l2_url) = self.l2.url else {
            return true;
        };
        match (EndpointKey::parse(&self.hot.url), EndpointKey::parse(l2_url)) {
            (Ok(hot), Ok(l2)) => hot.pool_key() == l2.pool_key(),
            _ => false,
        }
    }
}

/// Keys live under `{namespace}:`, so one namespace's scans reach the other's
/// keys when they are equal or one extends the other past a `:`.
fn namespaces_overlap(a: &str, b: &str) -> bool {
    let (a, b) = (format!("{a}:"), format!("{b}:"));
    a.starts_with(&b) || b.starts_with(&a)
}

/// Hot tier configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HotConfig {
    /// Backend URL: `redis://[:password@]host:port/db` or `memory://name`
    #[serde(default = "default_hot_url")]
    pub url: String,
    /// Key namespace prepended to every entry key
    #[serde(default = "default_hot_namespace")]
    pub namespace: String,
    /// Maximum pooled connections
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Connections opened eagerly at initialization
    #[serde(default = "default_pool_min")]
    pub pool_min: usize,
    /// TTL in seconds applied by `HotTier::put` (0 = no expiry)
    #[serde(default = "default_hot_ttl")]
    pub ttl_default: i64,
    /// Per-request socket timeout
    #[serde(default = "default_socket_timeout_ms")]
    pub socket_timeout_ms: u64,
    /// Maximum wait for a free pooled connection
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Idle connections older than this are reopened
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    /// Interval between background PINGs
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    /// Commands per pipelined round trip
    #[serde(default = "default_hot_batch_size")]
    pub batch_size: usize,
    /// SCAN COUNT hint
    #[serde(default = "default_scan_count")]
    pub scan_count: usize,
    /// Bounded queue depth for access metadata write-back
    #[serde(default = "default_access_queue")]
    pub access_queue: usize,
}

impl Default for HotConfig {
    fn default() -> Self {
        Self {
            url: default_hot_url(),
            namespace: default_hot_namespace(),
            pool_size: default_pool_size(),
            pool_min: default_pool_min(),
            ttl_default: default_hot_ttl(),
            socket_timeout_ms: default_socket_timeout_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            keepalive_secs: default_keepalive_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            batch_size: default_hot_batch_size(),
            scan_count: default_scan_count(),
            access_queue: default_access_queue(),
        }
    }
}

impl HotConfig {
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

fn default_hot_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_hot_namespace() -> String {
    "strata:hot".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_pool_min() -> usize {
    1
}

fn default_hot_ttl() -> i64 {
    3600
}

fn default_socket_timeout_ms() -> u64 {
    5000
}

fn default_acquire_timeout_ms() -> u64 {
    2000
}

fn default_keepalive_secs() -> u64 {
    300
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_hot_batch_size() -> usize {
    100
}

fn default_scan_count() -> usize {
    100
}

fn default_access_queue() -> usize {
    1024
}

/// Warm tier configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WarmConfig {
    /// SQLite URL, e.g. `sqlite://strata.db` or `sqlite::memory:`
    #[serde(default = "default_warm_url")]
    pub url: String,
    /// Table holding the documents
    #[serde(default = "default_warm_collection")]
    pub collection: String,
    /// Hard limit on documents per batched write
    #[serde(default = "default_warm_batch_limit")]
    pub batch_limit: usize,
    /// Seconds between expiry sweeps
    #[serde(default = "default_warm_sweep_interval")]
    pub sweep_interval: u64,
    /// Maximum documents deleted per sweep statement
    #[serde(default = "default_warm_sweep_batch")]
    pub sweep_batch: usize,
    /// Per-request timeout
    #[serde(default = "default_warm_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Connections in the SQLite pool (forced to 1 for in-memory databases)
    #[serde(default = "default_warm_max_connections")]
    pub max_connections: u32,
    /// Bounded queue depth for access metadata write-back
    #[serde(default = "default_access_queue")]
    pub access_queue: usize,
}

impl Default for WarmConfig {
    fn default() -> Self {
        Self {
            url: default_warm_url(),
            collection: default_warm_collection(),
            batch_limit: default_warm_batch_limit(),
            sweep_interval: default_warm_sweep_interval(),
            sweep_batch: default_warm_sweep_batch(),
            request_timeout_ms: default_warm_request_timeout_ms(),
            max_connections: default_warm_max_connections(),
            access_queue: default_access_queue(),
        }
    }
}

impl WarmConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_warm_url() -> String {
    let path = default_data_dir().join("warm.db");
    format!("sqlite://{}?mode=rwc", path.display())
}

fn default_warm_collection() -> String {
    "memories".to_string()
}

fn default_warm_batch_limit() -> usize {
    500
}

fn default_warm_sweep_interval() -> u64 {
    300
}

fn default_warm_sweep_batch() -> usize {
    500
}

fn default_warm_request_timeout_ms() -> u64 {
    10_000
}

fn default_warm_max_connections() -> u32 {
    5
}

/// Which cold tier implementation to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColdBackend {
    /// LanceDB vector table
    Lance,
    /// Declared no-op tier reporting `not_implemented`
    Stub,
}

/// Cold tier configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ColdConfig {
    #[serde(default = "default_cold_backend")]
    pub backend: ColdBackend,
    /// Directory holding the LanceDB dataset
    #[serde(default = "default_cold_data_dir")]
    pub data_dir: PathBuf,
    /// Table name (the vector collection)
    #[serde(default = "default_cold_table")]
    pub table: String,
    /// Fixed embedding dimensionality
    #[serde(default = "default_vector_dim")]
    pub vector_dim: usize,
    /// Per-request timeout
    #[serde(default = "default_cold_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Bounded queue depth for access metadata write-back
    #[serde(default = "default_access_queue")]
    pub access_queue: usize,
}

impl Default for ColdConfig {
    fn default() -> Self {
        Self {
            backend: default_cold_backend(),
            data_dir: default_cold_data_dir(),
            table: default_cold_table(),
            vector_dim: default_vector_dim(),
            request_timeout_ms: default_cold_request_timeout_ms(),
            access_queue: default_access_queue(),
        }
    }
}

impl ColdConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_cold_backend() -> ColdBackend {
    ColdBackend::Lance
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".strata"))
        .unwrap_or_else(|| PathBuf::from(".strata"))
}

fn default_cold_data_dir() -> PathBuf {
    default_data_dir().join("cold")
}

fn default_cold_table() -> String {
    "memories".to_string()
}

fn default_vector_dim() -> usize {
    384
}

fn default_cold_request_timeout_ms() -> u64 {
    30_000
}

/// L1 (in-process) cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct L1Config {
    /// Capacity before LRU eviction kicks in
    #[serde(default = "default_l1_max_size")]
    pub max_size: usize,
    /// Seconds between lazy expired-entry sweeps
    #[serde(default = "default_l1_cleanup_interval")]
    pub cleanup_interval: u64,
    /// TTL in seconds for L1 records when the caller gives none
    #[serde(default = "default_l1_ttl")]
    pub default_ttl: i64,
}

impl Default for L1Config {
    fn default() -> Self {
        Self {
            max_size: default_l1_max_size(),
            cleanup_interval: default_l1_cleanup_interval(),
            default_ttl: default_l1_ttl(),
        }
    }
}

fn default_l1_max_size() -> usize {
    1000
}

fn default_l1_cleanup_interval() -> u64 {
    60
}

fn default_l1_ttl() -> i64 {
    300
}

/// L2 (distributed) cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct L2Config {
    /// Backend URL; defaults to the hot tier's URL
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_l2_namespace")]
    pub namespace: String,
    /// TTL in seconds for L2 values when the caller gives none (0 = none)
    #[serde(default = "default_l2_ttl")]
    pub default_ttl: i64,
}

impl Default for L2Config {
    fn default() -> Self {
        Self {
            url: None,
            namespace: default_l2_namespace(),
            default_ttl: default_l2_ttl(),
        }
    }
}

fn default_l2_namespace() -> String {
    "strata:l2".to_string()
}

fn default_l2_ttl() -> i64 {
    3600
}

/// Semantic cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SemanticConfig {
    /// Minimum cosine similarity counted as a hit
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Embedding table capacity
    #[serde(default = "default_semantic_max_cache_size")]
    pub max_cache_size: usize,
    /// TTL in seconds for cached answers when the caller gives none
    #[serde(default = "default_semantic_ttl")]
    pub default_ttl: i64,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            max_cache_size: default_semantic_max_cache_size(),
            default_ttl: default_semantic_ttl(),
        }
    }
}

fn default_similarity_threshold() -> f32 {
    0.85
}

fn default_semantic_max_cache_size() -> usize {
    1000
}

fn default_semantic_ttl() -> i64 {
    3600
}

/// Migration policy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    #[serde(default = "default_migration_enabled")]
    pub enabled: bool,
    /// HOT entries idle longer than this move to WARM
    #[serde(default = "default_hot_idle_secs")]
    pub hot_idle_secs: u64,
    /// WARM entries idle longer than this move to COLD
    #[serde(default = "default_warm_idle_secs")]
    pub warm_idle_secs: u64,
    /// Seconds between migration scans
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            enabled: default_migration_enabled(),
            hot_idle_secs: default_hot_idle_secs(),
            warm_idle_secs: default_warm_idle_secs(),
            scan_interval_secs: default_scan_interval_secs(),
        }
    }
}

impl MigrationConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

fn default_migration_enabled() -> bool {
    true
}

fn default_hot_idle_secs() -> u64 {
    3600
}

fn default_warm_idle_secs() -> u64 {
    86_400
}

fn default_scan_interval_secs() -> u64 {
    600
}

/// Bounded exponential backoff for transient failures
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_backoff_multiplier(),
        }
    }
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    50
}

fn default_max_backoff_ms() -> u64 {
    2000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.hot.pool_size, 10);
        assert_eq!(config.hot.ttl_default, 3600);
        assert_eq!(config.warm.batch_limit, 500);
        assert_eq!(config.warm.sweep_interval, 300);
        assert_eq!(config.cold.vector_dim, 384);
        assert_eq!(config.cold.backend, ColdBackend::Lance);
        assert_eq!(config.l1.max_size, 1000);
        assert_eq!(config.l1.cleanup_interval, 60);
        assert_eq!(config.l2.default_ttl, 3600);
        assert!(config.l2.url.is_none());
        assert!((config.semantic.similarity_threshold - 0.85).abs() < f32::EPSILON);
        assert_eq!(config.semantic.max_cache_size, 1000);
        assert_eq!(config.migration.hot_idle_secs, 3600);
        assert_eq!(config.migration.warm_idle_secs, 86_400);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[hot]
url = "redis://:secret@cache.internal:6380/2"
pool_size = 32
ttl_default = 120

[warm]
url = "sqlite::memory:"
batch_limit = 250
sweep_interval = 30

[cold]
backend = "stub"
vector_dim = 1536

[l1]
max_size = 64
cleanup_interval = 5

[l2]
url = "memory://l2"
default_ttl = 900

[semantic]
similarity_threshold = 0.9
max_cache_size = 50

[migration]
enabled = false
hot_idle_secs = 60

[retry]
max_attempts = 5
"#;

        let config: Config = toml::from_str(toml_str).expect("Failed to parse TOML");

        assert_eq!(config.hot.url, "redis://:secret@cache.internal:6380/2");
        assert_eq!(config.hot.pool_size, 32);
        assert_eq!(config.hot.ttl_default, 120);
        assert_eq!(config.warm.url, "sqlite::memory:");
        assert_eq!(config.warm.batch_limit, 250);
        assert_eq!(config.warm.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.cold.backend, ColdBackend::Stub);
        assert_eq!(config.cold.vector_dim, 1536);
        assert_eq!(config.l1.max_size, 64);
        assert_eq!(config.l1.cleanup_interval, 5);
        assert_eq!(config.l2.url.as_deref(), Some("memory://l2"));
        assert_eq!(config.l2.default_ttl, 900);
        assert!((config.semantic.similarity_threshold - 0.9).abs() < f32::EPSILON);
        assert_eq!(config.semantic.max_cache_size, 50);
        assert!(!config.migration.enabled);
        assert_eq!(config.migration.hot_idle_secs, 60);
        assert_eq!(config.migration.warm_idle_secs, 86_400);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_backoff_ms, 50);
    }

    #[test]
    fn test_toml_partial_deserialization() {
        let toml_str = r#"
[l1]
max_size = 2
"#;

        let config: Config = toml::from_str(toml_str).expect("Failed to parse partial TOML");

        assert_eq!(config.l1.max_size, 2);
        assert_eq!(config.l1.default_ttl, 300);
        assert_eq!(config.hot.pool_size, 10);
        assert_eq!(config.hot.namespace, "strata:hot");
        assert_eq!(config.warm.collection, "memories");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.semantic.similarity_threshold = 1.5;
        assert!(matches!(config.validate(), Err(StrataError::Config(_))));

        let mut config = Config::default();
        config.hot.pool_min = 20;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.warm.batch_limit = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.l1.max_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        for toml_str in [
            "[warm]\nsweep_interval = 0\n",
            "[hot]\nhealth_check_interval_secs = 0\n",
            "[migration]\nscan_interval_secs = 0\n",
        ] {
            let config: Config = toml::from_str(toml_str).unwrap();
            assert!(
                matches!(config.validate(), Err(StrataError::Config(_))),
                "{toml_str} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_rejects_overlapping_namespaces() {
        let mut config = Config::default();
        config.hot.namespace = "strata".to_string();
        config.l2.namespace = "strata:l2".to_string();
        assert!(matches!(config.validate(), Err(StrataError::Config(_))));

        config.l2.url = Some(config.hot.url.clone());
        assert!(config.validate().is_err());

        config.l2.namespace = "strata".to_string();
        assert!(config.validate().is_err());

        // Different endpoints never collide.
        config.l2.url = Some("redis://127.0.0.1:6379/1".to_string());
        config.validate().unwrap();

        // Sibling namespaces on one endpoint are fine.
        config.l2.url = None;
        config.l2.namespace = "strata2".to_string();
        config.validate().unwrap();
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[hot]\npool_size = 4\n").unwrap();

        let config = Config::load(Some(&path)).expect("Failed to load config");
        assert_eq!(config.hot.pool_size, 4);

        std::fs::write(&path, "[hot]\npool_size = 0\n").unwrap();
        assert!(Config::from_file(&path).is_err());

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            Config::from_file(&missing),
            Err(StrataError::Config(_))
        ));
    }
}
