use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

// ── Top-level config ──────────────────────────────────────────────

/// Top-level convoy configuration, loaded from `config.toml`.
///
/// Resolution order: `--config` flag → `~/.convoy/config.toml` → built-in defaults.
/// `CONVOY_*` environment variables are applied on top of whichever source won.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Path the config was read from - computed, not serialized
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// Session pool tuning (`[pool]`).
    #[serde(default)]
    pub pool: PoolConfig,

    /// Logging configuration (`[observability]`).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ── Pool ──────────────────────────────────────────────────────────

/// What a session worker does with tasks still buffered when its session is evicted.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClosePolicy {
    /// Run every buffered task, in order, before acknowledging the close.
    #[default]
    Drain,
    /// Drop buffered tasks without running them.
    Discard,
}

impl ClosePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Drain => "drain",
            Self::Discard => "discard",
        }
    }
}

impl std::str::FromStr for ClosePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drain" => Ok(Self::Drain),
            "discard" => Ok(Self::Discard),
            other => anyhow::bail!("Unknown close policy '{other}'. Supported values: drain, discard"),
        }
    }
}

/// Per-key session pool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    /// Inactivity window after which an idle session is evicted, in milliseconds.
    /// Default: `180000` (3 minutes, the NAT mapping timeout).
    #[serde(default = "default_nat_timeout_ms")]
    pub nat_timeout_ms: u64,

    /// Capacity of each session's pending-task buffer. Submitters block when it is full.
    /// Default: `128`.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Maximum number of released buffers kept for reuse. `0` disables reuse.
    /// Default: `256`.
    #[serde(default = "default_max_idle_buffers")]
    pub max_idle_buffers: usize,

    /// Fate of tasks still buffered at eviction time. Default: `drain`.
    #[serde(default)]
    pub close_policy: ClosePolicy,
}

fn default_nat_timeout_ms() -> u64 {
    180_000
}

fn default_queue_capacity() -> usize {
    128
}

fn default_max_idle_buffers() -> usize {
    256
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            nat_timeout_ms: default_nat_timeout_ms(),
            queue_capacity: default_queue_capacity(),
            max_idle_buffers: default_max_idle_buffers(),
            close_policy: ClosePolicy::default(),
        }
    }
}

impl PoolConfig {
    /// The inactivity window as a [`Duration`].
    pub fn nat_timeout(&self) -> Duration {
        Duration::from_millis(self.nat_timeout_ms)
    }

    /// Builder-style override of the inactivity window.
    pub fn with_nat_timeout(mut self, timeout: Duration) -> Self {
        self.nat_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Builder-style override of the per-session buffer capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Builder-style override of the close policy.
    pub fn with_close_policy(mut self, policy: ClosePolicy) -> Self {
        self.close_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.nat_timeout_ms == 0 {
            anyhow::bail!("pool.nat_timeout_ms must be greater than 0");
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("pool.queue_capacity must be greater than 0");
        }
        Ok(())
    }
}

// ── Observability ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_log_filter() -> String {
    "info".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────

impl Config {
    /// `~/.convoy/config.toml`, or `None` when no home directory can be resolved.
    pub fn default_path() -> Option<PathBuf> {
        UserDirs::new().map(|dirs| dirs.home_dir().join(".convoy").join("config.toml"))
    }

    /// Parse a config from TOML text. Env overrides are not applied.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config = Self::parse_toml(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn parse_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse config file")
    }

    /// Load a config file that must exist.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::parse_toml(&contents)?;
        config.config_path = Some(path.to_path_buf());
        // Overrides may repair a bad file value, so validate the merged result.
        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Load `path` (or the default path). A missing file yields defaults.
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let resolved = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path(),
        };

        if let Some(resolved) = resolved {
            if fs::try_exists(&resolved).await.unwrap_or(false) {
                return Self::load(&resolved).await;
            }
            if path.is_some() {
                anyhow::bail!("Config file {} does not exist", resolved.display());
            }
        }

        let mut config = Config::default();
        config.apply_env_overrides();
        config.validate()?;
        tracing::debug!("No config file found; using defaults");
        Ok(config)
    }

    /// Apply `CONVOY_*` environment overrides. Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(ms) = env_parse::<u64>("CONVOY_NAT_TIMEOUT_MS") {
            self.pool.nat_timeout_ms = ms;
        }
        if let Some(capacity) = env_parse::<usize>("CONVOY_QUEUE_CAPACITY") {
            self.pool.queue_capacity = capacity;
        }
        if let Some(max) = env_parse::<usize>("CONVOY_MAX_IDLE_BUFFERS") {
            self.pool.max_idle_buffers = max;
        }
        if let Some(policy) = env_parse::<ClosePolicy>("CONVOY_CLOSE_POLICY") {
            self.pool.close_policy = policy;
        }
        if let Ok(filter) = std::env::var("CONVOY_LOG") {
            if !filter.trim().is_empty() {
                self.observability.log_filter = filter;
            }
        }
    }

    /// Validate configuration values that would cause runtime failures.
    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        if self.observability.log_filter.trim().is_empty() {
            anyhow::bail!("observability.log_filter must not be empty");
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

fn env_parse<T>(name: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring {name}={raw:?}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_nat_constants() {
        let pool = PoolConfig::default();
        assert_eq!(pool.nat_timeout(), Duration::from_secs(180));
        assert_eq!(pool.queue_capacity, 128);
        assert_eq!(pool.close_policy, ClosePolicy::Drain);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = Config::from_toml("[pool]\nqueue_capacity = 8\n").unwrap();
        assert_eq!(config.pool.queue_capacity, 8);
        assert_eq!(config.pool.nat_timeout_ms, 180_000);
        assert_eq!(config.observability.log_filter, "info");
    }

    #[test]
    fn close_policy_parses_snake_case() {
        let config = Config::from_toml("[pool]\nclose_policy = \"discard\"\n").unwrap();
        assert_eq!(config.pool.close_policy, ClosePolicy::Discard);
        assert_eq!("DRAIN".parse::<ClosePolicy>().unwrap(), ClosePolicy::Drain);
        assert!("later".parse::<ClosePolicy>().is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = Config::from_toml("[pool]\nnat_timeout_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("nat_timeout_ms"));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let pool = PoolConfig::default().with_queue_capacity(0);
        assert!(pool.validate().is_err());
    }

    #[test]
    fn toml_round_trip_preserves_pool_section() {
        let mut config = Config::default();
        config.pool = PoolConfig::default()
            .with_nat_timeout(Duration::from_millis(50))
            .with_close_policy(ClosePolicy::Discard);
        let text = config.to_toml().unwrap();
        let parsed = Config::from_toml(&text).unwrap();
        assert_eq!(parsed.pool, config.pool);
    }

    #[tokio::test]
    async fn load_reads_file_and_records_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pool]\nnat_timeout_ms = 250\nmax_idle_buffers = 4").unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(config.pool.max_idle_buffers, 4);
        assert_eq!(config.config_path.as_deref(), Some(file.path()));
    }

    #[tokio::test]
    async fn env_override_replaces_invalid_file_value() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pool]\nnat_timeout_ms = 0").unwrap();

        std::env::set_var("CONVOY_NAT_TIMEOUT_MS", "75");
        let loaded = Config::load(file.path()).await;
        std::env::remove_var("CONVOY_NAT_TIMEOUT_MS");

        let config = loaded.unwrap();
        assert_eq!(config.pool.nat_timeout_ms, 75);
    }

    #[tokio::test]
    async fn explicit_missing_path_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = Config::load_or_default(Some(&missing)).await.unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
