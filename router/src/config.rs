//! Configuration for the router.

use std::time::Duration;

use config::{Config as ConfigLoader, Environment, File};
use serde::Deserialize;

/// When a backend's accepted-request slot is handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseMode {
    /// As soon as the backend response has started (or forwarding failed).
    ///
    /// Undercounts true backend load for long-running streams.
    #[default]
    OnStart,
    /// When the response body has been fully relayed (or dropped).
    OnComplete,
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub forwarding: ForwardingConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Worker pool, admission and rebalancing parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Backend chat-completion URLs. Fixed for the lifetime of the process.
    #[serde(default = "default_backends")]
    pub backends: Vec<String>,
    /// Maximum accepted requests per backend.
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// Number of backends serving LONG at baseline. The first
    /// `baseline_long` backends start as LONG, the rest as SHORT.
    #[serde(default = "default_baseline_long")]
    pub baseline_long: usize,
    /// LONG backlog above which a SHORT backend converts to LONG.
    #[serde(default = "default_high_watermark")]
    pub high_watermark: usize,
    /// LONG backlog below which a surplus LONG backend returns to SHORT.
    #[serde(default = "default_low_watermark")]
    pub low_watermark: usize,
    /// Minimum time between two role transitions.
    #[serde(default = "default_rebalance_cooldown")]
    pub rebalance_cooldown_secs: f64,
    /// Minimum idle time before a SHORT backend may take a LONG request.
    #[serde(default = "default_steal_idle_cooldown")]
    pub steal_idle_cooldown_secs: f64,
    /// Rebalancer tick period.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Per-class queue cap. Unset means unbounded.
    #[serde(default)]
    pub max_queue_len: Option<usize>,
    #[serde(default)]
    pub release_mode: ReleaseMode,
    #[serde(default = "default_true")]
    pub enable_stealing: bool,
    #[serde(default = "default_true")]
    pub enable_rebalancing: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            backends: default_backends(),
            concurrency_limit: default_concurrency_limit(),
            baseline_long: default_baseline_long(),
            high_watermark: default_high_watermark(),
            low_watermark: default_low_watermark(),
            rebalance_cooldown_secs: default_rebalance_cooldown(),
            steal_idle_cooldown_secs: default_steal_idle_cooldown(),
            tick_interval_ms: default_tick_interval(),
            max_queue_len: None,
            release_mode: ReleaseMode::default(),
            enable_stealing: true,
            enable_rebalancing: true,
        }
    }
}

impl SchedulerConfig {
    /// Reject configurations the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }
        if self.concurrency_limit == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.baseline_long >= self.backends.len() {
            return Err(ConfigError::NoShortCapacity {
                baseline_long: self.baseline_long,
                backends: self.backends.len(),
            });
        }
        if self.low_watermark > self.high_watermark {
            return Err(ConfigError::Watermarks {
                low: self.low_watermark,
                high: self.high_watermark,
            });
        }
        check_secs("scheduler.rebalance_cooldown_secs", self.rebalance_cooldown_secs)?;
        check_secs("scheduler.steal_idle_cooldown_secs", self.steal_idle_cooldown_secs)?;
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidDuration("scheduler.tick_interval_ms"));
        }
        Ok(())
    }

    pub fn rebalance_cooldown(&self) -> Duration {
        Duration::try_from_secs_f64(self.rebalance_cooldown_secs).unwrap_or(Duration::MAX)
    }

    pub fn steal_idle_cooldown(&self) -> Duration {
        Duration::try_from_secs_f64(self.steal_idle_cooldown_secs).unwrap_or(Duration::MAX)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

fn check_secs(field: &'static str, secs: f64) -> Result<(), ConfigError> {
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) if !duration.is_zero() => Ok(()),
        _ => Err(ConfigError::InvalidDuration(field)),
    }
}

/// Cost classification parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// Estimated cost above which a request is LONG.
    #[serde(default = "default_threshold")]
    pub threshold: usize,
    /// Characters per estimated token.
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            chars_per_token: default_chars_per_token(),
        }
    }
}

/// Outbound HTTP client settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ForwardingConfig {
    /// Whole-request timeout. Unset means wait for the backend indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            pool_max_idle_per_host: default_pool_max_idle(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_window")]
    pub window_secs: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_secs: default_monitor_window(),
            report_interval_secs: default_report_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_backends() -> Vec<String> {
    (8001..=8004)
        .map(|port| format!("http://localhost:{}/v1/chat/completions", port))
        .collect()
}
fn default_concurrency_limit() -> usize {
    8
}
fn default_baseline_long() -> usize {
    2
}
fn default_high_watermark() -> usize {
    10
}
fn default_low_watermark() -> usize {
    2
}
fn default_rebalance_cooldown() -> f64 {
    5.0
}
fn default_steal_idle_cooldown() -> f64 {
    2.0
}
fn default_tick_interval() -> u64 {
    1000
}
fn default_true() -> bool {
    true
}
fn default_threshold() -> usize {
    3000
}
fn default_chars_per_token() -> usize {
    4
}
fn default_pool_max_idle() -> usize {
    100
}
fn default_monitor_window() -> u64 {
    10
}
fn default_report_interval() -> u64 {
    2
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Errors that prevent the router from starting.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("At least one backend must be configured")]
    NoBackends,
    #[error("scheduler.concurrency_limit must be at least 1")]
    ZeroConcurrency,
    #[error("baseline_long={baseline_long} leaves no SHORT backend out of {backends}")]
    NoShortCapacity { baseline_long: usize, backends: usize },
    #[error("low_watermark ({low}) must not exceed high_watermark ({high})")]
    Watermarks { low: usize, high: usize },
    #[error("{0} must be a positive duration")]
    InvalidDuration(&'static str),
    #[error("classifier.chars_per_token must be at least 1")]
    ZeroCharsPerToken,
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (ROUTER__SECTION__KEY format)
    /// 2. The given file, or config.toml if present
    /// 3. Built-in defaults
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name("config").required(false),
        };

        let config: Config = ConfigLoader::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("ROUTER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("scheduler.backends")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        if self.classifier.chars_per_token == 0 {
            return Err(ConfigError::ZeroCharsPerToken);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_matches_reference_deployment() {
        let config = Config::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.scheduler.backends.len(), 4);
        assert_eq!(
            config.scheduler.backends[0],
            "http://localhost:8001/v1/chat/completions"
        );
        assert_eq!(config.scheduler.baseline_long, 2);
        assert_eq!(config.scheduler.high_watermark, 10);
        assert_eq!(config.scheduler.low_watermark, 2);
        assert_eq!(config.scheduler.rebalance_cooldown(), Duration::from_secs(5));
        assert_eq!(config.scheduler.steal_idle_cooldown(), Duration::from_secs(2));
        assert_eq!(config.scheduler.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.scheduler.release_mode, ReleaseMode::OnStart);
        assert!(config.scheduler.max_queue_len.is_none());
        assert!(config.forwarding.timeout_secs.is_none());
        assert_eq!(config.classifier.threshold, 3000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_backend_list() {
        let mut config = Config::default();
        config.scheduler.backends.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoBackends)));
    }

    #[test]
    fn test_rejects_baseline_without_short_capacity() {
        let mut config = Config::default();
        config.scheduler.baseline_long = 4;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoShortCapacity { baseline_long: 4, backends: 4 })
        ));
    }

    #[test]
    fn test_rejects_inverted_watermarks() {
        let mut config = Config::default();
        config.scheduler.low_watermark = 11;
        assert!(matches!(config.validate(), Err(ConfigError::Watermarks { .. })));
    }

    #[test]
    fn test_rejects_bad_durations_and_limits() {
        let mut config = Config::default();
        config.scheduler.rebalance_cooldown_secs = -1.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidDuration(_))));

        let mut config = Config::default();
        config.scheduler.steal_idle_cooldown_secs = f64::NAN;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidDuration(_))));

        // finite but too large for a Duration
        let mut config = Config::default();
        config.scheduler.rebalance_cooldown_secs = 1e30;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDuration("scheduler.rebalance_cooldown_secs"))
        ));
        assert_eq!(config.scheduler.rebalance_cooldown(), Duration::MAX);

        let mut config = Config::default();
        config.scheduler.steal_idle_cooldown_secs = 1e-12;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidDuration(_))));

        let mut config = Config::default();
        config.scheduler.concurrency_limit = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroConcurrency)));

        let mut config = Config::default();
        config.classifier.chars_per_token = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroCharsPerToken)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 6000

[scheduler]
backends = ["http://a/v1/chat/completions", "http://b/v1/chat/completions"]
baseline_long = 1
concurrency_limit = 1
release_mode = "on_complete"
max_queue_len = 64

[classifier]
threshold = 1000
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.scheduler.backends.len(), 2);
        assert_eq!(config.scheduler.concurrency_limit, 1);
        assert_eq!(config.scheduler.release_mode, ReleaseMode::OnComplete);
        assert_eq!(config.scheduler.max_queue_len, Some(64));
        assert_eq!(config.classifier.threshold, 1000);
        // untouched values keep their defaults
        assert_eq!(config.scheduler.high_watermark, 10);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[scheduler]\nbackends = []").unwrap();

        let path = file.path().to_str().unwrap().to_string();
        assert!(matches!(Config::load(Some(&path)), Err(ConfigError::NoBackends)));
    }
}
