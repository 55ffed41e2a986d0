//! Configuration for MailFleet

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Provider routing configuration
    #[serde(default)]
    pub router: RouterConfig,

    /// Per-provider circuit breaker configuration
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Background health check configuration
    #[serde(default)]
    pub health: HealthCheckConfig,

    /// Campaign execution configuration
    #[serde(default)]
    pub campaign: CampaignConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Delivery providers, in declaration order
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

/// Provider routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Maximum number of providers tried for a single message
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Timeout for a single provider send in seconds
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

impl RouterConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

fn default_max_attempts() -> usize {
    3
}

fn default_send_timeout() -> u64 {
    30
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of failures inside the monitoring window that opens the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Rolling window for counting failures (seconds)
    #[serde(default = "default_monitoring_window")]
    pub monitoring_window_secs: u64,

    /// How long an open circuit waits after the last failure before a trial (seconds)
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            monitoring_window_secs: default_monitoring_window(),
            reset_timeout_secs: default_reset_timeout(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn monitoring_window(&self) -> Duration {
        Duration::from_secs(self.monitoring_window_secs)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_monitoring_window() -> u64 {
    60
}

fn default_reset_timeout() -> u64 {
    60
}

/// Health check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Run the background health poll
    #[serde(default = "default_health_enabled")]
    pub enabled: bool,

    /// Interval between health polls (seconds)
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,

    /// Timeout for a single provider probe (seconds)
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: default_health_enabled(),
            interval_secs: default_health_interval(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

fn default_health_enabled() -> bool {
    true
}

fn default_health_interval() -> u64 {
    60
}

fn default_probe_timeout() -> u64 {
    10
}

/// Campaign execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Batch size used when a campaign does not set one
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,

    /// Maximum concurrent sends within one batch
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Accept schedule times in the past (test/bypass mode)
    #[serde(default)]
    pub allow_past_schedule: bool,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            default_batch_size: default_batch_size(),
            worker_concurrency: default_worker_concurrency(),
            allow_past_schedule: false,
        }
    }
}

fn default_batch_size() -> usize {
    100
}

fn default_worker_concurrency() -> usize {
    10
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Kind of traffic a provider is suited for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFeature {
    Transactional,
    Marketing,
    Analytics,
    Templates,
}

/// Delivery provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider name
    pub name: String,

    /// Disabled providers are not registered
    #[serde(default = "default_provider_enabled")]
    pub enabled: bool,

    /// Static reliability estimate between 0.0 and 1.0
    #[serde(default = "default_reliability")]
    pub reliability: f64,

    /// Traffic the provider is suited for
    #[serde(default)]
    pub features: Vec<ProviderFeature>,

    /// Transport-specific settings
    #[serde(flatten)]
    pub transport: ProviderTransport,
}

fn default_provider_enabled() -> bool {
    true
}

fn default_reliability() -> f64 {
    0.9
}

/// Transport used to reach a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderTransport {
    Smtp(SmtpProviderConfig),
    Http(HttpProviderConfig),
}

/// SMTP relay provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpProviderConfig {
    /// Relay host
    pub host: String,

    /// Relay port
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    pub username: Option<String>,

    pub password: Option<String>,

    /// Connection security
    #[serde(default)]
    pub security: SmtpSecurity,

    /// Command timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_smtp_port() -> u16 {
    587
}

/// SMTP connection security
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmtpSecurity {
    /// Implicit TLS
    Tls,
    /// Plain connection upgraded with STARTTLS
    #[default]
    StartTls,
    /// Unencrypted; local relays only
    None,
}

/// HTTP API provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpProviderConfig {
    /// Endpoint accepting a single message
    pub endpoint: String,

    /// Endpoint accepting a batch of messages; enables native bulk send
    pub bulk_endpoint: Option<String>,

    /// Endpoint probed by health checks; falls back to `endpoint`
    pub health_url: Option<String>,

    /// Bearer token
    pub api_key: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_provider_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from a file, with `MAILFLEET__` environment overrides
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(::config::Environment::with_prefix("MAILFLEET").separator("__"))
            .build()
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default locations
    pub fn load() -> crate::Result<Self> {
        let paths = [
            PathBuf::from("./mailfleet.toml"),
            PathBuf::from("/etc/mailfleet/mailfleet.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> crate::Result<()> {
        if self.router.max_attempts == 0 {
            return Err(crate::Error::Config(
                "router.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(crate::Error::Config(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }

        if self.health.interval_secs == 0 {
            return Err(crate::Error::Config(
                "health.interval_secs must be at least 1".to_string(),
            ));
        }

        if self.campaign.default_batch_size == 0 || self.campaign.worker_concurrency == 0 {
            return Err(crate::Error::Config(
                "campaign batch size and worker concurrency must be at least 1".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(crate::Error::Config("Provider name is required".to_string()));
            }
            if !names.insert(provider.name.as_str()) {
                return Err(crate::Error::Config(format!(
                    "Duplicate provider name: {}",
                    provider.name
                )));
            }
            if !(0.0..=1.0).contains(&provider.reliability) {
                return Err(crate::Error::Config(format!(
                    "Provider {} reliability must be between 0 and 1",
                    provider.name
                )));
            }
        }

        Ok(())
    }
}
