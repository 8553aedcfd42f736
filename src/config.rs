use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::constants::{self, intervals, limits};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub catalog: CatalogConfig,

    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,

    /// Port for the Prometheus scrape listener; no listener when unset.
    pub metrics_port: Option<u16>,

    pub loki_enabled: bool,

    pub loki_url: String,

    pub loki_labels: std::collections::HashMap<String, String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        let mut labels = std::collections::HashMap::new();
        labels.insert("app".to_string(), "anipush".to_string());

        Self {
            metrics_enabled: false,
            metrics_port: None,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
            loki_labels: labels,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_path: String,

    pub log_level: String,

    /// Number of tokio worker threads (default: 2)
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,

    /// Maximum database connections (default: 5)
    pub max_db_connections: u32,

    /// Minimum database connections (default: 1)
    pub min_db_connections: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: "sqlite:data/anipush.db".to_string(),
            log_level: "info".to_string(),
            worker_threads: 2,
            max_db_connections: 5,
            min_db_connections: 1,
        }
    }
}

/// Catalog service access and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub api_url: String,

    pub request_timeout_seconds: u64,

    /// Minimum spacing enforced before every outbound request, retries included.
    pub min_request_spacing_ms: u64,

    pub max_attempts: u32,

    /// Wait after the service reports itself unavailable (HTTP 403).
    pub unavailable_wait_secs: u64,

    /// Wait after HTTP 429 when no usable `Retry-After` header is present.
    pub rate_limit_fallback_secs: u64,

    /// Wait after malformed payloads, embedded errors and transport failures.
    pub error_wait_secs: u64,

    /// Ids per bulk lookup request.
    pub batch_size: usize,

    /// Titles per page while scanning for updates.
    pub page_size: u32,

    /// How many times a suspiciously short page is re-fetched before it is accepted.
    pub short_page_retries: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_url: constants::CATALOG_API.to_string(),
            request_timeout_seconds: 30,
            min_request_spacing_ms: intervals::MIN_REQUEST_SPACING_MS,
            max_attempts: 3,
            unavailable_wait_secs: intervals::UNAVAILABLE_WAIT_SECS,
            rate_limit_fallback_secs: intervals::RATE_LIMIT_FALLBACK_SECS,
            error_wait_secs: intervals::ERROR_WAIT_SECS,
            batch_size: limits::DEFAULT_BATCH_SIZE,
            page_size: limits::DEFAULT_PAGE_SIZE,
            short_page_retries: limits::DEFAULT_SHORT_PAGE_RETRIES,
        }
    }
}

impl CatalogConfig {
    #[must_use]
    pub const fn min_request_spacing(&self) -> Duration {
        Duration::from_millis(self.min_request_spacing_ms)
    }

    #[must_use]
    pub const fn unavailable_wait(&self) -> Duration {
        Duration::from_secs(self.unavailable_wait_secs)
    }

    #[must_use]
    pub const fn rate_limit_fallback(&self) -> Duration {
        Duration::from_secs(self.rate_limit_fallback_secs)
    }

    #[must_use]
    pub const fn error_wait(&self) -> Duration {
        Duration::from_secs(self.error_wait_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,

    pub scan_interval_minutes: u32,

    pub cron_expression: Option<String>,

    /// Run subscriber list imports after every scan pass.
    pub sync_subscribers: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_minutes: 60,
            cron_expression: None,
            sync_subscribers: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub telegram_enabled: bool,

    /// Bot token; `ANIPUSH_TELEGRAM_TOKEN` takes precedence when set.
    pub telegram_bot_token: Option<String>,

    pub telegram_api_url: String,

    /// Pause after each delivered message.
    pub send_delay_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            telegram_enabled: false,
            telegram_bot_token: None,
            telegram_api_url: "https://api.telegram.org".to_string(),
            send_delay_ms: intervals::TELEGRAM_SEND_DELAY_MS,
        }
    }
}

impl NotificationConfig {
    #[must_use]
    pub fn bot_token(&self) -> Option<String> {
        std::env::var("ANIPUSH_TELEGRAM_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| self.telegram_bot_token.clone())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            catalog: CatalogConfig::default(),
            scheduler: SchedulerConfig::default(),
            notifications: NotificationConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        paths.push(PathBuf::from("config.toml"));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("anipush").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".anipush").join("config.toml"));
        }

        paths
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = PathBuf::from("config.toml");
        if path.exists() {
            Ok(false)
        } else {
            Self::default().save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.catalog.api_url)
            .with_context(|| format!("Invalid catalog API url: {}", self.catalog.api_url))?;

        if self.catalog.max_attempts == 0 {
            anyhow::bail!("catalog.max_attempts must be at least 1");
        }

        if self.catalog.batch_size == 0 || self.catalog.batch_size > limits::MAX_PER_PAGE as usize
        {
            anyhow::bail!(
                "catalog.batch_size must be between 1 and {}",
                limits::MAX_PER_PAGE
            );
        }

        if self.catalog.page_size == 0 || self.catalog.page_size > limits::MAX_PER_PAGE {
            anyhow::bail!(
                "catalog.page_size must be between 1 and {}",
                limits::MAX_PER_PAGE
            );
        }

        if self.scheduler.enabled
            && self.scheduler.scan_interval_minutes == 0
            && self.scheduler.cron_expression.is_none()
        {
            anyhow::bail!("Scheduler interval must be > 0 or cron expression must be set");
        }

        if self.notifications.telegram_enabled && self.notifications.bot_token().is_none() {
            anyhow::bail!("Telegram notifications are enabled but no bot token is configured");
        }

        Ok(())
    }
}
