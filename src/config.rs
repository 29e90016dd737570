//! Configuration loading and management.
//!
//! Loads courier configuration from `./courier.toml` (or the file named by
//! `$COURIER_CONFIG_PATH`). Environment variables override file values; file
//! values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

// ── Top-level config ────────────────────────────────────────────

/// Top-level courier configuration loaded from TOML.
///
/// Path: `./courier.toml` or `$COURIER_CONFIG_PATH`.
/// Env vars override file values; file values override defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// Default log level when `RUST_LOG` is unset.
    pub log_level: LogLevel,
    /// Batch pricing constants (`[pricing]`).
    pub pricing: PricingConfig,
    /// Dispatch worker tuning (`[dispatch]`).
    pub dispatch: DispatchConfig,
    /// Outbound carrier credentials and endpoints (`[provider]`).
    pub provider: ProviderConfig,
    /// Filesystem paths for persistent state (`[paths]`).
    pub paths: PathsConfig,
}

/// Log level newtype so the top-level key deserializes from a bare string.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct LogLevel(pub String);

impl Default for LogLevel {
    fn default() -> Self {
        Self("info".to_owned())
    }
}

impl CourierConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$COURIER_CONFIG_PATH` or `./courier.toml`.
    /// If the file does not exist, defaults are used.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed,
    /// or if the resulting configuration fails validation.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load from the TOML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: CourierConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(CourierConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve the config path using a custom env resolver (for testing).
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("COURIER_CONFIG_PATH").map_or_else(|| PathBuf::from("courier.toml"), PathBuf::from)
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("COURIER_LOG_LEVEL") {
            self.log_level = LogLevel(v);
        }

        // Pricing.
        if let Some(v) = env("COURIER_PRICE_PER_SEGMENT") {
            match v.parse() {
                Ok(n) => self.pricing.price_per_segment_mills = n,
                Err(_) => tracing::warn!(
                    var = "COURIER_PRICE_PER_SEGMENT",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("COURIER_DEFAULT_REGION") {
            self.pricing.default_region = v;
        }
        if let Some(v) = env("COURIER_ALLOWED_REGION") {
            self.pricing.allowed_region = v;
        }

        // Dispatch.
        if let Some(v) = env("SEND_DELAY_MS") {
            match v.parse() {
                Ok(n) => self.dispatch.throttle_ms = n,
                Err(_) => tracing::warn!(
                    var = "SEND_DELAY_MS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }

        // Provider credentials follow the carrier's conventional names.
        if let Some(v) = env("TWILIO_ACCOUNT_SID") {
            self.provider.account_sid = v;
        }
        if let Some(v) = env("TWILIO_AUTH_TOKEN") {
            self.provider.auth_token = v;
        }
        if let Some(v) = env("TWILIO_FROM") {
            self.provider.from_number = v;
        }
        if let Some(v) = env("PUBLIC_WEBHOOK_URL") {
            self.provider.public_webhook_url = v;
        }
        if let Some(v) = env("COURIER_PROVIDER_URL") {
            self.provider.base_url = v;
        }

        // Paths.
        if let Some(v) = env("COURIER_DATA_DIR") {
            self.paths.data_dir = v;
        }
    }

    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid field found.
    pub fn validate(&self) -> Result<()> {
        if self.pricing.price_per_segment_mills <= 0 {
            anyhow::bail!("pricing.price_per_segment_mills must be positive");
        }
        if self.pricing.opening_balance_mills < 0 {
            anyhow::bail!("pricing.opening_balance_mills must not be negative");
        }
        if self.pricing.allowed_region.trim().is_empty() {
            anyhow::bail!("pricing.allowed_region must not be empty");
        }
        if self.dispatch.max_attempts == 0 {
            anyhow::bail!("dispatch.max_attempts must be at least 1");
        }
        if !self.provider.public_webhook_url.is_empty() {
            url::Url::parse(&self.provider.public_webhook_url)
                .context("provider.public_webhook_url is not a valid URL")?;
        }
        Ok(())
    }
}

// ── Pricing ─────────────────────────────────────────────────────

/// Batch pricing constants.
///
/// The per-segment price is fixed here rather than accepted from callers,
/// so a batch submission cannot influence its own pricing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Price of one message segment, in mills (1/1000 currency unit).
    pub price_per_segment_mills: i64,
    /// Balance seeded into a fresh ledger, in mills.
    pub opening_balance_mills: i64,
    /// Region used to interpret addresses without an explicit country code.
    pub default_region: String,
    /// The single region batches are allowed to target.
    pub allowed_region: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            price_per_segment_mills: 50,
            opening_balance_mills: 100_000,
            default_region: "IN".to_owned(),
            allowed_region: "IN".to_owned(),
        }
    }
}

// ── Dispatch ────────────────────────────────────────────────────

/// Dispatch worker tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Sleep between completed attempts for any recipient, in milliseconds.
    /// Bounds the outbound call rate regardless of retry activity.
    pub throttle_ms: u64,
    /// Baseline attempt budget per recipient.
    pub max_attempts: u32,
    /// Extra attempts granted on top of the baseline for transient
    /// carrier failures (rate limits, server errors).
    pub transient_extra_attempts: u32,
    /// Exponential backoff base for transient failures, in milliseconds.
    pub backoff_base_ms: u64,
    /// Exponential backoff ceiling, in milliseconds.
    pub backoff_cap_ms: u64,
    /// Linear backoff step between retries of non-transient failures,
    /// in milliseconds.
    pub terminal_backoff_step_ms: u64,
    /// Pause before retrying after a storage failure, in milliseconds.
    pub storage_retry_delay_ms: u64,
    /// Re-queue `sending` recipients whose lease is older than this at
    /// startup. Zero re-queues all of them: at process start nothing from
    /// this process can still be in flight.
    pub resume_requeue_grace_secs: u64,
    /// A job's worker lease is reclaimable once older than this.
    pub lease_stale_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            throttle_ms: 250,
            max_attempts: 4,
            transient_extra_attempts: 4,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
            terminal_backoff_step_ms: 500,
            storage_retry_delay_ms: 2_000,
            resume_requeue_grace_secs: 0,
            lease_stale_secs: 300,
        }
    }
}

impl DispatchConfig {
    /// Throttle interval between completed attempts.
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    /// Pause before retrying a failed storage operation.
    pub fn storage_retry_delay(&self) -> Duration {
        Duration::from_millis(self.storage_retry_delay_ms)
    }

    /// Startup grace period for re-queueing `sending` recipients.
    pub fn resume_requeue_grace(&self) -> Duration {
        Duration::from_secs(self.resume_requeue_grace_secs)
    }

    /// Age after which a job's worker lease may be reclaimed.
    pub fn lease_stale(&self) -> Duration {
        Duration::from_secs(self.lease_stale_secs)
    }
}

// ── Provider ────────────────────────────────────────────────────

/// Outbound carrier credentials and endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Carrier API base URL.
    pub base_url: String,
    /// Account identifier. Empty means the provider is not configured.
    pub account_sid: String,
    /// API auth token. Empty means the provider is not configured.
    pub auth_token: String,
    /// Sender number messages are dispatched from. Empty lets the carrier
    /// pick its account default.
    pub from_number: String,
    /// Publicly reachable base URL for delivery-status callbacks.
    /// Empty disables callbacks.
    pub public_webhook_url: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.twilio.com".to_owned(),
            account_sid: String::new(),
            auth_token: String::new(),
            from_number: String::new(),
            public_webhook_url: String::new(),
        }
    }
}

impl ProviderConfig {
    /// Full delivery-status callback URL, or `None` when no public webhook
    /// base is configured.
    pub fn status_callback_url(&self) -> Option<String> {
        if self.public_webhook_url.is_empty() {
            return None;
        }
        let base = self.public_webhook_url.trim_end_matches('/');
        Some(format!("{base}/api/carrier/status"))
    }
}

// ── Paths ───────────────────────────────────────────────────────

/// Filesystem paths for persistent state.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Data directory. Empty resolves to the platform default
    /// (e.g. `~/.local/share/courier`).
    pub data_dir: String,
    /// Database file name inside the data directory.
    pub db_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            db_file: "courier.db".to_owned(),
        }
    }
}

/// Resolved runtime paths, with directories created.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// Root data directory.
    pub data_dir: PathBuf,
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Directory for rotated log files.
    pub logs_dir: PathBuf,
}

impl PathsConfig {
    /// Resolve concrete paths and create the data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if no data directory can be determined or it
    /// cannot be created.
    pub fn resolve(&self) -> Result<RuntimePaths> {
        let data_dir = if self.data_dir.is_empty() {
            directories::ProjectDirs::from("", "", "courier")
                .context("could not determine a data directory for this platform")?
                .data_dir()
                .to_path_buf()
        } else {
            PathBuf::from(&self.data_dir)
        };
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

        let logs_dir = data_dir.join("logs");
        let db_path = data_dir.join(&self.db_file);
        Ok(RuntimePaths {
            data_dir,
            db_path,
            logs_dir,
        })
    }
}
