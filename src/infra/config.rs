//! Configuration loading from TOML files
//!
//! The binary's `--config` flag selects the file (falling back to the
//! CONFIG_FILE environment variable, then config/dev.toml); loading a
//! missing or invalid file falls back to the defaults below.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    /// Operator identifier included in every emitted event
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "flotilla".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SharesConfig {
    /// Share count applied when a yacht is created without an explicit one
    #[serde(default = "default_total_shares")]
    pub default_total_shares: u32,
    /// Fraction of the charter year usable after maintenance/shared downtime.
    /// The source of record is inconsistent here; 1.0 yields 73 days for a
    /// 1/5 share and is a placeholder pending confirmation.
    #[serde(default = "default_utilization_factor")]
    pub utilization_factor: f64,
    /// Engine hours granted per yacht per year, split across shares
    #[serde(default = "default_annual_engine_hours")]
    pub annual_engine_hours: f64,
}

impl Default for SharesConfig {
    fn default() -> Self {
        Self {
            default_total_shares: default_total_shares(),
            utilization_factor: default_utilization_factor(),
            annual_engine_hours: default_annual_engine_hours(),
        }
    }
}

fn default_total_shares() -> u32 {
    5
}

fn default_utilization_factor() -> f64 {
    1.0
}

fn default_annual_engine_hours() -> f64 {
    250.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct RofrConfig {
    /// Days co-owners hold the right of first refusal on a published listing
    #[serde(default = "default_rofr_window_days")]
    pub window_days: i64,
}

impl Default for RofrConfig {
    fn default() -> Self {
        Self { window_days: default_rofr_window_days() }
    }
}

fn default_rofr_window_days() -> i64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaitlistConfig {
    /// Entries expire after this many days without a match
    #[serde(default = "default_waitlist_ttl_days")]
    pub ttl_days: i64,
    /// Hours a waitlisted buyer has to respond to an offer
    #[serde(default = "default_response_window_hours")]
    pub response_window_hours: i64,
}

impl Default for WaitlistConfig {
    fn default() -> Self {
        Self {
            ttl_days: default_waitlist_ttl_days(),
            response_window_hours: default_response_window_hours(),
        }
    }
}

fn default_waitlist_ttl_days() -> i64 {
    90
}

fn default_response_window_hours() -> i64 {
    48
}

#[derive(Debug, Clone, Deserialize)]
pub struct FuelConfig {
    /// Balance below which a low-balance event is emitted (cents)
    #[serde(default = "default_low_balance_threshold_cents")]
    pub low_balance_threshold_cents: u64,
    /// Amount credited by an automatic top-up (cents)
    #[serde(default = "default_auto_topup_amount_cents")]
    pub auto_topup_amount_cents: u64,
    /// Estimated fuel cost charged per engine hour consumed (cents)
    #[serde(default = "default_cost_per_engine_hour_cents")]
    pub cost_per_engine_hour_cents: u64,
}

impl Default for FuelConfig {
    fn default() -> Self {
        Self {
            low_balance_threshold_cents: default_low_balance_threshold_cents(),
            auto_topup_amount_cents: default_auto_topup_amount_cents(),
            cost_per_engine_hour_cents: default_cost_per_engine_hour_cents(),
        }
    }
}

fn default_low_balance_threshold_cents() -> u64 {
    10_000
}

fn default_auto_topup_amount_cents() -> u64 {
    50_000
}

fn default_cost_per_engine_hour_cents() -> u64 {
    4_500
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeLogConfig {
    /// File path for settled trades (JSONL format)
    #[serde(default = "default_trade_log_file")]
    pub file: String,
}

impl Default for TradeLogConfig {
    fn default() -> Self {
        Self { file: default_trade_log_file() }
    }
}

fn default_trade_log_file() -> String {
    "trades.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub shares: SharesConfig,
    #[serde(default)]
    pub rofr: RofrConfig,
    #[serde(default)]
    pub waitlist: WaitlistConfig,
    #[serde(default)]
    pub fuel: FuelConfig,
    #[serde(default)]
    pub trade_log: TradeLogConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the engine
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    default_total_shares: u32,
    utilization_factor: f64,
    annual_engine_hours: f64,
    rofr_window_days: i64,
    waitlist_ttl_days: i64,
    waitlist_response_window_hours: i64,
    fuel_low_balance_threshold_cents: u64,
    fuel_auto_topup_amount_cents: u64,
    fuel_cost_per_engine_hour_cents: u64,
    trade_log_file: String,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            default_total_shares: default_total_shares(),
            utilization_factor: default_utilization_factor(),
            annual_engine_hours: default_annual_engine_hours(),
            rofr_window_days: default_rofr_window_days(),
            waitlist_ttl_days: default_waitlist_ttl_days(),
            waitlist_response_window_hours: default_response_window_hours(),
            fuel_low_balance_threshold_cents: default_low_balance_threshold_cents(),
            fuel_auto_topup_amount_cents: default_auto_topup_amount_cents(),
            fuel_cost_per_engine_hour_cents: default_cost_per_engine_hour_cents(),
            trade_log_file: default_trade_log_file(),
            metrics_interval_secs: default_metrics_interval_secs(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self {
            site_id: toml_config.site.id,
            default_total_shares: toml_config.shares.default_total_shares,
            utilization_factor: toml_config.shares.utilization_factor,
            annual_engine_hours: toml_config.shares.annual_engine_hours,
            rofr_window_days: toml_config.rofr.window_days,
            waitlist_ttl_days: toml_config.waitlist.ttl_days,
            waitlist_response_window_hours: toml_config.waitlist.response_window_hours,
            fuel_low_balance_threshold_cents: toml_config.fuel.low_balance_threshold_cents,
            fuel_auto_topup_amount_cents: toml_config.fuel.auto_topup_amount_cents,
            fuel_cost_per_engine_hour_cents: toml_config.fuel.cost_per_engine_hour_cents,
            trade_log_file: toml_config.trade_log.file,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn default_total_shares(&self) -> u32 {
        self.default_total_shares
    }

    pub fn utilization_factor(&self) -> f64 {
        self.utilization_factor
    }

    pub fn annual_engine_hours(&self) -> f64 {
        self.annual_engine_hours
    }

    pub fn rofr_window_days(&self) -> i64 {
        self.rofr_window_days
    }

    pub fn waitlist_ttl_days(&self) -> i64 {
        self.waitlist_ttl_days
    }

    pub fn waitlist_response_window_hours(&self) -> i64 {
        self.waitlist_response_window_hours
    }

    pub fn fuel_low_balance_threshold_cents(&self) -> u64 {
        self.fuel_low_balance_threshold_cents
    }

    pub fn fuel_auto_topup_amount_cents(&self) -> u64 {
        self.fuel_auto_topup_amount_cents
    }

    pub fn fuel_cost_per_engine_hour_cents(&self) -> u64 {
        self.fuel_cost_per_engine_hour_cents
    }

    pub fn trade_log_file(&self) -> &str {
        &self.trade_log_file
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to redirect the trade log
    pub fn with_trade_log_file(mut self, path: &str) -> Self {
        self.trade_log_file = path.to_string();
        self
    }
}
