use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub payment: PaymentConfig,
    pub audit: AuditConfig,
    pub reporting: ReportingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://wallet.db".to_string(),
            max_connections: 5,
            busy_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PaymentConfig {
    /// How often overdue payment tokens are swept to `expired`.
    pub sweep_interval_secs: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditSinkKind {
    Database,
    Log,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuditConfig {
    pub enabled: bool,
    pub sink: AuditSinkKind,
    pub channel_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sink: AuditSinkKind::Database,
            channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReportingConfig {
    /// Offset used to decide where "today" starts (campus local time).
    pub utc_offset_hours: i32,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: 7,
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        let defaults = Config::default();

        let mut builder = config::Config::builder()
            .set_default("database.url", defaults.database.url)?
            .set_default("database.max_connections", defaults.database.max_connections as i64)?
            .set_default("database.busy_timeout_secs", defaults.database.busy_timeout_secs as i64)?
            .set_default("payment.sweep_interval_secs", defaults.payment.sweep_interval_secs as i64)?
            .set_default("audit.enabled", defaults.audit.enabled)?
            .set_default("audit.sink", "database")?
            .set_default("audit.channel_capacity", defaults.audit.channel_capacity as i64)?
            .set_default("reporting.utc_offset_hours", defaults.reporting.utc_offset_hours as i64)?
            .set_default("reporting.default_page_size", defaults.reporting.default_page_size as i64)?
            .set_default("reporting.max_page_size", defaults.reporting.max_page_size as i64)?;

        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        builder = builder.add_source(Environment::with_prefix("WALLET_ENGINE").separator("__"));

        if let Ok(db_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", db_url)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.is_empty() {
            return Err("Database URL is required".to_string());
        }

        if self.database.max_connections == 0 {
            return Err("Database pool needs at least one connection".to_string());
        }

        if self.payment.sweep_interval_secs == 0 {
            return Err("Token sweep interval cannot be 0".to_string());
        }

        if self.audit.enabled && self.audit.channel_capacity == 0 {
            return Err("Audit channel capacity cannot be 0".to_string());
        }

        if !(-12..=14).contains(&self.reporting.utc_offset_hours) {
            return Err(format!(
                "Reporting UTC offset {} is out of range",
                self.reporting.utc_offset_hours
            ));
        }

        if self.reporting.default_page_size == 0
            || self.reporting.default_page_size > self.reporting.max_page_size
        {
            return Err("Default page size must be between 1 and the max page size".to_string());
        }

        Ok(())
    }
}
