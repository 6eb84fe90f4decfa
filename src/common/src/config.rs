//! Configuration loading (C10): a YAML file merged with environment variable
//! overrides. Missing file is tolerated (falls back to an empty document);
//! a malformed file or a missing required value is a fatal [`ConfigError`].
//!
//! Produces one immutable [`Config`] handed to every component at construction;
//! nothing re-reads configuration at runtime.

use std::collections::HashMap;
use std::env;
use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_yaml::Value;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct VenueConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub cache_seconds: u64,
    pub min_similarity: f64,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone)]
pub struct ArbitrageConfig {
    pub min_arbitrage_threshold: Decimal,
    pub scan_interval_secs: u64,
    pub cooldown_minutes: i64,
    pub trading_fee: Decimal,
    pub derived_quote_penalty_pct: Decimal,
    pub stale_opportunity_scans: u32,
}

#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub host: String,
    pub port: u16,
}

/// The fully resolved, immutable application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub arbitrage: ArbitrageConfig,
    pub venues: HashMap<String, VenueConfig>,
    pub telegram: TelegramConfig,
    pub dashboard: DashboardConfig,
}

fn str_from(value: &Value, path: &[&str], default: &str) -> String {
    lookup(value, path)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| default.to_string())
}

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for key in path {
        current = current.as_mapping()?.get(Value::String((*key).to_string()))?;
    }
    Some(current)
}

fn env_override(key: &str, current: String) -> String {
    env::var(key).unwrap_or(current)
}

fn env_override_opt(key: &str, current: Option<String>) -> Option<String> {
    env::var(key).ok().or(current)
}

fn parse_decimal(raw: &str, key: &str) -> Result<Decimal, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("{raw:?} is not a valid decimal"),
    })
}

fn parse_u64(raw: &str, key: &str) -> Result<u64, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("{raw:?} is not a valid integer"),
    })
}

impl Config {
    /// Load from `path`, tolerating a missing file, then apply environment overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let doc = if Path::new(path).exists() {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_string(),
                source,
            })?;
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Yaml {
                path: path.to_string(),
                source,
            })?
        } else {
            Value::Null
        };
        Self::from_value(doc)
    }

    fn from_value(doc: Value) -> Result<Self, ConfigError> {
        let min_threshold_raw = env_override(
            "MIN_ARBITRAGE_THRESHOLD",
            str_from(&doc, &["arbitrage", "min_arbitrage_threshold"], "2.0"),
        );
        let trading_fee_raw = env_override(
            "TRADING_FEE",
            str_from(&doc, &["arbitrage", "trading_fee"], "0.005"),
        );
        let derived_penalty_raw = env_override(
            "DERIVED_QUOTE_PENALTY_PCT",
            str_from(&doc, &["arbitrage", "derived_quote_penalty_pct"], "1.0"),
        );
        let scan_interval_raw = env_override(
            "SCAN_INTERVAL",
            str_from(&doc, &["arbitrage", "scan_interval"], "15"),
        );
        let cooldown_raw = env_override(
            "COOLDOWN_MINUTES",
            str_from(&doc, &["arbitrage", "cooldown_minutes"], "5"),
        );
        let stale_scans_raw = env_override(
            "STALE_OPPORTUNITY_SCANS",
            str_from(&doc, &["arbitrage", "stale_opportunity_scans"], "10"),
        );

        let arbitrage = ArbitrageConfig {
            min_arbitrage_threshold: parse_decimal(&min_threshold_raw, "arbitrage.min_arbitrage_threshold")?,
            trading_fee: parse_decimal(&trading_fee_raw, "arbitrage.trading_fee")?,
            derived_quote_penalty_pct: parse_decimal(
                &derived_penalty_raw,
                "arbitrage.derived_quote_penalty_pct",
            )?,
            scan_interval_secs: parse_u64(&scan_interval_raw, "arbitrage.scan_interval")?,
            cooldown_minutes: cooldown_raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "arbitrage.cooldown_minutes".to_string(),
                reason: format!("{cooldown_raw:?} is not a valid integer"),
            })?,
            stale_opportunity_scans: stale_scans_raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "arbitrage.stale_opportunity_scans".to_string(),
                reason: format!("{stale_scans_raw:?} is not a valid integer"),
            })?,
        };

        let mut venues = HashMap::new();
        for (name, default_url, env_prefix) in [
            ("poly", "https://gamma-api.polymarket.com", "POLY"),
            ("opinion", "https://proxy.opinion.trade:8443/openapi", "OPINION"),
            ("predict", "https://api.predict.fun", "PREDICT"),
            ("kalshi", "https://api.elections.kalshi.com/trade-api/v2", "KALSHI"),
        ] {
            let base_url = env_override(
                &format!("{env_prefix}_BASE_URL"),
                str_from(&doc, &["venues", name, "base_url"], default_url),
            );
            let api_key = env_override_opt(
                &format!("{env_prefix}_API_KEY"),
                lookup(&doc, &["venues", name, "api_key"])
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            );
            let cache_seconds_raw = env_override(
                &format!("{env_prefix}_CACHE_SECONDS"),
                str_from(&doc, &["venues", name, "cache_seconds"], "60"),
            );
            let min_similarity_raw = env_override(
                &format!("{env_prefix}_MIN_SIMILARITY"),
                str_from(
                    &doc,
                    &["venues", name, "min_similarity"],
                    &crate::matcher::default_min_similarity().to_string(),
                ),
            );
            venues.insert(
                name.to_string(),
                VenueConfig {
                    base_url,
                    api_key,
                    cache_seconds: parse_u64(&cache_seconds_raw, &format!("venues.{name}.cache_seconds"))?,
                    min_similarity: min_similarity_raw.parse().map_err(|_| ConfigError::InvalidValue {
                        key: format!("venues.{name}.min_similarity"),
                        reason: format!("{min_similarity_raw:?} is not a valid float"),
                    })?,
                },
            );
        }

        let telegram_enabled_raw = env_override(
            "TELEGRAM_ENABLED",
            str_from(&doc, &["notification", "telegram", "enabled"], "true"),
        );
        let telegram = TelegramConfig {
            enabled: telegram_enabled_raw.eq_ignore_ascii_case("true"),
            bot_token: env_override(
                "TELEGRAM_BOT_TOKEN",
                str_from(&doc, &["notification", "telegram", "bot_token"], ""),
            ),
            chat_id: env_override(
                "TELEGRAM_CHAT_ID",
                str_from(&doc, &["notification", "telegram", "chat_id"], ""),
            ),
        };

        let dashboard_port_raw = env_override(
            "DASHBOARD_PORT",
            str_from(&doc, &["dashboard", "port"], "8080"),
        );
        let dashboard = DashboardConfig {
            host: env_override("DASHBOARD_HOST", str_from(&doc, &["dashboard", "host"], "0.0.0.0")),
            port: dashboard_port_raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "dashboard.port".to_string(),
                reason: format!("{dashboard_port_raw:?} is not a valid port"),
            })?,
        };

        Ok(Self {
            arbitrage,
            venues,
            telegram,
            dashboard,
        })
    }
}

/// Deserialization target for the manual-mapping file, kept independent of `Config`.
#[derive(Debug, Deserialize)]
pub struct ManualMappingFile {
    pub mappings: Vec<crate::model::ManualMapping>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for k in [
            "MIN_ARBITRAGE_THRESHOLD",
            "SCAN_INTERVAL",
            "COOLDOWN_MINUTES",
            "TRADING_FEE",
        ] {
            env::remove_var(k);
        }
    }

    #[test]
    #[serial]
    fn defaults_apply_when_file_absent() {
        clear_env();
        let config = Config::load("/nonexistent/config.yaml").unwrap();
        assert_eq!(config.arbitrage.min_arbitrage_threshold, Decimal::new(20, 1));
        assert_eq!(config.arbitrage.scan_interval_secs, 15);
        assert_eq!(config.arbitrage.cooldown_minutes, 5);
    }

    #[test]
    #[serial]
    fn env_var_overrides_default() {
        clear_env();
        env::set_var("MIN_ARBITRAGE_THRESHOLD", "3.5");
        let config = Config::load("/nonexistent/config.yaml").unwrap();
        assert_eq!(config.arbitrage.min_arbitrage_threshold, Decimal::new(35, 1));
        env::remove_var("MIN_ARBITRAGE_THRESHOLD");
    }

    #[test]
    #[serial]
    fn malformed_value_is_fatal() {
        clear_env();
        env::set_var("MIN_ARBITRAGE_THRESHOLD", "not-a-number");
        let result = Config::load("/nonexistent/config.yaml");
        assert!(result.is_err());
        env::remove_var("MIN_ARBITRAGE_THRESHOLD");
    }
}
