//! Configuration - Type-safe, validated config
//!
//! Loads from `config.toml`. Thresholds are kept as a raw name → value table
//! so the same keys work for the startup set and for `ReloadThresholds`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::{Error, Result};
use crate::strategy::thresholds::ThresholdSet;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Controller settings
    pub strategy: StrategyConfig,

    /// The two legs, leg 1 first
    pub legs: Vec<LegConfig>,

    /// Threshold table (see `ThresholdSet::from_map`)
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Strategy id, first column of the daily-init file
    pub id: i32,

    /// Directory holding `daily_init.<id>`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Resting order may drift this many ticks from target before replace
    #[serde(default = "default_quote_tolerance_ticks")]
    pub quote_tolerance_ticks: u32,

    /// Minimum gap between two same-side hedge orders
    #[serde(default = "default_hedge_cooloff_ms")]
    pub hedge_cooloff_ms: i64,

    /// Flatten retries per leg before the residual is accepted
    #[serde(default = "default_max_squareoff_attempts")]
    pub max_squareoff_attempts: u32,

    /// Consecutive rejects that force a squareoff
    #[serde(default = "default_reject_limit")]
    pub reject_limit: u32,

    /// Use size-weighted mids for the spread metric
    #[serde(default)]
    pub use_weighted_mid: bool,

    /// Session end, RFC 3339. Squares off at or after this instant.
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,

    /// Hard flat time, RFC 3339. Same squareoff as `end_time`.
    #[serde(default)]
    pub agg_flat_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegConfig {
    /// Live contract symbol
    pub symbol: String,

    /// Restart-stable alias persisted in the daily-init file
    pub alias: String,

    pub tick_size: f64,

    #[serde(default = "default_lot_size")]
    pub lot_size: i64,

    /// Contract multiplier for PnL
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("../data")
}
fn default_quote_tolerance_ticks() -> u32 {
    1
}
fn default_hedge_cooloff_ms() -> i64 {
    100
}
fn default_max_squareoff_attempts() -> u32 {
    3
}
fn default_reject_limit() -> u32 {
    200
}
fn default_lot_size() -> i64 {
    1
}
fn default_multiplier() -> f64 {
    1.0
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            id: 0,
            data_dir: default_data_dir(),
            quote_tolerance_ticks: default_quote_tolerance_ticks(),
            hedge_cooloff_ms: default_hedge_cooloff_ms(),
            max_squareoff_attempts: default_max_squareoff_attempts(),
            reject_limit: default_reject_limit(),
            use_weighted_mid: false,
            end_time: None,
            agg_flat_time: None,
        }
    }
}

impl AppConfig {
    /// Load from TOML file and validate
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks; threshold values are checked by `ThresholdSet`.
    pub fn validate(&self) -> Result<()> {
        if self.legs.len() != 2 {
            return Err(Error::Config(format!(
                "exactly two legs required, got {}",
                self.legs.len()
            )));
        }
        for leg in &self.legs {
            if leg.symbol.is_empty() || leg.alias.is_empty() {
                return Err(Error::Config("leg symbol and alias must be non-empty".into()));
            }
            if leg.alias.contains(char::is_whitespace) {
                return Err(Error::Config(format!("leg alias {:?} contains whitespace", leg.alias)));
            }
            if !(leg.tick_size.is_finite() && leg.tick_size > 0.0) {
                return Err(Error::Config(format!("{}: tick_size must be > 0", leg.symbol)));
            }
            if leg.lot_size <= 0 {
                return Err(Error::Config(format!("{}: lot_size must be > 0", leg.symbol)));
            }
            if !(leg.multiplier.is_finite() && leg.multiplier > 0.0) {
                return Err(Error::Config(format!("{}: multiplier must be > 0", leg.symbol)));
            }
        }
        self.threshold_set()?;
        Ok(())
    }

    pub fn threshold_set(&self) -> Result<ThresholdSet> {
        Ok(ThresholdSet::from_map(&self.thresholds)?)
    }

    /// `<data_dir>/daily_init.<id>`
    pub fn daily_init_path(&self) -> PathBuf {
        crate::persistence::daily_init_path(&self.strategy.data_dir, self.strategy.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[strategy]
id = 92201
data_dir = "/tmp/pairs"

[[legs]]
symbol = "ag2603"
alias = "ag2603"
tick_size = 1.0
multiplier = 15.0

[[legs]]
symbol = "ag2605"
alias = "ag2605"
tick_size = 1.0
multiplier = 15.0

[thresholds]
begin_place = 2.0
begin_remove = 1.0
size = 1
max_size = 10
alpha = 0.01
"#;

    #[test]
    fn test_parse_sample() {
        let cfg = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(cfg.strategy.id, 92201);
        assert_eq!(cfg.strategy.hedge_cooloff_ms, 100);
        assert_eq!(cfg.legs[1].lot_size, 1);
        assert_eq!(cfg.threshold_set().unwrap().max_size, 10);
        assert_eq!(
            cfg.daily_init_path(),
            PathBuf::from("/tmp/pairs/daily_init.92201")
        );
    }

    #[test]
    fn test_session_times_parse_as_rfc3339() {
        let cfg = AppConfig::from_toml(SAMPLE).unwrap();
        assert!(cfg.strategy.end_time.is_none());

        let timed = SAMPLE.replace(
            "data_dir = \"/tmp/pairs\"",
            "data_dir = \"/tmp/pairs\"\n\
             end_time = \"2026-10-19T06:55:00Z\"\n\
             agg_flat_time = \"2026-10-19T14:58:00+08:00\"",
        );
        let cfg = AppConfig::from_toml(&timed).unwrap();
        let end = cfg.strategy.end_time.unwrap();
        assert_eq!(end.to_rfc3339(), "2026-10-19T06:55:00+00:00");
        assert_eq!((cfg.strategy.agg_flat_time.unwrap() - end).num_minutes(), 3);
    }

    #[test]
    fn test_single_leg_rejected() {
        let one_leg = SAMPLE.split("[[legs]]\nsymbol = \"ag2605\"").next().unwrap().to_string()
            + "[thresholds]\nsize = 1\n";
        let err = AppConfig::from_toml(&one_leg).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_bad_threshold_rejected() {
        let bad = SAMPLE.replace("alpha = 0.01", "alpha = 3.0");
        assert!(matches!(AppConfig::from_toml(&bad), Err(Error::Threshold(_))));
    }
}
