//! Threshold policy for the pairwise controller.
//!
//! A `ThresholdSet` is only ever built whole from a name → value map and
//! validated before it can replace the active one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThresholdError {
    #[error("unknown threshold key {0:?}")]
    UnknownKey(String),

    #[error("{key} = {value}: {reason}")]
    InvalidValue {
        key: String,
        value: f64,
        reason: &'static str,
    },

    #[error("inconsistent thresholds: {0}")]
    Inconsistent(String),
}

/// Complete policy parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSet {
    /// Entry trigger: spread distance from the reference needed to quote
    pub begin_place: f64,
    pub begin_remove: f64,
    pub long_place: f64,
    pub long_remove: f64,
    pub short_place: f64,
    pub short_remove: f64,
    /// EWA sensitivity of the spread origin
    pub alpha: f64,
    /// Order size in lots
    pub size: i64,
    /// Max |position| per leg in lots
    pub max_size: i64,
    /// Safety trip distance, in leg-1 ticks
    pub avg_spread_away: u32,
    /// Combined net PnL floor; 0 disables
    pub max_loss: f64,
    /// Max resting quotes per side on leg 1
    pub supporting_orders: u32,
    /// Orders sent per session before squareoff; 0 disables
    pub max_order_count: u32,
    /// Lots bought, or lots sold, on either leg before squareoff; 0 disables
    pub max_traded_qty: i64,
    /// Per-leg unrealized loss floor while a position is open; 0 disables
    pub upnl_loss: f64,
    /// Per-leg drop of net PnL from its session peak; 0 disables
    pub stop_loss: f64,
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self {
            begin_place: 0.0,
            begin_remove: 0.0,
            long_place: 0.0,
            long_remove: 0.0,
            short_place: 0.0,
            short_remove: 0.0,
            alpha: 0.0,
            size: 1,
            max_size: 0,
            avg_spread_away: 20,
            max_loss: 0.0,
            supporting_orders: 1,
            max_order_count: 0,
            max_traded_qty: 0,
            upnl_loss: 0.0,
            stop_loss: 0.0,
        }
    }
}

fn integral(key: &str, value: f64, min: f64) -> Result<f64, ThresholdError> {
    if value.fract() != 0.0 {
        return Err(ThresholdError::InvalidValue {
            key: key.to_string(),
            value,
            reason: "must be a whole number",
        });
    }
    if value < min {
        return Err(ThresholdError::InvalidValue {
            key: key.to_string(),
            value,
            reason: if min > 0.0 { "must be positive" } else { "must not be negative" },
        });
    }
    Ok(value)
}

fn non_negative(key: &str, value: f64) -> Result<f64, ThresholdError> {
    if value < 0.0 {
        return Err(ThresholdError::InvalidValue {
            key: key.to_string(),
            value,
            reason: "must not be negative",
        });
    }
    Ok(value)
}

impl ThresholdSet {
    /// Build a full set from a map, starting from defaults. Missing
    /// `long_*`/`short_*` keys fall back to the matching `begin_*` value, which
    /// makes the position interpolation flat.
    pub fn from_map(map: &BTreeMap<String, f64>) -> Result<Self, ThresholdError> {
        let mut ts = ThresholdSet::default();
        let (mut long_place, mut long_remove, mut short_place, mut short_remove) =
            (None, None, None, None);

        for (key, &value) in map {
            if !value.is_finite() {
                return Err(ThresholdError::InvalidValue {
                    key: key.clone(),
                    value,
                    reason: "must be finite",
                });
            }
            match key.as_str() {
                "begin_place" => ts.begin_place = value,
                "begin_remove" => ts.begin_remove = value,
                "long_place" => long_place = Some(value),
                "long_remove" => long_remove = Some(value),
                "short_place" => short_place = Some(value),
                "short_remove" => short_remove = Some(value),
                "alpha" => {
                    if !(0.0..=1.0).contains(&value) {
                        return Err(ThresholdError::InvalidValue {
                            key: key.clone(),
                            value,
                            reason: "must be within [0, 1]",
                        });
                    }
                    ts.alpha = value;
                }
                "size" => ts.size = integral(key, value, 1.0)? as i64,
                "max_size" => ts.max_size = integral(key, value, 0.0)? as i64,
                "avg_spread_away" => ts.avg_spread_away = integral(key, value, 1.0)? as u32,
                "max_loss" => ts.max_loss = non_negative(key, value)?,
                "supporting_orders" => ts.supporting_orders = integral(key, value, 1.0)? as u32,
                "max_order_count" => ts.max_order_count = integral(key, value, 0.0)? as u32,
                "max_traded_qty" => ts.max_traded_qty = integral(key, value, 0.0)? as i64,
                "upnl_loss" => ts.upnl_loss = non_negative(key, value)?,
                "stop_loss" => ts.stop_loss = non_negative(key, value)?,
                _ => return Err(ThresholdError::UnknownKey(key.clone())),
            }
        }

        ts.long_place = long_place.unwrap_or(ts.begin_place);
        ts.long_remove = long_remove.unwrap_or(ts.begin_remove);
        ts.short_place = short_place.unwrap_or(ts.begin_place);
        ts.short_remove = short_remove.unwrap_or(ts.begin_remove);

        if ts.begin_remove > ts.begin_place {
            return Err(ThresholdError::Inconsistent(format!(
                "begin_remove {} exceeds begin_place {}",
                ts.begin_remove, ts.begin_place
            )));
        }
        Ok(ts)
    }

    /// Place/remove thresholds for the current leg-1 position. `None` when
    /// `max_size` is zero: nothing may be quoted.
    pub fn derive(&self, position: i64) -> Option<DerivedThresholds> {
        if self.max_size == 0 {
            return None;
        }
        let m = self.max_size as f64;
        let p = position as f64;
        let long_place_diff = self.long_place - self.begin_place;
        let short_place_diff = self.begin_place - self.short_place;
        let long_remove_diff = self.long_remove - self.begin_remove;
        let short_remove_diff = self.begin_remove - self.short_remove;

        let derived = match position.signum() {
            0 => DerivedThresholds {
                bid_place: self.begin_place,
                bid_remove: self.begin_remove,
                ask_place: self.begin_place,
                ask_remove: self.begin_remove,
            },
            1 => DerivedThresholds {
                bid_place: self.begin_place + long_place_diff * p / m,
                bid_remove: self.begin_remove + long_remove_diff * p / m,
                ask_place: self.begin_place - short_place_diff * p / m,
                ask_remove: self.begin_remove - short_remove_diff * p / m,
            },
            _ => DerivedThresholds {
                bid_place: self.begin_place + short_place_diff * p / m,
                bid_remove: self.begin_remove + short_remove_diff * p / m,
                ask_place: self.begin_place - long_place_diff * p / m,
                ask_remove: self.begin_remove - long_remove_diff * p / m,
            },
        };
        Some(derived)
    }
}

/// Position-adjusted thresholds used by one decision cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedThresholds {
    pub bid_place: f64,
    pub bid_remove: f64,
    pub ask_place: f64,
    pub ask_remove: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_defaults_fill_missing_keys() {
        let ts =
            ThresholdSet::from_map(&map(&[("begin_place", 2.0), ("begin_remove", 1.0)])).unwrap();
        assert_eq!(ts.long_place, 2.0);
        assert_eq!(ts.short_remove, 1.0);
        assert_eq!(ts.avg_spread_away, 20);
        assert_eq!(ts.size, 1);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = ThresholdSet::from_map(&map(&[("begin_plase", 2.0)])).unwrap_err();
        assert_eq!(err, ThresholdError::UnknownKey("begin_plase".into()));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ThresholdSet::from_map(&map(&[("size", 0.0)])).is_err());
        assert!(ThresholdSet::from_map(&map(&[("size", 1.5)])).is_err());
        assert!(ThresholdSet::from_map(&map(&[("max_size", -1.0)])).is_err());
        assert!(ThresholdSet::from_map(&map(&[("alpha", f64::NAN)])).is_err());
        let inverted = map(&[("begin_place", 1.0), ("begin_remove", 2.0)]);
        assert!(ThresholdSet::from_map(&inverted).is_err());
        assert!(ThresholdSet::from_map(&map(&[("max_order_count", 2.5)])).is_err());
        assert!(ThresholdSet::from_map(&map(&[("stop_loss", -1.0)])).is_err());
    }

    #[test]
    fn test_squareoff_limits_default_off() {
        let ts = ThresholdSet::from_map(&map(&[])).unwrap();
        assert_eq!((ts.max_order_count, ts.max_traded_qty), (0, 0));
        assert_eq!((ts.upnl_loss, ts.stop_loss), (0.0, 0.0));

        let ts = ThresholdSet::from_map(&map(&[
            ("max_order_count", 500.0),
            ("max_traded_qty", 40.0),
            ("upnl_loss", 3000.0),
            ("stop_loss", 5000.0),
        ]))
        .unwrap();
        assert_eq!(ts.max_order_count, 500);
        assert_eq!(ts.max_traded_qty, 40);
        assert_eq!(ts.stop_loss, 5000.0);
    }

    #[test]
    fn test_interpolation_long_and_short() {
        let ts = ThresholdSet::from_map(&map(&[
            ("begin_place", 2.0),
            ("long_place", 4.0),
            ("short_place", 1.0),
            ("begin_remove", 1.0),
            ("long_remove", 3.0),
            ("short_remove", 0.0),
            ("max_size", 10.0),
        ]))
        .unwrap();

        let flat = ts.derive(0).unwrap();
        assert_eq!(flat.bid_place, 2.0);
        assert_eq!(flat.ask_remove, 1.0);

        // Half long: buying gets harder, selling gets easier.
        let long = ts.derive(5).unwrap();
        assert!((long.bid_place - 3.0).abs() < 1e-12);
        assert!((long.ask_place - 1.5).abs() < 1e-12);
        assert!((long.bid_remove - 2.0).abs() < 1e-12);
        assert!((long.ask_remove - 0.5).abs() < 1e-12);

        let short = ts.derive(-5).unwrap();
        assert!((short.bid_place - 1.5).abs() < 1e-12);
        assert!((short.ask_place - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_max_size_disables_quoting() {
        assert!(ThresholdSet::default().derive(0).is_none());
    }
}
