//! Spread signal evaluation
//!
//! `evaluate` is a pure function of books, reference, thresholds and leg-1
//! exposure. The only state is the reference origin kept by `SpreadTracker`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::core::{BookSnapshot, LegId, Side};
use crate::strategy::thresholds::ThresholdSet;

/// Indicator name added to the origin to form the spread reference.
pub const TVALUE: &str = "tvalue";

/// Named numeric signals pushed in by the indicator library.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndicatorSet(BTreeMap<String, f64>);

impl IndicatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied().filter(|v| v.is_finite())
    }

    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    /// Merge an update; later values win.
    pub fn merge(&mut self, other: IndicatorSet) {
        self.0.extend(other.0);
    }

    pub fn tvalue(&self) -> f64 {
        self.get(TVALUE).unwrap_or(0.0)
    }
}

/// Leg-1 minus leg-2 price, plain or size-weighted mids.
pub fn spread_of(leg1: &BookSnapshot, leg2: &BookSnapshot, weighted: bool) -> Option<f64> {
    if weighted {
        Some(leg1.weighted_mid()? - leg2.weighted_mid()?)
    } else {
        Some(leg1.mid()? - leg2.mid()?)
    }
}

/// EWA-smoothed spread origin, persisted as `avgPx`.
#[derive(Debug, Clone)]
pub struct SpreadTracker {
    origin: Option<f64>,
    alpha: f64,
}

impl SpreadTracker {
    /// A zero origin means "never seeded": the first valid spread seeds it.
    pub fn new(origin: f64, alpha: f64) -> Self {
        Self {
            origin: (origin != 0.0 && origin.is_finite()).then_some(origin),
            alpha,
        }
    }

    pub fn set_alpha(&mut self, alpha: f64) {
        self.alpha = alpha;
    }

    pub fn origin(&self) -> f64 {
        self.origin.unwrap_or(0.0)
    }

    /// Origin, seeding it from `spread` on first use.
    pub fn seed(&mut self, spread: f64) -> f64 {
        *self.origin.get_or_insert_with(|| {
            debug!(spread, "spread origin seeded from market");
            spread
        })
    }

    pub fn reference(&self, indicators: &IndicatorSet) -> Option<f64> {
        Some(self.origin? + indicators.tvalue())
    }

    /// Fold a new observation into the origin. Only leg-1 updates move it,
    /// and never while the deviation check is tripped.
    pub fn observe(&mut self, leg: LegId, spread: f64, tripped: bool) {
        if leg != LegId::First || tripped || self.alpha <= 0.0 {
            return;
        }
        if let Some(origin) = self.origin.as_mut() {
            *origin = (1.0 - self.alpha) * *origin + self.alpha * spread;
        }
    }
}

/// Leg-1 exposure the entry sizing works from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Exposure {
    pub position: i64,
    pub open_buy: i64,
    pub open_sell: i64,
}

/// Everything one evaluation looks at
#[derive(Debug, Clone, Copy)]
pub struct SignalInput<'a> {
    pub leg1: &'a BookSnapshot,
    pub leg2: &'a BookSnapshot,
    /// `origin + tvalue`
    pub reference: f64,
    pub thresholds: &'a ThresholdSet,
    pub tick1: f64,
    pub use_weighted_mid: bool,
    pub exposure: Exposure,
}

/// One side of the pair quote. `side` is the leg-1 side; leg 2 trades the
/// opposite side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntrySignal {
    pub side: Side,
    pub eligible: bool,
    pub leg1_price: f64,
    pub leg2_price: f64,
    pub quantity: i64,
    /// Leg-1 price beyond which a resting quote is pulled
    pub remove_limit: f64,
}

impl EntrySignal {
    /// Whether a resting leg-1 quote at `price` has crossed the remove threshold.
    pub fn should_remove(&self, price: f64) -> bool {
        match self.side {
            Side::Buy => price > self.remove_limit,
            Side::Sell => price < self.remove_limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpreadDecision {
    pub spread: f64,
    pub reference: f64,
    pub deviation: f64,
    pub safety_trip: bool,
    /// Long-spread entry (buy leg 1); `None` when quoting is disabled
    pub buy: Option<EntrySignal>,
    /// Short-spread entry (sell leg 1)
    pub sell: Option<EntrySignal>,
}

impl SpreadDecision {
    pub fn entry(&self, side: Side) -> Option<&EntrySignal> {
        match side {
            Side::Buy => self.buy.as_ref(),
            Side::Sell => self.sell.as_ref(),
        }
    }
}

/// Evaluate the pair. `None` while either book is unusable.
pub fn evaluate(input: &SignalInput<'_>) -> Option<SpreadDecision> {
    if !input.leg1.is_valid() || !input.leg2.is_valid() {
        return None;
    }
    let ts = input.thresholds;
    let spread = spread_of(input.leg1, input.leg2, input.use_weighted_mid)?;
    let deviation = spread - input.reference;
    let safety_trip = deviation.abs() > input.tick1 * ts.avg_spread_away as f64;

    let bid1 = input.leg1.best_bid()?.price;
    let ask1 = input.leg1.best_ask()?.price;
    let bid2 = input.leg2.best_bid()?.price;
    let ask2 = input.leg2.best_ask()?.price;
    let avg = input.reference;
    let exp = input.exposure;

    let (buy, sell) = match ts.derive(exp.position) {
        Some(d) => {
            let buy_room = ts.max_size - exp.position - exp.open_buy;
            let sell_room = ts.max_size + exp.position - exp.open_sell;
            let buy_qty = ts.size.min(buy_room).max(0);
            let sell_qty = ts.size.min(sell_room).max(0);
            (
                Some(EntrySignal {
                    side: Side::Buy,
                    eligible: !safety_trip && buy_qty > 0 && bid1 - bid2 < avg - d.bid_place,
                    leg1_price: bid1,
                    leg2_price: ask2,
                    quantity: buy_qty,
                    remove_limit: avg - d.bid_remove + bid2,
                }),
                Some(EntrySignal {
                    side: Side::Sell,
                    eligible: !safety_trip && sell_qty > 0 && ask1 - ask2 > avg + d.ask_place,
                    leg1_price: ask1,
                    leg2_price: bid2,
                    quantity: sell_qty,
                    remove_limit: avg + d.ask_remove + ask2,
                }),
            )
        }
        None => (None, None),
    };

    Some(SpreadDecision {
        spread,
        reference: avg,
        deviation,
        safety_trip,
        buy,
        sell,
    })
}
