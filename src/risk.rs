//! Risk Gate - hard limits checked before every outbound order.
//!
//! Quotes are bounded by order size and per-leg position. Hedge and flatten
//! orders bypass the size limits since they take risk off, but flatten orders
//! may never flip a position.

use thiserror::Error;
use tracing::warn;

use crate::core::{OrderIntent, OrderRequest};
use crate::strategy::thresholds::ThresholdSet;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiskError {
    #[error("order qty {0} exceeds max {1}")]
    OrderTooLarge(i64, i64),

    #[error("position {0} + order {1} exceeds max position {2}")]
    PositionOverflow(i64, i64, i64),

    #[error("order qty {0} is not a positive multiple of lot size {1}")]
    BadLotSize(i64, i64),

    #[error("order price {0} is not tradable")]
    BadPrice(f64),

    #[error("flatten order {0} would flip position {1}")]
    OverFlatten(i64, i64),

    #[error("trading paused: {0}")]
    TradingPaused(String),
}

/// Lot-denominated limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskConfig {
    pub max_order_qty: i64,
    pub max_position: i64,
}

impl RiskConfig {
    pub fn from_thresholds(ts: &ThresholdSet) -> Self {
        Self {
            max_order_qty: ts.size,
            max_position: ts.max_size,
        }
    }
}

pub struct RiskGate {
    config: RiskConfig,
    paused: bool,
    pause_reason: Option<String>,
}

impl RiskGate {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            paused: false,
            pause_reason: None,
        }
    }

    /// Replace limits after a threshold reload.
    pub fn update_limits(&mut self, config: RiskConfig) {
        self.config = config;
    }

    /// Check an order against the current leg position.
    pub fn check_order(
        &self,
        order: &OrderRequest,
        position: i64,
        lot_size: i64,
    ) -> Result<(), RiskError> {
        if !(order.price.is_finite() && order.price > 0.0) {
            return Err(RiskError::BadPrice(order.price));
        }
        if order.quantity <= 0 || order.quantity % lot_size.max(1) != 0 {
            return Err(RiskError::BadLotSize(order.quantity, lot_size));
        }

        let delta = order.side.sign() * order.quantity;
        let after = position + delta;
        match order.intent {
            OrderIntent::Quote => {
                if self.paused {
                    return Err(RiskError::TradingPaused(
                        self.pause_reason.clone().unwrap_or_else(|| "unknown".into()),
                    ));
                }
                if order.quantity > self.config.max_order_qty {
                    return Err(RiskError::OrderTooLarge(order.quantity, self.config.max_order_qty));
                }
                if after.abs() > self.config.max_position && after.abs() > position.abs() {
                    return Err(RiskError::PositionOverflow(
                        position,
                        delta,
                        self.config.max_position,
                    ));
                }
            }
            OrderIntent::Flatten => {
                if position == 0 || after.signum() == -position.signum() {
                    return Err(RiskError::OverFlatten(delta, position));
                }
            }
            OrderIntent::Hedge => {}
        }
        Ok(())
    }

    /// Block new quotes.
    pub fn pause(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(%reason, "⏸️ quoting paused");
        self.paused = true;
        self.pause_reason = Some(reason);
    }

    pub fn resume(&mut self) {
        self.paused = false;
        self.pause_reason = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{LegId, LocalOrderId, Side, Symbol};

    fn order(side: Side, qty: i64, intent: OrderIntent) -> OrderRequest {
        OrderRequest {
            local_id: LocalOrderId(1),
            client_ref: "c1".into(),
            leg: LegId::First,
            symbol: Symbol::new("ag2603"),
            side,
            price: 100.0,
            quantity: qty,
            intent,
        }
    }

    fn gate() -> RiskGate {
        RiskGate::new(RiskConfig { max_order_qty: 2, max_position: 5 })
    }

    #[test]
    fn test_order_too_large() {
        let result = gate().check_order(&order(Side::Buy, 3, OrderIntent::Quote), 0, 1);
        assert_eq!(result, Err(RiskError::OrderTooLarge(3, 2)));
    }

    #[test]
    fn test_position_limit_only_blocks_added_exposure() {
        let g = gate();
        assert!(matches!(
            g.check_order(&order(Side::Buy, 2, OrderIntent::Quote), 4, 1),
            Err(RiskError::PositionOverflow(4, 2, 5))
        ));
        // Already above the limit, reducing is fine.
        assert!(g.check_order(&order(Side::Sell, 2, OrderIntent::Quote), 8, 1).is_ok());
        // Hedges are never size-limited.
        assert!(g.check_order(&order(Side::Buy, 10, OrderIntent::Hedge), 8, 1).is_ok());
    }

    #[test]
    fn test_flatten_must_not_flip() {
        let g = gate();
        assert!(g.check_order(&order(Side::Sell, 3, OrderIntent::Flatten), 3, 1).is_ok());
        assert!(g.check_order(&order(Side::Sell, 4, OrderIntent::Flatten), 3, 1).is_err());
        assert!(g.check_order(&order(Side::Buy, 1, OrderIntent::Flatten), 0, 1).is_err());
    }

    #[test]
    fn test_pause_blocks_quotes_not_hedges() {
        let mut g = gate();
        g.pause("safety trip");
        assert!(matches!(
            g.check_order(&order(Side::Buy, 1, OrderIntent::Quote), 0, 1),
            Err(RiskError::TradingPaused(_))
        ));
        assert!(g.check_order(&order(Side::Buy, 1, OrderIntent::Hedge), 0, 1).is_ok());
        g.resume();
        assert!(g.check_order(&order(Side::Buy, 1, OrderIntent::Quote), 0, 1).is_ok());
    }

    #[test]
    fn test_lot_and_price_checks() {
        let g = gate();
        assert_eq!(
            g.check_order(&order(Side::Buy, 1, OrderIntent::Hedge), 0, 2),
            Err(RiskError::BadLotSize(1, 2))
        );
        let mut bad = order(Side::Buy, 1, OrderIntent::Hedge);
        bad.price = 0.0;
        assert!(matches!(g.check_order(&bad, 0, 1), Err(RiskError::BadPrice(_))));
    }
}
