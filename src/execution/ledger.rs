//! Position & PnL ledger, one book per leg.
//!
//! The only mutation paths are the prior-day load at startup and
//! `apply_fill`, which the order tracker calls for terminal/partial fills.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use crate::core::LegId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("fill price {0} is not representable")]
    InvalidPrice(f64),

    #[error("zero-quantity fill on {0}")]
    ZeroQuantity(LegId),
}

/// Immutable read of one leg's book.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSnapshot {
    pub leg: LegId,
    /// Signed total position (prior-day + intraday)
    pub quantity: i64,
    /// Position loaded at startup
    pub prior_day: i64,
    pub avg_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    /// Lots traded this session, both sides
    pub traded_volume: i64,
    pub bought_volume: i64,
    pub sold_volume: i64,
    /// Net PnL minus its session peak, never positive
    pub drawdown: Decimal,
}

impl PositionSnapshot {
    pub fn intraday(&self) -> i64 {
        self.quantity - self.prior_day
    }

    pub fn net_pnl(&self) -> Decimal {
        self.realized_pnl + self.unrealized_pnl
    }
}

#[derive(Debug, Clone)]
struct LegBook {
    multiplier: Decimal,
    quantity: i64,
    prior_day: i64,
    avg_price: Decimal,
    /// Prior-day position carried without a known entry price
    basis_pending: bool,
    realized_pnl: Decimal,
    bought: i64,
    sold: i64,
    peak_net: Decimal,
    mark: Option<Decimal>,
}

impl LegBook {
    fn new(multiplier: f64) -> Self {
        Self {
            multiplier: Decimal::from_f64(multiplier).unwrap_or(Decimal::ONE),
            quantity: 0,
            prior_day: 0,
            avg_price: Decimal::ZERO,
            basis_pending: false,
            realized_pnl: Decimal::ZERO,
            bought: 0,
            sold: 0,
            peak_net: Decimal::ZERO,
            mark: None,
        }
    }

    fn unrealized(&self) -> Decimal {
        match self.mark {
            Some(mark) if self.quantity != 0 && !self.basis_pending => {
                (mark - self.avg_price) * Decimal::from(self.quantity) * self.multiplier
            }
            _ => Decimal::ZERO,
        }
    }

    fn net(&self) -> Decimal {
        self.realized_pnl + self.unrealized()
    }

    fn track_peak(&mut self) {
        self.peak_net = self.peak_net.max(self.net());
    }
}

/// Two-leg position book
#[derive(Debug, Clone)]
pub struct Ledger {
    legs: [LegBook; 2],
}

impl Ledger {
    pub fn new(multipliers: [f64; 2]) -> Self {
        Self {
            legs: [LegBook::new(multipliers[0]), LegBook::new(multipliers[1])],
        }
    }

    /// Seed the prior-day position. Its cost basis is taken from the first
    /// mark seen afterwards.
    pub fn load_prior_day(&mut self, leg: LegId, quantity: i64) {
        let book = &mut self.legs[leg.index()];
        book.quantity = quantity;
        book.prior_day = quantity;
        book.avg_price = Decimal::ZERO;
        book.basis_pending = quantity != 0;
    }

    /// Update the mark price used for unrealized PnL.
    pub fn mark(&mut self, leg: LegId, price: f64) {
        let Some(price) = Decimal::from_f64(price) else {
            return;
        };
        let book = &mut self.legs[leg.index()];
        book.mark = Some(price);
        if book.basis_pending {
            book.avg_price = price;
            book.basis_pending = false;
            debug!(%leg, qty = book.quantity, basis = %price,
                "prior-day cost basis seeded from mark");
        }
        book.track_peak();
    }

    /// Apply a signed fill. Average price is volume-weighted while the
    /// position grows; a reducing fill realizes PnL against it, and a
    /// reversal restarts the average at the fill price.
    pub fn apply_fill(
        &mut self,
        leg: LegId,
        delta: i64,
        price: f64,
    ) -> Result<PositionSnapshot, LedgerError> {
        if delta == 0 {
            return Err(LedgerError::ZeroQuantity(leg));
        }
        let px = Decimal::from_f64(price).ok_or(LedgerError::InvalidPrice(price))?;
        let book = &mut self.legs[leg.index()];
        if book.basis_pending {
            book.avg_price = px;
            book.basis_pending = false;
        }

        let old = book.quantity;
        let new = old + delta;

        if old == 0 || old.signum() == delta.signum() {
            let old_abs = Decimal::from(old.abs());
            let add_abs = Decimal::from(delta.abs());
            book.avg_price = (book.avg_price * old_abs + px * add_abs) / Decimal::from(new.abs());
        } else {
            let closed = delta.abs().min(old.abs());
            book.realized_pnl += (px - book.avg_price)
                * Decimal::from(closed)
                * Decimal::from(old.signum())
                * book.multiplier;
            if new == 0 {
                book.avg_price = Decimal::ZERO;
            } else if new.signum() != old.signum() {
                book.avg_price = px;
            }
        }

        book.quantity = new;
        if delta > 0 {
            book.bought += delta;
        } else {
            book.sold -= delta;
        }
        book.track_peak();
        Ok(self.snapshot(leg))
    }

    pub fn snapshot(&self, leg: LegId) -> PositionSnapshot {
        let book = &self.legs[leg.index()];
        PositionSnapshot {
            leg,
            quantity: book.quantity,
            prior_day: book.prior_day,
            avg_price: book.avg_price,
            realized_pnl: book.realized_pnl,
            unrealized_pnl: book.unrealized(),
            traded_volume: book.bought + book.sold,
            bought_volume: book.bought,
            sold_volume: book.sold,
            drawdown: book.net() - book.peak_net,
        }
    }

    pub fn position(&self, leg: LegId) -> i64 {
        self.legs[leg.index()].quantity
    }

    /// Combined realized + unrealized PnL of both legs.
    pub fn combined_net_pnl(&self) -> f64 {
        LegId::BOTH
            .iter()
            .map(|&leg| self.snapshot(leg).net_pnl())
            .sum::<Decimal>()
            .to_f64()
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_vwap_while_growing() {
        let mut ledger = Ledger::new([1.0, 1.0]);
        ledger.apply_fill(LegId::First, 2, 100.0).unwrap();
        let snap = ledger.apply_fill(LegId::First, 2, 102.0).unwrap();
        assert_eq!(snap.quantity, 4);
        assert_eq!(snap.avg_price, dec("101"));
        assert_eq!(snap.realized_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_reduce_realizes_and_keeps_average() {
        let mut ledger = Ledger::new([10.0, 1.0]);
        ledger.apply_fill(LegId::First, 4, 100.0).unwrap();
        let snap = ledger.apply_fill(LegId::First, -1, 103.0).unwrap();
        assert_eq!(snap.quantity, 3);
        assert_eq!(snap.avg_price, dec("100"));
        // 1 lot * 3 points * multiplier 10
        assert_eq!(snap.realized_pnl, dec("30"));
    }

    #[test]
    fn test_short_cover_pnl_sign() {
        let mut ledger = Ledger::new([1.0, 1.0]);
        ledger.apply_fill(LegId::Second, -3, 50.0).unwrap();
        let snap = ledger.apply_fill(LegId::Second, 3, 48.0).unwrap();
        assert_eq!(snap.quantity, 0);
        assert_eq!(snap.realized_pnl, dec("6"));
        assert_eq!(snap.avg_price, Decimal::ZERO);
    }

    #[test]
    fn test_reversal_restarts_average() {
        let mut ledger = Ledger::new([1.0, 1.0]);
        ledger.apply_fill(LegId::First, 2, 100.0).unwrap();
        let snap = ledger.apply_fill(LegId::First, -5, 99.0).unwrap();
        assert_eq!(snap.quantity, -3);
        assert_eq!(snap.avg_price, dec("99"));
        assert_eq!(snap.realized_pnl, dec("-2"));
    }

    #[test]
    fn test_position_is_prior_day_plus_fills() {
        let mut ledger = Ledger::new([1.0, 1.0]);
        ledger.load_prior_day(LegId::First, 83);
        ledger.load_prior_day(LegId::Second, -83);
        let deltas = [5, -2, -10, 7];
        for d in deltas {
            ledger.apply_fill(LegId::First, d, 96.0).unwrap();
        }
        let snap = ledger.snapshot(LegId::First);
        assert_eq!(snap.quantity, 83 + deltas.iter().sum::<i64>());
        assert_eq!(snap.intraday(), deltas.iter().sum::<i64>());
        assert_eq!(ledger.position(LegId::Second), -83);
    }

    #[test]
    fn test_prior_day_basis_from_first_mark() {
        let mut ledger = Ledger::new([1.0, 1.0]);
        ledger.load_prior_day(LegId::First, 2);
        assert_eq!(ledger.snapshot(LegId::First).unrealized_pnl, Decimal::ZERO);
        ledger.mark(LegId::First, 100.0);
        ledger.mark(LegId::First, 101.0);
        let snap = ledger.snapshot(LegId::First);
        assert_eq!(snap.avg_price, dec("100"));
        assert_eq!(snap.unrealized_pnl, dec("2"));
        assert!((ledger.combined_net_pnl() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_volumes_split_by_side() {
        let mut ledger = Ledger::new([1.0, 1.0]);
        ledger.apply_fill(LegId::First, 3, 100.0).unwrap();
        ledger.apply_fill(LegId::First, -5, 101.0).unwrap();
        let snap = ledger.apply_fill(LegId::First, 1, 100.0).unwrap();
        assert_eq!((snap.bought_volume, snap.sold_volume), (4, 5));
        assert_eq!(snap.traded_volume, 9);
    }

    #[test]
    fn test_drawdown_from_peak_net() {
        let mut ledger = Ledger::new([10.0, 1.0]);
        ledger.apply_fill(LegId::First, 1, 100.0).unwrap();
        ledger.mark(LegId::First, 104.0);
        assert_eq!(ledger.snapshot(LegId::First).drawdown, Decimal::ZERO);

        // Peak was +40, now +10.
        ledger.mark(LegId::First, 101.0);
        let snap = ledger.snapshot(LegId::First);
        assert_eq!(snap.unrealized_pnl, dec("10"));
        assert_eq!(snap.drawdown, dec("-30"));

        // Realizing keeps the peak; a new high resets the drawdown.
        ledger.apply_fill(LegId::First, -1, 101.0).unwrap();
        assert_eq!(ledger.snapshot(LegId::First).drawdown, dec("-30"));
        ledger.apply_fill(LegId::First, 1, 101.0).unwrap();
        ledger.mark(LegId::First, 105.0);
        assert_eq!(ledger.snapshot(LegId::First).drawdown, Decimal::ZERO);
    }

    #[test]
    fn test_bad_inputs() {
        let mut ledger = Ledger::new([1.0, 1.0]);
        assert!(matches!(
            ledger.apply_fill(LegId::First, 0, 1.0),
            Err(LedgerError::ZeroQuantity(LegId::First))
        ));
        assert!(ledger.apply_fill(LegId::First, 1, f64::NAN).is_err());
        assert_eq!(ledger.position(LegId::First), 0);
    }
}
