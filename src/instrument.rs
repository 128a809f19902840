//! Instrument legs - contract metadata plus the latest book.
//!
//! The book is replaced whole on every market-data snapshot; no incremental
//! reconstruction happens here.

use crate::core::config::LegConfig;
use crate::core::{BookSnapshot, LegId, Side, Symbol};

pub struct InstrumentLeg {
    pub id: LegId,
    pub symbol: Symbol,
    /// Restart-stable alias (`m_origbaseNameN` in the daily-init file)
    pub alias: String,
    pub tick_size: f64,
    pub lot_size: i64,
    pub multiplier: f64,
    book: BookSnapshot,
}

impl InstrumentLeg {
    pub fn new(id: LegId, cfg: &LegConfig) -> Self {
        Self {
            id,
            symbol: Symbol::new(cfg.symbol.clone()),
            alias: cfg.alias.clone(),
            tick_size: cfg.tick_size,
            lot_size: cfg.lot_size,
            multiplier: cfg.multiplier,
            book: BookSnapshot::default(),
        }
    }

    pub fn update_book(&mut self, book: BookSnapshot) {
        self.book = book;
    }

    pub fn book(&self) -> &BookSnapshot {
        &self.book
    }

    /// Price that crosses `ticks` ticks through the opposite touch.
    pub fn aggressive_price(&self, side: Side, ticks: u32) -> Option<f64> {
        let through = self.tick_size * ticks as f64;
        match side {
            Side::Buy => self.book.best_ask().map(|l| self.round_to_tick(l.price + through)),
            Side::Sell => self.book.best_bid().map(|l| self.round_to_tick(l.price - through)),
        }
    }

    pub fn round_to_tick(&self, price: f64) -> f64 {
        (price / self.tick_size).round() * self.tick_size
    }

    /// Round a lot count down to a multiple of the lot size.
    pub fn round_lots(&self, qty: i64) -> i64 {
        qty - qty.rem_euclid(self.lot_size)
    }

    /// Mark price for PnL: mid when the book is usable, else last trade.
    pub fn mark_price(&self) -> Option<f64> {
        self.book
            .mid()
            .or((self.book.last_price > 0.0).then_some(self.book.last_price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leg() -> InstrumentLeg {
        InstrumentLeg::new(
            LegId::First,
            &LegConfig {
                symbol: "ag2603".into(),
                alias: "ag2603".into(),
                tick_size: 0.5,
                lot_size: 2,
                multiplier: 15.0,
            },
        )
    }

    #[test]
    fn test_aggressive_prices_cross_the_touch() {
        let mut l = leg();
        assert!(l.aggressive_price(Side::Buy, 1).is_none());
        l.update_book(BookSnapshot::top(100.0, 5, 100.5, 5));
        assert_eq!(l.aggressive_price(Side::Buy, 2), Some(101.5));
        assert_eq!(l.aggressive_price(Side::Buy, 1), Some(101.0));
        assert_eq!(l.aggressive_price(Side::Sell, 1), Some(99.5));
    }

    #[test]
    fn test_lot_rounding() {
        let l = leg();
        assert_eq!(l.round_lots(5), 4);
        assert_eq!(l.round_lots(1), 0);
        assert_eq!(l.round_to_tick(100.26), 100.5);
    }

    #[test]
    fn test_mark_falls_back_to_last_trade() {
        let mut l = leg();
        let mut book = BookSnapshot::default();
        book.last_price = 99.0;
        l.update_book(book);
        assert_eq!(l.mark_price(), Some(99.0));
        l.update_book(BookSnapshot::top(100.0, 1, 101.0, 1));
        assert_eq!(l.mark_price(), Some(100.5));
    }
}
