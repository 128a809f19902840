//! Core types - Strong typing for safety

use serde::{Deserialize, Serialize};

/// Live contract symbol (e.g., "ag2603")
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Locally assigned order id, unique for the life of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalOrderId(pub u64);

impl std::fmt::Display for LocalOrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells
    pub fn sign(self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Side that reduces a signed position toward zero.
    pub fn closing(position: i64) -> Option<Self> {
        match position.signum() {
            1 => Some(Side::Sell),
            -1 => Some(Side::Buy),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// One of the two legs of the pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegId {
    First,
    Second,
}

impl LegId {
    pub const BOTH: [LegId; 2] = [LegId::First, LegId::Second];

    pub fn index(self) -> usize {
        match self {
            LegId::First => 0,
            LegId::Second => 1,
        }
    }
}

impl std::fmt::Display for LegId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LegId::First => write!(f, "leg1"),
            LegId::Second => write!(f, "leg2"),
        }
    }
}

/// One price level of the ladder
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub quantity: i64,
}

/// Point-in-time top-of-book ladder for one leg, best level first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    #[serde(default)]
    pub last_price: f64,
    #[serde(default)]
    pub timestamp_ms: i64,
}

impl BookSnapshot {
    /// Single-level book, mostly for tests and replay tooling.
    pub fn top(bid: f64, bid_qty: i64, ask: f64, ask_qty: i64) -> Self {
        Self {
            bids: vec![PriceLevel { price: bid, quantity: bid_qty }],
            asks: vec![PriceLevel { price: ask, quantity: ask_qty }],
            last_price: 0.0,
            timestamp_ms: 0,
        }
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied().filter(|l| l.price > 0.0)
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied().filter(|l| l.price > 0.0)
    }

    /// Both sides present and not crossed.
    pub fn is_valid(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => b.price < a.price,
            _ => false,
        }
    }

    pub fn mid(&self) -> Option<f64> {
        Some((self.best_bid()?.price + self.best_ask()?.price) / 2.0)
    }

    /// Size-weighted mid: leans toward the side with less resting size.
    pub fn weighted_mid(&self) -> Option<f64> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        let total = bid.quantity + ask.quantity;
        if total <= 0 {
            return self.mid();
        }
        Some((bid.price * ask.quantity as f64 + ask.price * bid.quantity as f64) / total as f64)
    }
}

/// Why an order was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderIntent {
    /// Passive entry quote
    Quote,
    /// Aggressive leg-2 hedge of a fill imbalance
    Hedge,
    /// Aggressive squareoff order
    Flatten,
}

/// Outbound new-order instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub local_id: LocalOrderId,
    pub client_ref: String,
    pub leg: LegId,
    pub symbol: Symbol,
    pub side: Side,
    pub price: f64,
    pub quantity: i64,
    pub intent: OrderIntent,
}

/// Outbound cancel instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub local_id: LocalOrderId,
    pub client_ref: String,
    pub broker_ref: Option<String>,
    pub leg: LegId,
    pub symbol: Symbol,
}
