//! Pairwise spread strategy: threshold policy and the controller that
//! turns books and acks into orders.

pub mod controller;
pub mod thresholds;

pub use controller::{ControllerStatus, PairwiseController, StrategyState};
pub use thresholds::{DerivedThresholds, ThresholdError, ThresholdSet};
