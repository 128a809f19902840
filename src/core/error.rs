//! Error handling - hierarchical errors for the pairs engine

use thiserror::Error;

use crate::core::types::LocalOrderId;
use crate::persistence::PersistenceError;
use crate::risk::RiskError;
use crate::strategy::thresholds::ThresholdError;

pub type Result<T> = std::result::Result<T, Error>;

/// Pairs engine error hierarchy
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors (startup config, threshold reloads)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Threshold map rejected; the previous set stays in force
    #[error("Threshold error: {0}")]
    Threshold(#[from] ThresholdError),

    /// Daily-init save/load failures
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Broker gateway refused an outbound request
    #[error("Broker error: {0}")]
    Broker(String),

    /// An order with this local id is already being tracked
    #[error("Duplicate order: local id {0} already registered")]
    DuplicateOrder(LocalOrderId),

    /// Risk limits
    #[error("Risk error: {0}")]
    Risk(#[from] RiskError),

    /// Second leg failed and the first leg could not be pulled back
    #[error("Leg imbalance: {0}")]
    LegImbalance(String),

    /// Command not legal in the current controller state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Command stream I/O
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
