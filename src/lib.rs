//! Pairs Engine - Core Library
//! Execution core for two-leg futures spread trading

// Public modules
pub mod core;
pub mod broker;
pub mod execution;
pub mod instrument;
pub mod signal;
pub mod strategy;
pub mod risk;
pub mod persistence;
pub mod commands;
pub mod gateway;

// Re-exports
pub use crate::core::{AppConfig, Error, Result};
