//! Execution layer - order lifecycle and position truth
//!
//! `tracker` owns the in-flight orders, `ledger` owns the positions. Only the
//! tracker writes to the ledger, and both live inside the controller's lock.

pub mod ledger;
pub mod tracker;

pub use ledger::{Ledger, LedgerError, PositionSnapshot};
pub use tracker::{Applied, Order, OrderRef, OrderStatus, OrderTracker};
