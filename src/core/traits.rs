//! Core traits - seams to the external collaborators

use crate::core::{CancelRequest, OrderRequest, Result};

/// Exchange-facing broker adapter.
///
/// Both calls are fire-and-forget: `Ok` means the request was handed off, not
/// that the exchange accepted it. Outcomes come back later as acknowledgment
/// events through [`crate::broker::ProtocolFilter`]. An `Err` means the request
/// never left the process.
pub trait BrokerGateway: Send + Sync {
    /// Gateway name for logging
    fn name(&self) -> &str;

    /// Submit a new order
    fn submit(&self, request: &OrderRequest) -> Result<()>;

    /// Request cancellation of a working order
    fn cancel(&self, request: &CancelRequest) -> Result<()>;
}
