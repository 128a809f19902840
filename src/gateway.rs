//! Outbound broker gateway backed by a flume channel.
//!
//! The controller hands requests to the channel and returns immediately; the
//! consumer on the other end (the broker adapter, or the binary's log drain)
//! owns delivery.

use serde::{Deserialize, Serialize};

use crate::core::{BrokerGateway, CancelRequest, Error, OrderRequest, Result};

/// Request leaving the process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Outbound {
    Submit(OrderRequest),
    Cancel(CancelRequest),
}

pub struct ChannelGateway {
    name: String,
    tx: flume::Sender<Outbound>,
}

impl ChannelGateway {
    /// Gateway plus the receiving end for the broker adapter.
    pub fn unbounded(name: impl Into<String>) -> (Self, flume::Receiver<Outbound>) {
        let (tx, rx) = flume::unbounded();
        (Self { name: name.into(), tx }, rx)
    }

    fn push(&self, msg: Outbound) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|_| Error::Broker(format!("{}: outbound channel closed", self.name)))
    }
}

impl BrokerGateway for ChannelGateway {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, request: &OrderRequest) -> Result<()> {
        self.push(Outbound::Submit(request.clone()))
    }

    fn cancel(&self, request: &CancelRequest) -> Result<()> {
        self.push(Outbound::Cancel(request.clone()))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{LegId, LocalOrderId, OrderIntent, Side, Symbol};

    #[test]
    fn test_requests_flow_through_channel() {
        let (gw, rx) = ChannelGateway::unbounded("ctp");
        let req = OrderRequest {
            local_id: LocalOrderId(1),
            client_ref: "92201-1".into(),
            leg: LegId::First,
            symbol: Symbol::new("ag2603"),
            side: Side::Buy,
            price: 100.0,
            quantity: 1,
            intent: OrderIntent::Quote,
        };
        gw.submit(&req).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Outbound::Submit(req));
        assert_eq!(gw.name(), "ctp");
    }

    #[test]
    fn test_closed_channel_is_broker_error() {
        let (gw, rx) = ChannelGateway::unbounded("ctp");
        drop(rx);
        let cancel = CancelRequest {
            local_id: LocalOrderId(1),
            client_ref: "92201-1".into(),
            broker_ref: None,
            leg: LegId::First,
            symbol: Symbol::new("ag2603"),
        };
        assert!(matches!(gw.cancel(&cancel), Err(Error::Broker(_))));
    }
}
