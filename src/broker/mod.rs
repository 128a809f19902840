//! Broker protocol filter.
//!
//! The broker emits several acknowledgments per order, most of them
//! intermediate (order sitting at the front gateway, cancel in flight, ...).
//! Only transitions that change business state leave this module; the rest
//! are counted, logged and dropped. Nothing unrecognized is ever turned into
//! an error event: a late fill must still find its order.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Broker-side lifecycle marker of the request itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitStage {
    InsertSubmitted,
    CancelSubmitted,
    ModifySubmitted,
    Accepted,
    InsertRejected,
    CancelRejected,
    ModifyRejected,
}

impl SubmitStage {
    pub const ALL: [SubmitStage; 7] = [
        SubmitStage::InsertSubmitted,
        SubmitStage::CancelSubmitted,
        SubmitStage::ModifySubmitted,
        SubmitStage::Accepted,
        SubmitStage::InsertRejected,
        SubmitStage::CancelRejected,
        SubmitStage::ModifyRejected,
    ];

    /// Parse the one-character wire code.
    pub fn from_code(code: char) -> Option<Self> {
        Some(match code {
            '0' => SubmitStage::InsertSubmitted,
            '1' => SubmitStage::CancelSubmitted,
            '2' => SubmitStage::ModifySubmitted,
            '3' => SubmitStage::Accepted,
            '4' => SubmitStage::InsertRejected,
            '5' => SubmitStage::CancelRejected,
            '6' => SubmitStage::ModifyRejected,
            _ => return None,
        })
    }
}

/// Broker-side order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerOrderStatus {
    AllTraded,
    PartTradedQueueing,
    PartTradedNotQueueing,
    NoTradeQueueing,
    NoTradeNotQueueing,
    Canceled,
    Unknown,
    NotTouched,
    Touched,
}

impl BrokerOrderStatus {
    pub const ALL: [BrokerOrderStatus; 9] = [
        BrokerOrderStatus::AllTraded,
        BrokerOrderStatus::PartTradedQueueing,
        BrokerOrderStatus::PartTradedNotQueueing,
        BrokerOrderStatus::NoTradeQueueing,
        BrokerOrderStatus::NoTradeNotQueueing,
        BrokerOrderStatus::Canceled,
        BrokerOrderStatus::Unknown,
        BrokerOrderStatus::NotTouched,
        BrokerOrderStatus::Touched,
    ];

    pub fn from_code(code: char) -> Option<Self> {
        Some(match code {
            '0' => BrokerOrderStatus::AllTraded,
            '1' => BrokerOrderStatus::PartTradedQueueing,
            '2' => BrokerOrderStatus::PartTradedNotQueueing,
            '3' => BrokerOrderStatus::NoTradeQueueing,
            '4' => BrokerOrderStatus::NoTradeNotQueueing,
            '5' => BrokerOrderStatus::Canceled,
            'a' => BrokerOrderStatus::Unknown,
            'b' => BrokerOrderStatus::NotTouched,
            'c' => BrokerOrderStatus::Touched,
            _ => return None,
        })
    }

    /// The order is still resting at the exchange.
    fn is_live(self) -> bool {
        matches!(
            self,
            BrokerOrderStatus::NoTradeQueueing | BrokerOrderStatus::PartTradedQueueing
        )
    }
}

/// Raw acknowledgment as delivered by the broker-protocol collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckEvent {
    /// Reference we sent with the order
    #[serde(default)]
    pub client_ref: Option<String>,
    /// Exchange-assigned reference, present once the exchange has seen it
    #[serde(default)]
    pub broker_ref: Option<String>,
    pub submit_stage: SubmitStage,
    pub order_status: BrokerOrderStatus,
    /// Cumulative traded quantity of the order
    #[serde(default)]
    pub filled_qty: i64,
    #[serde(default)]
    pub price: f64,
}

/// Business-meaningful acknowledgment kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckKind {
    Accepted,
    PartialFill,
    FullFill,
    Canceled,
    Rejected,
    Error,
}

impl AckKind {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AckKind::FullFill | AckKind::Canceled | AckKind::Rejected | AckKind::Error
        )
    }
}

/// Outcome of classifying one `(submit_stage, order_status)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Forward(AckKind),
    /// Known non-terminal protocol noise
    Intermediate,
    /// Combination outside the protocol table
    Unclassified,
}

/// Exhaustive classification table.
pub fn classify(stage: SubmitStage, status: BrokerOrderStatus) -> Classification {
    use BrokerOrderStatus as S;
    use Classification::{Forward, Intermediate, Unclassified};
    use SubmitStage as St;

    match (stage, status) {
        // Broker or exchange refused the insert outright
        (St::InsertRejected, _) => Forward(AckKind::Rejected),

        (_, S::AllTraded) => Forward(AckKind::FullFill),

        (
            St::InsertSubmitted | St::Accepted | St::CancelSubmitted | St::ModifySubmitted,
            S::PartTradedQueueing,
        ) => Forward(AckKind::PartialFill),

        (St::Accepted | St::CancelSubmitted, S::Canceled | S::PartTradedNotQueueing) => {
            Forward(AckKind::Canceled)
        }

        (St::Accepted, S::NoTradeQueueing) => Forward(AckKind::Accepted),
        (St::Accepted, S::NoTradeNotQueueing) => Forward(AckKind::Error),

        // At the gateway, not yet at the exchange
        (St::InsertSubmitted, S::Unknown | S::NoTradeQueueing) => Intermediate,
        // Cancel/modify in flight
        (St::CancelSubmitted | St::ModifySubmitted, S::NoTradeQueueing) => Intermediate,
        // Conditional orders waiting on their trigger
        (_, S::NotTouched | S::Touched) => Intermediate,
        // Cancel/modify refused; the order keeps working
        (St::CancelRejected | St::ModifyRejected, s) if s.is_live() => Intermediate,

        _ => Unclassified,
    }
}

/// A classified acknowledgment ready for the order tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerEvent {
    pub kind: AckKind,
    pub client_ref: Option<String>,
    pub broker_ref: Option<String>,
    pub filled_qty: i64,
    pub price: f64,
}

/// Counters for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub forwarded: u64,
    pub intermediate: u64,
    pub anomalies: u64,
}

/// Stateless classification plus counters.
#[derive(Debug, Default)]
pub struct ProtocolFilter {
    stats: FilterStats,
}

impl ProtocolFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward exactly one event for a business transition, nothing otherwise.
    pub fn filter(&mut self, ack: &AckEvent) -> Option<BrokerEvent> {
        match classify(ack.submit_stage, ack.order_status) {
            Classification::Forward(kind) => {
                self.stats.forwarded += 1;
                Some(BrokerEvent {
                    kind,
                    client_ref: ack.client_ref.clone(),
                    broker_ref: ack.broker_ref.clone(),
                    filled_qty: ack.filled_qty,
                    price: ack.price,
                })
            }
            Classification::Intermediate => {
                self.stats.intermediate += 1;
                debug!(
                    client_ref = ?ack.client_ref,
                    stage = ?ack.submit_stage,
                    status = ?ack.order_status,
                    "intermediate broker ack dropped"
                );
                None
            }
            Classification::Unclassified => {
                self.stats.anomalies += 1;
                warn!(
                    client_ref = ?ack.client_ref,
                    broker_ref = ?ack.broker_ref,
                    stage = ?ack.submit_stage,
                    status = ?ack.order_status,
                    filled = ack.filled_qty,
                    "⚠️ broker protocol anomaly: unclassified ack dropped"
                );
                None
            }
        }
    }

    pub fn stats(&self) -> FilterStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(stage: SubmitStage, status: BrokerOrderStatus) -> AckEvent {
        AckEvent {
            client_ref: Some("92201-1".into()),
            broker_ref: None,
            submit_stage: stage,
            order_status: status,
            filled_qty: 0,
            price: 0.0,
        }
    }

    #[test]
    fn test_gateway_stage_is_not_forwarded() {
        let mut filter = ProtocolFilter::new();
        assert!(filter
            .filter(&ack(SubmitStage::InsertSubmitted, BrokerOrderStatus::Unknown))
            .is_none());
        assert!(filter
            .filter(&ack(SubmitStage::InsertSubmitted, BrokerOrderStatus::NoTradeQueueing))
            .is_none());
        assert_eq!(filter.stats().intermediate, 2);
        assert_eq!(filter.stats().forwarded, 0);
    }

    #[test]
    fn test_insert_rejected_is_a_reject_not_an_error() {
        assert_eq!(
            classify(SubmitStage::InsertRejected, BrokerOrderStatus::Canceled),
            Classification::Forward(AckKind::Rejected)
        );
        assert_eq!(
            classify(SubmitStage::Accepted, BrokerOrderStatus::NoTradeNotQueueing),
            Classification::Forward(AckKind::Error)
        );
    }

    #[test]
    fn test_unknown_combination_never_becomes_error() {
        let mut filter = ProtocolFilter::new();
        let out = filter.filter(&ack(SubmitStage::Accepted, BrokerOrderStatus::Unknown));
        assert!(out.is_none());
        assert_eq!(filter.stats().anomalies, 1);
    }

    #[test]
    fn test_every_pair_forwards_at_most_once() {
        let mut filter = ProtocolFilter::new();
        for stage in SubmitStage::ALL {
            for status in BrokerOrderStatus::ALL {
                let before = filter.stats();
                let out = filter.filter(&ack(stage, status));
                let after = filter.stats();
                match classify(stage, status) {
                    Classification::Forward(kind) => {
                        assert_eq!(out.map(|e| e.kind), Some(kind));
                        assert_eq!(after.forwarded, before.forwarded + 1);
                    }
                    Classification::Intermediate => {
                        assert!(out.is_none());
                        assert_eq!(after.intermediate, before.intermediate + 1);
                    }
                    Classification::Unclassified => {
                        assert!(out.is_none());
                        assert_eq!(after.anomalies, before.anomalies + 1);
                    }
                }
            }
        }
        let stats = filter.stats();
        assert_eq!(stats.forwarded + stats.intermediate + stats.anomalies, 63);
    }

    #[test]
    fn test_fills_forward_through_cancel_in_flight() {
        assert_eq!(
            classify(SubmitStage::CancelSubmitted, BrokerOrderStatus::PartTradedQueueing),
            Classification::Forward(AckKind::PartialFill)
        );
        assert_eq!(
            classify(SubmitStage::CancelRejected, BrokerOrderStatus::AllTraded),
            Classification::Forward(AckKind::FullFill)
        );
        assert_eq!(
            classify(SubmitStage::CancelRejected, BrokerOrderStatus::NoTradeQueueing),
            Classification::Intermediate
        );
    }

    #[test]
    fn test_wire_codes() {
        assert_eq!(SubmitStage::from_code('4'), Some(SubmitStage::InsertRejected));
        assert_eq!(BrokerOrderStatus::from_code('a'), Some(BrokerOrderStatus::Unknown));
        assert_eq!(BrokerOrderStatus::from_code('z'), None);
    }
}
