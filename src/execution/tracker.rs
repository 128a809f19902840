//! Order State Tracker - registry of in-flight orders
//!
//! Orders live in an arena keyed by local id. Broker refs and client refs are
//! secondary indexes pointing back into it. An order is present if and only if
//! it is non-terminal: every terminal event removes it together with its index
//! entries, so anything arriving later for that order resolves to nothing.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use crate::broker::{AckKind, BrokerEvent};
use crate::core::{
    CancelRequest, Error, LegId, LocalOrderId, OrderIntent, OrderRequest, Result, Side, Symbol,
};
use crate::execution::ledger::Ledger;

/// Non-terminal order states. Terminal states are never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Submitted,
    Accepted,
    PartiallyFilled,
    CancelPending,
}

/// One working order on one leg
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub local_id: LocalOrderId,
    pub client_ref: String,
    pub broker_ref: Option<String>,
    pub leg: LegId,
    pub symbol: Symbol,
    pub side: Side,
    pub price: f64,
    pub quantity: i64,
    pub filled: i64,
    pub status: OrderStatus,
    pub intent: OrderIntent,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn from_request(request: &OrderRequest) -> Self {
        let now = Utc::now();
        Self {
            local_id: request.local_id,
            client_ref: request.client_ref.clone(),
            broker_ref: None,
            leg: request.leg,
            symbol: request.symbol.clone(),
            side: request.side,
            price: request.price,
            quantity: request.quantity,
            filled: 0,
            status: OrderStatus::Submitted,
            intent: request.intent,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn remaining(&self) -> i64 {
        self.quantity - self.filled
    }

    /// Remaining quantity signed by side
    pub fn signed_remaining(&self) -> i64 {
        self.side.sign() * self.remaining()
    }

    pub fn cancel_request(&self) -> CancelRequest {
        CancelRequest {
            local_id: self.local_id,
            client_ref: self.client_ref.clone(),
            broker_ref: self.broker_ref.clone(),
            leg: self.leg,
            symbol: self.symbol.clone(),
        }
    }
}

/// Reference carried by a broker acknowledgment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OrderRef {
    Client(String),
    Broker(String),
}

/// What applying one event did
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Applied {
    pub local_id: LocalOrderId,
    pub leg: LegId,
    pub side: Side,
    pub intent: OrderIntent,
    pub kind: AckKind,
    /// Signed position delta pushed to the ledger
    pub fill_delta: i64,
    pub fill_price: f64,
    pub removed: bool,
    /// A fill arrived but the ledger refused it; the order stays registered
    pub unbooked: bool,
}

#[derive(Debug, Default)]
pub struct OrderTracker {
    orders: HashMap<LocalOrderId, Order>,
    by_broker: HashMap<String, LocalOrderId>,
    by_client: HashMap<String, LocalOrderId>,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an order that was just handed to the broker.
    pub fn register_sent(&mut self, order: Order) -> Result<()> {
        if self.orders.contains_key(&order.local_id)
            || self.by_client.contains_key(&order.client_ref)
        {
            return Err(Error::DuplicateOrder(order.local_id));
        }
        debug!(id = %order.local_id, client_ref = %order.client_ref, leg = %order.leg,
            side = %order.side, px = order.price, qty = order.quantity, "order registered");
        self.by_client.insert(order.client_ref.clone(), order.local_id);
        self.orders.insert(order.local_id, order);
        Ok(())
    }

    /// Resolve a broker-side reference to its local order.
    pub fn lookup(&self, order_ref: &OrderRef) -> Option<&Order> {
        let id = match order_ref {
            OrderRef::Client(r) => self.by_client.get(r)?,
            OrderRef::Broker(r) => self.by_broker.get(r)?,
        };
        self.orders.get(id)
    }

    fn resolve(&self, event: &BrokerEvent) -> Option<LocalOrderId> {
        event
            .broker_ref
            .as_ref()
            .and_then(|r| self.by_broker.get(r))
            .or_else(|| event.client_ref.as_ref().and_then(|r| self.by_client.get(r)))
            .copied()
    }

    /// Apply one filtered event. Unknown references are logged and ignored
    /// without touching the ledger.
    pub fn apply_terminal_event(
        &mut self,
        event: &BrokerEvent,
        ledger: &mut Ledger,
    ) -> Option<Applied> {
        let Some(id) = self.resolve(event) else {
            warn!(
                client_ref = ?event.client_ref,
                broker_ref = ?event.broker_ref,
                kind = ?event.kind,
                "ack for unknown order ignored"
            );
            return None;
        };
        let order = self.orders.get_mut(&id)?;
        order.updated_at = Utc::now();

        if order.broker_ref.is_none() {
            if let Some(broker_ref) = &event.broker_ref {
                order.broker_ref = Some(broker_ref.clone());
                self.by_broker.insert(broker_ref.clone(), id);
            }
        }

        let mut applied = Applied {
            local_id: id,
            leg: order.leg,
            side: order.side,
            intent: order.intent,
            kind: event.kind,
            fill_delta: 0,
            fill_price: 0.0,
            removed: false,
            unbooked: false,
        };

        let cumulative = match event.kind {
            AckKind::Rejected | AckKind::Error => {
                warn!(%id, leg = %order.leg, kind = ?event.kind,
                    "❌ order rejected, dropping from registry");
                applied.removed = true;
                self.remove(id);
                return Some(applied);
            }
            AckKind::Accepted => {
                if order.status == OrderStatus::Submitted {
                    order.status = OrderStatus::Accepted;
                }
                debug!(%id, broker_ref = ?order.broker_ref, "order accepted");
                return Some(applied);
            }
            AckKind::FullFill => order.quantity,
            AckKind::PartialFill | AckKind::Canceled => event.filled_qty,
        };

        if cumulative > order.quantity {
            error!(%id, cumulative, requested = order.quantity,
                "overfill reported by broker, clamping");
        }
        let delta = cumulative.min(order.quantity) - order.filled;
        if delta > 0 {
            let price = if event.price.is_finite() && event.price > 0.0 {
                event.price
            } else {
                order.price
            };
            let signed = order.side.sign() * delta;
            match ledger.apply_fill(order.leg, signed, price) {
                Ok(snap) => {
                    order.filled += delta;
                    applied.fill_delta = signed;
                    applied.fill_price = price;
                    info!(%id, leg = %order.leg, side = %order.side, qty = delta, px = price,
                        pos = snap.quantity, "💰 fill applied");
                }
                Err(e) => {
                    error!(%id, leg = %order.leg, qty = delta, px = price, error = %e,
                        "🚨 fill could not be booked, order kept");
                    applied.unbooked = true;
                    return Some(applied);
                }
            }
        }

        let done = match event.kind {
            AckKind::FullFill | AckKind::Canceled => true,
            _ => order.filled >= order.quantity,
        };
        if done {
            applied.removed = true;
            self.remove(id);
        } else if order.status != OrderStatus::CancelPending {
            order.status = OrderStatus::PartiallyFilled;
        }
        Some(applied)
    }

    /// Flag a cancel as sent and build its request.
    pub fn mark_cancel_pending(&mut self, id: LocalOrderId) -> Option<CancelRequest> {
        let order = self.orders.get_mut(&id)?;
        order.status = OrderStatus::CancelPending;
        order.updated_at = Utc::now();
        Some(order.cancel_request())
    }

    /// Undo a cancel flag after the gateway refused the request.
    pub fn clear_cancel_pending(&mut self, id: LocalOrderId) {
        if let Some(order) = self.orders.get_mut(&id) {
            if order.status == OrderStatus::CancelPending {
                order.status = if order.filled > 0 {
                    OrderStatus::PartiallyFilled
                } else {
                    OrderStatus::Accepted
                };
            }
        }
    }

    fn remove(&mut self, id: LocalOrderId) -> Option<Order> {
        let order = self.orders.remove(&id)?;
        self.by_client.remove(&order.client_ref);
        if let Some(broker_ref) = &order.broker_ref {
            self.by_broker.remove(broker_ref);
        }
        debug!(%id, "order removed");
        Some(order)
    }

    pub fn get(&self, id: LocalOrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub fn open_orders(&self, leg: LegId) -> impl Iterator<Item = &Order> {
        self.orders.values().filter(move |o| o.leg == leg)
    }

    /// Remaining quantity resting on one side of a leg
    pub fn open_qty(&self, leg: LegId, side: Side) -> i64 {
        self.open_orders(leg).filter(|o| o.side == side).map(Order::remaining).sum()
    }

    /// Net signed remaining quantity on a leg
    pub fn signed_open_qty(&self, leg: LegId) -> i64 {
        self.open_orders(leg).map(Order::signed_remaining).sum()
    }

    pub fn ids(&self) -> Vec<LocalOrderId> {
        let mut ids: Vec<_> = self.orders.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}
