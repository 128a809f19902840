//! Pairwise strategy controller
//!
//! One lock guards everything: books, tracker, ledger, thresholds, state.
//! Market data, broker acks and commands all take it, so decisions are
//! strictly serialized. Saves snapshot the record under the lock and write
//! it after the lock is released.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::broker::{AckEvent, AckKind, FilterStats, ProtocolFilter};
use crate::core::config::StrategyConfig;
use crate::core::{
    AppConfig, BookSnapshot, BrokerGateway, Error, LegId, LocalOrderId, OrderIntent, OrderRequest,
    Result, Side,
};
use crate::execution::{Applied, Ledger, Order, OrderStatus, OrderTracker};
use crate::instrument::InstrumentLeg;
use crate::persistence::{self, DailyInitRecord};
use crate::risk::{RiskConfig, RiskGate};
use crate::signal::{self, Exposure, IndicatorSet, SignalInput, SpreadDecision, SpreadTracker};
use crate::strategy::thresholds::ThresholdSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyState {
    Inactive,
    Active,
    SquaringOff,
    Stopped,
}

impl std::fmt::Display for StrategyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StrategyState::Inactive => "Inactive",
            StrategyState::Active => "Active",
            StrategyState::SquaringOff => "SquaringOff",
            StrategyState::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

/// Point-in-time view for logging and tests
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerStatus {
    pub state: StrategyState,
    pub positions: [i64; 2],
    pub working_orders: usize,
    pub spread_origin: f64,
    pub net_pnl: f64,
    pub filter: FilterStats,
}

#[derive(Debug, Default, Clone, Copy)]
struct SquareoffProgress {
    attempts: [u32; 2],
    abandoned: [bool; 2],
}

fn side_index(side: Side) -> usize {
    match side {
        Side::Buy => 0,
        Side::Sell => 1,
    }
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

struct Inner {
    strategy_id: i32,
    settings: StrategyConfig,
    gateway: Arc<dyn BrokerGateway>,
    state: StrategyState,
    legs: [InstrumentLeg; 2],
    thresholds: ThresholdSet,
    spread: SpreadTracker,
    indicators: IndicatorSet,
    tracker: OrderTracker,
    ledger: Ledger,
    filter: ProtocolFilter,
    risk: RiskGate,
    next_order_id: u64,
    /// Orders handed to the gateway this session
    orders_sent: u64,
    consecutive_rejects: u32,
    last_hedge: [Option<DateTime<Utc>>; 2],
    squareoff: SquareoffProgress,
    pending_save: Option<DailyInitRecord>,
}

pub struct PairwiseController {
    save_path: PathBuf,
    inner: Mutex<Inner>,
}

impl PairwiseController {
    /// Build an Inactive controller from config and the loaded daily-init
    /// record. The record's aliases must match the configured legs.
    pub fn new(
        config: &AppConfig,
        record: &DailyInitRecord,
        gateway: Arc<dyn BrokerGateway>,
    ) -> Result<Self> {
        config.validate()?;
        let thresholds = config.threshold_set()?;
        let legs = [
            InstrumentLeg::new(LegId::First, &config.legs[0]),
            InstrumentLeg::new(LegId::Second, &config.legs[1]),
        ];
        record.check_aliases([legs[0].alias.as_str(), legs[1].alias.as_str()])?;
        if record.strategy_id != config.strategy.id {
            return Err(Error::Config(format!(
                "daily init is for strategy {}, config says {}",
                record.strategy_id, config.strategy.id
            )));
        }

        let mut ledger = Ledger::new([legs[0].multiplier, legs[1].multiplier]);
        for (leg, qty) in LegId::BOTH.into_iter().zip(record.opening_positions()) {
            ledger.load_prior_day(leg, qty);
        }

        info!(
            id = config.strategy.id,
            gateway = gateway.name(),
            leg1 = %legs[0].symbol,
            leg2 = %legs[1].symbol,
            pos1 = ledger.position(LegId::First),
            pos2 = ledger.position(LegId::Second),
            avg_px = record.avg_px,
            "🎛️ pairwise controller ready (Inactive)"
        );

        let inner = Inner {
            strategy_id: config.strategy.id,
            settings: config.strategy.clone(),
            gateway,
            state: StrategyState::Inactive,
            legs,
            spread: SpreadTracker::new(record.avg_px, thresholds.alpha),
            risk: RiskGate::new(RiskConfig::from_thresholds(&thresholds)),
            thresholds,
            indicators: IndicatorSet::new(),
            tracker: OrderTracker::new(),
            ledger,
            filter: ProtocolFilter::new(),
            next_order_id: 1,
            orders_sent: 0,
            consecutive_rejects: 0,
            last_hedge: [None, None],
            squareoff: SquareoffProgress::default(),
            pending_save: None,
        };
        Ok(Self {
            save_path: config.daily_init_path(),
            inner: Mutex::new(inner),
        })
    }

    pub fn state(&self) -> StrategyState {
        self.inner.lock().state
    }

    pub fn thresholds(&self) -> ThresholdSet {
        self.inner.lock().thresholds.clone()
    }

    pub fn status(&self) -> ControllerStatus {
        let inner = self.inner.lock();
        ControllerStatus {
            state: inner.state,
            positions: [inner.ledger.position(LegId::First), inner.ledger.position(LegId::Second)],
            working_orders: inner.tracker.len(),
            spread_origin: inner.spread.origin(),
            net_pnl: inner.ledger.combined_net_pnl(),
            filter: inner.filter.stats(),
        }
    }

    pub fn activate(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let state = inner.state;
        match state {
            StrategyState::Inactive => {
                inner.risk.resume();
                inner.consecutive_rejects = 0;
                inner.squareoff = SquareoffProgress::default();
                inner.transition(StrategyState::Active, "activate command");
                Ok(())
            }
            StrategyState::Active => {
                debug!("activate ignored: already Active");
                Ok(())
            }
            other => Err(Error::InvalidState(format!("cannot activate from {}", other))),
        }
    }

    /// Start a squareoff. No effect unless Active.
    pub fn deactivate(&self) -> Result<()> {
        let save = {
            let mut inner = self.inner.lock();
            let state = inner.state;
            match state {
                StrategyState::Active => inner.begin_squareoff("deactivate command"),
                StrategyState::Stopped => {
                    return Err(Error::InvalidState(
                        "cannot deactivate a stopped controller".into(),
                    ));
                }
                state => debug!(%state, "deactivate ignored"),
            }
            inner.pending_save.take()
        };
        self.persist(save);
        Ok(())
    }

    /// Replace the threshold set wholesale. On error the old set stays.
    pub fn reload_thresholds(&self, map: &BTreeMap<String, f64>) -> Result<()> {
        let next = match ThresholdSet::from_map(map) {
            Ok(ts) => ts,
            Err(e) => {
                warn!(error = %e, "threshold reload rejected, keeping previous set");
                return Err(e.into());
            }
        };
        let save = {
            let mut inner = self.inner.lock();
            inner.spread.set_alpha(next.alpha);
            inner.risk.update_limits(RiskConfig::from_thresholds(&next));
            info!(
                size = next.size,
                max_size = next.max_size,
                begin_place = next.begin_place,
                alpha = next.alpha,
                "🔄 thresholds reloaded"
            );
            inner.thresholds = next;
            inner.drive();
            inner.pending_save.take()
        };
        self.persist(save);
        Ok(())
    }

    pub fn update_indicators(&self, update: IndicatorSet) {
        let save = {
            let mut inner = self.inner.lock();
            inner.indicators.merge(update);
            inner.drive();
            inner.pending_save.take()
        };
        self.persist(save);
    }

    pub fn on_market_data(&self, leg: LegId, book: BookSnapshot) {
        let save = {
            let mut inner = self.inner.lock();
            inner.legs[leg.index()].update_book(book);
            if let Some(mark) = inner.legs[leg.index()].mark_price() {
                inner.ledger.mark(leg, mark);
            }
            if let Some(decision) = inner.evaluate_now() {
                inner.spread.observe(leg, decision.spread, decision.safety_trip);
            }
            inner.drive();
            inner.pending_save.take()
        };
        self.persist(save);
    }

    pub fn on_broker_ack(&self, ack: &AckEvent) {
        let save = {
            let mut inner = self.inner.lock();
            inner.handle_ack(ack);
            inner.pending_save.take()
        };
        self.persist(save);
    }

    /// Any state → Stopped. Always saves; a failed write is logged and
    /// returned but never blocks the caller.
    pub fn shutdown(&self) -> Result<()> {
        let record = {
            let mut inner = self.inner.lock();
            if inner.state != StrategyState::Stopped {
                for id in inner.tracker.ids() {
                    if let Err(e) = inner.cancel_order(id) {
                        warn!(%id, error = %e, "cancel on shutdown failed");
                    }
                }
                inner.risk.pause("shutdown");
                inner.transition(StrategyState::Stopped, "shutdown");
            }
            inner.record()
        };
        persistence::save(&self.save_path, &record).map_err(|e| {
            error!(
                error = %e,
                path = %self.save_path.display(),
                "🚨 daily init save failed on shutdown"
            );
            Error::from(e)
        })
    }

    fn persist(&self, record: Option<DailyInitRecord>) {
        if let Some(record) = record {
            if let Err(e) = persistence::save(&self.save_path, &record) {
                error!(error = %e, path = %self.save_path.display(), "🚨 daily init save failed");
            }
        }
    }
}

impl Inner {
    fn transition(&mut self, to: StrategyState, reason: &str) {
        info!(from = %self.state, to = %to, reason, "strategy state change");
        self.state = to;
    }

    fn record(&self) -> DailyInitRecord {
        DailyInitRecord::from_positions(
            self.strategy_id,
            self.spread.origin(),
            [self.legs[0].alias.as_str(), self.legs[1].alias.as_str()],
            [self.ledger.position(LegId::First), self.ledger.position(LegId::Second)],
        )
    }

    fn leg(&self, leg: LegId) -> &InstrumentLeg {
        &self.legs[leg.index()]
    }

    /// Run whatever the current state calls for after an event.
    fn drive(&mut self) {
        match self.state {
            StrategyState::Active => self.run_cycle(),
            StrategyState::SquaringOff => self.squareoff_step(),
            StrategyState::Inactive | StrategyState::Stopped => {}
        }
    }

    fn evaluate_now(&mut self) -> Option<SpreadDecision> {
        let (b1, b2) = (self.legs[0].book(), self.legs[1].book());
        if !b1.is_valid() || !b2.is_valid() {
            return None;
        }
        let spread = signal::spread_of(b1, b2, self.settings.use_weighted_mid)?;
        self.spread.seed(spread);
        let reference = self.spread.reference(&self.indicators)?;
        let exposure = Exposure {
            position: self.ledger.position(LegId::First),
            open_buy: self.tracker.open_qty(LegId::First, Side::Buy),
            open_sell: self.tracker.open_qty(LegId::First, Side::Sell),
        };
        signal::evaluate(&SignalInput {
            leg1: b1,
            leg2: b2,
            reference,
            thresholds: &self.thresholds,
            tick1: self.legs[0].tick_size,
            use_weighted_mid: self.settings.use_weighted_mid,
            exposure,
        })
    }

    fn handle_ack(&mut self, ack: &AckEvent) {
        let Some(event) = self.filter.filter(ack) else {
            return;
        };
        let Some(applied) = self.tracker.apply_terminal_event(&event, &mut self.ledger) else {
            return;
        };
        self.note_outcome(&applied);
        if applied.unbooked {
            let reason = format!("unbooked fill on order {}", applied.local_id);
            self.begin_squareoff(&reason);
        }
        self.drive();
    }

    fn note_outcome(&mut self, applied: &Applied) {
        if applied.fill_delta != 0 {
            if let Some(mark) = self.leg(applied.leg).mark_price() {
                self.ledger.mark(applied.leg, mark);
            }
        }
        // Any confirm from the broker ends a reject streak.
        let confirmed = matches!(applied.kind, AckKind::Accepted | AckKind::Canceled);
        if applied.fill_delta != 0 || confirmed {
            self.consecutive_rejects = 0;
        }
        if matches!(applied.kind, AckKind::Rejected | AckKind::Error) {
            self.consecutive_rejects += 1;
            warn!(
                id = %applied.local_id,
                leg = %applied.leg,
                intent = ?applied.intent,
                consecutive = self.consecutive_rejects,
                "order rejected"
            );
        }
    }

    fn client_ref(&self, id: LocalOrderId) -> String {
        format!("{}-{}", self.strategy_id, id.0)
    }

    fn send_order(
        &mut self,
        leg: LegId,
        side: Side,
        price: f64,
        quantity: i64,
        intent: OrderIntent,
    ) -> Result<LocalOrderId> {
        let local_id = LocalOrderId(self.next_order_id);
        let request = OrderRequest {
            local_id,
            client_ref: self.client_ref(local_id),
            leg,
            symbol: self.leg(leg).symbol.clone(),
            side,
            price: self.leg(leg).round_to_tick(price),
            quantity,
            intent,
        };
        self.risk
            .check_order(&request, self.ledger.position(leg), self.leg(leg).lot_size)?;
        self.gateway.submit(&request)?;
        self.next_order_id += 1;
        self.orders_sent += 1;
        self.tracker.register_sent(Order::from_request(&request))?;
        info!(
            id = %local_id,
            %leg,
            %side,
            px = request.price,
            qty = quantity,
            ?intent,
            "📤 order sent"
        );
        Ok(local_id)
    }

    fn cancel_order(&mut self, id: LocalOrderId) -> Result<()> {
        match self.tracker.get(id) {
            Some(order) if order.status != OrderStatus::CancelPending => {}
            _ => return Ok(()),
        }
        let Some(request) = self.tracker.mark_cancel_pending(id) else {
            return Ok(());
        };
        if let Err(e) = self.gateway.cancel(&request) {
            self.tracker.clear_cancel_pending(id);
            return Err(e);
        }
        debug!(%id, leg = %request.leg, "cancel sent");
        Ok(())
    }

    fn begin_squareoff(&mut self, reason: &str) {
        if self.state != StrategyState::Active {
            return;
        }
        warn!(reason, "🚨 squareoff triggered");
        self.risk.pause(reason);
        self.squareoff = SquareoffProgress::default();
        self.transition(StrategyState::SquaringOff, reason);
        self.squareoff_step();
    }

    fn run_cycle(&mut self) {
        let Some(decision) = self.evaluate_now() else {
            return;
        };
        if let Some(reason) = self.squareoff_reason(&decision, Utc::now()) {
            self.begin_squareoff(&reason);
            return;
        }

        self.hedge_residual();
        self.cancel_stale_quotes(&decision);
        if let Err(e) = self.place_entries(&decision) {
            error!(error = %e, "🚨 unrecoverable leg imbalance");
            self.begin_squareoff("leg imbalance");
        }
    }

    /// First session limit the current state breaches, if any.
    fn squareoff_reason(&self, decision: &SpreadDecision, now: DateTime<Utc>) -> Option<String> {
        if decision.safety_trip {
            return Some(format!(
                "safety trip: spread {:.4} deviates {:.4} from reference {:.4}",
                decision.spread, decision.deviation, decision.reference
            ));
        }
        if let Some(end) = self.settings.end_time.filter(|t| now >= *t) {
            return Some(format!("end time {} reached", end));
        }
        if let Some(flat) = self.settings.agg_flat_time.filter(|t| now >= *t) {
            return Some(format!("aggressive flat time {} reached", flat));
        }

        let ts = &self.thresholds;
        if ts.max_loss > 0.0 {
            let pnl = self.ledger.combined_net_pnl();
            if pnl < -ts.max_loss {
                return Some(format!("max loss: net pnl {:.2}", pnl));
            }
        }
        if ts.max_order_count > 0 && self.orders_sent >= u64::from(ts.max_order_count) {
            return Some(format!("order count {} reached", self.orders_sent));
        }
        for leg in LegId::BOTH {
            let snap = self.ledger.snapshot(leg);
            let traded = snap.bought_volume.max(snap.sold_volume);
            if ts.max_traded_qty > 0 && traded >= ts.max_traded_qty {
                return Some(format!(
                    "{} traded qty limit: bought {} sold {}",
                    leg, snap.bought_volume, snap.sold_volume
                ));
            }
            if snap.quantity == 0 {
                continue;
            }
            let upnl = snap.unrealized_pnl.to_f64().unwrap_or(0.0);
            if ts.upnl_loss > 0.0 && upnl < -ts.upnl_loss {
                return Some(format!("{} unrealized loss {:.2}", leg, upnl));
            }
            let drawdown = snap.drawdown.to_f64().unwrap_or(0.0);
            if ts.stop_loss > 0.0 && drawdown < -ts.stop_loss {
                return Some(format!("{} stop loss: drawdown {:.2}", leg, drawdown));
            }
        }
        if self.consecutive_rejects >= self.settings.reject_limit {
            return Some(format!("{} consecutive rejects", self.consecutive_rejects));
        }
        None
    }

    /// Hedge the uncovered part of `pos1 + pos2` aggressively on leg 2.
    ///
    /// Balanced quote pairs net to zero. What is left of them (a pair with
    /// one side filled) counts as passive cover, as do working hedges, but
    /// only when it reduces the residual.
    fn hedge_residual(&mut self) {
        let residual = self.ledger.position(LegId::First) + self.ledger.position(LegId::Second);
        if residual == 0 {
            return;
        }
        let pending_pairs: i64 = LegId::BOTH
            .into_iter()
            .flat_map(|leg| self.tracker.open_orders(leg))
            .filter(|o| o.intent == OrderIntent::Quote)
            .map(Order::signed_remaining)
            .sum();
        let hedges: i64 = self
            .tracker
            .open_orders(LegId::Second)
            .filter(|o| o.intent == OrderIntent::Hedge)
            .map(Order::signed_remaining)
            .filter(|q| q.signum() == -residual.signum())
            .sum();
        let pair_cover = if pending_pairs.signum() == -residual.signum() {
            pending_pairs
        } else {
            0
        };
        let uncovered = residual + pair_cover + hedges;
        if uncovered.signum() != residual.signum() {
            return;
        }

        let side = if uncovered > 0 { Side::Sell } else { Side::Buy };
        let hedge_working = self
            .tracker
            .open_orders(LegId::Second)
            .any(|o| o.intent == OrderIntent::Hedge && o.side == side);
        if hedge_working {
            return;
        }
        let now = Utc::now();
        if let Some(last) = self.last_hedge[side_index(side)] {
            if (now - last).num_milliseconds() < self.settings.hedge_cooloff_ms {
                debug!(%side, "hedge in cool-off");
                return;
            }
        }
        let qty = self.legs[1].round_lots(uncovered.abs());
        let Some(price) = self.legs[1].aggressive_price(side, 1) else {
            return;
        };
        if qty == 0 {
            return;
        }
        match self.send_order(LegId::Second, side, price, qty, OrderIntent::Hedge) {
            Ok(id) => {
                self.last_hedge[side_index(side)] = Some(now);
                info!(%id, residual, qty, "⚖️ hedging leg2 imbalance");
            }
            Err(e) => warn!(error = %e, residual, "hedge order failed"),
        }
    }

    fn cancel_stale_quotes(&mut self, decision: &SpreadDecision) {
        let tol1 = self.settings.quote_tolerance_ticks as f64 * self.legs[0].tick_size;
        let mut stale: Vec<(LocalOrderId, &'static str)> = Vec::new();

        for order in self.tracker.open_orders(LegId::First) {
            if order.intent != OrderIntent::Quote || order.status == OrderStatus::CancelPending {
                continue;
            }
            match decision.entry(order.side) {
                None => stale.push((order.local_id, "quoting disabled")),
                Some(entry) if entry.should_remove(order.price) => {
                    stale.push((order.local_id, "remove threshold crossed"))
                }
                Some(entry) if (order.price - entry.leg1_price).abs() > tol1 + 1e-9 => {
                    stale.push((order.local_id, "price drifted from target"))
                }
                Some(_) => {}
            }
        }

        // Leg-1 quotes pulled in this pass no longer pair anything.
        let pulled: HashSet<LocalOrderId> = stale.iter().map(|(id, _)| *id).collect();
        for order in self.tracker.open_orders(LegId::Second) {
            if order.intent != OrderIntent::Quote || order.status == OrderStatus::CancelPending {
                continue;
            }
            let partner = order.side.opposite();
            let paired = self.tracker.open_orders(LegId::First).any(|o| {
                o.intent == OrderIntent::Quote
                    && o.side == partner
                    && o.status != OrderStatus::CancelPending
                    && !pulled.contains(&o.local_id)
            });
            if !paired {
                stale.push((order.local_id, "leg1 partner gone"));
            }
        }

        for (id, reason) in stale {
            debug!(%id, reason, "pulling quote");
            if let Err(e) = self.cancel_order(id) {
                warn!(%id, error = %e, "quote cancel failed");
            }
        }
    }

    fn place_entries(&mut self, decision: &SpreadDecision) -> Result<()> {
        // Hedge first, quote after.
        if self.ledger.position(LegId::First) + self.ledger.position(LegId::Second) != 0 {
            return Ok(());
        }
        let lot = {
            let (a, b) = (self.legs[0].lot_size, self.legs[1].lot_size);
            a / gcd(a, b) * b
        };
        for side in [Side::Buy, Side::Sell] {
            let Some(entry) = decision.entry(side).copied() else {
                continue;
            };
            if !entry.eligible {
                continue;
            }
            let resting: Vec<OrderStatus> = self
                .tracker
                .open_orders(LegId::First)
                .filter(|o| o.intent == OrderIntent::Quote && o.side == side)
                .map(|o| o.status)
                .collect();
            if resting.contains(&OrderStatus::CancelPending) {
                continue;
            }
            if resting.len() >= self.thresholds.supporting_orders as usize {
                continue;
            }
            let qty = entry.quantity - entry.quantity.rem_euclid(lot);
            if qty <= 0 {
                continue;
            }

            let leg_a = match self.send_order(
                LegId::First,
                side,
                entry.leg1_price,
                qty,
                OrderIntent::Quote,
            ) {
                Ok(id) => id,
                Err(e) => {
                    warn!(%side, error = %e, "leg1 quote not placed");
                    continue;
                }
            };
            match self.send_order(
                LegId::Second,
                side.opposite(),
                entry.leg2_price,
                qty,
                OrderIntent::Quote,
            ) {
                Ok(leg_b) => info!(%side, %leg_a, %leg_b, qty, "📡 pair quoted"),
                Err(e) => {
                    warn!(%leg_a, error = %e, "leg2 quote failed, pulling leg1");
                    if let Err(cancel_err) = self.cancel_order(leg_a) {
                        return Err(Error::LegImbalance(format!(
                            "leg2 failed ({}) and leg1 order {} could not be cancelled ({})",
                            e, leg_a, cancel_err
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Cancel everything, flatten each leg, finish when both legs are done.
    fn squareoff_step(&mut self) {
        for id in self.tracker.ids() {
            let cancel = self
                .tracker
                .get(id)
                .is_some_and(|o| o.intent != OrderIntent::Flatten);
            if cancel {
                if let Err(e) = self.cancel_order(id) {
                    warn!(%id, error = %e, "squareoff cancel failed");
                }
            }
        }

        let mut done = [false; 2];
        for leg in LegId::BOTH {
            let i = leg.index();
            let position = self.ledger.position(leg);
            if position == 0 || self.squareoff.abandoned[i] {
                done[i] = true;
                continue;
            }
            if self.tracker.open_orders(leg).next().is_some() {
                continue;
            }
            let qty = self.legs[i].round_lots(position.abs());
            if qty == 0 || self.squareoff.attempts[i] >= self.settings.max_squareoff_attempts {
                error!(
                    %leg,
                    residual = position,
                    attempts = self.squareoff.attempts[i],
                    "🚨 squareoff residual accepted"
                );
                self.squareoff.abandoned[i] = true;
                done[i] = true;
                continue;
            }
            let Some(side) = Side::closing(position) else {
                continue;
            };
            let Some(price) = self.legs[i].aggressive_price(side, 1) else {
                debug!(%leg, "no book to flatten against yet");
                continue;
            };
            self.squareoff.attempts[i] += 1;
            if let Err(e) = self.send_order(leg, side, price, qty, OrderIntent::Flatten) {
                let attempt = self.squareoff.attempts[i];
                warn!(%leg, error = %e, attempt, "flatten order failed");
            }
        }

        if done.iter().all(|d| *d) && self.tracker.is_empty() {
            self.transition(StrategyState::Inactive, "squareoff complete");
            info!("✅ squareoff complete");
            self.pending_save = Some(self.record());
        }
    }
}
