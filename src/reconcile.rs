//! Reconciliation of broker snapshots into journal events
//!
//! Tickets are diffed against an in-memory [`RuntimeTracker`]: new pending
//! orders and positions are reported as seen, missing ones as gone. Expired
//! orders can be cancelled, and the deal history is logged incrementally from
//! the last poll time stored in [`TrackingState`].

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDateTime};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
    broker::{retain_tagged, Broker, Deal, OpenPosition, PendingOrder},
    config::EngineConfig,
    journal::{Event, EventKind, Journal},
    partials::prune_closed,
    state::{iso, parse_iso, Pruned, TrackingState},
    Ticket,
};

/// How far back the first deal poll reaches
pub const FIRST_DEAL_POLL_HOURS: i64 = 12;

/// Tickets seen by this process. Not persisted: a restart reports every live
/// ticket as newly seen once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeTracker {
    pub known_order_tickets: BTreeSet<Ticket>,
    pub known_position_tickets: BTreeSet<Ticket>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketDiff {
    /// Ascending
    pub appeared: Vec<Ticket>,
    /// Ascending
    pub vanished: Vec<Ticket>,
}

pub fn diff_tickets(known: &BTreeSet<Ticket>, current: &BTreeSet<Ticket>) -> TicketDiff {
    TicketDiff {
        appeared: current.difference(known).copied().collect(),
        vanished: known.difference(current).copied().collect(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub orders: TicketDiff,
    pub positions: TicketDiff,
    pub cancel_attempts: Vec<Ticket>,
    pub deals_logged: usize,
    pub pruned: Pruned,
}

// ============================================================
// EVENT PAYLOADS
// ============================================================

fn order_seen(order: &PendingOrder) -> serde_json::Value {
    json!({
        "ticket": order.ticket,
        "symbol": order.symbol,
        "type": order.kind.code(),
        "price_open": order.price_open,
        "sl": order.sl,
        "tp": order.tp,
        "time_setup": iso(order.time_setup),
        "time_expiration": order.time_expiration.map(iso),
    })
}

fn position_seen(position: &OpenPosition) -> serde_json::Value {
    json!({
        "ticket": position.ticket,
        "symbol": position.symbol,
        "type": position.side,
        "volume": position.volume,
        "price_open": position.price_open,
        "sl": position.sl,
        "tp": position.tp,
        "profit": position.profit,
    })
}

fn deal_payload(deal: &Deal) -> serde_json::Value {
    json!({
        "ticket": deal.ticket,
        "order": deal.order,
        "position_id": deal.position_id,
        "symbol": deal.symbol,
        "type": deal.side,
        "entry": deal.entry,
        "volume": deal.volume,
        "price": deal.price,
        "profit": deal.profit,
        "time": iso(deal.time),
        "comment": deal.comment,
    })
}

// ============================================================
// RECONCILER
// ============================================================

pub struct Reconciler<'a> {
    config: &'a EngineConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    pub fn run<B: Broker, J: Journal>(
        &self,
        broker: &mut B,
        state: &mut TrackingState,
        tracker: &mut RuntimeTracker,
        journal: &mut J,
        now: NaiveDateTime,
    ) -> ReconcileReport {
        let tag = self.config.magic_number;
        let mut report = ReconcileReport::default();

        // Pending orders
        let orders = retain_tagged(broker.pending_orders(tag), tag);
        let current: BTreeSet<Ticket> = orders.iter().map(|o| o.ticket).filter(|&t| t > 0).collect();
        report.orders = diff_tickets(&tracker.known_order_tickets, &current);
        for ticket in &report.orders.appeared {
            if let Some(order) = orders.iter().find(|o| o.ticket == *ticket) {
                journal.record(Event::new(now, EventKind::PendingOrderSeen, order_seen(order)));
            }
        }
        for ticket in &report.orders.vanished {
            journal.record(Event::new(now, EventKind::PendingOrderGone, json!({ "ticket": ticket })));
        }
        tracker.known_order_tickets = current;

        if self.config.cancel_unfilled_at_end_of_day {
            report.cancel_attempts = self.cancel_expired(broker, &orders, journal, now);
        }

        // Positions
        let positions = retain_tagged(broker.open_positions(tag), tag);
        let current: BTreeSet<Ticket> = positions.iter().map(|p| p.ticket).filter(|&t| t > 0).collect();
        report.positions = diff_tickets(&tracker.known_position_tickets, &current);
        for ticket in &report.positions.appeared {
            if let Some(position) = positions.iter().find(|p| p.ticket == *ticket) {
                info!(ticket, symbol = %position.symbol, "position opened");
                journal.record(Event::new(now, EventKind::PositionOpenSeen, position_seen(position)));
            }
        }
        for ticket in &report.positions.vanished {
            info!(ticket, "position closed");
            journal.record(Event::new(now, EventKind::PositionGone, json!({ "ticket": ticket })));
        }
        // An empty read cannot be told apart from a failed one; keep in-flight records
        if !current.is_empty() {
            report.pruned = prune_closed(state, &current, journal, now);
        }
        tracker.known_position_tickets = current;

        report.deals_logged = self.log_deals(broker, state, journal, now);
        debug!(
            orders_seen = report.orders.appeared.len(),
            orders_gone = report.orders.vanished.len(),
            positions_seen = report.positions.appeared.len(),
            positions_gone = report.positions.vanished.len(),
            deals = report.deals_logged,
            "reconciled"
        );
        report
    }

    fn cancel_expired<B: Broker, J: Journal>(
        &self,
        broker: &mut B,
        orders: &[PendingOrder],
        journal: &mut J,
        now: NaiveDateTime,
    ) -> Vec<Ticket> {
        let mut attempted = Vec::new();
        for order in orders {
            let Some(expiration) = order.time_expiration else {
                continue;
            };
            if now < expiration {
                continue;
            }
            let result = broker.cancel_pending_order(order.ticket);
            if !result.is_executed() {
                warn!(ticket = order.ticket, code = result.code, "cancel of expired order rejected");
            }
            journal.record(Event::new(
                now,
                EventKind::PendingOrderCancelAttempt,
                json!({ "ticket": order.ticket, "result": result.code, "comment": result.message }),
            ));
            attempted.push(order.ticket);
        }
        attempted
    }

    /// Log tagged deals since the last poll and advance the poll marker
    fn log_deals<B: Broker, J: Journal>(
        &self,
        broker: &B,
        state: &mut TrackingState,
        journal: &mut J,
        now: NaiveDateTime,
    ) -> usize {
        let start = state
            .last_deal_poll
            .as_deref()
            .and_then(parse_iso)
            .unwrap_or_else(|| now - Duration::hours(FIRST_DEAL_POLL_HOURS));

        let tag = self.config.magic_number;
        let deals = retain_tagged(broker.deal_history(start, now), tag);
        for deal in &deals {
            journal.record(Event::new(now, EventKind::Deal, deal_payload(deal)));
        }

        state.last_deal_poll = Some(iso(now));
        journal.checkpoint(state);
        deals.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diff_tickets() {
        let known: BTreeSet<Ticket> = [1, 2, 3].into_iter().collect();
        let current: BTreeSet<Ticket> = [5, 3, 4].into_iter().collect();
        let diff = diff_tickets(&known, &current);
        assert_eq!(diff.appeared, vec![4, 5]);
        assert_eq!(diff.vanished, vec![1, 2]);
        assert_eq!(diff_tickets(&current, &current), TicketDiff::default());
    }
}
