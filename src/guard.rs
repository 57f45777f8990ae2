//! Duplicate-intent guards
//!
//! Advisory checks run before an order goes out. They suppress the common
//! duplicates (a restart that lost state, a second cycle on the same day, an
//! order already resting at the same level) but the broker remains the final
//! arbiter.

use chrono::NaiveDateTime;
use tracing::debug;

use crate::{
    broker::{retain_tagged, Broker, Deal, OpenPosition, OrderKind, PendingOrder},
    config::EngineConfig,
    Side, Ticket,
};

/// Absorbs float noise at the tolerance boundary. Far below any point size.
const PRICE_EPSILON: f64 = 1e-9;

/// Existing broker record matching a proposed intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateSource {
    PendingOrder(Ticket),
    OpenPosition(Ticket),
}

/// Tolerance in price units
#[inline]
pub fn price_tolerance(point: f64, tolerance_points: u32) -> f64 {
    point * f64::from(tolerance_points)
}

/// Zero tolerance means exact equality
#[inline]
pub fn prices_match(existing: f64, proposed: f64, tolerance: f64) -> bool {
    if tolerance <= 0.0 {
        existing == proposed
    } else {
        (existing - proposed).abs() <= tolerance + PRICE_EPSILON
    }
}

/// First pending order, then open position, on the same symbol and side
/// whose entry is within `tolerance` of `entry`.
pub fn find_duplicate_intent(
    orders: &[PendingOrder],
    positions: &[OpenPosition],
    symbol: &str,
    side: Side,
    entry: f64,
    tolerance: f64,
) -> Option<DuplicateSource> {
    let kind = OrderKind::limit_for(side);
    orders
        .iter()
        .find(|o| o.symbol == symbol && o.kind == kind && prices_match(o.price_open, entry, tolerance))
        .map(|o| DuplicateSource::PendingOrder(o.ticket))
        .or_else(|| {
            positions
                .iter()
                .find(|p| p.symbol == symbol && p.side == side && prices_match(p.price_open, entry, tolerance))
                .map(|p| DuplicateSource::OpenPosition(p.ticket))
        })
}

/// Any deal on `symbol` carrying `tag`
pub fn has_tagged_deal(deals: &[Deal], symbol: &str, tag: u64) -> bool {
    deals.iter().any(|d| d.symbol == symbol && d.tag == tag)
}

pub struct DuplicateGuard<'a> {
    config: &'a EngineConfig,
}

impl<'a> DuplicateGuard<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Orders and positions already expressing this intent
    pub fn check_intent<B: Broker>(
        &self,
        broker: &B,
        symbol: &str,
        side: Side,
        entry: f64,
        point: f64,
    ) -> Option<DuplicateSource> {
        let tag = self.config.magic_number;
        let orders = retain_tagged(broker.pending_orders(tag), tag);
        let positions = retain_tagged(broker.open_positions(tag), tag);
        let tolerance = price_tolerance(point, self.config.duplicate_price_tolerance_points);
        let found = find_duplicate_intent(&orders, &positions, symbol, side, entry, tolerance);
        if let Some(source) = found {
            debug!(symbol, %side, entry, ?source, "duplicate intent");
        }
        found
    }

    /// Deal history since the start of the current daily bar shows a trade
    pub fn already_traded_today<B: Broker>(
        &self,
        broker: &B,
        symbol: &str,
        day_start: NaiveDateTime,
        now: NaiveDateTime,
    ) -> bool {
        let deals = broker.deal_history(day_start, now);
        has_tagged_deal(&deals, symbol, self.config.magic_number)
    }
}
