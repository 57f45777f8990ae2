//! Broker seam
//!
//! The engine never talks to a terminal directly. Everything it reads or
//! submits goes through [`Broker`], so adapters decide transport and tests use
//! an in-memory fake. Every mutating call returns a [`TradeResult`] rather than
//! a bare status so callers can tell which operation failed and why.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{Candle, Side, Tick, Ticket};

/// The only return code that means the broker executed the request.
pub const RETCODE_DONE: u32 = 10009;

// ============================================================
// SNAPSHOTS
// ============================================================

/// Trading metadata for a symbol
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    /// Minimum price increment
    pub point: f64,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
    /// Account-currency value of one `tick_size` move for one lot
    pub tick_value: f64,
    pub tick_size: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    BuyLimit,
    SellLimit,
    BuyStop,
    SellStop,
    Other,
}

impl OrderKind {
    /// The limit order kind that opens a position on `side`
    #[inline]
    pub fn limit_for(side: Side) -> Self {
        match side {
            Side::Buy => OrderKind::BuyLimit,
            Side::Sell => OrderKind::SellLimit,
        }
    }

    /// Broker numeric code (2 = buy limit, 3 = sell limit)
    pub fn code(self) -> i32 {
        match self {
            OrderKind::BuyLimit => 2,
            OrderKind::SellLimit => 3,
            OrderKind::BuyStop => 4,
            OrderKind::SellStop => 5,
            OrderKind::Other => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub ticket: Ticket,
    pub symbol: String,
    pub kind: OrderKind,
    pub price_open: f64,
    pub sl: f64,
    pub tp: f64,
    pub volume: f64,
    pub time_setup: NaiveDateTime,
    pub time_expiration: Option<NaiveDateTime>,
    /// Ownership tag (magic number)
    pub tag: u64,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub ticket: Ticket,
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub price_open: f64,
    /// 0.0 when unset
    pub sl: f64,
    /// 0.0 when unset
    pub tp: f64,
    pub profit: f64,
    pub time: NaiveDateTime,
    pub tag: u64,
    pub comment: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DealEntry {
    In,
    Out,
    InOut,
    OutBy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub ticket: Ticket,
    pub order: Ticket,
    pub position_id: Ticket,
    pub symbol: String,
    pub side: Side,
    pub entry: DealEntry,
    pub volume: f64,
    pub price: f64,
    pub profit: f64,
    pub time: NaiveDateTime,
    pub tag: u64,
    pub comment: String,
}

// ============================================================
// OWNERSHIP TAG
// ============================================================

/// Records carrying the ownership tag of the strategy that created them
pub trait Tagged {
    fn tag(&self) -> u64;
}

impl Tagged for PendingOrder {
    fn tag(&self) -> u64 {
        self.tag
    }
}

impl Tagged for OpenPosition {
    fn tag(&self) -> u64 {
        self.tag
    }
}

impl Tagged for Deal {
    fn tag(&self) -> u64 {
        self.tag
    }
}

/// Keep only records owned by `tag`
pub fn retain_tagged<T: Tagged>(mut items: Vec<T>, tag: u64) -> Vec<T> {
    items.retain(|item| item.tag() == tag);
    items
}

// ============================================================
// REQUESTS AND RESULTS
// ============================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitOrderRequest {
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub price: f64,
    pub sl: f64,
    pub tp: f64,
    pub deviation_points: u32,
    pub tag: u64,
    pub comment: String,
    /// `None` means good till cancelled
    pub expiration: Option<NaiveDateTime>,
}

impl LimitOrderRequest {
    #[inline]
    pub fn kind(&self) -> OrderKind {
        OrderKind::limit_for(self.side)
    }
}

/// Which broker operation produced a [`TradeResult`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeOp {
    SubmitLimit,
    ModifyPosition,
    ClosePartial,
    CancelOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeResult {
    pub op: TradeOp,
    pub code: u32,
    pub message: String,
    pub order_id: Option<Ticket>,
    pub deal_id: Option<Ticket>,
}

impl TradeResult {
    pub fn done(op: TradeOp) -> Self {
        Self {
            op,
            code: RETCODE_DONE,
            message: "done".to_string(),
            order_id: None,
            deal_id: None,
        }
    }

    pub fn rejected(op: TradeOp, code: u32, message: impl Into<String>) -> Self {
        Self {
            op,
            code,
            message: message.into(),
            order_id: None,
            deal_id: None,
        }
    }

    pub fn with_order(mut self, order_id: Ticket) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn with_deal(mut self, deal_id: Ticket) -> Self {
        self.deal_id = Some(deal_id);
        self
    }

    #[inline]
    pub fn is_executed(&self) -> bool {
        self.code == RETCODE_DONE
    }
}

// ============================================================
// BROKER TRAIT
// ============================================================

/// Market data and order routing.
///
/// Reads return `None` / empty when data is unavailable; the engine treats that
/// as a skip, never as an error. Listing calls take the ownership tag so
/// adapters can filter server-side; the engine re-applies [`retain_tagged`]
/// regardless.
pub trait Broker {
    /// Most recent `count` daily bars, oldest first. The last bar is the
    /// current (forming) day.
    fn daily_candles(&self, symbol: &str, count: usize) -> Option<Vec<Candle>>;

    /// Intraday bars with `start <= time < end`, oldest first
    fn intraday_candles(
        &self,
        symbol: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Option<Vec<Candle>>;

    fn tick(&self, symbol: &str) -> Option<Tick>;

    /// Current spread in price units
    fn spread(&self, symbol: &str) -> Option<f64> {
        self.tick(symbol).map(|t| t.spread())
    }

    fn symbol_info(&self, symbol: &str) -> Option<SymbolInfo>;

    fn account_balance(&self) -> Option<f64>;

    fn submit_limit_order(&mut self, request: &LimitOrderRequest) -> TradeResult;

    /// Set both protective levels on an open position
    fn modify_position(&mut self, ticket: Ticket, sl: f64, tp: f64) -> TradeResult;

    fn close_position_partial(&mut self, ticket: Ticket, volume: f64) -> TradeResult;

    fn cancel_pending_order(&mut self, ticket: Ticket) -> TradeResult;

    fn pending_orders(&self, tag: u64) -> Vec<PendingOrder>;

    fn open_positions(&self, tag: u64) -> Vec<OpenPosition>;

    fn deal_history(&self, start: NaiveDateTime, end: NaiveDateTime) -> Vec<Deal>;
}

/// Bars requested for one daily scan
#[inline]
pub fn daily_fetch_count(lookback_days: usize) -> usize {
    lookback_days.max(5)
}

/// End of the intraday window for a daily bar starting at `day_start`
#[inline]
pub fn day_end(day_start: NaiveDateTime) -> NaiveDateTime {
    day_start + Duration::days(1)
}
