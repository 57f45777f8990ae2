//! In-memory broker and market fixtures shared by the integration tests.
//!
//! `FakeBroker` keeps every snapshot in plain collections so a test can set up
//! a market, run a cycle, then inspect what the engine submitted.

#![allow(dead_code)]

use std::collections::HashMap;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use sentinel::prelude::*;

pub const TAG: u64 = 19631963;
pub const SYMBOL: &str = "EURUSD";

// ============================================================
// TIME HELPERS
// ============================================================

pub fn day(d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, d)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

pub fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, d)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

/// M5 bar `index` of the pattern day (2024-03-06)
pub fn m5(index: usize) -> NaiveDateTime {
    day(6) + Duration::minutes(5 * index as i64)
}

// ============================================================
// MARKET FIXTURES
// ============================================================

/// Four daily bars: filler, bearish C1, sweeping C2, forming day 2024-03-07.
/// C1 midpoint (the target) is 1.0955.
pub fn daily_tb_bullish() -> Vec<Candle> {
    vec![
        Candle::new(day(4), 1.1020, 1.1040, 1.0990, 1.1000),
        Candle::new(day(5), 1.1000, 1.1010, 1.0900, 1.0910),
        Candle::new(day(6), 1.0910, 1.0930, 1.0850, 1.0925),
        Candle::new(day(7), 1.0925, 1.0940, 1.0915, 1.0930),
    ]
}

/// Pattern day M5 bars. Low at 6, reaction at 2-3 (level 1.0920),
/// displacement at 4, unfilled gap [1.0915, 1.0925] formed at 8.
pub fn intraday_tb_bullish() -> Vec<Candle> {
    [
        (1.0910, 1.0915, 1.0905, 1.0912),
        (1.0912, 1.0918, 1.0908, 1.0916),
        (1.0914, 1.0922, 1.0912, 1.0920),
        (1.0920, 1.0921, 1.0910, 1.0911),
        (1.0911, 1.0912, 1.0898, 1.0900),
        (1.0900, 1.0902, 1.0880, 1.0885),
        (1.0885, 1.0887, 1.0850, 1.0860),
        (1.0860, 1.0880, 1.0858, 1.0878),
        (1.0878, 1.0915, 1.0876, 1.0912),
        (1.0912, 1.0935, 1.0910, 1.0932),
        (1.0932, 1.0940, 1.0925, 1.0938),
        (1.0938, 1.0945, 1.0930, 1.0942),
        (1.0942, 1.0948, 1.0935, 1.0940),
        (1.0940, 1.0944, 1.0932, 1.0936),
    ]
    .iter()
    .enumerate()
    .map(|(i, &(o, h, l, c))| Candle::new(m5(i), o, h, l, c))
    .collect()
}

/// 4-digit quote, 10 per point per lot
pub fn eurusd_info() -> SymbolInfo {
    SymbolInfo {
        point: 0.0001,
        volume_min: 0.01,
        volume_max: 100.0,
        volume_step: 0.01,
        tick_value: 10.0,
        tick_size: 0.0001,
    }
}

pub fn tick(time: NaiveDateTime, bid: f64, ask: f64) -> Tick {
    Tick { time, bid, ask }
}

pub fn position(ticket: Ticket, side: Side, volume: f64, entry: f64, sl: f64, tp: f64) -> OpenPosition {
    OpenPosition {
        ticket,
        symbol: SYMBOL.to_string(),
        side,
        volume,
        price_open: entry,
        sl,
        tp,
        profit: 0.0,
        time: at(7, 8, 0),
        tag: TAG,
        comment: "Sentinel".to_string(),
    }
}

pub fn pending(ticket: Ticket, kind: OrderKind, price: f64, expiration: Option<NaiveDateTime>) -> PendingOrder {
    PendingOrder {
        ticket,
        symbol: SYMBOL.to_string(),
        kind,
        price_open: price,
        sl: 0.0,
        tp: 0.0,
        volume: 0.1,
        time_setup: at(7, 1, 0),
        time_expiration: expiration,
        tag: TAG,
        comment: "Sentinel".to_string(),
    }
}

pub fn deal(ticket: Ticket, time: NaiveDateTime, tag: u64) -> Deal {
    Deal {
        ticket,
        order: ticket + 1000,
        position_id: ticket + 2000,
        symbol: SYMBOL.to_string(),
        side: Side::Buy,
        entry: DealEntry::In,
        volume: 0.1,
        price: 1.0921,
        profit: 0.0,
        time,
        tag,
        comment: "Sentinel".to_string(),
    }
}

pub fn config() -> EngineConfig {
    EngineConfig {
        symbols: vec![SYMBOL.to_string()],
        ..EngineConfig::default()
    }
}

// ============================================================
// FAKE BROKER
// ============================================================

#[derive(Debug, Default)]
pub struct FakeBroker {
    pub daily: HashMap<String, Vec<Candle>>,
    pub intraday: HashMap<String, Vec<Candle>>,
    pub ticks: HashMap<String, Tick>,
    pub infos: HashMap<String, SymbolInfo>,
    pub balance: Option<f64>,
    pub orders: Vec<PendingOrder>,
    pub positions: Vec<OpenPosition>,
    pub deals: Vec<Deal>,

    /// Return codes per operation; `RETCODE_DONE` when unset
    pub submit_codes: Vec<u32>,
    pub modify_code: Option<u32>,
    pub restore_code: Option<u32>,
    pub close_code: Option<u32>,
    pub cancel_code: Option<u32>,

    pub submitted: Vec<LimitOrderRequest>,
    pub modifications: Vec<(Ticket, f64, f64)>,
    pub closes: Vec<(Ticket, f64)>,
    pub cancels: Vec<Ticket>,
    next_ticket: Ticket,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self {
            balance: Some(10_000.0),
            next_ticket: 500,
            ..Self::default()
        }
    }

    /// EURUSD with the TB Bullish day, quoted on Thursday 2024-03-07 10:00
    pub fn tb_bullish_market() -> Self {
        let mut broker = Self::new();
        broker.daily.insert(SYMBOL.to_string(), daily_tb_bullish());
        broker.intraday.insert(SYMBOL.to_string(), intraday_tb_bullish());
        broker.infos.insert(SYMBOL.to_string(), eurusd_info());
        broker.set_tick(tick(at(7, 10, 0), 1.0938, 1.0939));
        broker
    }

    pub fn set_tick(&mut self, tick: Tick) {
        self.ticks.insert(SYMBOL.to_string(), tick);
    }

    pub fn position(&self, ticket: Ticket) -> Option<&OpenPosition> {
        self.positions.iter().find(|p| p.ticket == ticket)
    }

    fn code(code: Option<u32>) -> u32 {
        code.unwrap_or(RETCODE_DONE)
    }

    fn result(op: TradeOp, code: u32) -> TradeResult {
        if code == RETCODE_DONE {
            TradeResult::done(op)
        } else {
            TradeResult::rejected(op, code, "rejected by fake")
        }
    }
}

impl Broker for FakeBroker {
    fn daily_candles(&self, symbol: &str, count: usize) -> Option<Vec<Candle>> {
        let bars = self.daily.get(symbol)?;
        let skip = bars.len().saturating_sub(count);
        Some(bars[skip..].to_vec())
    }

    fn intraday_candles(
        &self,
        symbol: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Option<Vec<Candle>> {
        let bars = self.intraday.get(symbol)?;
        Some(bars.iter().filter(|c| start <= c.time && c.time < end).copied().collect())
    }

    fn tick(&self, symbol: &str) -> Option<Tick> {
        self.ticks.get(symbol).copied()
    }

    fn symbol_info(&self, symbol: &str) -> Option<SymbolInfo> {
        self.infos.get(symbol).copied()
    }

    fn account_balance(&self) -> Option<f64> {
        self.balance
    }

    fn submit_limit_order(&mut self, request: &LimitOrderRequest) -> TradeResult {
        self.submitted.push(request.clone());
        let attempt = self.submitted.len() - 1;
        let code = self.submit_codes.get(attempt).copied().unwrap_or(RETCODE_DONE);
        if code != RETCODE_DONE {
            return Self::result(TradeOp::SubmitLimit, code);
        }

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.orders.push(PendingOrder {
            ticket,
            symbol: request.symbol.clone(),
            kind: request.kind(),
            price_open: request.price,
            sl: request.sl,
            tp: request.tp,
            volume: request.volume,
            time_setup: self.ticks.get(&request.symbol).map_or(day(7), |t| t.time),
            time_expiration: request.expiration,
            tag: request.tag,
            comment: request.comment.clone(),
        });
        TradeResult::done(TradeOp::SubmitLimit).with_order(ticket)
    }

    fn modify_position(&mut self, ticket: Ticket, sl: f64, tp: f64) -> TradeResult {
        // The first modification of a ticket parks TP; later ones restore it
        let seen = self.modifications.iter().any(|(t, _, _)| *t == ticket);
        self.modifications.push((ticket, sl, tp));
        let code = if seen {
            Self::code(self.restore_code)
        } else {
            Self::code(self.modify_code)
        };
        if code == RETCODE_DONE {
            if let Some(p) = self.positions.iter_mut().find(|p| p.ticket == ticket) {
                p.sl = sl;
                p.tp = tp;
            }
        }
        Self::result(TradeOp::ModifyPosition, code)
    }

    fn close_position_partial(&mut self, ticket: Ticket, volume: f64) -> TradeResult {
        self.closes.push((ticket, volume));
        let code = Self::code(self.close_code);
        if code == RETCODE_DONE {
            if let Some(p) = self.positions.iter_mut().find(|p| p.ticket == ticket) {
                p.volume = ((p.volume - volume) * 100.0).round() / 100.0;
            }
        }
        Self::result(TradeOp::ClosePartial, code)
    }

    fn cancel_pending_order(&mut self, ticket: Ticket) -> TradeResult {
        self.cancels.push(ticket);
        let code = Self::code(self.cancel_code);
        if code == RETCODE_DONE {
            self.orders.retain(|o| o.ticket != ticket);
        }
        Self::result(TradeOp::CancelOrder, code)
    }

    fn pending_orders(&self, _tag: u64) -> Vec<PendingOrder> {
        self.orders.clone()
    }

    fn open_positions(&self, _tag: u64) -> Vec<OpenPosition> {
        self.positions.clone()
    }

    fn deal_history(&self, start: NaiveDateTime, end: NaiveDateTime) -> Vec<Deal> {
        self.deals
            .iter()
            .filter(|d| start <= d.time && d.time <= end)
            .cloned()
            .collect()
    }
}
