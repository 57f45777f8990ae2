//! One polling cycle
//!
//! [`Engine::run_cycle`] runs reconciliation, partial-profit management, the
//! weekend check and the per-symbol scan, in that order. The caller owns the
//! loop, the clock, the [`TrackingState`] and its persistence; the engine only
//! mutates what it is handed and reports what it did.

use chrono::{Datelike, Duration, NaiveDateTime, Weekday};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
    broker::{daily_fetch_count, Broker, LimitOrderRequest, TradeResult},
    config::EngineConfig,
    guard::{DuplicateGuard, DuplicateSource},
    journal::{Event, EventKind, Journal},
    partials::{PartialProfitManager, PartialReport},
    reconcile::{ReconcileReport, Reconciler, RuntimeTracker},
    setup::{ScanOutcome, Setup, SetupSelector, SkipReason},
    state::{iso, TrackingState},
    Result, Side, Ticket,
};

// ============================================================
// REPORT
// ============================================================

/// What happened to one symbol this cycle
#[derive(Debug, Clone, PartialEq)]
pub enum SymbolDecision {
    NoDailyData,
    AlreadyPlaced,
    AlreadyTradedToday,
    NoSetup(SkipReason),
    NoTick,
    /// Limit price on the wrong side of the market
    InvalidLimit { side: Side, entry: f64, quote: f64 },
    Duplicate(DuplicateSource),
    Placed { order_id: Option<Ticket>, attempts: u32 },
    Rejected { code: u32, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolOutcome {
    pub symbol: String,
    pub decision: SymbolDecision,
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub reconcile: ReconcileReport,
    pub partials: PartialReport,
    /// Scanning was skipped for the weekend
    pub weekend: bool,
    pub symbols: Vec<SymbolOutcome>,
}

impl CycleReport {
    pub fn placed(&self) -> usize {
        self.symbols
            .iter()
            .filter(|s| matches!(s.decision, SymbolDecision::Placed { .. }))
            .count()
    }

    pub fn decision(&self, symbol: &str) -> Option<&SymbolDecision> {
        self.symbols.iter().find(|s| s.symbol == symbol).map(|s| &s.decision)
    }
}

// ============================================================
// TIME HELPERS
// ============================================================

#[inline]
pub fn is_weekend(time: NaiveDateTime) -> bool {
    matches!(time.weekday(), Weekday::Sat | Weekday::Sun)
}

/// One minute before the next daily bar opens
#[inline]
pub fn order_expiration(day_start: NaiveDateTime) -> NaiveDateTime {
    day_start + Duration::days(1) - Duration::minutes(1)
}

// ============================================================
// ENGINE
// ============================================================

#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Journal the effective configuration once per process
    pub fn startup<J: Journal>(&self, journal: &mut J, now: NaiveDateTime) -> Result<()> {
        let config = serde_json::to_value(&self.config)?;
        journal.record(Event::new(now, EventKind::Startup, json!({ "config": config })));
        info!(
            mode = ?self.config.trading_mode,
            symbols = self.config.symbols.len(),
            "engine started"
        );
        Ok(())
    }

    pub fn run_cycle<B: Broker, J: Journal>(
        &self,
        broker: &mut B,
        state: &mut TrackingState,
        tracker: &mut RuntimeTracker,
        journal: &mut J,
        now: NaiveDateTime,
    ) -> CycleReport {
        let mut report = CycleReport {
            reconcile: Reconciler::new(&self.config).run(broker, state, tracker, journal, now),
            partials: PartialProfitManager::new(&self.config).run(broker, state, journal, now),
            ..CycleReport::default()
        };

        if self.weekend_pause(broker, state, journal, now) {
            report.weekend = true;
            return report;
        }

        for symbol in &self.config.symbols {
            let decision = self.process_symbol(broker, state, journal, symbol, now);
            report.symbols.push(SymbolOutcome {
                symbol: symbol.clone(),
                decision,
            });
        }
        report
    }

    /// True when the first symbol's server time falls on a weekend. The
    /// notice is journaled once per date.
    fn weekend_pause<B: Broker, J: Journal>(
        &self,
        broker: &B,
        state: &mut TrackingState,
        journal: &mut J,
        now: NaiveDateTime,
    ) -> bool {
        let Some(first) = self.config.symbols.first() else {
            return false;
        };
        let Some(tick) = broker.tick(first) else {
            return false;
        };
        if !is_weekend(tick.time) {
            return false;
        }

        let date = tick.time.date().to_string();
        if state.last_weekend_notice.as_deref() != Some(date.as_str()) {
            journal.record(Event::new(
                now,
                EventKind::WeekendMode,
                json!({ "date": date, "server_time": iso(tick.time) }),
            ));
            info!(%date, "weekend, scanning paused");
            state.last_weekend_notice = Some(date);
            journal.checkpoint(state);
        }
        true
    }

    fn process_symbol<B: Broker, J: Journal>(
        &self,
        broker: &mut B,
        state: &mut TrackingState,
        journal: &mut J,
        symbol: &str,
        now: NaiveDateTime,
    ) -> SymbolDecision {
        let Some(daily) = broker
            .daily_candles(symbol, daily_fetch_count(self.config.lookback_days))
            .filter(|d| d.len() >= 3)
        else {
            return SymbolDecision::NoDailyData;
        };

        let day_start = daily[daily.len() - 1].time;
        let day_key = iso(day_start);

        if state.note_day(symbol, &day_key) {
            journal.checkpoint(state);
            journal.record(Event::new(
                now,
                EventKind::NewDay,
                json!({ "symbol": symbol, "d1_start": day_key }),
            ));
            info!(symbol, d1_start = %day_key, "new daily bar");
        }

        if state.order_placed_for(symbol, &day_key) {
            return SymbolDecision::AlreadyPlaced;
        }

        let guard = DuplicateGuard::new(&self.config);
        if guard.already_traded_today(broker, symbol, day_start, now) {
            journal.record(Event::new(
                now,
                EventKind::SkipAlreadyTradedToday,
                json!({
                    "symbol": symbol,
                    "d1_start": day_key,
                    "reason": "deal history shows a trade for this symbol today",
                }),
            ));
            state.mark_order_placed(symbol, &day_key);
            journal.checkpoint(state);
            return SymbolDecision::AlreadyTradedToday;
        }

        let setup = match SetupSelector::new(&self.config).scan_daily(broker, symbol, &daily) {
            ScanOutcome::Found(setup) => setup,
            ScanOutcome::Skipped(reason) => {
                journal.record(Event::new(
                    now,
                    EventKind::NoSetup,
                    json!({ "symbol": symbol, "reason": reason }),
                ));
                return SymbolDecision::NoSetup(reason);
            }
        };

        let Some(tick) = broker.tick(symbol) else {
            journal.record(Event::new(now, EventKind::SkipNoTick, json!({ "symbol": symbol })));
            return SymbolDecision::NoTick;
        };

        let side = setup.side();
        let entry = setup.entry_price_adjusted;
        match side {
            Side::Buy if entry >= tick.ask => {
                journal.record(Event::new(
                    now,
                    EventKind::SkipInvalidBuyLimit,
                    json!({ "symbol": symbol, "entry_adj": entry, "ask": tick.ask, "spread": tick.ask - tick.bid }),
                ));
                return SymbolDecision::InvalidLimit {
                    side,
                    entry,
                    quote: tick.ask,
                };
            }
            Side::Sell if entry <= tick.bid => {
                journal.record(Event::new(
                    now,
                    EventKind::SkipInvalidSellLimit,
                    json!({ "symbol": symbol, "entry_adj": entry, "bid": tick.bid, "spread": tick.ask - tick.bid }),
                ));
                return SymbolDecision::InvalidLimit {
                    side,
                    entry,
                    quote: tick.bid,
                };
            }
            _ => {}
        }

        let point = broker.symbol_info(symbol).map_or(0.0, |i| i.point);
        if let Some(source) = guard.check_intent(broker, symbol, side, entry, point) {
            journal.record(Event::new(
                now,
                EventKind::SkipDuplicate,
                json!({
                    "symbol": symbol,
                    "side": side,
                    "entry_adj": entry,
                    "tolerance_points": self.config.duplicate_price_tolerance_points,
                }),
            ));
            return SymbolDecision::Duplicate(source);
        }

        let expiration = self
            .config
            .cancel_unfilled_at_end_of_day
            .then(|| order_expiration(day_start));
        let request = self.order_request(&setup, expiration);
        journal.record(Event::new(now, EventKind::PlacingOrder, placing_payload(&setup, expiration)));

        let (result, attempts) = self.submit(broker, &request);
        if result.is_executed() {
            state.mark_order_placed(symbol, &day_key);
            journal.checkpoint(state);
            journal.record(Event::new(
                now,
                EventKind::OrderSendResult,
                json!({
                    "symbol": symbol,
                    "retcode": result.code,
                    "comment": result.message,
                    "order": result.order_id,
                    "deal": result.deal_id,
                    "attempts": attempts,
                }),
            ));
            info!(
                symbol,
                %side,
                entry,
                sl = setup.stop_loss,
                tp = setup.take_profit,
                volume = setup.volume,
                r = setup.est_r_multiple,
                "limit order placed"
            );
            SymbolDecision::Placed {
                order_id: result.order_id,
                attempts,
            }
        } else {
            warn!(symbol, code = result.code, message = %result.message, attempts, "order rejected");
            journal.record(Event::new(
                now,
                EventKind::OrderSendFailed,
                json!({
                    "symbol": symbol,
                    "retcode": result.code,
                    "comment": result.message,
                    "reason": format!("broker rejected: {} (code {})", result.message, result.code),
                }),
            ));
            SymbolDecision::Rejected {
                code: result.code,
                message: result.message,
            }
        }
    }

    fn order_request(&self, setup: &Setup, expiration: Option<NaiveDateTime>) -> LimitOrderRequest {
        LimitOrderRequest {
            symbol: setup.symbol.clone(),
            side: setup.side(),
            volume: setup.volume,
            price: setup.entry_price_adjusted,
            sl: setup.stop_loss,
            tp: setup.take_profit,
            deviation_points: self.config.deviation_points,
            tag: self.config.magic_number,
            comment: self.config.order_comment.clone(),
            expiration,
        }
    }

    /// Back-to-back attempts until one executes. Pacing between cycles is
    /// the caller's concern.
    fn submit<B: Broker>(&self, broker: &mut B, request: &LimitOrderRequest) -> (TradeResult, u32) {
        let retries = self.config.order_retries.max(1);
        let mut attempt = 1;
        loop {
            let result = broker.submit_limit_order(request);
            if result.is_executed() || attempt >= retries {
                return (result, attempt);
            }
            debug!(symbol = %request.symbol, attempt, code = result.code, "order attempt rejected");
            attempt += 1;
        }
    }
}

fn placing_payload(setup: &Setup, expiration: Option<NaiveDateTime>) -> serde_json::Value {
    json!({
        "symbol": setup.symbol,
        "pattern_type": setup.pattern,
        "fvg_type": setup.fvg_kind,
        "c2_time": iso(setup.c2_time),
        "entry": setup.entry_price,
        "entry_adj": setup.entry_price_adjusted,
        "sl": setup.stop_loss,
        "tp": setup.take_profit,
        "est_r": setup.est_r_multiple,
        "volume": setup.volume,
        "expiration": expiration.map(iso),
    })
}
