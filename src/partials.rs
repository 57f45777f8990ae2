//! Two-stage partial-profit management
//!
//! Conservative mode only. A fresh position gets its take-profit parked at 3R
//! (the original target is remembered). Once price reaches the trigger R
//! multiple, part of the position is closed, the stop goes to breakeven and the
//! original target is restored. Aggressive mode leaves positions alone.
//!
//! Each ticket is processed independently; a failure on one is collected in
//! the [`PartialReport`] and never stops the others.

use std::collections::BTreeSet;

use chrono::NaiveDateTime;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
    broker::{retain_tagged, Broker, OpenPosition, SymbolInfo},
    config::EngineConfig,
    journal::{Event, EventKind, Journal},
    sizing::floor_to_step,
    state::{iso, PartialRecord, PositionStage, Pruned, ThreeRRecord, TrackingState},
    Result, SentinelError, Side, Ticket,
};

/// Slack on the trigger comparison so float noise at exactly the trigger fires
const R_EPSILON: f64 = 1e-9;

// ============================================================
// PRICE MATH
// ============================================================

/// Entry plus three stop distances in the position's favour.
/// `None` when the stop is unset or at entry.
pub fn three_r_target(side: Side, entry: f64, sl: f64) -> Option<f64> {
    if sl == 0.0 {
        return None;
    }
    let distance = (entry - sl).abs();
    if !(distance > 0.0) {
        return None;
    }
    Some(match side {
        Side::Buy => entry + 3.0 * distance,
        Side::Sell => entry - 3.0 * distance,
    })
}

/// True when the current target sits beyond `three_r` in the trade's
/// direction. An unset target (0.0) is compared as a price like any other.
pub fn target_beyond(side: Side, current_tp: f64, three_r: f64) -> bool {
    match side {
        Side::Buy => current_tp > three_r,
        Side::Sell => current_tp < three_r,
    }
}

/// Directional profit in units of the original stop distance
pub fn current_r(side: Side, entry: f64, price: f64, sl_distance: f64) -> f64 {
    if !(sl_distance > 0.0) {
        return 0.0;
    }
    let profit = match side {
        Side::Buy => price - entry,
        Side::Sell => entry - price,
    };
    profit / sl_distance
}

/// Volume to close, floored to the step. `None` when below the minimum lot
/// or not strictly smaller than the position.
pub fn partial_volume(volume: f64, fraction: f64, info: &SymbolInfo) -> Option<f64> {
    let raw = volume * fraction;
    let partial = if info.volume_step > 0.0 {
        floor_to_step(raw, info.volume_step)
    } else {
        (raw * 100.0).floor() / 100.0
    };
    if partial <= 0.0 || partial < info.volume_min || partial >= volume {
        None
    } else {
        Some(partial)
    }
}

#[inline]
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============================================================
// REPORT
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub enum PartialAction {
    TpMovedToThreeR { ticket: Ticket, three_r_tp: f64 },
    TpModifyFailed { ticket: Ticket, code: u32 },
    PartialTaken { ticket: Ticket, volume_closed: f64, restored: bool },
    PartialCloseFailed { ticket: Ticket, code: u32 },
    VolumeInvalid { ticket: Ticket, volume: f64 },
    /// Tracked at 3R, trigger not reached yet
    Waiting { ticket: Ticket, current_r: f64 },
    /// Nothing to change this cycle
    Unchanged { ticket: Ticket },
    /// Required market data missing; retried next cycle
    DataUnavailable { ticket: Ticket },
}

#[derive(Debug)]
pub struct TicketFailure {
    pub ticket: Ticket,
    pub error: SentinelError,
}

impl std::fmt::Display for TicketFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ticket {}: {}", self.ticket, self.error)
    }
}

#[derive(Debug, Default)]
pub struct PartialReport {
    pub actions: Vec<PartialAction>,
    pub failures: Vec<TicketFailure>,
    pub pruned: Pruned,
}

impl PartialReport {
    pub fn partials_taken(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| matches!(a, PartialAction::PartialTaken { .. }))
            .count()
    }
}

/// Drop tracking for closed tickets and journal what was removed
pub fn prune_closed<J: Journal>(
    state: &mut TrackingState,
    live: &BTreeSet<Ticket>,
    journal: &mut J,
    now: NaiveDateTime,
) -> Pruned {
    let pruned = state.prune_closed(live);
    if !pruned.partials.is_empty() {
        journal.record(Event::new(
            now,
            EventKind::CleanupClosedPartials,
            json!({ "removed_tickets": pruned.partials }),
        ));
    }
    if !pruned.three_r.is_empty() {
        journal.record(Event::new(
            now,
            EventKind::Cleanup3rTpPositions,
            json!({ "removed_tickets": pruned.three_r }),
        ));
    }
    if !pruned.is_empty() {
        debug!(partials = ?pruned.partials, three_r = ?pruned.three_r, "pruned closed tickets");
        journal.checkpoint(state);
    }
    pruned
}

// ============================================================
// MANAGER
// ============================================================

pub struct PartialProfitManager<'a> {
    config: &'a EngineConfig,
}

impl<'a> PartialProfitManager<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// One management pass over the engine's open positions
    pub fn run<B: Broker, J: Journal>(
        &self,
        broker: &mut B,
        state: &mut TrackingState,
        journal: &mut J,
        now: NaiveDateTime,
    ) -> PartialReport {
        let mut report = PartialReport::default();
        if !self.config.is_conservative() {
            return report;
        }

        let tag = self.config.magic_number;
        let positions = retain_tagged(broker.open_positions(tag), tag);
        if positions.is_empty() {
            return report;
        }

        let live: BTreeSet<Ticket> = positions.iter().map(|p| p.ticket).collect();
        report.pruned = prune_closed(state, &live, journal, now);

        for position in &positions {
            match self.process(broker, state, journal, position, now) {
                Ok(action) => report.actions.push(action),
                Err(error) => {
                    warn!(ticket = position.ticket, error = %error, "partial management failed");
                    journal.record(Event::new(
                        now,
                        EventKind::PartialExecutionError,
                        json!({ "ticket": position.ticket, "error": error.to_string() }),
                    ));
                    report.failures.push(TicketFailure {
                        ticket: position.ticket,
                        error,
                    });
                }
            }
        }
        report
    }

    fn process<B: Broker, J: Journal>(
        &self,
        broker: &mut B,
        state: &mut TrackingState,
        journal: &mut J,
        position: &OpenPosition,
        now: NaiveDateTime,
    ) -> Result<PartialAction> {
        let ticket = position.ticket;
        check_position(position)?;
        if position.price_open <= 0.0 || position.volume <= 0.0 {
            return Ok(PartialAction::Unchanged { ticket });
        }

        match state.stage(ticket) {
            PositionStage::Untracked => Ok(self.park_target(broker, state, journal, position, now)),
            PositionStage::TpAtThreeR => self.maybe_take_partial(broker, state, journal, position, now),
            PositionStage::PartialTaken => Ok(PartialAction::Unchanged { ticket }),
        }
    }

    /// Untracked -> TP-at-3R
    fn park_target<B: Broker, J: Journal>(
        &self,
        broker: &mut B,
        state: &mut TrackingState,
        journal: &mut J,
        position: &OpenPosition,
        now: NaiveDateTime,
    ) -> PartialAction {
        let ticket = position.ticket;
        let Some(three_r) = three_r_target(position.side, position.price_open, position.sl) else {
            return PartialAction::Unchanged { ticket };
        };
        if !target_beyond(position.side, position.tp, three_r) {
            return PartialAction::Unchanged { ticket };
        }

        let result = broker.modify_position(ticket, position.sl, three_r);
        if !result.is_executed() {
            warn!(ticket, code = result.code, message = %result.message, "tp to 3R rejected");
            journal.record(Event::new(
                now,
                EventKind::TpModifyTo3rFailed,
                json!({ "ticket": ticket, "retcode": result.code, "comment": result.message }),
            ));
            return PartialAction::TpModifyFailed {
                ticket,
                code: result.code,
            };
        }

        state.mark_tp_at_3r(
            ticket,
            ThreeRRecord {
                symbol: position.symbol.clone(),
                original_tp: position.tp,
                three_r_tp: three_r,
                entry_price: position.price_open,
                original_sl: position.sl,
                modified_time: iso(now),
            },
        );
        journal.checkpoint(state);
        journal.record(Event::new(
            now,
            EventKind::TpModifiedTo3r,
            json!({
                "ticket": ticket,
                "symbol": position.symbol,
                "original_tp": position.tp,
                "new_tp_3r": three_r,
                "entry": position.price_open,
            }),
        ));
        info!(ticket, symbol = %position.symbol, three_r, original_tp = position.tp, "tp parked at 3R");
        PartialAction::TpMovedToThreeR {
            ticket,
            three_r_tp: three_r,
        }
    }

    /// TP-at-3R -> partial taken
    fn maybe_take_partial<B: Broker, J: Journal>(
        &self,
        broker: &mut B,
        state: &mut TrackingState,
        journal: &mut J,
        position: &OpenPosition,
        now: NaiveDateTime,
    ) -> Result<PartialAction> {
        let ticket = position.ticket;
        let Some(record) = state.positions_at_3r_tp.get(&ticket).cloned() else {
            return Ok(PartialAction::Unchanged { ticket });
        };
        let Some(tick) = broker.tick(&position.symbol) else {
            return Ok(PartialAction::DataUnavailable { ticket });
        };

        let price = match position.side {
            Side::Buy => tick.bid,
            Side::Sell => tick.ask,
        };
        let sl_distance = (position.price_open - record.original_sl).abs();
        let r = current_r(position.side, position.price_open, price, sl_distance);
        if !r.is_finite() {
            return Err(SentinelError::InvalidPosition {
                ticket,
                reason: "non-finite R multiple",
            });
        }
        if r + R_EPSILON < self.config.partial_trigger_r {
            return Ok(PartialAction::Waiting { ticket, current_r: r });
        }

        let Some(info) = broker.symbol_info(&position.symbol) else {
            return Ok(PartialAction::DataUnavailable { ticket });
        };
        let Some(close_volume) = partial_volume(position.volume, self.config.partial_close_fraction, &info)
        else {
            journal.record(Event::new(
                now,
                EventKind::PartialVolumeInvalid,
                json!({
                    "ticket": ticket,
                    "volume": position.volume,
                    "fraction": self.config.partial_close_fraction,
                }),
            ));
            return Ok(PartialAction::VolumeInvalid {
                ticket,
                volume: position.volume,
            });
        };

        let close = broker.close_position_partial(ticket, close_volume);
        if !close.is_executed() {
            warn!(ticket, code = close.code, message = %close.message, "partial close rejected");
            journal.record(Event::new(
                now,
                EventKind::PartialCloseFailed,
                json!({ "ticket": ticket, "retcode": close.code, "comment": close.message }),
            ));
            return Ok(PartialAction::PartialCloseFailed {
                ticket,
                code: close.code,
            });
        }

        let remaining = position.volume - close_volume;
        journal.record(Event::new(
            now,
            EventKind::PartialCloseSuccess,
            json!({
                "ticket": ticket,
                "symbol": position.symbol,
                "volume_closed": close_volume,
                "volume_remaining": remaining,
                "current_r": round2(r),
            }),
        ));
        info!(ticket, symbol = %position.symbol, volume = close_volume, r, "partial taken");

        let restore = broker.modify_position(ticket, position.price_open, record.original_tp);
        let restored = restore.is_executed();
        if restored {
            journal.record(Event::new(
                now,
                EventKind::TpRestoredSlToBe,
                json!({
                    "ticket": ticket,
                    "symbol": position.symbol,
                    "new_sl": position.price_open,
                    "restored_tp": record.original_tp,
                }),
            ));
        } else {
            warn!(ticket, code = restore.code, "breakeven / tp restore rejected");
            journal.record(Event::new(
                now,
                EventKind::TpRestoreFailed,
                json!({ "ticket": ticket, "retcode": restore.code }),
            ));
        }

        state.record_partial(
            ticket,
            PartialRecord {
                symbol: position.symbol.clone(),
                entry_price: position.price_open,
                original_sl: record.original_sl,
                new_sl: position.price_open,
                tp: record.original_tp,
                partial_time: iso(now),
                r_at_partial: round2(r),
                volume_closed: close_volume,
                volume_remaining: remaining,
            },
        );
        journal.checkpoint(state);

        Ok(PartialAction::PartialTaken {
            ticket,
            volume_closed: close_volume,
            restored,
        })
    }
}

fn check_position(position: &OpenPosition) -> Result<()> {
    let values = [position.price_open, position.sl, position.tp, position.volume];
    if values.iter().any(|v| !v.is_finite()) {
        return Err(SentinelError::InvalidPosition {
            ticket: position.ticket,
            reason: "non-finite price or volume",
        });
    }
    Ok(())
}
