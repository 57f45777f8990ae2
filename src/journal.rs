//! Event journal
//!
//! Every decision the engine makes is recorded as an [`Event`]: a timestamp, a
//! snake_case type and a free-form JSON payload, serialized one per line.
//! Where events go is the caller's business. [`MemoryJournal`] keeps them in
//! memory for tests and embedding.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{state::TrackingState, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Startup,
    NewDay,
    SkipAlreadyTradedToday,
    NoSetup,
    SkipNoTick,
    SkipInvalidBuyLimit,
    SkipInvalidSellLimit,
    SkipDuplicate,
    PlacingOrder,
    OrderSendResult,
    OrderSendFailed,
    WeekendMode,
    PendingOrderSeen,
    PendingOrderGone,
    PendingOrderCancelAttempt,
    PositionOpenSeen,
    PositionGone,
    Deal,
    CleanupClosedPartials,
    #[serde(rename = "cleanup_3r_tp_positions")]
    Cleanup3rTpPositions,
    #[serde(rename = "tp_modified_to_3r")]
    TpModifiedTo3r,
    #[serde(rename = "tp_modify_to_3r_failed")]
    TpModifyTo3rFailed,
    PartialVolumeInvalid,
    PartialCloseFailed,
    PartialCloseSuccess,
    TpRestoredSlToBe,
    TpRestoreFailed,
    PartialExecutionError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: NaiveDateTime,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: Value,
}

impl Event {
    pub fn new(timestamp: NaiveDateTime, kind: EventKind, payload: Value) -> Self {
        Self {
            timestamp,
            kind,
            payload,
        }
    }

    /// One JSON object, no trailing newline
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Destination for events and state checkpoints
pub trait Journal {
    fn record(&mut self, event: Event);

    /// Called after every state mutation the engine performs. Persisting
    /// callers snapshot `state` here.
    fn checkpoint(&mut self, _state: &TrackingState) {}
}

#[derive(Debug, Clone, Default)]
pub struct MemoryJournal {
    events: Vec<Event>,
    checkpoints: usize,
    last_snapshot: Option<String>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn of_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(move |e| e.kind == kind)
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.of_kind(kind).count()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.iter().map(|e| e.kind).collect()
    }

    pub fn checkpoints(&self) -> usize {
        self.checkpoints
    }

    /// JSON of the state passed to the latest checkpoint
    pub fn last_snapshot(&self) -> Option<&str> {
        self.last_snapshot.as_deref()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// All events as JSON lines
    pub fn to_jsonl(&self) -> Result<String> {
        let mut out = String::new();
        for event in &self.events {
            out.push_str(&event.to_json_line()?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl Journal for MemoryJournal {
    fn record(&mut self, event: Event) {
        self.events.push(event);
    }

    fn checkpoint(&mut self, state: &TrackingState) {
        self.checkpoints += 1;
        match state.to_json() {
            Ok(json) => self.last_snapshot = Some(json),
            Err(e) => tracing::warn!(error = %e, "state snapshot failed"),
        }
    }
}
