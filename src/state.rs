//! Caller-owned persistent tracking state
//!
//! The engine mutates a [`TrackingState`] it is handed and never persists it.
//! Callers snapshot it with [`TrackingState::to_json`] whenever the journal
//! signals a checkpoint.
//!
//! A ticket lives in at most one of the two partial-profit maps and only ever
//! moves forward: untracked, then TP-at-3R, then partial taken, then removed
//! once the broker no longer lists it. The mutators below are the only way the
//! engine changes those maps.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::{Result, Ticket};

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Format a server timestamp the way it is stored in state and events
pub fn iso(time: NaiveDateTime) -> String {
    time.format(ISO_FORMAT).to_string()
}

/// Parse a stored timestamp. Fractional seconds are accepted.
pub fn parse_iso(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, ISO_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

// ============================================================
// RECORDS
// ============================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreeRRecord {
    pub symbol: String,
    pub original_tp: f64,
    pub three_r_tp: f64,
    pub entry_price: f64,
    pub original_sl: f64,
    pub modified_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialRecord {
    pub symbol: String,
    pub entry_price: f64,
    pub original_sl: f64,
    pub new_sl: f64,
    pub tp: f64,
    pub partial_time: String,
    pub r_at_partial: f64,
    pub volume_closed: f64,
    pub volume_remaining: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStage {
    Untracked,
    TpAtThreeR,
    PartialTaken,
}

/// Tickets dropped by [`TrackingState::prune_closed`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pruned {
    pub partials: Vec<Ticket>,
    pub three_r: Vec<Ticket>,
}

impl Pruned {
    pub fn is_empty(&self) -> bool {
        self.partials.is_empty() && self.three_r.is_empty()
    }
}

// ============================================================
// TRACKING STATE
// ============================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingState {
    /// symbol -> ISO start of the last daily bar seen
    pub last_d1_start: BTreeMap<String, String>,
    /// symbol -> ISO start of the daily bar an order was placed for
    pub orders_placed: BTreeMap<String, String>,
    pub positions_at_3r_tp: BTreeMap<Ticket, ThreeRRecord>,
    pub partials_taken: BTreeMap<Ticket, PartialRecord>,
    pub last_deal_poll: Option<String>,
    /// YYYY-MM-DD of the last weekend notice
    pub last_weekend_notice: Option<String>,
}

impl TrackingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self, ticket: Ticket) -> PositionStage {
        if self.partials_taken.contains_key(&ticket) {
            PositionStage::PartialTaken
        } else if self.positions_at_3r_tp.contains_key(&ticket) {
            PositionStage::TpAtThreeR
        } else {
            PositionStage::Untracked
        }
    }

    /// Untracked -> TP-at-3R. Returns false, leaving state untouched, from
    /// any other stage.
    pub fn mark_tp_at_3r(&mut self, ticket: Ticket, record: ThreeRRecord) -> bool {
        if self.stage(ticket) != PositionStage::Untracked {
            return false;
        }
        self.positions_at_3r_tp.insert(ticket, record);
        true
    }

    /// TP-at-3R -> partial taken. Returns false from any other stage.
    pub fn record_partial(&mut self, ticket: Ticket, record: PartialRecord) -> bool {
        if self.stage(ticket) != PositionStage::TpAtThreeR {
            return false;
        }
        self.positions_at_3r_tp.remove(&ticket);
        self.partials_taken.insert(ticket, record);
        true
    }

    /// Drop tracking for tickets missing from the live position set
    pub fn prune_closed(&mut self, live: &BTreeSet<Ticket>) -> Pruned {
        let partials: Vec<Ticket> = self
            .partials_taken
            .keys()
            .filter(|t| !live.contains(t))
            .copied()
            .collect();
        let three_r: Vec<Ticket> = self
            .positions_at_3r_tp
            .keys()
            .filter(|t| !live.contains(t))
            .copied()
            .collect();
        for ticket in &partials {
            self.partials_taken.remove(ticket);
        }
        for ticket in &three_r {
            self.positions_at_3r_tp.remove(ticket);
        }
        Pruned { partials, three_r }
    }

    /// Record the current daily bar for `symbol`. On a new bar the placed
    /// marker is cleared and `true` is returned.
    pub fn note_day(&mut self, symbol: &str, day_key: &str) -> bool {
        if self.last_d1_start.get(symbol).map(String::as_str) == Some(day_key) {
            return false;
        }
        self.last_d1_start.insert(symbol.to_string(), day_key.to_string());
        self.orders_placed.remove(symbol);
        true
    }

    pub fn order_placed_for(&self, symbol: &str, day_key: &str) -> bool {
        self.orders_placed.get(symbol).map(String::as_str) == Some(day_key)
    }

    pub fn mark_order_placed(&mut self, symbol: &str, day_key: &str) {
        self.orders_placed.insert(symbol.to_string(), day_key.to_string());
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse a snapshot, falling back to an empty state when it is unreadable
    pub fn from_json_or_default(json: &str) -> Self {
        match Self::from_json(json) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable tracking state, starting fresh");
                Self::default()
            }
        }
    }
}
