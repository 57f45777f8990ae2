//! # Sentinel - exhaustion / fair value gap trading engine
//!
//! Decision core for an unattended limit-order strategy. Once per polling cycle
//! the caller hands the engine fresh broker snapshots and its persisted
//! [`TrackingState`](state::TrackingState); the engine returns decisions,
//! submits through the [`Broker`](broker::Broker) seam and mutates the state it
//! was given. It never sleeps, spawns or touches the filesystem.
//!
//! Pipeline per symbol:
//!
//! 1. [`ExhaustionDetector`](detectors::ExhaustionDetector) on the last two
//!    completed daily bars (C1, C2).
//! 2. [`GapDetector`](detectors::GapDetector) finds unfilled fair value gaps on
//!    the C2 intraday series, starting at the day's extreme candle.
//! 3. [`GapValidator`](detectors::GapValidator) projects a reaction level for
//!    the gaps (first success wins).
//! 4. [`setup`] turns validated gaps into a ranked, risk-sized [`Setup`](setup::Setup).
//! 5. [`guard`] suppresses duplicate intents before submission.
//!
//! Independently of scanning, [`partials`] runs the two-stage partial-profit
//! state machine and [`reconcile`] maps broker snapshots into journal events.
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::NaiveDate;
//! use sentinel::prelude::*;
//!
//! let day = |d: u32| NaiveDate::from_ymd_opt(2024, 3, d).unwrap().and_hms_opt(0, 0, 0).unwrap();
//!
//! // Bullish C1 with a 60 pip body, C2 runs above it and closes back inside.
//! let c1 = Candle::new(day(5), 1.1000, 1.1070, 1.0990, 1.1060);
//! let c2 = Candle::new(day(6), 1.1060, 1.1080, 1.1030, 1.1042);
//!
//! let detector = ExhaustionDetector::new(50.0);
//! let found = detector.detect(&c1, &c2, Some(0.0001)).unwrap();
//! assert_eq!(found.pattern, PatternKind::TbBearish);
//! ```

pub mod broker;
pub mod config;
pub mod detectors;
pub mod engine;
pub mod guard;
pub mod journal;
pub mod params;
pub mod partials;
pub mod reconcile;
pub mod setup;
pub mod sizing;
pub mod state;

pub mod prelude {
    pub use crate::{
        // Broker seam
        broker::{
            retain_tagged, Broker, Deal, DealEntry, LimitOrderRequest, OpenPosition, OrderKind,
            PendingOrder, SymbolInfo, Tagged, TradeOp, TradeResult, RETCODE_DONE,
        },
        // Configuration
        config::{EngineConfig, TradingMode},
        // Detectors
        detectors::*,
        // Cycle
        engine::{CycleReport, Engine, SymbolDecision, SymbolOutcome},
        guard::{DuplicateGuard, DuplicateSource},
        journal::{Event, EventKind, Journal, MemoryJournal},
        params::{ParamMeta, ParamType, Tunable},
        partials::{PartialAction, PartialProfitManager, PartialReport, TicketFailure},
        reconcile::{Reconciler, ReconcileReport, RuntimeTracker},
        setup::{ScanOutcome, Setup, SetupSelector, SkipReason},
        sizing::{calc_volume_by_risk, SizingResult},
        state::{PartialRecord, PositionStage, ThreeRRecord, TrackingState},
        // Core types
        validate_series,
        Candle,
        Direction,
        OHLCExt,
        Result,
        SentinelError,
        Side,
        Tick,
        Ticket,
        OHLC,
    };
}

use chrono::NaiveDateTime;

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, SentinelError>;

/// Errors raised by the engine.
///
/// Missing market data and absent signals are not errors; they surface as
/// [`SkipReason`](setup::SkipReason) values instead.
#[derive(Debug, thiserror::Error)]
pub enum SentinelError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid candle at index {index}: {reason}")]
    InvalidCandle { index: usize, reason: &'static str },

    #[error("Invalid position {ticket}: {reason}")]
    InvalidPosition { ticket: Ticket, reason: &'static str },

    #[error("State serialization failed: {0}")]
    State(#[from] serde_json::Error),

    #[error("Config parse failed: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================
// MARKET DATA
// ============================================================

/// Broker-assigned order / position / deal number.
pub type Ticket = u64;

/// One OHLC bar. Times are broker server time without a zone.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Candle {
    pub time: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn new(time: NaiveDateTime, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
        }
    }
}

/// Current quote for a symbol. `ask >= bid` is assumed, not enforced.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Tick {
    pub time: NaiveDateTime,
    pub bid: f64,
    pub ask: f64,
}

impl Tick {
    /// Quoted spread in price units, never negative.
    #[inline]
    pub fn spread(&self) -> f64 {
        (self.ask - self.bid).max(0.0)
    }
}

// ============================================================
// OHLC TRAITS
// ============================================================

/// Core OHLC data trait
pub trait OHLC {
    fn time(&self) -> NaiveDateTime;
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
}

impl OHLC for Candle {
    #[inline]
    fn time(&self) -> NaiveDateTime {
        self.time
    }

    #[inline]
    fn open(&self) -> f64 {
        self.open
    }

    #[inline]
    fn high(&self) -> f64 {
        self.high
    }

    #[inline]
    fn low(&self) -> f64 {
        self.low
    }

    #[inline]
    fn close(&self) -> f64 {
        self.close
    }
}

/// Extension trait with computed properties for OHLC data
pub trait OHLCExt: OHLC {
    #[inline]
    fn body(&self) -> f64 {
        (self.close() - self.open()).abs()
    }

    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    #[inline]
    fn midpoint(&self) -> f64 {
        (self.high() + self.low()) / 2.0
    }

    #[inline]
    fn is_bullish(&self) -> bool {
        self.close() > self.open()
    }

    #[inline]
    fn is_bearish(&self) -> bool {
        self.close() < self.open()
    }

    /// True when the bar's range touches the `[bottom, top]` band.
    #[inline]
    fn overlaps(&self, bottom: f64, top: f64) -> bool {
        self.low() <= top && self.high() >= bottom
    }

    /// Validate OHLC data consistency
    fn validate(&self) -> Result<()> {
        let values = [self.open(), self.high(), self.low(), self.close()];
        if values.iter().any(|v| v.is_nan()) {
            return Err(SentinelError::InvalidCandle {
                index: 0,
                reason: "NaN in OHLC",
            });
        }
        if values.iter().any(|v| v.is_infinite()) {
            return Err(SentinelError::InvalidCandle {
                index: 0,
                reason: "Infinite value in OHLC",
            });
        }
        if self.high() < self.low() {
            return Err(SentinelError::InvalidCandle {
                index: 0,
                reason: "high < low",
            });
        }
        Ok(())
    }
}

impl<T: OHLC> OHLCExt for T {}

/// Validate every bar of a series and its ascending time order.
pub fn validate_series<T: OHLC>(bars: &[T]) -> Result<()> {
    for (i, bar) in bars.iter().enumerate() {
        bar.validate().map_err(|e| match e {
            SentinelError::InvalidCandle { reason, .. } => {
                SentinelError::InvalidCandle { index: i, reason }
            }
            other => other,
        })?;
        if i > 0 && bars[i - 1].time() > bar.time() {
            return Err(SentinelError::InvalidCandle {
                index: i,
                reason: "time not ascending",
            });
        }
    }
    Ok(())
}

// ============================================================
// DIRECTION
// ============================================================

/// Directional bias of a gap or trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Direction {
    Bullish,
    Bearish,
}

impl Direction {
    #[inline]
    pub fn is_bullish(self) -> bool {
        matches!(self, Direction::Bullish)
    }

    #[inline]
    pub fn is_bearish(self) -> bool {
        matches!(self, Direction::Bearish)
    }

    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Direction::Bullish => Direction::Bearish,
            Direction::Bearish => Direction::Bullish,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Bullish => write!(f, "Bullish"),
            Direction::Bearish => write!(f, "Bearish"),
        }
    }
}

/// Order / position side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl From<Direction> for Side {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Bullish => Side::Buy,
            Direction::Bearish => Side::Sell,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

// ============================================================
// TESTS
// ============================================================
