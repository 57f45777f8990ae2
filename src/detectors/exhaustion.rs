//! Daily exhaustion ("TB") pattern
//!
//! C1 is a large-bodied day. C2 trades beyond C1's extreme in C1's direction
//! and then closes back inside C1's body range. The expected trade runs
//! against C1: a bullish C1 yields `TB Bearish`, a bearish one `TB Bullish`.

use serde::{Deserialize, Serialize};

use super::helpers::to_points;
use crate::{Direction, OHLCExt, OHLC};

impl_with_defaults!(ExhaustionDetector);

// ============================================================
// PATTERN KIND
// ============================================================

/// Exhaustion pattern label, named after the expected trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternKind {
    #[serde(rename = "TB Bullish")]
    TbBullish,
    #[serde(rename = "TB Bearish")]
    TbBearish,
}

impl PatternKind {
    /// Direction of the trade and of the gaps searched for it
    #[inline]
    pub fn direction(self) -> Direction {
        match self {
            PatternKind::TbBullish => Direction::Bullish,
            PatternKind::TbBearish => Direction::Bearish,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PatternKind::TbBullish => "TB Bullish",
            PatternKind::TbBearish => "TB Bearish",
        }
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected exhaustion pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExhaustionMatch {
    pub pattern: PatternKind,
    /// C1 body size in points
    pub body_points: f64,
}

// ============================================================
// DETECTOR
// ============================================================

#[derive(Debug, Clone)]
pub struct ExhaustionDetector {
    /// Minimum C1 body, in points
    pub min_body_points: f64,
}

impl Default for ExhaustionDetector {
    fn default() -> Self {
        Self {
            min_body_points: 50.0,
        }
    }
}

impl ExhaustionDetector {
    pub fn new(min_body_points: f64) -> Self {
        Self { min_body_points }
    }

    /// Detect the pattern on (C1, C2).
    ///
    /// `point` is the symbol's minimum price increment; `None` or a
    /// non-positive value fails closed.
    pub fn detect<T: OHLC>(&self, c1: &T, c2: &T, point: Option<f64>) -> Option<ExhaustionMatch> {
        let body_points = to_points(c1.body(), point?)?;
        if body_points < self.min_body_points {
            return None;
        }

        if c1.is_bullish() {
            let swept = c2.high() > c1.high();
            let closed_inside = c1.open() < c2.close() && c2.close() < c1.high();
            (swept && closed_inside).then_some(ExhaustionMatch {
                pattern: PatternKind::TbBearish,
                body_points,
            })
        } else {
            let swept = c2.low() < c1.low();
            let closed_inside = c1.low() < c2.close() && c2.close() < c1.open();
            (swept && closed_inside).then_some(ExhaustionMatch {
                pattern: PatternKind::TbBullish,
                body_points,
            })
        }
    }

    /// Detect on the last three daily bars, where the newest (C3) is the
    /// current, still forming day and is not inspected.
    pub fn detect_latest<T: OHLC>(&self, daily: &[T], point: Option<f64>) -> Option<ExhaustionMatch> {
        if daily.len() < 3 {
            return None;
        }
        let n = daily.len();
        self.detect(&daily[n - 3], &daily[n - 2], point)
    }
}
