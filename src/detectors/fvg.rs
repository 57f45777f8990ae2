//! Fair value gaps
//!
//! [`GapDetector`] is the structural pass: three-candle imbalances on the
//! pattern day that price never traded back into. [`GapValidator`] is the
//! projection pass: it looks for an earlier reaction inside the gap band,
//! followed by a displacement through it, and accepts the reaction's second
//! candle open as the entry level when price did not revisit it before the gap
//! formed. Both passes are pure and hand gaps along by value.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{
    exhaustion::PatternKind,
    helpers::{any_overlap, bars_through, highest_high_index, in_band, lowest_low_index},
};
use crate::{Direction, OHLCExt, OHLC};

impl_with_defaults!(GapValidator);

// ============================================================
// TYPES
// ============================================================

/// Projected reaction level for a gap
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationLevel {
    pub level: f64,
    pub time: NaiveDateTime,
}

/// A three-candle imbalance. `top > bottom` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairValueGap {
    /// Time of the first candle of the triplet (formation time)
    pub start_time: NaiveDateTime,
    /// Time of the last candle of the scanned series
    pub end_time: NaiveDateTime,
    pub top: f64,
    pub bottom: f64,
    pub kind: Direction,
    /// At most one level is ever retained
    pub validation_levels: Vec<ValidationLevel>,
    pub is_validated: bool,
}

impl FairValueGap {
    #[inline]
    pub fn formation_time(&self) -> NaiveDateTime {
        self.start_time
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    /// The accepted reaction level, when validated
    pub fn validation(&self) -> Option<&ValidationLevel> {
        if self.is_validated {
            self.validation_levels.first()
        } else {
            None
        }
    }
}

// ============================================================
// STRUCTURAL PASS
// ============================================================

/// Index of the pattern day's extreme candle: first lowest low for a
/// `TB Bullish` day, first highest high for `TB Bearish`.
pub fn extreme_index<T: OHLC>(candles: &[T], pattern: PatternKind) -> Option<usize> {
    match pattern {
        PatternKind::TbBullish => lowest_low_index(candles),
        PatternKind::TbBearish => highest_high_index(candles),
    }
}

/// True when any of `subsequent` trades into `[bottom, top]`
#[inline]
pub fn is_filled<T: OHLC>(top: f64, bottom: f64, subsequent: &[T]) -> bool {
    any_overlap(subsequent, bottom, top)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GapDetector;

impl GapDetector {
    /// Unfilled gaps in `candles`, scanning from the extreme candle of the
    /// pattern day onward. Only gaps in the pattern's trade direction are
    /// returned, in formation order.
    pub fn detect_unfilled<T: OHLC>(&self, candles: &[T], pattern: PatternKind) -> Vec<FairValueGap> {
        match extreme_index(candles, pattern) {
            Some(start) => self.scan(candles, start, pattern.direction()),
            None => Vec::new(),
        }
    }

    /// Scan triplets starting at `start`. Fewer than three candles from there
    /// yields nothing.
    pub fn scan<T: OHLC>(&self, candles: &[T], start: usize, kind: Direction) -> Vec<FairValueGap> {
        let Some(window) = candles.get(start..) else {
            return Vec::new();
        };
        if window.len() < 3 {
            return Vec::new();
        }
        let end_time = window[window.len() - 1].time();
        let mut gaps = Vec::new();

        for i in 0..window.len() - 2 {
            let (first, third) = (&window[i], &window[i + 2]);
            let band = match kind {
                Direction::Bullish if first.high() < third.low() => Some((third.low(), first.high())),
                Direction::Bearish if first.low() > third.high() => Some((first.low(), third.high())),
                _ => None,
            };
            let Some((top, bottom)) = band else {
                continue;
            };
            if is_filled(top, bottom, &window[i + 3..]) {
                continue;
            }
            gaps.push(FairValueGap {
                start_time: first.time(),
                end_time,
                top,
                bottom,
                kind,
                validation_levels: Vec::new(),
                is_validated: false,
            });
        }
        gaps
    }
}

// ============================================================
// PROJECTION PASS
// ============================================================

#[derive(Debug, Clone)]
pub struct GapValidator {
    /// Candles searched for displacement after a reaction pair
    pub lookahead: usize,
    /// Validate every gap instead of stopping at the first success
    pub exhaustive: bool,
}

impl Default for GapValidator {
    fn default() -> Self {
        Self {
            lookahead: 12,
            exhaustive: false,
        }
    }
}

impl GapValidator {
    pub fn new(lookahead: usize, exhaustive: bool) -> Self {
        Self {
            lookahead,
            exhaustive,
        }
    }

    /// Returns `gaps` with validation fields populated. Unless `exhaustive` is
    /// set, gaps after the first validated one are returned untouched.
    pub fn validate<T: OHLC>(&self, series: &[T], gaps: Vec<FairValueGap>) -> Vec<FairValueGap> {
        let mut done = false;
        gaps.into_iter()
            .map(|mut gap| {
                if done {
                    return gap;
                }
                if let Some(level) = self.find_level(series, &gap) {
                    gap.validation_levels = vec![level];
                    gap.is_validated = true;
                    done = !self.exhaustive;
                }
                gap
            })
            .collect()
    }

    /// First reaction level for `gap` that survived until formation.
    pub fn find_level<T: OHLC>(&self, series: &[T], gap: &FairValueGap) -> Option<ValidationLevel> {
        let formation = gap.formation_time();
        let n_prefix = bars_through(series, formation);

        for i in 0..series.len().saturating_sub(2) {
            let (c1, c2) = (&series[i], &series[i + 1]);
            if !is_reaction(gap, c1, c2) {
                continue;
            }
            // The level must exist strictly before the gap forms
            if c2.time() >= formation {
                continue;
            }

            let search_end = (i + 2 + self.lookahead).min(n_prefix);
            let Some(j) = (i + 2..search_end).find(|&j| is_displacement(gap, &series[j])) else {
                continue;
            };

            let level = c2.open();
            let violated = series[j + 1..]
                .iter()
                .take_while(|c| c.time() < formation)
                .any(|c| is_violation(gap.kind, c, level));
            if violated {
                continue;
            }
            return Some(ValidationLevel {
                level,
                time: c2.time(),
            });
        }
        None
    }
}

/// c1 closes into the band in the gap's direction, c2 turns against it
fn is_reaction<T: OHLC>(gap: &FairValueGap, c1: &T, c2: &T) -> bool {
    if !in_band(c1.close(), gap.bottom, gap.top) {
        return false;
    }
    match gap.kind {
        Direction::Bullish => c1.is_bullish() && c2.is_bearish(),
        Direction::Bearish => c1.is_bearish() && c2.is_bullish(),
    }
}

#[inline]
fn is_displacement<T: OHLC>(gap: &FairValueGap, candle: &T) -> bool {
    match gap.kind {
        Direction::Bullish => candle.close() < gap.bottom,
        Direction::Bearish => candle.close() > gap.top,
    }
}

#[inline]
fn is_violation<T: OHLC>(kind: Direction, candle: &T, level: f64) -> bool {
    match kind {
        Direction::Bullish => candle.high() > level,
        Direction::Bearish => candle.low() < level,
    }
}
