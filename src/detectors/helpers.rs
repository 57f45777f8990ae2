//! Common helper functions shared by the detectors

use chrono::NaiveDateTime;

use crate::{OHLCExt, OHLC};

/// Convert a price distance into points. `None` when the point size is unusable.
#[inline]
pub fn to_points(distance: f64, point: f64) -> Option<f64> {
    if point.is_finite() && point > 0.0 {
        Some(distance / point)
    } else {
        None
    }
}

/// Inclusive band membership
#[inline]
pub fn in_band(price: f64, bottom: f64, top: f64) -> bool {
    bottom <= price && price <= top
}

/// Index of the first bar with the lowest low
pub fn lowest_low_index<T: OHLC>(bars: &[T]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, bar) in bars.iter().enumerate() {
        match best {
            Some((_, low)) if bar.low() >= low => {}
            _ => best = Some((i, bar.low())),
        }
    }
    best.map(|(i, _)| i)
}

/// Index of the first bar with the highest high
pub fn highest_high_index<T: OHLC>(bars: &[T]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, bar) in bars.iter().enumerate() {
        match best {
            Some((_, high)) if bar.high() <= high => {}
            _ => best = Some((i, bar.high())),
        }
    }
    best.map(|(i, _)| i)
}

/// Number of leading bars whose time is at or before `time`.
/// Assumes ascending time order.
#[inline]
pub fn bars_through<T: OHLC>(bars: &[T], time: NaiveDateTime) -> usize {
    bars.partition_point(|b| b.time() <= time)
}

/// True when any bar in the slice trades into the `[bottom, top]` band.
#[inline]
pub fn any_overlap<T: OHLC>(bars: &[T], bottom: f64, top: f64) -> bool {
    bars.iter().any(|b| b.overlaps(bottom, top))
}
