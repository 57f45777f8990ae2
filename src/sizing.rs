//! Risk-based position sizing

use crate::broker::SymbolInfo;

/// Fraction of a volume step treated as float noise when flooring
pub const STEP_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingResult {
    pub volume: f64,
    pub risk_amount: f64,
    pub risk_per_lot: f64,
}

/// Floor `value` to a multiple of `step`, never rounding up.
///
/// `value / step` landing a hair under an integer (e.g. `0.5 / 0.01`) still
/// floors to that integer.
pub fn floor_to_step(value: f64, step: f64) -> f64 {
    if !(step > 0.0) {
        return value;
    }
    let steps = (value / step + STEP_TOLERANCE).floor();
    // Trim representation noise so 7 * 0.01 reads back as 0.07
    round_to(steps * step, step_decimals(step))
}

/// Number of decimals needed to express `step`, capped at 8
fn step_decimals(step: f64) -> i32 {
    let mut decimals = 0;
    let mut scaled = step;
    while decimals < 8 && (scaled - scaled.round()).abs() > 1e-9 {
        scaled *= 10.0;
        decimals += 1;
    }
    decimals
}

#[inline]
fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Lots that lose `risk_per_trade_pct` of `balance` between `entry` and `stop`.
///
/// Returns `None` whenever the inputs cannot produce a meaningful size:
/// non-positive balance, tick value, tick size or stop distance, or a result
/// that floors to nothing. Bounds of zero or less are ignored.
pub fn calc_volume_by_risk(
    info: &SymbolInfo,
    balance: f64,
    risk_per_trade_pct: f64,
    entry: f64,
    stop: f64,
) -> Option<SizingResult> {
    if !(balance > 0.0) || !(info.tick_value > 0.0) || !(info.tick_size > 0.0) {
        return None;
    }
    let distance = (entry - stop).abs();
    if !(distance > 0.0) {
        return None;
    }

    let risk_amount = balance * risk_per_trade_pct / 100.0;
    let risk_per_lot = distance / info.tick_size * info.tick_value;
    if !(risk_per_lot > 0.0) || !(risk_amount > 0.0) {
        return None;
    }

    let mut volume = floor_to_step(risk_amount / risk_per_lot, info.volume_step);
    if info.volume_min > 0.0 {
        volume = volume.max(info.volume_min);
    }
    if info.volume_max > 0.0 {
        volume = volume.min(info.volume_max);
    }

    if volume > 0.0 && volume.is_finite() {
        Some(SizingResult {
            volume,
            risk_amount,
            risk_per_lot,
        })
    } else {
        None
    }
}
