//! Setup selection
//!
//! Combines the exhaustion day, the unfilled gaps on its intraday series and
//! their projected reaction levels into a single trade candidate with entry,
//! stop, target and size. Most scans end without a setup; that is reported as
//! a [`SkipReason`], never as an error.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    broker::{day_end, daily_fetch_count, Broker, SymbolInfo},
    config::EngineConfig,
    detectors::{ExhaustionDetector, FairValueGap, GapDetector, GapValidator, PatternKind},
    sizing::calc_volume_by_risk,
    validate_series, Candle, Direction, OHLCExt, Side,
};

// ============================================================
// TYPES
// ============================================================

/// A fully specified trade candidate. Produced per scan, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setup {
    pub symbol: String,
    pub pattern: PatternKind,
    pub fvg_kind: Direction,
    pub c2_time: NaiveDateTime,
    pub validation_level: f64,
    pub validation_time: NaiveDateTime,
    pub formation_time: NaiveDateTime,
    pub entry_price: f64,
    pub entry_price_adjusted: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub est_r_multiple: f64,
    pub volume: f64,
}

impl Setup {
    #[inline]
    pub fn side(&self) -> Side {
        Side::from(self.fvg_kind)
    }
}

/// Why a scan produced no setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    DailyDataUnavailable,
    InsufficientDailyBars,
    SymbolInfoUnavailable,
    PatternAbsent,
    IntradayDataUnavailable,
    InsufficientIntradayBars,
    InvalidIntradayData,
    NoUnfilledGap,
    NoValidatedGap,
    AccountUnavailable,
    NoViableCandidate,
}

impl SkipReason {
    /// Missing or unusable broker data, as opposed to an absent signal
    pub fn is_data_unavailable(self) -> bool {
        matches!(
            self,
            SkipReason::DailyDataUnavailable
                | SkipReason::InsufficientDailyBars
                | SkipReason::SymbolInfoUnavailable
                | SkipReason::IntradayDataUnavailable
                | SkipReason::InsufficientIntradayBars
                | SkipReason::InvalidIntradayData
                | SkipReason::AccountUnavailable
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::DailyDataUnavailable => "daily_data_unavailable",
            SkipReason::InsufficientDailyBars => "insufficient_daily_bars",
            SkipReason::SymbolInfoUnavailable => "symbol_info_unavailable",
            SkipReason::PatternAbsent => "pattern_absent",
            SkipReason::IntradayDataUnavailable => "intraday_data_unavailable",
            SkipReason::InsufficientIntradayBars => "insufficient_intraday_bars",
            SkipReason::InvalidIntradayData => "invalid_intraday_data",
            SkipReason::NoUnfilledGap => "no_unfilled_gap",
            SkipReason::NoValidatedGap => "no_validated_gap",
            SkipReason::AccountUnavailable => "account_unavailable",
            SkipReason::NoViableCandidate => "no_viable_candidate",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Found(Setup),
    Skipped(SkipReason),
}

impl ScanOutcome {
    pub fn setup(self) -> Option<Setup> {
        match self {
            ScanOutcome::Found(setup) => Some(setup),
            ScanOutcome::Skipped(_) => None,
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            ScanOutcome::Found(_) => None,
            ScanOutcome::Skipped(reason) => Some(*reason),
        }
    }
}

/// Account and quote inputs for ranking candidates
#[derive(Debug, Clone, Copy)]
pub struct MarketSnapshot {
    pub info: SymbolInfo,
    pub balance: f64,
    pub spread: Option<f64>,
}

// ============================================================
// PRICE HELPERS
// ============================================================

/// Stop for a gap: lowest low (bullish) or highest high (bearish) of the
/// candles strictly between `after` and `before`. `None` when no candle lies
/// in between.
pub fn stop_between(
    candles: &[Candle],
    after: NaiveDateTime,
    before: NaiveDateTime,
    kind: Direction,
) -> Option<f64> {
    let inside = candles.iter().filter(|c| after < c.time && c.time < before);
    match kind {
        Direction::Bullish => inside.map(|c| c.low).reduce(f64::min),
        Direction::Bearish => inside.map(|c| c.high).reduce(f64::max),
    }
}

/// Shift a bid-based level so the limit triggers when bid reaches it.
/// Missing spread leaves the entry unchanged.
pub fn adjust_for_spread(kind: Direction, entry: f64, spread: Option<f64>, config: &EngineConfig) -> f64 {
    match (kind, spread) {
        (Direction::Bullish, Some(s)) if config.adjust_buy_limit_for_spread => entry + s,
        (Direction::Bearish, Some(s)) if config.adjust_sell_limit_for_spread => entry - s,
        _ => entry,
    }
}

/// Reward over risk. `None` for a non-positive stop distance.
pub fn r_multiple(entry: f64, stop: f64, target: f64) -> Option<f64> {
    let risk = (entry - stop).abs();
    if !(risk > 0.0) {
        return None;
    }
    Some((target - entry).abs() / risk)
}

/// Entry strictly on the profitable side of the target
#[inline]
fn entry_before_target(kind: Direction, entry: f64, target: f64) -> bool {
    match kind {
        Direction::Bullish => entry < target,
        Direction::Bearish => entry > target,
    }
}

// ============================================================
// SELECTOR
// ============================================================

pub struct SetupSelector<'a> {
    config: &'a EngineConfig,
    exhaustion: ExhaustionDetector,
    validator: GapValidator,
}

impl<'a> SetupSelector<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self {
            config,
            exhaustion: ExhaustionDetector::new(config.min_candle_size_pips),
            validator: GapValidator::new(config.validation_lookahead, config.exhaustive_gap_validation),
        }
    }

    /// Fetch daily bars and scan `symbol`
    pub fn scan<B: Broker>(&self, broker: &B, symbol: &str) -> ScanOutcome {
        match broker.daily_candles(symbol, daily_fetch_count(self.config.lookback_days)) {
            Some(daily) => self.scan_daily(broker, symbol, &daily),
            None => skip(symbol, SkipReason::DailyDataUnavailable),
        }
    }

    /// Scan `symbol` using already fetched daily bars, oldest first, where the
    /// last bar is the forming day.
    pub fn scan_daily<B: Broker>(&self, broker: &B, symbol: &str, daily: &[Candle]) -> ScanOutcome {
        if daily.len() < 4 {
            return skip(symbol, SkipReason::InsufficientDailyBars);
        }
        let n = daily.len();
        let (c1, c2) = (&daily[n - 3], &daily[n - 2]);

        let Some(info) = broker.symbol_info(symbol) else {
            return skip(symbol, SkipReason::SymbolInfoUnavailable);
        };
        let Some(found) = self.exhaustion.detect(c1, c2, Some(info.point)) else {
            return skip(symbol, SkipReason::PatternAbsent);
        };
        debug!(symbol, pattern = %found.pattern, body_points = found.body_points, "exhaustion day");

        let Some(intraday) = broker.intraday_candles(symbol, c2.time, day_end(c2.time)) else {
            return skip(symbol, SkipReason::IntradayDataUnavailable);
        };
        if intraday.len() < self.config.min_intraday_bars {
            return skip(symbol, SkipReason::InsufficientIntradayBars);
        }
        if let Err(e) = validate_series(&intraday) {
            debug!(symbol, error = %e, "intraday series rejected");
            return skip(symbol, SkipReason::InvalidIntradayData);
        }

        let gaps = GapDetector.detect_unfilled(&intraday, found.pattern);
        if gaps.is_empty() {
            return skip(symbol, SkipReason::NoUnfilledGap);
        }
        let gaps = self.validator.validate(&intraday, gaps);
        if !gaps.iter().any(|g| g.validation().is_some()) {
            return skip(symbol, SkipReason::NoValidatedGap);
        }

        let Some(balance) = broker.account_balance() else {
            return skip(symbol, SkipReason::AccountUnavailable);
        };
        let market = MarketSnapshot {
            info,
            balance,
            spread: broker.spread(symbol),
        };

        match self.rank(symbol, found.pattern, c1, c2, &intraday, &gaps, &market) {
            Some(setup) => ScanOutcome::Found(setup),
            None => skip(symbol, SkipReason::NoViableCandidate),
        }
    }

    /// Best-R candidate among the validated gaps. Ties keep the first found.
    #[allow(clippy::too_many_arguments)]
    pub fn rank(
        &self,
        symbol: &str,
        pattern: PatternKind,
        c1: &Candle,
        c2: &Candle,
        intraday: &[Candle],
        gaps: &[FairValueGap],
        market: &MarketSnapshot,
    ) -> Option<Setup> {
        let target = c1.midpoint();
        let mut best: Option<Setup> = None;

        for gap in gaps {
            let Some(validation) = gap.validation() else {
                continue;
            };
            let formation = gap.formation_time();
            if validation.time >= formation {
                continue;
            }
            let Some(stop) = stop_between(intraday, validation.time, formation, gap.kind) else {
                continue;
            };
            let entry = validation.level;
            if !entry_before_target(gap.kind, entry, target) {
                continue;
            }
            let entry_adjusted = adjust_for_spread(gap.kind, entry, market.spread, self.config);
            let Some(r) = r_multiple(entry_adjusted, stop, target) else {
                continue;
            };
            let Some(sizing) = calc_volume_by_risk(
                &market.info,
                market.balance,
                self.config.risk_per_trade_pct,
                entry_adjusted,
                stop,
            ) else {
                continue;
            };

            if best.as_ref().map_or(true, |b| r > b.est_r_multiple) {
                best = Some(Setup {
                    symbol: symbol.to_string(),
                    pattern,
                    fvg_kind: gap.kind,
                    c2_time: c2.time,
                    validation_level: entry,
                    validation_time: validation.time,
                    formation_time: formation,
                    entry_price: entry,
                    entry_price_adjusted: entry_adjusted,
                    stop_loss: stop,
                    take_profit: target,
                    est_r_multiple: r,
                    volume: sizing.volume,
                });
            }
        }
        best
    }
}

fn skip(symbol: &str, reason: SkipReason) -> ScanOutcome {
    debug!(symbol, %reason, "no setup");
    ScanOutcome::Skipped(reason)
}
