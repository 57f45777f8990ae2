//! Detection pipeline tests
//!
//! Exhaustion on daily bars, gap detection and validation on the pattern
//! day, then setup selection through the broker seam.

mod common;

use common::*;
use sentinel::prelude::*;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn selector_scan(config: &EngineConfig, broker: &FakeBroker) -> ScanOutcome {
    SetupSelector::new(config).scan(broker, SYMBOL)
}

// ============================================================
// EXHAUSTION
// ============================================================

#[test]
fn test_exhaustion_on_fixture() {
    let daily = daily_tb_bullish();
    let found = ExhaustionDetector::new(50.0)
        .detect_latest(&daily, Some(0.0001))
        .unwrap();
    assert_eq!(found.pattern, PatternKind::TbBullish);
    assert_eq!(found.pattern.direction(), Direction::Bullish);
    assert!((found.body_points - 90.0).abs() < 1e-6);

    // 90 point body fails a 100 point minimum
    assert!(ExhaustionDetector::new(100.0)
        .detect_latest(&daily, Some(0.0001))
        .is_none());
}

#[test]
fn test_exhaustion_bearish_mirror() {
    let c1 = Candle::new(day(5), 1.1000, 1.1100, 1.0990, 1.1090);
    let c2 = Candle::new(day(6), 1.1090, 1.1130, 1.1040, 1.1050);
    let found = ExhaustionDetector::default().detect(&c1, &c2, Some(0.0001)).unwrap();
    assert_eq!(found.pattern, PatternKind::TbBearish);

    // Closing beyond C1's extreme is a breakout, not exhaustion
    let breakout = Candle::new(day(6), 1.1090, 1.1130, 1.1040, 1.1110);
    assert!(ExhaustionDetector::default()
        .detect(&c1, &breakout, Some(0.0001))
        .is_none());
}

// ============================================================
// GAPS
// ============================================================

#[test]
fn test_gap_pipeline_on_fixture() {
    let intraday = intraday_tb_bullish();
    let gaps = GapDetector.detect_unfilled(&intraday, PatternKind::TbBullish);
    assert_eq!(gaps.len(), 2);
    assert!(gaps.iter().all(|g| g.kind == Direction::Bullish && g.top > g.bottom));

    let gaps = GapValidator::new(12, false).validate(&intraday, gaps);
    let validated: Vec<&FairValueGap> = gaps.iter().filter(|g| g.is_validated).collect();
    assert_eq!(validated.len(), 1);

    let gap = validated[0];
    assert_eq!(gap.formation_time(), m5(8));
    let level = gap.validation().unwrap();
    assert!(close(level.level, 1.0920));
    assert_eq!(level.time, m5(3));
    assert_eq!(gap.validation_levels.len(), 1);
}

#[test]
fn test_gaps_only_after_extreme() {
    let mut intraday = intraday_tb_bullish();
    // Move the day's low to the last bar; nothing can form after it
    intraday[13].low = 1.0840;
    assert!(GapDetector
        .detect_unfilled(&intraday, PatternKind::TbBullish)
        .is_empty());
}

// ============================================================
// SETUP SELECTION
// ============================================================

#[test]
fn test_setup_from_fixture() {
    let broker = FakeBroker::tb_bullish_market();
    let setup = selector_scan(&config(), &broker).setup().unwrap();

    assert_eq!(setup.symbol, SYMBOL);
    assert_eq!(setup.pattern, PatternKind::TbBullish);
    assert_eq!(setup.side(), Side::Buy);
    assert_eq!(setup.c2_time, day(6));
    assert_eq!(setup.validation_time, m5(3));
    assert_eq!(setup.formation_time, m5(8));
    assert!(close(setup.entry_price, 1.0920));
    assert!(close(setup.entry_price_adjusted, 1.0921));
    assert!(close(setup.stop_loss, 1.0850));
    assert!(close(setup.take_profit, 1.0955));
    assert!((setup.est_r_multiple - 34.0 / 71.0).abs() < 1e-6);
    assert!(close(setup.volume, 0.07));

    // Ordering along the trade direction
    assert!(setup.stop_loss < setup.entry_price_adjusted);
    assert!(setup.entry_price_adjusted < setup.take_profit);
}

#[test]
fn test_buy_spread_adjustment_can_be_disabled() {
    let broker = FakeBroker::tb_bullish_market();
    let config = EngineConfig {
        adjust_buy_limit_for_spread: false,
        ..config()
    };
    let setup = selector_scan(&config, &broker).setup().unwrap();
    assert!(close(setup.entry_price_adjusted, setup.entry_price));
}

#[test]
fn test_skip_reasons_follow_pipeline() {
    let config = config();

    let mut broker = FakeBroker::tb_bullish_market();
    broker.daily.clear();
    assert_eq!(
        selector_scan(&config, &broker).skip_reason(),
        Some(SkipReason::DailyDataUnavailable)
    );

    let mut broker = FakeBroker::tb_bullish_market();
    broker.daily.get_mut(SYMBOL).unwrap().remove(0);
    assert_eq!(
        selector_scan(&config, &broker).skip_reason(),
        Some(SkipReason::InsufficientDailyBars)
    );

    let mut broker = FakeBroker::tb_bullish_market();
    broker.infos.clear();
    assert_eq!(
        selector_scan(&config, &broker).skip_reason(),
        Some(SkipReason::SymbolInfoUnavailable)
    );

    let mut broker = FakeBroker::tb_bullish_market();
    broker.intraday.get_mut(SYMBOL).unwrap().truncate(8);
    assert_eq!(
        selector_scan(&config, &broker).skip_reason(),
        Some(SkipReason::InsufficientIntradayBars)
    );

    let mut broker = FakeBroker::tb_bullish_market();
    broker.intraday.get_mut(SYMBOL).unwrap()[5].high = 1.0800;
    assert_eq!(
        selector_scan(&config, &broker).skip_reason(),
        Some(SkipReason::InvalidIntradayData)
    );

    let mut broker = FakeBroker::tb_bullish_market();
    broker.balance = None;
    assert_eq!(
        selector_scan(&config, &broker).skip_reason(),
        Some(SkipReason::AccountUnavailable)
    );
}

#[test]
fn test_revisited_level_means_no_validated_gap() {
    let mut broker = FakeBroker::tb_bullish_market();
    broker.intraday.get_mut(SYMBOL).unwrap()[5].high = 1.0925;
    assert_eq!(
        selector_scan(&config(), &broker).skip_reason(),
        Some(SkipReason::NoValidatedGap)
    );
}

#[test]
fn test_filled_gaps_mean_no_unfilled_gap() {
    let mut broker = FakeBroker::tb_bullish_market();
    {
        let bars = broker.intraday.get_mut(SYMBOL).unwrap();
        // Late retrace through both bands
        bars[13].low = 1.0870;
        bars[13].close = 1.0900;
    }
    assert_eq!(
        selector_scan(&config(), &broker).skip_reason(),
        Some(SkipReason::NoUnfilledGap)
    );
}
