//! Partial-profit state machine against the fake broker
//!
//! Entry 1.1000 with a 40 point stop puts 3R at 1.1120 for a buy and 1.0880
//! for a sell.

mod common;

use common::*;
use sentinel::prelude::*;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn market_with(positions: Vec<OpenPosition>) -> FakeBroker {
    let mut broker = FakeBroker::new();
    broker.infos.insert(SYMBOL.to_string(), eurusd_info());
    broker.set_tick(tick(at(7, 10, 0), 1.1050, 1.1051));
    broker.positions = positions;
    broker
}

fn run(broker: &mut FakeBroker, state: &mut TrackingState, journal: &mut MemoryJournal) -> PartialReport {
    run_with(&config(), broker, state, journal)
}

fn run_with(
    config: &EngineConfig,
    broker: &mut FakeBroker,
    state: &mut TrackingState,
    journal: &mut MemoryJournal,
) -> PartialReport {
    PartialProfitManager::new(config).run(broker, state, journal, at(7, 10, 0))
}

// ============================================================
// FULL LIFECYCLE
// ============================================================

#[test]
fn test_buy_position_lifecycle() {
    let mut broker = market_with(vec![position(7001, Side::Buy, 1.0, 1.1000, 1.0960, 1.1200)]);
    let mut state = TrackingState::new();
    let mut journal = MemoryJournal::new();

    // Cycle 1: take-profit parked at 3R
    let report = run(&mut broker, &mut state, &mut journal);
    match &report.actions[..] {
        [PartialAction::TpMovedToThreeR { ticket, three_r_tp }] => {
            assert_eq!(*ticket, 7001);
            assert!(close(*three_r_tp, 1.1120));
        },
        other => panic!("unexpected actions {other:?}"),
    }
    assert_eq!(state.stage(7001), PositionStage::TpAtThreeR);
    let record = &state.positions_at_3r_tp[&7001];
    assert!(close(record.original_tp, 1.1200));
    assert!(close(record.original_sl, 1.0960));
    assert!(close(broker.position(7001).unwrap().tp, 1.1120));
    assert_eq!(journal.count(EventKind::TpModifiedTo3r), 1);

    // Cycle 2: below the trigger
    let report = run(&mut broker, &mut state, &mut journal);
    assert!(matches!(report.actions[..], [PartialAction::Waiting { ticket: 7001, .. }]));
    assert!(broker.closes.is_empty());

    // Cycle 3: 3R reached
    broker.set_tick(tick(at(7, 14, 0), 1.1120, 1.1121));
    let report = run(&mut broker, &mut state, &mut journal);
    assert_eq!(report.partials_taken(), 1);
    assert_eq!(broker.closes, vec![(7001, 0.5)]);

    let (ticket, sl, tp) = *broker.modifications.last().unwrap();
    assert_eq!(ticket, 7001);
    assert!(close(sl, 1.1000));
    assert!(close(tp, 1.1200));

    assert_eq!(state.stage(7001), PositionStage::PartialTaken);
    assert!(state.positions_at_3r_tp.is_empty());
    let partial = &state.partials_taken[&7001];
    assert_eq!(partial.r_at_partial, 3.0);
    assert_eq!(partial.volume_closed, 0.5);
    assert_eq!(partial.volume_remaining, 0.5);
    assert!(close(partial.new_sl, 1.1000));
    assert!(close(partial.tp, 1.1200));
    assert_eq!(journal.count(EventKind::PartialCloseSuccess), 1);
    assert_eq!(journal.count(EventKind::TpRestoredSlToBe), 1);

    // Cycle 4: nothing more happens
    let report = run(&mut broker, &mut state, &mut journal);
    assert_eq!(report.actions, vec![PartialAction::Unchanged { ticket: 7001 }]);
    assert_eq!(broker.closes.len(), 1);
    assert_eq!(broker.modifications.len(), 2);
}

#[test]
fn test_trigger_fires_just_below_three_r() {
    let mut broker = market_with(vec![position(7001, Side::Buy, 1.0, 1.1000, 1.0960, 1.1200)]);
    let mut state = TrackingState::new();
    let mut journal = MemoryJournal::new();
    run(&mut broker, &mut state, &mut journal);

    // 2.95R
    broker.set_tick(tick(at(7, 14, 0), 1.1118, 1.1119));
    let report = run(&mut broker, &mut state, &mut journal);
    assert_eq!(report.partials_taken(), 1);
    assert_eq!(state.partials_taken[&7001].r_at_partial, 2.95);
}

#[test]
fn test_sell_position_uses_ask() {
    let mut broker = market_with(vec![position(7002, Side::Sell, 0.3, 1.1000, 1.1040, 1.0800)]);
    let mut state = TrackingState::new();
    let mut journal = MemoryJournal::new();

    run(&mut broker, &mut state, &mut journal);
    assert!(close(state.positions_at_3r_tp[&7002].three_r_tp, 1.0880));

    // Bid through 3R is not enough for a sell
    broker.set_tick(tick(at(7, 14, 0), 1.0870, 1.0890));
    let report = run(&mut broker, &mut state, &mut journal);
    assert!(matches!(report.actions[..], [PartialAction::Waiting { .. }]));

    broker.set_tick(tick(at(7, 15, 0), 1.0870, 1.0880));
    let report = run(&mut broker, &mut state, &mut journal);
    assert_eq!(report.partials_taken(), 1);
    assert_eq!(broker.closes, vec![(7002, 0.15)]);
}

// ============================================================
// FAILURES
// ============================================================

#[test]
fn test_park_failure_leaves_position_untracked() {
    let mut broker = market_with(vec![position(7001, Side::Buy, 1.0, 1.1000, 1.0960, 1.1200)]);
    broker.modify_code = Some(10006);
    let mut state = TrackingState::new();
    let mut journal = MemoryJournal::new();

    let report = run(&mut broker, &mut state, &mut journal);
    assert_eq!(
        report.actions,
        vec![PartialAction::TpModifyFailed {
            ticket: 7001,
            code: 10006
        }]
    );
    assert_eq!(state.stage(7001), PositionStage::Untracked);
    assert_eq!(journal.count(EventKind::TpModifyTo3rFailed), 1);
}

#[test]
fn test_close_failure_keeps_three_r_stage() {
    let mut broker = market_with(vec![position(7001, Side::Buy, 1.0, 1.1000, 1.0960, 1.1200)]);
    let mut state = TrackingState::new();
    let mut journal = MemoryJournal::new();
    run(&mut broker, &mut state, &mut journal);

    broker.close_code = Some(10019);
    broker.set_tick(tick(at(7, 14, 0), 1.1120, 1.1121));
    let report = run(&mut broker, &mut state, &mut journal);

    assert_eq!(
        report.actions,
        vec![PartialAction::PartialCloseFailed {
            ticket: 7001,
            code: 10019
        }]
    );
    assert_eq!(state.stage(7001), PositionStage::TpAtThreeR);
    // No restore attempted after a failed close
    assert_eq!(broker.modifications.len(), 1);
    assert_eq!(journal.count(EventKind::PartialCloseFailed), 1);
}

#[test]
fn test_restore_failure_still_records_partial() {
    let mut broker = market_with(vec![position(7001, Side::Buy, 1.0, 1.1000, 1.0960, 1.1200)]);
    let mut state = TrackingState::new();
    let mut journal = MemoryJournal::new();
    run(&mut broker, &mut state, &mut journal);

    broker.restore_code = Some(10016);
    broker.set_tick(tick(at(7, 14, 0), 1.1120, 1.1121));
    let report = run(&mut broker, &mut state, &mut journal);

    assert_eq!(
        report.actions,
        vec![PartialAction::PartialTaken {
            ticket: 7001,
            volume_closed: 0.5,
            restored: false
        }]
    );
    assert_eq!(state.stage(7001), PositionStage::PartialTaken);
    assert_eq!(journal.count(EventKind::TpRestoreFailed), 1);

    // Never closed twice
    run(&mut broker, &mut state, &mut journal);
    assert_eq!(broker.closes.len(), 1);
}

#[test]
fn test_volume_too_small_to_split() {
    let mut broker = market_with(vec![position(7001, Side::Buy, 0.01, 1.1000, 1.0960, 1.1200)]);
    let mut state = TrackingState::new();
    let mut journal = MemoryJournal::new();
    run(&mut broker, &mut state, &mut journal);

    broker.set_tick(tick(at(7, 14, 0), 1.1120, 1.1121));
    let report = run(&mut broker, &mut state, &mut journal);
    assert!(matches!(report.actions[..], [PartialAction::VolumeInvalid { ticket: 7001, .. }]));
    assert_eq!(state.stage(7001), PositionStage::TpAtThreeR);
    assert_eq!(journal.count(EventKind::PartialVolumeInvalid), 1);
}

#[test]
fn test_bad_position_does_not_stop_others() {
    let mut broken = position(7001, Side::Buy, 1.0, 1.1000, 1.0960, 1.1200);
    broken.sl = f64::NAN;
    let mut broker = market_with(vec![
        broken,
        position(7002, Side::Buy, 1.0, 1.1000, 1.0960, 1.1200),
    ]);
    let mut state = TrackingState::new();
    let mut journal = MemoryJournal::new();

    let report = run(&mut broker, &mut state, &mut journal);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].ticket, 7001);
    assert_eq!(state.stage(7002), PositionStage::TpAtThreeR);
    assert_eq!(journal.count(EventKind::PartialExecutionError), 1);
}

// ============================================================
// NO-OP PATHS
// ============================================================

#[test]
fn test_target_inside_three_r_left_alone() {
    let mut broker = market_with(vec![position(7001, Side::Buy, 1.0, 1.1000, 1.0960, 1.1100)]);
    let mut state = TrackingState::new();
    let mut journal = MemoryJournal::new();

    let report = run(&mut broker, &mut state, &mut journal);
    assert_eq!(report.actions, vec![PartialAction::Unchanged { ticket: 7001 }]);
    assert!(broker.modifications.is_empty());
}

#[test]
fn test_unset_target_left_alone_on_buy() {
    let mut broker = market_with(vec![position(7001, Side::Buy, 1.0, 1.1000, 1.0960, 0.0)]);
    let mut state = TrackingState::new();
    let mut journal = MemoryJournal::new();

    let report = run(&mut broker, &mut state, &mut journal);
    assert_eq!(report.actions, vec![PartialAction::Unchanged { ticket: 7001 }]);
    assert!(broker.modifications.is_empty());
    assert_eq!(state.stage(7001), PositionStage::Untracked);
    assert_eq!(broker.position(7001).unwrap().tp, 0.0);
}

#[test]
fn test_unset_target_parked_on_sell() {
    let mut broker = market_with(vec![position(7002, Side::Sell, 1.0, 1.1000, 1.1040, 0.0)]);
    let mut state = TrackingState::new();
    let mut journal = MemoryJournal::new();

    run(&mut broker, &mut state, &mut journal);
    assert_eq!(state.stage(7002), PositionStage::TpAtThreeR);
    assert_eq!(state.positions_at_3r_tp[&7002].original_tp, 0.0);
    assert!(close(broker.position(7002).unwrap().tp, 1.0880));
}

#[test]
fn test_aggressive_mode_leaves_positions_alone() {
    let config = EngineConfig {
        trading_mode: TradingMode::Aggressive,
        ..config()
    };
    let mut broker = market_with(vec![position(7001, Side::Buy, 1.0, 1.1000, 1.0960, 1.1200)]);
    let mut state = TrackingState::new();
    let mut journal = MemoryJournal::new();

    let report = run_with(&config, &mut broker, &mut state, &mut journal);
    assert!(report.actions.is_empty());
    assert!(broker.modifications.is_empty());
    assert_eq!(state, TrackingState::new());
}

#[test]
fn test_foreign_positions_ignored() {
    let mut foreign = position(7001, Side::Buy, 1.0, 1.1000, 1.0960, 1.1200);
    foreign.tag = 42;
    let mut broker = market_with(vec![foreign]);
    let mut state = TrackingState::new();
    let mut journal = MemoryJournal::new();

    let report = run(&mut broker, &mut state, &mut journal);
    assert!(report.actions.is_empty());
    assert!(broker.modifications.is_empty());
}

#[test]
fn test_closed_ticket_pruned_while_others_live() {
    let mut broker = market_with(vec![
        position(7001, Side::Buy, 1.0, 1.1000, 1.0960, 1.1200),
        position(7002, Side::Buy, 1.0, 1.1000, 1.0960, 1.1200),
    ]);
    let mut state = TrackingState::new();
    let mut journal = MemoryJournal::new();
    run(&mut broker, &mut state, &mut journal);

    broker.positions.retain(|p| p.ticket != 7001);
    let report = run(&mut broker, &mut state, &mut journal);
    assert_eq!(report.pruned.three_r, vec![7001]);
    assert_eq!(state.stage(7001), PositionStage::Untracked);

    let event = journal.of_kind(EventKind::Cleanup3rTpPositions).next().unwrap();
    assert_eq!(event.payload["removed_tickets"][0], 7001);
}
