//! Profile projection and rebuild tests: the transaction log is the
//! source of truth, and the rebuild equals its pure projection.

use chrono::{DateTime, TimeZone, Utc};
use fraudlite_core::clock::SystemClock;
use fraudlite_core::config::EngineConfig;
use fraudlite_core::profile::{Decision, Mode};
use fraudlite_core::rebuild::{NightlyRebuilder, RebuildGuard};
use fraudlite_core::scoring::{AnalysisResult, TxnInput};
use fraudlite_core::store::ProfileStore;
use fraudlite_core::CancelToken;
use std::sync::Arc;
use std::time::Duration as StdDuration;

fn setup() -> (Arc<ProfileStore>, i64) {
    let store = Arc::new(ProfileStore::in_memory().unwrap());
    store.migrate().unwrap();
    let ctx = CancelToken::new();
    let user_id = store
        .create_user(&ctx, "Asha", "asha@example.com", "hash", Utc::now())
        .unwrap();
    (store, user_id)
}

fn analysis(decision: Decision) -> AnalysisResult {
    AnalysisResult {
        decision,
        final_risk_score: 10,
        raw_risk_score: 10.0,
        profile_confidence: 0.0,
        triggered_factors: Vec::new(),
        amount_risk: 0.0,
        frequency_risk: 0.0,
        mode_risk: 0.0,
        time_risk: 0.0,
    }
}

fn insert(
    store: &ProfileStore,
    user_id: i64,
    amount: f64,
    mode: &str,
    decision: Decision,
    created_at: DateTime<Utc>,
) {
    let ctx = CancelToken::new();
    let txn = TxnInput {
        amount,
        mode: Mode::from(mode.to_string()),
        created_at,
    };
    store
        .insert_transaction(&ctx, user_id, &txn, &analysis(decision))
        .unwrap();
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
}

// ── Projection ───────────────────────────────────────────────────────────────

/// The rebuilt profile equals the pure projection of the committed log:
/// aggregates over ALLOW/FLAG rows only, counters over everything.
#[test]
fn upsert_equals_log_projection() {
    let (store, user_id) = setup();
    let ctx = CancelToken::new();

    insert(&store, user_id, 100.0, "UPI", Decision::Allow, at(10, 9));
    insert(&store, user_id, 200.0, "CARD", Decision::Flag, at(11, 14));
    insert(&store, user_id, 300.0, "UPI", Decision::Allow, at(12, 20));
    insert(&store, user_id, 5000.0, "CRYPTO", Decision::MfaRequired, at(12, 22));
    insert(&store, user_id, 10000.0, "CRYPTO", Decision::Block, at(12, 23));

    store.upsert_profile_incremental(&ctx, user_id).unwrap();
    let profile = store.get_profile(&ctx, user_id).unwrap().unwrap();

    assert_eq!(profile.total_transactions, 5);
    assert_eq!(profile.allowed_transactions, 3);
    assert_eq!(profile.avg_amount, Some(200.0));
    assert_eq!(profile.max_amount_seen, Some(300.0));
    // Population stddev of {100, 200, 300}.
    let stddev = profile.stddev_amount.unwrap();
    assert!((stddev - 81.64965809).abs() < 1e-6, "stddev {stddev}");
    // 3 allowed rows across 3 calendar days.
    assert_eq!(profile.avg_txns_per_day, Some(1.0));
    // MFA/BLOCK rows register neither modes nor hours.
    assert_eq!(profile.registered_modes, vec![Mode::Upi, Mode::Card]);
    assert_eq!(profile.usual_start_hour, Some(9));
    assert_eq!(profile.usual_end_hour, Some(20));

    // Invariants.
    assert!(profile.allowed_transactions <= profile.total_transactions);
    assert!(profile.max_amount_seen.unwrap() >= profile.avg_amount.unwrap());
}

/// With no allowed rows every aggregate stays unknown; sentinel zeros
/// never appear.
#[test]
fn blocked_only_history_keeps_aggregates_unknown() {
    let (store, user_id) = setup();
    let ctx = CancelToken::new();

    insert(&store, user_id, 9000.0, "UPI", Decision::Block, at(10, 2));
    insert(&store, user_id, 8000.0, "UPI", Decision::MfaRequired, at(10, 3));

    store.upsert_profile_incremental(&ctx, user_id).unwrap();
    let profile = store.get_profile(&ctx, user_id).unwrap().unwrap();

    assert_eq!(profile.total_transactions, 2);
    assert_eq!(profile.allowed_transactions, 0);
    assert_eq!(profile.avg_amount, None);
    assert_eq!(profile.stddev_amount, None);
    assert_eq!(profile.max_amount_seen, None);
    assert_eq!(profile.avg_txns_per_day, None);
    assert!(profile.registered_modes.is_empty());
    assert_eq!(profile.usual_start_hour, None);
    assert_eq!(profile.usual_end_hour, None);
}

/// Repeated upserts track the log as it grows.
#[test]
fn upsert_observes_all_committed_rows() {
    let (store, user_id) = setup();
    let ctx = CancelToken::new();

    insert(&store, user_id, 100.0, "UPI", Decision::Allow, at(10, 9));
    store.upsert_profile_incremental(&ctx, user_id).unwrap();
    let first = store.get_profile(&ctx, user_id).unwrap().unwrap();
    assert_eq!(first.total_transactions, 1);
    assert_eq!(first.stddev_amount, Some(0.0));

    insert(&store, user_id, 300.0, "CARD", Decision::Allow, at(10, 10));
    store.upsert_profile_incremental(&ctx, user_id).unwrap();
    let second = store.get_profile(&ctx, user_id).unwrap().unwrap();
    assert_eq!(second.total_transactions, 2);
    assert_eq!(second.avg_amount, Some(200.0));
    assert_eq!(second.stddev_amount, Some(100.0));
}

/// Raw out-of-enum mode strings survive the round trip through the log
/// into the profile's registered set.
#[test]
fn unknown_modes_are_stored_verbatim() {
    let (store, user_id) = setup();
    let ctx = CancelToken::new();

    insert(&store, user_id, 100.0, "CRYPTO", Decision::Allow, at(10, 9));
    store.upsert_profile_incremental(&ctx, user_id).unwrap();

    let profile = store.get_profile(&ctx, user_id).unwrap().unwrap();
    assert_eq!(
        profile.registered_modes,
        vec![Mode::Other("CRYPTO".to_string())]
    );
}

// ── Rebuild all ──────────────────────────────────────────────────────────────

#[test]
fn rebuild_all_covers_every_user() {
    let (store, first) = setup();
    let ctx = CancelToken::new();
    let second = store
        .create_user(&ctx, "Noor", "noor@example.com", "hash", Utc::now())
        .unwrap();

    insert(&store, first, 100.0, "UPI", Decision::Allow, at(10, 9));
    insert(&store, second, 900.0, "CARD", Decision::Allow, at(10, 12));

    let rebuilt = store.rebuild_all_profiles(&ctx).unwrap();
    assert_eq!(rebuilt, 2);

    assert_eq!(
        store.get_profile(&ctx, first).unwrap().unwrap().avg_amount,
        Some(100.0)
    );
    assert_eq!(
        store.get_profile(&ctx, second).unwrap().unwrap().avg_amount,
        Some(900.0)
    );
}

// ── Overlap guard and shutdown ───────────────────────────────────────────────

#[test]
fn guard_rejects_overlapping_rebuilds() {
    let guard = RebuildGuard::new();

    let permit = guard.begin().expect("slot should be free");
    assert!(guard.begin().is_none(), "second rebuild must be skipped");
    drop(permit);
    assert!(guard.begin().is_some(), "slot frees up after the permit drops");
}

#[test]
fn wait_idle_drains_an_in_flight_rebuild() {
    let guard = Arc::new(RebuildGuard::new());

    let worker = Arc::clone(&guard);
    let handle = std::thread::spawn(move || {
        let _permit = worker.begin().unwrap();
        std::thread::sleep(StdDuration::from_millis(100));
    });

    // Give the worker time to claim the slot.
    std::thread::sleep(StdDuration::from_millis(20));
    assert!(!guard.wait_idle(StdDuration::from_millis(1)), "still busy");
    assert!(guard.wait_idle(StdDuration::from_secs(5)), "drains on release");
    handle.join().unwrap();
}

#[test]
fn manual_rebuild_runs_and_respects_the_guard() {
    let (store, user_id) = setup();
    let ctx = CancelToken::new();
    insert(&store, user_id, 100.0, "UPI", Decision::Allow, at(10, 9));

    let rebuilder = NightlyRebuilder::start(
        Arc::clone(&store),
        Arc::new(SystemClock),
        &EngineConfig::default(),
    );

    assert!(rebuilder.rebuild_now());
    assert!(store.get_profile(&ctx, user_id).unwrap().is_some());

    // A held permit makes the next run a skip.
    let permit = rebuilder.guard().begin().unwrap();
    assert!(!rebuilder.rebuild_now());
    drop(permit);

    rebuilder.shutdown();
}

/// Shutdown returns promptly when the scheduler is just sleeping.
#[test]
fn shutdown_wakes_the_sleeping_scheduler() {
    let (store, _user_id) = setup();
    let rebuilder = NightlyRebuilder::start(
        store,
        Arc::new(SystemClock),
        &EngineConfig::default(),
    );

    let started = std::time::Instant::now();
    rebuilder.shutdown();
    assert!(started.elapsed() < StdDuration::from_secs(5));
}
