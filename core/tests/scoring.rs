//! Scorer and aggregator tests: ranges, boundaries, and the worked
//! end-to-end scoring scenarios.

use chrono::{TimeZone, Utc};
use fraudlite_core::config::EngineConfig;
use fraudlite_core::profile::{BehaviorProfile, Decision, Mode, TriggerFactor};
use fraudlite_core::scoring::{
    self, amount_deviation_risk, dampen_risk, frequency_spike_risk, mode_deviation_risk,
    time_anomaly_risk, TxnInput,
};

fn at_hour(hour: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 15, hour, 0, 0).unwrap()
}

fn cold_profile() -> BehaviorProfile {
    BehaviorProfile::cold(1, at_hour(10))
}

/// Warm profile with a full-confidence history: 50 allowed UPI
/// transactions averaging 500, usual hours 9–18.
fn warm_profile(stddev: f64) -> BehaviorProfile {
    BehaviorProfile {
        user_id: 1,
        avg_amount: Some(500.0),
        stddev_amount: Some(stddev),
        max_amount_seen: Some(900.0),
        avg_txns_per_day: Some(3.0),
        registered_modes: vec![Mode::Upi],
        usual_start_hour: Some(9),
        usual_end_hour: Some(18),
        total_transactions: 50,
        allowed_transactions: 50,
        updated_at: at_hour(10),
    }
}

// ── Worked scenarios ─────────────────────────────────────────────────────────

/// Cold start, no profile at all: amount 500 over UPI at 10:00.
#[test]
fn cold_start_upi_500() {
    let config = EngineConfig::default();
    let txn = TxnInput {
        amount: 500.0,
        mode: Mode::Upi,
        created_at: at_hour(10),
    };
    let result = scoring::analyze(&txn, &cold_profile(), 0, &config);

    assert_eq!(result.amount_risk, 30.0);
    assert_eq!(result.frequency_risk, 0.0);
    assert_eq!(result.mode_risk, 0.0);
    assert_eq!(result.time_risk, 5.0);
    assert_eq!(result.raw_risk_score, 12.5);
    assert_eq!(result.profile_confidence, 0.0);
    assert_eq!(result.final_risk_score, 12);
    assert_eq!(result.decision, Decision::Allow);
    // 30 is not strictly greater than the 30 threshold.
    assert!(result.triggered_factors.is_empty());
}

/// New mode on a fully trusted profile: confidence halves the penalty.
#[test]
fn new_mode_on_warm_profile() {
    let config = EngineConfig::default();
    let txn = TxnInput {
        amount: 520.0,
        mode: Mode::Other("CRYPTO".to_string()),
        created_at: at_hour(12),
    };
    let result = scoring::analyze(&txn, &warm_profile(50.0), 0, &config);

    assert_eq!(result.amount_risk, 0.0); // z = 0.4
    assert_eq!(result.mode_risk, 30.0); // max(20, 60 - 30)
    assert_eq!(result.time_risk, 0.0);
    assert_eq!(result.raw_risk_score, 6.0);
    assert_eq!(result.final_risk_score, 3);
    assert_eq!(result.decision, Decision::Allow);
    assert!(result.triggered_factors.is_empty()); // 30 not > 50
}

/// Five recent transactions plus the candidate: frequency spike fires.
#[test]
fn frequency_spike() {
    let config = EngineConfig::default();
    let txn = TxnInput {
        amount: 500.0,
        mode: Mode::Upi,
        created_at: at_hour(12),
    };
    let result = scoring::analyze(&txn, &warm_profile(50.0), 5, &config);

    assert_eq!(result.frequency_risk, 60.0);
    assert_eq!(result.amount_risk, 0.0);
    assert_eq!(result.mode_risk, 0.0);
    assert_eq!(result.time_risk, 0.0);
    assert_eq!(result.raw_risk_score, 18.0);
    assert_eq!(result.final_risk_score, 9);
    assert_eq!(result.triggered_factors, vec![TriggerFactor::FrequencySpike]);
}

/// High amount + nocturnal hour + unknown mode, all at once.
#[test]
fn high_amount_nocturnal_new_mode() {
    let config = EngineConfig::default();
    let txn = TxnInput {
        amount: 5000.0,
        mode: Mode::Other("CRYPTO".to_string()),
        created_at: at_hour(2),
    };
    let result = scoring::analyze(&txn, &warm_profile(100.0), 0, &config);

    assert_eq!(result.amount_risk, 100.0); // z = 45
    assert_eq!(result.frequency_risk, 0.0);
    assert_eq!(result.mode_risk, 30.0);
    assert_eq!(result.time_risk, 95.0); // 8h past band end, +15 at night
    assert_eq!(result.raw_risk_score, 55.5);
    assert_eq!(result.final_risk_score, 27);
    assert_eq!(
        result.triggered_factors,
        vec![
            TriggerFactor::AmountDeviation,
            TriggerFactor::NewMode,
            TriggerFactor::TimeAnomaly,
        ]
    );
    // 27 sits below the warm ALLOW cut-off after dampening.
    assert_eq!(result.decision, Decision::Allow);
}

// ── Amount boundaries ────────────────────────────────────────────────────────

#[test]
fn amount_cold_over_max_scales_with_ratio() {
    let config = EngineConfig::default();
    let mut profile = cold_profile();
    profile.max_amount_seen = Some(1000.0);

    assert_eq!(amount_deviation_risk(500.0, &profile, &config), 10.0);
    assert_eq!(amount_deviation_risk(1000.0, &profile, &config), 10.0);
    // 2x the max seen: 20 + 30·(2 − 1)
    assert_eq!(amount_deviation_risk(2000.0, &profile, &config), 50.0);
    // Far past the max: capped.
    assert_eq!(amount_deviation_risk(1_000_000.0, &profile, &config), 100.0);
}

#[test]
fn amount_degenerate_stddev_splits_on_exact_match() {
    let config = EngineConfig::default();
    let profile = warm_profile(0.0);

    assert_eq!(amount_deviation_risk(500.0, &profile, &config), 0.0);
    assert_eq!(amount_deviation_risk(500.01, &profile, &config), 100.0);
    assert_eq!(amount_deviation_risk(499.99, &profile, &config), 20.0);
}

#[test]
fn amount_z_score_slope() {
    let config = EngineConfig::default();
    let profile = warm_profile(100.0);

    // Within one standard deviation: free.
    assert_eq!(amount_deviation_risk(600.0, &profile, &config), 0.0);
    // z = 2 ⇒ 25.
    assert_eq!(amount_deviation_risk(700.0, &profile, &config), 25.0);
    // z = 5 ⇒ 100.
    assert_eq!(amount_deviation_risk(1000.0, &profile, &config), 100.0);
}

// ── Frequency boundaries ─────────────────────────────────────────────────────

#[test]
fn frequency_first_three_are_free() {
    assert_eq!(frequency_spike_risk(0), 0.0);
    assert_eq!(frequency_spike_risk(1), 0.0); // n = 2
    assert_eq!(frequency_spike_risk(2), 0.0); // n = 3
    assert_eq!(frequency_spike_risk(3), 20.0); // n = 4
    assert_eq!(frequency_spike_risk(7), 100.0); // n = 8, capped
    assert_eq!(frequency_spike_risk(100), 100.0);
}

// ── Mode boundaries ──────────────────────────────────────────────────────────

#[test]
fn mode_risk_discounted_by_confidence() {
    let unknown = Mode::Other("CRYPTO".to_string());

    let mut profile = warm_profile(50.0);
    assert_eq!(mode_deviation_risk(&Mode::Upi, &profile), 0.0);
    assert_eq!(mode_deviation_risk(&unknown, &profile), 30.0);

    profile.allowed_transactions = 25; // confidence 50
    assert_eq!(mode_deviation_risk(&unknown, &profile), 45.0);

    profile.allowed_transactions = 1; // confidence 2
    assert_eq!(mode_deviation_risk(&unknown, &profile), 59.4);
}

#[test]
fn first_ever_mode_carries_no_risk() {
    let profile = cold_profile();
    assert_eq!(mode_deviation_risk(&Mode::Upi, &profile), 0.0);
    assert_eq!(
        mode_deviation_risk(&Mode::Other("CRYPTO".to_string()), &profile),
        0.0
    );
}

// ── Time boundaries ──────────────────────────────────────────────────────────

#[test]
fn time_heuristic_hour_bands() {
    let profile = cold_profile();
    assert_eq!(time_anomaly_risk(at_hour(0), &profile), 35.0);
    assert_eq!(time_anomaly_risk(at_hour(4), &profile), 35.0);
    assert_eq!(time_anomaly_risk(at_hour(5), &profile), 20.0);
    assert_eq!(time_anomaly_risk(at_hour(6), &profile), 20.0);
    assert_eq!(time_anomaly_risk(at_hour(7), &profile), 5.0);
    assert_eq!(time_anomaly_risk(at_hour(23), &profile), 5.0);
}

#[test]
fn time_inside_band_is_free() {
    let profile = warm_profile(50.0);
    assert_eq!(time_anomaly_risk(at_hour(9), &profile), 0.0);
    assert_eq!(time_anomaly_risk(at_hour(12), &profile), 0.0);
    assert_eq!(time_anomaly_risk(at_hour(18), &profile), 0.0);
    // One hour past the band end.
    assert_eq!(time_anomaly_risk(at_hour(19), &profile), 10.0);
}

#[test]
fn time_wrapping_band() {
    // Nocturnal band 22:00 – 03:00.
    let mut profile = warm_profile(50.0);
    profile.usual_start_hour = Some(22);
    profile.usual_end_hour = Some(3);

    assert_eq!(time_anomaly_risk(at_hour(23), &profile), 0.0);
    assert_eq!(time_anomaly_risk(at_hour(1), &profile), 0.0);
    assert_eq!(time_anomaly_risk(at_hour(3), &profile), 0.0);
    // 12:00 is 9 hours past the band end.
    assert_eq!(time_anomaly_risk(at_hour(12), &profile), 90.0);
}

// ── Bounds and monotonicity ──────────────────────────────────────────────────

/// Scorers stay in [0,100] across a broad grid of inputs.
#[test]
fn scorers_bounded() {
    let config = EngineConfig::default();
    let amounts = [0.01, 1.0, 499.0, 500.0, 501.0, 5000.0, 1e9, 1e13];
    let profiles = [
        cold_profile(),
        warm_profile(0.0),
        warm_profile(1.0),
        warm_profile(500.0),
    ];

    for profile in &profiles {
        for &amount in &amounts {
            let risk = amount_deviation_risk(amount, profile, &config);
            assert!((0.0..=100.0).contains(&risk), "amount risk {risk}");
        }
        for hour in 0..24 {
            let risk = time_anomaly_risk(at_hour(hour), profile);
            assert!((0.0..=100.0).contains(&risk), "time risk {risk}");
        }
        for recent in 0..50 {
            let risk = frequency_spike_risk(recent);
            assert!((0.0..=100.0).contains(&risk), "frequency risk {risk}");
        }
    }
}

/// raw ≤ 100, 0.1·raw ≤ final ≤ raw, across confidence levels.
#[test]
fn dampening_bounds() {
    for raw in [0.0, 1.0, 12.5, 55.5, 99.0, 100.0] {
        for allowed in [0i64, 1, 10, 25, 50, 500] {
            let confidence = (allowed as f64 * 2.0).min(100.0);
            let dampened = dampen_risk(raw, confidence);
            assert!(dampened <= raw + 1e-12);
            assert!(dampened >= raw * 0.1 - 1e-12);
        }
    }
}

/// Decision severity never decreases as the final score climbs, in
/// either regime.
#[test]
fn decision_monotone_in_final_risk() {
    let config = EngineConfig::default();
    let rank = |d: Decision| match d {
        Decision::Allow => 0,
        Decision::Flag => 1,
        Decision::MfaRequired => 2,
        Decision::Block => 3,
    };

    for profile in [cold_profile(), warm_profile(50.0)] {
        let mut prev = 0;
        for tenth in 0..=1000 {
            let score = tenth as f64 / 10.0;
            let current = rank(scoring::decide(score, &profile, &config));
            assert!(current >= prev, "decision regressed at score {score}");
            prev = current;
        }
    }
}

/// Cold profiles never see BLOCK, whatever the score.
#[test]
fn cold_profiles_never_block() {
    let config = EngineConfig::default();
    let profile = cold_profile();
    for tenth in 0..=1000 {
        let decision = scoring::decide(tenth as f64 / 10.0, &profile, &config);
        assert_ne!(decision, Decision::Block);
    }
}

/// A registered mode can never put NEW_MODE into the triggered set.
#[test]
fn registered_mode_never_triggers() {
    let config = EngineConfig::default();
    let profile = warm_profile(50.0);
    for hour in 0..24 {
        for recent in [0, 5, 20] {
            let txn = TxnInput {
                amount: 50_000.0,
                mode: Mode::Upi,
                created_at: at_hour(hour),
            };
            let result = scoring::analyze(&txn, &profile, recent, &config);
            assert!(!result.triggered_factors.contains(&TriggerFactor::NewMode));
        }
    }
}

/// Wire serialization uses the exact published constant strings.
#[test]
fn enum_wire_strings() {
    assert_eq!(
        serde_json::to_string(&Decision::MfaRequired).unwrap(),
        "\"MFA_REQUIRED\""
    );
    assert_eq!(
        serde_json::to_string(&TriggerFactor::AmountDeviation).unwrap(),
        "\"AMOUNT_DEVIATION\""
    );
    assert_eq!(serde_json::to_string(&Mode::Upi).unwrap(), "\"UPI\"");
    assert_eq!(
        serde_json::to_string(&Mode::Other("CRYPTO".to_string())).unwrap(),
        "\"CRYPTO\""
    );
    let parsed: Mode = serde_json::from_str("\"NETBANKING\"").unwrap();
    assert_eq!(parsed, Mode::Netbanking);
}
