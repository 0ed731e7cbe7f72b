//! Risk factor scorers and the aggregate decision.
//!
//! Four pure scorers (amount, frequency, mode, time) each map a candidate
//! transaction plus a profile snapshot to a risk in [0,100]. The
//! aggregator combines them with fixed weights, dampens by profile
//! confidence, derives the triggered-factor set, and maps the final score
//! to a decision. Nothing here blocks or mutates; callers own the
//! profile snapshot and the recent-transaction count.

use crate::config::EngineConfig;
use crate::profile::{BehaviorProfile, Decision, Mode, TriggerFactor};
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

/// Cold profile, nothing known about amounts.
const COLD_AMOUNT_RISK: f64 = 30.0;
/// Cold profile, at or below the largest amount seen so far.
const COLD_BELOW_MAX_RISK: f64 = 10.0;
/// Cold profile, above the largest amount seen: 20 + 30 per ratio step.
const COLD_OVER_MAX_BASE: f64 = 20.0;
const COLD_OVER_MAX_SLOPE: f64 = 30.0;

/// Warm profile: risk climbs 25 per standard deviation past the first.
const Z_SCORE_SLOPE: f64 = 25.0;
/// Degenerate stddev=0 profile: any amount above the average.
const EXACT_PROFILE_OVER_RISK: f64 = 100.0;
/// Degenerate stddev=0 profile: any amount below the average.
const EXACT_PROFILE_UNDER_RISK: f64 = 20.0;

/// Transactions free of frequency risk within the window (candidate included).
const FREQ_FREE_TXNS: i64 = 3;
const FREQ_RISK_PER_TXN: f64 = 20.0;

/// New payment mode: base risk, reduced by confidence, never below the floor.
const NEW_MODE_BASE_RISK: f64 = 60.0;
const NEW_MODE_FLOOR: f64 = 20.0;
const NEW_MODE_CONFIDENCE_CUT: f64 = 0.3;

/// Heuristic time risk when no usual band is known.
const NIGHT_HEURISTIC_RISK: f64 = 35.0;
const EARLY_MORNING_RISK: f64 = 20.0;
const DAYTIME_RISK: f64 = 5.0;
/// Outside a known band: 10 per hour past the band, +15 deep at night.
const HOURS_OUTSIDE_SLOPE: f64 = 10.0;
const NIGHT_SURCHARGE: f64 = 15.0;

/// Dampening never cuts more than half, and never below 10% of raw.
const DAMPENING_FLOOR: f64 = 0.5;
const RAW_RISK_FLOOR_RATIO: f64 = 0.1;

// ── Inputs and result ────────────────────────────────────────────────────────

/// The candidate transaction, as seen by the scorers.
#[derive(Debug, Clone)]
pub struct TxnInput {
    pub amount:     f64,
    pub mode:       Mode,
    pub created_at: DateTime<Utc>,
}

/// Everything the analysis produced, sub-scores included for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub decision:           Decision,
    pub final_risk_score:   i32,
    pub raw_risk_score:     f64,
    pub profile_confidence: f64,
    pub triggered_factors:  Vec<TriggerFactor>,
    pub amount_risk:        f64,
    pub frequency_risk:     f64,
    pub mode_risk:          f64,
    pub time_risk:          f64,
}

// ── Factor scorers ───────────────────────────────────────────────────────────

/// Amount deviation risk in [0,100].
///
/// Cold profiles fall back to comparing against the largest amount seen;
/// warm profiles use the Z-score against (avg, stddev).
pub fn amount_deviation_risk(amount: f64, profile: &BehaviorProfile, config: &EngineConfig) -> f64 {
    let warm = !profile.is_cold(config.min_profiling_txns);
    match (warm, profile.avg_amount, profile.stddev_amount) {
        (true, Some(avg), Some(stddev)) => {
            if stddev == 0.0 {
                return if amount > avg {
                    EXACT_PROFILE_OVER_RISK
                } else if amount < avg {
                    EXACT_PROFILE_UNDER_RISK
                } else {
                    0.0
                };
            }
            let z = (amount - avg) / stddev;
            if z <= 1.0 {
                0.0
            } else {
                ((z - 1.0) * Z_SCORE_SLOPE).min(100.0)
            }
        }
        _ => match profile.max_amount_seen {
            None => COLD_AMOUNT_RISK,
            Some(max) if amount > max => {
                let ratio = amount / max;
                (COLD_OVER_MAX_BASE + (ratio - 1.0) * COLD_OVER_MAX_SLOPE).min(100.0)
            }
            Some(_) => COLD_BELOW_MAX_RISK,
        },
    }
}

/// Frequency spike risk in [0,100] from the count of transactions in the
/// last frequency window. The candidate itself is included: up to three
/// in-window transactions are free, each further one adds 20.
pub fn frequency_spike_risk(recent_count: i64) -> f64 {
    let n = recent_count + 1;
    if n <= FREQ_FREE_TXNS {
        return 0.0;
    }
    (((n - FREQ_FREE_TXNS) as f64) * FREQ_RISK_PER_TXN).min(100.0)
}

/// Mode deviation risk in [0,100]. A registered mode costs nothing; a new
/// one starts at 60 and is discounted for trusted users, floored at 20.
/// A user with no mode history yet has nothing to deviate from.
pub fn mode_deviation_risk(mode: &Mode, profile: &BehaviorProfile) -> f64 {
    if profile.registered_modes.is_empty() || profile.has_mode(mode) {
        return 0.0;
    }
    (NEW_MODE_BASE_RISK - NEW_MODE_CONFIDENCE_CUT * profile.confidence()).max(NEW_MODE_FLOOR)
}

/// Time anomaly risk in [0,100] from the transaction hour (UTC).
///
/// Without a usual band the deep-night heuristic applies. With one, risk
/// grows with the hours elapsed since the band endpoint was last passed
/// (forward distance mod 24, minimized over both endpoints), plus a
/// deep-night surcharge.
pub fn time_anomaly_risk(created_at: DateTime<Utc>, profile: &BehaviorProfile) -> f64 {
    let hour = created_at.hour() as i64;

    let (start, end) = match (profile.usual_start_hour, profile.usual_end_hour) {
        (Some(s), Some(e)) => (s as i64, e as i64),
        _ => {
            return if hour < 5 {
                NIGHT_HEURISTIC_RISK
            } else if hour < 7 {
                EARLY_MORNING_RISK
            } else {
                DAYTIME_RISK
            };
        }
    };

    // Band may wrap past midnight (start > end means a nocturnal band).
    let within = if start <= end {
        hour >= start && hour <= end
    } else {
        hour >= start || hour <= end
    };
    if within {
        return 0.0;
    }

    let since_start = (hour - start).rem_euclid(24);
    let since_end = (hour - end).rem_euclid(24);
    let hours_outside = since_start.min(since_end) as f64;

    let mut risk = hours_outside * HOURS_OUTSIDE_SLOPE;
    if hour < 4 {
        risk += NIGHT_SURCHARGE;
    }
    risk.min(100.0)
}

// ── Aggregation ──────────────────────────────────────────────────────────────

/// Weighted sum of the four sub-scores, capped at 100.
pub fn aggregate_risk(amount: f64, frequency: f64, mode: f64, time: f64, config: &EngineConfig) -> f64 {
    let w = &config.weights;
    (amount * w.amount + frequency * w.frequency + mode * w.mode + time * w.time).min(100.0)
}

/// Reduce the raw score for users with an established good history.
/// A fully trusted user gets half the raw risk; the dampened score never
/// drops below 10% of raw.
pub fn dampen_risk(raw: f64, confidence: f64) -> f64 {
    let factor = (1.0 - confidence / 200.0).max(DAMPENING_FLOOR);
    (raw * factor).max(raw * RAW_RISK_FLOOR_RATIO)
}

fn triggered_factors(
    amount: f64,
    frequency: f64,
    mode: f64,
    time: f64,
    config: &EngineConfig,
) -> Vec<TriggerFactor> {
    let t = &config.triggers;
    let mut triggered = Vec::new();
    if amount > t.amount {
        triggered.push(TriggerFactor::AmountDeviation);
    }
    if frequency > t.frequency {
        triggered.push(TriggerFactor::FrequencySpike);
    }
    if mode > t.mode {
        triggered.push(TriggerFactor::NewMode);
    }
    if time > t.time {
        triggered.push(TriggerFactor::TimeAnomaly);
    }
    triggered
}

/// Map the dampened score to a decision. Cold profiles use a permissive
/// table that never blocks outright.
pub fn decide(final_risk: f64, profile: &BehaviorProfile, config: &EngineConfig) -> Decision {
    let d = &config.decisions;
    if profile.is_cold(config.min_profiling_txns) {
        return if final_risk < d.cold_allow {
            Decision::Allow
        } else if final_risk < d.cold_flag {
            Decision::Flag
        } else {
            Decision::MfaRequired
        };
    }

    if final_risk < d.warm_allow {
        Decision::Allow
    } else if final_risk < d.warm_flag {
        Decision::Flag
    } else if final_risk < d.warm_mfa {
        Decision::MfaRequired
    } else {
        Decision::Block
    }
}

/// Full analysis of one candidate transaction against a profile snapshot.
/// Deterministic in its inputs; never fails.
pub fn analyze(
    txn: &TxnInput,
    profile: &BehaviorProfile,
    recent_count: i64,
    config: &EngineConfig,
) -> AnalysisResult {
    let amount_risk = amount_deviation_risk(txn.amount, profile, config);
    let frequency_risk = frequency_spike_risk(recent_count);
    let mode_risk = mode_deviation_risk(&txn.mode, profile);
    let time_risk = time_anomaly_risk(txn.created_at, profile);

    let raw = aggregate_risk(amount_risk, frequency_risk, mode_risk, time_risk, config);
    let confidence = profile.confidence();
    let final_risk = dampen_risk(raw, confidence);

    AnalysisResult {
        decision: decide(final_risk, profile, config),
        // Truncation toward zero, not rounding.
        final_risk_score: final_risk as i32,
        raw_risk_score: raw,
        profile_confidence: confidence,
        triggered_factors: triggered_factors(amount_risk, frequency_risk, mode_risk, time_risk, config),
        amount_risk,
        frequency_risk,
        mode_risk,
        time_risk,
    }
}
