//! Payer behavior profiles and the transaction-facing enums.
//!
//! A profile summarizes one user's history: spending aggregates, payment
//! modes seen, the usual hour band, and the total/allowed counters that
//! drive profile confidence. Aggregate fields are `Option`: a profile
//! with no allowed transactions has no averages, and a legitimate 0.0
//! average is distinct from "unknown".

use crate::types::UserId;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── Payment mode ─────────────────────────────────────────────────────────────

/// Payment mode of a transaction. Anything outside the three supported
/// rails is carried verbatim so the scorer can treat it as a new mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Mode {
    Upi,
    Card,
    Netbanking,
    Other(String),
}

impl Mode {
    pub fn as_str(&self) -> &str {
        match self {
            Mode::Upi => "UPI",
            Mode::Card => "CARD",
            Mode::Netbanking => "NETBANKING",
            Mode::Other(raw) => raw,
        }
    }

    /// True for the three rails a single-transaction request may use.
    pub fn is_supported(&self) -> bool {
        !matches!(self, Mode::Other(_))
    }
}

impl From<String> for Mode {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "UPI" => Mode::Upi,
            "CARD" => Mode::Card,
            "NETBANKING" => Mode::Netbanking,
            _ => Mode::Other(raw),
        }
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Decision ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    Flag,
    MfaRequired,
    Block,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "ALLOW",
            Decision::Flag => "FLAG",
            Decision::MfaRequired => "MFA_REQUIRED",
            Decision::Block => "BLOCK",
        }
    }

    /// ALLOW and FLAG count toward the profile's allowed aggregates.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow | Decision::Flag)
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ALLOW" => Ok(Decision::Allow),
            "FLAG" => Ok(Decision::Flag),
            "MFA_REQUIRED" => Ok(Decision::MfaRequired),
            "BLOCK" => Ok(Decision::Block),
            other => Err(format!("unknown decision: {other}")),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Triggered factors ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerFactor {
    AmountDeviation,
    FrequencySpike,
    NewMode,
    TimeAnomaly,
}

impl TriggerFactor {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerFactor::AmountDeviation => "AMOUNT_DEVIATION",
            TriggerFactor::FrequencySpike => "FREQUENCY_SPIKE",
            TriggerFactor::NewMode => "NEW_MODE",
            TriggerFactor::TimeAnomaly => "TIME_ANOMALY",
        }
    }
}

// ── Behavior profile ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorProfile {
    pub user_id:              UserId,
    pub avg_amount:           Option<f64>,
    pub stddev_amount:        Option<f64>,
    pub max_amount_seen:      Option<f64>,
    pub avg_txns_per_day:     Option<f64>,
    pub registered_modes:     Vec<Mode>,
    pub usual_start_hour:     Option<u32>,
    pub usual_end_hour:       Option<u32>,
    pub total_transactions:   i64,
    pub allowed_transactions: i64,
    pub updated_at:           DateTime<Utc>,
}

impl BehaviorProfile {
    /// Fresh profile for a user with no history. All aggregates unknown.
    pub fn cold(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            avg_amount: None,
            stddev_amount: None,
            max_amount_seen: None,
            avg_txns_per_day: None,
            registered_modes: Vec::new(),
            usual_start_hour: None,
            usual_end_hour: None,
            total_transactions: 0,
            allowed_transactions: 0,
            updated_at: now,
        }
    }

    /// A profile with too little history forces the heuristic scoring
    /// branches and the permissive decision table.
    pub fn is_cold(&self, min_profiling_txns: i64) -> bool {
        self.total_transactions < min_profiling_txns
    }

    /// Trustworthiness in [0,100]: 2 points per allowed transaction,
    /// saturating at 50 of them.
    pub fn confidence(&self) -> f64 {
        if self.allowed_transactions <= 0 {
            return 0.0;
        }
        (self.allowed_transactions as f64 * 2.0).min(100.0)
    }

    pub fn has_mode(&self, mode: &Mode) -> bool {
        self.registered_modes.contains(mode)
    }

    /// In-place evolution after a persisted, non-BLOCK transaction.
    ///
    /// Used by the bulk ingestor so scores depend on preceding rows within
    /// a job. The stddev and per-day aggregates are NOT maintained here;
    /// only the authoritative rebuild from the transaction log produces
    /// them.
    pub fn apply(&mut self, amount: f64, mode: &Mode, created_at: DateTime<Utc>, decision: Decision) {
        self.total_transactions += 1;

        if !decision.is_allowed() {
            return;
        }

        self.allowed_transactions += 1;

        let n = self.allowed_transactions as f64;
        self.avg_amount = Some(match self.avg_amount {
            None => amount,
            Some(prev) => (prev * (n - 1.0) + amount) / n,
        });

        if self.max_amount_seen.map_or(true, |max| amount > max) {
            self.max_amount_seen = Some(amount);
        }

        if !self.has_mode(mode) {
            self.registered_modes.push(mode.clone());
        }

        let hour = created_at.hour();
        if self.usual_start_hour.map_or(true, |start| hour < start) {
            self.usual_start_hour = Some(hour);
        }
        if self.usual_end_hour.map_or(true, |end| hour > end) {
            self.usual_end_hour = Some(hour);
        }

        self.updated_at = created_at;
    }
}
