//! Engine tunables.
//!
//! Defaults are the production values; a JSON file can override them for
//! experiments. Factor weights must sum to 1.0; `load` rejects configs
//! that break that.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FactorWeights {
    pub amount:    f64,
    pub frequency: f64,
    pub mode:      f64,
    pub time:      f64,
}

impl FactorWeights {
    pub fn sum(&self) -> f64 {
        self.amount + self.frequency + self.mode + self.time
    }
}

/// Per-factor trigger thresholds. A factor is reported as triggered when
/// its sub-score strictly exceeds the threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TriggerThresholds {
    pub amount:    f64,
    pub frequency: f64,
    pub mode:      f64,
    pub time:      f64,
}

/// Decision cut-offs on the dampened final score.
///
/// Cold profiles (fewer than `min_profiling_txns` transactions) use a
/// separate, more permissive table that never emits BLOCK.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecisionThresholds {
    pub warm_allow: f64,
    pub warm_flag:  f64,
    pub warm_mfa:   f64,
    pub cold_allow: f64,
    pub cold_flag:  f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub weights:   FactorWeights,
    pub triggers:  TriggerThresholds,
    pub decisions: DecisionThresholds,

    /// Transactions needed before a profile is trusted for Z-score paths.
    pub min_profiling_txns: i64,

    /// Window for the recent-transaction count feeding the frequency scorer.
    pub frequency_window_secs: i64,

    /// Bulk ingestion: profile flush interval, in successfully persisted rows.
    pub bulk_batch_size: usize,

    /// Bulk ingestion: consecutive persistence failures before the job is
    /// declared FAILED.
    pub bulk_failure_limit: u32,

    /// Lifetime of a BulkJob record in the cache.
    pub job_ttl_secs: i64,

    /// Nightly rebuild fires at 00:00 local to this offset from UTC.
    pub timezone_offset_mins: i64,

    /// How long shutdown waits for an in-flight rebuild before abandoning it.
    pub drain_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weights: FactorWeights {
                amount:    0.40,
                frequency: 0.30,
                mode:      0.20,
                time:      0.10,
            },
            triggers: TriggerThresholds {
                amount:    30.0,
                frequency: 40.0,
                mode:      50.0,
                time:      35.0,
            },
            decisions: DecisionThresholds {
                warm_allow: 30.0,
                warm_flag:  60.0,
                warm_mfa:   80.0,
                cold_allow: 60.0,
                cold_flag:  75.0,
            },
            min_profiling_txns:    5,
            frequency_window_secs: 3600,
            bulk_batch_size:       50,
            bulk_failure_limit:    10,
            job_ttl_secs:          24 * 3600,
            timezone_offset_mins:  0,
            drain_timeout_secs:    30,
        }
    }
}

impl EngineConfig {
    /// Load overrides from a JSON file. Missing fields keep their defaults.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if (self.weights.sum() - 1.0).abs() > 1e-9 {
            anyhow::bail!("factor weights must sum to 1.0, got {}", self.weights.sum());
        }
        if self.bulk_batch_size == 0 {
            anyhow::bail!("bulk_batch_size must be positive");
        }
        if self.bulk_failure_limit == 0 {
            anyhow::bail!("bulk_failure_limit must be positive");
        }
        Ok(())
    }
}
