//! Bulk-ingestion job records.
//!
//! A job lives in the cache as a `bulk_txn_job:<id>` hash with counter
//! fields, TTL'd so abandoned jobs disappear on their own. State machine:
//! PENDING → RUNNING → (COMPLETED | FAILED); PENDING → FAILED is allowed
//! only for failures before row processing begins (bad header, unreadable
//! file).

use crate::{
    cache::CacheStore,
    cancel::CancelToken,
    error::{EngineError, EngineResult},
    types::{JobId, UserId},
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

const JOB_KEY_PREFIX: &str = "bulk_txn_job:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Writer handle for one job's cache record.
#[derive(Clone)]
pub struct JobHandle {
    cache:  Arc<CacheStore>,
    job_id: JobId,
    key:    String,
}

impl JobHandle {
    /// Create the PENDING record with zeroed counters and the job TTL.
    pub fn create(
        cache: Arc<CacheStore>,
        ctx: &CancelToken,
        job_id: JobId,
        user_id: UserId,
        total: i64,
        ttl: Duration,
    ) -> EngineResult<Self> {
        let key = format!("{JOB_KEY_PREFIX}{job_id}");
        cache.hset(
            ctx,
            &key,
            &[
                ("user_id", user_id.to_string()),
                ("status", JobStatus::Pending.to_string()),
                ("total", total.to_string()),
                ("processed", "0".to_string()),
                ("success", "0".to_string()),
                ("failed", "0".to_string()),
            ],
        )?;
        cache.expire(ctx, &key, ttl)?;
        Ok(Self { cache, job_id, key })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn set_status(&self, ctx: &CancelToken, status: JobStatus) -> EngineResult<()> {
        self.cache
            .hset(ctx, &self.key, &[("status", status.to_string())])
    }

    pub fn incr(&self, ctx: &CancelToken, field: &str, delta: i64) -> EngineResult<()> {
        self.cache.hincr_by(ctx, &self.key, field, delta)?;
        Ok(())
    }
}

// ── Progress reporting ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressCounters {
    pub total:     i64,
    pub processed: i64,
    pub success:   i64,
    pub failed:    i64,
    pub percent:   i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id:   JobId,
    pub status:   JobStatus,
    pub progress: ProgressCounters,
}

pub fn progress_percent(processed: i64, total: i64) -> i64 {
    if total <= 0 {
        return 0;
    }
    processed * 100 / total
}

/// Snapshot a job's progress from the cache. `NotFound` once the record
/// has expired or never existed.
pub fn job_progress(
    cache: &CacheStore,
    ctx: &CancelToken,
    job_id: &str,
) -> EngineResult<JobProgress> {
    let key = format!("{JOB_KEY_PREFIX}{job_id}");
    let fields = cache
        .hget_all(ctx, &key)?
        .ok_or(EngineError::NotFound { what: "bulk job" })?;

    let counter = |name: &str| -> i64 {
        fields
            .get(name)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0)
    };
    let status = fields
        .get("status")
        .and_then(|raw| raw.parse::<JobStatus>().ok())
        .ok_or(EngineError::NotFound { what: "bulk job" })?;

    let (total, processed) = (counter("total"), counter("processed"));
    Ok(JobProgress {
        job_id: job_id.to_string(),
        status,
        progress: ProgressCounters {
            total,
            processed,
            success: counter("success"),
            failed: counter("failed"),
            percent: progress_percent(processed, total),
        },
    })
}
