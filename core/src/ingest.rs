//! Bulk transaction ingestion.
//!
//! Replays a tabular file (CSV or XLSX) through the scoring engine
//! against an evolving in-memory profile snapshot. Rows are isolated:
//! one bad row increments `failed` and the loop moves on. Every
//! `bulk_batch_size` persisted rows the profile is flushed to the store
//! and reloaded, which is when the log-derived aggregates (stddev,
//! per-day rate) become available to later rows. The in-memory snapshot
//! is an optimization, never authoritative; the per-batch and final
//! rebuilds reconcile from the transaction log.

use crate::{
    cache::CacheStore,
    cancel::CancelToken,
    clock::Clock,
    config::EngineConfig,
    error::{EngineError, EngineResult},
    jobs::{JobHandle, JobStatus},
    profile::{BehaviorProfile, Decision, Mode},
    scoring::{self, TxnInput},
    store::ProfileStore,
    types::{JobId, UserId},
};
use calamine::{Data, Reader, Xlsx};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Arc;
use std::thread::JoinHandle;
use uuid::Uuid;

/// Expected header row, in order, compared case-insensitively.
const EXPECTED_HEADERS: [&str; 3] = ["amount", "mode", "created_at"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id:    Option<JobId>,
    pub status:    JobStatus,
    pub processed: i64,
    pub success:   i64,
    pub failed:    i64,
}

/// A spawned asynchronous ingestion. The handle is only needed by callers
/// that want to await completion; dropping it detaches the job.
#[derive(Debug)]
pub struct SpawnedJob {
    pub job_id: JobId,
    pub handle: JoinHandle<()>,
}

// ── Row sources ──────────────────────────────────────────────────────────────

enum RowSource {
    Csv(csv::StringRecordsIntoIter<Cursor<Vec<u8>>>),
    Xlsx(std::vec::IntoIter<Vec<String>>),
}

impl RowSource {
    /// Detect the format from the file extension, open it, and validate
    /// the header row. Anything but `.csv`/`.xlsx` is rejected.
    fn open(filename: &str, data: &[u8]) -> EngineResult<Self> {
        let lower = filename.to_lowercase();
        if lower.ends_with(".csv") {
            let mut reader = csv::ReaderBuilder::new()
                .flexible(true)
                .trim(csv::Trim::All)
                .from_reader(Cursor::new(data.to_vec()));
            let headers: Vec<String> = reader
                .headers()
                .map_err(|e| EngineError::InvalidInput(format!("failed to read CSV header: {e}")))?
                .iter()
                .map(|h| h.to_string())
                .collect();
            validate_headers(&headers)?;
            Ok(RowSource::Csv(reader.into_records()))
        } else if lower.ends_with(".xlsx") {
            let mut workbook = Xlsx::new(Cursor::new(data.to_vec()))
                .map_err(|e| EngineError::InvalidInput(format!("failed to parse XLSX: {e}")))?;
            let range = workbook
                .worksheet_range_at(0)
                .ok_or_else(|| EngineError::InvalidInput("XLSX has no sheets".to_string()))?
                .map_err(|e| EngineError::InvalidInput(format!("failed to parse XLSX: {e}")))?;

            let mut rows = range.rows().map(|row| {
                row.iter().map(cell_to_string).collect::<Vec<String>>()
            });
            let headers = rows
                .next()
                .ok_or(EngineError::UnexpectedHeaders)?;
            validate_headers(&headers)?;
            Ok(RowSource::Xlsx(rows.collect::<Vec<_>>().into_iter()))
        } else {
            Err(EngineError::InvalidInput(format!(
                "unsupported file type: {filename}"
            )))
        }
    }

    fn next_row(&mut self) -> Option<EngineResult<Vec<String>>> {
        match self {
            RowSource::Csv(records) => records.next().map(|record| {
                record
                    .map(|r| r.iter().map(|field| field.to_string()).collect())
                    .map_err(|e| EngineError::InvalidInput(format!("bad CSV row: {e}")))
            }),
            RowSource::Xlsx(rows) => rows.next().map(Ok),
        }
    }

    /// Number of data rows, for the job's `total` counter.
    fn count_rows(filename: &str, data: &[u8]) -> EngineResult<i64> {
        let mut source = Self::open(filename, data)?;
        let mut count = 0;
        while source.next_row().is_some() {
            count += 1;
        }
        Ok(count)
    }
}

fn validate_headers(headers: &[String]) -> EngineResult<()> {
    if headers.len() != EXPECTED_HEADERS.len() {
        return Err(EngineError::UnexpectedHeaders);
    }
    for (got, want) in headers.iter().zip(EXPECTED_HEADERS) {
        if !got.trim().eq_ignore_ascii_case(want) {
            return Err(EngineError::UnexpectedHeaders);
        }
    }
    Ok(())
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}

/// amount, mode, created_at. Short rows and non-positive or unparsable
/// amounts are row-level failures; a bad timestamp falls back to `now`.
fn parse_row(record: &[String], now: DateTime<Utc>) -> Option<TxnInput> {
    if record.len() < 3 {
        return None;
    }
    let amount: f64 = record[0].trim().parse().ok()?;
    if amount <= 0.0 {
        return None;
    }
    let mode = Mode::from(record[1].trim().to_uppercase());
    let created_at = DateTime::parse_from_rfc3339(record[2].trim())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now);
    Some(TxnInput {
        amount,
        mode,
        created_at,
    })
}

// ── Ingestor ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct BulkIngestor {
    store:  Arc<ProfileStore>,
    cache:  Arc<CacheStore>,
    clock:  Arc<dyn Clock>,
    config: EngineConfig,
}

impl BulkIngestor {
    pub fn new(
        store: Arc<ProfileStore>,
        cache: Arc<CacheStore>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            config,
        }
    }

    /// Run the whole file on the calling thread and return the counts.
    pub fn process_sync(
        &self,
        ctx: &CancelToken,
        user_id: UserId,
        data: &[u8],
        filename: &str,
    ) -> EngineResult<BulkSummary> {
        self.run(ctx, user_id, data, filename, None)
    }

    /// Start an asynchronous ingestion: create the PENDING job record,
    /// then process on a background thread. The job runs detached from
    /// the caller's cancellation; jobs are not cancellable mid-stream.
    pub fn spawn_job(
        &self,
        ctx: &CancelToken,
        user_id: UserId,
        data: Vec<u8>,
        filename: String,
    ) -> EngineResult<SpawnedJob> {
        let total = RowSource::count_rows(&filename, &data)?;
        if total == 0 {
            return Err(EngineError::InvalidInput("file has no data rows".to_string()));
        }

        let job_id = Uuid::new_v4().to_string();
        let job = JobHandle::create(
            Arc::clone(&self.cache),
            ctx,
            job_id.clone(),
            user_id,
            total,
            Duration::seconds(self.config.job_ttl_secs),
        )?;

        let ingestor = self.clone();
        let handle = std::thread::spawn(move || {
            let job_ctx = CancelToken::new();
            if let Err(e) = ingestor.run(&job_ctx, user_id, &data, &filename, Some(&job)) {
                log::error!("user={user_id} job={}: bulk ingestion failed: {e}", job.job_id());
            }
        });

        Ok(SpawnedJob { job_id, handle })
    }

    fn run(
        &self,
        ctx: &CancelToken,
        user_id: UserId,
        data: &[u8],
        filename: &str,
        job: Option<&JobHandle>,
    ) -> EngineResult<BulkSummary> {
        let mut source = match RowSource::open(filename, data) {
            Ok(source) => source,
            Err(e) => {
                // Nothing processed yet: the one legal PENDING → FAILED edge.
                self.mark_job(ctx, job, JobStatus::Failed);
                return Err(e);
            }
        };
        self.mark_job(ctx, job, JobStatus::Running);

        let now = self.clock.now();
        let mut profile = self
            .store
            .get_profile(ctx, user_id)?
            .unwrap_or_else(|| BehaviorProfile::cold(user_id, now));

        let mut processed: i64 = 0;
        let mut success: i64 = 0;
        let mut failed: i64 = 0;
        let mut consecutive_failures: u32 = 0;
        let mut persisted_since_flush: usize = 0;

        while let Some(row) = source.next_row() {
            let record = match row {
                Ok(record) => record,
                Err(e) => {
                    log::debug!("user={user_id}: skipping unreadable row: {e}");
                    failed += 1;
                    self.bump(ctx, job, "failed");
                    continue;
                }
            };

            let Some(txn) = parse_row(&record, self.clock.now()) else {
                failed += 1;
                self.bump(ctx, job, "failed");
                continue;
            };

            // Bulk scoring does not re-query the recent window per row.
            let analysis = scoring::analyze(&txn, &profile, 0, &self.config);

            processed += 1;
            self.bump(ctx, job, "processed");

            match self.store.insert_transaction(ctx, user_id, &txn, &analysis) {
                Ok(_) => {
                    success += 1;
                    self.bump(ctx, job, "success");
                    consecutive_failures = 0;
                    persisted_since_flush += 1;

                    if analysis.decision != Decision::Block {
                        profile.apply(txn.amount, &txn.mode, txn.created_at, analysis.decision);
                    }

                    if persisted_since_flush >= self.config.bulk_batch_size {
                        self.flush_profile(ctx, user_id, &mut profile);
                        persisted_since_flush = 0;
                    }
                }
                Err(e) => {
                    log::error!("user={user_id}: failed to persist bulk row: {e}");
                    failed += 1;
                    self.bump(ctx, job, "failed");
                    consecutive_failures += 1;

                    if consecutive_failures >= self.config.bulk_failure_limit {
                        log::error!(
                            "user={user_id}: {consecutive_failures} consecutive store failures, aborting job"
                        );
                        self.mark_job(ctx, job, JobStatus::Failed);
                        return Ok(BulkSummary {
                            job_id: job.map(|j| j.job_id().to_string()),
                            status: JobStatus::Failed,
                            processed,
                            success,
                            failed,
                        });
                    }
                }
            }
        }

        // Final reconciliation from the transaction log.
        if let Err(e) = self.store.upsert_profile_incremental(ctx, user_id) {
            log::warn!("user={user_id}: final profile rebuild failed: {e}");
        }
        self.mark_job(ctx, job, JobStatus::Completed);

        Ok(BulkSummary {
            job_id: job.map(|j| j.job_id().to_string()),
            status: JobStatus::Completed,
            processed,
            success,
            failed,
        })
    }

    /// Per-batch flush: rebuild from the log, then reload so the
    /// log-derived aggregates reach subsequent rows.
    fn flush_profile(&self, ctx: &CancelToken, user_id: UserId, profile: &mut BehaviorProfile) {
        if let Err(e) = self.store.upsert_profile_incremental(ctx, user_id) {
            log::warn!("user={user_id}: batch profile rebuild failed: {e}");
            return;
        }
        match self.store.get_profile(ctx, user_id) {
            Ok(Some(fresh)) => *profile = fresh,
            Ok(None) => {}
            Err(e) => log::warn!("user={user_id}: profile reload failed: {e}"),
        }
    }

    fn mark_job(&self, ctx: &CancelToken, job: Option<&JobHandle>, status: JobStatus) {
        if let Some(job) = job {
            if let Err(e) = job.set_status(ctx, status) {
                log::warn!("job={}: failed to record status {status}: {e}", job.job_id());
            }
        }
    }

    fn bump(&self, ctx: &CancelToken, job: Option<&JobHandle>, field: &str) {
        if let Some(job) = job {
            if let Err(e) = job.incr(ctx, field, 1) {
                log::warn!("job={}: failed to bump {field}: {e}", job.job_id());
            }
        }
    }
}
