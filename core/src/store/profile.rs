//! Behavior profile queries and the authoritative rebuild.
//!
//! The transaction log is the source of truth: both the per-user upsert
//! and the full rebuild fold the user's committed rows into a fresh
//! profile inside a single SQL transaction, so a concurrent reader sees
//! either the old profile or the new one, never a partial write.

use super::{parse_ts, ts, ProfileStore};
use crate::{
    cancel::CancelToken,
    error::{EngineError, EngineResult},
    profile::{BehaviorProfile, Decision, Mode},
    types::UserId,
};
use chrono::{NaiveDate, Timelike, Utc};
use rusqlite::{params, OptionalExtension, Transaction};

impl ProfileStore {
    pub fn get_profile(
        &self,
        ctx: &CancelToken,
        user_id: UserId,
    ) -> EngineResult<Option<BehaviorProfile>> {
        ctx.check()?;
        let raw = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                "SELECT user_id, avg_amount, stddev_amount, max_amount_seen,
                        avg_txns_per_day, registered_modes,
                        usual_start_hour, usual_end_hour,
                        total_transactions, allowed_transactions, updated_at
                 FROM user_profile_behavior WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, UserId>(0)?,
                        row.get::<_, Option<f64>>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                        row.get::<_, Option<f64>>(3)?,
                        row.get::<_, Option<f64>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<u32>>(6)?,
                        row.get::<_, Option<u32>>(7)?,
                        row.get::<_, i64>(8)?,
                        row.get::<_, i64>(9)?,
                        row.get::<_, String>(10)?,
                    ))
                },
            )
            .optional()?
        };

        let Some(raw) = raw else { return Ok(None) };
        let modes: Vec<String> = serde_json::from_str(&raw.5)?;
        Ok(Some(BehaviorProfile {
            user_id: raw.0,
            avg_amount: raw.1,
            stddev_amount: raw.2,
            max_amount_seen: raw.3,
            avg_txns_per_day: raw.4,
            registered_modes: modes.into_iter().map(Mode::from).collect(),
            usual_start_hour: raw.6,
            usual_end_hour: raw.7,
            total_transactions: raw.8,
            allowed_transactions: raw.9,
            updated_at: parse_ts(&raw.10)?,
        }))
    }

    /// Atomically recompute one user's profile from the transaction log.
    /// Observes every transaction committed before this call starts.
    pub fn upsert_profile_incremental(&self, ctx: &CancelToken, user_id: UserId) -> EngineResult<()> {
        ctx.check()?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        recompute_profile(&tx, user_id)?;
        tx.commit()?;
        Ok(())
    }

    /// Recompute every user that has transactions or a profile row.
    /// One transaction for the whole sweep.
    pub fn rebuild_all_profiles(&self, ctx: &CancelToken) -> EngineResult<usize> {
        ctx.check()?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let user_ids: Vec<UserId> = {
            let mut stmt = tx.prepare(
                "SELECT user_id FROM transactions
                 UNION
                 SELECT user_id FROM user_profile_behavior",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        for &user_id in &user_ids {
            recompute_profile(&tx, user_id)?;
        }
        tx.commit()?;
        Ok(user_ids.len())
    }
}

// ── Projection ───────────────────────────────────────────────────────────────

/// Pure fold of one user's transaction rows into profile aggregates.
/// All spending aggregates come from ALLOW/FLAG rows only; a user with no
/// allowed rows keeps every aggregate unknown.
#[derive(Default)]
struct Projection {
    total:     i64,
    allowed:   i64,
    sum:       f64,
    sum_sq:    f64,
    max:       Option<f64>,
    modes:     Vec<Mode>,
    min_hour:  Option<u32>,
    max_hour:  Option<u32>,
    first_day: Option<NaiveDate>,
    last_day:  Option<NaiveDate>,
}

impl Projection {
    fn fold(&mut self, amount: f64, mode: Mode, decision: Decision, created_at: chrono::DateTime<Utc>) {
        self.total += 1;
        if !decision.is_allowed() {
            return;
        }
        self.allowed += 1;
        self.sum += amount;
        self.sum_sq += amount * amount;
        if self.max.map_or(true, |m| amount > m) {
            self.max = Some(amount);
        }
        if !self.modes.contains(&mode) {
            self.modes.push(mode);
        }

        let hour = created_at.hour();
        if self.min_hour.map_or(true, |h| hour < h) {
            self.min_hour = Some(hour);
        }
        if self.max_hour.map_or(true, |h| hour > h) {
            self.max_hour = Some(hour);
        }

        let day = created_at.date_naive();
        if self.first_day.map_or(true, |d| day < d) {
            self.first_day = Some(day);
        }
        if self.last_day.map_or(true, |d| day > d) {
            self.last_day = Some(day);
        }
    }

    fn avg(&self) -> Option<f64> {
        (self.allowed > 0).then(|| self.sum / self.allowed as f64)
    }

    /// Population standard deviation over allowed amounts.
    fn stddev(&self) -> Option<f64> {
        let avg = self.avg()?;
        let variance = (self.sum_sq / self.allowed as f64 - avg * avg).max(0.0);
        Some(variance.sqrt())
    }

    /// Allowed transactions per day over the observed span, inclusive.
    fn per_day(&self) -> Option<f64> {
        let (first, last) = (self.first_day?, self.last_day?);
        let span_days = ((last - first).num_days() + 1).max(1);
        Some(self.allowed as f64 / span_days as f64)
    }
}

fn recompute_profile(tx: &Transaction<'_>, user_id: UserId) -> EngineResult<()> {
    let mut stmt = tx.prepare(
        "SELECT amount, mode, decision, created_at
         FROM transactions WHERE user_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok((
            row.get::<_, f64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut projection = Projection::default();
    for row in rows {
        let (amount, mode, decision, created_at) = row?;
        let decision = decision
            .parse::<Decision>()
            .map_err(|e| EngineError::Other(anyhow::anyhow!(e)))?;
        projection.fold(amount, Mode::from(mode), decision, parse_ts(&created_at)?);
    }

    let modes: Vec<&str> = projection.modes.iter().map(|m| m.as_str()).collect();
    tx.execute(
        "INSERT INTO user_profile_behavior (
            user_id, avg_amount, stddev_amount, max_amount_seen,
            avg_txns_per_day, registered_modes,
            usual_start_hour, usual_end_hour,
            total_transactions, allowed_transactions, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        ON CONFLICT(user_id) DO UPDATE SET
            avg_amount = excluded.avg_amount,
            stddev_amount = excluded.stddev_amount,
            max_amount_seen = excluded.max_amount_seen,
            avg_txns_per_day = excluded.avg_txns_per_day,
            registered_modes = excluded.registered_modes,
            usual_start_hour = excluded.usual_start_hour,
            usual_end_hour = excluded.usual_end_hour,
            total_transactions = excluded.total_transactions,
            allowed_transactions = excluded.allowed_transactions,
            updated_at = excluded.updated_at",
        params![
            user_id,
            projection.avg(),
            projection.stddev(),
            projection.max,
            projection.per_day(),
            serde_json::to_string(&modes)?,
            projection.min_hour,
            projection.max_hour,
            projection.total,
            projection.allowed,
            ts(Utc::now()),
        ],
    )?;
    Ok(())
}
