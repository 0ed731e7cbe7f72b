//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Services call store methods; they never execute SQL directly.
//!
//! Timestamps are stored as RFC3339 UTC text with fixed microsecond
//! precision, so lexicographic comparison equals chronological order and
//! the recent-count window is a plain string comparison.

use crate::{
    cancel::CancelToken,
    error::{EngineError, EngineResult},
    profile::{Decision, Mode, TriggerFactor},
    scoring::{AnalysisResult, TxnInput},
    types::{TxnId, UserId},
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

mod profile;

pub struct ProfileStore {
    conn: Mutex<Connection>,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl ProfileStore {
    pub fn open(path: &str) -> EngineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EngineResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> EngineResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    // ── Users ──────────────────────────────────────────────────

    pub fn create_user(
        &self,
        ctx: &CancelToken,
        name: &str,
        email: &str,
        hashed_pass: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<UserId> {
        ctx.check()?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO users (name, email, hashed_pass, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![name, email, hashed_pass, ts(now)],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn user_id_by_email(&self, ctx: &CancelToken, email: &str) -> EngineResult<Option<UserId>> {
        ctx.check()?;
        let conn = self.conn.lock().unwrap();
        let id = conn
            .query_row(
                "SELECT id FROM users WHERE email = ?1",
                params![email],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    // ── Transactions ───────────────────────────────────────────

    /// Persist one scored transaction. Returns the assigned id.
    pub fn insert_transaction(
        &self,
        ctx: &CancelToken,
        user_id: UserId,
        txn: &TxnInput,
        analysis: &AnalysisResult,
    ) -> EngineResult<TxnId> {
        ctx.check()?;
        let factors = serde_json::to_string(&analysis.triggered_factors)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO transactions (
                user_id, amount, mode, risk_score, triggered_factors, decision,
                amount_deviation_score, frequency_deviation_score,
                mode_deviation_score, time_deviation_score, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                user_id,
                txn.amount,
                txn.mode.as_str(),
                analysis.final_risk_score,
                factors,
                analysis.decision.as_str(),
                analysis.amount_risk as i32,
                analysis.frequency_risk as i32,
                analysis.mode_risk as i32,
                analysis.time_risk as i32,
                ts(txn.created_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_transaction(
        &self,
        ctx: &CancelToken,
        user_id: UserId,
        txn_id: TxnId,
    ) -> EngineResult<TransactionRecord> {
        ctx.check()?;
        let raw = {
            let conn = self.conn.lock().unwrap();
            conn.query_row(
                &format!("{TXN_SELECT} WHERE id = ?1 AND user_id = ?2"),
                params![txn_id, user_id],
                raw_txn_mapper,
            )
            .optional()?
        };
        match raw {
            Some(raw) => decode_txn(raw),
            None => Err(EngineError::NotFound { what: "transaction" }),
        }
    }

    pub fn transactions_by_user(
        &self,
        ctx: &CancelToken,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> EngineResult<Vec<TransactionRecord>> {
        ctx.check()?;
        let raw_rows = {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(&format!(
                "{TXN_SELECT} WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt.query_map(params![user_id, limit, offset], raw_txn_mapper)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        raw_rows.into_iter().map(decode_txn).collect()
    }

    /// Count transactions by the user at or after `since`.
    pub fn count_recent(
        &self,
        ctx: &CancelToken,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> EngineResult<i64> {
        ctx.check()?;
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE user_id = ?1 AND created_at >= ?2",
            params![user_id, ts(since)],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ── Test / summary helpers ─────────────────────────────────

    pub fn txn_count_total(&self, user_id: UserId) -> EngineResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .map_err(Into::into)
    }

    pub fn profile_count(&self) -> EngineResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM user_profile_behavior", [], |row| {
            row.get(0)
        })
        .map_err(Into::into)
    }
}

// ── Transaction rows ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub id:                        TxnId,
    pub user_id:                   UserId,
    pub amount:                    f64,
    pub mode:                      Mode,
    pub risk_score:                i32,
    pub triggered_factors:         Vec<TriggerFactor>,
    pub decision:                  Decision,
    pub amount_deviation_score:    i32,
    pub frequency_deviation_score: i32,
    pub mode_deviation_score:      i32,
    pub time_deviation_score:      i32,
    pub created_at:                DateTime<Utc>,
}

const TXN_SELECT: &str = "SELECT id, user_id, amount, mode, risk_score, triggered_factors,
        decision, amount_deviation_score, frequency_deviation_score,
        mode_deviation_score, time_deviation_score, created_at
 FROM transactions";

/// Raw row with enums and timestamps still as text; decoded outside the
/// rusqlite mapper so parse failures surface as engine errors.
struct RawTxn {
    id:                        TxnId,
    user_id:                   UserId,
    amount:                    f64,
    mode:                      String,
    risk_score:                i32,
    triggered_factors:         String,
    decision:                  String,
    amount_deviation_score:    i32,
    frequency_deviation_score: i32,
    mode_deviation_score:      i32,
    time_deviation_score:      i32,
    created_at:                String,
}

fn raw_txn_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTxn> {
    Ok(RawTxn {
        id: row.get(0)?,
        user_id: row.get(1)?,
        amount: row.get(2)?,
        mode: row.get(3)?,
        risk_score: row.get(4)?,
        triggered_factors: row.get(5)?,
        decision: row.get(6)?,
        amount_deviation_score: row.get(7)?,
        frequency_deviation_score: row.get(8)?,
        mode_deviation_score: row.get(9)?,
        time_deviation_score: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn decode_txn(raw: RawTxn) -> EngineResult<TransactionRecord> {
    let decision = raw
        .decision
        .parse::<Decision>()
        .map_err(|e| EngineError::Other(anyhow::anyhow!(e)))?;
    let triggered_factors: Vec<TriggerFactor> = serde_json::from_str(&raw.triggered_factors)?;
    Ok(TransactionRecord {
        id: raw.id,
        user_id: raw.user_id,
        amount: raw.amount,
        mode: Mode::from(raw.mode),
        risk_score: raw.risk_score,
        triggered_factors,
        decision,
        amount_deviation_score: raw.amount_deviation_score,
        frequency_deviation_score: raw.frequency_deviation_score,
        mode_deviation_score: raw.mode_deviation_score,
        time_deviation_score: raw.time_deviation_score,
        created_at: parse_ts(&raw.created_at)?,
    })
}

// ── Timestamp codec ──────────────────────────────────────────────────────────

pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> EngineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::Other(anyhow::anyhow!("bad stored timestamp {raw:?}: {e}")))
}
