//! Single-transaction orchestration.
//!
//! Flow for one authorization request: validate, load the profile (cold
//! default when absent), count the recent window, score, persist the row,
//! then refresh the profile from the log. The row insert always completes
//! before the profile refresh starts, so the refresh never misses it. A
//! failed refresh after a successful insert is logged, never surfaced.

use crate::{
    cancel::CancelToken,
    clock::Clock,
    config::EngineConfig,
    error::{EngineError, EngineResult},
    profile::{BehaviorProfile, Decision, Mode, TriggerFactor},
    scoring::{self, TxnInput},
    store::{ProfileStore, TransactionRecord},
    types::{TxnId, UserId},
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Largest accepted transaction amount.
pub const MAX_TXN_AMOUNT: f64 = 1e13;

pub const DEFAULT_TXNS_LIMIT: i64 = 20;
pub const DEFAULT_TXNS_OFFSET: i64 = 0;

// ── Request envelope ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransactionRequest {
    pub amount: f64,
    pub mode:   String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransactionResponse {
    pub txn_id:            TxnId,
    pub decision:          Decision,
    pub risk_score:        i32,
    pub triggered_factors: Vec<TriggerFactor>,
}

// ── Service ──────────────────────────────────────────────────────────────────

pub struct TransactionService {
    store:  Arc<ProfileStore>,
    clock:  Arc<dyn Clock>,
    config: EngineConfig,
}

impl TransactionService {
    pub fn new(store: Arc<ProfileStore>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self { store, clock, config }
    }

    /// Score and persist one transaction, then refresh the payer's profile.
    pub fn create_transaction(
        &self,
        ctx: &CancelToken,
        user_id: UserId,
        req: &CreateTransactionRequest,
    ) -> EngineResult<CreateTransactionResponse> {
        let mode = validate_request(req)?;
        let now = self.clock.now();

        let profile = self
            .store
            .get_profile(ctx, user_id)?
            .unwrap_or_else(|| BehaviorProfile::cold(user_id, now));

        let since = now - Duration::seconds(self.config.frequency_window_secs);
        let recent_count = self.store.count_recent(ctx, user_id, since)?;

        let txn = TxnInput {
            amount: req.amount,
            mode,
            created_at: now,
        };
        let analysis = scoring::analyze(&txn, &profile, recent_count, &self.config);

        let txn_id = self.store.insert_transaction(ctx, user_id, &txn, &analysis)?;

        if analysis.decision != Decision::Block {
            if let Err(e) = self.store.upsert_profile_incremental(ctx, user_id) {
                log::warn!("user={user_id} txn={txn_id}: profile refresh failed: {e}");
            }
        }

        Ok(CreateTransactionResponse {
            txn_id,
            decision: analysis.decision,
            risk_score: analysis.final_risk_score,
            triggered_factors: analysis.triggered_factors,
        })
    }

    pub fn get_transaction(
        &self,
        ctx: &CancelToken,
        user_id: UserId,
        txn_id: TxnId,
    ) -> EngineResult<TransactionRecord> {
        self.store.get_transaction(ctx, user_id, txn_id)
    }

    pub fn list_transactions(
        &self,
        ctx: &CancelToken,
        user_id: UserId,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> EngineResult<Vec<TransactionRecord>> {
        let limit = limit.filter(|&l| l > 0).unwrap_or(DEFAULT_TXNS_LIMIT);
        let offset = offset.filter(|&o| o >= 0).unwrap_or(DEFAULT_TXNS_OFFSET);
        self.store.transactions_by_user(ctx, user_id, limit, offset)
    }
}

fn validate_request(req: &CreateTransactionRequest) -> EngineResult<Mode> {
    if !(req.amount > 0.0 && req.amount <= MAX_TXN_AMOUNT) {
        return Err(EngineError::AmountOutOfRange);
    }
    let mode = Mode::from(req.mode.clone());
    if !mode.is_supported() {
        return Err(EngineError::InvalidPaymentMode);
    }
    Ok(mode)
}
