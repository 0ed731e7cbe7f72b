//! Shared primitive types used across the entire engine.

/// A registered payer. Row id in the `users` table.
pub type UserId = i64;

/// A persisted transaction. Row id in the `transactions` table.
pub type TxnId = i64;

/// Opaque bulk-ingestion job identifier (UUID v4 string).
pub type JobId = String;
