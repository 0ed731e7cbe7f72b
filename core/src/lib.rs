//! fraudlite-core: fraud-risk scoring engine for a lightweight
//! transaction authorization service.
//!
//! Given an incoming payment and the payer's behavior profile, the engine
//! computes a bounded risk score, classifies the transaction into
//! ALLOW / FLAG / MFA_REQUIRED / BLOCK, reports the risk factors that
//! fired, and evolves the profile. A bulk pipeline replays the same
//! scorer over CSV/XLSX files, and a nightly job rebuilds every profile
//! from the transaction log, which is always the source of truth.

pub mod cache;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod error;
pub mod ingest;
pub mod jobs;
pub mod profile;
pub mod rebuild;
pub mod scoring;
pub mod service;
pub mod store;
pub mod types;

pub use cancel::CancelToken;
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use profile::{BehaviorProfile, Decision, Mode, TriggerFactor};
