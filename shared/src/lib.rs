//! Shared types for the medical record ledger
//!
//! Common types used by the ledger core and its collaborators:
//! error types, timestamps, record models and ledger block models.

pub mod error;
pub mod models;
pub mod types;
pub mod util;

// Re-exports
pub use error::{AppError, AppResult, ErrorCategory, ErrorCode};
pub use models::{
    Block, BlockPayload, GENESIS_PREVIOUS_HASH, LedgerAction, LedgerPointer, MedicalRecord,
    RecordSnapshot,
};
pub use serde::{Deserialize, Serialize};
pub use types::{Timestamp, TimestampError};
