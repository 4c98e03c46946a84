//! Unified error codes for the ledger workspace
//!
//! Error codes are organized by category:
//! - 0xxx: General errors
//! - 4xxx: Record errors
//! - 5xxx: Ledger errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// All error codes are represented as u16 values so collaborators in other
/// languages can map them without sharing this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Validation failed
    ValidationFailed = 2,

    // ==================== 4xxx: Record ====================
    /// Medical record not found
    RecordNotFound = 4001,

    // ==================== 5xxx: Ledger ====================
    /// Update mutation without an actor
    MissingActor = 5001,
    /// Payload could not be canonicalized
    EncodingFailed = 5002,
    /// Another writer claimed the index first
    IndexConflict = 5003,
    /// Two distinct blocks produced the same digest
    HashCollision = 5004,
    /// Append gave up after repeated index conflicts
    AppendRetriesExhausted = 5005,

    // ==================== 9xxx: System ====================
    DatabaseError = 9002,
    ConfigError = 9005,

    // ==================== 94xx: Storage ====================
    StorageFull = 9401,
    StorageCorrupted = 9403,
}

impl ErrorCode {
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, ErrorCode::Success)
    }

    pub const fn message(&self) -> &'static str {
        match self {
            // General
            ErrorCode::Success => "Operation completed successfully",
            ErrorCode::ValidationFailed => "Validation failed",

            // Record
            ErrorCode::RecordNotFound => "Medical record not found",

            // Ledger
            ErrorCode::MissingActor => "Update requires the identity of the acting user",
            ErrorCode::EncodingFailed => "Payload could not be canonically encoded",
            ErrorCode::IndexConflict => "Ledger index was claimed by another writer",
            ErrorCode::HashCollision => "Block hash collides with an existing block",
            ErrorCode::AppendRetriesExhausted => "Ledger append retries exhausted",

            // System
            ErrorCode::DatabaseError => "Database error",
            ErrorCode::ConfigError => "Configuration error",

            // Storage
            ErrorCode::StorageFull => "Storage full (disk space insufficient)",
            ErrorCode::StorageCorrupted => "Storage corrupted (data file damaged)",
        }
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error when converting from an invalid u16 to ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            // General
            0 => Ok(ErrorCode::Success),
            2 => Ok(ErrorCode::ValidationFailed),

            // Record
            4001 => Ok(ErrorCode::RecordNotFound),

            // Ledger
            5001 => Ok(ErrorCode::MissingActor),
            5002 => Ok(ErrorCode::EncodingFailed),
            5003 => Ok(ErrorCode::IndexConflict),
            5004 => Ok(ErrorCode::HashCollision),
            5005 => Ok(ErrorCode::AppendRetriesExhausted),

            // System
            9002 => Ok(ErrorCode::DatabaseError),
            9005 => Ok(ErrorCode::ConfigError),

            // Storage
            9401 => Ok(ErrorCode::StorageFull),
            9403 => Ok(ErrorCode::StorageCorrupted),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
