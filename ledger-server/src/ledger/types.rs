//! Ledger types
//!
//! Append inputs/outputs, verification findings and the errors the ledger
//! core can raise.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use shared::error::{AppError, ErrorCode};
use shared::models::{BlockPayload, LedgerAction, LedgerPointer, MedicalRecord, RecordSnapshot};
use shared::types::Timestamp;
use shared::util::normalize_optional;
use thiserror::Error;

use super::canonical::EncodeError;
use super::storage::StorageError;

// ============================================================================
// Append
// ============================================================================

/// One record mutation to attest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationDescriptor {
    pub action: LedgerAction,
    pub record_id: String,
    pub patient_id: String,
    pub doctor_id: String,
    /// Clinical fields after the mutation (ignored for deletes)
    #[serde(default)]
    pub snapshot: RecordSnapshot,
    /// Acting user, required for updates
    #[serde(default)]
    pub actor_id: Option<String>,
}

impl MutationDescriptor {
    pub fn create(record: &MedicalRecord) -> Self {
        Self::from_record(LedgerAction::Create, record, None)
    }

    pub fn update(record: &MedicalRecord, actor_id: impl Into<String>) -> Self {
        Self::from_record(LedgerAction::Update, record, Some(actor_id.into()))
    }

    pub fn delete(record: &MedicalRecord, actor_id: Option<String>) -> Self {
        Self::from_record(LedgerAction::Delete, record, actor_id)
    }

    fn from_record(action: LedgerAction, record: &MedicalRecord, actor_id: Option<String>) -> Self {
        Self {
            action,
            record_id: record.id.clone(),
            patient_id: record.patient_id.clone(),
            doctor_id: record.doctor_id.clone(),
            snapshot: record.snapshot(),
            actor_id,
        }
    }

    /// Validate and build the block payload
    pub fn into_payload(self) -> Result<BlockPayload, LedgerError> {
        let record_id = required("record_id", self.record_id)?;
        let patient_id = required("patient_id", self.patient_id)?;
        let doctor_id = required("doctor_id", self.doctor_id)?;
        let actor_id = normalize_optional(self.actor_id);

        Ok(match self.action {
            LedgerAction::Create => BlockPayload::Create {
                record_id,
                patient_id,
                doctor_id,
                snapshot: self.snapshot.normalized(),
            },
            LedgerAction::Update => {
                let updated_by = actor_id.ok_or_else(|| LedgerError::MissingActor(record_id.clone()))?;
                BlockPayload::Update {
                    record_id,
                    patient_id,
                    doctor_id,
                    updated_by,
                    snapshot: self.snapshot.normalized(),
                }
            }
            LedgerAction::Delete => BlockPayload::Delete {
                record_id,
                patient_id,
                doctor_id,
                deleted_by: actor_id,
            },
        })
    }
}

fn required(field: &str, value: String) -> Result<String, LedgerError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::InvalidMutation(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

/// Result of an accepted append
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendReceipt {
    pub index: u64,
    pub hash: String,
    pub timestamp: Timestamp,
}

impl AppendReceipt {
    /// Pointer the record should store
    pub fn pointer(&self) -> LedgerPointer {
        LedgerPointer {
            ledger_hash: self.hash.clone(),
            ledger_index: self.index,
        }
    }
}

// ============================================================================
// Findings
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finding kind
///
/// Each kind has one fixed severity, see [`IssueKind::severity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    // ═══ Integrity ═══
    /// Recomputed hash differs from the stored one
    HashMismatch,
    /// Block 0 does not carry the genesis sentinel
    InvalidGenesis,
    /// `previous_hash` differs from an authentic predecessor's hash
    BrokenLink,
    /// `previous_hash` matches neither hash of a tampered predecessor
    PreviousHashMismatch,
    /// Block `index - 1` is not in the store
    MissingPredecessor,
    /// Gap, duplicate or regression in the full chain
    OrderViolation,
    SchemaViolation,
    FutureTimestamp,
    /// Stored row no longer decodes as a block
    UndecodableBlock,

    // ═══ Chain pointers ═══
    /// A record head or live record points at a block that is not stored
    DanglingPointer,
    /// Blocks past the latest stored one are still referenced
    ChainTruncated,

    // ═══ Cross-reference ═══
    RecordMissing,
    PointerMismatch,
    DeletedRecordPresent,
    /// Delete block whose record is gone, as expected
    RecordDeleted,
}

impl IssueKind {
    pub fn severity(&self) -> Severity {
        match self {
            Self::HashMismatch
            | Self::InvalidGenesis
            | Self::BrokenLink
            | Self::OrderViolation
            | Self::UndecodableBlock
            | Self::DanglingPointer
            | Self::ChainTruncated => Severity::High,
            Self::PreviousHashMismatch
            | Self::MissingPredecessor
            | Self::SchemaViolation
            | Self::FutureTimestamp
            | Self::RecordMissing
            | Self::PointerMismatch
            | Self::DeletedRecordPresent => Severity::Medium,
            Self::RecordDeleted => Severity::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HashMismatch => "hash_mismatch",
            Self::InvalidGenesis => "invalid_genesis",
            Self::BrokenLink => "broken_link",
            Self::PreviousHashMismatch => "previous_hash_mismatch",
            Self::MissingPredecessor => "missing_predecessor",
            Self::OrderViolation => "order_violation",
            Self::SchemaViolation => "schema_violation",
            Self::FutureTimestamp => "future_timestamp",
            Self::UndecodableBlock => "undecodable_block",
            Self::DanglingPointer => "dangling_pointer",
            Self::ChainTruncated => "chain_truncated",
            Self::RecordMissing => "record_missing",
            Self::PointerMismatch => "pointer_mismatch",
            Self::DeletedRecordPresent => "deleted_record_present",
            Self::RecordDeleted => "record_deleted",
        }
    }
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding against one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

impl BlockIssue {
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            message: message.into(),
            expected: None,
            actual: None,
        }
    }

    pub fn with_values(mut self, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self.actual = Some(actual.into());
        self
    }
}

/// Verification result for one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockVerification {
    pub index: u64,
    pub hash: String,
    pub action: Option<LedgerAction>,
    pub record_id: Option<String>,
    /// Absent when the stored row is too damaged to yield one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    pub issues: Vec<BlockIssue>,
}

impl BlockVerification {
    /// Valid iff no finding is above LOW
    pub fn is_valid(&self) -> bool {
        self.issues.iter().all(|i| i.severity <= Severity::Low)
    }

    pub fn has_issue(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|i| i.kind == kind)
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.issues.iter().map(|i| i.severity).max()
    }
}

/// Which blocks a verification pass covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum VerifyScope {
    Full,
    Record { record_id: String },
    Patient { patient_id: String },
    /// Inclusive on both ends
    Window { from: Timestamp, to: Timestamp },
}

impl VerifyScope {
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full)
    }
}

impl std::fmt::Display for VerifyScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Record { record_id } => write!(f, "record:{record_id}"),
            Self::Patient { patient_id } => write!(f, "patient:{patient_id}"),
            Self::Window { from, to } => write!(f, "window:{from}..{to}"),
        }
    }
}

/// Aggregate result of a verification pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    pub scope: VerifyScope,
    pub verified_at: Timestamp,
    pub total_blocks: usize,
    pub valid_blocks: usize,
    pub invalid_blocks: usize,
    pub issue_counts: BTreeMap<IssueKind, usize>,
    /// Present when block 0 is in scope
    pub genesis_valid: Option<bool>,
    pub overall_valid: bool,
    pub blocks: Vec<BlockVerification>,
    /// Findings against the chain as a whole rather than one stored block
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chain_issues: Vec<BlockIssue>,
}

impl ChainVerification {
    pub fn from_blocks(
        scope: VerifyScope,
        verified_at: Timestamp,
        blocks: Vec<BlockVerification>,
    ) -> Self {
        let valid_blocks = blocks.iter().filter(|b| b.is_valid()).count();
        let invalid_blocks = blocks.len() - valid_blocks;

        let mut issue_counts = BTreeMap::new();
        for issue in blocks.iter().flat_map(|b| &b.issues) {
            *issue_counts.entry(issue.kind).or_insert(0) += 1;
        }

        let genesis_valid = blocks.iter().find(|b| b.index == 0).map(|b| b.is_valid());
        let overall_valid = invalid_blocks == 0 && genesis_valid != Some(false);

        Self {
            scope,
            verified_at,
            total_blocks: blocks.len(),
            valid_blocks,
            invalid_blocks,
            issue_counts,
            genesis_valid,
            overall_valid,
            blocks,
            chain_issues: Vec::new(),
        }
    }

    /// Attaches chain-level findings. Any of them above LOW fails the pass.
    pub fn with_chain_issues(mut self, issues: Vec<BlockIssue>) -> Self {
        for issue in &issues {
            *self.issue_counts.entry(issue.kind).or_insert(0) += 1;
        }
        self.overall_valid &= issues.iter().all(|i| i.severity <= Severity::Low);
        self.chain_issues.extend(issues);
        self
    }

    pub fn block(&self, index: u64) -> Option<&BlockVerification> {
        self.blocks.iter().find(|b| b.index == index)
    }

    pub fn issue_count(&self, kind: IssueKind) -> usize {
        self.issue_counts.get(&kind).copied().unwrap_or(0)
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid mutation: {0}")]
    InvalidMutation(String),

    #[error("Update of record {0} has no acting user")]
    MissingActor(String),

    #[error("Encoding failed: {0}")]
    Encoding(#[from] EncodeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Hash collision: {hash} is already stored at index {existing_index}")]
    HashCollision { hash: String, existing_index: u64 },

    #[error("Append gave up after {attempts} attempts, the chain head kept moving")]
    RetriesExhausted { attempts: u32 },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidMutation(msg) => AppError::validation(msg),
            LedgerError::MissingActor(record_id) => {
                AppError::with_message(ErrorCode::MissingActor, format!("Update of record {record_id} has no acting user"))
                    .with_detail("record_id", record_id)
            }
            LedgerError::Encoding(e) => AppError::with_message(ErrorCode::EncodingFailed, e.to_string()),
            LedgerError::Storage(e) => e.into(),
            LedgerError::HashCollision {
                hash,
                existing_index,
            } => AppError::with_message(
                ErrorCode::HashCollision,
                format!("Hash collision: {hash} is already stored at index {existing_index}"),
            )
            .with_detail("hash", hash)
            .with_detail("existing_index", existing_index),
            LedgerError::RetriesExhausted { attempts } => AppError::with_message(
                ErrorCode::AppendRetriesExhausted,
                format!("Append gave up after {attempts} attempts"),
            )
            .with_detail("attempts", attempts),
        }
    }
}
