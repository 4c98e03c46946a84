//! Cross-reference checker
//!
//! Compares the live record against the latest block that references it.
//! Older blocks of the same record are history and are never checked: the
//! record has legitimately moved on since.

use shared::error::AppResult;
use shared::models::{Block, LedgerAction, LedgerPointer, MedicalRecord};

use super::types::{BlockIssue, IssueKind};

/// Read access to the live records
pub trait RecordLookup: Send + Sync {
    fn find_record(&self, record_id: &str) -> AppResult<Option<MedicalRecord>>;

    /// Every live record carrying a ledger pointer, ordered by record id
    fn ledgered_records(&self) -> AppResult<Vec<(String, LedgerPointer)>>;
}

pub struct CrossReferenceChecker;

impl CrossReferenceChecker {
    /// Findings for `block` given the record's ledger head and the live record
    ///
    /// `head` is the store's pointer to the latest block of the record. If it
    /// names another block, `block` is historical and yields nothing.
    pub fn check(
        block: &Block,
        head: Option<&LedgerPointer>,
        record: Option<&MedicalRecord>,
    ) -> Vec<BlockIssue> {
        let Some(action) = block.action() else {
            return Vec::new();
        };
        let Some(record_id) = block.payload.record_id().filter(|id| !id.is_empty()) else {
            return Vec::new();
        };
        if head.map(|h| h.ledger_index) != Some(block.index) {
            return Vec::new();
        }

        let issue = match (action, record) {
            (LedgerAction::Delete, None) => BlockIssue::new(
                IssueKind::RecordDeleted,
                format!("Record {record_id} was deleted"),
            ),
            (LedgerAction::Delete, Some(_)) => BlockIssue::new(
                IssueKind::DeletedRecordPresent,
                format!("Record {record_id} still exists after its delete block"),
            ),
            (_, None) => BlockIssue::new(
                IssueKind::RecordMissing,
                format!("Record {record_id} no longer exists"),
            ),
            (_, Some(record)) => {
                let expected = block.pointer();
                match record.pointer() {
                    Some(actual) if actual == expected => return Vec::new(),
                    actual => BlockIssue::new(
                        IssueKind::PointerMismatch,
                        format!("Record {record_id} does not point at its latest block"),
                    )
                    .with_values(format_pointer(Some(&expected)), format_pointer(actual.as_ref())),
                }
            }
        };

        vec![issue]
    }
}

fn format_pointer(pointer: Option<&LedgerPointer>) -> String {
    match pointer {
        Some(p) => format!("{}@{}", p.ledger_hash, p.ledger_index),
        None => "none".to_string(),
    }
}
