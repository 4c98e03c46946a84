//! Record history
//!
//! A record only keeps a pointer to its latest block; its history is the
//! ordered list of blocks that reference it, each with the field changes
//! relative to the previous snapshot.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::models::{Block, BlockPayload, LedgerAction, RecordSnapshot};
use shared::types::Timestamp;

/// Snapshot fields in display order
const SNAPSHOT_FIELDS: &[&str] = &["diagnosis", "treatment", "prescription", "notes", "visit_date"];

/// 字段变更记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    /// `null` when the field was absent
    pub from: Value,
    /// `null` when the field was cleared
    pub to: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub index: u64,
    pub timestamp: Timestamp,
    pub action: Option<LedgerAction>,
    pub hash: String,
    /// `updated_by` / `deleted_by`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    pub payload: BlockPayload,
    pub changes: Vec<FieldChange>,
}

/// Build the history of one record from its blocks
pub fn build_history(mut blocks: Vec<Block>) -> Vec<HistoryEntry> {
    blocks.sort_by_key(|b| b.index);

    let mut previous: Option<RecordSnapshot> = None;
    let mut entries = Vec::with_capacity(blocks.len());
    for block in blocks {
        let current = block.payload.snapshot().map(RecordSnapshot::normalized);
        let changes = match (&block.payload, &current) {
            (BlockPayload::Unrecognized, _) => Vec::new(),
            _ => diff_snapshots(previous.as_ref(), current.as_ref()),
        };
        if !matches!(block.payload, BlockPayload::Unrecognized) {
            previous = current;
        }

        entries.push(HistoryEntry {
            index: block.index,
            timestamp: block.timestamp,
            action: block.action(),
            hash: block.hash,
            actor_id: block
                .payload
                .actor_id()
                .filter(|a| !a.is_empty())
                .map(str::to_string),
            payload: block.payload,
            changes,
        });
    }
    entries
}

/// Field-level diff between two snapshots; `None` means "no record"
pub fn diff_snapshots(from: Option<&RecordSnapshot>, to: Option<&RecordSnapshot>) -> Vec<FieldChange> {
    let from = snapshot_value(from);
    let to = snapshot_value(to);

    SNAPSHOT_FIELDS
        .iter()
        .filter_map(|field| {
            let before = from.get(*field).cloned().unwrap_or(Value::Null);
            let after = to.get(*field).cloned().unwrap_or(Value::Null);
            (before != after).then(|| FieldChange {
                field: (*field).to_string(),
                from: before,
                to: after,
            })
        })
        .collect()
}

fn snapshot_value(snapshot: Option<&RecordSnapshot>) -> Value {
    snapshot
        .and_then(|s| serde_json::to_value(s).ok())
        .unwrap_or(Value::Null)
}
