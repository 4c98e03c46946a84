//! Ledger block model
//!
//! Every create/update/delete of a medical record is attested by one
//! immutable [`Block`]. Blocks form a hash chain ordered by `index`:
//!
//! ```text
//! block₀ (previous_hash = "0") ← block₁ ← block₂ ← ... ← blockₙ
//! ```

use serde::{Deserialize, Serialize};

use super::record::RecordSnapshot;
use crate::types::Timestamp;

/// `previous_hash` of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Mutation kind recorded by a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerAction {
    Create,
    Update,
    Delete,
}

impl LedgerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for LedgerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Block payload, one variant per action
///
/// Identifier fields default to empty on decode so a stored block with a
/// missing reference still loads and is reported as a schema violation
/// instead of failing the whole verification pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BlockPayload {
    Create {
        #[serde(default)]
        record_id: String,
        #[serde(default)]
        patient_id: String,
        #[serde(default)]
        doctor_id: String,
        #[serde(default)]
        snapshot: RecordSnapshot,
    },
    Update {
        #[serde(default)]
        record_id: String,
        #[serde(default)]
        patient_id: String,
        #[serde(default)]
        doctor_id: String,
        #[serde(default)]
        updated_by: String,
        #[serde(default)]
        snapshot: RecordSnapshot,
    },
    Delete {
        #[serde(default)]
        record_id: String,
        #[serde(default)]
        patient_id: String,
        #[serde(default)]
        doctor_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deleted_by: Option<String>,
    },
    /// Stored payload whose `action` is not one of the above
    #[serde(other)]
    Unrecognized,
}

impl BlockPayload {
    pub fn action(&self) -> Option<LedgerAction> {
        match self {
            Self::Create { .. } => Some(LedgerAction::Create),
            Self::Update { .. } => Some(LedgerAction::Update),
            Self::Delete { .. } => Some(LedgerAction::Delete),
            Self::Unrecognized => None,
        }
    }

    pub fn record_id(&self) -> Option<&str> {
        match self {
            Self::Create { record_id, .. }
            | Self::Update { record_id, .. }
            | Self::Delete { record_id, .. } => Some(record_id),
            Self::Unrecognized => None,
        }
    }

    pub fn patient_id(&self) -> Option<&str> {
        match self {
            Self::Create { patient_id, .. }
            | Self::Update { patient_id, .. }
            | Self::Delete { patient_id, .. } => Some(patient_id),
            Self::Unrecognized => None,
        }
    }

    pub fn doctor_id(&self) -> Option<&str> {
        match self {
            Self::Create { doctor_id, .. }
            | Self::Update { doctor_id, .. }
            | Self::Delete { doctor_id, .. } => Some(doctor_id),
            Self::Unrecognized => None,
        }
    }

    /// Acting user: `updated_by` for updates, `deleted_by` for deletes
    pub fn actor_id(&self) -> Option<&str> {
        match self {
            Self::Update { updated_by, .. } => Some(updated_by),
            Self::Delete { deleted_by, .. } => deleted_by.as_deref(),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> Option<&RecordSnapshot> {
        match self {
            Self::Create { snapshot, .. } | Self::Update { snapshot, .. } => Some(snapshot),
            _ => None,
        }
    }
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: Timestamp,
    pub payload: BlockPayload,
    pub previous_hash: String,
    pub hash: String,
}

impl Block {
    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    pub fn action(&self) -> Option<LedgerAction> {
        self.payload.action()
    }

    pub fn pointer(&self) -> LedgerPointer {
        LedgerPointer {
            ledger_hash: self.hash.clone(),
            ledger_index: self.index,
        }
    }
}

/// `(hash, index)` a record stores to name its most recent block
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerPointer {
    pub ledger_hash: String,
    pub ledger_index: u64,
}
