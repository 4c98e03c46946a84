//! Medical Record Model

use serde::{Deserialize, Serialize};

use super::ledger::LedgerPointer;
use crate::types::Timestamp;

/// Mutable clinical fields captured in every create/update block
///
/// Optional text that is absent, `null` or blank is the same value:
/// [`RecordSnapshot::normalized`] collapses all three to `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    #[serde(default)]
    pub diagnosis: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treatment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prescription: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visit_date: Option<Timestamp>,
}

impl RecordSnapshot {
    pub fn new(diagnosis: impl Into<String>) -> Self {
        Self {
            diagnosis: diagnosis.into(),
            ..Default::default()
        }
    }

    /// Trimmed copy with blank optionals collapsed to `None`
    pub fn normalized(&self) -> Self {
        Self {
            diagnosis: self.diagnosis.trim().to_string(),
            treatment: crate::util::normalize_optional(self.treatment.clone()),
            prescription: crate::util::normalize_optional(self.prescription.clone()),
            notes: crate::util::normalize_optional(self.notes.clone()),
            visit_date: self.visit_date,
        }
    }
}

/// Medical record as held by the record lifecycle service
///
/// `ledger_hash` / `ledger_index` name the most recent block describing this
/// record. They are overwritten on every accepted mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicalRecord {
    pub id: String,
    pub patient_id: String,
    pub doctor_id: String,
    pub diagnosis: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treatment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prescription: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visit_date: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub ledger_hash: Option<String>,
    #[serde(default)]
    pub ledger_index: Option<u64>,
}

impl MedicalRecord {
    pub fn new(
        id: impl Into<String>,
        patient_id: impl Into<String>,
        doctor_id: impl Into<String>,
        snapshot: RecordSnapshot,
    ) -> Self {
        let now = Timestamp::now();
        let mut record = Self {
            id: id.into(),
            patient_id: patient_id.into(),
            doctor_id: doctor_id.into(),
            diagnosis: String::new(),
            treatment: None,
            prescription: None,
            notes: None,
            visit_date: None,
            created_at: now,
            updated_at: now,
            ledger_hash: None,
            ledger_index: None,
        };
        record.apply_snapshot(snapshot);
        record
    }

    /// Clinical fields as they would be recorded in a block
    pub fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot {
            diagnosis: self.diagnosis.clone(),
            treatment: self.treatment.clone(),
            prescription: self.prescription.clone(),
            notes: self.notes.clone(),
            visit_date: self.visit_date,
        }
        .normalized()
    }

    pub fn apply_snapshot(&mut self, snapshot: RecordSnapshot) {
        let snapshot = snapshot.normalized();
        self.diagnosis = snapshot.diagnosis;
        self.treatment = snapshot.treatment;
        self.prescription = snapshot.prescription;
        self.notes = snapshot.notes;
        self.visit_date = snapshot.visit_date;
    }

    /// Pointer to the latest block, if the record has been ledgered
    pub fn pointer(&self) -> Option<LedgerPointer> {
        match (&self.ledger_hash, self.ledger_index) {
            (Some(hash), Some(index)) => Some(LedgerPointer {
                ledger_hash: hash.clone(),
                ledger_index: index,
            }),
            _ => None,
        }
    }

    pub fn set_pointer(&mut self, pointer: LedgerPointer) {
        self.ledger_hash = Some(pointer.ledger_hash);
        self.ledger_index = Some(pointer.ledger_index);
    }
}
