//! Record lifecycle
//!
//! Every mutation goes through the ledger first. The record (and its
//! `ledger_hash` / `ledger_index` pointer) is written only after the block
//! is durably stored, so a failed append leaves the record untouched.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use shared::error::{AppError, AppResult, ErrorCode};
use shared::models::{MedicalRecord, RecordSnapshot};
use shared::types::Timestamp;
use shared::util::new_record_id;

use super::store::RecordStore;
use crate::ledger::LedgerService;

#[derive(Clone)]
pub struct RecordService {
    records: Arc<RecordStore>,
    ledger: Arc<LedgerService>,
}

impl RecordService {
    pub fn new(records: Arc<RecordStore>, ledger: Arc<LedgerService>) -> Self {
        Self { records, ledger }
    }

    pub fn records(&self) -> &Arc<RecordStore> {
        &self.records
    }

    pub fn ledger(&self) -> &Arc<LedgerService> {
        &self.ledger
    }

    pub fn get(&self, record_id: &str) -> AppResult<MedicalRecord> {
        self.records
            .get(record_id)
            .ok_or_else(|| record_not_found(record_id))
    }

    /// Create a record and attest it with a `create` block
    pub fn create(
        &self,
        patient_id: &str,
        doctor_id: &str,
        snapshot: RecordSnapshot,
    ) -> AppResult<MedicalRecord> {
        let mut record = MedicalRecord::new(
            new_record_id(),
            patient_id.trim(),
            doctor_id.trim(),
            snapshot,
        );

        let receipt = self.ledger.on_record_created(&record)?;
        record.set_pointer(receipt.pointer());
        self.records.insert(record.clone());

        tracing::info!(record_id = %record.id, index = receipt.index, "Medical record created");
        Ok(record)
    }

    /// Replace the clinical fields of a record
    pub fn update(
        &self,
        record_id: &str,
        snapshot: RecordSnapshot,
        actor_id: &str,
    ) -> AppResult<MedicalRecord> {
        let mut entry = self
            .records
            .get_mut(record_id)
            .ok_or_else(|| record_not_found(record_id))?;

        let mut candidate = entry.clone();
        candidate.apply_snapshot(snapshot);
        candidate.updated_at = Timestamp::now();

        let receipt = self.ledger.on_record_updated(&candidate, actor_id)?;
        candidate.set_pointer(receipt.pointer());
        *entry = candidate.clone();

        tracing::info!(record_id, index = receipt.index, actor_id, "Medical record updated");
        Ok(candidate)
    }

    /// Delete a record after appending its `delete` block
    ///
    /// The record's slot stays locked from lookup to removal, so no update
    /// can land between the delete block and the removal.
    pub fn delete(&self, record_id: &str, actor_id: Option<&str>) -> AppResult<MedicalRecord> {
        let Entry::Occupied(entry) = self.records.entry(record_id) else {
            return Err(record_not_found(record_id));
        };
        let receipt = self.ledger.on_record_deleted(entry.get(), actor_id)?;
        let removed = entry.remove();

        tracing::info!(record_id, index = receipt.index, actor_id = ?actor_id, "Medical record deleted");
        Ok(removed)
    }
}

fn record_not_found(record_id: &str) -> AppError {
    AppError::with_message(ErrorCode::RecordNotFound, format!("Medical record {record_id} not found"))
        .with_detail("record_id", record_id)
}
