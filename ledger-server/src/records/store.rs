//! In-process record store
//!
//! 使用 DashMap 实现无锁并发的记录存储。

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;
use shared::error::AppResult;
use shared::models::{LedgerPointer, MedicalRecord};

use crate::ledger::RecordLookup;

#[derive(Debug, Default)]
pub struct RecordStore {
    records: DashMap<String, MedicalRecord>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, record_id: &str) -> Option<MedicalRecord> {
        self.records.get(record_id).map(|r| r.clone())
    }

    /// Exclusive handle on one record, held across its ledger append
    pub(crate) fn get_mut(&self, record_id: &str) -> Option<RefMut<'_, String, MedicalRecord>> {
        self.records.get_mut(record_id)
    }

    /// Shard-locked slot for one record, held from check to removal
    pub(crate) fn entry(&self, record_id: &str) -> Entry<'_, String, MedicalRecord> {
        self.records.entry(record_id.to_string())
    }

    pub fn insert(&self, record: MedicalRecord) {
        self.records.insert(record.id.clone(), record);
    }

    pub fn remove(&self, record_id: &str) -> Option<MedicalRecord> {
        self.records.remove(record_id).map(|(_, r)| r)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records of one patient, ordered by creation time
    pub fn for_patient(&self, patient_id: &str) -> Vec<MedicalRecord> {
        let mut records: Vec<MedicalRecord> = self
            .records
            .iter()
            .filter(|r| r.patient_id == patient_id)
            .map(|r| r.clone())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }
}

impl RecordLookup for RecordStore {
    fn find_record(&self, record_id: &str) -> AppResult<Option<MedicalRecord>> {
        Ok(self.get(record_id))
    }

    fn ledgered_records(&self) -> AppResult<Vec<(String, LedgerPointer)>> {
        let mut pointers: Vec<(String, LedgerPointer)> = self
            .records
            .iter()
            .filter_map(|r| r.pointer().map(|p| (r.id.clone(), p)))
            .collect();
        pointers.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(pointers)
    }
}
