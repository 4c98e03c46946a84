//! In-memory ledger store
//!
//! Same contract as the redb store, kept entirely in process. Used for
//! tests and for running the core without a data directory.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::RwLock;
use shared::models::{Block, LedgerPointer};

use super::storage::{BlockStore, StorageError, StorageResult, next_index};

#[derive(Default)]
struct Inner {
    blocks: Vec<Block>,
    hashes: HashMap<String, u64>,
    record_heads: HashMap<String, LedgerPointer>,
    record_blocks: BTreeMap<String, BTreeSet<u64>>,
    patient_blocks: BTreeMap<String, BTreeSet<u64>>,
}

impl Inner {
    fn collect(&self, indices: Option<&BTreeSet<u64>>) -> Vec<Block> {
        indices
            .into_iter()
            .flatten()
            .filter_map(|i| self.blocks.get(*i as usize).cloned())
            .collect()
    }
}

#[derive(Default)]
pub struct MemoryBlockStore {
    inner: RwLock<Inner>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockStore for MemoryBlockStore {
    fn latest(&self) -> StorageResult<Option<Block>> {
        Ok(self.inner.read().blocks.last().cloned())
    }

    fn get(&self, index: u64) -> StorageResult<Option<Block>> {
        Ok(self.inner.read().blocks.get(index as usize).cloned())
    }

    fn len(&self) -> StorageResult<u64> {
        Ok(self.inner.read().blocks.len() as u64)
    }

    fn range(&self, start: u64, end: u64) -> StorageResult<Vec<Block>> {
        Ok(self
            .inner
            .read()
            .blocks
            .iter()
            .filter(|b| b.index >= start && b.index <= end)
            .cloned()
            .collect())
    }

    fn all(&self) -> StorageResult<Vec<Block>> {
        Ok(self.inner.read().blocks.clone())
    }

    fn blocks_for_record(&self, record_id: &str) -> StorageResult<Vec<Block>> {
        let inner = self.inner.read();
        Ok(inner.collect(inner.record_blocks.get(record_id)))
    }

    fn blocks_for_patient(&self, patient_id: &str) -> StorageResult<Vec<Block>> {
        let inner = self.inner.read();
        Ok(inner.collect(inner.patient_blocks.get(patient_id)))
    }

    fn record_head(&self, record_id: &str) -> StorageResult<Option<LedgerPointer>> {
        Ok(self.inner.read().record_heads.get(record_id).cloned())
    }

    fn record_heads(&self) -> StorageResult<Vec<(String, LedgerPointer)>> {
        let mut heads: Vec<(String, LedgerPointer)> = self
            .inner
            .read()
            .record_heads
            .iter()
            .map(|(id, pointer)| (id.clone(), pointer.clone()))
            .collect();
        heads.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(heads)
    }

    fn append(&self, block: &Block) -> StorageResult<()> {
        let mut inner = self.inner.write();

        let expected = next_index(inner.blocks.last());
        if block.index != expected {
            return Err(StorageError::IndexConflict {
                expected,
                actual: block.index,
            });
        }
        if let Some(&existing_index) = inner.hashes.get(&block.hash) {
            return Err(StorageError::DuplicateHash {
                hash: block.hash.clone(),
                existing_index,
            });
        }

        inner.hashes.insert(block.hash.clone(), block.index);
        if let Some(record_id) = block.payload.record_id().filter(|id| !id.is_empty()) {
            inner
                .record_heads
                .insert(record_id.to_string(), block.pointer());
            inner
                .record_blocks
                .entry(record_id.to_string())
                .or_default()
                .insert(block.index);
        }
        if let Some(patient_id) = block.payload.patient_id().filter(|id| !id.is_empty()) {
            inner
                .patient_blocks
                .entry(patient_id.to_string())
                .or_default()
                .insert(block.index);
        }
        inner.blocks.push(block.clone());
        Ok(())
    }
}
