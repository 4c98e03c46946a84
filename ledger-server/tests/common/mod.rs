//! Shared fixtures for ledger integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ledger_server::ledger::{BlockStore, MemoryBlockStore, StorageError, StorageResult};
use ledger_server::{Config, LedgerState};
use parking_lot::RwLock;
use shared::models::{Block, LedgerPointer};

/// Store whose persisted blocks can be rewritten behind the ledger's back
///
/// Secondary indexes and record heads keep what they recorded at append
/// time, the way an attacker editing block rows directly would leave them.
#[derive(Default)]
pub struct TamperableStore {
    inner: MemoryBlockStore,
    /// `None` marks a deleted row
    overrides: RwLock<HashMap<u64, Option<Block>>>,
}

impl TamperableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite the stored row at `index`
    pub fn tamper(&self, index: u64, edit: impl FnOnce(&mut Block)) {
        let mut block = self
            .get(index)
            .unwrap()
            .unwrap_or_else(|| panic!("no block at index {index}"));
        edit(&mut block);
        self.overrides.write().insert(index, Some(block));
    }

    /// Delete the stored row at `index`
    pub fn remove(&self, index: u64) {
        self.overrides.write().insert(index, None);
    }

    fn patch(&self, blocks: Vec<Block>) -> Vec<Block> {
        let overrides = self.overrides.read();
        blocks
            .into_iter()
            .filter_map(|b| match overrides.get(&b.index) {
                Some(patched) => patched.clone(),
                None => Some(b),
            })
            .collect()
    }
}

impl BlockStore for TamperableStore {
    fn latest(&self) -> StorageResult<Option<Block>> {
        Ok(self.all()?.pop())
    }
    fn get(&self, index: u64) -> StorageResult<Option<Block>> {
        if let Some(patched) = self.overrides.read().get(&index) {
            return Ok(patched.clone());
        }
        self.inner.get(index)
    }
    fn len(&self) -> StorageResult<u64> {
        Ok(self.all()?.len() as u64)
    }
    fn range(&self, start: u64, end: u64) -> StorageResult<Vec<Block>> {
        Ok(self.patch(self.inner.range(start, end)?))
    }
    fn all(&self) -> StorageResult<Vec<Block>> {
        Ok(self.patch(self.inner.all()?))
    }
    fn blocks_for_record(&self, record_id: &str) -> StorageResult<Vec<Block>> {
        Ok(self.patch(self.inner.blocks_for_record(record_id)?))
    }
    fn blocks_for_patient(&self, patient_id: &str) -> StorageResult<Vec<Block>> {
        Ok(self.patch(self.inner.blocks_for_patient(patient_id)?))
    }
    fn record_head(&self, record_id: &str) -> StorageResult<Option<LedgerPointer>> {
        self.inner.record_head(record_id)
    }
    fn record_heads(&self) -> StorageResult<Vec<(String, LedgerPointer)>> {
        self.inner.record_heads()
    }
    fn append(&self, block: &Block) -> StorageResult<()> {
        self.inner.append(block)
    }
}

/// Store that can be switched into failing reads or writes
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryBlockStore,
    fail_appends: AtomicBool,
    fail_reads: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_read(&self) -> StorageResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("read failed: device unavailable".into()));
        }
        Ok(())
    }
}

impl BlockStore for FlakyStore {
    fn latest(&self) -> StorageResult<Option<Block>> {
        self.check_read()?;
        self.inner.latest()
    }
    fn get(&self, index: u64) -> StorageResult<Option<Block>> {
        self.check_read()?;
        self.inner.get(index)
    }
    fn len(&self) -> StorageResult<u64> {
        self.check_read()?;
        self.inner.len()
    }
    fn range(&self, start: u64, end: u64) -> StorageResult<Vec<Block>> {
        self.check_read()?;
        self.inner.range(start, end)
    }
    fn all(&self) -> StorageResult<Vec<Block>> {
        self.check_read()?;
        self.inner.all()
    }
    fn blocks_for_record(&self, record_id: &str) -> StorageResult<Vec<Block>> {
        self.check_read()?;
        self.inner.blocks_for_record(record_id)
    }
    fn blocks_for_patient(&self, patient_id: &str) -> StorageResult<Vec<Block>> {
        self.check_read()?;
        self.inner.blocks_for_patient(patient_id)
    }
    fn record_head(&self, record_id: &str) -> StorageResult<Option<LedgerPointer>> {
        self.check_read()?;
        self.inner.record_head(record_id)
    }
    fn record_heads(&self) -> StorageResult<Vec<(String, LedgerPointer)>> {
        self.check_read()?;
        self.inner.record_heads()
    }
    fn append(&self, block: &Block) -> StorageResult<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("write failed: disk full".into()));
        }
        self.inner.append(block)
    }
}

pub fn test_config() -> Config {
    let mut config = Config::with_work_dir(std::env::temp_dir().to_string_lossy());
    config.clock_skew_tolerance_ms = 0;
    config.append_max_retries = 3;
    config
}

/// Full state over an arbitrary store
pub fn state_with<S: BlockStore + 'static>(store: Arc<S>) -> LedgerState {
    LedgerState::with_store(&test_config(), store)
}

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
