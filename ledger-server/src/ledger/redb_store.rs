//! redb-backed ledger store
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `blocks` | `index` | JSON `Block` | Chain (append-only) |
//! | `block_hashes` | `hash` | `index` | Hash uniqueness |
//! | `record_heads` | `record_id` | JSON `LedgerPointer` | Latest block per record |
//! | `record_blocks` | `(record_id, index)` | `()` | Record history index |
//! | `patient_blocks` | `(patient_id, index)` | `()` | Patient history index |
//!
//! All five tables are written in one transaction per block, so a reader
//! never observes a block without its index entries.

use std::path::Path;
use std::sync::Arc;

use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition, WriteTransaction,
};
use shared::models::{Block, LedgerPointer};

use super::storage::{BlockStore, StorageError, StorageResult, StoredRow, decode_row};

/// key = block index, value = JSON-serialized Block
const BLOCKS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("blocks");

/// key = block hash, value = block index
const BLOCK_HASHES_TABLE: TableDefinition<&str, u64> = TableDefinition::new("block_hashes");

/// key = record_id, value = JSON-serialized LedgerPointer
const RECORD_HEADS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("record_heads");

/// key = (record_id, index), value = empty
const RECORD_BLOCKS_TABLE: TableDefinition<(&str, u64), ()> =
    TableDefinition::new("record_blocks");

/// key = (patient_id, index), value = empty
const PATIENT_BLOCKS_TABLE: TableDefinition<(&str, u64), ()> =
    TableDefinition::new("patient_blocks");

/// Ledger store backed by redb
#[derive(Clone)]
pub struct RedbBlockStore {
    db: Arc<Database>,
}

impl RedbBlockStore {
    /// Open or create the ledger database at the given path
    ///
    /// redb commits with `Durability::Immediate`: once [`BlockStore::append`]
    /// returns `Ok`, the block survives a crash.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(BLOCKS_TABLE)?;
            let _ = write_txn.open_table(BLOCK_HASHES_TABLE)?;
            let _ = write_txn.open_table(RECORD_HEADS_TABLE)?;
            let _ = write_txn.open_table(RECORD_BLOCKS_TABLE)?;
            let _ = write_txn.open_table(PATIENT_BLOCKS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    fn write_block(txn: &WriteTransaction, block: &Block) -> StorageResult<()> {
        let mut blocks = txn.open_table(BLOCKS_TABLE)?;
        let expected = blocks
            .last()?
            .map(|(key, _)| key.value() + 1)
            .unwrap_or(0);
        if block.index != expected {
            return Err(StorageError::IndexConflict {
                expected,
                actual: block.index,
            });
        }

        let mut hashes = txn.open_table(BLOCK_HASHES_TABLE)?;
        if let Some(existing) = hashes.get(block.hash.as_str())? {
            return Err(StorageError::DuplicateHash {
                hash: block.hash.clone(),
                existing_index: existing.value(),
            });
        }

        let value = serde_json::to_vec(block)?;
        blocks.insert(block.index, value.as_slice())?;
        hashes.insert(block.hash.as_str(), block.index)?;

        if let Some(record_id) = block.payload.record_id().filter(|id| !id.is_empty()) {
            let pointer = serde_json::to_vec(&block.pointer())?;
            txn.open_table(RECORD_HEADS_TABLE)?
                .insert(record_id, pointer.as_slice())?;
            txn.open_table(RECORD_BLOCKS_TABLE)?
                .insert((record_id, block.index), ())?;
        }
        if let Some(patient_id) = block.payload.patient_id().filter(|id| !id.is_empty()) {
            txn.open_table(PATIENT_BLOCKS_TABLE)?
                .insert((patient_id, block.index), ())?;
        }

        Ok(())
    }

    /// Resolve `(owner, index)` index entries into blocks
    fn indexed_blocks(
        txn: &ReadTransaction,
        table: TableDefinition<'static, (&'static str, u64), ()>,
        owner: &str,
    ) -> StorageResult<Vec<Block>> {
        let index_table = txn.open_table(table)?;
        let blocks = txn.open_table(BLOCKS_TABLE)?;

        let mut result = Vec::new();
        for entry in index_table.range((owner, 0u64)..=(owner, u64::MAX))? {
            let (key, _) = entry?;
            let (_, index) = key.value();
            let value = blocks.get(index)?.ok_or_else(|| {
                StorageError::Corrupted(format!(
                    "index entry ({owner}, {index}) names a block that does not exist"
                ))
            })?;
            result.push(serde_json::from_slice(value.value())?);
        }
        Ok(result)
    }

    /// Like [`Self::indexed_blocks`], decoding leniently
    ///
    /// Index entries whose block row is gone are skipped; the missing block
    /// surfaces through link and pointer checks instead.
    fn indexed_rows(
        txn: &ReadTransaction,
        table: TableDefinition<'static, (&'static str, u64), ()>,
        owner: &str,
    ) -> StorageResult<Vec<StoredRow>> {
        let index_table = txn.open_table(table)?;
        let blocks = txn.open_table(BLOCKS_TABLE)?;

        let mut result = Vec::new();
        for entry in index_table.range((owner, 0u64)..=(owner, u64::MAX))? {
            let (key, _) = entry?;
            let (_, index) = key.value();
            if let Some(value) = blocks.get(index)? {
                result.push(decode_row(index, value.value()));
            }
        }
        Ok(result)
    }
}

impl BlockStore for RedbBlockStore {
    fn latest(&self) -> StorageResult<Option<Block>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(BLOCKS_TABLE)?;
        match table.last()? {
            Some((_, value)) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn get(&self, index: u64) -> StorageResult<Option<Block>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(BLOCKS_TABLE)?;
        match table.get(index)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn len(&self) -> StorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(BLOCKS_TABLE)?;
        Ok(table.len()?)
    }

    fn range(&self, start: u64, end: u64) -> StorageResult<Vec<Block>> {
        if start > end {
            return Ok(Vec::new());
        }
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(BLOCKS_TABLE)?;

        let mut blocks = Vec::new();
        for result in table.range(start..=end)? {
            let (_key, value) = result?;
            blocks.push(serde_json::from_slice(value.value())?);
        }
        Ok(blocks)
    }

    fn all(&self) -> StorageResult<Vec<Block>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(BLOCKS_TABLE)?;

        let mut blocks = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            blocks.push(serde_json::from_slice(value.value())?);
        }
        Ok(blocks)
    }

    fn blocks_for_record(&self, record_id: &str) -> StorageResult<Vec<Block>> {
        let read_txn = self.db.begin_read()?;
        Self::indexed_blocks(&read_txn, RECORD_BLOCKS_TABLE, record_id)
    }

    fn blocks_for_patient(&self, patient_id: &str) -> StorageResult<Vec<Block>> {
        let read_txn = self.db.begin_read()?;
        Self::indexed_blocks(&read_txn, PATIENT_BLOCKS_TABLE, patient_id)
    }

    fn record_head(&self, record_id: &str) -> StorageResult<Option<LedgerPointer>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORD_HEADS_TABLE)?;
        match table.get(record_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    fn record_heads(&self) -> StorageResult<Vec<(String, LedgerPointer)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORD_HEADS_TABLE)?;

        let mut heads = Vec::new();
        for result in table.iter()? {
            let (key, value) = result?;
            heads.push((key.value().to_string(), serde_json::from_slice(value.value())?));
        }
        Ok(heads)
    }

    fn row(&self, index: u64) -> StorageResult<Option<StoredRow>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(BLOCKS_TABLE)?;
        Ok(table.get(index)?.map(|value| decode_row(index, value.value())))
    }

    fn rows(&self) -> StorageResult<Vec<StoredRow>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(BLOCKS_TABLE)?;

        let mut rows = Vec::new();
        for result in table.iter()? {
            let (key, value) = result?;
            rows.push(decode_row(key.value(), value.value()));
        }
        Ok(rows)
    }

    fn rows_for_record(&self, record_id: &str) -> StorageResult<Vec<StoredRow>> {
        let read_txn = self.db.begin_read()?;
        Self::indexed_rows(&read_txn, RECORD_BLOCKS_TABLE, record_id)
    }

    fn rows_for_patient(&self, patient_id: &str) -> StorageResult<Vec<StoredRow>> {
        let read_txn = self.db.begin_read()?;
        Self::indexed_rows(&read_txn, PATIENT_BLOCKS_TABLE, patient_id)
    }

    fn append(&self, block: &Block) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        match Self::write_block(&txn, block) {
            Ok(()) => {
                txn.commit()?;
                Ok(())
            }
            Err(e) => {
                txn.abort()?;
                Err(e)
            }
        }
    }
}
