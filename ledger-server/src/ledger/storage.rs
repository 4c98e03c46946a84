//! Ledger store contract
//!
//! Append-only: no update or delete operation exists. The only write is
//! [`BlockStore::append`], which is conditional on the block taking the next
//! free index and carrying a hash the store has never seen. Secondary
//! indexes (record heads, record/patient block lists, hash uniqueness) are
//! maintained inside the same atomic write.

use shared::error::{AppError, ErrorCode};
use shared::models::{Block, LedgerPointer};
use shared::types::Timestamp;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Block index is not the next free slot (another writer got there first)
    #[error("Index conflict: expected next index {expected}, got {actual}")]
    IndexConflict { expected: u64, actual: u64 },

    #[error("Duplicate block hash {hash} (already stored at index {existing_index})")]
    DuplicateHash { hash: String, existing_index: u64 },

    #[error("Corrupted ledger: {0}")]
    Corrupted(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// One persisted row as read back for verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredRow {
    Block(Block),
    Undecodable(UndecodableRow),
}

impl StoredRow {
    pub fn index(&self) -> u64 {
        match self {
            Self::Block(block) => block.index,
            Self::Undecodable(row) => row.index,
        }
    }

    pub fn block(&self) -> Option<&Block> {
        match self {
            Self::Block(block) => Some(block),
            Self::Undecodable(_) => None,
        }
    }

    /// Decoded block, or [`StorageError::Corrupted`]
    pub fn into_block(self) -> StorageResult<Block> {
        match self {
            Self::Block(block) => Ok(block),
            Self::Undecodable(row) => Err(StorageError::Corrupted(format!(
                "block {} cannot be decoded: {}",
                row.index, row.error
            ))),
        }
    }
}

/// Row whose bytes no longer decode into a [`Block`]
///
/// Whatever still parses out of the raw JSON is kept so the row can be
/// reported and its successor link-checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndecodableRow {
    pub index: u64,
    pub error: String,
    pub hash: Option<String>,
    pub timestamp: Option<Timestamp>,
    pub record_id: Option<String>,
}

impl UndecodableRow {
    pub fn salvage(index: u64, bytes: &[u8], error: impl std::fmt::Display) -> Self {
        let value = serde_json::from_slice::<serde_json::Value>(bytes).ok();
        let text = |pointer: &str| {
            value
                .as_ref()
                .and_then(|v| v.pointer(pointer))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        let timestamp = value
            .as_ref()
            .and_then(|v| v.get("timestamp"))
            .and_then(|v| serde_json::from_value::<Timestamp>(v.clone()).ok());

        Self {
            index,
            error: error.to_string(),
            hash: text("/hash"),
            timestamp,
            record_id: text("/payload/record_id").filter(|id| !id.is_empty()),
        }
    }
}

/// Decode one stored block row, keeping undecodable bytes as a finding
pub(crate) fn decode_row(index: u64, bytes: &[u8]) -> StoredRow {
    match serde_json::from_slice::<Block>(bytes) {
        Ok(block) => StoredRow::Block(block),
        Err(e) => StoredRow::Undecodable(UndecodableRow::salvage(index, bytes, e)),
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match &err {
            StorageError::IndexConflict { expected, actual } => {
                AppError::with_message(ErrorCode::IndexConflict, err.to_string())
                    .with_detail("expected", *expected)
                    .with_detail("actual", *actual)
            }
            StorageError::DuplicateHash {
                hash,
                existing_index,
            } => AppError::with_message(ErrorCode::HashCollision, err.to_string())
                .with_detail("hash", hash.clone())
                .with_detail("existing_index", *existing_index),
            StorageError::Corrupted(_) => {
                AppError::with_message(ErrorCode::StorageCorrupted, err.to_string())
            }
            StorageError::Storage(redb::StorageError::Io(io))
                if io.kind() == std::io::ErrorKind::StorageFull =>
            {
                AppError::with_message(ErrorCode::StorageFull, err.to_string())
            }
            _ => AppError::database(err.to_string()),
        }
    }
}

/// Append-only block store
///
/// Implementations return blocks ordered by ascending index.
pub trait BlockStore: Send + Sync {
    /// Block with the highest index, if any
    fn latest(&self) -> StorageResult<Option<Block>>;

    fn get(&self, index: u64) -> StorageResult<Option<Block>>;

    /// Number of stored blocks
    fn len(&self) -> StorageResult<u64>;

    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Blocks with `start <= index <= end`
    fn range(&self, start: u64, end: u64) -> StorageResult<Vec<Block>>;

    fn all(&self) -> StorageResult<Vec<Block>>;

    fn blocks_for_record(&self, record_id: &str) -> StorageResult<Vec<Block>>;

    fn blocks_for_patient(&self, patient_id: &str) -> StorageResult<Vec<Block>>;

    /// Blocks whose timestamp lies in `[from, to]`
    fn blocks_between(&self, from: Timestamp, to: Timestamp) -> StorageResult<Vec<Block>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|b| b.timestamp >= from && b.timestamp <= to)
            .collect())
    }

    /// Pointer to the latest block that references `record_id`
    fn record_head(&self, record_id: &str) -> StorageResult<Option<LedgerPointer>>;

    /// Every `record_id → latest block` entry, ordered by record id
    fn record_heads(&self) -> StorageResult<Vec<(String, LedgerPointer)>>;

    // ========== Verification reads ==========
    //
    // Same selections as above, but a row that no longer decodes comes back
    // as [`StoredRow::Undecodable`] instead of failing the read. Stores that
    // hold decoded blocks only can rely on the defaults.

    fn row(&self, index: u64) -> StorageResult<Option<StoredRow>> {
        Ok(self.get(index)?.map(StoredRow::Block))
    }

    fn rows(&self) -> StorageResult<Vec<StoredRow>> {
        Ok(self.all()?.into_iter().map(StoredRow::Block).collect())
    }

    fn rows_for_record(&self, record_id: &str) -> StorageResult<Vec<StoredRow>> {
        Ok(self
            .blocks_for_record(record_id)?
            .into_iter()
            .map(StoredRow::Block)
            .collect())
    }

    fn rows_for_patient(&self, patient_id: &str) -> StorageResult<Vec<StoredRow>> {
        Ok(self
            .blocks_for_patient(patient_id)?
            .into_iter()
            .map(StoredRow::Block)
            .collect())
    }

    /// Rows stamped in `[from, to]`
    ///
    /// An undecodable row whose timestamp is lost is included when its index
    /// falls between the first and last in-window block.
    fn rows_between(&self, from: Timestamp, to: Timestamp) -> StorageResult<Vec<StoredRow>> {
        let rows = self.rows()?;
        let in_window = |ts: Timestamp| ts >= from && ts <= to;

        let window_indices: Vec<u64> = rows
            .iter()
            .filter_map(|r| r.block())
            .filter(|b| in_window(b.timestamp))
            .map(|b| b.index)
            .collect();
        let bounds = window_indices.first().copied().zip(window_indices.last().copied());

        Ok(rows
            .into_iter()
            .filter(|row| match row {
                StoredRow::Block(block) => in_window(block.timestamp),
                StoredRow::Undecodable(r) => match r.timestamp {
                    Some(ts) => in_window(ts),
                    None => bounds.is_some_and(|(lo, hi)| r.index > lo && r.index < hi),
                },
            })
            .collect())
    }

    /// Persist `block` if `block.index` is the next free index
    ///
    /// Fails with [`StorageError::IndexConflict`] when another block already
    /// took that slot and [`StorageError::DuplicateHash`] when the hash is
    /// already present. Nothing is written on failure.
    fn append(&self, block: &Block) -> StorageResult<()>;
}

/// Next free index given the current latest block
pub(crate) fn next_index(latest: Option<&Block>) -> u64 {
    latest.map(|b| b.index + 1).unwrap_or(0)
}
