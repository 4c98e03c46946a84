//! Append engine
//!
//! 1. Validate the mutation and encode its payload
//! 2. Under the writer lock, read the chain head
//! 3. Bind `index` / `previous_hash`, hash
//! 4. Conditional write, re-reading the head on `IndexConflict`
//!
//! The writer lock serializes appends inside this process. The store's
//! conditional write covers writers that do not share the lock (a second
//! engine on the same store).

use std::sync::Arc;

use parking_lot::Mutex;
use shared::models::{Block, GENESIS_PREVIOUS_HASH};
use shared::types::Timestamp;

use super::canonical;
use super::hasher;
use super::storage::{BlockStore, StorageError, next_index};
use super::types::{AppendReceipt, LedgerError, LedgerResult, MutationDescriptor};

pub struct AppendEngine {
    store: Arc<dyn BlockStore>,
    /// 序列化所有 append 操作，防止 read-modify-write 竞争
    write_lock: Mutex<()>,
    max_retries: u32,
    skew_tolerance_ms: i64,
}

impl AppendEngine {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
            max_retries: Self::DEFAULT_MAX_RETRIES,
            skew_tolerance_ms: 0,
        }
    }

    /// Conditional-write retries before giving up
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// How far ahead of the wall clock a head timestamp may be and still be inherited
    pub fn with_skew_tolerance(mut self, ms: i64) -> Self {
        self.skew_tolerance_ms = ms.max(0);
        self
    }

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    /// Append one block describing `descriptor`
    ///
    /// Returns only after the block is durably stored. On any error nothing
    /// was written and the caller must not update the record pointer.
    pub fn append(&self, descriptor: MutationDescriptor) -> LedgerResult<AppendReceipt> {
        let payload = descriptor.into_payload()?;
        let canonical_payload = canonical::encode(&payload)?;

        let _guard = self.write_lock.lock();

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let latest = self.store.latest()?;
            let index = next_index(latest.as_ref());
            let previous_hash = latest
                .as_ref()
                .map(|b| b.hash.clone())
                .unwrap_or_else(|| GENESIS_PREVIOUS_HASH.to_string());

            let timestamp = self.stamp(latest.as_ref(), index);

            let hash =
                hasher::compute_block_hash(index, timestamp, &canonical_payload, &previous_hash)?;
            let block = Block {
                index,
                timestamp,
                payload: payload.clone(),
                previous_hash,
                hash,
            };

            match self.store.append(&block) {
                Ok(()) => {
                    tracing::info!(
                        index = block.index,
                        hash = %block.hash,
                        action = ?block.action(),
                        record_id = ?block.payload.record_id(),
                        "Ledger block appended"
                    );
                    return Ok(AppendReceipt {
                        index: block.index,
                        hash: block.hash,
                        timestamp: block.timestamp,
                    });
                }
                Err(StorageError::IndexConflict { expected, actual }) => {
                    if attempt > self.max_retries {
                        tracing::error!(attempts = attempt, "Ledger append retries exhausted");
                        return Err(LedgerError::RetriesExhausted { attempts: attempt });
                    }
                    tracing::warn!(
                        attempt,
                        expected,
                        actual,
                        "Ledger head moved during append, retrying"
                    );
                }
                Err(StorageError::DuplicateHash {
                    hash,
                    existing_index,
                }) => {
                    tracing::error!(
                        index = block.index,
                        hash = %hash,
                        existing_index,
                        "Block hash already present in ledger"
                    );
                    return Err(LedgerError::HashCollision {
                        hash,
                        existing_index,
                    });
                }
                Err(e) => {
                    tracing::error!(index = block.index, error = %e, "Ledger append failed");
                    return Err(e.into());
                }
            }
        }
    }

    /// Timestamp for the block at `index`
    ///
    /// A head ahead of the wall clock by no more than the skew tolerance is
    /// inherited, keeping timestamps non-decreasing. A head further ahead is
    /// already a `future_timestamp` finding and is not copied forward.
    fn stamp(&self, head: Option<&Block>, index: u64) -> Timestamp {
        let now = Timestamp::now();
        let Some(head) = head.filter(|h| h.timestamp > now) else {
            return now;
        };

        let ahead_ms = head.timestamp.millis_since(now);
        if ahead_ms <= self.skew_tolerance_ms {
            tracing::debug!(index, ahead_ms, "Wall clock behind ledger head, reusing head timestamp");
            head.timestamp
        } else {
            tracing::warn!(
                index,
                head_index = head.index,
                ahead_ms,
                tolerance_ms = self.skew_tolerance_ms,
                "Ledger head is stamped in the future, not inheriting its timestamp"
            );
            now
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory_store::MemoryBlockStore;
    use crate::ledger::storage::StorageResult;
    use shared::models::{LedgerPointer, MedicalRecord, RecordSnapshot};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn record(id: &str) -> MedicalRecord {
        MedicalRecord::new(id, "patient:P", "doctor:D", RecordSnapshot::new("flu"))
    }

    /// Rejects the first `conflicts` appends as if another writer won
    struct ContendedStore {
        inner: MemoryBlockStore,
        conflicts: AtomicU32,
    }

    impl BlockStore for ContendedStore {
        fn latest(&self) -> StorageResult<Option<Block>> {
            self.inner.latest()
        }
        fn get(&self, index: u64) -> StorageResult<Option<Block>> {
            self.inner.get(index)
        }
        fn len(&self) -> StorageResult<u64> {
            self.inner.len()
        }
        fn range(&self, start: u64, end: u64) -> StorageResult<Vec<Block>> {
            self.inner.range(start, end)
        }
        fn all(&self) -> StorageResult<Vec<Block>> {
            self.inner.all()
        }
        fn blocks_for_record(&self, record_id: &str) -> StorageResult<Vec<Block>> {
            self.inner.blocks_for_record(record_id)
        }
        fn blocks_for_patient(&self, patient_id: &str) -> StorageResult<Vec<Block>> {
            self.inner.blocks_for_patient(patient_id)
        }
        fn record_head(&self, record_id: &str) -> StorageResult<Option<LedgerPointer>> {
            self.inner.record_head(record_id)
        }
        fn record_heads(&self) -> StorageResult<Vec<(String, LedgerPointer)>> {
            self.inner.record_heads()
        }
        fn append(&self, block: &Block) -> StorageResult<()> {
            if self
                .conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StorageError::IndexConflict {
                    expected: block.index + 1,
                    actual: block.index,
                });
            }
            self.inner.append(block)
        }
    }

    #[test]
    fn test_genesis_and_links() {
        let store = Arc::new(MemoryBlockStore::new());
        let engine = AppendEngine::new(store.clone());

        let first = engine.append(MutationDescriptor::create(&record("r1"))).unwrap();
        let second = engine
            .append(MutationDescriptor::update(&record("r1"), "doctor:A"))
            .unwrap();

        assert_eq!(first.index, 0);
        assert_eq!(second.index, 1);
        assert!(second.timestamp >= first.timestamp);

        let genesis = store.get(0).unwrap().unwrap();
        assert_eq!(genesis.previous_hash, GENESIS_PREVIOUS_HASH);
        assert_eq!(genesis.hash, first.hash);
        assert_eq!(hasher::recompute(&genesis).unwrap(), genesis.hash);

        let next = store.get(1).unwrap().unwrap();
        assert_eq!(next.previous_hash, first.hash);
    }

    #[test]
    fn test_invalid_mutation_writes_nothing() {
        let store = Arc::new(MemoryBlockStore::new());
        let engine = AppendEngine::new(store.clone());

        let mut descriptor = MutationDescriptor::update(&record("r1"), "doctor:A");
        descriptor.actor_id = None;
        assert!(matches!(
            engine.append(descriptor),
            Err(LedgerError::MissingActor(_))
        ));
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_retries_after_index_conflict() {
        let store = Arc::new(ContendedStore {
            inner: MemoryBlockStore::new(),
            conflicts: AtomicU32::new(2),
        });
        let engine = AppendEngine::new(store.clone());

        let receipt = engine.append(MutationDescriptor::create(&record("r1"))).unwrap();
        assert_eq!(receipt.index, 0);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let store = Arc::new(ContendedStore {
            inner: MemoryBlockStore::new(),
            conflicts: AtomicU32::new(10),
        });
        let engine = AppendEngine::new(store.clone()).with_max_retries(2);

        let err = engine
            .append(MutationDescriptor::create(&record("r1")))
            .unwrap_err();
        assert!(matches!(err, LedgerError::RetriesExhausted { attempts: 3 }));
        assert!(store.is_empty().unwrap());
    }

    /// Appends a head stamped `ahead_ms` past the wall clock at index 1
    fn future_head(store: &MemoryBlockStore, ahead_ms: i64) -> Block {
        let mut head = store.get(0).unwrap().unwrap();
        head.index = 1;
        head.timestamp = Timestamp::from_millis(Timestamp::now().as_millis() + ahead_ms);
        head.hash = "f".repeat(64);
        store.append(&head).unwrap();
        head
    }

    #[test]
    fn test_head_within_tolerance_is_inherited() {
        let store = Arc::new(MemoryBlockStore::new());
        let engine = AppendEngine::new(store.clone()).with_skew_tolerance(120_000);
        engine.append(MutationDescriptor::create(&record("r1"))).unwrap();

        let head = future_head(&store, 60_000);
        let receipt = engine.append(MutationDescriptor::create(&record("r2"))).unwrap();
        assert_eq!(receipt.index, 2);
        assert_eq!(receipt.timestamp, head.timestamp);
    }

    #[test]
    fn test_future_head_is_not_inherited() {
        let store = Arc::new(MemoryBlockStore::new());
        let engine = AppendEngine::new(store.clone());
        engine.append(MutationDescriptor::create(&record("r1"))).unwrap();

        let head = future_head(&store, 3_600_000);
        let receipt = engine.append(MutationDescriptor::create(&record("r2"))).unwrap();
        let after = Timestamp::now();

        assert_eq!(receipt.index, 2);
        assert!(receipt.timestamp < head.timestamp);
        assert!(receipt.timestamp <= after);
    }
}
