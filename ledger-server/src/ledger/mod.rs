//! Tamper-evident audit ledger
//!
//! Append-only SHA-256 hash chain attesting every create / update / delete of
//! a medical record.
//!
//! # Architecture
//!
//! ```text
//! record mutation ─→ AppendEngine ─→ canonical::encode ─→ hasher ─→ BlockStore::append
//!                                                                        │
//! verify_chain(scope) ─→ ChainVerifier ─→ CrossReferenceChecker ─→ VerificationReport
//! ```
//!
//! - [`canonical`]: byte-stable payload encoding (`ledger-canonical/v1`)
//! - [`hasher`]: block digest
//! - [`storage`]: store contract, [`redb_store`] and [`memory_store`] adapters
//! - [`append`]: index assignment and linkage under concurrent writers
//! - [`verifier`]: hash / link / order / schema / clock checks, undecodable rows
//! - [`cross_ref`]: record pointer vs. latest block
//! - [`report`]: statistics
//! - [`service`]: façade used by the record lifecycle

pub mod append;
pub mod canonical;
pub mod cross_ref;
pub mod hasher;
pub mod history;
pub mod memory_store;
pub mod redb_store;
pub mod report;
pub mod service;
pub mod storage;
pub mod types;
pub mod verifier;
pub mod verify_scheduler;

pub use append::AppendEngine;
pub use cross_ref::{CrossReferenceChecker, RecordLookup};
pub use history::{FieldChange, HistoryEntry};
pub use memory_store::MemoryBlockStore;
pub use redb_store::RedbBlockStore;
pub use report::VerificationReport;
pub use service::LedgerService;
pub use storage::{BlockStore, StorageError, StorageResult, StoredRow, UndecodableRow};
pub use types::{
    AppendReceipt, BlockIssue, BlockVerification, ChainVerification, IssueKind, LedgerError,
    LedgerResult, MutationDescriptor, Severity, VerifyScope,
};
pub use verifier::ChainVerifier;
pub use verify_scheduler::VerifyScheduler;
