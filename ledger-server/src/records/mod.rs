//! Medical record lifecycle
//!
//! Stand-in for the record collaborator: keeps records in memory and drives
//! the ledger hooks on every mutation.

pub mod service;
pub mod store;

pub use service::RecordService;
pub use store::RecordStore;
