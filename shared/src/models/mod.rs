//! Data models
//!
//! Shared between the ledger core and the record lifecycle service.

pub mod ledger;
pub mod record;

// Re-exports
pub use ledger::*;
pub use record::*;
