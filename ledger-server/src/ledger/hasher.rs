//! Block digest
//!
//! `SHA256(decimal(index) \x00 canonical(timestamp) \x00 canonical(payload) \x00 previous_hash)`
//! rendered as lowercase hex.

use sha2::{Digest, Sha256};
use shared::models::Block;
use shared::types::Timestamp;

use super::canonical::{self, EncodeError};

/// Compute a block hash from its parts
pub fn compute_block_hash(
    index: u64,
    timestamp: Timestamp,
    canonical_payload: &[u8],
    previous_hash: &str,
) -> Result<String, EncodeError> {
    let timestamp_text = canonical::encode_timestamp(timestamp)?;

    let mut hasher = Sha256::new();
    hasher.update(index.to_string().as_bytes());
    hasher.update(b"\x00");
    hasher.update(timestamp_text.as_bytes());
    hasher.update(b"\x00");
    hasher.update(canonical_payload);
    hasher.update(b"\x00");
    hasher.update(previous_hash.as_bytes());

    Ok(hex::encode(hasher.finalize()))
}

/// Recompute the hash a stored block should carry
pub fn recompute(block: &Block) -> Result<String, EncodeError> {
    let payload = canonical::encode(&block.payload)?;
    compute_block_hash(block.index, block.timestamp, &payload, &block.previous_hash)
}
