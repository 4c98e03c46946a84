//! Chain verifier
//!
//! Pure walk over the blocks of one scope. Storage access and
//! cross-referencing happen in the caller; this module only judges the
//! blocks it is handed.
//!
//! Per block:
//!
//! | Check | Finding |
//! |-------|---------|
//! | recomputed hash | `hash_mismatch` |
//! | genesis sentinel | `invalid_genesis` |
//! | row decodes at all | `undecodable_block` |
//! | link to `index - 1` | `broken_link` / `previous_hash_mismatch` / `missing_predecessor` |
//! | full-chain sequence | `order_violation` |
//! | payload shape | `schema_violation` |
//! | clock | `future_timestamp` |

use std::collections::{BTreeMap, HashMap};

use shared::models::{Block, BlockPayload, GENESIS_PREVIOUS_HASH};
use shared::types::Timestamp;

use super::hasher;
use super::storage::{StoredRow, UndecodableRow};
use super::types::{BlockIssue, BlockVerification, IssueKind, VerifyScope};

pub struct ChainVerifier {
    verified_at: Timestamp,
    skew_tolerance_ms: i64,
}

impl ChainVerifier {
    pub fn new(verified_at: Timestamp) -> Self {
        Self {
            verified_at,
            skew_tolerance_ms: 0,
        }
    }

    /// Accept timestamps up to `ms` past the verification instant
    pub fn with_skew_tolerance(mut self, ms: i64) -> Self {
        self.skew_tolerance_ms = ms.max(0);
        self
    }

    pub fn verified_at(&self) -> Timestamp {
        self.verified_at
    }

    /// Verify `blocks` (in stored order)
    ///
    /// `predecessors` holds the global `index - 1` block for every block in
    /// scope whose predecessor is not itself in scope. A predecessor missing
    /// from both is reported as `missing_predecessor`.
    pub fn verify(
        &self,
        scope: &VerifyScope,
        blocks: &[Block],
        predecessors: &BTreeMap<u64, Block>,
    ) -> Vec<BlockVerification> {
        let rows: Vec<StoredRow> = blocks.iter().cloned().map(StoredRow::Block).collect();
        let predecessors = predecessors
            .iter()
            .map(|(index, block)| (*index, StoredRow::Block(block.clone())))
            .collect();
        self.verify_rows(scope, &rows, &predecessors)
    }

    /// Verify stored rows, some of which may no longer decode
    ///
    /// An undecodable row is one `undecodable_block` finding. Its successor
    /// is still link-checked against whatever hash could be salvaged.
    pub fn verify_rows(
        &self,
        scope: &VerifyScope,
        rows: &[StoredRow],
        predecessors: &BTreeMap<u64, StoredRow>,
    ) -> Vec<BlockVerification> {
        let mut by_index: HashMap<u64, &StoredRow> = HashMap::with_capacity(rows.len());
        for row in rows {
            by_index.entry(row.index()).or_insert(row);
        }

        let mut recomputed: HashMap<u64, Option<String>> = HashMap::new();
        let mut previous_index: Option<u64> = None;
        let mut results = Vec::with_capacity(rows.len());

        for row in rows {
            let index = row.index();
            let mut result = match row {
                StoredRow::Block(block) => {
                    self.check_block(block, &by_index, predecessors, &mut recomputed)
                }
                StoredRow::Undecodable(undecodable) => BlockVerification {
                    index,
                    hash: undecodable.hash.clone().unwrap_or_default(),
                    action: None,
                    record_id: undecodable.record_id.clone(),
                    timestamp: undecodable.timestamp,
                    issues: vec![BlockIssue::new(
                        IssueKind::UndecodableBlock,
                        format!("Stored row cannot be decoded: {}", undecodable.error),
                    )],
                },
            };

            // full chain only
            if scope.is_full() {
                let expected = previous_index.map(|i| i.saturating_add(1)).unwrap_or(0);
                if index != expected {
                    let message = match previous_index {
                        None => "Chain does not start at index 0".to_string(),
                        Some(prev) if index <= prev => {
                            format!("Index {index} does not advance past {prev}")
                        }
                        Some(_) => format!("Gap before index {index}"),
                    };
                    result.issues.push(
                        BlockIssue::new(IssueKind::OrderViolation, message)
                            .with_values(expected.to_string(), index.to_string()),
                    );
                }
                previous_index = Some(index);
            }

            results.push(result);
        }

        results
    }

    fn check_block(
        &self,
        block: &Block,
        in_scope: &HashMap<u64, &StoredRow>,
        predecessors: &BTreeMap<u64, StoredRow>,
        recomputed: &mut HashMap<u64, Option<String>>,
    ) -> BlockVerification {
        let mut issues = Vec::new();

        // 1. hash
        let own = hasher::recompute(block).ok();
        match &own {
            Some(hash) if *hash == block.hash => {}
            Some(hash) => issues.push(
                BlockIssue::new(IssueKind::HashMismatch, "Stored hash does not match block contents")
                    .with_values(hash.clone(), block.hash.clone()),
            ),
            None => issues.push(BlockIssue::new(
                IssueKind::HashMismatch,
                "Payload cannot be canonicalized, hash cannot be reproduced",
            )),
        }

        // 2. genesis / link
        if block.index == 0 {
            if block.previous_hash != GENESIS_PREVIOUS_HASH {
                issues.push(
                    BlockIssue::new(IssueKind::InvalidGenesis, "Genesis block does not carry the sentinel previous hash")
                        .with_values(GENESIS_PREVIOUS_HASH, block.previous_hash.clone()),
                );
            }
        } else {
            let predecessor_index = block.index - 1;
            let predecessor = in_scope
                .get(&predecessor_index)
                .copied()
                .or_else(|| predecessors.get(&predecessor_index));
            let issue = match predecessor {
                None => Some(BlockIssue::new(
                    IssueKind::MissingPredecessor,
                    format!("Block {predecessor_index} is not in the ledger"),
                )),
                Some(StoredRow::Block(prev)) => {
                    let prev_recomputed = recomputed
                        .entry(predecessor_index)
                        .or_insert_with(|| hasher::recompute(prev).ok());
                    link_issue(block, prev, prev_recomputed.as_deref())
                }
                Some(StoredRow::Undecodable(prev)) => salvaged_link_issue(block, prev),
            };
            issues.extend(issue);
        }

        // 3. schema
        issues.extend(schema_issues(&block.payload));

        // 4. clock
        let limit = self
            .verified_at
            .as_millis()
            .saturating_add(self.skew_tolerance_ms);
        if block.timestamp.as_millis() > limit {
            issues.push(
                BlockIssue::new(IssueKind::FutureTimestamp, "Block is stamped after verification time")
                    .with_values(self.verified_at.to_string(), block.timestamp.to_string()),
            );
        }

        recomputed.entry(block.index).or_insert(own);

        BlockVerification {
            index: block.index,
            hash: block.hash.clone(),
            action: block.action(),
            record_id: block
                .payload
                .record_id()
                .filter(|id| !id.is_empty())
                .map(str::to_string),
            timestamp: Some(block.timestamp),
            issues,
        }
    }
}

/// Judge `block.previous_hash` against its predecessor
///
/// A successor that still points at the predecessor's *recomputed* hash is
/// left clean: the predecessor's rewritten hash field already carries the
/// finding.
fn link_issue(block: &Block, prev: &Block, prev_recomputed: Option<&str>) -> Option<BlockIssue> {
    if block.previous_hash == prev.hash {
        return None;
    }

    let prev_authentic = prev_recomputed == Some(prev.hash.as_str());
    if prev_authentic {
        return Some(
            BlockIssue::new(
                IssueKind::BrokenLink,
                format!("previous_hash does not match block {}", prev.index),
            )
            .with_values(prev.hash.clone(), block.previous_hash.clone()),
        );
    }

    if prev_recomputed == Some(block.previous_hash.as_str()) {
        return None;
    }

    Some(
        BlockIssue::new(
            IssueKind::PreviousHashMismatch,
            format!(
                "previous_hash matches neither the stored nor the recomputed hash of tampered block {}",
                prev.index
            ),
        )
        .with_values(prev.hash.clone(), block.previous_hash.clone()),
    )
}

/// Judge `block.previous_hash` against an undecodable predecessor
///
/// Only the salvaged hash field is left to compare with. When even that is
/// gone the predecessor's own finding stands alone.
fn salvaged_link_issue(block: &Block, prev: &UndecodableRow) -> Option<BlockIssue> {
    let salvaged = prev.hash.as_deref()?;
    if block.previous_hash == salvaged {
        return None;
    }
    Some(
        BlockIssue::new(
            IssueKind::PreviousHashMismatch,
            format!("previous_hash does not match the stored hash of undecodable block {}", prev.index),
        )
        .with_values(salvaged, block.previous_hash.clone()),
    )
}

fn schema_issues(payload: &BlockPayload) -> Vec<BlockIssue> {
    let mut issues = Vec::new();
    let (record_id, patient_id, doctor_id) =
        match (payload.record_id(), payload.patient_id(), payload.doctor_id()) {
            (Some(r), Some(p), Some(d)) => (r, p, d),
            _ => {
                issues.push(BlockIssue::new(
                    IssueKind::SchemaViolation,
                    "Payload action is not recognized",
                ));
                return issues;
            }
        };

    for (field, value) in [
        ("record_id", record_id),
        ("patient_id", patient_id),
        ("doctor_id", doctor_id),
    ] {
        if value.trim().is_empty() {
            issues.push(BlockIssue::new(
                IssueKind::SchemaViolation,
                format!("Payload has an empty {field}"),
            ));
        }
    }

    if let BlockPayload::Update { updated_by, .. } = payload
        && updated_by.trim().is_empty()
    {
        issues.push(BlockIssue::new(
            IssueKind::SchemaViolation,
            "Update block has no acting user",
        ));
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::canonical;
    use shared::models::RecordSnapshot;

    const T0: i64 = 1_704_164_645_006;

    fn payload(record_id: &str) -> BlockPayload {
        BlockPayload::Create {
            record_id: record_id.into(),
            patient_id: "patient:P".into(),
            doctor_id: "doctor:D".into(),
            snapshot: RecordSnapshot::new("flu"),
        }
    }

    fn chain(n: u64) -> Vec<Block> {
        let mut blocks: Vec<Block> = Vec::new();
        for index in 0..n {
            let previous_hash = blocks
                .last()
                .map(|b| b.hash.clone())
                .unwrap_or_else(|| GENESIS_PREVIOUS_HASH.to_string());
            let payload = payload(&format!("record:{index}"));
            let timestamp = Timestamp::from_millis(T0 + index as i64);
            let bytes = canonical::encode(&payload).unwrap();
            let hash = hasher::compute_block_hash(index, timestamp, &bytes, &previous_hash).unwrap();
            blocks.push(Block {
                index,
                timestamp,
                payload,
                previous_hash,
                hash,
            });
        }
        blocks
    }

    fn rehash(block: &mut Block) {
        block.hash = hasher::recompute(block).unwrap();
    }

    fn verify(blocks: &[Block]) -> Vec<BlockVerification> {
        ChainVerifier::new(Timestamp::from_millis(T0 + 1_000)).verify(
            &VerifyScope::Full,
            blocks,
            &BTreeMap::new(),
        )
    }

    fn kinds(result: &BlockVerification) -> Vec<IssueKind> {
        result.issues.iter().map(|i| i.kind).collect()
    }

    #[test]
    fn test_valid_chain_has_no_findings() {
        let results = verify(&chain(5));
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.issues.is_empty()));
    }

    #[test]
    fn test_empty_scope() {
        assert!(verify(&[]).is_empty());
    }

    #[test]
    fn test_payload_tamper_flags_only_that_block() {
        let mut blocks = chain(4);
        if let BlockPayload::Create { snapshot, .. } = &mut blocks[2].payload {
            snapshot.diagnosis = "healthy".into();
        }
        let results = verify(&blocks);
        assert_eq!(kinds(&results[2]), vec![IssueKind::HashMismatch]);
        for i in [0, 1, 3] {
            assert!(results[i].issues.is_empty(), "block {i} should be clean");
        }
    }

    #[test]
    fn test_rewritten_hash_field_blames_only_that_block() {
        let mut blocks = chain(3);
        blocks[1].hash = "0".repeat(64);
        let results = verify(&blocks);
        assert_eq!(kinds(&results[1]), vec![IssueKind::HashMismatch]);
        assert!(results[2].issues.is_empty());
    }

    #[test]
    fn test_relinked_block_against_authentic_predecessor() {
        let mut blocks = chain(4);
        blocks[2].previous_hash = blocks[0].hash.clone();
        let results = verify(&blocks);
        assert!(results[2].has_issue(IssueKind::BrokenLink));
        assert!(results[2].has_issue(IssueKind::HashMismatch));
        assert!(results[0].issues.is_empty() && results[1].issues.is_empty());
        assert!(results[3].issues.is_empty());
    }

    #[test]
    fn test_relinked_and_rehashed_block_is_a_broken_link() {
        let mut blocks = chain(3);
        blocks[2].previous_hash = "ab".repeat(32);
        rehash(&mut blocks[2]);
        let results = verify(&blocks);
        assert_eq!(kinds(&results[2]), vec![IssueKind::BrokenLink]);
    }

    #[test]
    fn test_link_to_tampered_predecessor_matching_nothing() {
        let mut blocks = chain(3);
        blocks[1].hash = "1".repeat(64);
        blocks[2].previous_hash = "2".repeat(64);
        rehash(&mut blocks[2]);
        let results = verify(&blocks);
        assert_eq!(kinds(&results[2]), vec![IssueKind::PreviousHashMismatch]);
    }

    #[test]
    fn test_invalid_genesis() {
        let mut blocks = chain(2);
        blocks[0].previous_hash = "genesis".into();
        rehash(&mut blocks[0]);
        blocks[1].previous_hash = blocks[0].hash.clone();
        rehash(&mut blocks[1]);
        let results = verify(&blocks);
        assert_eq!(kinds(&results[0]), vec![IssueKind::InvalidGenesis]);
        assert!(results[1].issues.is_empty());
    }

    #[test]
    fn test_gap_in_full_chain() {
        let mut blocks = chain(4);
        blocks.remove(2);
        let results = verify(&blocks);
        assert!(results[2].has_issue(IssueKind::OrderViolation));
        assert!(results[2].has_issue(IssueKind::MissingPredecessor));
        assert!(results[1].issues.is_empty());
    }

    #[test]
    fn test_chain_not_starting_at_zero() {
        let blocks = chain(3);
        let results = verify(&blocks[1..]);
        assert!(results[0].has_issue(IssueKind::OrderViolation));
    }

    #[test]
    fn test_partial_scope_uses_global_predecessor() {
        let blocks = chain(4);
        let mut predecessors = BTreeMap::new();
        predecessors.insert(1, blocks[1].clone());

        let verifier = ChainVerifier::new(Timestamp::from_millis(T0 + 1_000));
        let scope = VerifyScope::Record {
            record_id: "record:2".into(),
        };
        let results = verifier.verify(&scope, &blocks[2..3], &predecessors);
        assert_eq!(results.len(), 1);
        assert!(results[0].issues.is_empty());

        // Without its predecessor the block cannot be linked
        let results = verifier.verify(&scope, &blocks[2..3], &BTreeMap::new());
        assert_eq!(kinds(&results[0]), vec![IssueKind::MissingPredecessor]);
    }

    #[test]
    fn test_future_timestamp_and_skew() {
        let mut blocks = chain(1);
        blocks[0].timestamp = Timestamp::from_millis(T0 + 5_000);
        rehash(&mut blocks[0]);

        let results = verify(&blocks);
        assert_eq!(kinds(&results[0]), vec![IssueKind::FutureTimestamp]);

        let tolerant = ChainVerifier::new(Timestamp::from_millis(T0 + 1_000)).with_skew_tolerance(10_000);
        let results = tolerant.verify(&VerifyScope::Full, &blocks, &BTreeMap::new());
        assert!(results[0].issues.is_empty());
    }

    #[test]
    fn test_unrecognized_action_is_schema_and_hash_violation() {
        let mut blocks = chain(2);
        blocks[1].payload = BlockPayload::Unrecognized;
        let results = verify(&blocks);
        assert!(results[1].has_issue(IssueKind::SchemaViolation));
        assert!(results[1].has_issue(IssueKind::HashMismatch));
        assert_eq!(results[1].action, None);
    }

    fn undecodable(block: &Block, hash: Option<&str>) -> StoredRow {
        StoredRow::Undecodable(UndecodableRow {
            index: block.index,
            error: "expected value at line 1 column 1".into(),
            hash: hash.map(str::to_string),
            timestamp: Some(block.timestamp),
            record_id: block.payload.record_id().map(str::to_string),
        })
    }

    #[test]
    fn test_undecodable_row_is_flagged_and_walk_continues() {
        let blocks = chain(4);
        let mut rows: Vec<StoredRow> = blocks.iter().cloned().map(StoredRow::Block).collect();
        rows[1] = undecodable(&blocks[1], Some(blocks[1].hash.as_str()));

        let verifier = ChainVerifier::new(Timestamp::from_millis(T0 + 1_000));
        let results = verifier.verify_rows(&VerifyScope::Full, &rows, &BTreeMap::new());
        assert_eq!(results.len(), 4);
        assert_eq!(kinds(&results[1]), vec![IssueKind::UndecodableBlock]);
        assert_eq!(results[1].record_id.as_deref(), Some("record:1"));
        assert_eq!(results[1].action, None);
        for i in [0, 2, 3] {
            assert!(results[i].issues.is_empty(), "block {i} should be clean");
        }
    }

    #[test]
    fn test_successor_of_undecodable_row_uses_salvaged_hash() {
        let blocks = chain(3);
        let verifier = ChainVerifier::new(Timestamp::from_millis(T0 + 1_000));
        let verify_with = |prev: StoredRow| {
            let rows = vec![StoredRow::Block(blocks[0].clone()), prev, StoredRow::Block(blocks[2].clone())];
            verifier.verify_rows(&VerifyScope::Full, &rows, &BTreeMap::new())
        };

        let forged = "f".repeat(64);
        let results = verify_with(undecodable(&blocks[1], Some(forged.as_str())));
        assert_eq!(kinds(&results[2]), vec![IssueKind::PreviousHashMismatch]);

        // Nothing salvaged, nothing to compare with
        let results = verify_with(undecodable(&blocks[1], None));
        assert!(results[2].issues.is_empty());
        assert_eq!(results[1].hash, "");
        assert!(!results[1].is_valid());
    }

    #[test]
    fn test_update_without_actor_is_schema_violation() {
        let mut blocks = chain(1);
        blocks[0].payload = BlockPayload::Update {
            record_id: "record:0".into(),
            patient_id: "patient:P".into(),
            doctor_id: "doctor:D".into(),
            updated_by: String::new(),
            snapshot: RecordSnapshot::new("flu"),
        };
        rehash(&mut blocks[0]);
        let results = verify(&blocks);
        assert_eq!(kinds(&results[0]), vec![IssueKind::SchemaViolation]);
    }
}
