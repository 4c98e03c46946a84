//! Ledger service
//!
//! Façade over the ledger core: appends blocks for record mutations,
//! verifies scopes of the chain and reads record histories.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use shared::error::AppResult;
use shared::models::{LedgerPointer, MedicalRecord};
use shared::types::Timestamp;

use super::append::AppendEngine;
use super::cross_ref::{CrossReferenceChecker, RecordLookup};
use super::history::{HistoryEntry, build_history};
use super::report::VerificationReport;
use super::storage::{BlockStore, StoredRow};
use super::types::{
    AppendReceipt, BlockIssue, BlockVerification, ChainVerification, IssueKind, MutationDescriptor,
    VerifyScope,
};
use super::verifier::ChainVerifier;

pub struct LedgerService {
    engine: AppendEngine,
    records: Arc<dyn RecordLookup>,
    skew_tolerance_ms: i64,
}

impl LedgerService {
    pub fn new(store: Arc<dyn BlockStore>, records: Arc<dyn RecordLookup>) -> Self {
        Self {
            engine: AppendEngine::new(store),
            records,
            skew_tolerance_ms: 0,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.engine = self.engine.with_max_retries(max_retries);
        self
    }

    /// Clock skew accepted both when stamping appends and when verifying
    pub fn with_skew_tolerance(mut self, ms: i64) -> Self {
        self.engine = self.engine.with_skew_tolerance(ms);
        self.skew_tolerance_ms = ms;
        self
    }

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        self.engine.store()
    }

    // ========== Append ==========

    pub fn append_block(&self, descriptor: MutationDescriptor) -> AppResult<AppendReceipt> {
        Ok(self.engine.append(descriptor)?)
    }

    pub fn on_record_created(&self, record: &MedicalRecord) -> AppResult<AppendReceipt> {
        self.append_block(MutationDescriptor::create(record))
    }

    pub fn on_record_updated(&self, record: &MedicalRecord, actor_id: &str) -> AppResult<AppendReceipt> {
        self.append_block(MutationDescriptor::update(record, actor_id))
    }

    pub fn on_record_deleted(
        &self,
        record: &MedicalRecord,
        actor_id: Option<&str>,
    ) -> AppResult<AppendReceipt> {
        self.append_block(MutationDescriptor::delete(record, actor_id.map(str::to_string)))
    }

    // ========== Verification ==========

    /// Verify one scope of the chain
    ///
    /// Fails only when the store or the record lookup fails; integrity
    /// problems, undecodable rows included, are reported as findings.
    pub fn check_chain(&self, scope: VerifyScope) -> AppResult<ChainVerification> {
        let store = self.store();
        let verified_at = Timestamp::now();

        // Pointers first: one is only ever set after its block is durable.
        let claims = self.pointer_claims(&scope)?;

        let rows = match &scope {
            VerifyScope::Full => store.rows()?,
            VerifyScope::Record { record_id } => store.rows_for_record(record_id)?,
            VerifyScope::Patient { patient_id } => store.rows_for_patient(patient_id)?,
            VerifyScope::Window { from, to } => store.rows_between(*from, *to)?,
        };
        let predecessors = self.load_predecessors(&rows)?;

        let verifier = ChainVerifier::new(verified_at).with_skew_tolerance(self.skew_tolerance_ms);
        let mut results = verifier.verify_rows(&scope, &rows, &predecessors);
        self.cross_reference(&rows, &mut results)?;
        let chain_issues = pointer_issues(&scope, &claims, &rows);

        let verification =
            ChainVerification::from_blocks(scope, verified_at, results).with_chain_issues(chain_issues);
        if verification.overall_valid {
            tracing::info!(
                scope = %verification.scope,
                total = verification.total_blocks,
                "Ledger verification passed"
            );
        } else {
            tracing::warn!(
                scope = %verification.scope,
                total = verification.total_blocks,
                invalid = verification.invalid_blocks,
                chain_issues = verification.chain_issues.len(),
                genesis_valid = ?verification.genesis_valid,
                "Ledger verification found invalid blocks"
            );
        }
        Ok(verification)
    }

    pub fn verify_chain(&self, scope: VerifyScope) -> AppResult<VerificationReport> {
        let verification = self.check_chain(scope)?;
        Ok(VerificationReport::assemble(&verification))
    }

    /// Block pointers held outside the chain: record heads and live records
    ///
    /// Only full and record scopes own every block such a pointer can name.
    fn pointer_claims(&self, scope: &VerifyScope) -> AppResult<Vec<PointerClaim>> {
        let mut claims = Vec::new();
        match scope {
            VerifyScope::Full => {
                for (record_id, pointer) in self.store().record_heads()? {
                    claims.push(PointerClaim::head(record_id, pointer));
                }
                for (record_id, pointer) in self.records.ledgered_records()? {
                    claims.push(PointerClaim::record(record_id, pointer));
                }
            }
            VerifyScope::Record { record_id } => {
                if let Some(pointer) = self.store().record_head(record_id)? {
                    claims.push(PointerClaim::head(record_id.clone(), pointer));
                }
                if let Some(pointer) = self.records.find_record(record_id)?.and_then(|r| r.pointer()) {
                    claims.push(PointerClaim::record(record_id.clone(), pointer));
                }
            }
            VerifyScope::Patient { .. } | VerifyScope::Window { .. } => {}
        }
        Ok(claims)
    }

    /// Global `index - 1` rows not already in `rows`
    fn load_predecessors(&self, rows: &[StoredRow]) -> AppResult<BTreeMap<u64, StoredRow>> {
        let in_scope: HashSet<u64> = rows.iter().map(StoredRow::index).collect();
        let mut predecessors = BTreeMap::new();
        for row in rows {
            let Some(prev) = row.index().checked_sub(1) else {
                continue;
            };
            if in_scope.contains(&prev) || predecessors.contains_key(&prev) {
                continue;
            }
            if let Some(found) = self.store().row(prev)? {
                predecessors.insert(prev, found);
            }
        }
        Ok(predecessors)
    }

    /// Add cross-reference findings for blocks that head their record
    fn cross_reference(&self, rows: &[StoredRow], results: &mut [BlockVerification]) -> AppResult<()> {
        let mut heads: HashMap<String, Option<LedgerPointer>> = HashMap::new();

        for (block, result) in rows.iter().zip(results.iter_mut()) {
            let Some(block) = block.block() else {
                continue;
            };
            let Some(record_id) = block.payload.record_id().filter(|id| !id.is_empty()) else {
                continue;
            };
            let head = match heads.get(record_id) {
                Some(head) => head.clone(),
                None => {
                    let head = self.store().record_head(record_id)?;
                    heads.insert(record_id.to_string(), head.clone());
                    head
                }
            };
            if head.as_ref().map(|h| h.ledger_index) != Some(block.index) {
                continue;
            }

            let record = self.records.find_record(record_id)?;
            result
                .issues
                .extend(CrossReferenceChecker::check(block, head.as_ref(), record.as_ref()));
        }
        Ok(())
    }

    // ========== History ==========

    pub fn get_record_history(&self, record_id: &str) -> AppResult<Vec<HistoryEntry>> {
        let blocks = self.store().blocks_for_record(record_id)?;
        Ok(build_history(blocks))
    }
}

/// A pointer into the chain and who holds it
struct PointerClaim {
    holder: String,
    pointer: LedgerPointer,
}

impl PointerClaim {
    fn head(record_id: String, pointer: LedgerPointer) -> Self {
        Self {
            holder: format!("ledger head of {record_id}"),
            pointer,
        }
    }

    fn record(record_id: String, pointer: LedgerPointer) -> Self {
        Self {
            holder: format!("record {record_id}"),
            pointer,
        }
    }
}

/// Findings for pointers naming blocks that are not stored
///
/// In full scope a pointer past the last stored block also means the tail
/// of the chain is gone.
fn pointer_issues(scope: &VerifyScope, claims: &[PointerClaim], rows: &[StoredRow]) -> Vec<BlockIssue> {
    let present: HashSet<u64> = rows.iter().map(StoredRow::index).collect();
    let mut issues: Vec<BlockIssue> = claims
        .iter()
        .filter(|c| !present.contains(&c.pointer.ledger_index))
        .map(|c| {
            BlockIssue::new(
                IssueKind::DanglingPointer,
                format!("{} points at block {}, which is not stored", c.holder, c.pointer.ledger_index),
            )
            .with_values(c.pointer.ledger_index.to_string(), "none")
        })
        .collect();

    if scope.is_full()
        && let Some(referenced) = claims.iter().map(|c| c.pointer.ledger_index).max()
    {
        let latest = rows.iter().map(StoredRow::index).max();
        if latest.is_none_or(|latest| referenced > latest) {
            let actual = latest.map_or_else(|| "none".to_string(), |i| i.to_string());
            issues.push(
                BlockIssue::new(
                    IssueKind::ChainTruncated,
                    format!("Block {referenced} is referenced but the chain ends at {actual}"),
                )
                .with_values(referenced.to_string(), actual),
            );
        }
    }

    issues
}
