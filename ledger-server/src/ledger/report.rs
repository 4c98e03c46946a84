//! Verification report
//!
//! Statistics over a [`ChainVerification`]. No validation logic lives here.

use std::collections::BTreeMap;

use serde::Serialize;
use shared::models::LedgerAction;
use shared::types::Timestamp;

use super::types::{BlockIssue, BlockVerification, ChainVerification, IssueKind, Severity, VerifyScope};

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub total_blocks: usize,
    pub valid_blocks: usize,
    pub invalid_blocks: usize,
    pub total_findings: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockSummary {
    pub index: u64,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    pub action: Option<LedgerAction>,
}

impl From<&BlockVerification> for BlockSummary {
    fn from(b: &BlockVerification) -> Self {
        Self {
            index: b.index,
            hash: b.hash.clone(),
            timestamp: b.timestamp,
            action: b.action,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeSpan {
    pub start: Timestamp,
    pub end: Timestamp,
    pub duration_ms: i64,
    /// e.g. `2d 3h 4m 5s`
    pub human: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub scope: VerifyScope,
    pub verified_at: Timestamp,
    pub overall_valid: bool,
    pub genesis_valid: Option<bool>,
    pub summary: ReportSummary,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_kind: BTreeMap<IssueKind, usize>,
    /// Block count per action; unrecognized payloads count as `"unrecognized"`
    pub actions: BTreeMap<String, usize>,
    pub first_block: Option<BlockSummary>,
    pub last_block: Option<BlockSummary>,
    /// Present when at least two blocks are in scope
    pub time_span: Option<TimeSpan>,
    pub invalid_blocks: Vec<BlockVerification>,
    /// Valid blocks that still carry LOW findings
    pub notices: Vec<BlockVerification>,
    /// Findings not tied to a stored block, such as a truncated tail
    pub chain_issues: Vec<BlockIssue>,
}

impl VerificationReport {
    pub fn assemble(verification: &ChainVerification) -> Self {
        let blocks = &verification.blocks;

        let all_issues = || {
            blocks
                .iter()
                .flat_map(|b| &b.issues)
                .chain(&verification.chain_issues)
        };

        let mut by_severity = BTreeMap::new();
        for issue in all_issues() {
            *by_severity.entry(issue.severity).or_insert(0) += 1;
        }

        let mut actions = BTreeMap::new();
        for block in blocks {
            let name = block.action.map(|a| a.as_str()).unwrap_or("unrecognized");
            *actions.entry(name.to_string()).or_insert(0) += 1;
        }

        let stamps: Vec<Timestamp> = blocks.iter().filter_map(|b| b.timestamp).collect();
        let time_span = if stamps.len() >= 2 {
            let start = stamps.iter().min().copied();
            let end = stamps.iter().max().copied();
            start.zip(end).map(|(start, end)| {
                let duration_ms = end.millis_since(start);
                TimeSpan {
                    start,
                    end,
                    duration_ms,
                    human: format_duration(duration_ms),
                }
            })
        } else {
            None
        };

        Self {
            scope: verification.scope.clone(),
            verified_at: verification.verified_at,
            overall_valid: verification.overall_valid,
            genesis_valid: verification.genesis_valid,
            summary: ReportSummary {
                total_blocks: verification.total_blocks,
                valid_blocks: verification.valid_blocks,
                invalid_blocks: verification.invalid_blocks,
                total_findings: all_issues().count(),
            },
            by_severity,
            by_kind: verification.issue_counts.clone(),
            actions,
            first_block: blocks.first().map(BlockSummary::from),
            last_block: blocks.last().map(BlockSummary::from),
            time_span,
            invalid_blocks: blocks.iter().filter(|b| !b.is_valid()).cloned().collect(),
            notices: blocks
                .iter()
                .filter(|b| b.is_valid() && !b.issues.is_empty())
                .cloned()
                .collect(),
            chain_issues: verification.chain_issues.clone(),
        }
    }
}

/// `1d 2h 3m 4s`, or `350ms` below one second
pub fn format_duration(ms: i64) -> String {
    if ms < 1_000 {
        return format!("{ms}ms");
    }
    let total_secs = ms / 1_000;
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{seconds}s"));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(index: u64, at: i64, action: Option<LedgerAction>, issues: Vec<BlockIssue>) -> BlockVerification {
        BlockVerification {
            index,
            hash: format!("h{index}"),
            action,
            record_id: Some("record:1".into()),
            timestamp: Some(Timestamp::from_millis(at)),
            issues,
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(350), "350ms");
        assert_eq!(format_duration(1_000), "1s");
        assert_eq!(format_duration(3_600_000), "1h");
        assert_eq!(format_duration(93_784_000), "1d 2h 3m 4s");
    }

    #[test]
    fn test_report_statistics() {
        let blocks = vec![
            block(0, 1_000, Some(LedgerAction::Create), vec![]),
            block(
                1,
                61_000,
                Some(LedgerAction::Update),
                vec![BlockIssue::new(IssueKind::HashMismatch, "bad")],
            ),
            block(
                2,
                121_000,
                Some(LedgerAction::Delete),
                vec![BlockIssue::new(IssueKind::RecordDeleted, "gone")],
            ),
            block(3, 121_500, None, vec![BlockIssue::new(IssueKind::SchemaViolation, "?")]),
        ];
        let verification = ChainVerification::from_blocks(VerifyScope::Full, Timestamp::from_millis(200_000), blocks);
        let report = VerificationReport::assemble(&verification);

        assert!(!report.overall_valid);
        assert_eq!(report.summary.total_blocks, 4);
        assert_eq!(report.summary.invalid_blocks, 2);
        assert_eq!(report.summary.total_findings, 3);
        assert_eq!(report.by_severity[&Severity::High], 1);
        assert_eq!(report.by_severity[&Severity::Medium], 1);
        assert_eq!(report.by_severity[&Severity::Low], 1);
        assert_eq!(report.by_kind[&IssueKind::RecordDeleted], 1);
        assert_eq!(report.actions["create"], 1);
        assert_eq!(report.actions["unrecognized"], 1);
        assert_eq!(report.first_block.as_ref().unwrap().index, 0);
        assert_eq!(report.last_block.as_ref().unwrap().index, 3);

        let span = report.time_span.unwrap();
        assert_eq!(span.duration_ms, 120_500);
        assert_eq!(span.human, "2m");

        let invalid: Vec<u64> = report.invalid_blocks.iter().map(|b| b.index).collect();
        assert_eq!(invalid, vec![1, 3]);
        assert_eq!(report.notices.len(), 1);
        assert_eq!(report.notices[0].index, 2);
    }

    #[test]
    fn test_single_block_has_no_time_span() {
        let verification = ChainVerification::from_blocks(
            VerifyScope::Full,
            Timestamp::from_millis(10),
            vec![block(0, 5, Some(LedgerAction::Create), vec![])],
        );
        let report = VerificationReport::assemble(&verification);
        assert!(report.time_span.is_none());
        assert!(report.overall_valid);
        assert_eq!(report.first_block, report.last_block);
    }

    #[test]
    fn test_chain_issues_are_counted() {
        let mut undecodable = block(1, 0, None, vec![BlockIssue::new(IssueKind::UndecodableBlock, "eof")]);
        undecodable.timestamp = None;
        let verification = ChainVerification::from_blocks(
            VerifyScope::Full,
            Timestamp::from_millis(10),
            vec![block(0, 5, Some(LedgerAction::Create), vec![]), undecodable],
        )
        .with_chain_issues(vec![BlockIssue::new(IssueKind::ChainTruncated, "tail")]);
        let report = VerificationReport::assemble(&verification);

        assert!(!report.overall_valid);
        assert_eq!(report.summary.total_findings, 2);
        assert_eq!(report.by_severity[&Severity::High], 2);
        assert_eq!(report.by_kind[&IssueKind::ChainTruncated], 1);
        assert_eq!(report.chain_issues.len(), 1);
        // One stamped block is not a span
        assert!(report.time_span.is_none());
        assert_eq!(report.last_block.as_ref().unwrap().timestamp, None);
    }

    #[test]
    fn test_empty_scope_report() {
        let verification = ChainVerification::from_blocks(VerifyScope::Full, Timestamp::from_millis(10), vec![]);
        let report = VerificationReport::assemble(&verification);
        assert!(report.overall_valid);
        assert!(report.first_block.is_none());
        assert!(report.by_kind.is_empty());
    }
}
