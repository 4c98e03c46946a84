//! Canonical payload encoding
//!
//! The encoding is the contract between the append engine and the verifier:
//! both hash `encode(payload)`, so any difference between the two sides makes
//! every block look tampered.
//!
//! # Format (`ledger-canonical/v1`)
//!
//! ```text
//! "ledger-canonical/v1" \x00
//! field*   where field = name \x00 \x00 \x00                  (absent)
//!                      | name \x00 \x01 len ':' bytes \x00    (present)
//! ```
//!
//! - Field order is fixed per action ([`field_order`]) and never depends on
//!   struct declaration order or map iteration order.
//! - `len` is the decimal byte length of the value, so values may contain
//!   any byte (including `\x00`) without ambiguity.
//! - Optional text that is absent, `null` or blank is encoded as absent.
//! - Dates are rendered as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
//!
//! Changing any of the above requires a new version tag.

use shared::models::{BlockPayload, LedgerAction, RecordSnapshot};
use shared::types::{Timestamp, TimestampError};
use thiserror::Error;

/// Version tag written at the start of every encoding
pub const CANONICAL_VERSION: &str = "ledger-canonical/v1";

const CREATE_FIELDS: &[&str] = &[
    "action",
    "record_id",
    "patient_id",
    "doctor_id",
    "diagnosis",
    "treatment",
    "prescription",
    "notes",
    "visit_date",
];

const UPDATE_FIELDS: &[&str] = &[
    "action",
    "record_id",
    "patient_id",
    "doctor_id",
    "updated_by",
    "diagnosis",
    "treatment",
    "prescription",
    "notes",
    "visit_date",
];

const DELETE_FIELDS: &[&str] = &["action", "record_id", "patient_id", "doctor_id", "deleted_by"];

/// Encoding errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("Payload with unrecognized action cannot be canonicalized")]
    UnrecognizedAction,

    #[error("Timestamp cannot be canonicalized: {0}")]
    Timestamp(#[from] TimestampError),
}

/// Fields encoded for `action`, in encoding order
pub fn field_order(action: LedgerAction) -> &'static [&'static str] {
    match action {
        LedgerAction::Create => CREATE_FIELDS,
        LedgerAction::Update => UPDATE_FIELDS,
        LedgerAction::Delete => DELETE_FIELDS,
    }
}

/// Encode a payload into its canonical byte form
pub fn encode(payload: &BlockPayload) -> Result<Vec<u8>, EncodeError> {
    let action = payload.action().ok_or(EncodeError::UnrecognizedAction)?;
    let mut writer = CanonicalWriter::new(field_order(action));

    writer.text("action", action.as_str());
    match payload {
        BlockPayload::Create {
            record_id,
            patient_id,
            doctor_id,
            snapshot,
        } => {
            writer.text("record_id", record_id);
            writer.text("patient_id", patient_id);
            writer.text("doctor_id", doctor_id);
            writer.snapshot(snapshot)?;
        }
        BlockPayload::Update {
            record_id,
            patient_id,
            doctor_id,
            updated_by,
            snapshot,
        } => {
            writer.text("record_id", record_id);
            writer.text("patient_id", patient_id);
            writer.text("doctor_id", doctor_id);
            writer.optional_text("updated_by", Some(updated_by.as_str()));
            writer.snapshot(snapshot)?;
        }
        BlockPayload::Delete {
            record_id,
            patient_id,
            doctor_id,
            deleted_by,
        } => {
            writer.text("record_id", record_id);
            writer.text("patient_id", patient_id);
            writer.text("doctor_id", doctor_id);
            writer.optional_text("deleted_by", deleted_by.as_deref());
        }
        BlockPayload::Unrecognized => return Err(EncodeError::UnrecognizedAction),
    }

    Ok(writer.finish())
}

/// Canonical date text
pub fn encode_timestamp(timestamp: Timestamp) -> Result<String, EncodeError> {
    Ok(timestamp.to_canonical_string()?)
}

struct CanonicalWriter {
    buf: Vec<u8>,
    expected: &'static [&'static str],
    written: usize,
}

impl CanonicalWriter {
    fn new(expected: &'static [&'static str]) -> Self {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(CANONICAL_VERSION.as_bytes());
        buf.push(0);
        Self {
            buf,
            expected,
            written: 0,
        }
    }

    fn field(&mut self, name: &'static str, value: Option<&[u8]>) {
        debug_assert_eq!(
            self.expected.get(self.written),
            Some(&name),
            "canonical field order drifted"
        );
        self.written += 1;

        self.buf.extend_from_slice(name.as_bytes());
        self.buf.push(0);
        match value {
            Some(bytes) => {
                self.buf.push(1);
                self.buf.extend_from_slice(bytes.len().to_string().as_bytes());
                self.buf.push(b':');
                self.buf.extend_from_slice(bytes);
            }
            None => self.buf.push(0),
        }
        self.buf.push(0);
    }

    /// Required text, trimmed
    fn text(&mut self, name: &'static str, value: &str) {
        self.field(name, Some(value.trim().as_bytes()));
    }

    /// Optional text; blank collapses to absent
    fn optional_text(&mut self, name: &'static str, value: Option<&str>) {
        let value = value.map(str::trim).filter(|v| !v.is_empty());
        self.field(name, value.map(str::as_bytes));
    }

    fn timestamp(&mut self, name: &'static str, value: Option<Timestamp>) -> Result<(), EncodeError> {
        let text = value.map(encode_timestamp).transpose()?;
        self.field(name, text.as_deref().map(str::as_bytes));
        Ok(())
    }

    fn snapshot(&mut self, snapshot: &RecordSnapshot) -> Result<(), EncodeError> {
        self.text("diagnosis", &snapshot.diagnosis);
        self.optional_text("treatment", snapshot.treatment.as_deref());
        self.optional_text("prescription", snapshot.prescription.as_deref());
        self.optional_text("notes", snapshot.notes.as_deref());
        self.timestamp("visit_date", snapshot.visit_date)
    }

    fn finish(self) -> Vec<u8> {
        debug_assert_eq!(self.written, self.expected.len(), "canonical field missing");
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_payload(snapshot: RecordSnapshot) -> BlockPayload {
        BlockPayload::Create {
            record_id: "record:1".into(),
            patient_id: "patient:P".into(),
            doctor_id: "doctor:D".into(),
            snapshot,
        }
    }

    /// Split an encoding back into `(name, value)` pairs
    fn decode_fields(bytes: &[u8]) -> Vec<(String, Option<Vec<u8>>)> {
        let header_len = CANONICAL_VERSION.len();
        assert_eq!(&bytes[..header_len], CANONICAL_VERSION.as_bytes());
        assert_eq!(bytes[header_len], 0);

        let mut fields = Vec::new();
        let mut pos = header_len + 1;
        while pos < bytes.len() {
            let name_end = pos + bytes[pos..].iter().position(|b| *b == 0).unwrap();
            let name = String::from_utf8(bytes[pos..name_end].to_vec()).unwrap();
            pos = name_end + 1;
            let value = match bytes[pos] {
                0 => {
                    pos += 1;
                    None
                }
                1 => {
                    pos += 1;
                    let colon = pos + bytes[pos..].iter().position(|b| *b == b':').unwrap();
                    let len: usize = std::str::from_utf8(&bytes[pos..colon])
                        .unwrap()
                        .parse()
                        .unwrap();
                    let value = bytes[colon + 1..colon + 1 + len].to_vec();
                    pos = colon + 1 + len;
                    Some(value)
                }
                tag => panic!("unexpected presence tag {tag}"),
            };
            assert_eq!(bytes[pos], 0, "field terminator");
            pos += 1;
            fields.push((name, value));
        }
        fields
    }

    #[test]
    fn test_field_order_is_explicit_per_action() {
        let payloads = [
            create_payload(RecordSnapshot::new("flu")),
            BlockPayload::Update {
                record_id: "record:1".into(),
                patient_id: "patient:P".into(),
                doctor_id: "doctor:D".into(),
                updated_by: "user:A".into(),
                snapshot: RecordSnapshot::new("flu"),
            },
            BlockPayload::Delete {
                record_id: "record:1".into(),
                patient_id: "patient:P".into(),
                doctor_id: "doctor:D".into(),
                deleted_by: None,
            },
        ];

        for payload in payloads {
            let encoded = encode(&payload).unwrap();
            let names: Vec<String> = decode_fields(&encoded).into_iter().map(|(n, _)| n).collect();
            let expected: Vec<String> = field_order(payload.action().unwrap())
                .iter()
                .map(|s| s.to_string())
                .collect();
            assert_eq!(names, expected);
        }
    }

    #[test]
    fn test_encoding_is_stable_across_calls() {
        let payload = create_payload(RecordSnapshot {
            diagnosis: "flu".into(),
            treatment: Some("rest".into()),
            prescription: None,
            notes: Some("follow up in a week".into()),
            visit_date: Some(Timestamp::from_millis(1_704_164_645_006)),
        });
        assert_eq!(encode(&payload).unwrap(), encode(&payload.clone()).unwrap());
    }

    #[test]
    fn test_date_representations_encode_identically() {
        let from_millis: BlockPayload = serde_json::from_str(
            r#"{"action":"create","record_id":"record:1","patient_id":"patient:P",
                "doctor_id":"doctor:D","snapshot":{"diagnosis":"flu","visit_date":1704164645006}}"#,
        )
        .unwrap();
        let from_iso: BlockPayload = serde_json::from_str(
            r#"{"action":"create","record_id":"record:1","patient_id":"patient:P",
                "doctor_id":"doctor:D","snapshot":{"diagnosis":"flu","visit_date":"2024-01-02T03:04:05.006Z"}}"#,
        )
        .unwrap();
        assert_eq!(encode(&from_millis).unwrap(), encode(&from_iso).unwrap());

        let fields = decode_fields(&encode(&from_iso).unwrap());
        let visit = fields.iter().find(|(n, _)| n == "visit_date").unwrap();
        assert_eq!(visit.1.as_deref(), Some("2024-01-02T03:04:05.006Z".as_bytes()));
    }

    #[test]
    fn test_absent_null_and_blank_optionals_encode_identically() {
        let absent = create_payload(RecordSnapshot::new("flu"));
        let blank = create_payload(RecordSnapshot {
            diagnosis: "flu".into(),
            treatment: Some(String::new()),
            prescription: Some("   ".into()),
            notes: None,
            visit_date: None,
        });
        let null: BlockPayload = serde_json::from_str(
            r#"{"action":"create","record_id":"record:1","patient_id":"patient:P",
                "doctor_id":"doctor:D","snapshot":{"diagnosis":"flu","treatment":null,"notes":null}}"#,
        )
        .unwrap();

        let expected = encode(&absent).unwrap();
        assert_eq!(encode(&blank).unwrap(), expected);
        assert_eq!(encode(&null).unwrap(), expected);
    }

    #[test]
    fn test_absent_differs_from_literal_value() {
        let absent = create_payload(RecordSnapshot::new("flu"));
        let literal = create_payload(RecordSnapshot {
            treatment: Some("0".into()),
            ..RecordSnapshot::new("flu")
        });
        assert_ne!(encode(&absent).unwrap(), encode(&literal).unwrap());
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let a = BlockPayload::Delete {
            record_id: "ab".into(),
            patient_id: "c".into(),
            doctor_id: "d".into(),
            deleted_by: None,
        };
        let b = BlockPayload::Delete {
            record_id: "a".into(),
            patient_id: "bc".into(),
            doctor_id: "d".into(),
            deleted_by: None,
        };
        assert_ne!(encode(&a).unwrap(), encode(&b).unwrap());
    }

    #[test]
    fn test_unrecognized_action_is_an_encoding_error() {
        assert_eq!(
            encode(&BlockPayload::Unrecognized),
            Err(EncodeError::UnrecognizedAction)
        );
    }

    #[test]
    fn test_out_of_range_date_is_an_encoding_error() {
        let payload = create_payload(RecordSnapshot {
            visit_date: Some(Timestamp::from_millis(i64::MAX)),
            ..RecordSnapshot::new("flu")
        });
        assert!(matches!(encode(&payload), Err(EncodeError::Timestamp(_))));
    }
}
