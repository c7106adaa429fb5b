use csv::{ByteRecord, ReaderBuilder};

use crate::error::{IngestError, Result};

/// Placeholder the audit logger emits for an unset statement parameter.
const NO_PARAMETER: &str = "<none>";

/// The nine-field csv record embedded in an `AUDIT: ` message.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub audit_type: Option<String>,
    pub statement_id: i64,
    pub substatement_id: i64,
    pub class: Option<String>,
    pub command: Option<String>,
    pub object_type: Option<String>,
    pub object_name: Option<String>,
    pub statement: Option<String>,
    pub parameter: Option<String>,
}

impl AuditRecord {
    /// Parses the payload that follows the `AUDIT: ` prefix. The payload is
    /// itself csv, so quoted statements may span commas and newlines.
    pub fn parse(payload: &str) -> Result<AuditRecord> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(payload.as_bytes());

        let mut record = ByteRecord::new();
        if !reader.read_byte_record(&mut record)? {
            return Err(IngestError::InvalidField {
                field: "audit payload",
                value: payload.to_string(),
            });
        }

        Ok(AuditRecord {
            audit_type: text(&record, 0),
            statement_id: number(&record, 1, "statement_id")?,
            substatement_id: number(&record, 2, "substatement_id")?,
            class: text(&record, 3),
            command: text(&record, 4),
            object_type: text(&record, 5),
            object_name: text(&record, 6),
            statement: text(&record, 7),
            parameter: text(&record, 8).filter(|p| p != NO_PARAMETER),
        })
    }
}

fn text(record: &ByteRecord, index: usize) -> Option<String> {
    record
        .get(index)
        .filter(|bytes| !bytes.is_empty())
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
}

fn number(record: &ByteRecord, index: usize, field: &'static str) -> Result<i64> {
    let value = text(record, index).ok_or(IngestError::MissingField(field))?;
    value
        .parse::<i64>()
        .map_err(|_| IngestError::InvalidField { field, value })
}
