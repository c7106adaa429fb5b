use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use csv::ByteRecord;

use crate::error::{IngestError, Result};

/// Literal prefix marking a message whose body is an embedded audit record.
pub const AUDIT_PREFIX: &str = "AUDIT: ";

/// One row of the 23-column csv server log.
///
/// Empty fields are absent; the distinction the row model cares about is
/// present-vs-missing, not empty-vs-missing.
#[derive(Debug, Clone)]
pub struct LogRow {
    pub log_time: DateTime<Utc>,
    pub user_name: Option<String>,
    pub database_name: Option<String>,
    pub process_id: Option<i32>,
    pub connection_from: Option<String>,
    pub session_id: String,
    pub session_line_num: i64,
    pub command_tag: Option<String>,
    pub session_start_time: DateTime<Utc>,
    pub virtual_transaction_id: Option<String>,
    pub transaction_id: Option<i64>,
    pub error_severity: Option<String>,
    pub sql_state_code: Option<String>,
    pub message: Option<String>,
    pub detail: Option<String>,
    pub hint: Option<String>,
    pub internal_query: Option<String>,
    pub internal_query_pos: Option<i32>,
    pub context: Option<String>,
    pub query: Option<String>,
    pub query_pos: Option<i32>,
    pub location: Option<String>,
    pub application_name: Option<String>,
}

impl LogRow {
    pub fn from_record(record: &ByteRecord) -> Result<LogRow> {
        Ok(LogRow {
            log_time: parse_log_time("log_time", &required(record, 0, "log_time")?)?,
            user_name: text(record, 1),
            database_name: text(record, 2),
            process_id: integer(text(record, 3), "process_id")?,
            connection_from: text(record, 4),
            session_id: required(record, 5, "session_id")?,
            session_line_num: integer(text(record, 6), "session_line_num")?
                .ok_or(IngestError::MissingField("session_line_num"))?,
            command_tag: text(record, 7),
            session_start_time: parse_log_time(
                "session_start_time",
                &required(record, 8, "session_start_time")?,
            )?,
            virtual_transaction_id: text(record, 9),
            transaction_id: integer(text(record, 10), "transaction_id")?,
            error_severity: text(record, 11),
            sql_state_code: text(record, 12),
            message: text(record, 13),
            detail: text(record, 14),
            hint: text(record, 15),
            internal_query: text(record, 16),
            internal_query_pos: integer(text(record, 17), "internal_query_pos")?,
            context: text(record, 18),
            query: text(record, 19),
            query_pos: integer(text(record, 20), "query_pos")?,
            location: text(record, 21),
            application_name: text(record, 22),
        })
    }

    /// A severity that aborts the statement in progress.
    pub fn is_error(&self) -> bool {
        matches!(
            self.error_severity.as_deref(),
            Some(s) if s.eq_ignore_ascii_case("error")
                || s.eq_ignore_ascii_case("fatal")
                || s.eq_ignore_ascii_case("panic")
        )
    }

    /// A fatal authentication row, the one condition that creates a session
    /// in the error state.
    pub fn is_authentication_failure(&self) -> bool {
        let authentication = matches!(
            self.command_tag.as_deref(),
            Some(t) if t.eq_ignore_ascii_case("authentication")
        );
        let fatal = matches!(
            self.error_severity.as_deref(),
            Some(s) if s.eq_ignore_ascii_case("fatal")
        );
        authentication && fatal
    }

    /// The embedded audit payload, when the message carries one.
    pub fn audit_payload(&self) -> Option<&str> {
        self.message.as_deref().and_then(|m| m.strip_prefix(AUDIT_PREFIX))
    }
}

fn text(record: &ByteRecord, index: usize) -> Option<String> {
    record
        .get(index)
        .filter(|bytes| !bytes.is_empty())
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
}

fn required(record: &ByteRecord, index: usize, field: &'static str) -> Result<String> {
    text(record, index).ok_or(IngestError::MissingField(field))
}

fn integer<T: std::str::FromStr>(value: Option<String>, field: &'static str) -> Result<Option<T>> {
    match value {
        None => Ok(None),
        Some(v) => match v.parse::<T>() {
            Ok(n) => Ok(Some(n)),
            Err(_) => Err(IngestError::InvalidField { field, value: v }),
        },
    }
}

/// Parses a server log timestamp: `2024-01-01 00:00:00.123 UTC`.
///
/// Numeric offsets are honored. Zone names are taken as utc; the server's
/// zone table is not available here, and log_timezone is utc in practice.
fn parse_log_time(field: &'static str, value: &str) -> Result<DateTime<Utc>> {
    let invalid = || IngestError::InvalidField {
        field,
        value: value.to_string(),
    };

    let mut parts = value.splitn(3, ' ');
    let (date, time) = match (parts.next(), parts.next()) {
        (Some(d), Some(t)) => (d, t),
        _ => return Err(invalid()),
    };
    let zone = parts.next();

    let naive = NaiveDateTime::parse_from_str(
        &format!("{} {}", date, time),
        "%Y-%m-%d %H:%M:%S%.f",
    )
    .map_err(|_| invalid())?;

    match zone {
        Some(z) if z.starts_with('+') || z.starts_with('-') => {
            let offset = zone_offset(z).ok_or_else(invalid)?;
            let local = offset.from_local_datetime(&naive).single().ok_or_else(invalid)?;
            Ok(local.with_timezone(&Utc))
        }
        _ => Ok(Utc.from_utc_datetime(&naive)),
    }
}

fn zone_offset(zone: &str) -> Option<FixedOffset> {
    let (sign, rest) = match zone.split_at(1) {
        ("+", rest) => (1, rest),
        ("-", rest) => (-1, rest),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[0..2].parse::<i32>().ok()?, digits[2..4].parse::<i32>().ok()?),
        _ => return None,
    };
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn base_fields() -> Vec<String> {
        vec![
            "2024-01-01 00:00:01 UTC".to_string(),    // log_time
            "alice".to_string(),                      // user_name
            "appdb".to_string(),                      // database_name
            "4242".to_string(),                       // process_id
            "10.0.0.5:51234".to_string(),             // connection_from
            "65a0b1c2.1092".to_string(),              // session_id
            "1".to_string(),                          // session_line_num
            "authentication".to_string(),             // command_tag
            "2024-01-01 00:00:00 UTC".to_string(),    // session_start_time
            "3/42".to_string(),                       // virtual_transaction_id
            "0".to_string(),                          // transaction_id
            "LOG".to_string(),                        // error_severity
            "00000".to_string(),                      // sql_state_code
            "connection authorized".to_string(),      // message
            String::new(),                            // detail
            String::new(),                            // hint
            String::new(),                            // internal_query
            String::new(),                            // internal_query_pos
            String::new(),                            // context
            String::new(),                            // query
            String::new(),                            // query_pos
            "auth.c:123".to_string(),                 // location
            "psql".to_string(),                       // application_name
        ]
    }

    fn record(fields: &[String]) -> ByteRecord {
        ByteRecord::from(fields.iter().map(|f| f.as_bytes()).collect::<Vec<_>>())
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(y, mo, d)
                .unwrap()
                .and_hms_opt(h, mi, s)
                .unwrap(),
        )
    }

    #[test]
    fn test_full_row_mapping() {
        let row = LogRow::from_record(&record(&base_fields())).unwrap();

        assert_eq!(row.log_time, utc(2024, 1, 1, 0, 0, 1));
        assert_eq!(row.user_name.as_deref(), Some("alice"));
        assert_eq!(row.database_name.as_deref(), Some("appdb"));
        assert_eq!(row.process_id, Some(4242));
        assert_eq!(row.session_id, "65a0b1c2.1092");
        assert_eq!(row.session_line_num, 1);
        assert_eq!(row.command_tag.as_deref(), Some("authentication"));
        assert_eq!(row.session_start_time, utc(2024, 1, 1, 0, 0, 0));
        assert_eq!(row.virtual_transaction_id.as_deref(), Some("3/42"));
        assert_eq!(row.transaction_id, Some(0));
        assert_eq!(row.detail, None);
        assert_eq!(row.internal_query_pos, None);
        assert_eq!(row.application_name.as_deref(), Some("psql"));
    }

    #[test]
    fn test_missing_required_fields() {
        let mut fields = base_fields();
        fields[5] = String::new();
        assert!(matches!(
            LogRow::from_record(&record(&fields)),
            Err(IngestError::MissingField("session_id"))
        ));

        let mut fields = base_fields();
        fields[6] = String::new();
        assert!(matches!(
            LogRow::from_record(&record(&fields)),
            Err(IngestError::MissingField("session_line_num"))
        ));
    }

    #[test]
    fn test_malformed_numeric_field() {
        let mut fields = base_fields();
        fields[6] = "not-a-number".to_string();
        assert!(matches!(
            LogRow::from_record(&record(&fields)),
            Err(IngestError::InvalidField {
                field: "session_line_num",
                ..
            })
        ));
    }

    #[test]
    fn test_severity_classification() {
        for (severity, is_error) in [
            ("LOG", false),
            ("WARNING", false),
            ("ERROR", true),
            ("error", true),
            ("FATAL", true),
            ("PANIC", true),
        ] {
            let mut fields = base_fields();
            fields[11] = severity.to_string();
            let row = LogRow::from_record(&record(&fields)).unwrap();
            assert_eq!(row.is_error(), is_error, "severity {}", severity);
        }
    }

    #[test]
    fn test_authentication_failure_detection() {
        let mut fields = base_fields();
        fields[11] = "FATAL".to_string();
        let row = LogRow::from_record(&record(&fields)).unwrap();
        assert!(row.is_authentication_failure());

        let mut fields = base_fields();
        fields[7] = "SELECT".to_string();
        fields[11] = "FATAL".to_string();
        let row = LogRow::from_record(&record(&fields)).unwrap();
        assert!(!row.is_authentication_failure());
    }

    #[test]
    fn test_audit_payload_extraction() {
        let mut fields = base_fields();
        fields[13] = "AUDIT: SESSION,1,1,READ,SELECT,,,\"select 1\",<none>".to_string();
        let row = LogRow::from_record(&record(&fields)).unwrap();
        assert_eq!(
            row.audit_payload(),
            Some("SESSION,1,1,READ,SELECT,,,\"select 1\",<none>")
        );

        let mut fields = base_fields();
        fields[13] = "connection authorized".to_string();
        let row = LogRow::from_record(&record(&fields)).unwrap();
        assert_eq!(row.audit_payload(), None);
    }

    #[test]
    fn test_timestamp_formats() {
        let mut fields = base_fields();
        fields[0] = "2024-03-15 10:20:30.123 UTC".to_string();
        let row = LogRow::from_record(&record(&fields)).unwrap();
        assert_eq!(
            row.log_time,
            utc(2024, 3, 15, 10, 20, 30) + chrono::Duration::milliseconds(123)
        );

        // numeric offset: 10:20:30+02 is 08:20:30 utc
        let mut fields = base_fields();
        fields[0] = "2024-03-15 10:20:30 +02".to_string();
        let row = LogRow::from_record(&record(&fields)).unwrap();
        assert_eq!(row.log_time, utc(2024, 3, 15, 8, 20, 30));

        let mut fields = base_fields();
        fields[0] = "2024-03-15 10:20:30 -05:30".to_string();
        let row = LogRow::from_record(&record(&fields)).unwrap();
        assert_eq!(row.log_time, utc(2024, 3, 15, 15, 50, 30));

        // a named zone is taken as utc
        let mut fields = base_fields();
        fields[0] = "2024-03-15 10:20:30 GMT".to_string();
        let row = LogRow::from_record(&record(&fields)).unwrap();
        assert_eq!(row.log_time, utc(2024, 3, 15, 10, 20, 30));

        let mut fields = base_fields();
        fields[0] = "yesterday".to_string();
        assert!(matches!(
            LogRow::from_record(&record(&fields)),
            Err(IngestError::InvalidField { field: "log_time", .. })
        ));
    }
}
