use chrono::{DateTime, Utc};

use super::session::SessionStatus;
use crate::database::LogonRow;

/// Next logon-history row for a user, derived from the prior row and the
/// outcome of the session that just connected at `logon_time`.
///
/// `current_success` is the logon of the session believed to be in progress;
/// a newer successful logon promotes it to `last_success`. A failure clears
/// it and grows the consecutive-failure count.
pub fn next_logon(
    prior: Option<&LogonRow>,
    status: SessionStatus,
    logon_time: DateTime<Utc>,
) -> LogonRow {
    match (prior, status) {
        (None, SessionStatus::Ok) => LogonRow {
            last_success: None,
            current_success: Some(logon_time),
            last_failure: None,
            failures_since_last_success: 0,
        },
        (None, SessionStatus::Error) => LogonRow {
            last_success: None,
            current_success: None,
            last_failure: Some(logon_time),
            failures_since_last_success: 1,
        },
        (Some(prior), SessionStatus::Ok) => LogonRow {
            last_success: prior.current_success.or(prior.last_success),
            current_success: Some(logon_time),
            last_failure: None,
            failures_since_last_success: 0,
        },
        (Some(prior), SessionStatus::Error) => LogonRow {
            last_success: prior.last_success,
            current_success: None,
            last_failure: Some(logon_time),
            failures_since_last_success: prior.failures_since_last_success + 1,
        },
    }
}
