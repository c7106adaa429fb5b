use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Outcome a session was created with. A session that begins with a fatal
/// authentication row is in error; the state is never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Ok,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Ok => "ok",
            SessionStatus::Error => "error",
        }
    }

    pub fn from_db(state: &str) -> SessionStatus {
        if state == "error" {
            SessionStatus::Error
        } else {
            SessionStatus::Ok
        }
    }
}

/// High-water marks for one session. All writes for the session are gated on
/// these counters, which only ever advance.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub application_name: Option<String>,
    pub status: SessionStatus,
    pub session_line_num: i64,
    pub statement_id: i64,
    pub substatement_id: i64,
    pub last_log: DateTime<Utc>,
}

impl SessionState {
    /// The central gate: a row is written once, when its line number first
    /// exceeds the cached mark. Replayed lines fall through silently.
    pub fn accepts_line(&self, session_line_num: i64) -> bool {
        session_line_num > self.session_line_num
    }

    pub fn accepts_statement(&self, statement_id: i64) -> bool {
        statement_id > self.statement_id
    }

    pub fn accepts_substatement(&self, statement_id: i64, substatement_id: i64) -> bool {
        statement_id == self.statement_id && substatement_id > self.substatement_id
    }
}

/// In-memory session registry, keyed by the opaque session identifier the
/// server assigns at connect time.
pub struct SessionCache {
    sessions: HashMap<String, SessionState>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut SessionState> {
        self.sessions.get_mut(session_id)
    }

    pub fn insert(&mut self, session_id: String, state: SessionState) {
        self.sessions.insert(session_id, state);
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drops sessions that have not logged since `cutoff`. An evicted
    /// session that shows up again is re-seeded from the database.
    pub fn evict_idle(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, state| state.last_log >= cutoff);
        before - self.sessions.len()
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn fresh() -> SessionState {
        SessionState {
            application_name: None,
            status: SessionStatus::Ok,
            session_line_num: 0,
            statement_id: 0,
            substatement_id: 0,
            last_log: Utc::now(),
        }
    }

    #[test]
    fn test_line_gate_is_strict() {
        let mut state = fresh();
        state.session_line_num = 10;

        assert!(!state.accepts_line(9));
        assert!(!state.accepts_line(10));
        assert!(state.accepts_line(11));
    }

    #[test]
    fn test_statement_gating_sequence() {
        let mut state = fresh();

        // first audit record of statement 1
        assert!(state.accepts_statement(1));
        state.statement_id = 1;
        state.substatement_id = 0;
        assert!(state.accepts_substatement(1, 1));
        state.substatement_id = 1;

        // another line for the same substatement: only detail rows
        assert!(!state.accepts_statement(1));
        assert!(!state.accepts_substatement(1, 1));

        // next substatement of the same statement
        assert!(state.accepts_substatement(1, 2));
        state.substatement_id = 2;

        // new statement resets the substatement mark
        assert!(state.accepts_statement(2));
        state.statement_id = 2;
        state.substatement_id = 0;
        assert!(state.accepts_substatement(2, 1));

        // a replayed older statement is ignored entirely
        assert!(!state.accepts_statement(1));
        assert!(!state.accepts_substatement(1, 1));
    }

    #[test]
    fn test_status_round_trip() {
        assert_eq!(SessionStatus::Ok.as_str(), "ok");
        assert_eq!(SessionStatus::Error.as_str(), "error");
        assert_eq!(SessionStatus::from_db("error"), SessionStatus::Error);
        assert_eq!(SessionStatus::from_db("ok"), SessionStatus::Ok);
    }

    #[test]
    fn test_evict_idle_sessions() {
        let mut cache = SessionCache::new();
        let now = Utc::now();

        let mut stale = fresh();
        stale.last_log = now - Duration::hours(2);
        cache.insert("old".to_string(), stale);

        let mut active = fresh();
        active.last_log = now;
        cache.insert("new".to_string(), active);

        let evicted = cache.evict_idle(now - Duration::hours(1));
        assert_eq!(evicted, 1);
        assert!(!cache.contains("old"));
        assert!(cache.contains("new"));
    }
}
