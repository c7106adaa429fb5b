use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use csv::ByteRecord;
use tracing::{debug, error, info};

use super::logon::next_logon;
use super::session::{SessionCache, SessionState, SessionStatus};
use crate::cli::CliArguments;
use crate::database::{Gateway, ETL_USER};
use crate::error::Result;
use crate::logfile::{first_log_file, next_log_file, LogReader};
use crate::record::{AuditRecord, LogRow};

/// Delay between polls of an exhausted log file.
const POLL_DELAY: Duration = Duration::from_millis(100);
/// Delay before restarting after a row-level failure.
const RECOVERY_DELAY: Duration = Duration::from_secs(5);
/// Substituted for connection metadata the log row does not carry.
const UNKNOWN: &str = "[unknown]";

/// The driving loop. Owns every piece of mutable state, so error recovery is
/// a matter of dropping the caches and re-reading the directory; the line
/// gate makes the replay idempotent.
pub struct Ingester {
    args: CliArguments,
    databases: HashMap<String, Option<Gateway>>,
    sessions: SessionCache,
}

impl Ingester {
    pub fn new(args: CliArguments) -> Self {
        Self {
            args,
            databases: HashMap::new(),
            sessions: SessionCache::new(),
        }
    }

    pub async fn run(mut self) {
        info!(log_path = %self.args.log_path.display(), "ingest loop started");

        loop {
            if let Err(e) = self.tail().await {
                error!(error = %e, "ingest failed, discarding caches and restarting");
                self.reset();
                tokio::time::sleep(RECOVERY_DELAY).await;
            }
        }
    }

    fn reset(&mut self) {
        self.databases.clear();
        self.sessions.clear();
    }

    async fn tail(&mut self) -> Result<()> {
        let first = first_log_file(&self.args.log_path)?;
        info!(file = %first.display(), "tailing");
        let mut reader = LogReader::open(&first)?;

        loop {
            let batch = reader.poll()?;

            if batch.is_empty() {
                if let Some(next) = next_log_file(&self.args.log_path, &file_name(reader.path()))? {
                    info!(file = %next.display(), "log rotated");
                    reader = LogReader::open(&next)?;
                    continue;
                }

                let evicted = self.sessions.evict_idle(Utc::now() - chrono::Duration::hours(1));
                if evicted > 0 {
                    debug!(evicted, remaining = self.sessions.len(), "evicted idle sessions");
                }

                tokio::time::sleep(POLL_DELAY).await;
                continue;
            }

            for record in &batch {
                self.process(record).await?;
            }
        }
    }

    async fn process(&mut self, record: &ByteRecord) -> Result<()> {
        let row = LogRow::from_record(record)?;

        // the etl role's own activity is never re-ingested
        if row.user_name.as_deref() == Some(ETL_USER) {
            return Ok(());
        }
        let database = match row.database_name.clone() {
            Some(database) => database,
            None => return Ok(()),
        };

        if !self.databases.contains_key(&database) {
            let gateway = Gateway::connect(&self.args, &database).await?;
            self.databases.insert(database.clone(), gateway);
        }
        let gateway = match self.databases.get(&database) {
            Some(Some(gateway)) => gateway,
            _ => return Ok(()), // no audit schema there, memoized
        };

        Self::ensure_session(gateway, &mut self.sessions, &row).await?;
        let session = match self.sessions.get_mut(&row.session_id) {
            Some(session) => session,
            None => return Ok(()),
        };
        session.last_log = Utc::now();

        // keep the most recently observed application name
        if let Some(application_name) = row.application_name.as_deref() {
            if session.accepts_line(row.session_line_num)
                && session.application_name.as_deref() != Some(application_name)
            {
                gateway
                    .session_update(application_name, &row.session_id)
                    .await?;
                session.application_name = Some(application_name.to_string());
            }
        }

        if !session.accepts_line(row.session_line_num) {
            debug!(
                session = %row.session_id,
                line = row.session_line_num,
                mark = session.session_line_num,
                "line already ingested, skipping"
            );
            return Ok(());
        }

        // audit payloads live in their own tables, not in the message column
        let mut message = row.message.as_deref();
        if let Some(payload) = row.audit_payload() {
            let audit = AuditRecord::parse(payload)?;
            Self::write_audit(gateway, session, &row, &audit).await?;
            message = None;
        }

        gateway.log_insert(&row, message).await?;
        session.session_line_num = row.session_line_num;

        if row.is_error() {
            gateway
                .audit_statement_error(
                    row.session_line_num,
                    &row.session_id,
                    row.virtual_transaction_id.as_deref(),
                )
                .await?;
        }

        gateway.commit().await?;
        Ok(())
    }

    /// Makes sure the session is cached. An unknown session is recovered
    /// from the audit tables when it exists there, otherwise inserted fresh
    /// along with its logon history.
    async fn ensure_session(
        gateway: &Gateway,
        sessions: &mut SessionCache,
        row: &LogRow,
    ) -> Result<()> {
        if sessions.contains(&row.session_id) {
            return Ok(());
        }

        if let Some(found) = gateway.session_select(&row.session_id).await? {
            // a session this process was mid-way through before a restart
            debug!(
                session = %row.session_id,
                line = found.session_line_num,
                statement = found.statement_id,
                "recovered session marks"
            );
            sessions.insert(
                row.session_id.clone(),
                SessionState {
                    application_name: found.application_name,
                    status: SessionStatus::from_db(&found.state),
                    session_line_num: found.session_line_num,
                    statement_id: found.statement_id,
                    substatement_id: found.substatement_id,
                    last_log: Utc::now(),
                },
            );
            return Ok(());
        }

        let status = if row.is_authentication_failure() {
            SessionStatus::Error
        } else {
            SessionStatus::Ok
        };
        let application_name = row
            .application_name
            .clone()
            .unwrap_or_else(|| UNKNOWN.to_string());
        let connection_from = row.connection_from.as_deref().unwrap_or(UNKNOWN);

        gateway
            .session_insert(
                &row.session_id,
                row.process_id,
                row.session_start_time,
                row.user_name.as_deref(),
                &application_name,
                connection_from,
                status.as_str(),
            )
            .await?;

        // logon history is keyed by user; background rows carry none
        if let Some(user_name) = row.user_name.as_deref() {
            let prior = gateway.logon_select(user_name).await?;
            let logon = next_logon(prior.as_ref(), status, row.session_start_time);
            match prior {
                Some(_) => gateway.logon_update(user_name, &logon).await?,
                None => gateway.logon_insert(user_name, &logon).await?,
            }
        }
        gateway.commit().await?;

        info!(
            session = %row.session_id,
            user = row.user_name.as_deref().unwrap_or(UNKNOWN),
            state = status.as_str(),
            "new session"
        );

        sessions.insert(
            row.session_id.clone(),
            SessionState {
                application_name: Some(application_name),
                status,
                session_line_num: 0,
                statement_id: 0,
                substatement_id: 0,
                last_log: Utc::now(),
            },
        );
        Ok(())
    }

    /// Routes one embedded audit record through the three-way gate. Parent
    /// statement and substatement rows are written once; every gated line
    /// adds a detail row.
    async fn write_audit(
        gateway: &Gateway,
        session: &mut SessionState,
        row: &LogRow,
        audit: &AuditRecord,
    ) -> Result<()> {
        if session.accepts_statement(audit.statement_id) {
            gateway
                .audit_statement_insert(&row.session_id, audit.statement_id)
                .await?;
            session.statement_id = audit.statement_id;
            session.substatement_id = 0;
        }

        if session.accepts_substatement(audit.statement_id, audit.substatement_id) {
            gateway
                .audit_substatement_insert(
                    &row.session_id,
                    audit.statement_id,
                    audit.substatement_id,
                    audit.statement.as_deref(),
                    audit.parameter.as_deref(),
                )
                .await?;
            session.substatement_id = audit.substatement_id;
        }

        if session.accepts_line(row.session_line_num) {
            gateway
                .audit_substatement_detail_insert(
                    &row.session_id,
                    audit.statement_id,
                    audit.substatement_id,
                    row.session_line_num,
                    lower(&audit.audit_type),
                    lower(&audit.class),
                    lower(&audit.command),
                    lower(&audit.object_type),
                    lower(&audit.object_name),
                )
                .await?;
        }

        Ok(())
    }
}

fn lower(value: &Option<String>) -> Option<String> {
    value.as_deref().map(|v| v.to_lowercase())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
        .to_string()
}
