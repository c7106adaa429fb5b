use chrono::{DateTime, Utc};
use tokio_postgres::{Client, Config, NoTls, Statement};
use tracing::{debug, error, info};

use super::{schema, ETL_USER};
use crate::cli::CliArguments;
use crate::error::Result;
use crate::record::LogRow;

/// Ingest progress recovered from the audit tables for one session.
#[derive(Debug, Clone)]
pub struct SessionRow {
    pub application_name: Option<String>,
    pub state: String,
    pub session_line_num: i64,
    pub statement_id: i64,
    pub substatement_id: i64,
}

/// One row of the per-user logon history table.
#[derive(Debug, Clone, PartialEq)]
pub struct LogonRow {
    pub last_success: Option<DateTime<Utc>>,
    pub current_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub failures_since_last_success: i32,
}

struct Statements {
    session_select: Statement,
    session_insert: Statement,
    session_update: Statement,
    logon_select: Statement,
    logon_insert: Statement,
    logon_update: Statement,
    log_insert: Statement,
    audit_statement_insert: Statement,
    audit_statement_error_update: Statement,
    audit_substatement_insert: Statement,
    audit_substatement_detail_insert: Statement,
}

impl Statements {
    async fn prepare(client: &Client, schema_name: &str) -> Result<Statements> {
        let quoted = schema::quote_ident(schema_name);

        async fn one(client: &Client, template: &str, quoted: &str) -> Result<Statement> {
            Ok(client.prepare(&schema::render(template, quoted)).await?)
        }

        Ok(Statements {
            session_select: one(client, schema::SESSION_SELECT, &quoted).await?,
            session_insert: one(client, schema::SESSION_INSERT, &quoted).await?,
            session_update: one(client, schema::SESSION_UPDATE, &quoted).await?,
            logon_select: one(client, schema::LOGON_SELECT, &quoted).await?,
            logon_insert: one(client, schema::LOGON_INSERT, &quoted).await?,
            logon_update: one(client, schema::LOGON_UPDATE, &quoted).await?,
            log_insert: one(client, schema::LOG_INSERT, &quoted).await?,
            audit_statement_insert: one(client, schema::AUDIT_STATEMENT_INSERT, &quoted).await?,
            audit_statement_error_update: one(client, schema::AUDIT_STATEMENT_ERROR_UPDATE, &quoted)
                .await?,
            audit_substatement_insert: one(client, schema::AUDIT_SUBSTATEMENT_INSERT, &quoted)
                .await?,
            audit_substatement_detail_insert: one(
                client,
                schema::AUDIT_SUBSTATEMENT_DETAIL_INSERT,
                &quoted,
            )
            .await?,
        })
    }
}

/// One live connection to a database that carries the audit schema, with the
/// full statement bundle prepared against that schema.
pub struct Gateway {
    client: Client,
    statements: Statements,
}

impl Gateway {
    /// Connects for rows from `database`. Returns None when the computed
    /// audit schema does not exist there, in which case the connection is
    /// closed and the caller memoizes the decision.
    pub async fn connect(args: &CliArguments, database: &str) -> Result<Option<Gateway>> {
        let mut config = Config::new();
        config
            .host(args.connect_host())
            .port(args.connect_port())
            .user(&args.database_user())
            .dbname(args.connect_dbname(database));

        let (client, connection) = config.connect(NoTls).await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection error");
            }
        });

        // All audit writes run as the etl role for the life of the connection.
        client
            .batch_execute(&format!("set session authorization {}", ETL_USER))
            .await?;

        let schema_name = args.schema_name(database);
        let present: i64 = client
            .query_one(schema::SCHEMA_PROBE, &[&schema_name])
            .await?
            .get(0);

        if present == 0 {
            info!(
                database = %database,
                schema = %schema_name,
                "audit schema not present, ignoring database"
            );
            return Ok(None);
        }

        let statements = Statements::prepare(&client, &schema_name).await?;

        // Row groups are committed explicitly.
        client.batch_execute("begin").await?;

        info!(database = %database, schema = %schema_name, "connected");
        Ok(Some(Gateway { client, statements }))
    }

    /// Commits the current row group and opens the next transaction.
    pub async fn commit(&self) -> Result<()> {
        self.client.batch_execute("commit; begin").await?;
        Ok(())
    }

    pub async fn session_select(&self, session_id: &str) -> Result<Option<SessionRow>> {
        let row = self
            .client
            .query_opt(&self.statements.session_select, &[&session_id])
            .await?;

        Ok(row.map(|row| SessionRow {
            application_name: row.get(0),
            state: row.get(1),
            session_line_num: row.get(2),
            statement_id: row.get(3),
            substatement_id: row.get(4),
        }))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn session_insert(
        &self,
        session_id: &str,
        process_id: Option<i32>,
        session_start_time: DateTime<Utc>,
        user_name: Option<&str>,
        application_name: &str,
        connection_from: &str,
        state: &str,
    ) -> Result<()> {
        self.client
            .execute(
                &self.statements.session_insert,
                &[
                    &session_id,
                    &process_id,
                    &session_start_time,
                    &user_name,
                    &application_name,
                    &connection_from,
                    &state,
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn session_update(&self, application_name: &str, session_id: &str) -> Result<()> {
        self.client
            .execute(
                &self.statements.session_update,
                &[&application_name, &session_id],
            )
            .await?;
        Ok(())
    }

    pub async fn logon_select(&self, user_name: &str) -> Result<Option<LogonRow>> {
        let row = self
            .client
            .query_opt(&self.statements.logon_select, &[&user_name])
            .await?;

        Ok(row.map(|row| LogonRow {
            last_success: row.get(0),
            current_success: row.get(1),
            last_failure: row.get(2),
            failures_since_last_success: row.get(3),
        }))
    }

    pub async fn logon_insert(&self, user_name: &str, logon: &LogonRow) -> Result<()> {
        self.client
            .execute(
                &self.statements.logon_insert,
                &[
                    &user_name,
                    &logon.last_success,
                    &logon.current_success,
                    &logon.last_failure,
                    &logon.failures_since_last_success,
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn logon_update(&self, user_name: &str, logon: &LogonRow) -> Result<()> {
        self.client
            .execute(
                &self.statements.logon_update,
                &[
                    &logon.last_success,
                    &logon.current_success,
                    &logon.last_failure,
                    &logon.failures_since_last_success,
                    &user_name,
                ],
            )
            .await?;
        Ok(())
    }

    /// Inserts the log event. `message` is passed separately because audit
    /// payloads are nulled out of it before the write.
    pub async fn log_insert(&self, row: &LogRow, message: Option<&str>) -> Result<()> {
        self.client
            .execute(
                &self.statements.log_insert,
                &[
                    &row.session_id,
                    &row.log_time,
                    &row.session_line_num,
                    &row.command_tag,
                    &row.error_severity,
                    &row.sql_state_code,
                    &row.virtual_transaction_id,
                    &row.transaction_id,
                    &message,
                    &row.detail,
                    &row.hint,
                    &row.query,
                    &row.query_pos,
                    &row.internal_query,
                    &row.internal_query_pos,
                    &row.context,
                    &row.location,
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn audit_statement_insert(&self, session_id: &str, statement_id: i64) -> Result<()> {
        self.client
            .execute(
                &self.statements.audit_statement_insert,
                &[&session_id, &statement_id],
            )
            .await?;
        Ok(())
    }

    pub async fn audit_statement_error(
        &self,
        session_line_num: i64,
        session_id: &str,
        virtual_transaction_id: Option<&str>,
    ) -> Result<()> {
        let marked = self
            .client
            .execute(
                &self.statements.audit_statement_error_update,
                &[&session_line_num, &session_id, &virtual_transaction_id],
            )
            .await?;
        if marked > 0 {
            debug!(
                session = %session_id,
                line = session_line_num,
                statements = marked,
                "marked statements as errored"
            );
        }
        Ok(())
    }

    pub async fn audit_substatement_insert(
        &self,
        session_id: &str,
        statement_id: i64,
        substatement_id: i64,
        substatement: Option<&str>,
        parameter: Option<&str>,
    ) -> Result<()> {
        let parameter = parameter.map(|p| vec![p.to_string()]);
        self.client
            .execute(
                &self.statements.audit_substatement_insert,
                &[
                    &session_id,
                    &statement_id,
                    &substatement_id,
                    &substatement,
                    &parameter,
                ],
            )
            .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn audit_substatement_detail_insert(
        &self,
        session_id: &str,
        statement_id: i64,
        substatement_id: i64,
        session_line_num: i64,
        audit_type: Option<String>,
        class: Option<String>,
        command: Option<String>,
        object_type: Option<String>,
        object_name: Option<String>,
    ) -> Result<()> {
        self.client
            .execute(
                &self.statements.audit_substatement_detail_insert,
                &[
                    &session_id,
                    &statement_id,
                    &substatement_id,
                    &session_line_num,
                    &audit_type,
                    &class,
                    &command,
                    &object_type,
                    &object_name,
                ],
            )
            .await?;
        Ok(())
    }
}
