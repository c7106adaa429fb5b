//! SQL text for the prepared statements the ingester runs against the audit
//! schema. `{schema}` is replaced with the quoted schema name at prepare time.

pub const SCHEMA_PROBE: &str = r#"
SELECT count(*)
  FROM pg_catalog.pg_namespace
 WHERE nspname = $1
"#;

pub const SESSION_SELECT: &str = r#"
SELECT application_name,
       state,
       (SELECT coalesce(max(session_line_num), 0)
          FROM {schema}.log_event
         WHERE session_id = $1) AS session_line_num,
       (SELECT coalesce(max(statement_id), 0)
          FROM {schema}.audit_statement
         WHERE session_id = $1) AS statement_id,
       (SELECT coalesce(max(substatement_id), 0)
          FROM {schema}.audit_substatement
         WHERE session_id = $1) AS substatement_id
  FROM {schema}.session
 WHERE session_id = $1
"#;

pub const SESSION_INSERT: &str = r#"
INSERT INTO {schema}.session (session_id, process_id, session_start_time,
                              user_name, application_name, connection_from, state)
VALUES ($1, $2, $3, $4, $5, $6, $7)
"#;

pub const SESSION_UPDATE: &str = r#"
UPDATE {schema}.session
   SET application_name = $1
 WHERE session_id = $2
"#;

pub const LOGON_SELECT: &str = r#"
SELECT last_success,
       current_success,
       last_failure,
       failures_since_last_success
  FROM {schema}.logon
 WHERE user_name = $1
"#;

pub const LOGON_INSERT: &str = r#"
INSERT INTO {schema}.logon (user_name, last_success, current_success,
                            last_failure, failures_since_last_success)
VALUES ($1, $2, $3, $4, $5)
"#;

pub const LOGON_UPDATE: &str = r#"
UPDATE {schema}.logon
   SET last_success = $1,
       current_success = $2,
       last_failure = $3,
       failures_since_last_success = $4
 WHERE user_name = $5
"#;

pub const LOG_INSERT: &str = r#"
INSERT INTO {schema}.log_event (session_id, log_time, session_line_num, command,
                                error_severity, sql_state_code, virtual_transaction_id,
                                transaction_id, message, detail, hint, query, query_pos,
                                internal_query, internal_query_pos, context, location)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
"#;

pub const AUDIT_STATEMENT_INSERT: &str = r#"
INSERT INTO {schema}.audit_statement (session_id, statement_id)
VALUES ($1, $2)
"#;

/// Marks every statement in the session whose substatements ran under the
/// erroring row's virtual transaction.
pub const AUDIT_STATEMENT_ERROR_UPDATE: &str = r#"
UPDATE {schema}.audit_statement
   SET state = 'error',
       error_session_line_num = $1
 WHERE (session_id, statement_id) IN
       (SELECT detail.session_id,
               detail.statement_id
          FROM {schema}.log_event
               INNER JOIN {schema}.audit_substatement_detail detail
                  ON detail.session_id = log_event.session_id
                 AND detail.session_line_num = log_event.session_line_num
         WHERE log_event.session_id = $2
           AND log_event.virtual_transaction_id = $3)
"#;

pub const AUDIT_SUBSTATEMENT_INSERT: &str = r#"
INSERT INTO {schema}.audit_substatement (session_id, statement_id, substatement_id,
                                         substatement, parameter)
VALUES ($1, $2, $3, $4, $5)
"#;

pub const AUDIT_SUBSTATEMENT_DETAIL_INSERT: &str = r#"
INSERT INTO {schema}.audit_substatement_detail (session_id, statement_id, substatement_id,
                                                session_line_num, audit_type, class,
                                                command, object_type, object_name)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
"#;

/// Splices the quoted schema name into a statement template.
pub fn render(template: &str, quoted_schema: &str) -> String {
    template.replace("{schema}", quoted_schema)
}

/// Quotes an identifier for splicing into SQL text. Logging-server schema
/// names carry host names, which are not bare-identifier safe.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
