use std::collections::HashMap;
use std::sync::mpsc::Receiver;

use rusqlite::ErrorCode;
use rusqlite::types::Value;

use crate::error::DriverError;
use crate::results::QueryResult;
use crate::sqlite::query::run_statement;
use crate::transport::{ConnectionFault, FaultSink};

use super::channel::Command;

pub(super) fn run_sqlite_worker(
    conn: &rusqlite::Connection,
    receiver: &Receiver<Command>,
    faults: &FaultSink,
) {
    // Statement ids never leave this connection; the SQL is re-fetched from rusqlite's cache.
    let mut prepared: HashMap<u64, String> = HashMap::new();

    while let Ok(command) = receiver.recv() {
        match command {
            Command::Shutdown => break,
            Command::Execute {
                sql,
                params,
                respond_to,
            } => {
                let res = execute(conn, &sql, &params, faults);
                let _ = respond_to.send(res);
            }
            Command::Prepare {
                statement_id,
                sql,
                respond_to,
            } => {
                let res = match conn.prepare_cached(&sql) {
                    Ok(_) => {
                        prepared.insert(statement_id, sql);
                        Ok(())
                    }
                    Err(err) => Err(settle(err, faults)),
                };
                let _ = respond_to.send(res);
            }
            Command::ExecutePrepared {
                statement_id,
                params,
                respond_to,
            } => {
                let res = match prepared.get(&statement_id) {
                    Some(sql) => execute(conn, sql, &params, faults),
                    None => Err(DriverError::NotPrepared(format!(
                        "unknown statement id {statement_id}"
                    ))),
                };
                let _ = respond_to.send(res);
            }
            Command::Batch { sql, respond_to } => {
                let res = conn.execute_batch(sql).map_err(|err| settle(err, faults));
                let _ = respond_to.send(res);
            }
        }
    }
    tracing::debug!(statements = prepared.len(), "sqlite worker stopped");
}

fn execute(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &[Value],
    faults: &FaultSink,
) -> Result<QueryResult, DriverError> {
    conn.prepare_cached(sql)
        .and_then(|mut stmt| run_statement(conn, &mut stmt, sql, params))
        .map_err(|err| settle(err, faults))
}

/// Convert a rusqlite error, reporting it as a connection fault first when the database
/// handle can no longer be trusted.
fn settle(err: rusqlite::Error, faults: &FaultSink) -> DriverError {
    let fatal = matches!(err.sqlite_error_code(), Some(code) if is_fatal(code));
    let err = DriverError::from(err);
    if fatal && let DriverError::TransportError { code, message } = &err {
        faults.report(ConnectionFault::new(code.clone(), message.clone()));
    }
    err
}

fn is_fatal(code: ErrorCode) -> bool {
    matches!(
        code,
        ErrorCode::CannotOpen
            | ErrorCode::NotADatabase
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::SystemIoFailure
            | ErrorCode::DiskFull
    )
}
