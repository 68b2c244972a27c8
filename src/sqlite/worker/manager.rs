use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread;

use rusqlite::types::Value;
use tokio::sync::oneshot;

use crate::error::DriverError;
use crate::results::QueryResult;
use crate::transport::FaultSink;

use super::channel::{Command, Reply};
use super::dispatcher::run_sqlite_worker;

const STATEMENT_CACHE_CAPACITY: usize = 256;

pub(crate) struct SqliteWorker {
    sender: Sender<Command>,
    worker_id: u64,
    closed: AtomicBool,
}

impl SqliteWorker {
    /// Spawn the worker thread and open `path` on it. Resolves once the database is open.
    pub(crate) async fn open(
        path: PathBuf,
        worker_id: u64,
        faults: FaultSink,
    ) -> Result<Self, DriverError> {
        let (sender, receiver) = mpsc::channel::<Command>();
        let (opened_tx, opened_rx) = oneshot::channel::<Result<(), DriverError>>();
        thread::Builder::new()
            .name(format!("sqlite-worker-{worker_id}"))
            .spawn(move || {
                let conn = match rusqlite::Connection::open(&path) {
                    Ok(conn) => conn,
                    Err(err) => {
                        let _ = opened_tx.send(Err(DriverError::from(err)));
                        return;
                    }
                };
                conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
                let _ = opened_tx.send(Ok(()));
                run_sqlite_worker(&conn, &receiver, &faults);
            })
            .map_err(|err| {
                DriverError::ConnectionError(format!("failed to spawn SQLite worker thread: {err}"))
            })?;

        opened_rx
            .await
            .map_err(|_| connection_error("SQLite worker exited while opening"))??;

        Ok(Self {
            sender,
            worker_id,
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn worker_id(&self) -> u64 {
        self.worker_id
    }

    /// Stop the worker thread. Idempotent.
    pub(crate) fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.sender.send(Command::Shutdown);
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
        drop_message: &'static str,
    ) -> Result<T, DriverError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(connection_error("SQLite connection destroyed"));
        }
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .map_err(|_| connection_error("SQLite worker closed"))?;
        rx.await.map_err(|_| connection_error(drop_message))?
    }

    pub(crate) async fn execute(
        &self,
        sql: String,
        params: Vec<Value>,
    ) -> Result<QueryResult, DriverError> {
        self.request(
            |respond_to| Command::Execute {
                sql,
                params,
                respond_to,
            },
            "SQLite worker dropped while executing",
        )
        .await
    }

    pub(crate) async fn prepare(&self, statement_id: u64, sql: String) -> Result<(), DriverError> {
        self.request(
            |respond_to| Command::Prepare {
                statement_id,
                sql,
                respond_to,
            },
            "SQLite worker dropped while preparing statement",
        )
        .await
    }

    pub(crate) async fn execute_prepared(
        &self,
        statement_id: u64,
        params: Vec<Value>,
    ) -> Result<QueryResult, DriverError> {
        self.request(
            |respond_to| Command::ExecutePrepared {
                statement_id,
                params,
                respond_to,
            },
            "SQLite worker dropped while executing prepared statement",
        )
        .await
    }

    pub(crate) async fn batch(&self, sql: &'static str) -> Result<(), DriverError> {
        self.request(
            |respond_to| Command::Batch { sql, respond_to },
            "SQLite worker dropped while executing batch",
        )
        .await
    }
}

impl Drop for SqliteWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn connection_error(message: &str) -> DriverError {
    DriverError::ConnectionError(message.into())
}
