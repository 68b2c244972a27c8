use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::config::ConnectionParams;
use crate::error::DriverError;
use crate::results::QueryResult;
use crate::transport::{Connection, Connector, FaultSink, PreparedHandle};
use crate::types::SqlValue;

use super::params::to_sqlite_values;
use super::worker::SqliteWorker;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opens `SQLite` databases. `ConnectionParams::database` is the file path (or `:memory:`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector;

#[async_trait]
impl Connector for SqliteConnector {
    async fn connect(
        &self,
        params: &ConnectionParams,
        faults: FaultSink,
    ) -> Result<Arc<dyn Connection>, DriverError> {
        let path = params.database.as_deref().ok_or_else(|| {
            DriverError::ConfigError("SQLite requires `database` to be a file path".into())
        })?;
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let worker = SqliteWorker::open(PathBuf::from(path), id, faults).await?;
        tracing::debug!(connection_id = id, path, "sqlite connection opened");
        Ok(Arc::new(SqliteConnection {
            worker: Arc::new(worker),
            next_statement_id: AtomicU64::new(1),
        }))
    }
}

/// `SQLite` connection backed by a dedicated worker thread.
pub struct SqliteConnection {
    worker: Arc<SqliteWorker>,
    next_statement_id: AtomicU64,
}

#[async_trait]
impl Connection for SqliteConnection {
    fn id(&self) -> u64 {
        self.worker.worker_id()
    }

    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<QueryResult, DriverError> {
        self.worker
            .execute(sql.to_owned(), to_sqlite_values(&params))
            .await
    }

    async fn prepare(&self, sql: &str) -> Result<Arc<dyn PreparedHandle>, DriverError> {
        let statement_id = self.next_statement_id.fetch_add(1, Ordering::Relaxed);
        self.worker.prepare(statement_id, sql.to_owned()).await?;
        Ok(Arc::new(SqlitePrepared {
            statement_id,
            worker: Arc::clone(&self.worker),
        }))
    }

    async fn begin_transaction(&self) -> Result<(), DriverError> {
        self.worker.batch("BEGIN").await
    }

    async fn commit(&self) -> Result<(), DriverError> {
        self.worker.batch("COMMIT").await
    }

    async fn rollback(&self) -> Result<(), DriverError> {
        self.worker.batch("ROLLBACK").await
    }

    fn destroy(&self) {
        self.worker.shutdown();
    }
}

/// A statement id registered on one worker's connection.
struct SqlitePrepared {
    statement_id: u64,
    worker: Arc<SqliteWorker>,
}

#[async_trait]
impl PreparedHandle for SqlitePrepared {
    fn id(&self) -> u64 {
        self.statement_id
    }

    async fn execute(&self, params: Vec<SqlValue>) -> Result<QueryResult, DriverError> {
        self.worker
            .execute_prepared(self.statement_id, to_sqlite_values(&params))
            .await
    }
}
