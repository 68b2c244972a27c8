//! Self-healing access to one SQL database.
//!
//! A [`ConnectionManager`] owns a single physical connection. It opens it in the background,
//! runs migration hooks, prepares every cached [`Statement`] and then announces readiness.
//! When the connection dies it tears everything down and retries on a fixed delay, so
//! callers hold on to managers and statements across outages instead of reopening them.
//!
//! ```rust,no_run
//! use sql_resilient::prelude::*;
//!
//! # async fn run() -> Result<(), DriverError> {
//! let params = ConnectionParams::new().database("app.db");
//! let manager = ConnectionManager::new(SqliteConnector, params, DriverOptions::default());
//! manager.on_migrate(|db| async move {
//!     db.execute_sql("CREATE TABLE IF NOT EXISTS t (id INTEGER PRIMARY KEY, name TEXT)", &[])
//!         .await
//!         .map(|_| ())
//! });
//! manager.connect()?;
//! manager.wait_connect().await;
//!
//! let insert = manager.statement("INSERT INTO t (name) VALUES (?)");
//! insert.execute(&[SqlValue::from("alice")]).await?;
//! # Ok(())
//! # }
//! ```

pub mod canonical;
pub mod config;
pub mod error;
pub mod manager;
pub mod prelude;
pub mod results;
pub mod statement;
pub mod synchronizer;
pub mod transport;
pub mod types;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use config::{ConnectionParams, DriverOptions};
pub use error::DriverError;
pub use manager::{ConnectionManager, StatementCall};
pub use results::{QueryResult, Row};
pub use statement::Statement;
pub use synchronizer::{SyncItem, SyncOutcome, TableSynchronizer};
pub use transport::{Connection, ConnectionFault, Connector, FaultSink, PreparedHandle};
pub use types::SqlValue;
