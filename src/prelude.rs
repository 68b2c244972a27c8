//! Convenient imports for common functionality.

pub use crate::config::{ConnectionParams, DriverOptions};
pub use crate::error::DriverError;
pub use crate::manager::{ConnectionManager, StatementCall};
pub use crate::results::{QueryResult, Row};
pub use crate::statement::Statement;
pub use crate::synchronizer::{SyncItem, SyncOutcome, TableSynchronizer};
pub use crate::types::SqlValue;

#[cfg(feature = "sqlite")]
pub use crate::sqlite::SqliteConnector;
