use rusqlite::types::Value;
use tokio::sync::oneshot;

use crate::error::DriverError;
use crate::results::QueryResult;

pub(super) type Reply<T> = oneshot::Sender<Result<T, DriverError>>;

pub(super) enum Command {
    Execute {
        sql: String,
        params: Vec<Value>,
        respond_to: Reply<QueryResult>,
    },
    Prepare {
        statement_id: u64,
        sql: String,
        respond_to: Reply<()>,
    },
    ExecutePrepared {
        statement_id: u64,
        params: Vec<Value>,
        respond_to: Reply<QueryResult>,
    },
    /// Statement-free control SQL such as `BEGIN` / `COMMIT` / `ROLLBACK`.
    Batch {
        sql: &'static str,
        respond_to: Reply<()>,
    },
    Shutdown,
}
