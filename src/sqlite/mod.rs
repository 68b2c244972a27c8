// SQLite transport - one rusqlite connection per physical connection, owned by a worker thread.
//
// - connection: `Connector`/`Connection`/`PreparedHandle` implementations
// - params: binding `SqlValue`s as rusqlite values
// - query: running a statement and collecting its result
// - worker: the thread that owns the rusqlite connection

pub mod connection;
mod params;
mod query;
mod worker;

pub use connection::{SqliteConnection, SqliteConnector};
