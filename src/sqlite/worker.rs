// Worker thread owning one rusqlite connection.
//
// - channel: the command protocol
// - dispatcher: the loop running on the worker thread
// - manager: the async handle that sends commands and awaits replies

mod channel;
mod dispatcher;
mod manager;

pub(crate) use manager::SqliteWorker;
