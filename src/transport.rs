//! Capability interface consumed from the underlying SQL client.
//!
//! The connection manager never speaks a wire protocol itself. A transport opens one
//! physical connection per [`Connector::connect`] call and reports connection-fatal
//! failures that happen later through the [`FaultSink`] it was handed.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::ConnectionParams;
use crate::error::DriverError;
use crate::results::QueryResult;
use crate::types::SqlValue;

/// Opens physical connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open and authenticate a new physical connection.
    ///
    /// # Errors
    /// Returns the transport's failure if the connection cannot be established.
    async fn connect(
        &self,
        params: &ConnectionParams,
        faults: FaultSink,
    ) -> Result<Arc<dyn Connection>, DriverError>;
}

/// One live physical connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Session identifier used in logs (the server thread id for MySQL).
    fn id(&self) -> u64;

    /// Execute ad-hoc SQL with positional parameters.
    async fn execute(&self, sql: &str, params: Vec<SqlValue>) -> Result<QueryResult, DriverError>;

    /// Prepare `sql` on this connection. The handle is only valid for this connection.
    async fn prepare(&self, sql: &str) -> Result<Arc<dyn PreparedHandle>, DriverError>;

    async fn begin_transaction(&self) -> Result<(), DriverError>;

    async fn commit(&self) -> Result<(), DriverError>;

    async fn rollback(&self) -> Result<(), DriverError>;

    /// Tear the connection down. Must be idempotent; later calls on the connection fail.
    fn destroy(&self);
}

/// A statement prepared on one physical connection.
#[async_trait]
pub trait PreparedHandle: Send + Sync {
    fn id(&self) -> u64;

    async fn execute(&self, params: Vec<SqlValue>) -> Result<QueryResult, DriverError>;
}

/// Asynchronous connection-fatal failure, the equivalent of the client's `error` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionFault {
    pub code: String,
    pub message: String,
}

impl ConnectionFault {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConnectionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Where a transport reports [`ConnectionFault`]s for the connection it opened.
#[derive(Debug, Clone)]
pub struct FaultSink {
    sender: mpsc::UnboundedSender<ConnectionFault>,
}

impl FaultSink {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<ConnectionFault>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Report a fault. Reports after the manager stopped listening are dropped.
    pub fn report(&self, fault: ConnectionFault) {
        let _ = self.sender.send(fault);
    }

    /// A sink whose reports go nowhere, for driving a transport outside the manager.
    #[must_use]
    pub fn detached() -> Self {
        let (sink, _receiver) = Self::channel();
        sink
    }
}
