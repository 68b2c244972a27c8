use thiserror::Error;

/// Errors surfaced by the connection manager, its statement cache and the transports.
///
/// The type is `Clone` because a single failed preparation is delivered to every caller
/// waiting on that statement.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    /// No physical connection is currently available.
    #[error("NOT CONNECTED")]
    NotConnected,

    /// The statement lost its prepared handle between preparation and execution.
    #[error("statement not prepared: {0}")]
    NotPrepared(String),

    /// The physical connection went away underneath an operation.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Failure reported by the underlying transport.
    #[error("Transport error [{code}]: {message}")]
    TransportError { code: String, message: String },

    /// A PREPARE call failed; delivered to every waiter queued on the statement.
    #[error("failed to prepare `{sql}`: {source}")]
    PreparationError {
        sql: String,
        #[source]
        source: Box<DriverError>,
    },

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Parameter conversion error: {0}")]
    ParameterError(String),

    #[error("Other database error: {0}")]
    Other(String),
}

impl DriverError {
    /// Build a transport error from a code and message.
    pub fn transport(code: impl Into<String>, message: impl Into<String>) -> Self {
        DriverError::TransportError {
            code: code.into(),
            message: message.into(),
        }
    }

    /// True when the failure was caused by a missing or lost connection, including
    /// preparations that failed for that reason.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        match self {
            DriverError::NotConnected | DriverError::ConnectionError(_) => true,
            DriverError::PreparationError { source, .. } => source.is_connection_error(),
            _ => false,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for DriverError {
    fn from(err: rusqlite::Error) -> Self {
        let code = match &err {
            rusqlite::Error::SqliteFailure(failure, _) => sqlite_code_name(failure.extended_code),
            _ => "SQLITE_ERROR".to_string(),
        };
        DriverError::TransportError {
            code,
            message: err.to_string(),
        }
    }
}

/// Name of the primary result code (the low byte of an extended code).
#[cfg(feature = "sqlite")]
fn sqlite_code_name(extended_code: i32) -> String {
    use rusqlite::ffi;

    let name = match extended_code & 0xff {
        ffi::SQLITE_ERROR => "SQLITE_ERROR",
        ffi::SQLITE_INTERNAL => "SQLITE_INTERNAL",
        ffi::SQLITE_PERM => "SQLITE_PERM",
        ffi::SQLITE_ABORT => "SQLITE_ABORT",
        ffi::SQLITE_BUSY => "SQLITE_BUSY",
        ffi::SQLITE_LOCKED => "SQLITE_LOCKED",
        ffi::SQLITE_NOMEM => "SQLITE_NOMEM",
        ffi::SQLITE_READONLY => "SQLITE_READONLY",
        ffi::SQLITE_INTERRUPT => "SQLITE_INTERRUPT",
        ffi::SQLITE_IOERR => "SQLITE_IOERR",
        ffi::SQLITE_CORRUPT => "SQLITE_CORRUPT",
        ffi::SQLITE_NOTFOUND => "SQLITE_NOTFOUND",
        ffi::SQLITE_FULL => "SQLITE_FULL",
        ffi::SQLITE_CANTOPEN => "SQLITE_CANTOPEN",
        ffi::SQLITE_PROTOCOL => "SQLITE_PROTOCOL",
        ffi::SQLITE_SCHEMA => "SQLITE_SCHEMA",
        ffi::SQLITE_TOOBIG => "SQLITE_TOOBIG",
        ffi::SQLITE_CONSTRAINT => "SQLITE_CONSTRAINT",
        ffi::SQLITE_MISMATCH => "SQLITE_MISMATCH",
        ffi::SQLITE_MISUSE => "SQLITE_MISUSE",
        ffi::SQLITE_NOLFS => "SQLITE_NOLFS",
        ffi::SQLITE_AUTH => "SQLITE_AUTH",
        ffi::SQLITE_RANGE => "SQLITE_RANGE",
        ffi::SQLITE_NOTADB => "SQLITE_NOTADB",
        primary => return format!("SQLITE_{primary}"),
    };
    name.to_string()
}
