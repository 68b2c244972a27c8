//! Connection manager: owns the single physical connection, the migration hooks and the
//! prepared-statement registry.
//!
//! Split into:
//! - lifecycle: connect / accept / disconnect / reconnect transitions
//! - notify: `on_connect` subscribers and `wait_connect`
//! - execute: ad-hoc SQL, batched statements and transactions

mod execute;
mod lifecycle;
mod notify;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::{ConnectionParams, DriverOptions};
use crate::error::DriverError;
use crate::statement::Statement;
use crate::synchronizer::TableSynchronizer;
use crate::transport::{Connection, Connector};

pub use execute::StatementCall;

/// Callback fired on every successful (re)connect.
pub type ConnectCallback =
    Arc<dyn Fn(ConnectionManager) -> BoxFuture<'static, Result<(), DriverError>> + Send + Sync>;

/// Migration hook run before a fresh connection is published.
pub type MigrateCallback =
    Arc<dyn Fn(ConnectionManager) -> BoxFuture<'static, Result<(), DriverError>> + Send + Sync>;

/// Resilient handle over one physical SQL connection.
///
/// Cloning is cheap and every clone drives the same connection. Dropping the last clone
/// cancels pending reconnects and destroys the connection.
#[derive(Clone)]
pub struct ConnectionManager {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    connector: Arc<dyn Connector>,
    params: ConnectionParams,
    options: DriverOptions,
    state: Mutex<ConnectionState>,
    statements: Mutex<StatementRegistry>,
    migrators: Mutex<Vec<MigrateCallback>>,
    signal: watch::Sender<ConnectSignal>,
    runtime: Mutex<Option<Handle>>,
    shutdown: CancellationToken,
}

#[derive(Default)]
struct ConnectionState {
    connection: Option<Arc<dyn Connection>>,
    /// Bumped for every accepted physical connection.
    generation: u64,
    is_connecting: bool,
    is_closed: bool,
    /// Migrations and statement preparation finished for the current connection.
    is_ready: bool,
    connection_token: Option<CancellationToken>,
    listeners: Vec<ConnectCallback>,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ConnectSignal {
    epoch: u64,
    ready: bool,
}

/// SQL text to statement, in registration order. No normalization is applied, so SQL that
/// differs only in whitespace or case gets its own entry.
#[derive(Default)]
struct StatementRegistry {
    by_sql: HashMap<String, usize>,
    ordered: Vec<Statement>,
}

impl StatementRegistry {
    fn get_or_insert(&mut self, sql: &str, create: impl FnOnce() -> Statement) -> Statement {
        if let Some(&idx) = self.by_sql.get(sql) {
            return self.ordered[idx].clone();
        }
        let statement = create();
        self.by_sql.insert(sql.to_owned(), self.ordered.len());
        self.ordered.push(statement.clone());
        statement
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl ConnectionManager {
    /// Build a manager that opens connections through `connector`. Nothing is opened until
    /// [`ConnectionManager::connect`] is called.
    pub fn new(
        connector: impl Connector,
        params: ConnectionParams,
        options: DriverOptions,
    ) -> Self {
        Self::with_connector(Arc::new(connector), params, options)
    }

    pub fn with_connector(
        connector: Arc<dyn Connector>,
        params: ConnectionParams,
        options: DriverOptions,
    ) -> Self {
        let (signal, _) = watch::channel(ConnectSignal::default());
        Self {
            inner: Arc::new(Inner {
                connector,
                params,
                options,
                state: Mutex::new(ConnectionState::default()),
                statements: Mutex::new(StatementRegistry::default()),
                migrators: Mutex::new(Vec::new()),
                signal,
                runtime: Mutex::new(None),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// True while a physical connection is present (including while migrations run).
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    #[must_use]
    pub fn is_debug(&self) -> bool {
        self.inner.options.debug
    }

    #[must_use]
    pub fn database_name(&self) -> Option<&str> {
        self.inner.params.database.as_deref()
    }

    #[must_use]
    pub fn params(&self) -> &ConnectionParams {
        &self.inner.params
    }

    /// The live physical connection, if any.
    #[must_use]
    pub fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.inner.current_connection()
    }

    /// Register a migration hook. Hooks run in registration order on every fresh connection
    /// before it is published; a failing hook tears the connection down.
    pub fn on_migrate<F, Fut>(&self, hook: F)
    where
        F: Fn(ConnectionManager) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DriverError>> + Send + 'static,
    {
        let hook: MigrateCallback = Arc::new(move |manager| hook(manager).boxed());
        lock(&self.inner.migrators).push(hook);
    }

    /// Cached statement for `sql`, created on first use. Safe before or after connecting.
    pub fn statement(&self, sql: &str) -> Statement {
        let weak = Arc::downgrade(&self.inner);
        lock(&self.inner.statements).get_or_insert(sql, || Statement::new(weak, sql))
    }

    /// Prepare every registered statement that is not prepared yet, one at a time.
    /// Individual failures are logged and do not stop the remaining preparations.
    pub async fn prepare_statements(&self) {
        tracing::info!("preparing statements");
        let pending: Vec<Statement> = lock(&self.inner.statements)
            .ordered
            .iter()
            .filter(|statement| !statement.is_prepared())
            .cloned()
            .collect();
        for statement in pending {
            if let Err(err) = statement.prepare().await {
                tracing::error!(sql = statement.sql(), error = %err, "statement preparation failed");
            }
        }
        tracing::info!("statements prepared");
    }

    /// Build a synchronizer for `table`, registering its three statements on this manager.
    pub fn synchronizer(
        &self,
        table: &str,
        filter_fields: &[&str],
        sync_fields: &[&str],
    ) -> TableSynchronizer {
        TableSynchronizer::new(self.clone(), table, filter_fields, sync_fields)
    }
}

impl Inner {
    pub(crate) fn is_connected(&self) -> bool {
        lock(&self.state).connection.is_some()
    }

    pub(crate) fn is_debug(&self) -> bool {
        self.options.debug
    }

    pub(crate) fn current_connection(&self) -> Option<Arc<dyn Connection>> {
        lock(&self.state).connection.clone()
    }

    fn statements_snapshot(&self) -> Vec<Statement> {
        lock(&self.statements).ordered.clone()
    }

    /// Runtime used for background work: the caller's if there is one, otherwise the one
    /// captured by the last `connect()`.
    fn runtime(&self) -> Option<Handle> {
        Handle::try_current()
            .ok()
            .or_else(|| lock(&self.runtime).clone())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(connection) = state.connection.take() {
            connection.destroy();
        }
    }
}
