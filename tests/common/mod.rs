//! Scripted in-process transport shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sql_resilient::prelude::*;
use sql_resilient::{Connection, ConnectionFault, Connector, FaultSink, PreparedHandle};
use tokio::sync::watch;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Observable fake database. Clones share state.
#[derive(Clone)]
pub struct ScriptedDb {
    shared: Arc<Shared>,
}

struct Shared {
    connects: AtomicUsize,
    failing_connects: AtomicUsize,
    destroyed: AtomicUsize,
    next_id: AtomicU64,
    prepares: Mutex<Vec<String>>,
    executed: Mutex<Vec<String>>,
    failing_sql: Mutex<HashSet<String>>,
    gate: watch::Sender<bool>,
    connect_gate: watch::Sender<bool>,
    last_sink: Mutex<Option<FaultSink>>,
}

impl Default for ScriptedDb {
    fn default() -> Self {
        let (gate, _) = watch::channel(true);
        let (connect_gate, _) = watch::channel(true);
        Self {
            shared: Arc::new(Shared {
                connects: AtomicUsize::new(0),
                failing_connects: AtomicUsize::new(0),
                destroyed: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
                prepares: Mutex::new(Vec::new()),
                executed: Mutex::new(Vec::new()),
                failing_sql: Mutex::new(HashSet::new()),
                gate,
                connect_gate,
                last_sink: Mutex::new(None),
            }),
        }
    }
}

impl ScriptedDb {
    pub fn manager(&self) -> ConnectionManager {
        self.manager_with(DriverOptions::new())
    }

    pub fn manager_with(&self, options: DriverOptions) -> ConnectionManager {
        ConnectionManager::new(
            ScriptedConnector { db: self.clone() },
            ConnectionParams::new().host("scripted").database("testing"),
            options.with_reconnect_delay(Duration::from_millis(50)),
        )
    }

    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.shared.destroyed.load(Ordering::SeqCst)
    }

    /// Fail the next `count` connection attempts.
    pub fn fail_next_connects(&self, count: usize) {
        self.shared.failing_connects.store(count, Ordering::SeqCst);
    }

    /// PREPARE and ad-hoc execution of `sql` fail with a parse error.
    pub fn reject_sql(&self, sql: &str) {
        self.shared.failing_sql.lock().unwrap().insert(sql.to_owned());
    }

    pub fn prepares_of(&self, sql: &str) -> usize {
        self.shared
            .prepares
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.as_str() == sql)
            .count()
    }

    pub fn prepare_count(&self) -> usize {
        self.shared.prepares.lock().unwrap().len()
    }

    pub fn executed(&self) -> Vec<String> {
        self.shared.executed.lock().unwrap().clone()
    }

    /// Block every PREPARE until [`ScriptedDb::release_prepares`].
    pub fn hold_prepares(&self) {
        self.shared.gate.send_replace(false);
    }

    pub fn release_prepares(&self) {
        self.shared.gate.send_replace(true);
    }

    /// Block every raw connect until [`ScriptedDb::release_connects`].
    pub fn hold_connects(&self) {
        self.shared.connect_gate.send_replace(false);
    }

    pub fn release_connects(&self) {
        self.shared.connect_gate.send_replace(true);
    }

    /// Report a connection-fatal error on the most recent connection.
    pub fn inject_fault(&self) {
        if let Some(sink) = self.shared.last_sink.lock().unwrap().as_ref() {
            sink.report(ConnectionFault::new(
                "PROTOCOL_CONNECTION_LOST",
                "Connection lost: The server closed the connection.",
            ));
        }
    }
}

pub struct ScriptedConnector {
    db: ScriptedDb,
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        _params: &ConnectionParams,
        faults: FaultSink,
    ) -> Result<Arc<dyn Connection>, DriverError> {
        let shared = &self.db.shared;
        shared.connects.fetch_add(1, Ordering::SeqCst);
        let mut gate = shared.connect_gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        let fail = shared
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(DriverError::transport("ECONNREFUSED", "connect ECONNREFUSED"));
        }
        *shared.last_sink.lock().unwrap() = Some(faults);
        Ok(Arc::new(ScriptedConnection {
            id: shared.next_id.fetch_add(1, Ordering::SeqCst),
            db: self.db.clone(),
            destroyed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct ScriptedConnection {
    id: u64,
    db: ScriptedDb,
    destroyed: Arc<AtomicBool>,
}

impl ScriptedConnection {
    fn check(&self, sql: &str) -> Result<(), DriverError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(DriverError::ConnectionError("connection destroyed".into()));
        }
        if self.db.shared.failing_sql.lock().unwrap().contains(sql) {
            return Err(DriverError::transport("ER_PARSE_ERROR", "You have an error in your SQL syntax"));
        }
        Ok(())
    }

    fn record(&self, sql: &str) {
        self.db.shared.executed.lock().unwrap().push(sql.to_owned());
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn id(&self) -> u64 {
        self.id
    }

    async fn execute(&self, sql: &str, _params: Vec<SqlValue>) -> Result<QueryResult, DriverError> {
        self.check(sql)?;
        self.record(sql);
        Ok(QueryResult::affected(1, None))
    }

    async fn prepare(&self, sql: &str) -> Result<Arc<dyn PreparedHandle>, DriverError> {
        self.db.shared.prepares.lock().unwrap().push(sql.to_owned());
        let mut gate = self.db.shared.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        self.check(sql)?;
        Ok(Arc::new(ScriptedPrepared {
            sql: sql.to_owned(),
            db: self.db.clone(),
            destroyed: Arc::clone(&self.destroyed),
        }))
    }

    async fn begin_transaction(&self) -> Result<(), DriverError> {
        self.check("BEGIN")?;
        self.record("BEGIN");
        Ok(())
    }

    async fn commit(&self) -> Result<(), DriverError> {
        self.check("COMMIT")?;
        self.record("COMMIT");
        Ok(())
    }

    async fn rollback(&self) -> Result<(), DriverError> {
        self.check("ROLLBACK")?;
        self.record("ROLLBACK");
        Ok(())
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.db.shared.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct ScriptedPrepared {
    sql: String,
    db: ScriptedDb,
    destroyed: Arc<AtomicBool>,
}

#[async_trait]
impl PreparedHandle for ScriptedPrepared {
    fn id(&self) -> u64 {
        0
    }

    async fn execute(&self, _params: Vec<SqlValue>) -> Result<QueryResult, DriverError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(DriverError::ConnectionError("connection destroyed".into()));
        }
        self.db.shared.executed.lock().unwrap().push(self.sql.clone());
        Ok(QueryResult::affected(1, None))
    }
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// `wait_connect` with a timeout so a broken manager fails instead of hanging.
pub async fn connected(manager: &ConnectionManager) {
    tokio::time::timeout(Duration::from_secs(2), manager.wait_connect())
        .await
        .expect("manager did not connect in time");
}
