//! Prepared-statement cache entry.
//!
//! A [`Statement`] is bound to its SQL text for the life of the manager, but its prepared
//! handle only lives as long as the physical connection it was prepared on. Concurrent
//! callers share one in-flight PREPARE through a FIFO of waiters.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::oneshot;

use crate::error::DriverError;
use crate::manager::{Inner, lock};
use crate::results::QueryResult;
use crate::transport::PreparedHandle;
use crate::types::{SqlValue, massage_params};

type Waiter = oneshot::Sender<Result<(), DriverError>>;

/// Handle to a cached statement. Clones share the same entry.
#[derive(Clone)]
pub struct Statement {
    inner: Arc<StatementInner>,
}

struct StatementInner {
    sql: Arc<str>,
    manager: Weak<Inner>,
    state: Mutex<PrepareState>,
}

#[derive(Default)]
struct PrepareState {
    handle: Option<Arc<dyn PreparedHandle>>,
    is_preparing: bool,
    waiters: VecDeque<Waiter>,
    /// Bumped by every reset so a PREPARE finishing on a dropped connection is discarded.
    epoch: u64,
}

impl Statement {
    pub(crate) fn new(manager: Weak<Inner>, sql: &str) -> Self {
        Self {
            inner: Arc::new(StatementInner {
                sql: Arc::from(sql),
                manager,
                state: Mutex::new(PrepareState::default()),
            }),
        }
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.inner.sql
    }

    #[must_use]
    pub fn is_prepared(&self) -> bool {
        self.state().handle.is_some()
    }

    /// Execute with positional parameters, preparing first if needed.
    ///
    /// # Errors
    /// [`DriverError::NotConnected`] without a connection, the preparation failure, or
    /// [`DriverError::NotPrepared`] if the handle vanished between preparation and execution.
    pub async fn execute(&self, params: &[SqlValue]) -> Result<QueryResult, DriverError> {
        tracing::trace!(sql = self.sql(), "executing statement");
        if self.is_debug() {
            tracing::info!(sql = self.sql(), ?params, "executing statement");
        }

        if !self.is_prepared() {
            self.prepare().await?;
        }

        let connected = self
            .inner
            .manager
            .upgrade()
            .is_some_and(|manager| manager.is_connected());
        if !connected {
            return Err(DriverError::NotConnected);
        }
        let handle = self
            .state()
            .handle
            .clone()
            .ok_or_else(|| DriverError::NotPrepared(self.sql().to_owned()))?;

        let result = handle
            .execute(massage_params(params))
            .await
            .inspect_err(|err| tracing::error!(sql = self.sql(), error = %err, "statement execution failed"))?;
        if self.is_debug() {
            tracing::info!(sql = self.sql(), rows = result.len(), "statement done");
        }
        Ok(result)
    }

    /// Prepare on the current connection.
    ///
    /// Resolves immediately when already prepared. While a preparation is in flight, joins
    /// its waiters instead of issuing another PREPARE. The preparation itself runs on its
    /// own task, so dropping this future does not abandon the other waiters.
    ///
    /// # Errors
    /// [`DriverError::NotConnected`] without a connection, [`DriverError::PreparationError`]
    /// when the transport rejects the statement, or [`DriverError::ConnectionError`] when the
    /// connection drops mid-preparation.
    pub async fn prepare(&self) -> Result<(), DriverError> {
        let (receiver, start_epoch) = {
            let mut state = self.state();
            if state.handle.is_some() {
                return Ok(());
            }
            let (sender, receiver) = oneshot::channel();
            state.waiters.push_back(sender);
            if state.is_preparing {
                (receiver, None)
            } else {
                state.is_preparing = true;
                (receiver, Some(state.epoch))
            }
        };

        if let Some(epoch) = start_epoch {
            tracing::debug!(sql = self.sql(), "preparing");
            let this = self.clone();
            let preparation = async move { this.run_preparation(epoch).await };
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(preparation);
                }
                Err(_) => preparation.await,
            }
        }

        receiver.await.unwrap_or_else(|_| {
            Err(DriverError::ConnectionError(format!(
                "preparation of `{}` was abandoned",
                self.sql()
            )))
        })
    }

    /// Force the entry back to unprepared after the connection dropped.
    ///
    /// Callers still waiting on an in-flight preparation are rejected right away with a
    /// connection error; the stale PREPARE result is ignored when it arrives.
    pub fn reset(&self) {
        let waiters = {
            let mut state = self.state();
            state.handle = None;
            state.is_preparing = false;
            state.epoch += 1;
            std::mem::take(&mut state.waiters)
        };
        if !waiters.is_empty() {
            tracing::debug!(sql = self.sql(), waiters = waiters.len(), "rejecting waiters on reset");
        }
        let err = DriverError::ConnectionError(format!(
            "connection lost while preparing `{}`",
            self.sql()
        ));
        for waiter in waiters {
            let _ = waiter.send(Err(err.clone()));
        }
    }

    async fn run_preparation(&self, epoch: u64) {
        let connection = self
            .inner
            .manager
            .upgrade()
            .and_then(|manager| manager.current_connection());
        let Some(connection) = connection else {
            self.finish(epoch, Err(DriverError::NotConnected));
            return;
        };

        match connection.prepare(self.sql()).await {
            Ok(handle) => {
                tracing::trace!(sql = self.sql(), statement_id = handle.id(), "prepared");
                self.finish(epoch, Ok(handle));
            }
            Err(err) => {
                tracing::error!(sql = self.sql(), error = %err, "failed to prepare");
                self.finish(
                    epoch,
                    Err(DriverError::PreparationError {
                        sql: self.sql().to_owned(),
                        source: Box::new(err),
                    }),
                );
            }
        }
    }

    /// Settle the preparation started at `epoch` and wake every waiter in FIFO order.
    fn finish(&self, epoch: u64, outcome: Result<Arc<dyn PreparedHandle>, DriverError>) {
        let (waiters, result) = {
            let mut state = self.state();
            if state.epoch != epoch {
                tracing::debug!(sql = self.sql(), "discarding stale preparation");
                return;
            }
            state.is_preparing = false;
            let result = match outcome {
                Ok(handle) => {
                    state.handle = Some(handle);
                    Ok(())
                }
                Err(err) => {
                    state.handle = None;
                    Err(err)
                }
            };
            (std::mem::take(&mut state.waiters), result)
        };
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    fn is_debug(&self) -> bool {
        self.inner
            .manager
            .upgrade()
            .is_some_and(|manager| manager.is_debug())
    }

    fn state(&self) -> MutexGuard<'_, PrepareState> {
        lock(&self.inner.state)
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql())
            .field("prepared", &self.is_prepared())
            .finish()
    }
}
