use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::DriverError;
use crate::transport::{Connection, ConnectionFault, FaultSink};

use super::{ConnectionManager, Inner, lock};

impl ConnectionManager {
    /// Start connecting in the background and return immediately.
    ///
    /// Idempotent: a no-op while connected or while an attempt is in flight. Clears the
    /// closed flag set by [`ConnectionManager::close`]. Observe completion through
    /// [`ConnectionManager::on_connect`] or [`ConnectionManager::wait_connect`].
    ///
    /// # Errors
    /// Returns [`DriverError::ConfigError`] when called outside a tokio runtime.
    pub fn connect(&self) -> Result<(), DriverError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            DriverError::ConfigError("connect() must be called within a tokio runtime".into())
        })?;
        *lock(&self.inner.runtime) = Some(handle);
        lock(&self.inner.state).is_closed = false;
        self.inner.try_connect();
        Ok(())
    }

    /// Destroy the physical connection and stop reconnecting until the next `connect()`.
    pub fn close(&self) {
        tracing::info!("closing connection manager");
        lock(&self.inner.state).is_closed = true;
        self.inner.disconnect(None);
    }
}

impl Inner {
    /// `Disconnected -> Connecting`.
    pub(super) fn try_connect(self: &Arc<Self>) {
        {
            let mut state = lock(&self.state);
            if state.is_closed || state.connection.is_some() || state.is_connecting {
                return;
            }
            state.is_connecting = true;
        }
        let Some(runtime) = self.runtime() else {
            tracing::error!("no tokio runtime available to connect on");
            lock(&self.state).is_connecting = false;
            return;
        };
        runtime.spawn(Arc::clone(self).run_connect());
    }

    async fn run_connect(self: Arc<Self>) {
        tracing::info!(host = ?self.params.host, database = ?self.params.database, "connecting");
        let (faults, fault_rx) = FaultSink::channel();
        let connection = match self.connector.connect(&self.params, faults).await {
            Ok(connection) => connection,
            Err(err) => {
                lock(&self.state).is_connecting = false;
                tracing::error!(error = %err, "connect failed");
                self.disconnect(None);
                return;
            }
        };

        let accepted = {
            let mut state = lock(&self.state);
            state.is_connecting = false;
            if state.is_closed {
                None
            } else {
                state.generation += 1;
                state.is_ready = false;
                state.connection = Some(Arc::clone(&connection));
                let token = self.shutdown.child_token();
                state.connection_token = Some(token.clone());
                Some((state.generation, token))
            }
        };
        let Some((generation, token)) = accepted else {
            tracing::info!(connection_id = connection.id(), "closed while connecting; dropping connection");
            connection.destroy();
            return;
        };

        tracing::info!(connection_id = connection.id(), "connected");
        if let Some(runtime) = self.runtime() {
            runtime.spawn(watch_faults(
                Arc::downgrade(&self),
                generation,
                connection,
                fault_rx,
                token,
            ));
        }

        self.accept(generation).await;
    }

    /// `Connecting -> Connected`: migrations, statement preparation, then publication.
    async fn accept(self: Arc<Self>, generation: u64) {
        let manager = ConnectionManager {
            inner: Arc::clone(&self),
        };

        let migrators = lock(&self.migrators).clone();
        for (idx, migrate) in migrators.into_iter().enumerate() {
            let hook_manager = manager.clone();
            let outcome = AssertUnwindSafe(async move { migrate(hook_manager).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(DriverError::Other("migration hook panicked".into())));
            if let Err(err) = outcome {
                tracing::error!(hook = idx, error = %err, "migration failed; dropping connection");
                self.disconnect(Some(generation));
                return;
            }
        }

        manager.prepare_statements().await;
        self.publish(&manager, generation);
    }

    /// `Connected -> Disconnected`, or `Connecting -> Disconnected` after a failed attempt.
    ///
    /// With `Some(generation)` nothing happens unless that connection is still current.
    pub(super) fn disconnect(self: &Arc<Self>, generation: Option<u64>) {
        let (connection, token, closed) = {
            let mut state = lock(&self.state);
            if let Some(expected) = generation
                && (state.generation != expected || state.connection.is_none())
            {
                return;
            }
            state.is_ready = false;
            (
                state.connection.take(),
                state.connection_token.take(),
                state.is_closed,
            )
        };
        tracing::info!(had_connection = connection.is_some(), "disconnected");

        self.signal.send_modify(|signal| signal.ready = false);
        if let Some(token) = token {
            token.cancel();
        }
        if let Some(connection) = connection {
            connection.destroy();
        }
        for statement in self.statements_snapshot() {
            statement.reset();
        }

        if !closed {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let Some(runtime) = self.runtime() else {
            tracing::warn!("no tokio runtime available; reconnect not scheduled");
            return;
        };
        let delay = self.options.reconnect_delay;
        let shutdown = self.shutdown.clone();
        let weak = Arc::downgrade(self);
        tracing::debug!(delay_ms = delay.as_millis(), "scheduling reconnect");
        runtime.spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Some(inner) = weak.upgrade() {
                        inner.try_connect();
                    }
                }
            }
        });
    }
}

/// Turns transport faults for one connection into a disconnect of that connection.
async fn watch_faults(
    inner: Weak<Inner>,
    generation: u64,
    connection: Arc<dyn Connection>,
    mut faults: mpsc::UnboundedReceiver<ConnectionFault>,
    token: CancellationToken,
) {
    let fault = tokio::select! {
        () = token.cancelled() => return,
        fault = faults.recv() => fault,
    };
    let Some(fault) = fault else {
        return;
    };
    tracing::error!(
        connection_id = connection.id(),
        code = %fault.code,
        message = %fault.message,
        "connection error"
    );
    connection.destroy();
    if let Some(inner) = inner.upgrade() {
        inner.disconnect(Some(generation));
    }
}
