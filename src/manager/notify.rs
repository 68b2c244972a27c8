use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;

use crate::error::DriverError;

use super::{ConnectCallback, ConnectionManager, Inner, lock};

impl ConnectionManager {
    /// Register a callback for every "became connected" transition.
    ///
    /// If the manager is already connected the callback also fires right away. Callbacks
    /// always run on their own task, never inside the transition that triggered them. A
    /// failing or panicking callback is logged and otherwise ignored.
    pub fn on_connect<F, Fut>(&self, callback: F)
    where
        F: Fn(ConnectionManager) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DriverError>> + Send + 'static,
    {
        let callback: ConnectCallback = Arc::new(move |manager| callback(manager).boxed());
        let fire_now = {
            let mut state = lock(&self.inner.state);
            state.listeners.push(Arc::clone(&callback));
            state.is_ready
        };
        if fire_now {
            self.inner.trigger_callback(self, callback);
        }
    }

    /// Resolve once the manager is connected: immediately if it already is, otherwise on the
    /// next successful connect.
    pub async fn wait_connect(&self) {
        let mut receiver = self.inner.signal.subscribe();
        let start = receiver.borrow_and_update().epoch;
        let _ = receiver
            .wait_for(|signal| signal.ready || signal.epoch > start)
            .await;
    }
}

impl Inner {
    /// Mark `generation` usable and notify subscribers, unless it was torn down meanwhile.
    pub(super) fn publish(&self, manager: &ConnectionManager, generation: u64) {
        let listeners = {
            let mut state = lock(&self.state);
            if state.generation != generation || state.connection.is_none() {
                tracing::debug!(generation, "connection replaced before publication");
                return;
            }
            state.is_ready = true;
            state.listeners.clone()
        };
        self.signal.send_modify(|signal| {
            signal.epoch += 1;
            signal.ready = true;
        });
        tracing::info!(subscribers = listeners.len(), "connection ready");
        for callback in listeners {
            self.trigger_callback(manager, callback);
        }
    }

    fn trigger_callback(&self, manager: &ConnectionManager, callback: ConnectCallback) {
        let Some(runtime) = self.runtime() else {
            tracing::error!("no tokio runtime available for connect callback");
            return;
        };
        let manager = manager.clone();
        runtime.spawn(async move {
            match AssertUnwindSafe(async move { callback(manager).await })
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::error!(error = %err, "connect callback failed"),
                Err(_) => tracing::error!("connect callback panicked"),
            }
        });
    }
}
