//! Cluster connection and completion runtime
//!
//! A [`Cluster`] owns the handle to the object store, the runtime on which
//! asynchronous completions are joined and user callbacks run, and the
//! registry of completions that are still in flight.

use crate::error::{DictError, Result};
use omap_store::ObjectStore;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Threads joining completions and running callbacks
const COMPLETION_THREADS: usize = 2;

/// Registry of in-flight asynchronous operations
///
/// Written by every async lookup and commit, drained by [`wait_all`](Self::wait_all).
#[derive(Debug, Default)]
pub struct PendingCompletions {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PendingCompletions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: JoinHandle<()>) {
        let mut handles = self.handles.lock();
        // Finished entries are dropped so the registry stays bounded
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Number of registered operations not yet finished
    pub fn len(&self) -> usize {
        self.handles.lock().iter().filter(|h| !h.is_finished()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until every registered operation finished, including ones
    /// registered while waiting.
    ///
    /// Must not be called from a completion callback.
    pub fn wait_all(&self) {
        loop {
            let drained: Vec<_> = std::mem::take(&mut *self.handles.lock());
            if drained.is_empty() {
                return;
            }
            debug!(count = drained.len(), "Waiting for pending completions");
            for result in futures::executor::block_on(futures::future::join_all(drained)) {
                if let Err(e) = result {
                    error!("Completion task failed: {}", e);
                }
            }
        }
    }
}

/// Connection to an object store plus the completion runtime
pub struct Cluster {
    store: Arc<dyn ObjectStore>,
    runtime: Option<Runtime>,
    pending: PendingCompletions,
}

impl Cluster {
    /// Connect to `store` and start the completion runtime
    pub fn init(store: Arc<dyn ObjectStore>) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(COMPLETION_THREADS)
            .thread_name("omap-dict-aio")
            .enable_all()
            .build()
            .map_err(|e| DictError::Connection(format!("cannot start completion runtime: {}", e)))?;

        info!("Cluster connection initialized");
        Ok(Self {
            store,
            runtime: Some(runtime),
            pending: PendingCompletions::new(),
        })
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn pending(&self) -> &PendingCompletions {
        &self.pending
    }

    /// Run `future` on the completion runtime and register it as pending.
    ///
    /// Once the runtime is shut down the future runs to completion on the
    /// calling thread instead.
    pub fn spawn_pending<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match &self.runtime {
            Some(runtime) => self.pending.register(runtime.spawn(future)),
            None => {
                warn!("Completion runtime is shut down, running inline");
                futures::executor::block_on(future);
            }
        }
    }

    /// Wait for pending completions and stop the runtime
    pub fn deinit(&mut self) {
        self.pending.wait_all();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
        info!("Cluster connection closed");
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        // Waiting from inside a runtime thread could block the very task being waited on
        if tokio::runtime::Handle::try_current().is_ok() {
            warn!(
                pending = self.pending.len(),
                "Cluster dropped inside an async context, pending completions are abandoned"
            );
        } else {
            self.pending.wait_all();
        }
        runtime.shutdown_background();
    }
}
