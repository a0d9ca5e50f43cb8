//! Session runtime host
//!
//! Each publisher owns one single-threaded tokio runtime driven on a
//! dedicated OS thread. All session tasks run there; synchronous callers hand
//! work over with [`SessionRuntime::run_blocking`] and wait for a bounded
//! result instead of the whole session lifetime.

use std::future::Future;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// Default name of the runtime thread
pub const DEFAULT_THREAD_NAME: &str = "network-controller-loop";

/// A single-threaded runtime hosted on its own thread
pub struct SessionRuntime {
    handle: Handle,
    thread_id: ThreadId,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SessionRuntime {
    /// Start a runtime on a new thread called `name`
    pub fn spawn(name: &str) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let handle = runtime.handle().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new().name(name.to_string()).spawn(move || {
            runtime.block_on(async {
                let _ = shutdown_rx.await;
            });
            // Dropping the runtime cancels whatever is still scheduled on it
            drop(runtime);
        })?;

        tracing::info!(thread = name, "Session runtime started");

        Ok(Self {
            handle,
            thread_id: thread.thread().id(),
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Handle for spawning onto the runtime
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Whether the caller is running on the runtime thread
    pub fn is_runtime_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Run `future` on the runtime and block the calling thread for at most
    /// `timeout` waiting for its output.
    ///
    /// On timeout the future is aborted. Calling this from the runtime thread
    /// would deadlock and is rejected.
    pub fn run_blocking<F, T>(&self, future: F, timeout: Duration) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_runtime_thread() {
            return Err(Error::Runtime(
                "blocking call issued from the session runtime thread".into(),
            ));
        }

        let (tx, rx) = mpsc::sync_channel(1);
        let task = self.handle.spawn(async move {
            let output = future.await;
            let _ = tx.send(output);
        });

        match rx.recv_timeout(timeout) {
            Ok(output) => Ok(output),
            Err(RecvTimeoutError::Timeout) => {
                task.abort();
                Err(Error::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::Runtime("session runtime dropped the task".into()))
            }
        }
    }
}

impl Drop for SessionRuntime {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() != thread::current().id() && thread.join().is_err() {
                tracing::error!("Session runtime thread panicked");
            }
        }
        tracing::debug!("Session runtime stopped");
    }
}

impl std::fmt::Debug for SessionRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRuntime")
            .field("thread_id", &self.thread_id)
            .finish()
    }
}
