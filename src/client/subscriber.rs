//! Network subscriber
//!
//! Pulls decoded frames from a subscribe URL into an [`OutputFrameBridge`],
//! keeping only the newest one. The consume task is two futures joined on
//! the session runtime:
//!
//! ```text
//!   reader.next_frame() ──► pump ──► watch slot (seq, frame) ──► drain ──► output.put()
//!                                    (overwritten, never queued)
//! ```
//!
//! When the reader outpaces the drain, intermediate frames are overwritten in
//! the slot and counted as skipped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::config::SubscriberConfig;
use super::orchestrator::{MediaReader, MediaSource, ReadOptions};
use crate::bridge::OutputFrameBridge;
use crate::error::{ClientError, Error, Result};
use crate::media::Frame;

/// Subscriber status snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubscriberStatus {
    /// Started and not stopped
    pub running: bool,
    /// Whether the consume task is still running
    pub task_alive: bool,
    /// Frames stored in the output bridge
    pub frames_received: u64,
    /// Frames overwritten before they were consumed
    pub frames_skipped: u64,
    pub subscribe_url: String,
    /// Last consume failure, empty if none
    pub last_error: String,
}

/// Counters of one subscription, shared with its consume task
#[derive(Debug, Default)]
struct Shared {
    frames_received: AtomicU64,
    frames_skipped: AtomicU64,
    last_error: Mutex<Option<String>>,
}

#[derive(Default)]
struct Subscription {
    url: String,
    running: bool,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

/// Consumes a subscribe URL into an [`OutputFrameBridge`]
pub struct NetworkSubscriber {
    source: Arc<dyn MediaSource>,
    output: Arc<OutputFrameBridge>,
    config: SubscriberConfig,
    runtime: Mutex<Option<Handle>>,
    subscription: Mutex<Subscription>,
    shared: Mutex<Arc<Shared>>,
    /// Held around every `output.put` and around cancel-and-reset, so a
    /// cancelled task cannot store a frame after the reset
    delivery: Arc<Mutex<()>>,
}

impl NetworkSubscriber {
    /// Create a subscriber writing into `output`
    pub fn new(
        source: Arc<dyn MediaSource>,
        output: Arc<OutputFrameBridge>,
        config: SubscriberConfig,
    ) -> Self {
        Self {
            source,
            output,
            config,
            runtime: Mutex::new(None),
            subscription: Mutex::new(Subscription::default()),
            shared: Mutex::new(Arc::new(Shared::default())),
            delivery: Arc::new(Mutex::new(())),
        }
    }

    /// Bind the runtime that hosts the consume task
    pub fn attach_loop(&self, handle: Handle) {
        *self.runtime.lock() = Some(handle);
    }

    /// The bridge frames are written to
    pub fn output(&self) -> &Arc<OutputFrameBridge> {
        &self.output
    }

    /// Start consuming `subscribe_url`, replacing any current subscription.
    ///
    /// Counters and the output bridge are reset.
    pub fn start(&self, subscribe_url: impl Into<String>) -> Result<()> {
        let url = subscribe_url.into();
        if url.trim().is_empty() {
            return Err(Error::Config("subscribe URL is required".into()));
        }
        let handle = self.runtime.lock().clone().ok_or(Error::NoRuntime)?;

        let mut subscription = self.subscription.lock();
        if subscription.cancel.is_some() {
            tracing::debug!(url = %subscription.url, "Replacing subscription");
        }
        self.cancel_and_reset(&mut subscription);

        let shared = Arc::new(Shared::default());
        *self.shared.lock() = Arc::clone(&shared);

        let cancel = CancellationToken::new();
        let task = handle.spawn(consume(ConsumeContext {
            source: Arc::clone(&self.source),
            output: Arc::clone(&self.output),
            delivery: Arc::clone(&self.delivery),
            shared,
            url: url.clone(),
            options: self.config.read_options(),
            cancel: cancel.clone(),
        }));

        tracing::info!(url = %url, start_seq = self.config.start_seq, "Subscriber started");

        *subscription = Subscription {
            url,
            running: true,
            cancel: Some(cancel),
            task: Some(task),
        };
        Ok(())
    }

    /// Stop consuming. Safe to call when already stopped.
    pub fn stop(&self) {
        let mut subscription = self.subscription.lock();
        if subscription.cancel.is_some() {
            tracing::info!(url = %subscription.url, "Subscriber stopped");
        }
        self.cancel_and_reset(&mut subscription);
        subscription.running = false;
    }

    fn cancel_and_reset(&self, subscription: &mut Subscription) {
        let _delivery = self.delivery.lock();
        if let Some(cancel) = subscription.cancel.take() {
            cancel.cancel();
        }
        subscription.task = None;
        self.output.reset();
    }

    /// Started and not stopped
    pub fn is_running(&self) -> bool {
        self.subscription.lock().running
    }

    /// Whether the consume task is still running
    pub fn task_alive(&self) -> bool {
        self.subscription
            .lock()
            .task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Non-blocking check for a consume task that has died.
    ///
    /// Returns the failure if the task has finished with an error or
    /// panicked, `None` while it is running or after a clean end.
    pub fn check_task_exception(&self) -> Option<String> {
        let mut subscription = self.subscription.lock();
        if !subscription.task.as_ref().is_some_and(|task| task.is_finished()) {
            return None;
        }

        let task = subscription.task.take()?;
        let shared = self.shared.lock().clone();
        if let Some(Err(e)) = task.now_or_never() {
            if e.is_panic() {
                let message = format!("consume task panicked: {}", e);
                tracing::error!(error = %message, "Subscriber task died");
                *shared.last_error.lock() = Some(message);
            }
        }
        let last_error = shared.last_error.lock().clone();
        last_error
    }

    /// Status snapshot
    pub fn status(&self) -> SubscriberStatus {
        let subscription = self.subscription.lock();
        let shared = self.shared.lock().clone();
        let status = SubscriberStatus {
            running: subscription.running,
            task_alive: subscription
                .task
                .as_ref()
                .is_some_and(|task| !task.is_finished()),
            frames_received: shared.frames_received.load(Ordering::Relaxed),
            frames_skipped: shared.frames_skipped.load(Ordering::Relaxed),
            subscribe_url: subscription.url.clone(),
            last_error: shared.last_error.lock().clone().unwrap_or_default(),
        };
        status
    }
}

impl Drop for NetworkSubscriber {
    fn drop(&mut self) {
        if let Some(cancel) = self.subscription.get_mut().cancel.take() {
            cancel.cancel();
        }
    }
}

struct ConsumeContext {
    source: Arc<dyn MediaSource>,
    output: Arc<OutputFrameBridge>,
    delivery: Arc<Mutex<()>>,
    shared: Arc<Shared>,
    url: String,
    options: ReadOptions,
    cancel: CancellationToken,
}

async fn consume(ctx: ConsumeContext) {
    let opened = tokio::select! {
        _ = ctx.cancel.cancelled() => return,
        opened = ctx.source.open_read(&ctx.url, &ctx.options) => opened,
    };

    let mut reader = match opened {
        Ok(reader) => reader,
        Err(e) => {
            tracing::warn!(url = %ctx.url, error = %e, "Failed to open subscription");
            *ctx.shared.last_error.lock() = Some(e.to_string());
            return;
        }
    };
    tracing::debug!(url = %ctx.url, "Subscription opened");

    let (tx, rx) = watch::channel::<Option<(u64, Frame)>>(None);

    let result = tokio::select! {
        _ = ctx.cancel.cancelled() => Ok(()),
        (pumped, ()) = async { tokio::join!(pump(reader.as_mut(), tx), drain(rx, &ctx)) } => pumped,
    };

    match result {
        Ok(()) => tracing::info!(
            url = %ctx.url,
            frames = ctx.shared.frames_received.load(Ordering::Relaxed),
            "Subscription ended"
        ),
        Err(e) => {
            tracing::warn!(url = %ctx.url, error = %e, "Subscription failed");
            *ctx.shared.last_error.lock() = Some(e.to_string());
        }
    }

    if let Err(e) = reader.close().await {
        tracing::debug!(error = %e, "Failed to close subscription");
    }
}

/// Read frames into the watch slot, numbering them from 1
async fn pump(
    reader: &mut dyn MediaReader,
    tx: watch::Sender<Option<(u64, Frame)>>,
) -> std::result::Result<(), ClientError> {
    let mut seq = 0u64;
    while let Some(frame) = reader.next_frame().await? {
        seq += 1;
        tx.send_replace(Some((seq, frame)));
    }
    Ok(())
}

/// Store the newest frame from the slot each time it changes
async fn drain(mut rx: watch::Receiver<Option<(u64, Frame)>>, ctx: &ConsumeContext) {
    let mut last_seq = 0u64;

    while rx.changed().await.is_ok() {
        let latest = rx.borrow_and_update().clone();
        let Some((seq, frame)) = latest else {
            continue;
        };

        let _delivery = ctx.delivery.lock();
        if ctx.cancel.is_cancelled() {
            return;
        }

        let skipped = seq.saturating_sub(last_seq + 1);
        if skipped > 0 {
            ctx.shared.frames_skipped.fetch_add(skipped, Ordering::Relaxed);
            tracing::trace!(skipped, "Skipped stale frames");
        }
        last_seq = seq;

        ctx.output.put(frame);
        ctx.shared.frames_received.fetch_add(1, Ordering::Relaxed);
    }
}
