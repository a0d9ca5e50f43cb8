//! Network publisher
//!
//! Owns one publish session at a time: negotiates it, runs the pacing loop
//! and the event monitor on a dedicated session runtime, and exposes status
//! snapshots to synchronous callers on other threads.
//!
//! ```text
//!   caller thread                       session runtime thread
//!   ─────────────                       ──────────────────────
//!   start() ──run_blocking──► negotiate ─► open_write ─► spawn pacing loop
//!                                                     └► spawn event monitor
//!   status() ◄── snapshot of SessionState (shared, locked briefly)
//!   stop()  ──run_blocking──► cancel ─► await tasks ─► close writer ─► close session
//! ```

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::config::PublisherConfig;
use super::monitor::{run_event_monitor, MonitorContext};
use super::orchestrator::{MediaWriter, NegotiateRequest, OrchestratorClient, SessionInfo};
use super::pacing::{run_pacing_loop, PacingContext};
use crate::bridge::FrameBridge;
use crate::error::{Error, Result};
use crate::runtime::{SessionRuntime, DEFAULT_THREAD_NAME};
use crate::session::{HealthReport, PublisherStatus, SessionState, StreamState};
use crate::stats::FrameCounters;

/// Parameters for [`NetworkPublisher::start`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartRequest {
    /// Model to run; the configured default when `None`
    pub model_id: Option<String>,
    /// Pipeline parameters forwarded to negotiation
    pub params: serde_json::Value,
    /// Caller-supplied request identifier
    pub request_id: Option<String>,
    /// Caller-supplied stream identifier
    pub stream_id: Option<String>,
}

impl StartRequest {
    /// A request using the configured model and no parameters
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model
    pub fn model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    /// Set the pipeline parameters
    pub fn params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// Set the request identifier
    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Set the stream identifier
    pub fn stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = Some(stream_id.into());
        self
    }
}

/// Background tasks of a running session
struct SessionTasks {
    info: SessionInfo,
    cancel: CancellationToken,
    pacing: JoinHandle<()>,
    monitor: Option<JoinHandle<()>>,
}

/// Orchestrator resources not yet released.
///
/// Filled in as a start progresses and emptied by teardown, so a start or
/// stop aborted at an await point leaves them for the next teardown.
#[derive(Default)]
struct OpenSession {
    info: Option<SessionInfo>,
    writer: Option<Box<dyn MediaWriter>>,
}

impl SessionTasks {
    fn all_running(&self) -> bool {
        !self.pacing.is_finished() && !self.monitor.as_ref().is_some_and(|m| m.is_finished())
    }
}

/// State shared between the publisher handle and the session runtime
struct PublisherInner {
    client: Arc<dyn OrchestratorClient>,
    bridge: Arc<FrameBridge>,
    config: RwLock<PublisherConfig>,
    session: Arc<Mutex<SessionState>>,
    tasks: Mutex<Option<SessionTasks>>,
    open: Arc<Mutex<OpenSession>>,
    /// Serializes start and stop on the runtime
    lifecycle: AsyncMutex<()>,
}

impl PublisherInner {
    async fn start_session(&self, config: PublisherConfig, request: StartRequest) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        self.teardown().await;

        let model_id = request.model_id.clone().unwrap_or_else(|| config.model_id.clone());
        *self.session.lock() = SessionState::starting(model_id.clone(), request.request_id.clone());
        self.bridge.attach_loop();

        tracing::info!(
            orchestrator = %config.orchestrator_url,
            model_id = %model_id,
            fps = config.fps,
            "Starting publish session"
        );

        let negotiate = NegotiateRequest {
            orchestrator_url: config.orchestrator_url.clone(),
            signer_url: config.signer_url.clone(),
            model_id,
            params: request.params,
            request_id: request.request_id,
            stream_id: request.stream_id,
        };

        let info = match self.client.negotiate(&negotiate).await {
            Ok(info) => info,
            Err(e) => {
                tracing::error!(error = %e, "Session negotiation failed");
                self.session.lock().fail(e.to_string());
                self.bridge.detach_loop();
                return Err(e.into());
            }
        };
        self.session.lock().info = Some(info.clone());
        self.open.lock().info = Some(info.clone());

        let writer = match self.client.open_write(&info, &config.write_options()).await {
            Ok(writer) => writer,
            Err(e) => {
                tracing::error!(error = %e, session_id = %info.session_id, "Failed to open publish handle");
                self.session.lock().fail(e.to_string());
                self.bridge.detach_loop();
                self.release().await;
                return Err(e.into());
            }
        };

        let cancel = CancellationToken::new();
        let context = PacingContext {
            bridge: Arc::clone(&self.bridge),
            session: Arc::clone(&self.session),
            cancel: cancel.clone(),
            interval: config.frame_interval(),
            first_frame_poll: self.bridge.config().first_frame_poll,
            max_consecutive_repeats: config.max_consecutive_repeats,
        };
        let open = Arc::clone(&self.open);
        let pacing = tokio::spawn(async move {
            let writer = run_pacing_loop(context, writer).await;
            open.lock().writer = Some(writer);
        });

        let monitor = if info.has_events() {
            Some(tokio::spawn(run_event_monitor(MonitorContext {
                client: Arc::clone(&self.client),
                info: info.clone(),
                session: Arc::clone(&self.session),
                cancel: cancel.clone(),
                not_ready_window: config.event_not_ready_window,
                retry_backoff: config.event_retry_backoff,
            })))
        } else {
            None
        };

        tracing::info!(
            session_id = %info.session_id,
            publish_url = %info.publish_url,
            events = info.has_events(),
            "Publish session started"
        );

        *self.tasks.lock() = Some(SessionTasks {
            info,
            cancel,
            pacing,
            monitor,
        });
        Ok(())
    }

    async fn stop_session(&self) {
        let _guard = self.lifecycle.lock().await;
        self.teardown().await;
    }

    /// Cancel the tasks, wait for them, then release the writer and the
    /// session. Leaves the session `CLOSED` (or `ERROR`) with zeroed counters.
    async fn teardown(&self) {
        let tasks = self.tasks.lock().take();

        if let Some(tasks) = tasks {
            tasks.cancel.cancel();

            if let Err(e) = tasks.pacing.await {
                tracing::warn!(error = %e, "Pacing task ended abnormally");
            }
            if let Some(monitor) = tasks.monitor {
                if let Err(e) = monitor.await {
                    tracing::warn!(error = %e, "Event monitor ended abnormally");
                }
            }
            tracing::info!(session_id = %tasks.info.session_id, "Publish session stopped");
        }

        self.release().await;
        self.bridge.detach_loop();

        let mut session = self.session.lock();
        if session.state.is_active() {
            session.close();
        }
        session.counters = FrameCounters::default();
    }

    /// Close the publish handle and the orchestrator session, if still open.
    ///
    /// The session record is only cleared once `close_session` returns.
    async fn release(&self) {
        let writer = self.open.lock().writer.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.close().await {
                tracing::debug!(error = %e, "Failed to close publish handle");
            }
        }

        let info = self.open.lock().info.clone();
        if let Some(info) = info {
            if let Err(e) = self.client.close_session(&info).await {
                tracing::debug!(error = %e, "Failed to close session");
            }
            tracing::debug!(session_id = %info.session_id, "Orchestrator session released");
            self.open.lock().info = None;
        }
    }
}

/// Publishes frames from a [`FrameBridge`] to an orchestrator session
///
/// # Example
/// ```ignore
/// use std::sync::Arc;
/// use trickle_bridge::{FrameBridge, NetworkPublisher, PublisherConfig, StartRequest};
///
/// let bridge = Arc::new(FrameBridge::default());
/// let publisher = NetworkPublisher::new(client, Arc::clone(&bridge), PublisherConfig::new("orch:8935"));
///
/// let status = publisher.start(StartRequest::new().model_id("comfystream"))?;
/// bridge.enqueue(frame);
/// // ...
/// publisher.stop();
/// ```
pub struct NetworkPublisher {
    inner: Arc<PublisherInner>,
    runtime: Mutex<Option<Arc<SessionRuntime>>>,
}

impl NetworkPublisher {
    /// Create a publisher; no runtime is started until the first `start`
    pub fn new(
        client: Arc<dyn OrchestratorClient>,
        bridge: Arc<FrameBridge>,
        config: PublisherConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                client,
                bridge,
                config: RwLock::new(config),
                session: Arc::new(Mutex::new(SessionState::idle())),
                tasks: Mutex::new(None),
                open: Arc::new(Mutex::new(OpenSession::default())),
                lifecycle: AsyncMutex::new(()),
            }),
            runtime: Mutex::new(None),
        }
    }

    /// The ingress bridge this publisher drains
    pub fn bridge(&self) -> &Arc<FrameBridge> {
        &self.inner.bridge
    }

    /// Current configuration
    pub fn config(&self) -> PublisherConfig {
        self.inner.config.read().clone()
    }

    /// Replace the configuration used by the next `start`
    pub fn update_config(&self, config: PublisherConfig) {
        *self.inner.config.write() = config;
    }

    /// Handle of the session runtime, if one has been created
    pub fn runtime_handle(&self) -> Option<Handle> {
        self.runtime.lock().as_ref().map(|rt| rt.handle().clone())
    }

    /// Handle of the session runtime, creating the runtime if needed
    pub fn ensure_runtime(&self) -> Result<Handle> {
        Ok(self.runtime()?.handle().clone())
    }

    fn runtime(&self) -> Result<Arc<SessionRuntime>> {
        let mut runtime = self.runtime.lock();
        match *runtime {
            Some(ref rt) => Ok(Arc::clone(rt)),
            None => {
                let rt = Arc::new(SessionRuntime::spawn(DEFAULT_THREAD_NAME)?);
                *runtime = Some(Arc::clone(&rt));
                Ok(rt)
            }
        }
    }

    /// Tear down any current session and start a new one.
    ///
    /// Blocks for at most `start_timeout`. Invalid configuration is rejected
    /// before anything is torn down. Negotiation failures, timeouts and
    /// aborted starts are returned and also recorded in the session as
    /// `ERROR`.
    pub fn start(&self, request: StartRequest) -> Result<PublisherStatus> {
        let config = self.inner.config.read().validate()?;
        let runtime = self.runtime()?;
        let start_timeout = config.start_timeout;
        let stop_timeout = config.stop_timeout;

        let inner = Arc::clone(&self.inner);
        let started = runtime.run_blocking(
            async move { inner.start_session(config, request).await },
            start_timeout,
        );

        match started {
            Ok(Ok(())) => Ok(self.status()),
            Ok(Err(e)) => Err(e),
            Err(e) => {
                let reason = match &e {
                    Error::Timeout(elapsed) => format!("start timed out after {:?}", elapsed),
                    other => format!("start aborted: {}", other),
                };
                tracing::error!(error = %e, "Session start did not complete");
                self.inner.session.lock().fail(reason);

                let inner = Arc::clone(&self.inner);
                if let Err(e) = runtime.run_blocking(async move { inner.stop_session().await }, stop_timeout) {
                    tracing::warn!(error = %e, "Cleanup after failed start did not complete");
                }
                Err(e)
            }
        }
    }

    /// Stop the current session.
    ///
    /// Never fails: on a never-started publisher, or one whose session has
    /// already ended, this only returns the status.
    pub fn stop(&self) -> PublisherStatus {
        let runtime = self.runtime.lock().clone();

        if let Some(runtime) = runtime {
            let stop_timeout = self.inner.config.read().stop_timeout;
            let inner = Arc::clone(&self.inner);
            if let Err(e) = runtime.run_blocking(async move { inner.stop_session().await }, stop_timeout) {
                tracing::warn!(error = %e, "Session stop did not complete");
            }
        }

        self.status()
    }

    /// Snapshot of the session
    pub fn status(&self) -> PublisherStatus {
        let session = self.inner.session.lock().clone();
        let config = self.inner.config.read();
        PublisherStatus::from_session(&session, &config, self.inner.bridge.stats())
    }

    /// Current lifecycle state
    pub fn state(&self) -> StreamState {
        self.inner.session.lock().state
    }

    /// Whether the session is live.
    ///
    /// `RUNNING` and `DEGRADED` are healthy; `STARTING` is healthy only within
    /// the configured startup grace window.
    pub fn is_healthy(&self) -> bool {
        let grace = self.inner.config.read().startup_grace;
        self.inner.session.lock().is_healthy(grace)
    }

    /// Health report for monitoring
    pub fn get_health(&self) -> HealthReport {
        let session = self.inner.session.lock().clone();
        let grace = self.inner.config.read().startup_grace;
        let tasks_alive = self
            .inner
            .tasks
            .lock()
            .as_ref()
            .is_some_and(SessionTasks::all_running);

        HealthReport {
            healthy: session.is_healthy(grace),
            state: session.state,
            tasks_alive,
            uptime_secs: match session.state.is_active() {
                true => session.elapsed().map(|d| d.as_secs_f64()).unwrap_or_default(),
                false => 0.0,
            },
            frames_sent: session.counters.frames_sent,
            frames_repeated: session.counters.frames_repeated,
            consecutive_repeats: session.counters.consecutive_repeats,
            last_error: session.last_error.unwrap_or_default(),
            queue: self.inner.bridge.stats(),
        }
    }

    /// Non-blocking liveness check.
    ///
    /// Returns `false` if there is no session or a background task has
    /// exited. A session still marked active when its task is gone is moved
    /// to `CLOSED` with the reason recorded.
    pub fn check_tasks_alive(&self) -> bool {
        let (pacing_done, monitor_done) = {
            let tasks = self.inner.tasks.lock();
            match *tasks {
                Some(ref tasks) => (
                    tasks.pacing.is_finished(),
                    tasks.monitor.as_ref().is_some_and(|m| m.is_finished()),
                ),
                None => return false,
            }
        };

        if !pacing_done && !monitor_done {
            return true;
        }

        let mut session = self.inner.session.lock();
        if session.state.is_active() {
            let task = if pacing_done { "pacing" } else { "event monitor" };
            tracing::warn!(task, "Background task exited; closing session");
            session.last_error = Some(format!("{} task exited", task));
            session.close();
        }
        false
    }

    /// Send a control message to the running session
    pub fn send_control(&self, message: serde_json::Value) -> Result<()> {
        if !self.inner.session.lock().state.is_active() {
            return Err(Error::NotRunning);
        }
        let info = self
            .inner
            .tasks
            .lock()
            .as_ref()
            .map(|t| t.info.clone())
            .ok_or(Error::NotRunning)?;
        let runtime = self.runtime.lock().clone().ok_or(Error::NotRunning)?;

        let client = Arc::clone(&self.inner.client);
        let timeout = self.inner.config.read().stop_timeout;
        runtime.run_blocking(
            async move { client.send_control(&info, &message).await },
            timeout,
        )??;

        tracing::debug!("Control message sent");
        Ok(())
    }
}

impl Drop for NetworkPublisher {
    fn drop(&mut self) {
        let unreleased = {
            let open = self.inner.open.lock();
            open.info.is_some() || open.writer.is_some()
        };
        if unreleased || self.inner.tasks.lock().is_some() {
            self.stop();
        }
    }
}

impl std::fmt::Debug for NetworkPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkPublisher")
            .field("state", &self.state())
            .field("bridge", &self.inner.bridge)
            .finish()
    }
}
