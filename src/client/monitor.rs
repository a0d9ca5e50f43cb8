//! Orchestrator event monitor
//!
//! Follows the session's event stream and feeds it into the session state:
//! status events confirm the session is live, a graceful end of the stream
//! closes the session, and stream errors end it, except within a short
//! window after start where the stream may not exist yet and is re-opened.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::orchestrator::{OrchestratorClient, SessionEvent, SessionInfo};
use crate::error::ClientError;
use crate::session::SessionState;

/// Everything the event monitor needs
pub(crate) struct MonitorContext {
    pub client: Arc<dyn OrchestratorClient>,
    pub info: SessionInfo,
    pub session: Arc<Mutex<SessionState>>,
    pub cancel: CancellationToken,
    pub not_ready_window: Duration,
    pub retry_backoff: Duration,
}

/// Run the event monitor until cancelled, the stream ends or it fails
pub(crate) async fn run_event_monitor(ctx: MonitorContext) {
    let started = Instant::now();
    tracing::debug!(events_url = %ctx.info.events_url, "Event monitor started");

    loop {
        let opened = tokio::select! {
            _ = ctx.cancel.cancelled() => return,
            opened = ctx.client.events(&ctx.info) => opened,
        };

        let mut events = match opened {
            Ok(events) => events,
            Err(e) => {
                if retry_after(&ctx, started, &e).await {
                    continue;
                }
                return;
            }
        };

        loop {
            let item = tokio::select! {
                _ = ctx.cancel.cancelled() => return,
                item = events.next() => item,
            };

            match item {
                Some(Ok(event)) => handle_event(&ctx, &event),
                Some(Err(e)) => {
                    if retry_after(&ctx, started, &e).await {
                        break;
                    }
                    return;
                }
                None => {
                    tracing::info!("Event stream ended; closing session");
                    ctx.session.lock().close();
                    ctx.cancel.cancel();
                    return;
                }
            }
        }
    }
}

fn handle_event(ctx: &MonitorContext, event: &SessionEvent) {
    if event.is_error() {
        tracing::warn!(status = %event.status, "Orchestrator reported an error");
        ctx.session.lock().last_error = Some(format!("orchestrator error: {}", event.status));
    } else {
        tracing::debug!(event_type = %event.event_type, "Session event");
        ctx.session.lock().on_status_event();
    }
}

/// Decide what to do after an event stream failure.
///
/// Returns `true` if the stream should be re-opened. Outside the not-ready
/// window the session is failed and the other tasks are cancelled.
async fn retry_after(ctx: &MonitorContext, started: Instant, error: &ClientError) -> bool {
    if started.elapsed() < ctx.not_ready_window {
        tracing::warn!(error = %error, "Event stream not ready; retrying");
        tokio::select! {
            _ = ctx.cancel.cancelled() => false,
            _ = tokio::time::sleep(ctx.retry_backoff) => true,
        }
    } else {
        tracing::error!(error = %error, "Event stream failed; ending session");
        ctx.session.lock().fail(format!("event stream: {}", error));
        ctx.cancel.cancel();
        false
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::client::mock::MockOrchestrator;
    use crate::session::StreamState;

    fn spawn_monitor(
        mock: MockOrchestrator,
    ) -> (
        Arc<MockOrchestrator>,
        Arc<Mutex<SessionState>>,
        CancellationToken,
        tokio::task::JoinHandle<()>,
    ) {
        let mock = Arc::new(mock);
        let session = Arc::new(Mutex::new(SessionState::starting("m", None)));
        let cancel = CancellationToken::new();
        let ctx = MonitorContext {
            client: mock.clone(),
            info: SessionInfo::default(),
            session: Arc::clone(&session),
            cancel: cancel.clone(),
            not_ready_window: Duration::from_secs(1),
            retry_backoff: Duration::from_millis(100),
        };
        let task = tokio::spawn(run_event_monitor(ctx));
        (mock, session, cancel, task)
    }

    fn status() -> Result<SessionEvent, ClientError> {
        Ok(SessionEvent::status(serde_json::json!({"state": "ONLINE"})))
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_event_promotes_session() {
        let mock = MockOrchestrator::new().with_events(vec![status()], false);
        let (_mock, session, cancel, task) = spawn_monitor(mock);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(session.lock().state, StreamState::Running);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_end_closes_session() {
        let mock = MockOrchestrator::new().with_events(vec![status()], true);
        let (_mock, session, cancel, task) = spawn_monitor(mock);

        task.await.unwrap();
        assert_eq!(session.lock().state, StreamState::Closed);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_error_is_retried() {
        let mock = MockOrchestrator::new()
            .with_events(vec![Err(ClientError::EventStream("404".into()))], false)
            .with_events(vec![status()], false);
        let (mock, session, cancel, task) = spawn_monitor(mock);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(mock.event_opens.load(Ordering::SeqCst), 2);
        assert_eq!(session.lock().state, StreamState::Running);
        assert!(!cancel.is_cancelled());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_error_fails_session() {
        let (tx, rx) = futures::channel::mpsc::unbounded();
        let session = Arc::new(Mutex::new(SessionState::starting("m", None)));
        let cancel = CancellationToken::new();

        struct ChannelEvents(Mutex<Option<futures::channel::mpsc::UnboundedReceiver<Result<SessionEvent, ClientError>>>>);

        #[async_trait::async_trait]
        impl OrchestratorClient for ChannelEvents {
            async fn negotiate(
                &self,
                _: &crate::client::NegotiateRequest,
            ) -> Result<SessionInfo, ClientError> {
                unreachable!()
            }
            async fn open_write(
                &self,
                _: &SessionInfo,
                _: &crate::client::WriteOptions,
            ) -> Result<Box<dyn crate::client::MediaWriter>, ClientError> {
                unreachable!()
            }
            async fn events(
                &self,
                _: &SessionInfo,
            ) -> Result<crate::client::EventStream, ClientError> {
                match self.0.lock().take() {
                    Some(rx) => Ok(rx.boxed()),
                    None => Err(ClientError::EventStream("reopened".into())),
                }
            }
            async fn send_control(
                &self,
                _: &SessionInfo,
                _: &serde_json::Value,
            ) -> Result<(), ClientError> {
                Ok(())
            }
            async fn close_session(&self, _: &SessionInfo) -> Result<(), ClientError> {
                Ok(())
            }
        }

        let ctx = MonitorContext {
            client: Arc::new(ChannelEvents(Mutex::new(Some(rx)))),
            info: SessionInfo::default(),
            session: Arc::clone(&session),
            cancel: cancel.clone(),
            not_ready_window: Duration::from_millis(100),
            retry_backoff: Duration::from_millis(10),
        };
        let task = tokio::spawn(run_event_monitor(ctx));

        tokio::time::sleep(Duration::from_millis(500)).await;
        tx.unbounded_send(Err(ClientError::EventStream("reset".into())))
            .unwrap();
        task.await.unwrap();

        let session = session.lock();
        assert_eq!(session.state, StreamState::Error);
        assert!(session.last_error.as_deref().unwrap().contains("reset"));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_event_records_message() {
        let event = SessionEvent {
            event_type: "error".into(),
            status: serde_json::json!("pipeline crashed"),
        };
        let mock = MockOrchestrator::new().with_events(vec![Ok(event)], false);
        let (_mock, session, cancel, task) = spawn_monitor(mock);

        tokio::time::sleep(Duration::from_millis(10)).await;
        {
            let session = session.lock();
            assert_eq!(session.state, StreamState::Starting);
            assert!(session.last_error.as_deref().unwrap().contains("pipeline crashed"));
        }

        cancel.cancel();
        task.await.unwrap();
    }
}
