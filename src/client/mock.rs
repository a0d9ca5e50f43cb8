//! Scriptable in-memory collaborators for tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::orchestrator::{
    EventStream, MediaReader, MediaSource, MediaWriter, NegotiateRequest, OrchestratorClient,
    ReadOptions, SessionEvent, SessionInfo, WriteOptions,
};
use crate::error::ClientError;
use crate::media::Frame;

/// Route library logs to the test harness; `RUST_LOG` selects levels
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One successful write
#[derive(Debug, Clone)]
pub struct WriteRecord {
    pub pts: u64,
    /// First byte of the frame, used as a frame id by tests
    pub id: u8,
    pub at: Instant,
}

/// Shared record of everything a writer published
#[derive(Debug, Clone, Default)]
pub struct WriteLog {
    records: Arc<Mutex<Vec<WriteRecord>>>,
    closed: Arc<AtomicBool>,
}

impl WriteLog {
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn ids(&self) -> Vec<u8> {
        self.records.lock().iter().map(|r| r.id).collect()
    }

    pub fn times(&self) -> Vec<Instant> {
        self.records.lock().iter().map(|r| r.at).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Writer that records frames and fails on chosen attempts
pub struct MockWriter {
    log: WriteLog,
    failures: HashMap<u64, ClientError>,
    attempts: u64,
}

impl MockWriter {
    pub fn new() -> Self {
        Self {
            log: WriteLog::default(),
            failures: HashMap::new(),
            attempts: 0,
        }
    }

    /// Fail the write attempt with the given 0-based index
    pub fn fail_at(mut self, attempt: u64, error: ClientError) -> Self {
        self.failures.insert(attempt, error);
        self
    }

    pub fn log(&self) -> WriteLog {
        self.log.clone()
    }
}

#[async_trait]
impl MediaWriter for MockWriter {
    async fn write_frame(&mut self, frame: &Frame, pts: u64) -> Result<(), ClientError> {
        let attempt = self.attempts;
        self.attempts += 1;
        if let Some(error) = self.failures.get(&attempt) {
            return Err(error.clone());
        }

        self.log.records.lock().push(WriteRecord {
            pts,
            id: frame.data().first().copied().unwrap_or_default(),
            at: Instant::now(),
        });
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        self.log.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct EventScript {
    items: Vec<Result<SessionEvent, ClientError>>,
    then_close: bool,
}

/// Orchestrator double with scripted negotiation, writes and events
pub struct MockOrchestrator {
    info: SessionInfo,
    negotiate_error: Option<ClientError>,
    negotiate_delay: Duration,
    negotiate_panics: bool,
    open_delay: Duration,
    /// Delay applied to the first `close_session` call only
    first_close_delay: Mutex<Option<Duration>>,
    write_failures: Vec<(u64, ClientError)>,
    event_scripts: Mutex<VecDeque<EventScript>>,
    log: WriteLog,
    pub negotiations: Mutex<Vec<NegotiateRequest>>,
    pub controls: Mutex<Vec<serde_json::Value>>,
    pub closed_sessions: AtomicUsize,
    pub event_opens: AtomicUsize,
}

impl MockOrchestrator {
    pub fn new() -> Self {
        Self {
            info: SessionInfo {
                publish_url: "https://orch.test/ai/trickle/s1".into(),
                subscribe_url: "https://orch.test/ai/trickle/s1-out".into(),
                control_url: "https://orch.test/ai/trickle/s1-control".into(),
                events_url: String::new(),
                session_id: "s1".into(),
            },
            negotiate_error: None,
            negotiate_delay: Duration::ZERO,
            negotiate_panics: false,
            open_delay: Duration::ZERO,
            first_close_delay: Mutex::new(None),
            write_failures: Vec::new(),
            event_scripts: Mutex::new(VecDeque::new()),
            log: WriteLog::default(),
            negotiations: Mutex::new(Vec::new()),
            controls: Mutex::new(Vec::new()),
            closed_sessions: AtomicUsize::new(0),
            event_opens: AtomicUsize::new(0),
        }
    }

    /// Drop the subscribe URL from the negotiated session
    pub fn without_subscribe(mut self) -> Self {
        self.info.subscribe_url.clear();
        self
    }

    pub fn fail_negotiation(mut self, error: ClientError) -> Self {
        self.negotiate_error = Some(error);
        self
    }

    pub fn negotiate_delay(mut self, delay: Duration) -> Self {
        self.negotiate_delay = delay;
        self
    }

    /// Panic inside `negotiate`, killing the start task
    pub fn panic_on_negotiate(mut self) -> Self {
        self.negotiate_panics = true;
        self
    }

    pub fn open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Stall the first `close_session` call
    pub fn first_close_delay(self, delay: Duration) -> Self {
        *self.first_close_delay.lock() = Some(delay);
        self
    }

    /// Fail the write attempt with the given 0-based index
    pub fn fail_write_at(mut self, attempt: u64, error: ClientError) -> Self {
        self.write_failures.push((attempt, error));
        self
    }

    /// Queue the items yielded by the next `events` call.
    ///
    /// After the items the stream closes if `then_close`, otherwise it stays
    /// open. Once every script is used, `events` yields a stream that never
    /// produces anything.
    pub fn with_events(
        mut self,
        items: Vec<Result<SessionEvent, ClientError>>,
        then_close: bool,
    ) -> Self {
        self.info.events_url = "https://orch.test/ai/trickle/s1-events".into();
        self.event_scripts
            .get_mut()
            .push_back(EventScript { items, then_close });
        self
    }

    pub fn log(&self) -> WriteLog {
        self.log.clone()
    }
}

#[async_trait]
impl OrchestratorClient for MockOrchestrator {
    async fn negotiate(&self, request: &NegotiateRequest) -> Result<SessionInfo, ClientError> {
        self.negotiations.lock().push(request.clone());
        if !self.negotiate_delay.is_zero() {
            tokio::time::sleep(self.negotiate_delay).await;
        }
        if self.negotiate_panics {
            panic!("negotiate blew up");
        }
        match self.negotiate_error {
            Some(ref error) => Err(error.clone()),
            None => Ok(self.info.clone()),
        }
    }

    async fn open_write(
        &self,
        _session: &SessionInfo,
        _options: &WriteOptions,
    ) -> Result<Box<dyn MediaWriter>, ClientError> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        let mut writer = MockWriter {
            log: self.log.clone(),
            failures: HashMap::new(),
            attempts: 0,
        };
        for (attempt, error) in &self.write_failures {
            writer = writer.fail_at(*attempt, error.clone());
        }
        Ok(Box::new(writer))
    }

    async fn events(&self, _session: &SessionInfo) -> Result<EventStream, ClientError> {
        self.event_opens.fetch_add(1, Ordering::SeqCst);
        let script = self.event_scripts.lock().pop_front();

        Ok(match script {
            Some(script) => {
                let items = futures::stream::iter(script.items);
                if script.then_close {
                    items.boxed()
                } else {
                    items.chain(futures::stream::pending()).boxed()
                }
            }
            None => futures::stream::pending().boxed(),
        })
    }

    async fn send_control(
        &self,
        _session: &SessionInfo,
        message: &serde_json::Value,
    ) -> Result<(), ClientError> {
        self.controls.lock().push(message.clone());
        Ok(())
    }

    async fn close_session(&self, _session: &SessionInfo) -> Result<(), ClientError> {
        let delay = self.first_close_delay.lock().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.closed_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Media source handing out pre-registered frame channels
#[derive(Default)]
pub struct MockSource {
    readers: Mutex<VecDeque<mpsc::UnboundedReceiver<Result<Frame, ClientError>>>>,
    pub opened: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the next subscription; frames sent here are yielded in order
    /// and dropping the sender ends the stream.
    pub fn push_stream(&self) -> mpsc::UnboundedSender<Result<Frame, ClientError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.readers.lock().push_back(rx);
        tx
    }
}

#[async_trait]
impl MediaSource for MockSource {
    async fn open_read(
        &self,
        subscribe_url: &str,
        _options: &ReadOptions,
    ) -> Result<Box<dyn MediaReader>, ClientError> {
        self.opened.lock().push(subscribe_url.to_string());
        match self.readers.lock().pop_front() {
            Some(rx) => Ok(Box::new(MockReader { rx })),
            None => Err(ClientError::Transport("no stream registered".into())),
        }
    }
}

struct MockReader {
    rx: mpsc::UnboundedReceiver<Result<Frame, ClientError>>,
}

#[async_trait]
impl MediaReader for MockReader {
    async fn next_frame(&mut self) -> Result<Option<Frame>, ClientError> {
        self.rx.recv().await.transpose()
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        self.rx.close();
        Ok(())
    }
}
