//! Loopback demo: publish generated frames and read them straight back
//!
//! Run with: cargo run --example loopback [FPS]
//!
//! An in-process orchestrator echoes every published frame onto the
//! subscribe side. A producer thread renders a moving gradient, pauses for a
//! second halfway through (watch the state go `degraded` while the last frame
//! is repeated), then resumes. Status is printed every 250 ms.
//!
//! Set `RUST_LOG=trickle_bridge=trace` to see per-frame logging.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use trickle_bridge::client::{EventStream, NegotiateRequest, ReadOptions, WriteOptions};
use trickle_bridge::{
    BridgeConfig, ClientError, Frame, MediaReader, MediaSource, MediaWriter, OrchestratorClient,
    PublisherConfig, SessionInfo, StartRequest, StreamController, SubscriberConfig,
};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 64;

/// Echoes published frames to every subscriber
struct Loopback {
    frames: broadcast::Sender<Frame>,
}

impl Loopback {
    fn new() -> Self {
        let (frames, _) = broadcast::channel(8);
        Self { frames }
    }
}

#[async_trait]
impl OrchestratorClient for Loopback {
    async fn negotiate(&self, request: &NegotiateRequest) -> Result<SessionInfo, ClientError> {
        println!("Negotiating model {:?} at {}", request.model_id, request.orchestrator_url);
        Ok(SessionInfo {
            publish_url: "https://loopback/ai/trickle/demo".into(),
            subscribe_url: "https://loopback/ai/trickle/demo-out".into(),
            control_url: "https://loopback/ai/trickle/demo-control".into(),
            events_url: String::new(),
            session_id: "demo".into(),
        })
    }

    async fn open_write(
        &self,
        _session: &SessionInfo,
        options: &WriteOptions,
    ) -> Result<Box<dyn MediaWriter>, ClientError> {
        println!("Publishing at {} fps, {}x{}", options.fps, options.frame_width, options.frame_height);
        Ok(Box::new(LoopbackWriter {
            frames: self.frames.clone(),
        }))
    }

    async fn events(&self, _session: &SessionInfo) -> Result<EventStream, ClientError> {
        Err(ClientError::EventStream("loopback has no event stream".into()))
    }

    async fn send_control(
        &self,
        _session: &SessionInfo,
        message: &serde_json::Value,
    ) -> Result<(), ClientError> {
        println!("Control message: {}", message);
        Ok(())
    }

    async fn close_session(&self, _session: &SessionInfo) -> Result<(), ClientError> {
        Ok(())
    }
}

#[async_trait]
impl MediaSource for Loopback {
    async fn open_read(
        &self,
        _subscribe_url: &str,
        _options: &ReadOptions,
    ) -> Result<Box<dyn MediaReader>, ClientError> {
        Ok(Box::new(LoopbackReader {
            frames: self.frames.subscribe(),
        }))
    }
}

struct LoopbackWriter {
    frames: broadcast::Sender<Frame>,
}

#[async_trait]
impl MediaWriter for LoopbackWriter {
    async fn write_frame(&mut self, frame: &Frame, _pts: u64) -> Result<(), ClientError> {
        // No subscriber yet is not an error
        let _ = self.frames.send(frame.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        Ok(())
    }
}

struct LoopbackReader {
    frames: broadcast::Receiver<Frame>,
}

#[async_trait]
impl MediaReader for LoopbackReader {
    async fn next_frame(&mut self) -> Result<Option<Frame>, ClientError> {
        loop {
            match self.frames.recv().await {
                Ok(frame) => return Ok(Some(frame)),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        Ok(())
    }
}

fn gradient(step: u32) -> Frame {
    let mut data = Vec::with_capacity((WIDTH * HEIGHT * 3) as usize);
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            data.push(((x + step) % 256) as u8);
            data.push(((y * 4) % 256) as u8);
            data.push((step * 8 % 256) as u8);
        }
    }
    Frame::from_rgb(WIDTH, HEIGHT, data).expect("gradient has the declared size")
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let fps: f64 = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 15.0,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("trickle_bridge=info".parse()?),
        )
        .init();

    let loopback = Arc::new(Loopback::new());
    let controller = StreamController::new(
        loopback.clone(),
        loopback,
        BridgeConfig::default().output_size(WIDTH, HEIGHT),
        PublisherConfig::new("localhost:8935")
            .fps(fps)
            .frame_size(WIDTH, HEIGHT),
        SubscriberConfig::default(),
    );

    let status = controller.start(StartRequest::new().request_id("loopback-demo"))?;
    println!("Session {} is {}", status.session_id, status.state);
    controller.send_control(serde_json::json!({"prompt": "loopback"}))?;

    let bridge = Arc::clone(controller.bridge());
    let interval = Duration::from_secs_f64(1.0 / fps);
    let producer = thread::spawn(move || {
        for step in 0..90 {
            if step == 45 {
                thread::sleep(Duration::from_secs(1));
            }
            bridge.enqueue(gradient(step));
            thread::sleep(interval);
        }
    });

    while !producer.is_finished() {
        thread::sleep(Duration::from_millis(250));
        let status = controller.status();
        let (frame, has_frame) = controller.pull_output_frame();
        println!(
            "{:>8} sent={:<4} repeated={:<4} queue={:<2} received={:<4} skipped={:<3} output={}",
            status.publisher.state,
            status.publisher.frames_sent,
            status.publisher.frames_repeated,
            status.publisher.queue_depth,
            status.subscriber.frames_received,
            status.subscriber.frames_skipped,
            match (has_frame, frame.pixel(0, 0)) {
                (true, Some(px)) => format!("{:?}", px),
                _ => "blank".into(),
            }
        );
    }

    let health = controller.health();
    println!("Healthy: {} (tasks alive: {})", health.healthy, health.tasks_alive);

    let sent = controller.status().publisher.frames_sent;
    let stopped = controller.stop();
    println!("Stopped: {} after {} frames", stopped.state, sent);
    Ok(())
}
