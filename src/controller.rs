//! Stream controller
//!
//! One object for the control surface above this crate: owns both frame
//! bridges, the publisher and the subscriber, and wires the subscriber to the
//! publisher's session runtime. Every operation is a thin pass-through.

use std::sync::Arc;

use serde::Serialize;

use crate::bridge::{BridgeConfig, FrameBridge, OutputFrameBridge};
use crate::client::{
    MediaSource, NetworkPublisher, NetworkSubscriber, OrchestratorClient, PublisherConfig,
    StartRequest, SubscriberConfig, SubscriberStatus,
};
use crate::error::{Error, Result};
use crate::media::{Frame, PixelData};
use crate::session::{HealthReport, PublisherStatus};
use crate::stats::OutputStats;

/// Combined status of the controller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    pub publisher: PublisherStatus,
    pub subscriber: SubscriberStatus,
    pub output: OutputStats,
}

/// Owns a publisher/subscriber pair and the bridges between them and the pipeline
pub struct StreamController {
    bridge: Arc<FrameBridge>,
    output: Arc<OutputFrameBridge>,
    publisher: NetworkPublisher,
    subscriber: NetworkSubscriber,
    auto_subscribe: bool,
}

impl StreamController {
    /// Create a controller; nothing runs until `start`
    pub fn new(
        client: Arc<dyn OrchestratorClient>,
        source: Arc<dyn MediaSource>,
        bridge_config: BridgeConfig,
        publisher_config: PublisherConfig,
        subscriber_config: SubscriberConfig,
    ) -> Self {
        let output = Arc::new(OutputFrameBridge::new(
            bridge_config.output_width,
            bridge_config.output_height,
        ));
        let bridge = Arc::new(FrameBridge::new(bridge_config));

        Self {
            publisher: NetworkPublisher::new(client, Arc::clone(&bridge), publisher_config),
            subscriber: NetworkSubscriber::new(source, Arc::clone(&output), subscriber_config),
            bridge,
            output,
            auto_subscribe: true,
        }
    }

    /// Whether `start` connects the subscriber when the session has an output stream
    pub fn auto_subscribe(mut self, enabled: bool) -> Self {
        self.auto_subscribe = enabled;
        self
    }

    /// Start publishing and, if enabled, subscribe to the session output.
    ///
    /// A subscriber failure is logged and does not fail the start.
    pub fn start(&self, request: StartRequest) -> Result<PublisherStatus> {
        let status = self.publisher.start(request)?;

        if self.auto_subscribe && !status.subscribe_url.is_empty() {
            if let Err(e) = self.connect_subscriber(Some(&status.subscribe_url)) {
                tracing::warn!(error = %e, "Failed to connect subscriber");
            }
        }
        Ok(status)
    }

    /// Connect the subscriber to `subscribe_url`, or to the current
    /// session's subscribe URL when `None`
    pub fn connect_subscriber(&self, subscribe_url: Option<&str>) -> Result<()> {
        let url = match subscribe_url {
            Some(url) => url.to_string(),
            None => {
                let url = self.publisher.status().subscribe_url;
                if url.is_empty() {
                    return Err(Error::NotRunning);
                }
                url
            }
        };

        self.subscriber.attach_loop(self.publisher.ensure_runtime()?);
        self.subscriber.start(url)
    }

    /// Stop the subscriber, then the publisher
    pub fn stop(&self) -> PublisherStatus {
        self.subscriber.stop();
        self.publisher.stop()
    }

    /// Combined status snapshot
    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            publisher: self.publisher.status(),
            subscriber: self.subscriber.status(),
            output: self.output.stats(),
        }
    }

    /// Publisher health
    pub fn health(&self) -> HealthReport {
        self.publisher.get_health()
    }

    /// Forward a control message to the running session
    pub fn send_control(&self, message: serde_json::Value) -> Result<()> {
        self.publisher.send_control(message)
    }

    /// Hand a frame to the publisher without blocking
    pub fn enqueue_frame(&self, frame: Frame) {
        self.bridge.enqueue(frame);
    }

    /// Normalize host pixel data and hand it to the publisher
    pub fn enqueue_pixels(
        &self,
        width: u32,
        height: u32,
        channels: usize,
        pixels: PixelData<'_>,
    ) -> Result<()> {
        self.bridge.enqueue_pixels(width, height, channels, pixels)
    }

    /// Normalize a host tensor and hand it to the publisher
    pub fn enqueue_tensor(&self, shape: &[usize], pixels: PixelData<'_>) -> Result<()> {
        self.bridge.enqueue_tensor(shape, pixels)
    }

    /// Latest output frame, or a blank one; the flag tells which
    pub fn pull_output_frame(&self) -> (Frame, bool) {
        let (frame, _, has_frame) = self.output.get_or_blank();
        (frame, has_frame)
    }

    pub fn publisher(&self) -> &NetworkPublisher {
        &self.publisher
    }

    pub fn subscriber(&self) -> &NetworkSubscriber {
        &self.subscriber
    }

    pub fn bridge(&self) -> &Arc<FrameBridge> {
        &self.bridge
    }

    pub fn output(&self) -> &Arc<OutputFrameBridge> {
        &self.output
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        self.subscriber.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::client::mock::{init_tracing, MockOrchestrator, MockSource};
    use crate::session::StreamState;

    fn controller(mock: MockOrchestrator) -> (Arc<MockOrchestrator>, Arc<MockSource>, StreamController) {
        init_tracing();
        let mock = Arc::new(mock);
        let source = Arc::new(MockSource::new());
        let controller = StreamController::new(
            mock.clone(),
            source.clone(),
            BridgeConfig::default(),
            PublisherConfig::new("orch.test:8935").fps(10.0),
            SubscriberConfig::default(),
        );
        (mock, source, controller)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_pull_before_any_output() {
        let (_mock, _source, controller) = controller(MockOrchestrator::new());
        let (frame, has_frame) = controller.pull_output_frame();

        assert!(!has_frame);
        assert_eq!((frame.width(), frame.height()), (1280, 720));
        assert!(frame.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_start_connects_subscriber() {
        let (mock, source, controller) = controller(MockOrchestrator::new());
        let output = source.push_stream();

        let status = assert_ok!(controller.start(StartRequest::new()));
        assert!(status.running);
        assert!(controller.subscriber().is_running());
        assert!(wait_for(|| source.opened.lock().first() == Some(&status.subscribe_url)));

        controller.enqueue_frame(Frame::from_rgb(1, 1, vec![5, 5, 5]).unwrap());
        assert!(wait_for(|| mock.log().ids().first() == Some(&5)));

        output.send(Ok(Frame::from_rgb(1, 1, vec![9, 8, 7]).unwrap())).unwrap();
        assert!(wait_for(|| controller.pull_output_frame().1));
        let (frame, _) = controller.pull_output_frame();
        assert_eq!(frame.pixel(0, 0), Some([9, 8, 7]));

        let status = controller.status();
        assert_eq!(status.subscriber.frames_received, 1);
        assert!(status.output.has_frame);

        let stopped = controller.stop();
        assert!(!stopped.running);
        assert!(!controller.subscriber().is_running());
        assert!(!controller.pull_output_frame().1);

        let again = controller.stop();
        assert!(!again.running);
    }

    #[test]
    fn test_auto_subscribe_disabled() {
        let (_mock, source, controller) = controller(MockOrchestrator::new());
        let controller = controller.auto_subscribe(false);

        assert_ok!(controller.start(StartRequest::new()));
        assert!(!controller.subscriber().is_running());
        assert!(source.opened.lock().is_empty());

        source.push_stream();
        assert_ok!(controller.connect_subscriber(None));
        assert!(controller.subscriber().is_running());

        controller.stop();
    }

    #[test]
    fn test_session_without_output() {
        let (_mock, _source, controller) = controller(MockOrchestrator::new().without_subscribe());

        assert_ok!(controller.start(StartRequest::new()));
        assert!(!controller.subscriber().is_running());

        let err = assert_err!(controller.connect_subscriber(None));
        assert!(matches!(err, Error::NotRunning));

        controller.stop();
    }

    #[test]
    fn test_send_control_and_health() {
        let (mock, _source, controller) = controller(MockOrchestrator::new());
        assert!(!controller.health().healthy);

        assert_ok!(controller.start(StartRequest::new()));
        assert!(controller.health().healthy);
        assert_ok!(controller.send_control(serde_json::json!({"strength": 0.5})));
        assert_eq!(mock.controls.lock().len(), 1);

        let stopped = controller.stop();
        assert_eq!(stopped.state, StreamState::Closed);
        assert!(matches!(
            controller.send_control(serde_json::json!({})),
            Err(Error::NotRunning)
        ));
    }

    #[test]
    fn test_enqueue_pixels_validates() {
        let (_mock, _source, controller) = controller(MockOrchestrator::new());

        let err = assert_err!(controller.enqueue_pixels(2, 2, 3, PixelData::U8(&[0; 5])));
        assert!(err.is_validation());
        assert_eq!(controller.bridge().depth(), 0);

        assert_ok!(controller.enqueue_pixels(1, 1, 4, PixelData::F32(&[1.0, 0.5, 0.0, 1.0])));
        assert_eq!(controller.bridge().depth(), 1);
    }
}
