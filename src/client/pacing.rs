//! Frame pacing loop
//!
//! Drains the ingress bridge at the configured frame rate and writes each
//! frame to the publish handle. One frame goes out per tick:
//!
//! 1. Until the pipeline produces its first frame, wait on the bridge in
//!    bounded polls (consulting the fallback source after each empty poll).
//! 2. Afterwards, wait for a fresh frame until the next tick. A fresh frame
//!    is sent at the tick (`RUNNING`); if none arrives, the last live frame is
//!    sent again (`DEGRADED`) so the outbound stream keeps its cadence.
//! 3. Fatal write errors end the loop and the session (`ERROR`); transient
//!    ones are logged and the next tick proceeds as usual.
//! 4. The next tick is one interval after the current one, unless the loop
//!    fell more than an interval behind, in which case it re-synchronizes to
//!    now + interval instead of bursting to catch up.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::orchestrator::MediaWriter;
use crate::bridge::FrameBridge;
use crate::media::Frame;
use crate::session::SessionState;

/// Where the frame written on a tick came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOrigin {
    /// Taken from the bridge this tick
    Fresh,
    /// The last live frame, re-sent because nothing fresh arrived
    Repeat,
    /// Pulled from the fallback source before the first live frame
    Fallback,
}

/// Everything the pacing loop needs besides the writer
pub(crate) struct PacingContext {
    pub bridge: Arc<FrameBridge>,
    pub session: Arc<Mutex<SessionState>>,
    pub cancel: CancellationToken,
    pub interval: Duration,
    pub first_frame_poll: Duration,
    pub max_consecutive_repeats: Option<u32>,
}

/// Run the pacing loop until cancelled or a fatal error occurs.
///
/// Returns the writer so the caller can close it once the loop is known to
/// be finished.
pub(crate) async fn run_pacing_loop(
    ctx: PacingContext,
    mut writer: Box<dyn MediaWriter>,
) -> Box<dyn MediaWriter> {
    let mut last_live: Option<Frame> = None;
    let mut next_tick = Instant::now();
    let mut pts: u64 = 0;
    let mut last_origin: Option<FrameOrigin> = None;

    tracing::info!(
        interval_ms = ctx.interval.as_millis() as u64,
        "Pacing loop started"
    );

    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }

        let (frame, origin, tick) = match last_live.clone() {
            None => {
                let taken = tokio::select! {
                    _ = ctx.cancel.cancelled() => break,
                    taken = ctx.bridge.take_timeout(ctx.first_frame_poll) => taken,
                };
                match taken {
                    Some(frame) => {
                        tracing::info!(
                            width = frame.width(),
                            height = frame.height(),
                            "First frame received"
                        );
                        last_live = Some(frame.clone());
                        (frame, FrameOrigin::Fresh, Instant::now())
                    }
                    None => match ctx.bridge.next_fallback() {
                        Some(frame) => (frame, FrameOrigin::Fallback, Instant::now()),
                        None => {
                            tracing::trace!("Waiting for first frame");
                            continue;
                        }
                    },
                }
            }
            Some(previous) => {
                let deadline = next_tick;
                let taken = tokio::select! {
                    _ = ctx.cancel.cancelled() => break,
                    taken = ctx.bridge.take_timeout(deadline.saturating_duration_since(Instant::now())) => taken,
                };
                match taken {
                    Some(frame) => {
                        tokio::select! {
                            _ = ctx.cancel.cancelled() => break,
                            _ = tokio::time::sleep_until(deadline) => {}
                        }
                        last_live = Some(frame.clone());
                        (frame, FrameOrigin::Fresh, deadline)
                    }
                    None => (previous, FrameOrigin::Repeat, deadline),
                }
            }
        };

        let written = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            written = writer.write_frame(&frame, pts) => written,
        };

        match written {
            Ok(()) => {
                pts += 1;
                if let Some(stalled) = record_write(&ctx, origin) {
                    tracing::error!(consecutive_repeats = stalled, "Producer stalled; failing session");
                    ctx.session.lock().fail(format!(
                        "producer stalled: {} consecutive repeated frames",
                        stalled
                    ));
                    ctx.cancel.cancel();
                    break;
                }
                log_origin_change(last_origin, origin);
                last_origin = Some(origin);
            }
            Err(e) if e.is_fatal() => {
                tracing::error!(error = %e, pts = pts, "Fatal write error; ending session");
                ctx.session.lock().fail(e.to_string());
                ctx.cancel.cancel();
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, pts = pts, "Failed to publish frame; retrying next tick");
            }
        }

        if origin != FrameOrigin::Fallback {
            next_tick = schedule_next(tick, Instant::now(), ctx.interval);
        }
    }

    tracing::info!(frames_written = pts, "Pacing loop exit");
    writer
}

/// Apply a successful write to the session.
///
/// Returns the repeat count when the configured stall limit is exceeded.
fn record_write(ctx: &PacingContext, origin: FrameOrigin) -> Option<u32> {
    let mut session = ctx.session.lock();
    match origin {
        FrameOrigin::Fresh => session.on_fresh_frame(),
        FrameOrigin::Repeat => session.on_repeated_frame(),
        FrameOrigin::Fallback => session.on_fallback_frame(),
    }

    let repeats = session.counters.consecutive_repeats;
    match ctx.max_consecutive_repeats {
        Some(max) if repeats > max => Some(repeats),
        _ => None,
    }
}

fn log_origin_change(previous: Option<FrameOrigin>, current: FrameOrigin) {
    match (previous, current) {
        (Some(FrameOrigin::Fresh), FrameOrigin::Repeat) => {
            tracing::info!("Producer stalled; repeating last frame")
        }
        (Some(FrameOrigin::Repeat), FrameOrigin::Fresh) => {
            tracing::info!("Fresh frames resumed")
        }
        (None, FrameOrigin::Fallback) => tracing::info!("Sending fallback frames until first live frame"),
        _ => {}
    }
}

/// Next tick after sending on `tick` and finishing at `now`
pub(crate) fn schedule_next(tick: Instant, now: Instant, interval: Duration) -> Instant {
    if now.saturating_duration_since(tick) > interval {
        now + interval
    } else {
        tick + interval
    }
}
