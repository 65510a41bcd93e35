//! The per-camera capture loop.
//!
//! Each camera gets one long-lived thread running this loop: open the
//! source, read frames, resize, buffer, detect, enqueue alerts. Any
//! source failure is absorbed locally; the loop reconnects forever until
//! its cancel flag is raised. A loop's worst case is therefore "camera
//! offline, retrying", never "pipeline dead".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::alert::AlertRequest;
use crate::config::{CaptureSettings, DetectionSettings};
use crate::detect::{DetectionEngine, DetectionEvent};
use crate::frame::SharedFrameRing;
use crate::ingest::{open_source, FrameSource, SourceOptions};
use crate::{CameraIdentity, DetectionTuning};

/// Cancel-check granularity while sleeping between connection attempts.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Capture parameters fixed at pipeline start.
#[derive(Clone, Copy, Debug)]
pub struct CaptureOptions {
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    /// Pause between failed attempts to open a source.
    pub connect_backoff: Duration,
    /// Pause after a mid-stream drop before reconnecting.
    pub reconnect_pause: Duration,
    /// Delay between a face alert and its follow-up clip.
    pub clip_delay: Duration,
}

impl CaptureOptions {
    pub fn new(capture: &CaptureSettings, detection: &DetectionSettings) -> Self {
        Self {
            target_fps: capture.target_fps,
            width: capture.width,
            height: capture.height,
            connect_backoff: capture.connect_backoff,
            reconnect_pause: capture.reconnect_pause,
            clip_delay: detection.clip_delay,
        }
    }

    fn source_options(&self) -> SourceOptions {
        SourceOptions {
            target_fps: self.target_fps,
            width: self.width,
            height: self.height,
        }
    }
}

/// Everything one capture loop shares with the rest of the process.
pub struct CaptureContext {
    pub identity: CameraIdentity,
    pub url: String,
    pub ring: SharedFrameRing,
    /// Raised by the supervisor to stop the loop.
    pub cancel: Arc<AtomicBool>,
    /// When false, frames are still buffered but detection is skipped.
    pub monitoring: Arc<AtomicBool>,
    pub tuning: Arc<DetectionTuning>,
    pub alerts: Sender<AlertRequest>,
}

enum LoopState {
    Connecting,
    Streaming(Box<dyn FrameSource>),
    Recovering(Duration),
    Stopped,
}

/// Run the capture loop until cancelled, opening sources via `open_source`.
pub fn run_capture_loop(ctx: CaptureContext, options: CaptureOptions, engine: DetectionEngine) {
    let source_options = options.source_options();
    run_capture_loop_with(ctx, options, engine, move |url| {
        open_source(url, source_options)
    });
}

/// Capture loop with an injectable source opener, so tests can script
/// connection failures and bounded streams.
pub fn run_capture_loop_with<F>(
    ctx: CaptureContext,
    options: CaptureOptions,
    mut engine: DetectionEngine,
    mut open: F,
) where
    F: FnMut(&str) -> Result<Box<dyn FrameSource>>,
{
    log::info!(
        "capture loop starting for {} ({}, backend {})",
        ctx.identity,
        ctx.url,
        engine.backend_name()
    );

    let mut state = LoopState::Connecting;
    loop {
        if ctx.cancel.load(Ordering::SeqCst) {
            state = LoopState::Stopped;
        }
        state = match state {
            LoopState::Connecting => match open(&ctx.url) {
                Ok(source) => {
                    log::info!("{} streaming from {}", ctx.identity, source.describe());
                    LoopState::Streaming(source)
                }
                Err(e) => {
                    log::warn!(
                        "{} failed to open {}: {} (retrying in {:?})",
                        ctx.identity,
                        ctx.url,
                        e,
                        options.connect_backoff
                    );
                    LoopState::Recovering(options.connect_backoff)
                }
            },
            LoopState::Streaming(mut source) => match source.read_frame() {
                Ok(Some(frame)) => {
                    if let Err(e) = process_frame(&ctx, &options, &mut engine, frame) {
                        log::warn!("{} dropped a frame: {}", ctx.identity, e);
                    }
                    LoopState::Streaming(source)
                }
                Ok(None) => {
                    log::info!(
                        "{} stream ended, reconnecting in {:?}",
                        ctx.identity,
                        options.reconnect_pause
                    );
                    LoopState::Recovering(options.reconnect_pause)
                }
                Err(e) => {
                    log::warn!(
                        "{} stream error: {} (reconnecting in {:?})",
                        ctx.identity,
                        e,
                        options.reconnect_pause
                    );
                    LoopState::Recovering(options.reconnect_pause)
                }
            },
            LoopState::Recovering(pause) => {
                if sleep_with_cancel(&ctx.cancel, pause) {
                    LoopState::Stopped
                } else {
                    LoopState::Connecting
                }
            }
            LoopState::Stopped => break,
        };
    }
    log::info!("capture loop stopped for {}", ctx.identity);
}

/// Resize, buffer, and (when monitoring) detect on one frame.
fn process_frame(
    ctx: &CaptureContext,
    options: &CaptureOptions,
    engine: &mut DetectionEngine,
    frame: crate::frame::Frame,
) -> Result<()> {
    let frame = frame.resized(options.width, options.height)?;

    {
        let mut ring = ctx
            .ring
            .write()
            .map_err(|_| anyhow::anyhow!("frame ring poisoned"))?;
        ring.push(frame.clone());
    }

    if !ctx.monitoring.load(Ordering::SeqCst) {
        return Ok(());
    }

    let tuning = ctx.tuning.snapshot();
    for event in engine.evaluate(&frame, tuning) {
        let requests = match event {
            DetectionEvent::Motion { frame } => vec![AlertRequest::Photo {
                camera: ctx.identity.clone(),
                frame,
                caption: format!("Motion detected on {}", ctx.identity),
            }],
            DetectionEvent::Face { frame } => vec![
                AlertRequest::Photo {
                    camera: ctx.identity.clone(),
                    frame,
                    caption: format!("Face detected on {}", ctx.identity),
                },
                AlertRequest::DeferredClip {
                    camera: ctx.identity.clone(),
                    ring: ctx.ring.clone(),
                    deliver_at: Instant::now() + options.clip_delay,
                    caption: format!("Clip following face on {}", ctx.identity),
                },
            ],
        };
        for request in requests {
            // A closed channel means the process is shutting down; the
            // cancel flag will stop the loop shortly.
            if ctx.alerts.send(request).is_err() {
                log::debug!("{} alert channel closed", ctx.identity);
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Sleep in short slices, returning true if the cancel flag was raised.
fn sleep_with_cancel(cancel: &AtomicBool, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if cancel.load(Ordering::SeqCst) {
            return true;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        std::thread::sleep(remaining.min(CANCEL_POLL));
    }
}
