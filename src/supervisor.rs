//! Pipeline lifecycle management.
//!
//! The supervisor owns one handle per camera pipeline: the capture thread,
//! its cancel flag, and its frame ring. All lifecycle transitions (start,
//! stop, add, remove) go through here, from one control context, so two
//! pipelines can never race for the same camera. The supervisor never
//! restarts a pipeline on its own: capture loops recover internally, and a
//! thread that exited anyway is only replaced on an explicit start.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use crate::alert::AlertRequest;
use crate::capture::{run_capture_loop, CaptureContext, CaptureOptions};
use crate::config::VigilConfig;
use crate::detect::{build_face_backend, DetectionEngine};
use crate::frame::{shared_ring, Frame, SharedFrameRing};
use crate::registry::CameraRegistry;
use crate::{CameraIdentity, CameraSource, DetectionTuning};

/// Join-poll granularity while waiting for a cancelled pipeline to exit.
const JOIN_POLL: Duration = Duration::from_millis(20);

/// Recorded clip length bounds, in seconds.
const MIN_CLIP_SECS: u64 = 1;
const MAX_CLIP_SECS: u64 = 60;

/// Where a camera's pipeline currently stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStatus {
    /// No pipeline exists for this camera.
    NotRunning,
    /// The capture thread is alive.
    Live,
    /// The capture thread exited without being stopped (a defect: capture
    /// loops are supposed to recover forever).
    Exited,
}

/// Result of a stop request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// The thread did not exit within the stop timeout and was detached.
    TimedOut,
    NotRunning,
}

struct PipelineHandle {
    cancel: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    ring: SharedFrameRing,
    /// Per-camera detection toggle; frames buffer regardless.
    monitoring: Arc<AtomicBool>,
}

pub struct PipelineSupervisor {
    config: VigilConfig,
    registry: CameraRegistry,
    alerts: Sender<AlertRequest>,
    /// Initial monitoring state for newly started pipelines.
    monitoring_default: bool,
    tuning: Arc<DetectionTuning>,
    pipelines: HashMap<CameraIdentity, PipelineHandle>,
}

impl PipelineSupervisor {
    pub fn new(config: VigilConfig, alerts: Sender<AlertRequest>) -> Self {
        let registry = CameraRegistry::new(&config.registry_path);
        let tuning = Arc::new(DetectionTuning::new(config.detection.motion_threshold));
        Self {
            config,
            registry,
            alerts,
            monitoring_default: true,
            tuning,
            pipelines: HashMap::new(),
        }
    }

    /// Start a pipeline for every registered camera. Returns how many were
    /// started; individual failures are logged and skipped.
    pub fn boot(&mut self) -> usize {
        let sources = self.registry.sources();
        let mut started = 0;
        for source in sources {
            match self.start_pipeline(&source) {
                Ok(()) => started += 1,
                Err(e) => log::error!("failed to start pipeline for {}: {}", source.identity, e),
            }
        }
        started
    }

    /// Start (or revive) the pipeline for one camera. A live pipeline is
    /// left untouched; a dead one is replaced with fresh detection state.
    pub fn start_pipeline(&mut self, source: &CameraSource) -> Result<()> {
        if let Some(handle) = self.pipelines.get(&source.identity) {
            let live = handle
                .join
                .as_ref()
                .map(|j| !j.is_finished())
                .unwrap_or(false);
            if live {
                log::debug!("pipeline for {} is already running", source.identity);
                return Ok(());
            }
            log::warn!("replacing exited pipeline for {}", source.identity);
            self.pipelines.remove(&source.identity);
        }

        let mut backend = build_face_backend(&self.config.detection)?;
        backend
            .warm_up()
            .with_context(|| format!("warm up face backend for {}", source.identity))?;
        let engine = DetectionEngine::new(
            source.identity.clone(),
            backend,
            (&self.config.detection).into(),
        );
        let options = CaptureOptions::new(&self.config.capture, &self.config.detection);
        let ring = shared_ring(self.config.capture.ring_capacity());
        let cancel = Arc::new(AtomicBool::new(false));
        let monitoring = Arc::new(AtomicBool::new(self.monitoring_default));

        let ctx = CaptureContext {
            identity: source.identity.clone(),
            url: source.url.clone(),
            ring: ring.clone(),
            cancel: cancel.clone(),
            monitoring: monitoring.clone(),
            tuning: self.tuning.clone(),
            alerts: self.alerts.clone(),
        };
        let join = std::thread::Builder::new()
            .name(format!("capture-{}-{}", source.identity.owner, source.identity.name))
            .spawn(move || run_capture_loop(ctx, options, engine))
            .with_context(|| format!("spawn capture thread for {}", source.identity))?;

        self.pipelines.insert(
            source.identity.clone(),
            PipelineHandle {
                cancel,
                join: Some(join),
                ring,
                monitoring,
            },
        );
        Ok(())
    }

    /// Cancel a pipeline and wait up to the stop timeout for its thread to
    /// exit. The handle is removed either way; a timed-out thread is
    /// detached and will die at its next cancel check.
    pub fn stop_pipeline(&mut self, identity: &CameraIdentity) -> StopOutcome {
        let Some(mut handle) = self.pipelines.remove(identity) else {
            return StopOutcome::NotRunning;
        };
        handle.cancel.store(true, Ordering::SeqCst);

        let Some(join) = handle.join.take() else {
            return StopOutcome::Stopped;
        };
        let deadline = Instant::now() + self.config.capture.stop_timeout;
        while !join.is_finished() {
            if Instant::now() >= deadline {
                log::warn!("pipeline for {} ignored its stop timeout; detaching", identity);
                return StopOutcome::TimedOut;
            }
            std::thread::sleep(JOIN_POLL);
        }
        if join.join().is_err() {
            log::error!("capture thread for {} panicked", identity);
        }
        StopOutcome::Stopped
    }

    /// Stop every pipeline. Used at shutdown.
    pub fn stop_all(&mut self) {
        let identities: Vec<CameraIdentity> = self.pipelines.keys().cloned().collect();
        for identity in identities {
            match self.stop_pipeline(&identity) {
                StopOutcome::Stopped => log::info!("stopped pipeline for {}", identity),
                StopOutcome::TimedOut => {}
                StopOutcome::NotRunning => {}
            }
        }
    }

    pub fn status(&self, identity: &CameraIdentity) -> PipelineStatus {
        match self.pipelines.get(identity) {
            None => PipelineStatus::NotRunning,
            Some(handle) => {
                let live = handle
                    .join
                    .as_ref()
                    .map(|j| !j.is_finished())
                    .unwrap_or(false);
                if live {
                    PipelineStatus::Live
                } else {
                    PipelineStatus::Exited
                }
            }
        }
    }

    pub fn running_count(&self) -> usize {
        self.pipelines
            .values()
            .filter(|h| h.join.as_ref().map(|j| !j.is_finished()).unwrap_or(false))
            .count()
    }

    /// Register a camera and start its pipeline.
    pub fn add_camera(&mut self, source: &CameraSource) -> Result<()> {
        self.registry.add(source)?;
        self.start_pipeline(source)
    }

    /// Stop a camera's pipeline and drop it from the registry. Returns
    /// whether the camera was registered.
    pub fn remove_camera(&mut self, identity: &CameraIdentity) -> Result<bool> {
        self.stop_pipeline(identity);
        self.registry.remove(identity)
    }

    /// Registered cameras for one owner, with pipeline liveness.
    pub fn list_cameras(&self, owner: &str) -> Vec<(CameraSource, bool)> {
        self.registry
            .sources()
            .into_iter()
            .filter(|s| s.identity.owner == owner)
            .map(|s| {
                let live = self.status(&s.identity) == PipelineStatus::Live;
                (s, live)
            })
            .collect()
    }

    /// The most recent frame buffered for a camera.
    pub fn snapshot(&self, identity: &CameraIdentity) -> Result<Option<Frame>> {
        let handle = self
            .pipelines
            .get(identity)
            .ok_or_else(|| anyhow!("no pipeline for {}", identity))?;
        let ring = handle
            .ring
            .read()
            .map_err(|_| anyhow!("frame ring for {} is poisoned", identity))?;
        Ok(ring.snapshot())
    }

    /// The last `seconds` of buffered footage, clamped to 1..=60 seconds
    /// and to what the ring actually holds.
    pub fn clip(&self, identity: &CameraIdentity, seconds: u64) -> Result<Vec<Frame>> {
        let handle = self
            .pipelines
            .get(identity)
            .ok_or_else(|| anyhow!("no pipeline for {}", identity))?;
        let seconds = seconds.clamp(MIN_CLIP_SECS, MAX_CLIP_SECS);
        let frames = (seconds as usize).saturating_mul(self.config.capture.target_fps as usize);
        let ring = handle
            .ring
            .read()
            .map_err(|_| anyhow!("frame ring for {} is poisoned", identity))?;
        Ok(ring.recent(frames))
    }

    /// Enqueue the last `seconds` of buffered footage for delivery as a
    /// clip. Fails when nothing is buffered yet.
    pub fn record_clip(&self, identity: &CameraIdentity, seconds: u64) -> Result<()> {
        let frames = self.clip(identity, seconds)?;
        if frames.is_empty() {
            return Err(anyhow!("no footage buffered yet for {}", identity));
        }
        self.alerts
            .send(AlertRequest::Clip {
                camera: identity.clone(),
                frames,
                caption: format!("Recorded clip from {}", identity),
            })
            .map_err(|_| anyhow!("alert channel closed"))?;
        Ok(())
    }

    /// Enable or disable detection for one camera. Frames keep buffering
    /// either way.
    pub fn set_monitoring_enabled(
        &self,
        identity: &CameraIdentity,
        enabled: bool,
    ) -> Result<()> {
        let handle = self
            .pipelines
            .get(identity)
            .ok_or_else(|| anyhow!("no pipeline for {}", identity))?;
        handle.monitoring.store(enabled, Ordering::SeqCst);
        log::info!(
            "monitoring {} for {}",
            if enabled { "enabled" } else { "disabled" },
            identity
        );
        Ok(())
    }

    pub fn monitoring_enabled(&self, identity: &CameraIdentity) -> Result<bool> {
        let handle = self
            .pipelines
            .get(identity)
            .ok_or_else(|| anyhow!("no pipeline for {}", identity))?;
        Ok(handle.monitoring.load(Ordering::SeqCst))
    }

    /// Set the monitoring flag on every pipeline, and the default for
    /// pipelines started later.
    pub fn set_all_monitoring(&mut self, enabled: bool) {
        self.monitoring_default = enabled;
        for handle in self.pipelines.values() {
            handle.monitoring.store(enabled, Ordering::SeqCst);
        }
    }

    pub fn set_motion_enabled(&self, enabled: bool) {
        self.tuning.set_motion_enabled(enabled);
    }

    /// Current runtime tuning values, for health reporting.
    pub fn tuning(&self) -> crate::TuningSnapshot {
        self.tuning.snapshot()
    }

    pub fn set_detection_threshold(&self, threshold: u64) {
        self.tuning.set_motion_threshold(threshold);
        log::info!("motion threshold set to {}", threshold);
    }
}

impl Drop for PipelineSupervisor {
    fn drop(&mut self) {
        self.stop_all();
    }
}
