//! Per-camera detection state machine.
//!
//! Two independent sub-detectors run over every evaluated frame:
//!
//! - face: a backend classifier call gated by a cooldown; a positive result
//!   resets the cooldown and emits `DetectionEvent::Face`.
//! - motion: background subtraction (grayscale, blur, absolute difference,
//!   binarize, sum) gated by its own cooldown. The background reference is
//!   refreshed on a separate, shorter wall-clock period than the event
//!   cooldown: the model tracks slow lighting drift while a sudden large
//!   difference stays a transient event rather than becoming the new
//!   background.
//!
//! All cross-frame state lives here, owned by exactly one camera's capture
//! loop. A classifier failure on a single frame is logged and treated as
//! "no detection"; it never propagates.

use std::time::Instant;

use image::GrayImage;

use crate::config::DetectionSettings;
use crate::frame::Frame;
use crate::{CameraIdentity, TuningSnapshot};

use super::backend::FaceBackend;

/// Per-pixel difference (0..255) that counts as changed after blurring.
const PIXEL_DELTA_THRESHOLD: u8 = 25;
/// Gaussian blur sigma applied before differencing.
const BLUR_SIGMA: f32 = 3.0;
/// Weight contributed to the motion score by each changed pixel.
const CHANGED_PIXEL_WEIGHT: u64 = 255;

/// A positive detection, carrying the frame that triggered it.
#[derive(Clone, Debug)]
pub enum DetectionEvent {
    Motion { frame: Frame },
    Face { frame: Frame },
}

/// Cooldown and refresh periods, fixed at engine construction.
#[derive(Clone, Copy, Debug)]
pub struct EngineTimings {
    pub face_cooldown: std::time::Duration,
    pub motion_cooldown: std::time::Duration,
    pub background_refresh: std::time::Duration,
}

impl From<&DetectionSettings> for EngineTimings {
    fn from(settings: &DetectionSettings) -> Self {
        Self {
            face_cooldown: settings.face_cooldown,
            motion_cooldown: settings.motion_cooldown,
            background_refresh: settings.background_refresh,
        }
    }
}

struct DetectionState {
    background: Option<GrayImage>,
    last_face_alert: Option<Instant>,
    last_motion_alert: Option<Instant>,
    last_background_refresh: Option<Instant>,
}

impl DetectionState {
    fn new() -> Self {
        Self {
            background: None,
            last_face_alert: None,
            last_motion_alert: None,
            last_background_refresh: None,
        }
    }
}

pub struct DetectionEngine {
    camera: CameraIdentity,
    backend: Box<dyn FaceBackend>,
    timings: EngineTimings,
    state: DetectionState,
}

impl DetectionEngine {
    pub fn new(
        camera: CameraIdentity,
        backend: Box<dyn FaceBackend>,
        timings: EngineTimings,
    ) -> Self {
        Self {
            camera,
            backend,
            timings,
            state: DetectionState::new(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Evaluate one frame against both sub-detectors.
    pub fn evaluate(&mut self, frame: &Frame, tuning: TuningSnapshot) -> Vec<DetectionEvent> {
        self.evaluate_at(frame, tuning, Instant::now())
    }

    /// Clock-injected evaluation; `now` must be monotonically non-decreasing
    /// across calls for one engine.
    pub fn evaluate_at(
        &mut self,
        frame: &Frame,
        tuning: TuningSnapshot,
        now: Instant,
    ) -> Vec<DetectionEvent> {
        let mut events = Vec::new();

        if cooldown_elapsed(self.state.last_face_alert, self.timings.face_cooldown, now) {
            match self
                .backend
                .detect_faces(frame.pixels(), frame.width(), frame.height())
            {
                Ok(faces) if !faces.is_empty() => {
                    self.state.last_face_alert = Some(now);
                    log::info!(
                        "face detected on {} ({} region(s), backend {})",
                        self.camera,
                        faces.len(),
                        self.backend.name()
                    );
                    events.push(DetectionEvent::Face {
                        frame: frame.clone(),
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!(
                        "face classifier failed on {}: {} (treating frame as no detection)",
                        self.camera,
                        e
                    );
                }
            }
        }

        if tuning.motion_enabled {
            if let Some(event) = self.evaluate_motion(frame, tuning.motion_threshold, now) {
                events.push(event);
            }
        }

        events
    }

    fn evaluate_motion(
        &mut self,
        frame: &Frame,
        threshold: u64,
        now: Instant,
    ) -> Option<DetectionEvent> {
        let current = match frame.to_rgb_image() {
            Ok(image) => image::imageops::blur(&image::imageops::grayscale(&image), BLUR_SIGMA),
            Err(e) => {
                log::warn!("motion preprocessing failed on {}: {}", self.camera, e);
                return None;
            }
        };

        let Some(background) = &self.state.background else {
            // First valid observation seeds the background; no evaluation.
            self.state.background = Some(current);
            self.state.last_background_refresh = Some(now);
            return None;
        };

        let mut event = None;
        if cooldown_elapsed(
            self.state.last_motion_alert,
            self.timings.motion_cooldown,
            now,
        ) {
            let score = motion_score(background, &current);
            if score > threshold {
                self.state.last_motion_alert = Some(now);
                log::info!(
                    "motion detected on {} (score {} > threshold {})",
                    self.camera,
                    score,
                    threshold
                );
                event = Some(DetectionEvent::Motion {
                    frame: frame.clone(),
                });
            }
        }

        // Refresh on its own timescale, whatever the detection outcome.
        if cooldown_elapsed(
            self.state.last_background_refresh,
            self.timings.background_refresh,
            now,
        ) {
            self.state.background = Some(current);
            self.state.last_background_refresh = Some(now);
        }

        event
    }
}

fn cooldown_elapsed(last: Option<Instant>, cooldown: std::time::Duration, now: Instant) -> bool {
    match last {
        Some(last) => now.saturating_duration_since(last) >= cooldown,
        None => true,
    }
}

/// Sum of binarized per-pixel differences: each pixel whose blurred absolute
/// delta exceeds `PIXEL_DELTA_THRESHOLD` contributes `CHANGED_PIXEL_WEIGHT`.
fn motion_score(background: &GrayImage, current: &GrayImage) -> u64 {
    if background.dimensions() != current.dimensions() {
        // Dimensions only change if the pipeline was reconfigured mid-run;
        // treat the frame as a full change so the next refresh resyncs.
        return (current.width() as u64)
            .saturating_mul(current.height() as u64)
            .saturating_mul(CHANGED_PIXEL_WEIGHT);
    }
    background
        .as_raw()
        .iter()
        .zip(current.as_raw().iter())
        .filter(|(a, b)| a.abs_diff(**b) > PIXEL_DELTA_THRESHOLD)
        .map(|_| CHANGED_PIXEL_WEIGHT)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::{StubFaceBackend, StubResponse};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn camera() -> CameraIdentity {
        CameraIdentity::new("1001", "front-door").unwrap()
    }

    fn timings() -> EngineTimings {
        EngineTimings {
            face_cooldown: Duration::from_secs(30),
            motion_cooldown: Duration::from_secs(10),
            background_refresh: Duration::from_secs(5),
        }
    }

    fn tuning(threshold: u64) -> TuningSnapshot {
        TuningSnapshot {
            motion_enabled: true,
            motion_threshold: threshold,
        }
    }

    fn engine_with(backend: StubFaceBackend, timings: EngineTimings) -> DetectionEngine {
        DetectionEngine::new(camera(), Box::new(backend), timings)
    }

    fn motion_events(events: &[DetectionEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, DetectionEvent::Motion { .. }))
            .count()
    }

    fn face_events(events: &[DetectionEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, DetectionEvent::Face { .. }))
            .count()
    }

    #[test]
    fn first_frame_seeds_background_without_event() {
        let mut engine = engine_with(StubFaceBackend::never(), timings());
        let t0 = Instant::now();

        let events = engine.evaluate_at(&Frame::filled(32, 32, 10), tuning(5000), t0);
        assert_eq!(motion_events(&events), 0);
    }

    #[test]
    fn large_change_fires_exactly_once_per_cooldown_window() {
        let mut engine = engine_with(StubFaceBackend::never(), timings());
        let t0 = Instant::now();
        let dark = Frame::filled(32, 32, 10);
        let bright = Frame::filled(32, 32, 200);

        engine.evaluate_at(&dark, tuning(5000), t0);

        // Every pixel flips: 32*32*255 well above threshold.
        let events = engine.evaluate_at(&bright, tuning(5000), t0 + Duration::from_secs(1));
        assert_eq!(motion_events(&events), 1);

        // Still above threshold, but inside the cooldown window.
        for secs in 2..10 {
            let events =
                engine.evaluate_at(&bright, tuning(5000), t0 + Duration::from_secs(secs));
            assert_eq!(motion_events(&events), 0, "unexpected event at t+{}s", secs);
        }
    }

    #[test]
    fn background_refresh_tracks_lighting_on_its_own_timescale() {
        let timings = EngineTimings {
            motion_cooldown: Duration::ZERO,
            ..timings()
        };
        let mut engine = engine_with(StubFaceBackend::never(), timings);
        let t0 = Instant::now();
        let dark = Frame::filled(32, 32, 10);
        let bright = Frame::filled(32, 32, 200);

        engine.evaluate_at(&dark, tuning(5000), t0);

        // Before the refresh period the background is still the dark frame.
        let events = engine.evaluate_at(&bright, tuning(5000), t0 + Duration::from_secs(2));
        assert_eq!(motion_events(&events), 1);
        let events = engine.evaluate_at(&bright, tuning(5000), t0 + Duration::from_secs(4));
        assert_eq!(motion_events(&events), 1);

        // At t+6s the refresh period has elapsed: this evaluation still
        // scores against the old background, then adopts the bright frame.
        let events = engine.evaluate_at(&bright, tuning(5000), t0 + Duration::from_secs(6));
        assert_eq!(motion_events(&events), 1);

        // The bright scene is now the background: no more events.
        let events = engine.evaluate_at(&bright, tuning(5000), t0 + Duration::from_secs(7));
        assert_eq!(motion_events(&events), 0);
    }

    #[test]
    fn motion_disabled_skips_evaluation_and_seeding() {
        let mut engine = engine_with(StubFaceBackend::never(), timings());
        let t0 = Instant::now();
        let disabled = TuningSnapshot {
            motion_enabled: false,
            motion_threshold: 5000,
        };

        engine.evaluate_at(&Frame::filled(32, 32, 10), disabled, t0);
        // Re-enabling starts from seeding, not from a stale reference.
        let events = engine.evaluate_at(
            &Frame::filled(32, 32, 200),
            tuning(5000),
            t0 + Duration::from_secs(1),
        );
        assert_eq!(motion_events(&events), 0);
    }

    #[test]
    fn face_cooldown_collapses_rapid_detections() {
        let backend = StubFaceBackend::always();
        let calls = backend.call_counter();
        let mut engine = engine_with(backend, timings());
        let t0 = Instant::now();
        let frame = Frame::filled(32, 32, 128);
        let off = TuningSnapshot {
            motion_enabled: false,
            motion_threshold: 5000,
        };

        let events = engine.evaluate_at(&frame, off, t0);
        assert_eq!(face_events(&events), 1);

        // Within the cooldown the classifier is not even consulted.
        let events = engine.evaluate_at(&frame, off, t0 + Duration::from_secs(10));
        assert_eq!(face_events(&events), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Past the cooldown a second detection fires.
        let events = engine.evaluate_at(&frame, off, t0 + Duration::from_secs(31));
        assert_eq!(face_events(&events), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn classifier_error_is_no_detection_and_keeps_gate_open() {
        let backend = StubFaceBackend::with_script(vec![StubResponse::Error, StubResponse::Face]);
        let mut engine = engine_with(backend, timings());
        let t0 = Instant::now();
        let frame = Frame::filled(32, 32, 128);
        let off = TuningSnapshot {
            motion_enabled: false,
            motion_threshold: 5000,
        };

        let events = engine.evaluate_at(&frame, off, t0);
        assert_eq!(face_events(&events), 0);

        // The failure did not reset the cooldown: the very next frame is
        // classified again and fires.
        let events = engine.evaluate_at(&frame, off, t0 + Duration::from_secs(1));
        assert_eq!(face_events(&events), 1);
    }

    #[test]
    fn replacement_engine_starts_without_cooldown_carryover() {
        let t0 = Instant::now();
        let frame = Frame::filled(32, 32, 128);
        let off = TuningSnapshot {
            motion_enabled: false,
            motion_threshold: 5000,
        };

        let mut engine = engine_with(StubFaceBackend::always(), timings());
        let events = engine.evaluate_at(&frame, off, t0);
        assert_eq!(face_events(&events), 1);
        drop(engine);

        // A restarted pipeline builds a fresh engine; its first frame fires
        // even though the old engine's cooldown window is still open.
        let mut engine = engine_with(StubFaceBackend::always(), timings());
        let events = engine.evaluate_at(&frame, off, t0 + Duration::from_secs(1));
        assert_eq!(face_events(&events), 1);
    }

    #[test]
    fn event_carries_the_triggering_frame() {
        let mut engine = engine_with(StubFaceBackend::never(), timings());
        let t0 = Instant::now();

        engine.evaluate_at(&Frame::filled(32, 32, 10), tuning(5000), t0);
        let events = engine.evaluate_at(
            &Frame::filled(32, 32, 200),
            tuning(5000),
            t0 + Duration::from_secs(1),
        );

        match events.as_slice() {
            [DetectionEvent::Motion { frame }] => {
                assert_eq!(frame.pixels()[0], 200);
            }
            other => panic!("expected one motion event, got {:?}", other),
        }
    }
}
