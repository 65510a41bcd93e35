//! Alert dispatch.
//!
//! Capture loops never talk to the notification transport directly: they
//! enqueue `AlertRequest`s and a single dispatch thread drains the queue,
//! builds the on-disk artifact, performs exactly one delivery attempt, and
//! removes the artifact whatever the outcome. That thread is the one
//! coordination context all transport calls are serialized through.
//!
//! Deferred clips (scheduled after a face alert so the ring accumulates
//! post-event footage) are held here with a deliver-at deadline and read
//! their frames from the ring only when the deadline passes.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use rand::RngCore;

use crate::frame::{Frame, SharedFrameRing};
use crate::notify::Notifier;
use crate::{AlertDestination, CameraIdentity};

/// How long the dispatch thread sleeps when idle before re-checking
/// deferred clip deadlines.
const IDLE_POLL: Duration = Duration::from_millis(200);

/// A unit of work for the dispatch thread.
pub enum AlertRequest {
    Photo {
        camera: CameraIdentity,
        frame: Frame,
        caption: String,
    },
    Clip {
        camera: CameraIdentity,
        frames: Vec<Frame>,
        caption: String,
    },
    /// Send the ring's contents as a clip once `deliver_at` passes.
    DeferredClip {
        camera: CameraIdentity,
        ring: SharedFrameRing,
        deliver_at: Instant,
        caption: String,
    },
}

/// Result of one dispatch attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    /// No destination authorized yet; nothing was attempted.
    NoDestination,
    /// The single delivery attempt failed (already logged).
    Failed,
}

pub struct AlertDispatcher {
    destination: Arc<AlertDestination>,
    notifier: Arc<dyn Notifier>,
    artifact_dir: PathBuf,
}

impl AlertDispatcher {
    pub fn new(
        destination: Arc<AlertDestination>,
        notifier: Arc<dyn Notifier>,
        artifact_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            destination,
            notifier,
            artifact_dir: artifact_dir.as_ref().to_path_buf(),
        }
    }

    /// Encode and deliver a still. The JPEG artifact exists only for the
    /// duration of the attempt.
    pub fn send_photo(
        &self,
        camera: &CameraIdentity,
        frame: &Frame,
        caption: &str,
    ) -> Result<DeliveryOutcome> {
        let artifact = Artifact::create(&self.artifact_dir, "photo", "jpg", &frame.encode_jpeg()?)?;
        Ok(self.deliver(camera, &artifact, caption, Payload::Photo))
    }

    /// Encode and deliver a clip as MJPEG (concatenated JPEG frames).
    pub fn send_clip(
        &self,
        camera: &CameraIdentity,
        frames: &[Frame],
        caption: &str,
    ) -> Result<DeliveryOutcome> {
        if frames.is_empty() {
            return Err(anyhow!("no frames available for clip from {}", camera));
        }
        let mut payload = Vec::new();
        for frame in frames {
            payload.extend_from_slice(&frame.encode_jpeg()?);
        }
        let artifact = Artifact::create(&self.artifact_dir, "clip", "mjpeg", &payload)?;
        Ok(self.deliver(camera, &artifact, caption, Payload::Video))
    }

    /// One delivery attempt, no retry. The artifact is removed when it goes
    /// out of scope in every branch, including the no-destination one.
    fn deliver(
        &self,
        camera: &CameraIdentity,
        artifact: &Artifact,
        caption: &str,
        payload: Payload,
    ) -> DeliveryOutcome {
        let Some(destination) = self.destination.get() else {
            log::warn!(
                "dropping alert from {}: no destination authorized yet",
                camera
            );
            return DeliveryOutcome::NoDestination;
        };

        let bytes = match std::fs::read(artifact.path()) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("failed to read alert artifact for {}: {}", camera, e);
                return DeliveryOutcome::Failed;
            }
        };

        let result = match payload {
            Payload::Photo => self.notifier.send_photo(destination, &bytes, caption),
            Payload::Video => self.notifier.send_video(destination, &bytes, caption),
        };
        match result {
            Ok(()) => {
                log::info!("alert delivered for {}: {}", camera, caption);
                DeliveryOutcome::Sent
            }
            Err(e) => {
                log::warn!("alert delivery failed for {}: {}", camera, e);
                DeliveryOutcome::Failed
            }
        }
    }

    /// Run the dispatch loop on its own thread until every request sender
    /// is dropped.
    pub fn spawn(self, requests: Receiver<AlertRequest>) -> Result<DispatchHandle> {
        let join = std::thread::Builder::new()
            .name("alert-dispatch".to_string())
            .spawn(move || self.run(requests))
            .context("spawn alert dispatch thread")?;
        Ok(DispatchHandle { join: Some(join) })
    }

    fn run(self, requests: Receiver<AlertRequest>) {
        let mut deferred: Vec<PendingClip> = Vec::new();
        loop {
            let timeout = deferred
                .iter()
                .map(|clip| clip.deliver_at.saturating_duration_since(Instant::now()))
                .min()
                .unwrap_or(IDLE_POLL)
                .min(IDLE_POLL);

            match requests.recv_timeout(timeout) {
                Ok(AlertRequest::Photo {
                    camera,
                    frame,
                    caption,
                }) => {
                    if let Err(e) = self.send_photo(&camera, &frame, &caption) {
                        log::warn!("photo alert for {} not built: {}", camera, e);
                    }
                }
                Ok(AlertRequest::Clip {
                    camera,
                    frames,
                    caption,
                }) => {
                    if let Err(e) = self.send_clip(&camera, &frames, &caption) {
                        log::warn!("clip alert for {} not built: {}", camera, e);
                    }
                }
                Ok(AlertRequest::DeferredClip {
                    camera,
                    ring,
                    deliver_at,
                    caption,
                }) => {
                    deferred.push(PendingClip {
                        camera,
                        ring,
                        deliver_at,
                        caption,
                    });
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    if !deferred.is_empty() {
                        log::info!(
                            "dispatch shutting down with {} deferred clip(s) pending",
                            deferred.len()
                        );
                    }
                    break;
                }
            }

            let now = Instant::now();
            let mut still_pending = Vec::new();
            for clip in deferred.drain(..) {
                if clip.deliver_at > now {
                    still_pending.push(clip);
                    continue;
                }
                let frames = match clip.ring.read() {
                    Ok(ring) => ring.all(),
                    Err(_) => {
                        log::error!("frame ring for {} is poisoned; dropping clip", clip.camera);
                        continue;
                    }
                };
                if let Err(e) = self.send_clip(&clip.camera, &frames, &clip.caption) {
                    log::warn!("deferred clip for {} not built: {}", clip.camera, e);
                }
            }
            deferred = still_pending;
        }
        log::debug!("alert dispatch thread stopped");
    }
}

enum Payload {
    Photo,
    Video,
}

struct PendingClip {
    camera: CameraIdentity,
    ring: SharedFrameRing,
    deliver_at: Instant,
    caption: String,
}

pub struct DispatchHandle {
    join: Option<JoinHandle<()>>,
}

impl DispatchHandle {
    /// Wait for the dispatch thread to drain and exit. Call after dropping
    /// every `AlertRequest` sender.
    pub fn join(mut self) -> Result<()> {
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("alert dispatch thread panicked"))?;
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Artifact: scoped temporary file
// ----------------------------------------------------------------------------

/// Temporary on-disk artifact, removed on drop regardless of delivery
/// outcome.
struct Artifact {
    path: PathBuf,
}

impl Artifact {
    fn create(dir: &Path, prefix: &str, extension: &str, bytes: &[u8]) -> Result<Self> {
        let mut suffix = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut suffix);
        let name = format!(
            "vigil_{}_{}.{}",
            prefix,
            suffix.iter().map(|b| format!("{:02x}", b)).collect::<String>(),
            extension
        );
        let path = dir.join(name);
        std::fs::write(&path, bytes)
            .map_err(|e| anyhow!("failed to write artifact {}: {}", path.display(), e))?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("failed to remove artifact {}: {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Mutex;

    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String, usize)>>,
        fail: bool,
    }

    impl RecordingNotifier {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        fn record(&self, kind: &str, caption: &str, len: usize) -> Result<()> {
            if self.fail {
                return Err(anyhow!("transport rejected payload"));
            }
            self.sent
                .lock()
                .unwrap()
                .push((kind.to_string(), caption.to_string(), len));
            Ok(())
        }
    }

    impl Notifier for RecordingNotifier {
        fn send_photo(&self, _destination: &str, image: &[u8], caption: &str) -> Result<()> {
            self.record("photo", caption, image.len())
        }

        fn send_video(&self, _destination: &str, video: &[u8], caption: &str) -> Result<()> {
            self.record("video", caption, video.len())
        }
    }

    fn camera() -> CameraIdentity {
        CameraIdentity::new("1001", "front-door").unwrap()
    }

    fn artifact_count(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn photo_without_destination_is_not_sent_and_leaves_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::new());
        let dispatcher = AlertDispatcher::new(
            Arc::new(AlertDestination::new()),
            notifier.clone(),
            dir.path(),
        );

        let outcome = dispatcher
            .send_photo(&camera(), &Frame::filled(16, 16, 50), "test")
            .unwrap();

        assert_eq!(outcome, DeliveryOutcome::NoDestination);
        assert!(notifier.sent.lock().unwrap().is_empty());
        assert_eq!(artifact_count(dir.path()), 0);
    }

    #[test]
    fn photo_with_destination_is_delivered_once_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let destination = Arc::new(AlertDestination::new());
        destination.authorize("chat-1");
        let notifier = Arc::new(RecordingNotifier::new());
        let dispatcher = AlertDispatcher::new(destination, notifier.clone(), dir.path());

        let outcome = dispatcher
            .send_photo(&camera(), &Frame::filled(16, 16, 50), "motion")
            .unwrap();

        assert_eq!(outcome, DeliveryOutcome::Sent);
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "photo");
        assert_eq!(sent[0].1, "motion");
        assert!(sent[0].2 > 0);
        assert_eq!(artifact_count(dir.path()), 0);
    }

    #[test]
    fn delivery_failure_is_contained_and_artifact_removed() {
        let dir = tempfile::tempdir().unwrap();
        let destination = Arc::new(AlertDestination::new());
        destination.authorize("chat-1");
        let dispatcher = AlertDispatcher::new(
            destination,
            Arc::new(RecordingNotifier::failing()),
            dir.path(),
        );

        let outcome = dispatcher
            .send_photo(&camera(), &Frame::filled(16, 16, 50), "motion")
            .unwrap();

        assert_eq!(outcome, DeliveryOutcome::Failed);
        assert_eq!(artifact_count(dir.path()), 0);
    }

    #[test]
    fn clip_concatenates_frames_into_one_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let destination = Arc::new(AlertDestination::new());
        destination.authorize("chat-1");
        let notifier = Arc::new(RecordingNotifier::new());
        let dispatcher = AlertDispatcher::new(destination, notifier.clone(), dir.path());

        let frames = vec![Frame::filled(16, 16, 10), Frame::filled(16, 16, 200)];
        let outcome = dispatcher.send_clip(&camera(), &frames, "clip").unwrap();

        assert_eq!(outcome, DeliveryOutcome::Sent);
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "video");
        assert_eq!(artifact_count(dir.path()), 0);
    }

    #[test]
    fn empty_clip_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = AlertDispatcher::new(
            Arc::new(AlertDestination::new()),
            Arc::new(RecordingNotifier::new()),
            dir.path(),
        );
        assert!(dispatcher.send_clip(&camera(), &[], "clip").is_err());
    }

    #[test]
    fn dispatch_thread_drains_queue_and_deferred_clips() {
        let dir = tempfile::tempdir().unwrap();
        let destination = Arc::new(AlertDestination::new());
        destination.authorize("chat-1");
        let notifier = Arc::new(RecordingNotifier::new());
        let dispatcher = AlertDispatcher::new(destination, notifier.clone(), dir.path());

        let ring = crate::frame::shared_ring(10);
        ring.write().unwrap().push(Frame::filled(16, 16, 1));
        ring.write().unwrap().push(Frame::filled(16, 16, 2));

        let (tx, rx) = mpsc::channel();
        let handle = dispatcher.spawn(rx).unwrap();

        tx.send(AlertRequest::Photo {
            camera: camera(),
            frame: Frame::filled(16, 16, 50),
            caption: "face".to_string(),
        })
        .unwrap();
        tx.send(AlertRequest::DeferredClip {
            camera: camera(),
            ring: ring.clone(),
            deliver_at: Instant::now() + Duration::from_millis(50),
            caption: "follow-up".to_string(),
        })
        .unwrap();

        // A frame arriving after scheduling must appear in the clip.
        ring.write().unwrap().push(Frame::filled(16, 16, 3));

        std::thread::sleep(Duration::from_millis(300));
        drop(tx);
        handle.join().unwrap();

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "photo");
        assert_eq!(sent[1].0, "video");
        assert_eq!(sent[1].1, "follow-up");
        assert_eq!(artifact_count(dir.path()), 0);
    }
}
