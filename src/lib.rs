//! vigil-core
//!
//! Core library for the `vigild` camera monitoring daemon.
//!
//! # Architecture
//!
//! One long-lived capture thread per camera, supervised by a single
//! lifecycle manager:
//!
//! - `frame`: decoded frames and the bounded per-camera ring buffer
//! - `ingest`: frame sources (RTSP, synthetic stub)
//! - `detect`: motion/face detection engine with per-camera cooldown state
//! - `alert`: rate-limited photo/clip alert dispatch on a single thread
//! - `capture`: the reconnecting capture loop (connect, read, detect, alert)
//! - `supervisor`: starts, stops and tracks one pipeline per camera
//! - `registry`: persisted owner -> camera -> URL mapping
//! - `notify`: the outbound notification transport seam
//!
//! Camera-level failures (unreachable stream, decode error, classifier
//! error, delivery error) are always recovered locally by the owning
//! pipeline; only misconfiguration at startup is fatal.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

pub mod alert;
pub mod capture;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod notify;
pub mod registry;
pub mod supervisor;

pub use alert::{AlertDispatcher, AlertRequest, DeliveryOutcome};
pub use capture::CaptureOptions;
pub use config::VigilConfig;
pub use detect::{build_face_backend, DetectionEngine, DetectionEvent, FaceBackend};
pub use frame::{shared_ring, Frame, FrameRing, SharedFrameRing};
pub use ingest::{open_source, FrameSource};
pub use notify::{LogNotifier, Notifier};
pub use registry::CameraRegistry;
pub use supervisor::{PipelineStatus, PipelineSupervisor, StopOutcome};

// -------------------- Camera identity --------------------

/// Composite key identifying one monitored source: who owns it and what they
/// named it. Stable for the lifetime of a pipeline; the supervisor keys its
/// registry on this.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CameraIdentity {
    pub owner: String,
    pub name: String,
}

impl CameraIdentity {
    /// Camera names feed file names and chat commands, so they must be
    /// non-empty and space-free.
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let owner = owner.into();
        let name = name.into();
        if owner.trim().is_empty() {
            return Err(anyhow!("camera owner must not be empty"));
        }
        if name.trim().is_empty() {
            return Err(anyhow!("camera name must not be empty"));
        }
        if name.contains(char::is_whitespace) {
            return Err(anyhow!("camera name must not contain whitespace"));
        }
        Ok(Self { owner, name })
    }
}

impl std::fmt::Display for CameraIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A registered camera: identity plus its connection URL. Mutated only via
/// the supervisor's add/remove operations and persisted by the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraSource {
    pub identity: CameraIdentity,
    pub url: String,
}

// -------------------- Alert destination --------------------

/// Outcome of a destination authorization attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthorizeOutcome {
    /// This caller is now the alert recipient.
    Granted,
    /// This caller was already the alert recipient.
    AlreadyAuthorized,
    /// Another recipient holds the authorization.
    Denied,
}

/// The single alert recipient, set at most once for the process lifetime.
///
/// First authorization wins; every later caller with a different id is
/// denied. All dispatchers share one instance read-only, so there is no
/// write contention after the first set.
#[derive(Debug, Default)]
pub struct AlertDestination {
    inner: OnceLock<String>,
}

impl AlertDestination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn authorize(&self, id: &str) -> AuthorizeOutcome {
        if self.inner.set(id.to_string()).is_ok() {
            return AuthorizeOutcome::Granted;
        }
        match self.inner.get() {
            Some(current) if current == id => AuthorizeOutcome::AlreadyAuthorized,
            _ => AuthorizeOutcome::Denied,
        }
    }

    pub fn get(&self) -> Option<&str> {
        self.inner.get().map(String::as_str)
    }

    pub fn is_authorized(&self) -> bool {
        self.inner.get().is_some()
    }
}

// -------------------- Runtime detection tuning --------------------

/// Runtime-adjustable detection settings, written only by the control
/// surface. Capture loops never read the atomics directly: they take a
/// `TuningSnapshot` once per detection cycle, so a cycle sees one coherent
/// set of values.
#[derive(Debug)]
pub struct DetectionTuning {
    motion_enabled: AtomicBool,
    motion_threshold: AtomicU64,
}

impl DetectionTuning {
    pub fn new(motion_threshold: u64) -> Self {
        Self {
            motion_enabled: AtomicBool::new(true),
            motion_threshold: AtomicU64::new(motion_threshold),
        }
    }

    pub fn set_motion_enabled(&self, enabled: bool) {
        self.motion_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn set_motion_threshold(&self, threshold: u64) {
        self.motion_threshold.store(threshold, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TuningSnapshot {
        TuningSnapshot {
            motion_enabled: self.motion_enabled.load(Ordering::Relaxed),
            motion_threshold: self.motion_threshold.load(Ordering::Relaxed),
        }
    }
}

/// One detection cycle's view of the tuning values.
#[derive(Clone, Copy, Debug)]
pub struct TuningSnapshot {
    pub motion_enabled: bool,
    pub motion_threshold: u64,
}
