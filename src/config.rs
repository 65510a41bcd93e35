use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::frame::{DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH};

const DEFAULT_REGISTRY_PATH: &str = "cameras.json";
const DEFAULT_TARGET_FPS: u32 = 20;
const DEFAULT_CLIP_WINDOW_SECS: u64 = 30;
const DEFAULT_CONNECT_BACKOFF_SECS: u64 = 10;
const DEFAULT_RECONNECT_PAUSE_SECS: u64 = 2;
const DEFAULT_STOP_TIMEOUT_SECS: u64 = 5;
const DEFAULT_FACE_BACKEND: &str = "luma";
const DEFAULT_FACE_COOLDOWN_SECS: u64 = 30;
const DEFAULT_MOTION_COOLDOWN_SECS: u64 = 10;
const DEFAULT_MOTION_THRESHOLD: u64 = 5000;
const DEFAULT_BACKGROUND_REFRESH_SECS: u64 = 5;
const DEFAULT_CLIP_DELAY_SECS: u64 = 30;

const KNOWN_FACE_BACKENDS: &[&str] = &["luma", "stub", "tract"];

#[derive(Debug, Deserialize, Default)]
struct VigilConfigFile {
    registry_path: Option<String>,
    capture: Option<CaptureConfigFile>,
    detection: Option<DetectionConfigFile>,
    notify: Option<NotifyConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    clip_window_secs: Option<u64>,
    connect_backoff_secs: Option<u64>,
    reconnect_pause_secs: Option<u64>,
    stop_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    face_backend: Option<String>,
    face_model_path: Option<PathBuf>,
    face_cooldown_secs: Option<u64>,
    motion_cooldown_secs: Option<u64>,
    motion_threshold: Option<u64>,
    background_refresh_secs: Option<u64>,
    clip_delay_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct NotifyConfigFile {
    webhook_url: Option<String>,
    artifact_dir: Option<PathBuf>,
}

/// Daemon configuration, merged from an optional JSON file (named by
/// `VIGIL_CONFIG`) and `VIGIL_*` environment overrides, then validated.
/// A validation failure here is the only fatal error class in the system.
#[derive(Debug, Clone)]
pub struct VigilConfig {
    pub registry_path: PathBuf,
    pub capture: CaptureSettings,
    pub detection: DetectionSettings,
    pub notify: NotifySettings,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    /// How much history the ring buffer keeps, in seconds of footage.
    pub clip_window: Duration,
    /// Pause between failed attempts to open a source.
    pub connect_backoff: Duration,
    /// Pause after a mid-stream drop before reconnecting.
    pub reconnect_pause: Duration,
    /// Bounded join timeout when stopping a pipeline.
    pub stop_timeout: Duration,
}

impl CaptureSettings {
    /// Ring capacity in frames: clip window x target fps.
    pub fn ring_capacity(&self) -> usize {
        (self.clip_window.as_secs() as usize).saturating_mul(self.target_fps as usize)
    }
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    /// Face classifier backend: "luma", "stub", or "tract".
    pub face_backend: String,
    /// ONNX model path, required by the tract backend.
    pub face_model_path: Option<PathBuf>,
    pub face_cooldown: Duration,
    pub motion_cooldown: Duration,
    pub motion_threshold: u64,
    pub background_refresh: Duration,
    /// Delay between a face alert and its follow-up clip, so the ring
    /// accumulates post-event context first.
    pub clip_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct NotifySettings {
    /// Outbound HTTP transport endpoint (feature `notify-http`); log-only
    /// delivery when unset.
    pub webhook_url: Option<String>,
    /// Where temporary alert artifacts are written before delivery.
    pub artifact_dir: PathBuf,
}

impl VigilConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VIGIL_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load with an explicit config file path, bypassing `VIGIL_CONFIG`.
    /// Environment overrides and validation still apply.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: VigilConfigFile) -> Self {
        let registry_path = PathBuf::from(
            file.registry_path
                .unwrap_or_else(|| DEFAULT_REGISTRY_PATH.to_string()),
        );
        let capture = CaptureSettings {
            target_fps: file
                .capture
                .as_ref()
                .and_then(|c| c.target_fps)
                .unwrap_or(DEFAULT_TARGET_FPS),
            width: file
                .capture
                .as_ref()
                .and_then(|c| c.width)
                .unwrap_or(DEFAULT_FRAME_WIDTH),
            height: file
                .capture
                .as_ref()
                .and_then(|c| c.height)
                .unwrap_or(DEFAULT_FRAME_HEIGHT),
            clip_window: Duration::from_secs(
                file.capture
                    .as_ref()
                    .and_then(|c| c.clip_window_secs)
                    .unwrap_or(DEFAULT_CLIP_WINDOW_SECS),
            ),
            connect_backoff: Duration::from_secs(
                file.capture
                    .as_ref()
                    .and_then(|c| c.connect_backoff_secs)
                    .unwrap_or(DEFAULT_CONNECT_BACKOFF_SECS),
            ),
            reconnect_pause: Duration::from_secs(
                file.capture
                    .as_ref()
                    .and_then(|c| c.reconnect_pause_secs)
                    .unwrap_or(DEFAULT_RECONNECT_PAUSE_SECS),
            ),
            stop_timeout: Duration::from_secs(
                file.capture
                    .as_ref()
                    .and_then(|c| c.stop_timeout_secs)
                    .unwrap_or(DEFAULT_STOP_TIMEOUT_SECS),
            ),
        };
        let detection = DetectionSettings {
            face_backend: file
                .detection
                .as_ref()
                .and_then(|d| d.face_backend.clone())
                .unwrap_or_else(|| DEFAULT_FACE_BACKEND.to_string()),
            face_model_path: file.detection.as_ref().and_then(|d| d.face_model_path.clone()),
            face_cooldown: Duration::from_secs(
                file.detection
                    .as_ref()
                    .and_then(|d| d.face_cooldown_secs)
                    .unwrap_or(DEFAULT_FACE_COOLDOWN_SECS),
            ),
            motion_cooldown: Duration::from_secs(
                file.detection
                    .as_ref()
                    .and_then(|d| d.motion_cooldown_secs)
                    .unwrap_or(DEFAULT_MOTION_COOLDOWN_SECS),
            ),
            motion_threshold: file
                .detection
                .as_ref()
                .and_then(|d| d.motion_threshold)
                .unwrap_or(DEFAULT_MOTION_THRESHOLD),
            background_refresh: Duration::from_secs(
                file.detection
                    .as_ref()
                    .and_then(|d| d.background_refresh_secs)
                    .unwrap_or(DEFAULT_BACKGROUND_REFRESH_SECS),
            ),
            clip_delay: Duration::from_secs(
                file.detection
                    .as_ref()
                    .and_then(|d| d.clip_delay_secs)
                    .unwrap_or(DEFAULT_CLIP_DELAY_SECS),
            ),
        };
        let notify = NotifySettings {
            webhook_url: file.notify.as_ref().and_then(|n| n.webhook_url.clone()),
            artifact_dir: file
                .notify
                .and_then(|n| n.artifact_dir)
                .unwrap_or_else(std::env::temp_dir),
        };
        Self {
            registry_path,
            capture,
            detection,
            notify,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("VIGIL_REGISTRY_PATH") {
            if !path.trim().is_empty() {
                self.registry_path = PathBuf::from(path);
            }
        }
        if let Ok(backend) = std::env::var("VIGIL_FACE_BACKEND") {
            if !backend.trim().is_empty() {
                self.detection.face_backend = backend;
            }
        }
        if let Ok(path) = std::env::var("VIGIL_FACE_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detection.face_model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(threshold) = std::env::var("VIGIL_MOTION_THRESHOLD") {
            let threshold: u64 = threshold
                .parse()
                .map_err(|_| anyhow!("VIGIL_MOTION_THRESHOLD must be a positive integer"))?;
            self.detection.motion_threshold = threshold;
        }
        if let Ok(url) = std::env::var("VIGIL_WEBHOOK_URL") {
            if !url.trim().is_empty() {
                self.notify.webhook_url = Some(url);
            }
        }
        if let Ok(dir) = std::env::var("VIGIL_ARTIFACT_DIR") {
            if !dir.trim().is_empty() {
                self.notify.artifact_dir = PathBuf::from(dir);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.capture.target_fps == 0 {
            return Err(anyhow!("capture.target_fps must be greater than zero"));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture frame dimensions must be greater than zero"));
        }
        if self.capture.clip_window.as_secs() == 0 {
            return Err(anyhow!("capture.clip_window_secs must be greater than zero"));
        }
        if self.detection.motion_threshold == 0 {
            return Err(anyhow!("detection.motion_threshold must be greater than zero"));
        }
        if !KNOWN_FACE_BACKENDS.contains(&self.detection.face_backend.as_str()) {
            return Err(anyhow!(
                "unknown face backend '{}' (expected one of {:?})",
                self.detection.face_backend,
                KNOWN_FACE_BACKENDS
            ));
        }
        if self.detection.face_backend == "tract" {
            match &self.detection.face_model_path {
                Some(path) if path.exists() => {}
                Some(path) => {
                    return Err(anyhow!(
                        "face model file not found at {}",
                        path.display()
                    ))
                }
                None => {
                    return Err(anyhow!(
                        "detection.face_model_path is required for the tract backend"
                    ))
                }
            }
        }
        Ok(())
    }
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self::from_file(VigilConfigFile::default())
    }
}

fn read_config_file(path: &Path) -> Result<VigilConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
