//! Frame ingestion sources.
//!
//! This module provides the sources capture loops pull raw frames from:
//! - RTSP streams from IP cameras (feature: rtsp-gstreamer)
//! - Stub sources (`stub://` URLs) generating synthetic scenes
//!
//! All sources produce RGB `Frame`s that flow into a camera's ring buffer.
//! A source reports end-of-stream by returning `Ok(None)`; transport and
//! decode failures surface as errors. Reconnection is not the source's
//! job: the capture loop drops a failed source and opens a fresh one.

use anyhow::Result;

use crate::frame::{Frame, DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH};

#[cfg(feature = "rtsp-gstreamer")]
pub mod rtsp;
pub mod stub;

#[cfg(feature = "rtsp-gstreamer")]
pub use rtsp::RtspSource;
pub use stub::StubSource;

/// A connected stream of frames from one camera.
///
/// `read_frame` blocks until the next frame is available, the stream ends
/// (`Ok(None)`), or the source fails.
pub trait FrameSource: Send {
    /// Human-readable description for logs.
    fn describe(&self) -> &str;

    fn read_frame(&mut self) -> Result<Option<Frame>>;
}

/// Parameters a source needs to shape its output.
#[derive(Clone, Copy, Debug)]
pub struct SourceOptions {
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            target_fps: 20,
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
        }
    }
}

/// Open a frame source for a camera URL.
///
/// `stub://` URLs get a synthetic source; anything else is treated as an
/// RTSP stream and requires the rtsp-gstreamer feature. Opening is where
/// connection failures surface, so callers apply their backoff around this
/// call.
pub fn open_source(url: &str, options: SourceOptions) -> Result<Box<dyn FrameSource>> {
    if url.starts_with("stub://") {
        return Ok(Box::new(StubSource::open(url, options)?));
    }

    #[cfg(feature = "rtsp-gstreamer")]
    {
        Ok(Box::new(RtspSource::open(url, options)?))
    }
    #[cfg(not(feature = "rtsp-gstreamer"))]
    {
        anyhow::bail!(
            "cannot open '{}': RTSP ingestion requires the rtsp-gstreamer feature",
            url
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_urls_open_without_features() {
        let source = open_source("stub://garden", SourceOptions::default()).unwrap();
        assert!(source.describe().contains("stub://garden"));
    }

    #[cfg(not(feature = "rtsp-gstreamer"))]
    #[test]
    fn rtsp_urls_require_the_gstreamer_feature() {
        let err = open_source("rtsp://10.0.0.4:554/stream", SourceOptions::default())
            .err()
            .expect("rtsp must not open without the feature");
        assert!(err.to_string().contains("rtsp-gstreamer"));
    }
}
