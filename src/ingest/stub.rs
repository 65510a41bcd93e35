//! Synthetic frame source for `stub://` URLs.
//!
//! Generates a simple evolving scene so the full pipeline (buffering,
//! detection, alerting) can run without camera hardware. Frames are paced
//! to the target FPS with wall-clock sleeps, and a `frames=N` query
//! parameter bounds the stream so tests can exercise end-of-stream and
//! reconnect handling.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::frame::Frame;
use crate::ingest::{FrameSource, SourceOptions};

/// How many frames the scene stays static before shifting.
const SCENE_SHIFT_INTERVAL: u64 = 50;

pub struct StubSource {
    description: String,
    options: SourceOptions,
    frame_count: u64,
    /// Bounded streams stop after this many frames.
    frame_limit: Option<u64>,
    /// Simulated scene state; shifts periodically so motion detection has
    /// something to chew on.
    scene_state: u8,
    last_frame_at: Option<Instant>,
}

impl StubSource {
    pub fn open(url: &str, options: SourceOptions) -> Result<Self> {
        let frame_limit = parse_frame_limit(url)?;
        log::info!("stub source connected: {}", url);
        Ok(Self {
            description: url.to_string(),
            options,
            frame_count: 0,
            frame_limit,
            scene_state: 0,
            last_frame_at: None,
        })
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.options.width * self.options.height * 3) as usize;

        if self.frame_count % SCENE_SHIFT_INTERVAL == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        // Mix position and scene state for variation; intentionally simple.
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.scene_state as u64 * 64) % 256) as u8;
        }
        pixels
    }

    /// Sleep out the remainder of the frame interval so downstream sees a
    /// realistic frame rate instead of a tight loop.
    fn pace(&mut self) {
        if self.options.target_fps == 0 {
            return;
        }
        let interval = Duration::from_secs(1) / self.options.target_fps;
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }
}

impl FrameSource for StubSource {
    fn describe(&self) -> &str {
        &self.description
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(limit) = self.frame_limit {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }
        self.pace();
        let pixels = self.generate_pixels();
        self.frame_count += 1;
        let frame = Frame::from_rgb8(pixels, self.options.width, self.options.height)?;
        Ok(Some(frame))
    }
}

/// Parse an optional `frames=N` query parameter from a stub URL.
fn parse_frame_limit(url: &str) -> Result<Option<u64>> {
    let Some((_, query)) = url.split_once('?') else {
        return Ok(None);
    };
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("frames=") {
            let limit = value
                .parse::<u64>()
                .map_err(|_| anyhow!("invalid frames parameter in '{}'", url))?;
            return Ok(Some(limit));
        }
    }
    Ok(None)
}
