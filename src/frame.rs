//! Decoded frames and the per-camera ring buffer.
//!
//! Every capture loop owns exactly one `FrameRing` and is its only writer.
//! Snapshot and record requests from the control surface read the same ring
//! through `SharedFrameRing`, so the ring is guarded by an `RwLock`: readers
//! always observe a complete, consistent set of frames and never make the
//! writer wait for more than the lock handoff.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageBuffer, RgbImage};

/// Default frame width after ingest-time resize.
pub const DEFAULT_FRAME_WIDTH: u32 = 640;
/// Default frame height after ingest-time resize.
pub const DEFAULT_FRAME_HEIGHT: u32 = 480;

/// A decoded RGB8 frame.
///
/// Sources hand frames over at arbitrary dimensions; the capture loop resizes
/// them to the configured pipeline dimensions before anything else sees them,
/// so every frame in a ring has the same shape.
///
/// Pixel storage is `Arc`-shared: cloning a frame is a reference-count bump,
/// never a pixel copy. Ring reads (snapshot, clips) therefore hold the ring
/// lock only for pointer clones, and the capture loop's writes are never
/// blocked behind a bulk copy.
#[derive(Clone)]
pub struct Frame {
    data: Arc<Vec<u8>>,
    width: u32,
    height: u32,
}

impl Frame {
    /// Build a frame from raw RGB8 bytes. Length must be `width * height * 3`.
    pub fn from_rgb8(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data: Arc::new(data),
            width,
            height,
        })
    }

    /// Uniform-color frame, used by stub sources and tests.
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            data: Arc::new(vec![value; (width * height * 3) as usize]),
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGB8 bytes, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Mutable pixel access, for synthetic frame construction in tests.
    /// Copy-on-write: storage shared with other frames is detached first.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    /// Resize to the target dimensions. Returns `self` unchanged when the
    /// frame already matches.
    pub fn resized(self, width: u32, height: u32) -> Result<Self> {
        if self.width == width && self.height == height {
            return Ok(self);
        }
        let image = self.into_rgb_image()?;
        let resized = image::imageops::resize(&image, width, height, FilterType::Triangle);
        Ok(Self {
            data: Arc::new(resized.into_raw()),
            width,
            height,
        })
    }

    /// Encode as JPEG for photo alerts and clip artifacts.
    pub fn encode_jpeg(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, 80);
        encoder.encode(
            self.pixels(),
            self.width,
            self.height,
            ExtendedColorType::Rgb8,
        )?;
        Ok(out)
    }

    pub(crate) fn into_rgb_image(self) -> Result<RgbImage> {
        let (width, height) = (self.width, self.height);
        let data = Arc::try_unwrap(self.data).unwrap_or_else(|shared| (*shared).clone());
        ImageBuffer::from_raw(width, height, data)
            .ok_or_else(|| anyhow!("frame bytes do not match {}x{}", width, height))
    }

    pub(crate) fn to_rgb_image(&self) -> Result<RgbImage> {
        self.clone().into_rgb_image()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// FrameRing: bounded, insertion-ordered frame store
// ----------------------------------------------------------------------------

/// Bounded ring buffer of recent frames for one camera.
///
/// Capacity is `clip_window_secs * target_fps` (600 at the defaults). The
/// oldest frame is evicted first on overflow; insertion order is preserved so
/// `recent(n)` can extract a chronological clip.
pub struct FrameRing {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl FrameRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a frame, evicting the oldest when at capacity. O(1) amortized.
    pub fn push(&mut self, frame: Frame) {
        while self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// The most recently pushed frame, if any.
    pub fn snapshot(&self) -> Option<Frame> {
        self.frames.back().cloned()
    }

    /// Up to the last `n` frames in chronological order. `n` is clamped to
    /// the current length; an under-filled ring returns everything it has.
    /// The returned frames share pixel storage with the ring: this clones
    /// pointers, not pixels.
    pub fn recent(&self, n: usize) -> Vec<Frame> {
        let take = n.min(self.frames.len());
        let skip = self.frames.len() - take;
        self.frames.iter().skip(skip).cloned().collect()
    }

    /// Every buffered frame in chronological order.
    pub fn all(&self) -> Vec<Frame> {
        self.recent(self.frames.len())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// One writer (the owning capture loop), many readers (snapshot/record/alert).
pub type SharedFrameRing = Arc<RwLock<FrameRing>>;

/// Allocate a ring shared between a capture loop and its readers.
pub fn shared_ring(capacity: usize) -> SharedFrameRing {
    Arc::new(RwLock::new(FrameRing::new(capacity)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(value: u8) -> Frame {
        Frame::filled(4, 4, value)
    }

    #[test]
    fn ring_keeps_last_capacity_frames_in_order() {
        let mut ring = FrameRing::new(5);
        for i in 0..12u8 {
            ring.push(frame(i));
        }

        assert_eq!(ring.len(), 5);
        let values: Vec<u8> = ring.all().iter().map(|f| f.pixels()[0]).collect();
        assert_eq!(values, vec![7, 8, 9, 10, 11]);
    }

    #[test]
    fn snapshot_returns_latest_or_none() {
        let mut ring = FrameRing::new(3);
        assert!(ring.snapshot().is_none());

        ring.push(frame(1));
        ring.push(frame(2));
        assert_eq!(ring.snapshot().unwrap().pixels()[0], 2);
    }

    #[test]
    fn recent_clamps_to_available_frames() {
        let mut ring = FrameRing::new(10);
        ring.push(frame(1));
        ring.push(frame(2));

        let frames = ring.recent(50);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].pixels()[0], 1);
        assert_eq!(frames[1].pixels()[0], 2);
    }

    #[test]
    fn recent_returns_chronological_suffix() {
        let mut ring = FrameRing::new(8);
        for i in 0..8u8 {
            ring.push(frame(i));
        }

        let values: Vec<u8> = ring.recent(3).iter().map(|f| f.pixels()[0]).collect();
        assert_eq!(values, vec![5, 6, 7]);
    }

    /// Frame whose first two pixel bytes encode an index larger than a u8.
    fn indexed_frame(i: usize) -> Frame {
        let mut frame = Frame::filled(4, 4, 0);
        let pixels = frame.pixels_mut();
        pixels[0] = (i >> 8) as u8;
        pixels[1] = (i & 0xff) as u8;
        frame
    }

    fn frame_index(frame: &Frame) -> usize {
        ((frame.pixels()[0] as usize) << 8) | frame.pixels()[1] as usize
    }

    #[test]
    fn under_filled_ring_returns_everything_pushed() {
        let mut ring = FrameRing::new(600);
        for i in 1..=25 {
            ring.push(indexed_frame(i));
        }

        assert_eq!(ring.len(), 25);
        let indices: Vec<usize> = ring.all().iter().map(frame_index).collect();
        assert_eq!(indices, (1..=25).collect::<Vec<_>>());
    }

    #[test]
    fn ring_at_production_capacity_keeps_the_newest_frames_in_order() {
        let mut ring = FrameRing::new(600);
        for i in 1..=650 {
            ring.push(indexed_frame(i));
        }

        assert_eq!(ring.len(), 600);
        let indices: Vec<usize> = ring.all().iter().map(frame_index).collect();
        assert_eq!(indices, (51..=650).collect::<Vec<_>>());
    }

    #[test]
    fn cloning_a_frame_shares_pixel_storage() {
        let frame = Frame::filled(8, 8, 42);
        let copy = frame.clone();
        assert!(Arc::ptr_eq(&frame.data, &copy.data));
    }

    #[test]
    fn ring_reads_copy_pointers_not_pixels() {
        let mut ring = FrameRing::new(4);
        ring.push(frame(1));
        ring.push(frame(2));

        let copies = ring.all();
        for (copy, buffered) in copies.iter().zip(ring.frames.iter()) {
            assert!(Arc::ptr_eq(&copy.data, &buffered.data));
        }
        assert!(Arc::ptr_eq(
            &ring.snapshot().unwrap().data,
            &ring.frames.back().unwrap().data
        ));
    }

    #[test]
    fn mutating_a_shared_frame_detaches_its_storage() {
        let frame = Frame::filled(8, 8, 42);
        let mut copy = frame.clone();
        copy.pixels_mut()[0] = 7;

        assert_eq!(frame.pixels()[0], 42);
        assert_eq!(copy.pixels()[0], 7);
        assert!(!Arc::ptr_eq(&frame.data, &copy.data));
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let mut ring = FrameRing::new(0);
        ring.push(frame(1));
        ring.push(frame(2));
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.snapshot().unwrap().pixels()[0], 2);
    }

    #[test]
    fn resize_changes_dimensions() {
        let frame = Frame::filled(8, 8, 100).resized(4, 2).unwrap();
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.pixels().len(), 4 * 2 * 3);
    }

    #[test]
    fn from_rgb8_rejects_bad_length() {
        assert!(Frame::from_rgb8(vec![0u8; 10], 4, 4).is_err());
    }

    #[test]
    fn jpeg_encoding_produces_nonempty_payload() {
        let bytes = Frame::filled(16, 16, 42).encode_jpeg().unwrap();
        assert!(!bytes.is_empty());
        // JPEG SOI marker
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
