use anyhow::Result;

/// A detected face region, normalized to 0..1 frame coordinates.
#[derive(Clone, Debug)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub confidence: f32,
}

/// Face classifier backend.
///
/// Backends are stateless per frame: the engine owns all cross-frame state
/// (cooldowns, background model) so that stopping a pipeline and starting a
/// fresh one never carries detector state over.
///
/// Implementations must treat the pixel slice as read-only and ephemeral,
/// and must not block on network I/O; a slow classifier stalls its camera's
/// capture loop and nothing else.
pub trait FaceBackend: Send {
    /// Backend identifier ("luma", "stub", "tract").
    fn name(&self) -> &'static str;

    /// Run face detection on one RGB8 frame. An error is a per-frame
    /// failure: the caller logs it and treats the frame as non-detecting.
    fn detect_faces(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<FaceBox>>;

    /// Optional warm-up hook, called once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
