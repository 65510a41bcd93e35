use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::detect::backend::{FaceBackend, FaceBox};

/// What the stub should report for one `detect_faces` call.
#[derive(Clone, Copy, Debug)]
pub enum StubResponse {
    Face,
    NoFace,
    Error,
}

/// Scripted face backend for tests.
///
/// Responses are consumed in order; once the script runs out, every call
/// reports no face. A shared call counter lets tests assert how often the
/// cooldown gate actually invoked the classifier.
pub struct StubFaceBackend {
    script: VecDeque<StubResponse>,
    calls: Arc<AtomicUsize>,
}

impl StubFaceBackend {
    pub fn with_script(script: Vec<StubResponse>) -> Self {
        Self {
            script: script.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Stub that never sees a face.
    pub fn never() -> Self {
        Self::with_script(Vec::new())
    }

    /// Stub that reports a face on every call.
    pub fn always() -> Self {
        // Effectively unbounded for any realistic test.
        Self::with_script(vec![StubResponse::Face; 4096])
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl FaceBackend for StubFaceBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect_faces(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<FaceBox>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.pop_front() {
            Some(StubResponse::Face) => Ok(vec![FaceBox {
                x: 0.25,
                y: 0.25,
                w: 0.5,
                h: 0.5,
                confidence: 0.9,
            }]),
            Some(StubResponse::Error) => Err(anyhow!("scripted classifier failure")),
            Some(StubResponse::NoFace) | None => Ok(Vec::new()),
        }
    }
}
