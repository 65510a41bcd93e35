mod backend;
mod backends;
mod engine;

pub use backend::{FaceBackend, FaceBox};
pub use backends::{build_face_backend, LumaBackend, StubFaceBackend, StubResponse};
#[cfg(feature = "backend-tract")]
pub use backends::TractFaceBackend;
pub use engine::{DetectionEngine, DetectionEvent, EngineTimings};
