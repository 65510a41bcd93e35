mod luma;
mod stub;
#[cfg(feature = "backend-tract")]
mod tract;

use anyhow::{anyhow, Result};

pub use luma::LumaBackend;
pub use stub::{StubFaceBackend, StubResponse};
#[cfg(feature = "backend-tract")]
pub use tract::TractFaceBackend;

use crate::config::DetectionSettings;

use super::backend::FaceBackend;

/// Build the configured face backend. Backend choice and cooldown are
/// independent configuration parameters; nothing here assumes one implies
/// the other.
pub fn build_face_backend(settings: &DetectionSettings) -> Result<Box<dyn FaceBackend>> {
    match settings.face_backend.as_str() {
        "luma" => Ok(Box::new(LumaBackend::new())),
        "stub" => Ok(Box::new(StubFaceBackend::never())),
        #[cfg(feature = "backend-tract")]
        "tract" => {
            let model_path = settings
                .face_model_path
                .as_ref()
                .ok_or_else(|| anyhow!("tract backend requires detection.face_model_path"))?;
            Ok(Box::new(TractFaceBackend::new(model_path)?))
        }
        #[cfg(not(feature = "backend-tract"))]
        "tract" => Err(anyhow!(
            "face backend 'tract' requires the backend-tract feature"
        )),
        other => Err(anyhow!("unknown face backend '{}'", other)),
    }
}
