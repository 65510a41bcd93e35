#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::{FaceBackend, FaceBox};

/// Tract-based neural face detector.
///
/// Loads a local ONNX face-detection model (YuNet-style single-class
/// detector). Rows of the first output tensor are read as
/// `[x, y, w, h, score]` in normalized coordinates. No network I/O and no
/// disk writes beyond the initial model load.
pub struct TractFaceBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_width: u32,
    input_height: u32,
    confidence_threshold: f32,
}

impl TractFaceBackend {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        Self::with_input_shape(model_path, 640, 480)
    }

    pub fn with_input_shape<P: AsRef<Path>>(
        model_path: P,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_width: width,
            input_height: height,
            confidence_threshold: 0.6,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, pixels: &[u8], width: u32, height: u32) -> Result<Tensor> {
        if width != self.input_width || height != self.input_height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                width,
                height,
                self.input_width,
                self.input_height
            ));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected,
                pixels.len()
            ));
        }

        let width = width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, height as usize, width),
            |(_, channel, y, x)| {
                let idx = (y * width + x) * 3 + channel;
                pixels[idx] as f32 / 255.0
            },
        );
        Ok(input.into_tensor())
    }

    fn extract_faces(&self, outputs: TVec<TValue>) -> Result<Vec<FaceBox>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let values = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let flat: Vec<f32> = values.iter().cloned().collect();

        let mut faces = Vec::new();
        for row in flat.chunks_exact(5) {
            let score = row[4];
            if score >= self.confidence_threshold {
                faces.push(FaceBox {
                    x: row[0].clamp(0.0, 1.0),
                    y: row[1].clamp(0.0, 1.0),
                    w: row[2].clamp(0.0, 1.0),
                    h: row[3].clamp(0.0, 1.0),
                    confidence: score,
                });
            }
        }
        Ok(faces)
    }
}

impl FaceBackend for TractFaceBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect_faces(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<FaceBox>> {
        let input = self.build_input(pixels, width, height)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_faces(outputs)
    }
}
