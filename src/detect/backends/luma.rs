use anyhow::{anyhow, Result};

use crate::detect::backend::{FaceBackend, FaceBox};

/// Grid cells per axis when scanning for skin-toned regions.
const GRID: u32 = 16;
/// Minimum skin-pixel fraction for a cell to count as face-like.
const CELL_SKIN_FRACTION: f32 = 0.6;
/// Minimum fraction of the whole frame covered by face-like cells.
const MIN_FRAME_FRACTION: f32 = 0.02;

/// CPU face-presence heuristic.
///
/// Uses the classical RGB skin-tone rule (r > 95, g > 40, b > 20, r dominant,
/// channel spread > 15) over a coarse cell grid and reports the bounding box
/// of the skin-dense region. Cheap enough to run on every gated frame without
/// a model file; precision is traded for zero setup, which is what the
/// default deployment wants. Swap in the tract backend for a real model.
#[derive(Default)]
pub struct LumaBackend;

impl LumaBackend {
    pub fn new() -> Self {
        Self
    }
}

fn is_skin(r: u8, g: u8, b: u8) -> bool {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    r > 95 && g > 40 && b > 20 && r > g && r > b && max - min > 15 && r.abs_diff(g) > 15
}

impl FaceBackend for LumaBackend {
    fn name(&self) -> &'static str {
        "luma"
    }

    fn detect_faces(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<FaceBox>> {
        let expected = (width as usize) * (height as usize) * 3;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        if width < GRID || height < GRID {
            return Ok(Vec::new());
        }

        let cell_w = width / GRID;
        let cell_h = height / GRID;

        // Bounding box of face-like cells, in cell coordinates.
        let mut min_cx = GRID;
        let mut min_cy = GRID;
        let mut max_cx = 0u32;
        let mut max_cy = 0u32;
        let mut hot_cells = 0u32;
        let mut total_fraction = 0.0f32;

        for cy in 0..GRID {
            for cx in 0..GRID {
                let mut skin = 0u32;
                let mut count = 0u32;
                for y in (cy * cell_h)..((cy + 1) * cell_h) {
                    let row = (y * width) as usize * 3;
                    for x in (cx * cell_w)..((cx + 1) * cell_w) {
                        let i = row + (x as usize) * 3;
                        if is_skin(pixels[i], pixels[i + 1], pixels[i + 2]) {
                            skin += 1;
                        }
                        count += 1;
                    }
                }
                let fraction = skin as f32 / count.max(1) as f32;
                if fraction >= CELL_SKIN_FRACTION {
                    hot_cells += 1;
                    total_fraction += fraction;
                    min_cx = min_cx.min(cx);
                    min_cy = min_cy.min(cy);
                    max_cx = max_cx.max(cx);
                    max_cy = max_cy.max(cy);
                }
            }
        }

        let frame_fraction = hot_cells as f32 / (GRID * GRID) as f32;
        if frame_fraction < MIN_FRAME_FRACTION {
            return Ok(Vec::new());
        }

        let confidence = (total_fraction / hot_cells as f32).min(1.0);
        Ok(vec![FaceBox {
            x: min_cx as f32 / GRID as f32,
            y: min_cy as f32 / GRID as f32,
            w: (max_cx - min_cx + 1) as f32 / GRID as f32,
            h: (max_cy - min_cy + 1) as f32 / GRID as f32,
            confidence,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    fn skin_frame(width: u32, height: u32) -> Frame {
        let mut frame = Frame::filled(width, height, 0);
        for px in frame.pixels_mut().chunks_exact_mut(3) {
            px[0] = 200;
            px[1] = 140;
            px[2] = 110;
        }
        frame
    }

    #[test]
    fn skin_toned_frame_reports_a_face() {
        let frame = skin_frame(64, 64);
        let mut backend = LumaBackend::new();
        let faces = backend
            .detect_faces(frame.pixels(), frame.width(), frame.height())
            .unwrap();
        assert_eq!(faces.len(), 1);
        assert!(faces[0].confidence > 0.5);
    }

    #[test]
    fn gray_frame_reports_nothing() {
        let frame = Frame::filled(64, 64, 128);
        let mut backend = LumaBackend::new();
        let faces = backend
            .detect_faces(frame.pixels(), frame.width(), frame.height())
            .unwrap();
        assert!(faces.is_empty());
    }

    #[test]
    fn bad_length_is_an_error() {
        let mut backend = LumaBackend::new();
        assert!(backend.detect_faces(&[0u8; 10], 64, 64).is_err());
    }
}
