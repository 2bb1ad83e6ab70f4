//! ONNX extractor backend using ORT (ONNX Runtime)
//!
//! Two sessions: a face detector (localization + confidence) and a face
//! embedder. Model access is serialized through a mutex per session; when
//! many streaming connections share one extractor this is the throughput
//! boundary, paid deliberately because ORT sessions are not safe for
//! concurrent `run` calls.

use std::path::Path;
use std::sync::{Arc, Mutex};

use image::RgbImage;
use ort::inputs;
use ort::session::{builder::SessionBuilder, Session};
use ort::value::Value;

use crate::extract::{Detection, ExtractError, Extraction, FaceExtractor};
use crate::metric::l2_normalized;

/// Square input side of the detector model.
pub const DETECTOR_INPUT: u32 = 128;

/// Square input side of the embedder model.
pub const EMBEDDER_INPUT: u32 = 224;

/// Detector score below which a frame counts as faceless.
const SCORE_THRESHOLD: f32 = 0.75;

/// Face extractor backed by ONNX detector + embedder models.
pub struct OnnxExtractor {
    detector: Arc<Mutex<Session>>,
    embedder: Arc<Mutex<Session>>,
    dim: usize,
}

impl OnnxExtractor {
    /// Create an extractor from pre-staged local model files.
    ///
    /// This constructor is intentionally offline-only: it expects
    /// `detector.onnx` and `embedder.onnx` in `model_dir` and never
    /// downloads anything.
    pub fn from_dir(model_dir: &Path, dim: usize) -> Result<Self, ExtractError> {
        let detector_path = model_dir.join("detector.onnx");
        let embedder_path = model_dir.join("embedder.onnx");
        for path in [&detector_path, &embedder_path] {
            if !path.exists() {
                return Err(ExtractError::Unavailable(format!(
                    "missing model file {:?}",
                    path
                )));
            }
        }

        // Initialize the ORT environment (global); ignore if already done.
        let _ = ort::init().with_name("visage").commit();

        // intra_threads=1 avoids oversubscription under the async runtime
        let detector = SessionBuilder::new()
            .map_err(ort_err)?
            .with_intra_threads(1)
            .map_err(ort_err)?
            .commit_from_file(&detector_path)
            .map_err(ort_err)?;

        let embedder = SessionBuilder::new()
            .map_err(ort_err)?
            .with_intra_threads(1)
            .map_err(ort_err)?
            .commit_from_file(&embedder_path)
            .map_err(ort_err)?;

        Ok(Self {
            detector: Arc::new(Mutex::new(detector)),
            embedder: Arc::new(Mutex::new(embedder)),
            dim,
        })
    }

    fn run_session(
        session: &Arc<Mutex<Session>>,
        shape: Vec<usize>,
        data: Vec<f32>,
    ) -> Result<Vec<f32>, ExtractError> {
        let input_value = Value::from_array((shape, data)).map_err(ort_err)?;

        // If the model crashes on an unexpected shape we want an error for
        // this frame, not a dead worker thread.
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut session = session
                .lock()
                .map_err(|_| ExtractError::Backend("model session lock poisoned".to_string()))?;
            let outputs = session.run(inputs![input_value]).map_err(ort_err)?;
            let tensor = outputs[0].try_extract_tensor::<f32>().map_err(ort_err)?;
            Ok::<Vec<f32>, ExtractError>(tensor.1.to_vec())
        }))
        .map_err(|_| ExtractError::Backend("model inference panicked".to_string()))?
    }
}

impl FaceExtractor for OnnxExtractor {
    fn embedding_dim(&self) -> usize {
        self.dim
    }

    fn extract(&self, frame: &RgbImage) -> Result<Extraction, ExtractError> {
        // Localize first; an embedding of a faceless frame is meaningless.
        let detection = self.detect(frame)?;
        if !detection.found {
            return Ok(Extraction::NoFace);
        }

        let (shape, data) = to_nchw(frame, EMBEDDER_INPUT);
        let embedding = Self::run_session(&self.embedder, shape, data)?;
        if embedding.len() != self.dim {
            return Err(ExtractError::Backend(format!(
                "model produced a {}-dim embedding, expected {}",
                embedding.len(),
                self.dim
            )));
        }

        Ok(Extraction::Face(l2_normalized(&embedding)))
    }

    fn detect(&self, frame: &RgbImage) -> Result<Detection, ExtractError> {
        let (shape, data) = to_nchw(frame, DETECTOR_INPUT);
        let scores = Self::run_session(&self.detector, shape, data)?;

        // Best anchor wins; raw scores come out as logits.
        let confidence = scores
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
        let confidence = if confidence.is_finite() {
            sigmoid(confidence)
        } else {
            0.0
        };

        Ok(Detection {
            found: confidence >= SCORE_THRESHOLD,
            confidence,
        })
    }
}

fn ort_err(e: ort::Error) -> ExtractError {
    ExtractError::Backend(e.to_string())
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

// Resize and repack interleaved RGB into a planar [1, 3, side, side] tensor
// scaled to [0, 1].
fn to_nchw(frame: &RgbImage, side: u32) -> (Vec<usize>, Vec<f32>) {
    let resized = image::imageops::resize(
        frame,
        side,
        side,
        image::imageops::FilterType::Triangle,
    );

    let plane = (side * side) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in resized.enumerate_pixels() {
        let idx = (y * side + x) as usize;
        data[idx] = f32::from(pixel[0]) / 255.0;
        data[plane + idx] = f32::from(pixel[1]) / 255.0;
        data[2 * plane + idx] = f32::from(pixel[2]) / 255.0;
    }

    (vec![1, 3, side as usize, side as usize], data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_models_report_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let result = OnnxExtractor::from_dir(dir.path(), 4096);
        assert!(matches!(result, Err(ExtractError::Unavailable(_))));
    }

    #[test]
    fn test_to_nchw_layout() {
        let mut frame = RgbImage::new(2, 2);
        frame.put_pixel(0, 0, image::Rgb([255, 0, 0]));

        let (shape, data) = to_nchw(&frame, 2);
        assert_eq!(shape, vec![1, 3, 2, 2]);
        assert_eq!(data.len(), 12);
        // Red plane first, pixel (0,0) fully saturated.
        assert!((data[0] - 1.0).abs() < 1e-6);
        assert!(data[4].abs() < 1e-6);
    }

    #[test]
    fn test_sigmoid_bounds() {
        assert!(sigmoid(-20.0) < 1e-6);
        assert!((sigmoid(20.0) - 1.0).abs() < 1e-6);
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
    }
}
