//! Deterministic test doubles and image builders
//!
//! Shared by unit, router, and integration tests. The mock extractor keys
//! embeddings off solid image colors, so tests can place probes at exact
//! distances from enrolled identities.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};

use crate::extract::{Detection, ExtractError, Extraction, FaceExtractor};

/// Extractor that recognizes solid-color frames registered via
/// [`MockExtractor::with_face`]; everything else is faceless.
pub struct MockExtractor {
    dim: usize,
    detect_confidence: f32,
    faces: Vec<([u8; 3], Vec<f32>)>,
}

impl MockExtractor {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            detect_confidence: 0.95,
            faces: Vec::new(),
        }
    }

    /// Register a solid color as a face with the given embedding.
    pub fn with_face(mut self, color: [u8; 3], embedding: Vec<f32>) -> Self {
        assert_eq!(
            embedding.len(),
            self.dim,
            "mock embedding must match the configured dimension"
        );
        self.faces.push((color, embedding));
        self
    }

    pub fn with_detect_confidence(mut self, confidence: f32) -> Self {
        self.detect_confidence = confidence;
        self
    }

    fn lookup(&self, frame: &RgbImage) -> Option<&Vec<f32>> {
        let Rgb(color) = *frame.get_pixel(0, 0);
        self.faces
            .iter()
            .find(|(face_color, _)| *face_color == color)
            .map(|(_, embedding)| embedding)
    }
}

impl FaceExtractor for MockExtractor {
    fn embedding_dim(&self) -> usize {
        self.dim
    }

    fn extract(&self, frame: &RgbImage) -> Result<Extraction, ExtractError> {
        Ok(match self.lookup(frame) {
            Some(embedding) => Extraction::Face(embedding.clone()),
            None => Extraction::NoFace,
        })
    }

    fn detect(&self, frame: &RgbImage) -> Result<Detection, ExtractError> {
        Ok(if self.lookup(frame).is_some() {
            Detection {
                found: true,
                confidence: self.detect_confidence,
            }
        } else {
            Detection::none()
        })
    }
}

/// Encode a solid-color PNG.
pub fn solid_png(color: [u8; 3], width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb(color));
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, ImageFormat::Png)
        .expect("encoding a solid PNG cannot fail");
    bytes.into_inner()
}

/// Solid-color PNG as a plain base64 frame payload.
pub fn solid_base64(color: [u8; 3], width: u32, height: u32) -> String {
    BASE64.encode(solid_png(color, width, height))
}

/// Solid-color PNG as a browser-style data URI frame payload.
pub fn solid_data_uri(color: [u8; 3], width: u32, height: u32) -> String {
    format!("data:image/png;base64,{}", solid_base64(color, width, height))
}
