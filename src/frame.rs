//! Frame decoding
//!
//! Streaming clients send each video frame as a base64 text payload,
//! optionally wrapped in a data URI (`data:image/jpeg;base64,...`). The
//! enrollment endpoint uploads raw image bytes instead. Both paths end in the
//! same place: a decoded RGB pixel buffer for the extractor.
//!
//! Streaming callers must treat any [`DecodeError`] as "no face" for that
//! frame rather than tearing down the session.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("empty image payload")]
    Empty,

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid image bytes: {0}")]
    Image(#[from] image::ImageError),
}

/// Decode a streamed frame payload into an RGB pixel buffer.
///
/// Accepts plain base64 or a data URI; everything up to and including the
/// first comma is treated as the URI header and stripped.
pub fn decode_frame(payload: &str) -> Result<RgbImage, DecodeError> {
    let trimmed = payload.trim();
    let encoded = match trimmed.find(',') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    };
    if encoded.is_empty() {
        return Err(DecodeError::Empty);
    }

    let bytes = BASE64.decode(encoded)?;
    decode_image_bytes(&bytes)
}

/// Decode raw encoded image bytes (any codec the `image` crate supports)
/// into an RGB pixel buffer.
pub fn decode_image_bytes(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let img = image::load_from_memory(bytes)?;
    Ok(img.to_rgb8())
}
