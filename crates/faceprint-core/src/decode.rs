//! Base64 image payloads → RGB pixels.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid base64 image data: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unsupported or corrupt image: {0}")]
    Image(#[from] image::ImageError),
}

/// Decode a base64 image, optionally prefixed with a data-URL header
/// (`data:image/png;base64,`). Whitespace inside the payload is ignored.
pub fn decode_base64_image(payload: &str) -> Result<RgbImage, DecodeError> {
    let body = match payload.split_once(',') {
        Some((_, rest)) => rest,
        None => payload,
    };
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    let bytes = STANDARD.decode(compact)?;
    let image = image::load_from_memory(&bytes)?;
    Ok(image.to_rgb8())
}
