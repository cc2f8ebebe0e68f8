//! Image payload decoding: data URI or bare base64 into an RGB image.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("image payload is empty")]
    Empty,
    #[error("image payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image payload could not be decoded: {0}")]
    Image(#[from] image::ImageError),
}

/// Strip an optional `data:<mime>;base64,` prefix and base64-decode the rest.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, PayloadError> {
    let encoded = match payload.split_once(',') {
        Some((_, rest)) => rest,
        None => payload,
    };
    let encoded = encoded.trim();
    if encoded.is_empty() {
        return Err(PayloadError::Empty);
    }

    // Tolerate line-wrapped base64.
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(STANDARD.decode(compact)?)
}

/// Decode an image payload into 8-bit RGB pixels.
pub fn decode_image(payload: &str) -> Result<RgbImage, PayloadError> {
    let bytes = decode_base64(payload)?;
    let img = image::load_from_memory(&bytes)?;
    tracing::debug!(
        bytes = bytes.len(),
        width = img.width(),
        height = img.height(),
        "image payload decoded"
    );
    Ok(img.to_rgb8())
}
