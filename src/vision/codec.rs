//! Encoded image decoding
//!
//! Turns a compressed byte buffer (JPEG, PNG, ...) into a 3-channel 8-bit
//! pixel matrix. Grayscale and alpha inputs are normalized to RGB.

use image::RgbImage;
use tracing::{debug, warn};

use super::error::CodecError;

/// Decode `length` bytes of `data` into an RGB pixel matrix
///
/// `data` is `None` when the host handed over no buffer at all. A declared
/// length larger than the buffer is treated as invalid input rather than
/// read past the end.
pub fn decode(data: Option<&[u8]>, length: usize) -> Result<RgbImage, CodecError> {
    let Some(data) = data else {
        warn!("Image decode rejected: no buffer supplied");
        return Err(CodecError::InvalidInput);
    };
    if length == 0 || length > data.len() {
        warn!(
            "Image decode rejected: declared length {} for a {} byte buffer",
            length,
            data.len()
        );
        return Err(CodecError::InvalidInput);
    }

    let decoded = image::load_from_memory(&data[..length]).map_err(|e| {
        warn!("Failed to decode image data: {}", e);
        CodecError::Decode(e.to_string())
    })?;

    let rgb = decoded.to_rgb8();
    debug!(
        "Decoded image data: {}x{}, channels: 3",
        rgb.width(),
        rgb.height()
    );
    Ok(rgb)
}

/// Decode a whole byte slice
pub fn decode_bytes(data: &[u8]) -> Result<RgbImage, CodecError> {
    decode(Some(data), data.len())
}

#[cfg(test)]
pub(crate) fn encode_jpeg(image: &RgbImage) -> Vec<u8> {
    let mut buf = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, 90);
    image
        .write_with_encoder(encoder)
        .expect("in-memory JPEG encode");
    buf
}

#[cfg(test)]
pub(crate) fn encode_png(image: &RgbImage) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut buf, image::ImageFormat::Png)
        .expect("in-memory PNG encode");
    buf.into_inner()
}
