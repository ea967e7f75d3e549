//! Image preprocessing for OCR models
//!
//! Handles channel reordering, resizing, and conversion of interleaved 8-bit
//! pixels into planar `f32` tensors scaled to [0, 1].

use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::config::ChannelOrder;

/// Reorder channels of a codec (RGB) image into the order a model expects
///
/// Swapping is its own inverse, so the same call restores the codec order.
pub fn to_channel_order(image: &RgbImage, order: ChannelOrder) -> RgbImage {
    match order {
        ChannelOrder::Rgb => image.clone(),
        ChannelOrder::Bgr => {
            let mut swapped = image.clone();
            for pixel in swapped.pixels_mut() {
                pixel.0.swap(0, 2);
            }
            swapped
        }
    }
}

/// Target size for the detection model
///
/// The longer side is scaled to `max_side_len`, then each side is floored to
/// a multiple of `stride`. Returns `None` when either side ends up zero.
pub fn detection_size(width: u32, height: u32, max_side_len: u32, stride: u32) -> Option<(u32, u32)> {
    if width == 0 || height == 0 || stride == 0 {
        return None;
    }

    // Integer floor of dim * max_side_len / longer, so the longer side lands
    // exactly on max_side_len
    let longer = u64::from(width.max(height));
    let align = |dim: u32| {
        let scaled = u64::from(dim) * u64::from(max_side_len) / longer;
        (scaled as u32) / stride * stride
    };

    let (new_w, new_h) = (align(width), align(height));
    if new_w == 0 || new_h == 0 {
        None
    } else {
        Some((new_w, new_h))
    }
}

/// Width of a region resized to `target_height`, keeping its aspect ratio
pub fn recognition_width(width: u32, height: u32, target_height: u32) -> u32 {
    if height == 0 {
        return 0;
    }
    (width as f64 * target_height as f64 / height as f64).round() as u32
}

/// Bilinear resize to an exact size
pub fn resize(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width, height, FilterType::Triangle)
}

/// Write `image` into `out` in planar channel order, dividing by 255
///
/// `out` must hold exactly `3 * width * height` values; element
/// `c * h * w + y * w + x` receives channel `c` of pixel `(x, y)`.
pub fn write_planar(image: &RgbImage, out: &mut [f32]) {
    let (width, height) = image.dimensions();
    let plane = (width * height) as usize;
    debug_assert_eq!(out.len(), plane * 3);

    for (idx, pixel) in image.pixels().enumerate() {
        for c in 0..3 {
            out[c * plane + idx] = pixel.0[c] as f32 / 255.0;
        }
    }
}
