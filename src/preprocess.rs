//! Turns a decoded image into the network input.
//!
//! The exported graphs take a variable-size image, so instead of squashing
//! everything to a fixed square the input is scaled to roughly
//! `DEFAULT_INPUT_AREA` pixels with the original aspect ratio. A smaller area
//! trades accuracy for latency.

use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::Array4;

use crate::error::{VisionError, VisionResult};

/// 512 x 512
pub const DEFAULT_INPUT_AREA: u32 = 262_144;

/// Downsampling factor of the detector backbone; one output cell per stride.
pub const DEFAULT_STRIDE: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TensorLayout {
    /// `[1, H, W, 3]`, TensorFlow exports
    Nhwc,
    /// `[1, 3, H, W]`, ONNX exports
    Nchw,
}

/// Size (w', h') with w'/h' ~= w/h and w' * h' ~= `area`, each side snapped
/// to a multiple of `stride` and never below one stride. When a side is
/// clamped to one stride the other side absorbs the rest of the area.
pub fn target_dimensions(width: u32, height: u32, area: u32, stride: u32) -> (u32, u32) {
    let ratio = (area as f64 / width as f64 / height as f64).sqrt();
    let new_width = (width as f64 * ratio).floor();
    let new_height = (height as f64 * ratio).floor();

    let min_side = stride.max(1) as f64;
    if new_height < min_side {
        (snap(area as f64 / min_side, stride), snap(min_side, stride))
    } else if new_width < min_side {
        (snap(min_side, stride), snap(area as f64 / min_side, stride))
    } else {
        (snap(new_width, stride), snap(new_height, stride))
    }
}

/// Square input used when a graph cannot take a variable size.
pub fn square_dimensions(area: u32, stride: u32) -> (u32, u32) {
    let side = snap((area as f64).sqrt().floor(), stride);
    (side, side)
}

fn snap(side: f64, stride: u32) -> u32 {
    let stride = stride.max(1) as f64;
    ((side / stride).round() * stride).max(stride) as u32
}

fn ensure_not_empty(image: &DynamicImage) -> VisionResult<(u32, u32)> {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(VisionError::Request(format!(
            "image has an empty dimension ({}x{})",
            width, height
        )));
    }
    Ok((width, height))
}

pub fn resize_to_area(image: &DynamicImage, area: u32, stride: u32) -> VisionResult<RgbImage> {
    let (width, height) = ensure_not_empty(image)?;
    resize_to(image, target_dimensions(width, height, area, stride))
}

/// Resizes to exactly `(width, height)`, ignoring the aspect ratio.
pub fn resize_to(
    image: &DynamicImage,
    (new_width, new_height): (u32, u32),
) -> VisionResult<RgbImage> {
    let (width, height) = ensure_not_empty(image)?;

    let rgb = image.to_rgb8();
    if (new_width, new_height) == (width, height) {
        return Ok(rgb);
    }
    Ok(image::imageops::resize(
        &rgb,
        new_width,
        new_height,
        FilterType::Triangle,
    ))
}

/// Batch of one, float pixels in 0-255, BGR channel order.
pub fn to_input_array(image: &RgbImage, layout: TensorLayout) -> Array4<f32> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let mut input = match layout {
        TensorLayout::Nhwc => Array4::<f32>::zeros((1, h, w, 3)),
        TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, h, w)),
    };

    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let value = pixel[2 - c] as f32;
            match layout {
                TensorLayout::Nhwc => input[[0, y, x, c]] = value,
                TensorLayout::Nchw => input[[0, c, y, x]] = value,
            }
        }
    }
    input
}
