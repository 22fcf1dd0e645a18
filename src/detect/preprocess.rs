//! Image decoding and letterboxing.
//!
//! Frames are scaled so the longer side fits the backend input, then pasted at the
//! top-left of a square canvas filled with [`LETTERBOX_FILL`]. Padding only ever
//! grows right and bottom, so mapping a box back to the source frame is a plain
//! division by the scale factor.

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::geometry::FrameSize;

pub const LETTERBOX_FILL: u8 = 114;

/// NCHW `[1, 3, S, S]` f32 tensor with values in `[0, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct InputTensor {
    size: u32,
    data: Vec<f32>,
}

impl InputTensor {
    pub fn zeros(size: u32) -> Self {
        let side = size as usize;
        Self {
            size,
            data: vec![0.0; 3 * side * side],
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Value at channel `c`, row `y`, column `x`.
    pub fn at(&self, c: usize, y: usize, x: usize) -> f32 {
        let side = self.size as usize;
        self.data[c * side * side + y * side + x]
    }
}

/// A letterboxed frame plus what the decoder needs to undo the transform.
#[derive(Clone, Debug)]
pub struct Letterbox {
    pub tensor: InputTensor,
    pub frame: FrameSize,
    pub scale: f32,
}

/// Decode encoded image bytes (JPEG/PNG) into an RGB frame.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    if bytes.is_empty() {
        return Err(anyhow!("image payload is empty"));
    }
    let image = image::load_from_memory(bytes).context("decode image")?;
    Ok(image.to_rgb8())
}

/// `min(S / H, S / W)`: the factor that fits the longer side into the input.
pub fn letterbox_scale(frame: FrameSize, input_size: u32) -> f32 {
    let s = input_size as f32;
    (s / frame.height as f32).min(s / frame.width as f32)
}

pub fn letterbox(image: &RgbImage, input_size: u32) -> Result<Letterbox> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(anyhow!("image has zero extent ({}x{})", width, height));
    }
    if input_size == 0 {
        return Err(anyhow!("backend input size must be positive"));
    }

    let frame = FrameSize::new(width, height);
    let scale = letterbox_scale(frame, input_size);
    let new_w = ((width as f32 * scale) as u32).clamp(1, input_size);
    let new_h = ((height as f32 * scale) as u32).clamp(1, input_size);

    let mut canvas = RgbImage::from_pixel(input_size, input_size, Rgb([LETTERBOX_FILL; 3]));
    if (new_w, new_h) == (width, height) {
        imageops::replace(&mut canvas, image, 0, 0);
    } else {
        let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
        imageops::replace(&mut canvas, &resized, 0, 0);
    }

    let side = input_size as usize;
    let plane = side * side;
    let mut data = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in canvas.enumerate_pixels() {
        let offset = y as usize * side + x as usize;
        for channel in 0..3 {
            data[channel * plane + offset] = pixel[channel] as f32 / 255.0;
        }
    }

    Ok(Letterbox {
        tensor: InputTensor {
            size: input_size,
            data,
        },
        frame,
        scale,
    })
}
