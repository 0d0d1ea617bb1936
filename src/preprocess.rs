// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Image decoding and tensor preparation for the leaf classifier

use image::{imageops::FilterType, ImageReader, RgbImage};
use std::io::Cursor;
use tracing::debug;

use crate::config::TensorLayout;
use crate::{LeafscanError, Result};

/// Raw upload as received from a client
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl UploadedImage {
    pub fn new(bytes: Vec<u8>, content_type: Option<String>) -> Self {
        Self { bytes, content_type }
    }
}

/// RGB tensor with values in [0, 1] and an implicit batch of one.
///
/// Pixels are stored row-major, channel-interleaved (NHWC).
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
    height: usize,
    width: usize,
}

impl ImageTensor {
    pub const CHANNELS: usize = 3;

    /// Build a tensor from interleaved RGB values
    pub fn from_nhwc(data: Vec<f32>, height: usize, width: usize) -> Result<Self> {
        if data.len() != height * width * Self::CHANNELS {
            return Err(LeafscanError::Decode(format!(
                "tensor data has {} values, expected {}x{}x{}",
                data.len(),
                height,
                width,
                Self::CHANNELS
            )));
        }
        Ok(Self { data, height, width })
    }

    fn from_rgb(image: &RgbImage) -> Self {
        let data = image
            .as_raw()
            .iter()
            .map(|&v| f32::from(v) / 255.0)
            .collect();
        Self {
            data,
            height: image.height() as usize,
            width: image.width() as usize,
        }
    }

    /// Logical shape `[1, height, width, 3]`
    pub fn shape(&self) -> [usize; 4] {
        [1, self.height, self.width, Self::CHANNELS]
    }

    /// Concrete shape for the given memory layout
    pub fn shape_for(&self, layout: TensorLayout) -> [usize; 4] {
        match layout {
            TensorLayout::Nhwc => self.shape(),
            TensorLayout::Nchw => [1, Self::CHANNELS, self.height, self.width],
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Copy values out in the requested layout
    pub fn to_layout(&self, layout: TensorLayout) -> Vec<f32> {
        match layout {
            TensorLayout::Nhwc => self.data.clone(),
            TensorLayout::Nchw => {
                let plane = self.height * self.width;
                let mut out = vec![0.0; self.data.len()];
                for (i, pixel) in self.data.chunks_exact(Self::CHANNELS).enumerate() {
                    for (c, &value) in pixel.iter().enumerate() {
                        out[c * plane + i] = value;
                    }
                }
                out
            }
        }
    }
}

/// Decoded upload: the resized image that gets stored, and its tensor
#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub image: RgbImage,
    pub tensor: ImageTensor,
}

/// Decode arbitrary bytes, resize to `size`x`size` and scale to [0, 1]
pub fn prepare(upload: &UploadedImage, size: u32) -> Result<PreparedImage> {
    if upload.bytes.is_empty() {
        return Err(LeafscanError::Decode("upload is empty".to_string()));
    }

    let reader = ImageReader::new(Cursor::new(&upload.bytes))
        .with_guessed_format()
        .map_err(|e| LeafscanError::Decode(e.to_string()))?;
    let format = reader.format();
    let decoded = reader
        .decode()
        .map_err(|e| LeafscanError::Decode(e.to_string()))?;

    debug!(
        "Decoded {:?} upload (declared {:?}) {}x{}",
        format,
        upload.content_type,
        decoded.width(),
        decoded.height()
    );

    // Stretch to the model resolution; the classifier was trained without cropping
    let image = decoded
        .resize_exact(size, size, FilterType::Triangle)
        .to_rgb8();
    let tensor = ImageTensor::from_rgb(&image);

    Ok(PreparedImage { image, tensor })
}
