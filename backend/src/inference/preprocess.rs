//! Image to tensor conversion matching the transform the classifiers were
//! trained with.

use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::Array4;

/// Side length of the square model input.
pub const INPUT_SIZE: u32 = 224;

/// Model input shape, batch first.
pub const INPUT_SHAPE: [usize; 4] = [1, 3, INPUT_SIZE as usize, INPUT_SIZE as usize];

/// ImageNet channel means. Coupled to the frozen weights.
pub const MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet channel standard deviations. Coupled to the frozen weights.
pub const STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Image data is empty")]
    Empty,
    #[error("Invalid base64 encoding: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Failed to decode image: {0}")]
    Image(#[from] image::ImageError),
}

/// Decodes `bytes` and produces a `(1, 3, 224, 224)` normalized tensor.
///
/// Steps: decode to RGB, bilinear resize to 224x224, scale to `[0, 1]`,
/// normalize per channel, lay out channel first with a batch axis.
pub fn preprocess(bytes: &[u8]) -> Result<Array4<f32>, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    // 8-bit RGB before resizing, so alpha and 16-bit samples never reach the filter.
    let rgb = image::load_from_memory(bytes)?.to_rgb8();
    let resized = imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
    Ok(normalize(&resized))
}

fn normalize(rgb: &RgbImage) -> Array4<f32> {
    let mut tensor = Array4::zeros(INPUT_SHAPE);
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            let scaled = pixel[c] as f32 / 255.0;
            tensor[[0, c, y as usize, x as usize]] = (scaled - MEAN[c]) / STD[c];
        }
    }
    tensor
}

#[cfg(test)]
pub(crate) fn encode_png(image: &image::RgbImage) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}
