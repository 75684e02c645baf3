//! # Image Preprocessing Module
//!
//! This module prepares receipt images for text recognition. It bounds the
//! image to a maximum dimension, converts to grayscale, stretches contrast,
//! sharpens, and applies gamma correction before re-encoding at high quality.
//!
//! Preprocessing is strictly best-effort: any decode, transform, or encode
//! failure falls back to the original bytes so the recognition pipeline is
//! never blocked by a transform problem.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage};
use tracing::{debug, warn};

use crate::config::PreprocessConfig;

/// Errors that can occur during image preprocessing operations.
///
/// These never escape [`ReceiptPreprocessor::preprocess`]; they exist for
/// logging and for the fallible inner transform.
#[derive(Debug, Clone)]
pub enum PreprocessingError {
    /// Failed to decode the input bytes as an image
    Decode { message: String },
    /// An image transform failed
    Transform { message: String },
    /// Failed to re-encode the processed image
    Encode { message: String },
}

impl std::fmt::Display for PreprocessingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreprocessingError::Decode { message } => {
                write!(f, "Failed to decode image: {}", message)
            }
            PreprocessingError::Transform { message } => {
                write!(f, "Image transform failed: {}", message)
            }
            PreprocessingError::Encode { message } => {
                write!(f, "Failed to encode image: {}", message)
            }
        }
    }
}

impl std::error::Error for PreprocessingError {}

/// Preprocessor that optimizes receipt images for text recognition
#[derive(Debug, Clone)]
pub struct ReceiptPreprocessor {
    config: PreprocessConfig,
}

impl ReceiptPreprocessor {
    /// Create a new preprocessor with the given configuration
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    /// Transform raw image bytes into a form more amenable to recognition
    ///
    /// Returns the processed bytes, or the original bytes unchanged when any
    /// step of the transform fails.
    pub fn preprocess(&self, image: &[u8]) -> Vec<u8> {
        match self.transform(image) {
            Ok(processed) => {
                debug!(
                    input_bytes = image.len(),
                    output_bytes = processed.len(),
                    "image preprocessed for recognition"
                );
                processed
            }
            Err(e) => {
                warn!(
                    error = %e,
                    input_bytes = image.len(),
                    "image preprocessing failed, falling back to original bytes"
                );
                image.to_vec()
            }
        }
    }

    fn transform(&self, image: &[u8]) -> Result<Vec<u8>, PreprocessingError> {
        let img = image::load_from_memory(image).map_err(|e| PreprocessingError::Decode {
            message: e.to_string(),
        })?;

        let img = self.bound_dimensions(img);
        let gray = img.to_luma8();
        let gray = self.stretch_contrast(gray);

        // Unsharp mask operates on the dynamic wrapper
        let sharpened = DynamicImage::ImageLuma8(gray)
            .unsharpen(self.config.sharpen_sigma, self.config.sharpen_threshold);
        let mut gray = sharpened.into_luma8();

        self.apply_gamma(&mut gray);

        let mut buf = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut buf);
        let encoder = JpegEncoder::new_with_quality(
            &mut cursor,
            self.config.jpeg_quality,
        );
        DynamicImage::ImageLuma8(gray)
            .write_with_encoder(encoder)
            .map_err(|e| PreprocessingError::Encode {
                message: e.to_string(),
            })?;

        Ok(buf)
    }

    /// Downscale to the configured maximum dimension, preserving aspect
    /// ratio. Images already within bounds are returned untouched; upscaling
    /// blurs strokes and hurts recognition.
    fn bound_dimensions(&self, img: DynamicImage) -> DynamicImage {
        let (width, height) = img.dimensions();
        let max = self.config.max_dimension;
        if width.max(height) <= max {
            return img;
        }
        img.resize(max, max, FilterType::CatmullRom)
    }

    /// Linear contrast stretch with percentile clipping
    ///
    /// The darkest and brightest `contrast_clip_fraction` of pixels are
    /// treated as noise when computing the stretch bounds, which keeps a few
    /// specks or glare spots from flattening the whole histogram.
    fn stretch_contrast(&self, gray: GrayImage) -> GrayImage {
        let mut histogram = [0u32; 256];
        for pixel in gray.pixels() {
            histogram[pixel[0] as usize] += 1;
        }

        let total: u64 = histogram.iter().map(|&c| c as u64).sum();
        if total == 0 {
            return gray;
        }
        let clip = (total as f64 * self.config.contrast_clip_fraction as f64) as u64;

        let mut lower = 0u8;
        let mut accumulated = 0u64;
        for (value, &count) in histogram.iter().enumerate() {
            accumulated += count as u64;
            if accumulated > clip {
                lower = value as u8;
                break;
            }
        }

        let mut upper = 255u8;
        accumulated = 0;
        for (value, &count) in histogram.iter().enumerate().rev() {
            accumulated += count as u64;
            if accumulated > clip {
                upper = value as u8;
                break;
            }
        }

        // stretch_contrast panics on an empty input range
        if lower >= upper {
            return gray;
        }

        imageproc::contrast::stretch_contrast(&gray, lower, upper, 0u8, 255u8)
    }

    /// Apply gamma correction through a lookup table
    fn apply_gamma(&self, gray: &mut GrayImage) {
        let gamma = self.config.gamma;
        if (gamma - 1.0).abs() < f32::EPSILON {
            return;
        }
        let inverse = 1.0 / gamma;
        let mut lut = [0u8; 256];
        for (value, entry) in lut.iter_mut().enumerate() {
            let normalized = value as f32 / 255.0;
            *entry = (normalized.powf(inverse) * 255.0).round().clamp(0.0, 255.0) as u8;
        }
        for pixel in gray.pixels_mut() {
            pixel[0] = lut[pixel[0] as usize];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    fn test_image_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut img = RgbImage::new(width, height);
        // A light background with a dark band, so contrast stretching has
        // something to work with.
        for (x, _y, pixel) in img.enumerate_pixels_mut() {
            let value = if x % 10 < 3 { 40 } else { 220 };
            *pixel = Rgb([value, value, value]);
        }
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_preprocess_produces_decodable_output() {
        let preprocessor = ReceiptPreprocessor::new(PreprocessConfig::default());
        let input = test_image_bytes(200, 300);

        let output = preprocessor.preprocess(&input);
        assert!(!output.is_empty());

        let decoded = image::load_from_memory(&output).unwrap();
        assert_eq!(decoded.dimensions(), (200, 300));
    }

    #[test]
    fn test_preprocess_downscales_large_images() {
        let mut config = PreprocessConfig::default();
        config.max_dimension = 256;
        let preprocessor = ReceiptPreprocessor::new(config);
        let input = test_image_bytes(512, 1024);

        let output = preprocessor.preprocess(&input);
        let decoded = image::load_from_memory(&output).unwrap();
        let (width, height) = decoded.dimensions();
        assert!(width <= 256 && height <= 256);
        // Aspect ratio preserved: 512x1024 bounds to 128x256
        assert_eq!((width, height), (128, 256));
    }

    #[test]
    fn test_preprocess_never_upscales() {
        let preprocessor = ReceiptPreprocessor::new(PreprocessConfig::default());
        let input = test_image_bytes(64, 48);

        let output = preprocessor.preprocess(&input);
        let decoded = image::load_from_memory(&output).unwrap();
        assert_eq!(decoded.dimensions(), (64, 48));
    }

    #[test]
    fn test_preprocess_falls_back_on_garbage_input() {
        let preprocessor = ReceiptPreprocessor::new(PreprocessConfig::default());
        let garbage = b"definitely not an image".to_vec();

        let output = preprocessor.preprocess(&garbage);
        assert_eq!(output, garbage);
    }

    #[test]
    fn test_preprocess_output_is_grayscale_jpeg() {
        let preprocessor = ReceiptPreprocessor::new(PreprocessConfig::default());
        let input = test_image_bytes(100, 100);

        let output = preprocessor.preprocess(&input);
        assert_eq!(
            image::guess_format(&output).unwrap(),
            ImageFormat::Jpeg
        );
    }
}
