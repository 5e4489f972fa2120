//! Image cleanup ahead of recognition.

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, GrayImage, ImageFormat};

use crate::error::ProcessingError;

/// Downscales to `max_dimension`, converts to grayscale, stretches contrast
/// and sharpens. Returns PNG bytes.
pub fn preprocess_image(bytes: &[u8], max_dimension: u32) -> Result<Vec<u8>, ProcessingError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| ProcessingError::Image(format!("Failed to decode image: {}", e)))?;

    let img = downscale(img, max_dimension);
    let gray = stretch_contrast(img.to_luma8());
    let sharpened = imageops::unsharpen(&gray, 1.0, 4);

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(sharpened)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| ProcessingError::Image(format!("Failed to encode image: {}", e)))?;

    Ok(png)
}

/// Resizes so neither side exceeds `max_dimension`, keeping the aspect ratio.
pub fn downscale(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if max_dimension == 0 || (width <= max_dimension && height <= max_dimension) {
        return img;
    }
    img.resize(max_dimension, max_dimension, FilterType::CatmullRom)
}

/// Linearly maps the darkest pixel to 0 and the brightest to 255.
pub fn stretch_contrast(mut gray: GrayImage) -> GrayImage {
    let (min, max) = gray
        .pixels()
        .fold((u8::MAX, u8::MIN), |(lo, hi), p| (lo.min(p.0[0]), hi.max(p.0[0])));
    if max <= min {
        return gray;
    }

    let range = (max - min) as f32;
    for pixel in gray.pixels_mut() {
        let v = (pixel.0[0] - min) as f32 * 255.0 / range;
        pixel.0[0] = v.round().clamp(0.0, 255.0) as u8;
    }
    gray
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage};

    fn png_bytes(img: DynamicImage) -> Vec<u8> {
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn test_downscale_preserves_aspect_ratio() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(800, 400));
        let small = downscale(img, 200);
        assert_eq!(small.dimensions(), (200, 100));
    }

    #[test]
    fn test_downscale_leaves_small_images() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(120, 80));
        assert_eq!(downscale(img, 4000).dimensions(), (120, 80));
    }

    #[test]
    fn test_stretch_contrast_expands_range() {
        let mut gray = GrayImage::new(2, 1);
        gray.put_pixel(0, 0, Luma([100]));
        gray.put_pixel(1, 0, Luma([150]));
        let out = stretch_contrast(gray);
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
        assert_eq!(out.get_pixel(1, 0).0[0], 255);
    }

    #[test]
    fn test_stretch_contrast_flat_image_unchanged() {
        let gray = GrayImage::from_pixel(3, 3, Luma([42]));
        let out = stretch_contrast(gray);
        assert!(out.pixels().all(|p| p.0[0] == 42));
    }

    #[test]
    fn test_preprocess_outputs_grayscale_png() {
        let img = RgbImage::from_pixel(64, 32, Rgb([200, 10, 10]));
        let out = preprocess_image(&png_bytes(DynamicImage::ImageRgb8(img)), 32).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.dimensions(), (32, 16));
        assert_eq!(decoded.color(), image::ColorType::L8);
    }

    #[test]
    fn test_preprocess_rejects_garbage() {
        assert!(matches!(
            preprocess_image(b"not an image", 4000),
            Err(ProcessingError::Image(_))
        ));
    }
}
