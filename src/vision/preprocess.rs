//! Image preprocessing for OCR models
//!
//! Handles image resizing, normalization, and tensor conversion for PaddleOCR models.

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array3, Array4};

use super::engine::LimitType;

/// Preprocessing configuration
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Mean values for detection normalization [R, G, B]
    pub det_mean: [f32; 3],
    /// Std values for detection normalization [R, G, B]
    pub det_std: [f32; 3],
    /// Recognition input height
    pub rec_height: u32,
    /// Minimum recognition batch width
    pub rec_min_width: u32,
    /// Classifier input (height, width)
    pub cls_size: (u32, u32),
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            det_mean: [0.485, 0.456, 0.406],
            det_std: [0.229, 0.224, 0.225],
            rec_height: 48,
            rec_min_width: 320,
            cls_size: (48, 192),
        }
    }
}

/// Convert an RGB image to an HWC f32 array in 0-1
pub fn rgb_to_f32(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut rgb = Array3::<f32>::zeros((height as usize, width as usize, 3));

    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            rgb[[y as usize, x as usize, c]] = pixel[c] as f32 / 255.0;
        }
    }

    rgb
}

/// Normalize image with mean and std
pub fn normalize(image: &Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let (h, w, _) = image.dim();
    let mut normalized = Array3::<f32>::zeros((h, w, 3));

    for y in 0..h {
        for x in 0..w {
            for c in 0..3 {
                normalized[[y, x, c]] = (image[[y, x, c]] - mean[c]) / std[c];
            }
        }
    }

    normalized
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    let mut tensor = Array4::<f32>::zeros((1, c, h, w));

    for y in 0..h {
        for x in 0..w {
            for ch in 0..c {
                tensor[[0, ch, y, x]] = image[[y, x, ch]];
            }
        }
    }

    tensor
}

/// Detector input size: scale by the side limit, then snap each side to a
/// multiple of 32 (at least 32)
pub fn detection_size(width: u32, height: u32, limit_side_len: u32, limit_type: LimitType) -> (u32, u32) {
    let (w, h) = (width.max(1) as f32, height.max(1) as f32);
    let limit = limit_side_len.max(1) as f32;

    let ratio = match limit_type {
        LimitType::Max if w.max(h) > limit => limit / w.max(h),
        LimitType::Min if w.min(h) < limit => limit / w.min(h),
        _ => 1.0,
    };

    let snap = |v: f32| (((v * ratio) / 32.0).round() as u32 * 32).max(32);
    (snap(w), snap(h))
}

/// Full preprocessing pipeline for detection, as a 1x3xHxW tensor
pub fn preprocess_for_detection(
    image: &RgbImage,
    limit_side_len: u32,
    limit_type: LimitType,
    config: &PreprocessConfig,
) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let (resized_width, resized_height) = detection_size(width, height, limit_side_len, limit_type);

    let resized = imageops::resize(image, resized_width, resized_height, FilterType::Triangle);
    let normalized = normalize(&rgb_to_f32(&resized), &config.det_mean, &config.det_std);

    hwc_to_nchw(&normalized)
}

/// Width/height ratio of a crop
pub fn aspect_ratio(image: &RgbImage) -> f32 {
    let (w, h) = image.dimensions();
    w as f32 / h.max(1) as f32
}

/// Batch tensor for the recognizer: fixed height, batch width set by the
/// widest crop, right side zero padded
pub fn preprocess_for_recognition(crops: &[&RgbImage], config: &PreprocessConfig) -> Array4<f32> {
    let height = config.rec_height;
    let width = crops
        .iter()
        .map(|crop| (height as f32 * aspect_ratio(crop)).ceil() as u32)
        .max()
        .unwrap_or(0)
        .max(config.rec_min_width);

    resize_into_batch(crops, height, width)
}

/// Batch tensor for the orientation classifier
pub fn preprocess_for_classification(crops: &[&RgbImage], config: &PreprocessConfig) -> Array4<f32> {
    let (height, width) = config.cls_size;
    resize_into_batch(crops, height, width)
}

/// Resize each crop to `height`, keep its aspect ratio up to `width`, and
/// normalize into [-1, 1]
fn resize_into_batch(crops: &[&RgbImage], height: u32, width: u32) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((crops.len(), 3, height as usize, width as usize));

    for (i, crop) in crops.iter().enumerate() {
        let scaled_width = ((height as f32 * aspect_ratio(crop)).ceil() as u32).clamp(1, width);
        let resized = imageops::resize(*crop, scaled_width, height, FilterType::Triangle);

        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[i, c, y as usize, x as usize]] = (pixel[c] as f32 / 255.0 - 0.5) / 0.5;
            }
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_rgb_to_f32() {
        let mut image = RgbImage::new(2, 2);
        image.put_pixel(0, 0, Rgb([255, 0, 0]));
        image.put_pixel(1, 0, Rgb([0, 255, 0]));

        let rgb = rgb_to_f32(&image);

        assert!((rgb[[0, 0, 0]] - 1.0).abs() < 0.01);
        assert!(rgb[[0, 0, 1]].abs() < 0.01);
        assert!(rgb[[0, 1, 0]].abs() < 0.01);
        assert!((rgb[[0, 1, 1]] - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_hwc_to_nchw() {
        let hwc = Array3::<f32>::from_shape_fn((10, 20, 3), |(h, w, c)| {
            (h * 100 + w * 10 + c) as f32
        });

        let nchw = hwc_to_nchw(&hwc);

        assert_eq!(nchw.dim(), (1, 3, 10, 20));
        assert_eq!(nchw[[0, 1, 5, 10]], hwc[[5, 10, 1]]);
    }

    #[test]
    fn test_normalize() {
        let image = Array3::<f32>::from_elem((2, 2, 3), 0.5);
        let mean = [0.485, 0.456, 0.406];
        let std = [0.229, 0.224, 0.225];

        let normalized = normalize(&image, &mean, &std);

        assert!((normalized[[0, 0, 0]] - (0.5 - 0.485) / 0.229).abs() < 0.01);
    }

    #[test]
    fn test_detection_size_limits() {
        assert_eq!(detection_size(3000, 1500, 1536, LimitType::Max), (1536, 768));
        assert_eq!(detection_size(100, 50, 1536, LimitType::Max), (96, 64));
        assert_eq!(detection_size(10, 10, 1536, LimitType::Max), (32, 32));
        assert_eq!(detection_size(368, 200, 736, LimitType::Min), (1344, 736));
    }

    #[test]
    fn test_detection_tensor_shape() {
        let image = RgbImage::new(100, 50);
        let tensor =
            preprocess_for_detection(&image, 1536, LimitType::Max, &PreprocessConfig::default());
        assert_eq!(tensor.dim(), (1, 3, 64, 96));
    }

    #[test]
    fn test_recognition_batch_width_follows_widest_crop() {
        let narrow = RgbImage::new(48, 48);
        let wide = RgbImage::new(960, 48);
        let config = PreprocessConfig::default();

        let tensor = preprocess_for_recognition(&[&narrow, &wide], &config);
        assert_eq!(tensor.dim(), (2, 3, 48, 960));
        // Narrow crop is padded with zeros on the right
        assert_eq!(tensor[[0, 0, 10, 500]], 0.0);
        assert!((tensor[[0, 0, 10, 10]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_recognition_batch_minimum_width() {
        let crop = RgbImage::new(10, 48);
        let tensor = preprocess_for_recognition(&[&crop], &PreprocessConfig::default());
        assert_eq!(tensor.dim(), (1, 3, 48, 320));
    }

    #[test]
    fn test_classification_batch_shape() {
        let crop = RgbImage::new(400, 40);
        let tensor = preprocess_for_classification(&[&crop], &PreprocessConfig::default());
        assert_eq!(tensor.dim(), (1, 3, 48, 192));
    }
}
