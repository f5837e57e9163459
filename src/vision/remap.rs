//! Map detections from padded-canvas space back to the original image

use super::padding::PaddingTransform;
use super::{Detection, Point};

/// Undo padding: shift every point by `(-pad_x, -pad_y)` and clamp it into
/// `[0, W-1] x [0, H-1]`. Boxes partly outside the original frame are
/// clamped, not dropped.
pub fn remap(items: Vec<Detection>, transform: &PaddingTransform) -> Vec<Detection> {
    let max_x = (f64::from(transform.original_width) - 1.0).max(0.0);
    let max_y = (f64::from(transform.original_height) - 1.0).max(0.0);
    let dx = f64::from(transform.pad_x);
    let dy = f64::from(transform.pad_y);

    items
        .into_iter()
        .map(|mut item| {
            for point in item.bbox.iter_mut() {
                *point = Point::new(
                    (point.x - dx).clamp(0.0, max_x),
                    (point.y - dy).clamp(0.0, max_y),
                );
            }
            item
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::padding::pad;
    use image::{Rgb, RgbImage};

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> [Point; 4] {
        [
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ]
    }

    fn transform(pad: u32, width: u32, height: u32) -> PaddingTransform {
        PaddingTransform {
            pad_x: pad,
            pad_y: pad,
            original_width: width,
            original_height: height,
        }
    }

    #[test]
    fn test_remap_shifts_by_padding() {
        let items = vec![Detection::new(square(10.0, 10.0, 20.0, 20.0), "hi", 0.9)];
        let out = remap(items, &transform(10, 100, 100));
        assert_eq!(out[0].bbox, square(0.0, 0.0, 10.0, 10.0));
        assert_eq!(out[0].text, "hi");
    }

    #[test]
    fn test_remap_clamps_out_of_bounds() {
        let items = vec![Detection::new(square(2.0, 3.0, 130.0, 119.0), "edge", 0.5)];
        let out = remap(items, &transform(10, 100, 100));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bbox, square(0.0, 0.0, 99.0, 99.0));
    }

    #[test]
    fn test_remap_identity_transform_only_clamps() {
        let items = vec![Detection::new(square(-1.0, 5.0, 12.0, 8.0), "x", 0.1)];
        let out = remap(items, &PaddingTransform::identity(10, 10));
        assert_eq!(out[0].bbox, square(0.0, 5.0, 9.0, 8.0));
    }

    #[test]
    fn test_remap_inverts_padding_inside_frame() {
        let cases = [
            (64, 32, 0.10),
            (100, 100, 0.25),
            (7, 300, 0.05),
            (1920, 1080, 0.5),
            (35, 25, 1.0),
        ];

        for (width, height, ratio) in cases {
            let image = RgbImage::new(width, height);
            let (_, t) = pad(&image, ratio, Rgb([0, 0, 0])).unwrap();
            assert!(!t.is_identity());

            let (w, h) = (f64::from(width), f64::from(height));
            let original = square(0.0, 0.0, w - 1.0, h - 1.0);
            let inner = square(w * 0.25, h * 0.5, w * 0.75, h - 1.0);

            for bbox in [original, inner] {
                let shifted =
                    bbox.map(|p| Point::new(p.x + f64::from(t.pad_x), p.y + f64::from(t.pad_y)));
                let out = remap(vec![Detection::new(shifted, "round trip", 1.0)], &t);
                assert_eq!(out[0].bbox, bbox, "{width}x{height} at ratio {ratio}");
            }
        }
    }

    #[test]
    fn test_remap_degenerate_image_size() {
        let items = vec![Detection::new(square(5.0, 5.0, 9.0, 9.0), "tiny", 0.3)];
        let out = remap(items, &transform(1, 0, 0));
        assert!(out[0].bbox.iter().all(|p| p.x == 0.0 && p.y == 0.0));
    }
}
