//! Border padding ahead of OCR
//!
//! Text touching the frame edge is often missed by the detector, so the image
//! is placed on a slightly larger canvas first. The [`PaddingTransform`]
//! records what was added so detections can be mapped back.

use image::{imageops, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, warn};

/// Default fraction of each dimension added on every side
pub const DEFAULT_PAD_RATIO: f64 = 0.10;

/// Largest padded canvas side
pub const MAX_CANVAS_SIDE: u32 = 32_768;
/// Largest padded canvas area in pixels
pub const MAX_CANVAS_PIXELS: u64 = 1 << 28;

/// Padding errors
#[derive(Debug, Error)]
pub enum PadError {
    #[error("image not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to create temp dir: {0}")]
    TempDir(#[source] std::io::Error),
    #[error("failed to write padded image {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("padding a {width}x{height} image by {ratio} exceeds the canvas limit")]
    CanvasTooLarge { width: u32, height: u32, ratio: f64 },
}

/// What padding did to an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaddingTransform {
    pub pad_x: u32,
    pub pad_y: u32,
    pub original_width: u32,
    pub original_height: u32,
}

impl PaddingTransform {
    /// Transform for an image that was not padded
    pub fn identity(width: u32, height: u32) -> Self {
        Self {
            pad_x: 0,
            pad_y: 0,
            original_width: width,
            original_height: height,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.pad_x == 0 && self.pad_y == 0
    }

    /// Canvas size after padding, `None` if it does not fit in `u32`
    pub fn padded_dimensions(&self) -> Option<(u32, u32)> {
        let grow = |extent: u32, pad: u32| pad.checked_mul(2)?.checked_add(extent);
        Some((
            grow(self.original_width, self.pad_x)?,
            grow(self.original_height, self.pad_y)?,
        ))
    }

    /// Canvas size if it is within [`MAX_CANVAS_SIDE`] and [`MAX_CANVAS_PIXELS`]
    fn checked_canvas(&self) -> Option<(u32, u32)> {
        let (width, height) = self.padded_dimensions()?;
        let fits = width <= MAX_CANVAS_SIDE
            && height <= MAX_CANVAS_SIDE
            && u64::from(width) * u64::from(height) <= MAX_CANVAS_PIXELS;
        fits.then_some((width, height))
    }
}

/// Pixels added on each side of a dimension. Rounds half to even.
///
/// Saturates at `u32::MAX` when `extent * ratio` is out of range.
pub fn pad_amount(extent: u32, ratio: f64) -> u32 {
    if !(ratio > 0.0) {
        return 0;
    }
    let pad = (f64::from(extent) * ratio).round_ties_even();
    if !(pad < f64::from(u32::MAX)) {
        return u32::MAX;
    }
    (pad as u32).max(1)
}

/// Center `image` on a canvas filled with `color`.
///
/// A ratio of zero or less returns the image untouched. Fails with
/// [`PadError::CanvasTooLarge`] instead of allocating an oversized canvas.
pub fn pad(
    image: &RgbImage,
    ratio: f64,
    color: Rgb<u8>,
) -> Result<(Cow<'_, RgbImage>, PaddingTransform), PadError> {
    let (width, height) = image.dimensions();
    if !(ratio > 0.0) {
        return Ok((Cow::Borrowed(image), PaddingTransform::identity(width, height)));
    }

    let transform = PaddingTransform {
        pad_x: pad_amount(width, ratio),
        pad_y: pad_amount(height, ratio),
        original_width: width,
        original_height: height,
    };
    let (canvas_w, canvas_h) = transform.checked_canvas().ok_or(PadError::CanvasTooLarge {
        width,
        height,
        ratio,
    })?;
    let mut canvas = RgbImage::from_pixel(canvas_w, canvas_h, color);
    imageops::replace(
        &mut canvas,
        image,
        i64::from(transform.pad_x),
        i64::from(transform.pad_y),
    );

    Ok((Cow::Owned(canvas), transform))
}

/// Image file ready for the OCR engine.
///
/// When padding was applied the padded copy lives in a private temp
/// directory that is removed when this value is dropped.
#[derive(Debug)]
pub struct PaddedInput {
    dir: Option<TempDir>,
    path: PathBuf,
    transform: PaddingTransform,
}

impl PaddedInput {
    /// File to hand to the engine
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn transform(&self) -> PaddingTransform {
        self.transform
    }

    /// Whether a temporary padded copy backs this input
    pub fn is_temporary(&self) -> bool {
        self.dir.is_some()
    }
}

impl Drop for PaddedInput {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let dir_path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => debug!("Removed padded image dir {:?}", dir_path),
                Err(e) => warn!("Failed to remove padded image dir {:?}: {}", dir_path, e),
            }
        }
    }
}

/// Pads image files from disk
#[derive(Debug, Clone, Copy)]
pub struct GeometryPadder {
    ratio: f64,
    color: Rgb<u8>,
}

impl Default for GeometryPadder {
    fn default() -> Self {
        Self::new(DEFAULT_PAD_RATIO)
    }
}

impl GeometryPadder {
    pub fn new(ratio: f64) -> Self {
        Self {
            ratio,
            color: Rgb([0, 0, 0]),
        }
    }

    /// Canvas fill color
    pub fn with_color(mut self, color: Rgb<u8>) -> Self {
        self.color = color;
        self
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    /// Decode `path`, pad it and write `<stem>.padded.png` into a fresh temp dir.
    ///
    /// With a non-positive ratio the original file is used as is and only its
    /// dimensions are read.
    pub fn prepare(&self, path: &Path) -> Result<PaddedInput, PadError> {
        if !path.is_file() {
            return Err(PadError::NotFound(path.to_path_buf()));
        }

        if !(self.ratio > 0.0) {
            let (width, height) = image::image_dimensions(path).map_err(|source| PadError::Decode {
                path: path.to_path_buf(),
                source,
            })?;
            return Ok(PaddedInput {
                dir: None,
                path: path.to_path_buf(),
                transform: PaddingTransform::identity(width, height),
            });
        }

        let image = image::open(path)
            .map_err(|source| PadError::Decode {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgb8();

        let (padded, transform) = pad(&image, self.ratio, self.color)?;

        let dir = tempfile::Builder::new()
            .prefix("meme-finder-")
            .tempdir()
            .map_err(PadError::TempDir)?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        let out_path = dir.path().join(format!("{stem}.padded.png"));

        padded.save(&out_path).map_err(|source| PadError::Write {
            path: out_path.clone(),
            source,
        })?;

        debug!(
            "Padded {:?} by ({}, {}) -> {:?}",
            path, transform.pad_x, transform.pad_y, out_path
        );

        Ok(PaddedInput {
            dir: Some(dir),
            path: out_path,
            transform,
        })
    }
}
