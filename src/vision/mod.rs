//! Vision/OCR Layer
//!
//! Turns an image on disk into a list of text detections. The pipeline pads
//! the image, runs whichever OCR backend the device selector produced,
//! normalizes the backend's raw output and maps geometry back onto the
//! original image.

pub mod device;
pub mod engine;
pub mod models;
pub mod normalize;
pub mod ocr;
pub mod padding;
pub mod pipeline;
pub mod preprocess;
pub mod remap;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use device::{
    DeviceConfig, DeviceError, DeviceSelector, DeviceState, EngineFactory, FailureCause,
    SelectedEngine, SelectorState,
};
pub use engine::{BackendError, EngineInput, LimitType, OcrAdapter, OcrBackend, PredictOptions};
pub use models::{ModelManager, ModelPaths, ModelType};
pub use normalize::{normalize, RawShape};
pub use ocr::{OrtEngineFactory, RapidOcrConfig, RapidOcrEngine};
pub use padding::{GeometryPadder, PadError, PaddedInput, PaddingTransform};
pub use pipeline::OcrPipeline;
pub use remap::remap;

/// A 2D point in image pixel space
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Single recognized text region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Box corners, in the order the engine reported them
    #[serde(rename = "box")]
    pub bbox: [Point; 4],
    /// Recognized text
    pub text: String,
    /// Recognition confidence (0.0 - 1.0)
    pub score: f64,
}

impl Detection {
    /// Create a detection, clamping the score into [0, 1]
    pub fn new(bbox: [Point; 4], text: impl Into<String>, score: f64) -> Self {
        let score = if score.is_finite() {
            score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            bbox,
            text: text.into(),
            score,
        }
    }
}

/// OCR output for one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// Image the detections belong to
    pub image: PathBuf,
    /// Detections in original image coordinates
    pub items: Vec<Detection>,
}

impl RecognitionResult {
    pub fn new(image: &Path, items: Vec<Detection>) -> Self {
        Self {
            image: image.to_path_buf(),
            items,
        }
    }

    /// Result with no detections
    pub fn empty(image: &Path) -> Self {
        Self::new(image, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// All non-empty texts joined by a single space
    pub fn text(&self) -> String {
        self.items
            .iter()
            .map(|item| item.text.as_str())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
