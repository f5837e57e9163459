//! Image to detections orchestration

use image::Rgb;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, warn};

use super::device::DeviceState;
use super::engine::OcrAdapter;
use super::normalize::normalize;
use super::padding::{GeometryPadder, PadError};
use super::remap::remap;
use super::RecognitionResult;

#[derive(Debug, Error)]
enum PipelineError {
    #[error(transparent)]
    Pad(#[from] PadError),
}

/// Pad, recognize, normalize and remap a single image
pub struct OcrPipeline {
    adapter: OcrAdapter,
    pad_color: Rgb<u8>,
}

impl OcrPipeline {
    pub fn new(adapter: OcrAdapter) -> Self {
        Self {
            adapter,
            pad_color: Rgb([0, 0, 0]),
        }
    }

    pub fn with_pad_color(mut self, color: [u8; 3]) -> Self {
        self.pad_color = Rgb(color);
        self
    }

    pub fn device(&self) -> DeviceState {
        self.adapter.device()
    }

    pub fn adapter(&self) -> &OcrAdapter {
        &self.adapter
    }

    /// Recognize text in `path`.
    ///
    /// Never fails: any stage error, including a panic inside the engine,
    /// is logged and produces an empty result.
    pub fn process(&self, path: &Path, pad_ratio: f64) -> RecognitionResult {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_stages(path, pad_ratio)));

        match outcome {
            Ok(Ok(result)) => {
                debug!(
                    "OCR {:?}: {} detections in {:?}",
                    path,
                    result.items.len(),
                    started.elapsed()
                );
                result
            }
            Ok(Err(e)) => {
                warn!("OCR failed for {:?}: {}", path, e);
                RecognitionResult::empty(path)
            }
            Err(_) => {
                error!("OCR panicked while processing {:?}", path);
                RecognitionResult::empty(path)
            }
        }
    }

    fn run_stages(&self, path: &Path, pad_ratio: f64) -> Result<RecognitionResult, PipelineError> {
        let padded = GeometryPadder::new(pad_ratio)
            .with_color(self.pad_color)
            .prepare(path)?;

        let raw = self.adapter.recognize(padded.path());
        let transform = padded.transform();
        drop(padded);

        let items = remap(normalize(raw.as_ref()), &transform);
        Ok(RecognitionResult::new(path, items))
    }
}
