//! OCR engine adapter
//!
//! [`OcrBackend`] is the seam between the pipeline and a concrete OCR engine.
//! Engines disagree on call shapes, so [`OcrAdapter`] retries with the
//! alternatives a backend asks for and falls back to the legacy entry point
//! when the primary call yields nothing.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use super::device::DeviceState;
use super::normalize::is_truthy;

/// Input to a single engine call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineInput {
    Path(PathBuf),
    Batch(Vec<PathBuf>),
}

impl EngineInput {
    /// Paths in call order
    pub fn paths(&self) -> &[PathBuf] {
        match self {
            EngineInput::Path(path) => std::slice::from_ref(path),
            EngineInput::Batch(paths) => paths,
        }
    }
}

/// How `limit_side_len` is applied when resizing for detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitType {
    /// Shrink so the longer side is at most the limit
    Max,
    /// Grow so the shorter side is at least the limit
    Min,
}

/// Detector knobs passed to backends that accept them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictOptions {
    pub limit_side_len: u32,
    pub limit_type: LimitType,
    /// Minimum mean probability for a detected region
    pub box_thresh: f32,
    /// Region expansion factor
    pub unclip_ratio: f32,
    /// Run the text line orientation classifier when available
    pub use_textline_orientation: bool,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            limit_side_len: 1536,
            limit_type: LimitType::Max,
            box_thresh: 0.30,
            unclip_ratio: 2.30,
            use_textline_orientation: true,
        }
    }
}

/// Backend errors
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend requires a list of inputs")]
    BatchInputRequired,
    #[error("backend does not accept call options")]
    OptionsRejected,
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("engine construction failed: {0}")]
    Construction(String),
}

impl BackendError {
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    pub fn construction(msg: impl Into<String>) -> Self {
        Self::Construction(msg.into())
    }
}

/// A constructed OCR engine
pub trait OcrBackend: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// Primary recognition entry point
    fn predict(
        &self,
        input: &EngineInput,
        options: Option<&PredictOptions>,
    ) -> Result<Option<Value>, BackendError>;

    /// Older entry point tried when `predict` yields nothing
    fn legacy_ocr(&self, _path: &Path) -> Result<Option<Value>, BackendError> {
        Ok(None)
    }
}

/// Engine handle plus the device it was built for
pub struct OcrAdapter {
    backend: Box<dyn OcrBackend>,
    device: DeviceState,
    options: PredictOptions,
}

impl OcrAdapter {
    pub fn new(backend: Box<dyn OcrBackend>, device: DeviceState) -> Self {
        Self {
            backend,
            device,
            options: PredictOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PredictOptions) -> Self {
        self.options = options;
        self
    }

    /// Device the engine was constructed for
    pub fn device(&self) -> DeviceState {
        self.device
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn options(&self) -> &PredictOptions {
        &self.options
    }

    /// Run the engine on one image file and return its raw output.
    ///
    /// Never fails: errors are logged and yield `None`.
    pub fn recognize(&self, path: &Path) -> Option<Value> {
        match self.predict_tolerant(path) {
            Ok(Some(raw)) if is_truthy(&raw) => return Some(raw),
            Ok(_) => debug!("{} predict returned nothing for {:?}", self.backend.name(), path),
            Err(e) => warn!("{} predict failed for {:?}: {}", self.backend.name(), path, e),
        }

        match self.backend.legacy_ocr(path) {
            Ok(Some(raw)) if is_truthy(&raw) => Some(raw),
            Ok(_) => {
                debug!("No text found in {:?}", path);
                None
            }
            Err(e) => {
                warn!("{} legacy OCR failed for {:?}: {}", self.backend.name(), path, e);
                None
            }
        }
    }

    /// Call `predict`, switching to a one-element list or dropping options
    /// when the backend asks for it. Each switch happens at most once.
    fn predict_tolerant(&self, path: &Path) -> Result<Option<Value>, BackendError> {
        let mut batch = false;
        let mut with_options = true;

        loop {
            let input = if batch {
                EngineInput::Batch(vec![path.to_path_buf()])
            } else {
                EngineInput::Path(path.to_path_buf())
            };
            let options = with_options.then_some(&self.options);

            match self.backend.predict(&input, options) {
                Ok(raw) if batch => return Ok(raw.map(unwrap_singleton)),
                Ok(raw) => return Ok(raw),
                Err(BackendError::OptionsRejected) if with_options => {
                    debug!("{} rejected options, retrying without", self.backend.name());
                    with_options = false;
                }
                Err(BackendError::BatchInputRequired) if !batch => {
                    debug!("{} wants list input, retrying", self.backend.name());
                    batch = true;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn unwrap_singleton(raw: Value) -> Value {
    match raw {
        Value::Array(mut items) if items.len() == 1 => items.swap_remove(0),
        other => other,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Scripted backend that records every call
    pub(crate) struct ScriptedBackend {
        pub predict_results: Mutex<Vec<Result<Option<Value>, BackendError>>>,
        pub legacy_result: Option<Value>,
        pub calls: Mutex<Vec<(EngineInput, bool)>>,
        pub legacy_calls: Mutex<usize>,
    }

    impl ScriptedBackend {
        pub(crate) fn new(results: Vec<Result<Option<Value>, BackendError>>) -> Self {
            Self {
                predict_results: Mutex::new(results),
                legacy_result: None,
                calls: Mutex::new(Vec::new()),
                legacy_calls: Mutex::new(0),
            }
        }
    }

    impl OcrBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn predict(
            &self,
            input: &EngineInput,
            options: Option<&PredictOptions>,
        ) -> Result<Option<Value>, BackendError> {
            self.calls.lock().push((input.clone(), options.is_some()));
            let mut results = self.predict_results.lock();
            if results.is_empty() {
                Ok(None)
            } else {
                results.remove(0)
            }
        }

        fn legacy_ocr(&self, _path: &Path) -> Result<Option<Value>, BackendError> {
            *self.legacy_calls.lock() += 1;
            Ok(self.legacy_result.clone())
        }
    }

    /// Adapter around a shared scripted backend so tests can inspect calls
    struct Shared(std::sync::Arc<ScriptedBackend>);

    impl OcrBackend for Shared {
        fn name(&self) -> &'static str {
            self.0.name()
        }

        fn predict(
            &self,
            input: &EngineInput,
            options: Option<&PredictOptions>,
        ) -> Result<Option<Value>, BackendError> {
            self.0.predict(input, options)
        }

        fn legacy_ocr(&self, path: &Path) -> Result<Option<Value>, BackendError> {
            self.0.legacy_ocr(path)
        }
    }

    fn adapter(backend: ScriptedBackend) -> (OcrAdapter, std::sync::Arc<ScriptedBackend>) {
        let shared = std::sync::Arc::new(backend);
        let adapter = OcrAdapter::new(Box::new(Shared(shared.clone())), DeviceState::Cpu);
        (adapter, shared)
    }

    #[test]
    fn test_direct_predict_result() {
        let raw = json!({"rec_texts": ["a"]});
        let (adapter, backend) = adapter(ScriptedBackend::new(vec![Ok(Some(raw.clone()))]));

        assert_eq!(adapter.recognize(Path::new("a.png")), Some(raw));
        let calls = backend.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, EngineInput::Path(PathBuf::from("a.png")));
        assert!(calls[0].1);
        assert_eq!(*backend.legacy_calls.lock(), 0);
    }

    #[test]
    fn test_batch_input_retry_unwraps_single_element() {
        let inner = json!({"rec_texts": ["b"]});
        let (adapter, backend) = adapter(ScriptedBackend::new(vec![
            Err(BackendError::BatchInputRequired),
            Ok(Some(json!([inner.clone()]))),
        ]));

        assert_eq!(adapter.recognize(Path::new("b.png")), Some(inner));
        let calls = backend.calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, EngineInput::Batch(vec![PathBuf::from("b.png")]));
    }

    #[test]
    fn test_options_rejected_then_batch_required() {
        let (adapter, backend) = adapter(ScriptedBackend::new(vec![
            Err(BackendError::OptionsRejected),
            Err(BackendError::BatchInputRequired),
            Ok(Some(json!([[1, 2]]))),
        ]));

        assert_eq!(adapter.recognize(Path::new("c.png")), Some(json!([1, 2])));
        let calls = backend.calls.lock();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].1);
        assert!(!calls[1].1);
        assert!(!calls[2].1);
    }

    #[test]
    fn test_repeated_rejection_does_not_loop() {
        let (adapter, backend) = adapter(ScriptedBackend::new(vec![
            Err(BackendError::OptionsRejected),
            Err(BackendError::OptionsRejected),
            Err(BackendError::OptionsRejected),
        ]));

        assert_eq!(adapter.recognize(Path::new("d.png")), None);
        assert_eq!(backend.calls.lock().len(), 2);
        assert_eq!(*backend.legacy_calls.lock(), 1);
    }

    #[test]
    fn test_empty_result_falls_back_to_legacy() {
        let mut backend = ScriptedBackend::new(vec![Ok(Some(json!([])))]);
        backend.legacy_result = Some(json!([["legacy"]]));
        let (adapter, backend) = adapter(backend);

        assert_eq!(adapter.recognize(Path::new("e.png")), Some(json!([["legacy"]])));
        assert_eq!(*backend.legacy_calls.lock(), 1);
    }

    #[test]
    fn test_inference_error_degrades_to_none() {
        let (adapter, backend) = adapter(ScriptedBackend::new(vec![Err(BackendError::inference(
            "boom",
        ))]));

        assert_eq!(adapter.recognize(Path::new("f.png")), None);
        assert_eq!(*backend.legacy_calls.lock(), 1);
    }

    #[test]
    fn test_default_predict_options() {
        let options = PredictOptions::default();
        assert_eq!(options.limit_side_len, 1536);
        assert_eq!(options.limit_type, LimitType::Max);
        assert!((options.box_thresh - 0.30).abs() < 1e-6);
        assert!((options.unclip_ratio - 2.30).abs() < 1e-6);
        assert!(options.use_textline_orientation);
    }
}
