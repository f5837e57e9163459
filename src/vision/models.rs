//! Model management for ONNX Runtime
//!
//! Locates, downloads and loads the PP-OCR detection, recognition and
//! orientation models.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider, ExecutionProviderDispatch};
use ort::session::{builder::GraphOptimizationLevel, Session};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use super::device::DeviceState;
use super::engine::BackendError;

/// Default download location for the PP-OCRv4 ONNX exports
pub const DEFAULT_MODEL_BASE_URL: &str =
    "https://huggingface.co/SWHL/RapidOCR/resolve/main/PP-OCRv4";

/// Dictionary file used when the recognizer carries no embedded character list
pub const DICTIONARY_FILENAME: &str = "ppocr_keys_v1.txt";

/// Model identifier for PaddleOCR components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Text detection model (DBNet)
    Detection,
    /// Text recognition model (CRNN)
    Recognition,
    /// Text line orientation classifier
    Classifier,
}

impl ModelType {
    pub const ALL: [ModelType; 3] = [
        ModelType::Detection,
        ModelType::Recognition,
        ModelType::Classifier,
    ];

    /// Get the filename for this model type
    pub fn filename(&self) -> &'static str {
        match self {
            ModelType::Detection => "ch_PP-OCRv4_det_infer.onnx",
            ModelType::Recognition => "ch_PP-OCRv4_rec_infer.onnx",
            ModelType::Classifier => "ch_ppocr_mobile_v2.0_cls_infer.onnx",
        }
    }

    /// Older filename still found in some model folders
    pub fn legacy_filename(&self) -> Option<&'static str> {
        match self {
            ModelType::Classifier => Some("ch_ppocr_mobile_v2_cls_infer.onnx"),
            _ => None,
        }
    }

    /// Whether the engine can run without this model
    pub fn is_optional(&self) -> bool {
        matches!(self, ModelType::Classifier)
    }

    /// Expected file size for integrity check (approximate, in bytes)
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelType::Detection => (1_000_000, 20_000_000),
            ModelType::Recognition => (5_000_000, 30_000_000),
            ModelType::Classifier => (100_000, 5_000_000),
        }
    }

    /// Display name for progress reporting
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelType::Detection => "Text Detection",
            ModelType::Recognition => "Text Recognition",
            ModelType::Classifier => "Text Orientation",
        }
    }
}

/// Resolved model files for one engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub detection: PathBuf,
    pub recognition: PathBuf,
    pub classifier: Option<PathBuf>,
    /// Character list for models without embedded metadata
    pub dictionary: Option<PathBuf>,
}

/// Model manifest tracking downloaded models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
    /// Unix seconds
    pub downloaded_at: u64,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// Progress callback for download operations
pub type DownloadProgressCallback = Box<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Model manager for locating and downloading ONNX models
pub struct ModelManager {
    models_dir: PathBuf,
    base_url: String,
    offline: bool,
}

impl ModelManager {
    /// Manager rooted in the application data dir
    pub fn new() -> Result<Self> {
        let models_dir = crate::storage::get_data_dir()?.join("models");
        Self::with_dir(models_dir)
    }

    /// Create model manager with custom directory
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("Failed to create models dir {:?}", models_dir))?;
        Ok(Self {
            models_dir,
            base_url: DEFAULT_MODEL_BASE_URL.to_string(),
            offline: false,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Refuse network access
    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Get the models directory path
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Path for a model, preferring the legacy name if only that exists
    pub fn model_path(&self, model_type: ModelType) -> PathBuf {
        let primary = self.models_dir.join(model_type.filename());
        if primary.exists() {
            return primary;
        }
        model_type
            .legacy_filename()
            .map(|name| self.models_dir.join(name))
            .filter(|legacy| legacy.exists())
            .unwrap_or(primary)
    }

    pub fn download_url(&self, model_type: ModelType) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), model_type.filename())
    }

    /// Check if a model is present with a plausible size
    pub fn is_model_available(&self, model_type: ModelType) -> bool {
        match std::fs::metadata(self.model_path(model_type)) {
            Ok(metadata) => {
                let (min, max) = model_type.expected_size_range();
                (min..=max).contains(&metadata.len())
            }
            Err(_) => false,
        }
    }

    /// Models that are absent, required ones first
    pub fn missing_models(&self) -> Vec<ModelType> {
        let mut missing: Vec<ModelType> = ModelType::ALL
            .into_iter()
            .filter(|&m| !self.is_model_available(m))
            .collect();
        missing.sort_by_key(|m| m.is_optional());
        missing
    }

    /// Get status of all models
    pub fn get_model_status(&self) -> Vec<(ModelType, bool, Option<u64>)> {
        ModelType::ALL
            .iter()
            .map(|&model_type| {
                let path = self.model_path(model_type);
                let available = self.is_model_available(model_type);
                let size = std::fs::metadata(&path).ok().map(|m| m.len());
                (model_type, available, size)
            })
            .collect()
    }

    /// Paths for the engine; fails if a required model is missing
    pub fn resolve(&self) -> Result<ModelPaths> {
        let missing: Vec<&str> = self
            .missing_models()
            .into_iter()
            .filter(|m| !m.is_optional())
            .map(|m| m.filename())
            .collect();
        if !missing.is_empty() {
            anyhow::bail!(
                "Missing OCR model files in {:?}: {}. Run `meme-finder models --download` or copy them there",
                self.models_dir,
                missing.join(", ")
            );
        }

        let classifier = self
            .is_model_available(ModelType::Classifier)
            .then(|| self.model_path(ModelType::Classifier));
        if classifier.is_none() {
            warn!("Orientation classifier not found, upside-down text will not be corrected");
        }

        let dictionary = Some(self.models_dir.join(DICTIONARY_FILENAME)).filter(|p| p.exists());

        Ok(ModelPaths {
            detection: self.model_path(ModelType::Detection),
            recognition: self.model_path(ModelType::Recognition),
            classifier,
            dictionary,
        })
    }

    /// Download a model if not already available
    /// Returns the path to the model file
    pub fn ensure_model(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.model_path(model_type);

        if self.is_model_available(model_type) {
            info!("Model {:?} already available at {:?}", model_type, path);
            return Ok(path);
        }

        info!("Downloading model {:?}...", model_type);
        self.download_model_with_progress(model_type, None)?;

        Ok(self.model_path(model_type))
    }

    /// Download all models; the classifier is best effort
    pub fn ensure_all_models(&self) -> Result<ModelPaths> {
        for model_type in ModelType::ALL {
            match self.ensure_model(model_type) {
                Ok(_) => {}
                Err(e) if model_type.is_optional() => {
                    warn!("Failed to download optional {} model: {:#}", model_type.display_name(), e);
                }
                Err(e) => return Err(e),
            }
        }
        self.resolve()
    }

    /// Download a specific model with optional progress callback
    pub fn download_model_with_progress(
        &self,
        model_type: ModelType,
        progress: Option<DownloadProgressCallback>,
    ) -> Result<()> {
        let url = self.download_url(model_type);
        let path = self.models_dir.join(model_type.filename());

        if self.offline {
            anyhow::bail!(
                "Offline mode: cannot download models. Please download manually from {} and place at {:?}",
                url,
                path
            );
        }

        info!("Downloading {} model from {}", model_type.display_name(), url);

        let rt = Runtime::new().context("Failed to create tokio runtime")?;
        let sha256 = rt.block_on(async { download_file_async(&url, &path, progress).await })?;

        if !self.is_model_available(model_type) {
            anyhow::bail!("Download completed but model verification failed");
        }

        self.update_manifest_for_model(model_type, &path, sha256)?;

        info!("Successfully downloaded {} model", model_type.display_name());
        Ok(())
    }

    /// Update manifest after successful download
    fn update_manifest_for_model(&self, model_type: ModelType, path: &Path, sha256: String) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_default();
        let metadata = std::fs::metadata(path)?;

        let downloaded_at = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let model_info = ModelInfo {
            model_type: format!("{:?}", model_type),
            filename: model_type.filename().to_string(),
            size_bytes: metadata.len(),
            sha256,
            downloaded_at,
        };

        if let Some(existing) = manifest
            .models
            .iter_mut()
            .find(|m| m.filename == model_info.filename)
        {
            *existing = model_info;
        } else {
            manifest.models.push(model_info);
        }

        self.save_manifest(&manifest)
    }

    /// Load the model manifest
    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            let manifest: ModelManifest = serde_json::from_str(&content)?;
            Ok(manifest)
        } else {
            Ok(ModelManifest::default())
        }
    }

    /// Save the model manifest
    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let manifest_path = self.models_dir.join("manifest.json");
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(manifest_path, content)?;
        Ok(())
    }
}

/// Stream `url` into `path` through a temp file; returns the SHA-256 hex
async fn download_file_async(
    url: &str,
    path: &Path,
    progress: Option<DownloadProgressCallback>,
) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()
        .context("Failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .context("Failed to send download request")?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status {}: {}", response.status(), url);
    }

    let total_size = response.content_length();
    debug!("Download size: {:?} bytes", total_size);

    let temp_path = path.with_extension("tmp");
    let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

    let mut hasher = Sha256::new();
    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error reading download stream")?;

        file.write_all(&chunk).context("Failed to write to temp file")?;

        hasher.update(&chunk);
        downloaded += chunk.len() as u64;

        if let Some(ref callback) = progress {
            callback(downloaded, total_size);
        }
    }

    file.flush().context("Failed to flush temp file")?;
    drop(file);

    std::fs::rename(&temp_path, path)
        .context("Failed to move downloaded file to final location")?;

    Ok(format!("{:x}", hasher.finalize()))
}

/// Whether ONNX Runtime exposes a usable GPU execution provider
pub fn accelerator_available() -> bool {
    let cuda = CUDAExecutionProvider::default().is_available().unwrap_or(false);
    debug!("CUDA execution provider available: {}", cuda);
    cuda || directml_available()
}

#[cfg(target_os = "windows")]
fn directml_available() -> bool {
    use ort::execution_providers::DirectMLExecutionProvider;
    DirectMLExecutionProvider::default().is_available().unwrap_or(false)
}

#[cfg(not(target_os = "windows"))]
fn directml_available() -> bool {
    false
}

/// Accelerator provider that errors instead of silently running on CPU
#[cfg(target_os = "windows")]
fn accelerator_provider() -> ExecutionProviderDispatch {
    use ort::execution_providers::DirectMLExecutionProvider;
    if directml_available() {
        DirectMLExecutionProvider::default().build().error_on_failure()
    } else {
        CUDAExecutionProvider::default().build().error_on_failure()
    }
}

#[cfg(not(target_os = "windows"))]
fn accelerator_provider() -> ExecutionProviderDispatch {
    CUDAExecutionProvider::default().build().error_on_failure()
}

/// Load an ONNX model bound to `device`
pub fn build_session(
    model_path: &Path,
    device: DeviceState,
    intra_threads: usize,
) -> Result<Session, BackendError> {
    info!("Loading ONNX model from {:?} on {}", model_path, device);

    let builder = Session::builder()
        .map_err(|err| BackendError::construction(format!("failed to build ORT session: {err}")))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|err| {
            BackendError::construction(format!("failed to configure ORT optimization: {err}"))
        })?
        .with_intra_threads(intra_threads.max(1))
        .map_err(|err| BackendError::construction(format!("failed to set ORT threads: {err}")))?;

    let builder = match device {
        DeviceState::Gpu => builder
            .with_execution_providers([accelerator_provider()])
            .map_err(|err| {
                BackendError::construction(format!("failed to register GPU execution provider: {err}"))
            })?,
        DeviceState::Cpu => builder,
    };

    let session = builder.commit_from_file(model_path).map_err(|err| {
        BackendError::construction(format!(
            "failed to load ORT model at {}: {err}",
            model_path.display()
        ))
    })?;

    let input_names: Vec<&str> = session.inputs.iter().map(|i| i.name.as_str()).collect();
    let output_names: Vec<&str> = session.outputs.iter().map(|o| o.name.as_str()).collect();
    debug!(
        "Model loaded. Inputs: {:?}, Outputs: {:?}",
        input_names, output_names
    );

    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_sized(path: &Path, len: usize) {
        std::fs::write(path, vec![0u8; len]).unwrap();
    }

    #[test]
    fn test_model_type_filenames() {
        assert_eq!(ModelType::Detection.filename(), "ch_PP-OCRv4_det_infer.onnx");
        assert_eq!(ModelType::Recognition.filename(), "ch_PP-OCRv4_rec_infer.onnx");
        assert_eq!(
            ModelType::Classifier.filename(),
            "ch_ppocr_mobile_v2.0_cls_infer.onnx"
        );
    }

    #[test]
    fn test_missing_models_lists_required_first() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();

        let missing = manager.missing_models();
        assert_eq!(missing.len(), 3);
        assert!(!missing[0].is_optional());
        assert!(!missing[1].is_optional());
        assert_eq!(missing[2], ModelType::Classifier);
        assert!(manager.resolve().is_err());
    }

    #[test]
    fn test_legacy_classifier_name_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        write_sized(&dir.path().join("ch_ppocr_mobile_v2_cls_infer.onnx"), 200_000);

        assert!(manager.is_model_available(ModelType::Classifier));
        assert_eq!(
            manager.model_path(ModelType::Classifier),
            dir.path().join("ch_ppocr_mobile_v2_cls_infer.onnx")
        );
    }

    #[test]
    fn test_resolve_without_classifier() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        write_sized(&dir.path().join(ModelType::Detection.filename()), 2_000_000);
        write_sized(&dir.path().join(ModelType::Recognition.filename()), 6_000_000);

        let paths = manager.resolve().unwrap();
        assert!(paths.classifier.is_none());
        assert!(paths.dictionary.is_none());
        assert_eq!(paths.detection, dir.path().join(ModelType::Detection.filename()));
    }

    #[test]
    fn test_truncated_model_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        write_sized(&dir.path().join(ModelType::Detection.filename()), 10);

        assert!(!manager.is_model_available(ModelType::Detection));
    }

    #[test]
    fn test_download_url_joins_base() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf())
            .unwrap()
            .with_base_url("https://example.com/models/");
        assert_eq!(
            manager.download_url(ModelType::Detection),
            "https://example.com/models/ch_PP-OCRv4_det_infer.onnx"
        );
    }

    #[test]
    fn test_offline_download_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf())
            .unwrap()
            .with_offline(true);
        let err = manager.ensure_model(ModelType::Detection).unwrap_err();
        assert!(err.to_string().contains("Offline mode"));
    }

    #[test]
    fn test_manifest_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();
        let mut manifest = ModelManifest::default();
        manifest.models.push(ModelInfo {
            model_type: "Detection".to_string(),
            filename: ModelType::Detection.filename().to_string(),
            size_bytes: 42,
            sha256: "abc".to_string(),
            downloaded_at: 1,
        });
        manager.save_manifest(&manifest).unwrap();

        let loaded = manager.load_manifest().unwrap();
        assert_eq!(loaded.models.len(), 1);
        assert_eq!(loaded.models[0].sha256, "abc");
    }
}
