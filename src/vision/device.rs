//! Accelerator selection with CPU fallback
//!
//! GPU engine construction can hang indefinitely on a broken driver stack, so
//! it runs on a dedicated worker thread and the caller waits at most
//! `init_timeout` for it. A worker that misses the deadline is abandoned and
//! the engine is rebuilt on the CPU.

use crossbeam_channel::RecvTimeoutError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::engine::{BackendError, OcrAdapter, OcrBackend};

/// Device an engine was built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Cpu,
    Gpu,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Cpu => write!(f, "cpu"),
            DeviceState::Gpu => write!(f, "gpu"),
        }
    }
}

/// Selector lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
    Uninitialized,
    Probing,
    GpuReady,
    CpuReady,
    Failed,
}

/// Why accelerator construction was abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    Timeout,
    Driver,
    MissingLibrary,
    Unknown,
}

impl FailureCause {
    /// Best-effort classification of a construction error message
    pub fn classify(message: &str) -> Self {
        let msg = message.to_lowercase();
        let contains_any = |needles: &[&str]| needles.iter().any(|n| msg.contains(n));

        if contains_any(&["timed out", "timeout"]) {
            FailureCause::Timeout
        } else if contains_any(&[
            "cannot open shared object",
            "no such file",
            "library not found",
            "could not load library",
            "loadlibrary",
            "dlopen",
            ".dll",
            ".so",
        ]) {
            FailureCause::MissingLibrary
        } else if contains_any(&["driver", "cuda", "cudnn", "cublas", "directml", "device"]) {
            FailureCause::Driver
        } else {
            FailureCause::Unknown
        }
    }
}

/// Device selection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Never try the accelerator
    pub force_cpu: bool,
    /// `Some(true)` skips the availability probe, `Some(false)` forces CPU
    pub accelerator: Option<bool>,
    /// Upper bound on accelerator engine construction
    pub init_timeout_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            force_cpu: false,
            accelerator: None,
            init_timeout_secs: 30,
        }
    }
}

impl DeviceConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    /// Whether the accelerator must not be attempted
    pub fn cpu_forced(&self) -> bool {
        self.force_cpu || self.accelerator == Some(false)
    }
}

/// Builds backends for a given device
pub trait EngineFactory: Send + Sync + 'static {
    /// Whether an accelerator backend is usable on this machine
    fn accelerator_available(&self) -> bool;

    /// Construct a backend bound to `device`
    fn build(&self, device: DeviceState) -> Result<Box<dyn OcrBackend>, BackendError>;
}

/// Device selection errors
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("OCR engine construction failed on every device (gpu: {gpu}; cpu: {cpu})")]
    ConstructionFailed { gpu: String, cpu: String },
    #[error("device selection already finished in state {0:?}")]
    AlreadySelected(SelectorState),
}

/// Engine produced by [`DeviceSelector::select`]
pub struct SelectedEngine {
    pub device: DeviceState,
    pub backend: Box<dyn OcrBackend>,
    /// Set when the accelerator was attempted and abandoned
    pub fallback: Option<FailureCause>,
}

impl SelectedEngine {
    pub fn into_adapter(self) -> OcrAdapter {
        OcrAdapter::new(self.backend, self.device)
    }
}

impl fmt::Debug for SelectedEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectedEngine")
            .field("device", &self.device)
            .field("backend", &self.backend.name())
            .field("fallback", &self.fallback)
            .finish()
    }
}

/// Chooses and constructs the OCR engine once per run
pub struct DeviceSelector {
    config: DeviceConfig,
    init_timeout: Duration,
    factory: Arc<dyn EngineFactory>,
    state: SelectorState,
    history: Vec<SelectorState>,
}

impl DeviceSelector {
    pub fn new(config: DeviceConfig, factory: Arc<dyn EngineFactory>) -> Self {
        let init_timeout = config.init_timeout();
        Self {
            config,
            init_timeout,
            factory,
            state: SelectorState::Uninitialized,
            history: vec![SelectorState::Uninitialized],
        }
    }

    /// Override the construction deadline
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn state(&self) -> SelectorState {
        self.state
    }

    /// Every state visited so far, starting with `Uninitialized`
    pub fn history(&self) -> &[SelectorState] {
        &self.history
    }

    fn transition(&mut self, next: SelectorState) {
        debug!("Device selector: {:?} -> {:?}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// Pick a device and construct the engine for it
    pub fn select(&mut self) -> Result<SelectedEngine, DeviceError> {
        if self.state != SelectorState::Uninitialized {
            return Err(DeviceError::AlreadySelected(self.state));
        }

        if self.config.cpu_forced() {
            info!("CPU execution forced by configuration");
            return self.build_cpu(None, None);
        }

        self.transition(SelectorState::Probing);

        let available = if self.config.accelerator == Some(true) {
            info!("Accelerator override set, skipping availability probe");
            true
        } else {
            self.factory.accelerator_available()
        };

        if !available {
            info!("No accelerator available, using CPU");
            return self.build_cpu(None, None);
        }

        match self.build_accelerated() {
            Ok(backend) => {
                self.transition(SelectorState::GpuReady);
                info!("OCR engine '{}' running on GPU", backend.name());
                Ok(SelectedEngine {
                    device: DeviceState::Gpu,
                    backend,
                    fallback: None,
                })
            }
            Err((cause, message)) => {
                warn!(
                    "Accelerator engine construction failed ({:?}): {}. Falling back to CPU",
                    cause, message
                );
                self.build_cpu(Some(cause), Some(message))
            }
        }
    }

    /// Construct the GPU engine on a worker thread bounded by the deadline.
    ///
    /// On timeout the worker is detached; if it finishes later its engine is
    /// dropped on that thread.
    fn build_accelerated(&self) -> Result<Box<dyn OcrBackend>, (FailureCause, String)> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let factory = Arc::clone(&self.factory);

        let spawned = thread::Builder::new()
            .name("ocr-accel-init".to_string())
            .spawn(move || {
                let result = factory.build(DeviceState::Gpu);
                // Receiver is gone if the caller already timed out
                let _ = tx.send(result);
            });
        if let Err(e) = spawned {
            return Err((FailureCause::Unknown, format!("failed to spawn init worker: {e}")));
        }

        let started = Instant::now();
        match rx.recv_timeout(self.init_timeout) {
            Ok(Ok(backend)) => {
                debug!("Accelerator engine built in {:?}", started.elapsed());
                Ok(backend)
            }
            Ok(Err(e)) => {
                let message = e.to_string();
                Err((FailureCause::classify(&message), message))
            }
            Err(RecvTimeoutError::Timeout) => Err((
                FailureCause::Timeout,
                format!(
                    "accelerator init did not finish within {:?}",
                    self.init_timeout
                ),
            )),
            Err(RecvTimeoutError::Disconnected) => Err((
                FailureCause::Unknown,
                "accelerator init worker exited without a result".to_string(),
            )),
        }
    }

    fn build_cpu(
        &mut self,
        fallback: Option<FailureCause>,
        gpu_error: Option<String>,
    ) -> Result<SelectedEngine, DeviceError> {
        match self.factory.build(DeviceState::Cpu) {
            Ok(backend) => {
                self.transition(SelectorState::CpuReady);
                info!("OCR engine '{}' running on CPU", backend.name());
                Ok(SelectedEngine {
                    device: DeviceState::Cpu,
                    backend,
                    fallback,
                })
            }
            Err(e) => {
                self.transition(SelectorState::Failed);
                error!("CPU engine construction failed: {}", e);
                Err(DeviceError::ConstructionFailed {
                    gpu: gpu_error.unwrap_or_else(|| "not attempted".to_string()),
                    cpu: e.to_string(),
                })
            }
        }
    }
}
