//! NVIDIA Management Library (NVML) integration
//!
//! The inventory never talks to `nvml-wrapper` directly. It goes through the
//! traits below so a scan can run against a mocked driver in tests:
//! - [`NvmlProvider`] opens a device-management session
//! - [`NvmlInterface`] is an open session
//! - [`DeviceInterface`] is a device handle borrowed from a session

use std::ffi::OsStr;
use std::path::PathBuf;

use nvml_wrapper::enum_wrappers::device::ComputeMode as NvmlComputeMode;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Device;
use nvml_wrapper::Nvml;
use serde::Serialize;

/// Library name tried when the default NVML lookup fails.
pub const DEFAULT_NVML_LIB: &str = "libnvidia-ml.so.1";

/// Per-device compute access policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum ComputeMode {
    #[display("default")]
    Default,
    #[display("exclusive_thread")]
    ExclusiveThread,
    #[display("exclusive_process")]
    ExclusiveProcess,
    #[display("prohibited")]
    Prohibited,
}

impl From<NvmlComputeMode> for ComputeMode {
    fn from(mode: NvmlComputeMode) -> Self {
        match mode {
            NvmlComputeMode::Default => Self::Default,
            NvmlComputeMode::ExclusiveThread => Self::ExclusiveThread,
            NvmlComputeMode::ExclusiveProcess => Self::ExclusiveProcess,
            NvmlComputeMode::Prohibited => Self::Prohibited,
        }
    }
}

/// Framebuffer memory of a device, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryInfo {
    pub free: u64,
    pub total: u64,
}

pub trait NvmlProvider {
    /// Opens a new device-management session.
    fn open(&self) -> Result<Box<dyn NvmlInterface>, NvmlError>;
}

pub trait NvmlInterface {
    fn device_count(&self) -> Result<u32, NvmlError>;
    fn device_by_index(&self, index: u32) -> Result<Box<dyn DeviceInterface + '_>, NvmlError>;
    /// Closes the session.
    fn shutdown(self: Box<Self>) -> Result<(), NvmlError>;
}

pub trait DeviceInterface {
    fn memory_info(&self) -> Result<MemoryInfo, NvmlError>;
    fn compute_mode(&self) -> Result<ComputeMode, NvmlError>;
    /// Number of processes holding a compute context on the device.
    fn running_compute_processes_count(&self) -> Result<u32, NvmlError>;
}

/// Opens sessions against the system NVML library.
#[derive(Debug, Clone, Default)]
pub struct NvmlLibrary {
    fallback_lib_path: Option<PathBuf>,
}

impl NvmlLibrary {
    pub fn new(fallback_lib_path: Option<PathBuf>) -> Self {
        Self { fallback_lib_path }
    }
}

impl NvmlProvider for NvmlLibrary {
    fn open(&self) -> Result<Box<dyn NvmlInterface>, NvmlError> {
        match Nvml::init() {
            Ok(nvml) => Ok(Box::new(nvml)),
            Err(e) => {
                let lib_path = self
                    .fallback_lib_path
                    .as_deref()
                    .map(|p| p.as_os_str())
                    .unwrap_or_else(|| OsStr::new(DEFAULT_NVML_LIB));
                tracing::debug!(
                    "Standard NVML init failed ({}), trying with explicit library path {:?}",
                    e,
                    lib_path
                );
                let nvml = Nvml::builder().lib_path(lib_path).init()?;
                Ok(Box::new(nvml))
            }
        }
    }
}

impl NvmlInterface for Nvml {
    fn device_count(&self) -> Result<u32, NvmlError> {
        Nvml::device_count(self)
    }

    fn device_by_index(&self, index: u32) -> Result<Box<dyn DeviceInterface + '_>, NvmlError> {
        Nvml::device_by_index(self, index)
            .map(|device| Box::new(DeviceWrapper(device)) as Box<dyn DeviceInterface + '_>)
    }

    fn shutdown(self: Box<Self>) -> Result<(), NvmlError> {
        Nvml::shutdown(*self)
    }
}

struct DeviceWrapper<'nvml>(Device<'nvml>);

impl DeviceInterface for DeviceWrapper<'_> {
    fn memory_info(&self) -> Result<MemoryInfo, NvmlError> {
        let info = self.0.memory_info()?;
        Ok(MemoryInfo {
            free: info.free,
            total: info.total,
        })
    }

    fn compute_mode(&self) -> Result<ComputeMode, NvmlError> {
        self.0.compute_mode().map(ComputeMode::from)
    }

    // Zero-capacity probe: NVML answers INSUFFICIENT_SIZE and writes back the
    // real count when at least one process exists.
    fn running_compute_processes_count(&self) -> Result<u32, NvmlError> {
        count_with_legacy_fallback(
            || self.0.running_compute_processes_count(),
            || self.0.running_compute_processes_count_v2(),
        )
    }
}

/// Drivers older than R510 do not export the `_v3` process query; retry
/// through the `_v2` symbol when it cannot be loaded.
fn count_with_legacy_fallback(
    current: impl FnOnce() -> Result<u32, NvmlError>,
    legacy: impl FnOnce() -> Result<u32, NvmlError>,
) -> Result<u32, NvmlError> {
    match current() {
        Err(NvmlError::FailedToLoadSymbol(symbol)) => {
            tracing::debug!("{} unavailable, using legacy process query", symbol);
            legacy()
        }
        other => other,
    }
}
