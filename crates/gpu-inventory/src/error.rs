use nvml_wrapper::error::NvmlError;
use thiserror::Error;

/// Device queries issued during a scan, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum DeviceQuery {
    #[display("handle")]
    Handle,
    #[display("memory info")]
    MemoryInfo,
    #[display("compute mode")]
    ComputeMode,
    #[display("compute processes")]
    ComputeProcesses,
}

#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("Failed to initialize NVML: {0}")]
    SessionInit(#[source] NvmlError),

    #[error("Failed to get device count: {0}")]
    DeviceCount(#[source] NvmlError),

    #[error("Failed to get GPU {query} for GPU {index}: {source}")]
    DeviceQuery {
        index: u32,
        query: DeviceQuery,
        #[source]
        source: NvmlError,
    },

    #[error("GPU index {index} out of range (device count {device_count})")]
    IndexOutOfRange { index: u32, device_count: u32 },
}

impl InventoryError {
    pub(crate) fn query(index: u32, query: DeviceQuery) -> impl FnOnce(NvmlError) -> Self {
        move |source| Self::DeviceQuery {
            index,
            query,
            source,
        }
    }
}
