//! GPU availability tracking for job placement.
//!
//! [`GpuInventory`] enumerates the GPUs of the host through NVML, filters them
//! by the caller's visibility list and classifies each as free or busy from
//! its memory headroom and compute mode. It also keeps the in-use flags that a
//! scheduler sets and clears as it claims and releases devices.

pub mod bitmap;
pub mod config;
pub mod error;
pub mod inventory;
pub mod nvml;
pub mod visibility;

pub use config::InventoryConfig;
pub use error::InventoryError;
pub use inventory::Availability;
pub use inventory::BusyReason;
pub use inventory::DeviceStatus;
pub use inventory::GpuInventory;
pub use nvml::NvmlLibrary;
