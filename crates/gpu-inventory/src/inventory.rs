//! GPU inventory: device discovery, free/busy classification and usage tracking

use serde::Serialize;

use crate::bitmap::UsageBitmap;
use crate::config::InventoryConfig;
use crate::error::DeviceQuery;
use crate::error::InventoryError;
use crate::nvml::ComputeMode;
use crate::nvml::MemoryInfo;
use crate::nvml::NvmlInterface;
use crate::nvml::NvmlProvider;
use crate::visibility;

/// Why a device cannot take new work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum BusyReason {
    #[display("compute prohibited")]
    ComputeProhibited,
    #[display("exclusive process occupied")]
    ExclusiveProcessOccupied,
    #[display("insufficient free memory")]
    InsufficientMemory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, derive_more::Display)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum Availability {
    #[display("free")]
    Free,
    #[display("busy ({_0})")]
    Busy(BusyReason),
}

impl Availability {
    pub fn is_free(&self) -> bool {
        matches!(self, Availability::Free)
    }
}

/// Device state read from the driver during one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceSnapshot {
    pub index: u32,
    pub memory: MemoryInfo,
    pub compute_mode: ComputeMode,
    pub running_processes: u32,
}

impl DeviceSnapshot {
    pub fn classify(&self, free_percentage: u32) -> Availability {
        match self.compute_mode {
            ComputeMode::Prohibited => Availability::Busy(BusyReason::ComputeProhibited),
            ComputeMode::ExclusiveProcess if self.running_processes > 0 => {
                Availability::Busy(BusyReason::ExclusiveProcessOccupied)
            }
            _ if !is_memory_free(&self.memory, free_percentage) => {
                Availability::Busy(BusyReason::InsufficientMemory)
            }
            _ => Availability::Free,
        }
    }
}

/// `free > free_percentage% of total`, strictly, in exact arithmetic.
pub fn is_memory_free(memory: &MemoryInfo, free_percentage: u32) -> bool {
    u128::from(memory.free) * 100 > u128::from(free_percentage) * u128::from(memory.total)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    #[serde(flatten)]
    pub snapshot: DeviceSnapshot,
    pub availability: Availability,
    pub in_use: bool,
}

/// Tracks the GPUs of this host for a scheduler.
///
/// Created by [`GpuInventory::initialize`], which fixes the device count for
/// the lifetime of the value. Every scan opens its own device-management
/// session through the provider and closes it before returning.
///
/// The usage bitmap is plain owned state. Share an inventory between threads
/// by wrapping it in a lock.
#[derive(Debug)]
pub struct GpuInventory<P> {
    provider: P,
    visible_devices_env: String,
    device_count: u32,
    free_percentage: u32,
    in_use: UsageBitmap,
}

impl<P: NvmlProvider> GpuInventory<P> {
    pub fn initialize(provider: P, config: &InventoryConfig) -> Result<Self, InventoryError> {
        tracing::info!("Initializing GPU inventory...");
        visibility::prepare_driver_env();

        let device_count = with_session(&provider, |session| {
            session.device_count().map_err(InventoryError::DeviceCount)
        })?;
        tracing::info!("Discovered {} GPU device(s)", device_count);

        Ok(Self {
            provider,
            visible_devices_env: config.visible_devices_env.clone(),
            device_count,
            free_percentage: config.free_percentage,
            in_use: UsageBitmap::new(device_count),
        })
    }

    /// Reads and classifies every visible device.
    ///
    /// Fails on the first device query error; no partial result is returned.
    pub fn scan(&self) -> Result<Vec<DeviceStatus>, InventoryError> {
        let override_list = visibility::read_override(&self.visible_devices_env);
        let visible = visibility::visible_devices(override_list.as_deref(), self.device_count);

        with_session(&self.provider, |session| {
            let mut statuses = Vec::with_capacity(visible.len());
            for &index in &visible {
                if index >= self.device_count {
                    tracing::debug!(
                        "Skipping visible GPU {}: only {} device(s) present",
                        index,
                        self.device_count
                    );
                    continue;
                }

                let snapshot = read_snapshot(session, index)?;
                let availability = snapshot.classify(self.free_percentage);
                tracing::debug!(
                    gpu = index,
                    free = snapshot.memory.free,
                    total = snapshot.memory.total,
                    compute_mode = %snapshot.compute_mode,
                    processes = snapshot.running_processes,
                    "GPU is {}",
                    availability
                );

                statuses.push(DeviceStatus {
                    snapshot,
                    availability,
                    in_use: self.in_use.test(index) == Some(true),
                });
            }
            Ok(statuses)
        })
    }

    /// Indices of free visible devices, in visibility order.
    ///
    /// Any query failure abandons the scan and yields an empty list.
    pub fn list_free_devices(&self) -> Vec<u32> {
        match self.scan() {
            Ok(statuses) => statuses
                .into_iter()
                .filter(|status| status.availability.is_free())
                .map(|status| status.snapshot.index)
                .collect(),
            Err(e) => {
                tracing::warn!("{}", e);
                Vec::new()
            }
        }
    }
}

impl<P> GpuInventory<P> {
    pub fn device_count(&self) -> u32 {
        self.device_count
    }

    pub fn mark_in_use(&mut self, indices: &[u32]) -> Result<(), InventoryError> {
        self.set_in_use(indices, true)
    }

    pub fn mark_free(&mut self, indices: &[u32]) -> Result<(), InventoryError> {
        self.set_in_use(indices, false)
    }

    pub fn is_in_use(&self, index: u32) -> Result<bool, InventoryError> {
        self.in_use
            .test(index)
            .ok_or(InventoryError::IndexOutOfRange {
                index,
                device_count: self.device_count,
            })
    }

    pub fn in_use_devices(&self) -> Vec<u32> {
        self.in_use.iter_ones().collect()
    }

    pub fn set_free_threshold(&mut self, percent: u32) {
        self.free_percentage = percent;
    }

    pub fn free_threshold(&self) -> u32 {
        self.free_percentage
    }

    pub fn teardown(self) {
        tracing::debug!(
            "Releasing GPU inventory of {} device(s), {} still in use",
            self.in_use.len(),
            self.in_use.iter_ones().count()
        );
    }

    // All indices are checked before any bit changes.
    fn set_in_use(&mut self, indices: &[u32], val: bool) -> Result<(), InventoryError> {
        if let Some(&index) = indices.iter().find(|&&index| index >= self.device_count) {
            return Err(InventoryError::IndexOutOfRange {
                index,
                device_count: self.device_count,
            });
        }
        for &index in indices {
            self.in_use.test_and_set(index, val);
        }
        Ok(())
    }
}

fn read_snapshot(session: &dyn NvmlInterface, index: u32) -> Result<DeviceSnapshot, InventoryError> {
    let device = session
        .device_by_index(index)
        .map_err(InventoryError::query(index, DeviceQuery::Handle))?;
    let memory = device
        .memory_info()
        .map_err(InventoryError::query(index, DeviceQuery::MemoryInfo))?;
    let compute_mode = device
        .compute_mode()
        .map_err(InventoryError::query(index, DeviceQuery::ComputeMode))?;
    let running_processes = device
        .running_compute_processes_count()
        .map_err(InventoryError::query(index, DeviceQuery::ComputeProcesses))?;

    Ok(DeviceSnapshot {
        index,
        memory,
        compute_mode,
        running_processes,
    })
}

/// Runs `f` inside a fresh session and closes the session on every path.
fn with_session<P, T>(
    provider: &P,
    f: impl FnOnce(&dyn NvmlInterface) -> Result<T, InventoryError>,
) -> Result<T, InventoryError>
where
    P: NvmlProvider + ?Sized,
{
    let session = provider.open().map_err(InventoryError::SessionInit)?;
    let result = f(session.as_ref());
    if let Err(e) = session.shutdown() {
        tracing::warn!("Failed to shutdown NVML: {}", e);
    }
    result
}
