use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

/// Percentage of total memory that must be free for a device to count as free.
pub const DEFAULT_FREE_PERCENTAGE: u32 = 90;
/// Environment variable holding the caller's device visibility list.
pub const TS_VISIBLE_DEVICES: &str = "TS_VISIBLE_DEVICES";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    /// Initial free-memory threshold, in percent.
    pub free_percentage: u32,
    /// Name of the environment variable read on every scan.
    pub visible_devices_env: String,
    /// NVML library tried when the default lookup fails.
    pub nvml_lib_path: Option<PathBuf>,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            free_percentage: DEFAULT_FREE_PERCENTAGE,
            visible_devices_env: TS_VISIBLE_DEVICES.to_string(),
            nvml_lib_path: None,
        }
    }
}
