//! Device visibility and driver environment handling

use std::env;

/// Restricts which devices the CUDA runtime exposes to this process.
pub const CUDA_VISIBLE_DEVICES: &str = "CUDA_VISIBLE_DEVICES";
/// Selects how the CUDA runtime numbers devices.
pub const CUDA_DEVICE_ORDER: &str = "CUDA_DEVICE_ORDER";
/// Device ordering that matches NVML indices.
pub const PCI_BUS_ID_ORDER: &str = "PCI_BUS_ID";

/// Clears any inherited device restriction and pins device numbering to PCI
/// bus order, so indices agree between NVML and the CUDA runtime.
pub fn prepare_driver_env() {
    if let Ok(previous) = env::var(CUDA_VISIBLE_DEVICES) {
        tracing::debug!("Removing inherited {}={}", CUDA_VISIBLE_DEVICES, previous);
    }
    env::remove_var(CUDA_VISIBLE_DEVICES);
    env::set_var(CUDA_DEVICE_ORDER, PCI_BUS_ID_ORDER);
}

/// Held by tests that write the CUDA variables themselves.
#[cfg(test)]
pub(crate) static DRIVER_ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Reads the override list from the environment variable `var`.
pub fn read_override(var: &str) -> Option<String> {
    env::var(var).ok()
}

/// Computes the ordered list of device indices a scan should consider.
///
/// With an override, its comma-separated indices are returned in order;
/// indices past `device_count` are kept and left for the scan to skip.
/// Without one, every device `0..device_count` is visible.
pub fn visible_devices(override_list: Option<&str>, device_count: u32) -> Vec<u32> {
    let Some(list) = override_list else {
        return (0..device_count).collect();
    };

    list.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(|token| match token.parse::<u32>() {
            Ok(index) => Some(index),
            Err(e) => {
                tracing::warn!("Ignoring invalid device index {:?}: {}", token, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    #[test]
    fn no_override_yields_full_range() {
        assert_eq!(visible_devices(None, 4), vec![0, 1, 2, 3]);
        assert_eq!(visible_devices(None, 0), Vec::<u32>::new());
    }

    #[test]
    fn override_keeps_order() {
        assert_eq!(visible_devices(Some("2,0"), 4), vec![2, 0]);
    }

    #[test]
    fn override_keeps_out_of_range_entries() {
        assert_eq!(visible_devices(Some("5,1"), 2), vec![5, 1]);
    }

    #[test]
    fn override_skips_garbage() {
        assert_eq!(visible_devices(Some(" 1, ,x,-2,3 "), 4), vec![1, 3]);
    }

    #[test]
    fn empty_override_hides_everything() {
        assert_eq!(visible_devices(Some(""), 4), Vec::<u32>::new());
    }

    #[test]
    fn read_override_from_env() {
        let var = "GPU_INVENTORY_TEST_READ_OVERRIDE";
        env::remove_var(var);
        assert_eq!(read_override(var), None);
        env::set_var(var, "3,1");
        assert_eq!(read_override(var).as_deref(), Some("3,1"));
        env::remove_var(var);
    }

    #[test]
    fn prepare_driver_env_resets_cuda_vars() {
        let _guard = DRIVER_ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        env::set_var(CUDA_VISIBLE_DEVICES, "1");
        env::set_var(CUDA_DEVICE_ORDER, "FASTEST_FIRST");

        prepare_driver_env();

        assert!(env::var(CUDA_VISIBLE_DEVICES).is_err());
        assert_eq!(env::var(CUDA_DEVICE_ORDER).as_deref(), Ok(PCI_BUS_ID_ORDER));
    }
}
