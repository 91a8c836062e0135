mod cli;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use gpu_inventory::nvml::NvmlLibrary;
use gpu_inventory::nvml::NvmlProvider;
use gpu_inventory::DeviceStatus;
use gpu_inventory::GpuInventory;
use gpu_inventory::InventoryConfig;
use utils::version;

use crate::cli::Cli;
use crate::cli::Commands;
use crate::cli::StatusArgs;

const MIB: u64 = 1024 * 1024;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    utils::logging::init();
    tracing::debug!("gpu-inventory {}", &**version::VERSION);

    let config = InventoryConfig::from(cli.inventory);
    let provider = NvmlLibrary::new(config.nvml_lib_path.clone());
    let inventory = initialize_inventory(provider, &config)?;

    let result = match cli.command {
        Commands::List => run_list(&inventory),
        Commands::Status(status_args) => run_status(&inventory, &status_args),
    };

    inventory.teardown();
    result
}

/// Initialization failures are fatal to the binary; log them before exiting.
fn initialize_inventory<P: NvmlProvider>(
    provider: P,
    config: &InventoryConfig,
) -> Result<GpuInventory<P>> {
    match GpuInventory::initialize(provider, config) {
        Ok(inventory) => Ok(inventory),
        Err(e) => {
            tracing::error!("Failed to initialize GPU inventory: {}", e);
            Err(e).context("failed to initialize GPU inventory")
        }
    }
}

fn run_list(inventory: &GpuInventory<NvmlLibrary>) -> Result<()> {
    let free = inventory
        .list_free_devices()
        .iter()
        .map(|index| index.to_string())
        .collect::<Vec<String>>()
        .join(",");
    println!("{free}");
    Ok(())
}

fn run_status(inventory: &GpuInventory<NvmlLibrary>, args: &StatusArgs) -> Result<()> {
    let statuses = inventory.scan().context("failed to scan GPUs")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    println!("GPU\tMEMORY FREE/TOTAL\tCOMPUTE MODE\tPROCESSES\tAVAILABILITY");
    for status in &statuses {
        println!("{}", format_status(status));
    }
    Ok(())
}

fn format_status(status: &DeviceStatus) -> String {
    let snapshot = &status.snapshot;
    format!(
        "{}\t{}/{} MiB\t{}\t{}\t{}",
        snapshot.index,
        snapshot.memory.free / MIB,
        snapshot.memory.total / MIB,
        snapshot.compute_mode,
        snapshot.running_processes,
        status.availability,
    )
}

#[cfg(test)]
mod tests {
    use gpu_inventory::inventory::DeviceSnapshot;
    use gpu_inventory::nvml::ComputeMode;
    use gpu_inventory::nvml::MemoryInfo;
    use gpu_inventory::Availability;
    use gpu_inventory::nvml::NvmlInterface;
    use gpu_inventory::BusyReason;
    use gpu_inventory::InventoryError;
    use nvml_wrapper::error::NvmlError;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    struct MissingDriver;

    impl NvmlProvider for MissingDriver {
        fn open(&self) -> Result<Box<dyn NvmlInterface>, NvmlError> {
            Err(NvmlError::DriverNotLoaded)
        }
    }

    #[test]
    fn initialization_failure_is_fatal() {
        let err = initialize_inventory(MissingDriver, &InventoryConfig::default())
            .err()
            .expect("initialization should fail");
        assert_eq!(err.to_string(), "failed to initialize GPU inventory");
        assert!(matches!(
            err.downcast_ref::<InventoryError>(),
            Some(InventoryError::SessionInit(NvmlError::DriverNotLoaded))
        ));
    }

    #[test]
    fn formats_status_row() {
        let status = DeviceStatus {
            snapshot: DeviceSnapshot {
                index: 1,
                memory: MemoryInfo {
                    free: 2048 * MIB,
                    total: 8192 * MIB,
                },
                compute_mode: ComputeMode::ExclusiveProcess,
                running_processes: 1,
            },
            availability: Availability::Busy(BusyReason::ExclusiveProcessOccupied),
            in_use: false,
        };
        assert_eq!(
            format_status(&status),
            "1\t2048/8192 MiB\texclusive_process\t1\tbusy (exclusive process occupied)"
        );
    }

    #[test]
    fn status_serializes_flat() {
        let status = DeviceStatus {
            snapshot: DeviceSnapshot {
                index: 0,
                memory: MemoryInfo {
                    free: 10,
                    total: 10,
                },
                compute_mode: ComputeMode::Default,
                running_processes: 0,
            },
            availability: Availability::Free,
            in_use: true,
        };
        let value = serde_json::to_value(&status).expect("should serialize");
        assert_eq!(
            value,
            serde_json::json!({
                "index": 0,
                "memory": { "free": 10, "total": 10 },
                "compute_mode": "default",
                "running_processes": 0,
                "availability": { "state": "free" },
                "in_use": true,
            })
        );
    }
}
