use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use gpu_inventory::config::{DEFAULT_FREE_PERCENTAGE, TS_VISIBLE_DEVICES};
use gpu_inventory::InventoryConfig;
use utils::version;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(flatten)]
    pub inventory: InventoryArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the indices of free GPUs, comma separated
    List,
    /// Print per-GPU memory, compute mode and availability
    Status(StatusArgs),
}

#[derive(Args)]
pub struct InventoryArgs {
    /// Percentage of total memory that must be free for a GPU to count as free
    #[arg(
        long,
        global = true,
        env = "GPU_INVENTORY_FREE_PERCENTAGE",
        default_value_t = DEFAULT_FREE_PERCENTAGE
    )]
    pub free_percentage: u32,

    /// Environment variable holding the comma-separated visible GPU indices
    #[arg(long, global = true, default_value = TS_VISIBLE_DEVICES)]
    pub visible_devices_env: String,

    /// NVML library to load when the default lookup fails
    #[arg(long, global = true, env = "GPU_INVENTORY_NVML_LIB")]
    pub nvml_lib_path: Option<PathBuf>,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

impl From<InventoryArgs> for InventoryConfig {
    fn from(args: InventoryArgs) -> Self {
        Self {
            free_percentage: args.free_percentage,
            visible_devices_env: args.visible_devices_env,
            nvml_lib_path: args.nvml_lib_path,
        }
    }
}
