//! Command-line arguments.

use std::path::PathBuf;

use autohalt_executor::config::default_vmrun_path;
use autohalt_executor::{HostConfig, PowerOpMode, ServiceProvider};
use clap::Parser;

/// Powers off every running VM when the user session ends.
#[derive(Debug, Parser)]
#[command(name = "autohalt", version, about)]
pub struct Cli {
    /// Power off all running VMs immediately and exit.
    #[arg(long)]
    pub debug: bool,

    /// Path to the `vmrun` control tool.
    #[arg(long, env = "AUTOHALT_VMRUN", default_value = default_vmrun_path())]
    pub vmrun: PathBuf,

    /// Hypervisor product: ws, player or fusion.
    #[arg(long, env = "AUTOHALT_PROVIDER", default_value_t = ServiceProvider::Workstation)]
    pub provider: ServiceProvider,

    /// How VMs are stopped: soft asks the guest, hard cuts power.
    #[arg(long, env = "AUTOHALT_POWER_MODE", default_value_t = PowerOpMode::FromGuest)]
    pub power_mode: PowerOpMode,
}

impl Cli {
    /// Build the host configuration these arguments describe.
    #[must_use]
    pub fn host_config(&self) -> HostConfig {
        HostConfig::new(self.vmrun.clone())
            .with_provider(self.provider)
            .with_power_mode(self.power_mode)
    }
}
