//! Host configuration and parsing of provider/mode names.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::backend::{PowerOpMode, ServiceProvider};

/// Configuration for talking to the local virtualization host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct HostConfig {
    /// Path to the `vmrun` control tool. Bare names are looked up in `PATH`.
    pub vmrun_path: PathBuf,

    /// Hypervisor product to connect to.
    pub provider: ServiceProvider,

    /// How running VMs are powered off.
    pub power_mode: PowerOpMode,
}

impl HostConfig {
    /// Create a config for the given `vmrun` binary with default provider
    /// and a guest-initiated power-off.
    #[must_use]
    pub fn new(vmrun_path: PathBuf) -> Self {
        Self {
            vmrun_path,
            provider: ServiceProvider::default(),
            power_mode: PowerOpMode::default(),
        }
    }

    /// Set the hypervisor product.
    #[must_use]
    pub fn with_provider(mut self, provider: ServiceProvider) -> Self {
        self.provider = provider;
        self
    }

    /// Set the power-off mode.
    #[must_use]
    pub fn with_power_mode(mut self, power_mode: PowerOpMode) -> Self {
        self.power_mode = power_mode;
        self
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::new(PathBuf::from(default_vmrun_path()))
    }
}

/// Where `vmrun` lives on a default install of the platform.
#[must_use]
pub fn default_vmrun_path() -> &'static str {
    if cfg!(windows) {
        r"C:\Program Files (x86)\VMware\VMware Workstation\vmrun.exe"
    } else if cfg!(target_os = "macos") {
        "/Applications/VMware Fusion.app/Contents/Library/vmrun"
    } else {
        "vmrun"
    }
}

/// A provider or power-mode name that is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}' (expected one of: {expected})")]
pub struct ParseNameError {
    kind: &'static str,
    value: String,
    expected: &'static str,
}

impl ServiceProvider {
    /// The `-T` host type `vmrun` expects for this provider.
    #[must_use]
    pub const fn host_type(self) -> &'static str {
        match self {
            Self::Workstation => "ws",
            Self::Player => "player",
            Self::Fusion => "fusion",
        }
    }
}

impl FromStr for ServiceProvider {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ws" | "workstation" => Ok(Self::Workstation),
            "player" => Ok(Self::Player),
            "fusion" => Ok(Self::Fusion),
            _ => Err(ParseNameError {
                kind: "provider",
                value: s.to_owned(),
                expected: "workstation, player, fusion",
            }),
        }
    }
}

impl fmt::Display for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Workstation => "workstation",
            Self::Player => "player",
            Self::Fusion => "fusion",
        };
        f.write_str(name)
    }
}

impl PowerOpMode {
    /// The stop mode argument `vmrun` expects.
    #[must_use]
    pub const fn vmrun_arg(self) -> &'static str {
        match self {
            Self::FromGuest => "soft",
            Self::Hard => "hard",
        }
    }
}

impl FromStr for PowerOpMode {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "soft" | "guest" | "from-guest" => Ok(Self::FromGuest),
            "hard" => Ok(Self::Hard),
            _ => Err(ParseNameError {
                kind: "power mode",
                value: s.to_owned(),
                expected: "soft, hard",
            }),
        }
    }
}

impl fmt::Display for PowerOpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.vmrun_arg())
    }
}
