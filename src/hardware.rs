// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Hardware telemetry and control contract.
//!
//! The controller only talks to the GPU through [`FanHardware`]. Calls are
//! synchronous and blocking; the control loop issues them one device at a
//! time.

use crate::error::{ControlError, Result};
use std::fmt;

/// Who drives the fan speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    /// Firmware/driver picks the speed.
    Automatic,
    /// Speed follows explicit target commands.
    Manual,
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMode::Automatic => f.write_str("automatic"),
            ControlMode::Manual => f.write_str("manual"),
        }
    }
}

/// A GPU paired with the fan it drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// GPU index (`[gpu:N]`)
    pub gpu: u32,
    /// Fan index (`[fan:N]`)
    pub fan: u32,
    /// Human-readable name
    pub description: String,
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gpu:{}/fan:{} ({})", self.gpu, self.fan, self.description)
    }
}

/// Temperature reads and fan control for one host.
pub trait FanHardware {
    /// List GPU/fan pairs. Fails when the GPU and fan counts differ.
    fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>>;

    /// Core temperature in ºC.
    fn temperature(&self, gpu: u32) -> Result<i32>;

    /// Current fan speed in percent.
    fn fan_speed_percent(&self, fan: u32) -> Result<i32>;

    /// Current fan speed in RPM.
    fn fan_speed_rpm(&self, fan: u32) -> Result<i32>;

    /// Current control mode of the GPU's fans.
    fn control_mode(&self, gpu: u32) -> Result<ControlMode>;

    /// Request a control mode. Returns whether the hardware confirmed it.
    fn set_control_mode(&self, gpu: u32, mode: ControlMode) -> Result<bool>;

    /// Command a target fan speed in percent.
    fn set_target_speed_percent(&self, fan: u32, percent: u8) -> Result<()>;

    /// Installed driver major version.
    fn driver_version(&self) -> Result<u32>;
}

/// Refuse to run on a driver older than `minimum`.
pub fn require_driver_version<H: FanHardware + ?Sized>(hw: &H, minimum: u32) -> Result<u32> {
    let found = hw.driver_version()?;
    if found < minimum {
        return Err(ControlError::DriverVersion { found, minimum });
    }
    log::info!("Driver version {found} (minimum {minimum})");
    Ok(found)
}

/// Pair GPUs and fans by position. The two listings must be the same length.
pub fn pair_devices(
    gpus: Vec<(u32, String)>,
    fans: Vec<(u32, String)>,
) -> Result<Vec<DeviceDescriptor>> {
    if gpus.len() != fans.len() {
        return Err(ControlError::Enumeration(format!(
            "found {} GPU(s) but {} fan(s)",
            gpus.len(),
            fans.len()
        )));
    }

    Ok(gpus
        .into_iter()
        .zip(fans)
        .map(|((gpu, description), (fan, _))| DeviceDescriptor {
            gpu,
            fan,
            description,
        })
        .collect())
}
