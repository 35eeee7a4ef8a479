// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Error taxonomy shared by the curve model, device controllers, the
//! control loop and the hardware backends.

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, ControlError>;

/// Everything that can stop the controller.
#[derive(Error, Debug)]
pub enum ControlError {
    /// Invalid user configuration (for example an empty curve).
    #[error("configuration error: {0}")]
    Config(String),

    /// The installed driver is older than the supported minimum.
    #[error("driver version {found} is not supported (minimum is {minimum})")]
    DriverVersion { found: u32, minimum: u32 },

    /// Device and fan listings could not be paired.
    #[error("device enumeration failed: {0}")]
    Enumeration(String),

    /// A mode switch was not confirmed or a target write failed.
    #[error("hardware control failed: {0}")]
    HardwareControl(String),

    /// A temperature or fan speed read failed.
    #[error("hardware query failed: {0}")]
    HardwareQuery(String),

    /// A device controller was driven out of order.
    #[error("invalid device state: {0}")]
    InvalidState(String),

    /// No device ended up under manual control.
    #[error("no controllable devices")]
    NoDevices,
}
