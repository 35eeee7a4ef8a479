// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! GPU fan curve controller.
//!
//! Samples GPU temperatures, drives fan speed along a piecewise-linear curve
//! with an adaptive sampling interval, and always hands fan control back to
//! the driver when it stops.

pub mod config;
pub mod curve;
pub mod device;
pub mod error;
pub mod hardware;
pub mod nvidia;
pub mod orchestrator;
pub mod sampling;
pub mod status;

pub use error::{ControlError, Result};
