// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Control loop across all devices.
//!
//! Every cycle ticks each enabled device in order and then sleeps for the
//! shortest interval any device asked for. Whatever ends the loop (shutdown,
//! a failed enable, a failed tick) every device that reached manual control
//! is restored exactly once before [`ControlLoop::run`] returns. A shutdown
//! already pending at startup returns before any fan changes hands.

use crate::curve::CurveModel;
use crate::device::{DeviceController, DopingPolicy};
use crate::error::{ControlError, Result};
use crate::hardware::{DeviceDescriptor, FanHardware};
use crate::sampling::{self, SamplingPolicy};
use serde::{Deserialize, Serialize};
use std::future::{self, Future};
use std::pin::Pin;
use tokio::time;

/// What to do when a device refuses manual control at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnableFailurePolicy {
    /// Restore the devices enabled so far and stop.
    #[default]
    Abort,
    /// Leave the device out and keep going with the others.
    Skip,
}

/// Per-run settings shared by every device.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopSettings {
    pub sampling: SamplingPolicy,
    pub doping: DopingPolicy,
    pub on_enable_failure: EnableFailurePolicy,
}

pub struct ControlLoop<'a, H: FanHardware + ?Sized> {
    hw: &'a H,
    curve: &'a CurveModel,
    settings: LoopSettings,
}

impl<'a, H: FanHardware + ?Sized> ControlLoop<'a, H> {
    pub fn new(hw: &'a H, curve: &'a CurveModel, settings: LoopSettings) -> Self {
        Self {
            hw,
            curve,
            settings,
        }
    }

    /// Take manual control of `devices` in order.
    ///
    /// With [`EnableFailurePolicy::Abort`] the first failure restores the
    /// devices already enabled and is returned. With
    /// [`EnableFailurePolicy::Skip`] the failing device is left out.
    pub fn enable_all(
        &self,
        devices: &[DeviceDescriptor],
    ) -> Result<Vec<DeviceController<'a, H>>> {
        let mut enabled = Vec::with_capacity(devices.len());

        for device in devices {
            let mut controller = DeviceController::new(
                self.hw,
                self.curve,
                self.settings.sampling,
                self.settings.doping,
                device.clone(),
            );

            let outcome = controller
                .capture_initial_mode()
                .and_then(|_| controller.enable_control());

            if let Err(e) = outcome {
                match self.settings.on_enable_failure {
                    EnableFailurePolicy::Abort => {
                        log::error!("Could not take control of {device}: {e}");
                        restore_all(&mut enabled);
                        return Err(e);
                    }
                    EnableFailurePolicy::Skip => {
                        log::error!("Could not take control of {device}, skipping it: {e}");
                        continue;
                    }
                }
            }
            enabled.push(controller);
        }

        if enabled.is_empty() {
            return Err(ControlError::NoDevices);
        }
        Ok(enabled)
    }

    /// Run until `shutdown` resolves or an error occurs, then restore.
    pub async fn run<F>(&self, devices: &[DeviceDescriptor], shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        if is_resolved(shutdown.as_mut()).await {
            log::info!("Shutdown requested before taking control");
            return Ok(());
        }

        let mut enabled = self.enable_all(devices)?;
        log::info!("Controlling {} device(s)", enabled.len());

        let result = drive(&mut enabled, shutdown).await;
        if let Err(e) = &result {
            log::error!("Control loop stopped: {e}");
        }

        let restored = restore_all(&mut enabled);
        log::info!("Released {restored} device(s)");
        result
    }
}

/// Poll `shutdown` once without waiting.
async fn is_resolved<F: Future<Output = ()>>(shutdown: Pin<&mut F>) -> bool {
    tokio::select! {
        biased;
        _ = shutdown => true,
        _ = future::ready(()) => false,
    }
}

async fn drive<H, F>(devices: &mut [DeviceController<'_, H>], mut shutdown: Pin<&mut F>) -> Result<()>
where
    H: FanHardware + ?Sized,
    F: Future<Output = ()>,
{
    // A signal that landed while devices were being enabled skips the first tick.
    if is_resolved(shutdown.as_mut()).await {
        log::info!("Shutdown requested");
        return Ok(());
    }

    loop {
        let mut next = f64::INFINITY;
        for device in devices.iter_mut() {
            next = next.min(device.tick()?);
        }

        let pause = sampling::to_duration(next);
        log::debug!("Next sample in {:.2} s", pause.as_secs_f64());

        tokio::select! {
            _ = time::sleep(pause) => {}
            _ = shutdown.as_mut() => {
                log::info!("Shutdown requested");
                return Ok(());
            }
        }
    }
}

/// Restore every device still under manual control. Failures are logged and
/// do not stop the remaining devices from being visited. Returns how many
/// devices were visited.
pub fn restore_all<H: FanHardware + ?Sized>(devices: &mut [DeviceController<'_, H>]) -> usize {
    let mut visited = 0;
    for device in devices.iter_mut().filter(|d| d.is_under_control()) {
        visited += 1;
        if let Err(e) = device.restore() {
            log::error!("Failed to restore {}: {e}", device.device());
        }
    }
    visited
}
