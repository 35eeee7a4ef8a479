// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Per-device control state machine.
//!
//! ```text
//! Uninitialized -> ControlEnabled -> { Sampling <-> Actuating } -> Restoring -> Done
//! ```
//!
//! A [`DeviceController`] that reached `ControlEnabled` behaves as a scoped
//! handle on manual fan control: [`DeviceController::restore`] hands control
//! back exactly once, and dropping a controller that still holds manual
//! control restores it.

use crate::curve::{self, CurveModel};
use crate::error::{ControlError, Result};
use crate::hardware::{ControlMode, DeviceDescriptor, FanHardware};
use crate::sampling::SamplingPolicy;
use crate::status::{self, Trend};
use serde::{Deserialize, Serialize};

/// Default temperature rise (ºC between samples) that triggers doping.
pub const DEFAULT_DOPING_THRESHOLD_C: i32 = 10;

/// Default extra speed (percent) added while doping.
pub const DEFAULT_DOPING_INCREMENT_PCT: i32 = 10;

const STATUS_GRAPH_WIDTH: usize = 50;

/// Temporary boost applied when the temperature climbs quickly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DopingPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Rise since the previous sample, in ºC, at which the boost applies.
    #[serde(default = "default_doping_threshold")]
    pub threshold_c: i32,

    /// Percent added to the curve speed.
    #[serde(default = "default_doping_increment")]
    pub increment_pct: i32,
}

impl Default for DopingPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_c: DEFAULT_DOPING_THRESHOLD_C,
            increment_pct: DEFAULT_DOPING_INCREMENT_PCT,
        }
    }
}

impl DopingPolicy {
    /// Speed after doping, given the previous and current temperature.
    pub fn apply(&self, speed: u8, prev_temp: i32, curr_temp: i32) -> u8 {
        if self.enabled && curr_temp.saturating_sub(prev_temp) >= self.threshold_c {
            curve::clamp(i32::from(speed).saturating_add(self.increment_pct))
        } else {
            speed
        }
    }
}

/// Where a device is in its control lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Uninitialized,
    ControlEnabled,
    Sampling,
    Actuating,
    Restoring,
    Done,
}

/// Drives one GPU fan from its temperature.
pub struct DeviceController<'a, H: FanHardware + ?Sized> {
    hw: &'a H,
    curve: &'a CurveModel,
    sampling: SamplingPolicy,
    doping: DopingPolicy,
    device: DeviceDescriptor,
    state: ControlState,
    initial_mode: Option<ControlMode>,
    last_temp: Option<i32>,
    last_target: Option<u8>,
    last_interval: f64,
}

impl<'a, H: FanHardware + ?Sized> DeviceController<'a, H> {
    pub fn new(
        hw: &'a H,
        curve: &'a CurveModel,
        sampling: SamplingPolicy,
        doping: DopingPolicy,
        device: DeviceDescriptor,
    ) -> Self {
        Self {
            hw,
            curve,
            sampling,
            doping,
            device,
            state: ControlState::Uninitialized,
            initial_mode: None,
            last_temp: None,
            last_target: None,
            last_interval: sampling.max_interval_secs,
        }
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn initial_mode(&self) -> Option<ControlMode> {
        self.initial_mode
    }

    pub fn last_temperature(&self) -> Option<i32> {
        self.last_temp
    }

    pub fn last_target(&self) -> Option<u8> {
        self.last_target
    }

    pub fn last_interval(&self) -> f64 {
        self.last_interval
    }

    /// Whether this controller currently holds manual fan control.
    pub fn is_under_control(&self) -> bool {
        matches!(
            self.state,
            ControlState::ControlEnabled | ControlState::Sampling | ControlState::Actuating
        )
    }

    /// Record the control mode in force before this controller takes over.
    /// Only the first call queries the hardware.
    pub fn capture_initial_mode(&mut self) -> Result<ControlMode> {
        if let Some(mode) = self.initial_mode {
            return Ok(mode);
        }
        let mode = self.hw.control_mode(self.device.gpu)?;
        log::debug!("{}: fan control is {mode} at start", self.device);
        self.initial_mode = Some(mode);
        Ok(mode)
    }

    /// Switch the device to manual fan control. The switch must be confirmed
    /// by the hardware; otherwise target commands could be silently ignored.
    pub fn enable_control(&mut self) -> Result<()> {
        if self.state != ControlState::Uninitialized {
            return Err(ControlError::InvalidState(format!(
                "{}: enable requested in state {:?}",
                self.device, self.state
            )));
        }
        if self.initial_mode.is_none() {
            return Err(ControlError::InvalidState(format!(
                "{}: initial control mode not captured",
                self.device
            )));
        }

        if !self.hw.set_control_mode(self.device.gpu, ControlMode::Manual)? {
            return Err(ControlError::HardwareControl(format!(
                "{}: manual fan control was not confirmed",
                self.device
            )));
        }

        self.state = ControlState::ControlEnabled;
        match self.hw.fan_speed_percent(self.device.fan) {
            Ok(speed) => log::info!("{}: manual fan control enabled at {speed}%", self.device),
            Err(_) => log::info!("{}: manual fan control enabled", self.device),
        }
        Ok(())
    }

    /// One sample/actuate step. Returns the recommended seconds until the
    /// next step.
    pub fn tick(&mut self) -> Result<f64> {
        if !self.is_under_control() {
            return Err(ControlError::InvalidState(format!(
                "{}: tick requested in state {:?}",
                self.device, self.state
            )));
        }

        self.state = ControlState::Sampling;
        let temp = self.hw.temperature(self.device.gpu)?;
        let prev_temp = self.last_temp.unwrap_or(temp);

        let mut target = self.curve.evaluate(temp);
        let boosted = self.doping.apply(target, prev_temp, temp);
        if boosted != target {
            log::debug!(
                "{}: temperature rose {} ºC, boosting {target}% to {boosted}%",
                self.device,
                temp - prev_temp
            );
            target = boosted;
        }

        let interval = self
            .sampling
            .next_interval(prev_temp, temp, self.last_interval);

        self.state = ControlState::Actuating;
        let trend = Trend::between(self.last_target, target);
        if self.last_target != Some(target) {
            self.hw.set_target_speed_percent(self.device.fan, target)?;
            self.last_target = Some(target);
        }

        self.last_temp = Some(temp);
        self.last_interval = interval;
        self.state = ControlState::Sampling;

        self.log_status(temp, target, trend);
        Ok(interval)
    }

    /// Hand fan control back. Switches to automatic only if the fan was in
    /// automatic mode before this controller started. Does nothing unless the
    /// controller currently holds manual control, so repeated calls are safe.
    pub fn restore(&mut self) -> Result<()> {
        if !self.is_under_control() {
            return Ok(());
        }
        self.state = ControlState::Restoring;

        let result = if self.initial_mode == Some(ControlMode::Manual) {
            log::info!(
                "{}: fan control was already manual at start, leaving it manual",
                self.device
            );
            Ok(())
        } else {
            log::info!("{}: restoring automatic fan control", self.device);
            match self.hw.set_control_mode(self.device.gpu, ControlMode::Automatic) {
                Ok(true) => Ok(()),
                Ok(false) => Err(ControlError::HardwareControl(format!(
                    "{}: automatic fan control was not confirmed",
                    self.device
                ))),
                Err(e) => Err(e),
            }
        };

        self.state = ControlState::Done;
        result
    }

    // RPM is informational; a failed read never interrupts control.
    fn log_status(&self, temp: i32, target: u8, trend: Trend) {
        if !log::log_enabled!(log::Level::Info) {
            return;
        }
        let rpm = match self.hw.fan_speed_rpm(self.device.fan) {
            Ok(rpm) => format!("{rpm:4}"),
            Err(e) => {
                log::debug!("{}: {e}", self.device);
                "   ?".to_string()
            }
        };
        let graph = status::line_graph(
            i32::from(target),
            curve::SPEED_MIN,
            curve::SPEED_MAX,
            STATUS_GRAPH_WIDTH,
            "%",
            trend,
        );
        log::info!(
            "gpu:{} temp is {temp} ºC; fan spins at {rpm} RPM  {graph}",
            self.device.gpu
        );
    }
}

impl<H: FanHardware + ?Sized> Drop for DeviceController<'_, H> {
    fn drop(&mut self) {
        if self.is_under_control() {
            log::warn!("{}: released while under manual control", self.device);
            if let Err(e) = self.restore() {
                log::error!("{e}");
            }
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_doping_threshold() -> i32 {
    DEFAULT_DOPING_THRESHOLD_C
}

fn default_doping_increment() -> i32 {
    DEFAULT_DOPING_INCREMENT_PCT
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    struct FakeGpu {
        mode: ControlMode,
        confirm_manual: bool,
        temps: RefCell<VecDeque<i32>>,
        targets: RefCell<Vec<u8>>,
        mode_requests: RefCell<Vec<ControlMode>>,
    }

    impl FakeGpu {
        fn new(mode: ControlMode, temps: &[i32]) -> Self {
            Self {
                mode,
                confirm_manual: true,
                temps: RefCell::new(temps.iter().copied().collect()),
                targets: RefCell::new(Vec::new()),
                mode_requests: RefCell::new(Vec::new()),
            }
        }

        fn automatic_requests(&self) -> usize {
            self.mode_requests
                .borrow()
                .iter()
                .filter(|m| **m == ControlMode::Automatic)
                .count()
        }
    }

    impl FanHardware for FakeGpu {
        fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>> {
            Ok(vec![descriptor()])
        }
        fn temperature(&self, _gpu: u32) -> Result<i32> {
            self.temps
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| ControlError::HardwareQuery("no reading".into()))
        }
        fn fan_speed_percent(&self, _fan: u32) -> Result<i32> {
            Ok(self.targets.borrow().last().copied().map_or(0, i32::from))
        }
        fn fan_speed_rpm(&self, _fan: u32) -> Result<i32> {
            Ok(1200)
        }
        fn control_mode(&self, _gpu: u32) -> Result<ControlMode> {
            Ok(self.mode)
        }
        fn set_control_mode(&self, _gpu: u32, mode: ControlMode) -> Result<bool> {
            self.mode_requests.borrow_mut().push(mode);
            Ok(mode == ControlMode::Automatic || self.confirm_manual)
        }
        fn set_target_speed_percent(&self, _fan: u32, percent: u8) -> Result<()> {
            self.targets.borrow_mut().push(percent);
            Ok(())
        }
        fn driver_version(&self) -> Result<u32> {
            Ok(535)
        }
    }

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor {
            gpu: 0,
            fan: 0,
            description: "Test GPU".to_string(),
        }
    }

    fn curve() -> CurveModel {
        CurveModel::build(&curve::default_points()).unwrap()
    }

    fn controller<'a>(hw: &'a FakeGpu, curve: &'a CurveModel) -> DeviceController<'a, FakeGpu> {
        DeviceController::new(
            hw,
            curve,
            SamplingPolicy::default(),
            DopingPolicy::default(),
            descriptor(),
        )
    }

    fn enabled<'a>(hw: &'a FakeGpu, curve: &'a CurveModel) -> DeviceController<'a, FakeGpu> {
        let mut ctl = controller(hw, curve);
        ctl.capture_initial_mode().unwrap();
        ctl.enable_control().unwrap();
        ctl
    }

    #[test]
    fn test_enable_requires_captured_mode() {
        let hw = FakeGpu::new(ControlMode::Automatic, &[]);
        let curve = curve();
        let mut ctl = controller(&hw, &curve);
        assert!(matches!(ctl.enable_control(), Err(ControlError::InvalidState(_))));
        assert!(hw.mode_requests.borrow().is_empty());
    }

    #[test]
    fn test_initial_mode_captured_once() {
        let hw = FakeGpu::new(ControlMode::Automatic, &[]);
        let curve = curve();
        let mut ctl = enabled(&hw, &curve);
        // Already manual now, but the captured value must not change
        assert_eq!(ctl.capture_initial_mode().unwrap(), ControlMode::Automatic);
        assert_eq!(ctl.state(), ControlState::ControlEnabled);
        ctl.restore().unwrap();
    }

    #[test]
    fn test_unconfirmed_enable_stays_uninitialized() {
        let mut hw = FakeGpu::new(ControlMode::Automatic, &[]);
        hw.confirm_manual = false;
        let curve = curve();
        let mut ctl = controller(&hw, &curve);
        ctl.capture_initial_mode().unwrap();
        assert!(matches!(ctl.enable_control(), Err(ControlError::HardwareControl(_))));
        assert_eq!(ctl.state(), ControlState::Uninitialized);

        ctl.restore().unwrap();
        drop(ctl);
        assert_eq!(hw.automatic_requests(), 0);
    }

    #[test]
    fn test_tick_before_enable_is_rejected() {
        let hw = FakeGpu::new(ControlMode::Automatic, &[50]);
        let curve = curve();
        let mut ctl = controller(&hw, &curve);
        assert!(matches!(ctl.tick(), Err(ControlError::InvalidState(_))));
    }

    #[test]
    fn test_identical_targets_write_once() {
        let hw = FakeGpu::new(ControlMode::Automatic, &[45, 45, 45, 45]);
        let curve = curve();
        let mut ctl = enabled(&hw, &curve);
        for _ in 0..4 {
            assert_eq!(ctl.tick().unwrap(), 10.0);
        }
        assert_eq!(*hw.targets.borrow(), vec![20]);
        assert_eq!(ctl.last_target(), Some(20));
        assert_eq!(ctl.state(), ControlState::Sampling);
    }

    #[test]
    fn test_doping_on_fast_rise() {
        let hw = FakeGpu::new(ControlMode::Automatic, &[50, 62, 63]);
        let curve = curve();
        let mut ctl = enabled(&hw, &curve);

        // First sample has no previous temperature: no boost
        assert_eq!(ctl.tick().unwrap(), 10.0);
        // +12 ºC: curve gives 76, boosted to 86; 12 ºC / 10 s is past the warn rate
        assert_eq!(ctl.tick().unwrap(), 1.0);
        // +1 ºC over 1 s: still at the warn rate, no boost
        assert_eq!(ctl.tick().unwrap(), 1.0);

        assert_eq!(*hw.targets.borrow(), vec![40, 86, 76]);
        assert_eq!(ctl.last_temperature(), Some(63));
    }

    #[test]
    fn test_doping_is_clamped() {
        let hw = FakeGpu::new(ControlMode::Automatic, &[80, 95]);
        let curve = curve();
        let mut ctl = enabled(&hw, &curve);
        ctl.tick().unwrap();
        ctl.tick().unwrap();
        assert_eq!(*hw.targets.borrow(), vec![87, 100]);
    }

    #[test]
    fn test_doping_disabled() {
        let policy = DopingPolicy {
            enabled: false,
            ..DopingPolicy::default()
        };
        assert_eq!(policy.apply(40, 30, 60), 40);
        assert_eq!(DopingPolicy::default().apply(40, 30, 40), 50);
        assert_eq!(DopingPolicy::default().apply(40, 30, 39), 40);
    }

    #[test]
    fn test_doping_saturates_on_extreme_values() {
        let policy = DopingPolicy {
            increment_pct: i32::MAX,
            ..DopingPolicy::default()
        };
        assert_eq!(policy.apply(40, 30, 45), 100);

        let policy = DopingPolicy {
            threshold_c: 0,
            ..DopingPolicy::default()
        };
        assert_eq!(policy.apply(40, i32::MIN, i32::MAX), 50);
    }

    #[test]
    fn test_read_failure_propagates() {
        let hw = FakeGpu::new(ControlMode::Automatic, &[50]);
        let curve = curve();
        let mut ctl = enabled(&hw, &curve);
        ctl.tick().unwrap();
        assert!(matches!(ctl.tick(), Err(ControlError::HardwareQuery(_))));
        assert!(ctl.is_under_control());
    }

    #[test]
    fn test_restore_to_automatic_once() {
        let hw = FakeGpu::new(ControlMode::Automatic, &[50]);
        let curve = curve();
        let mut ctl = enabled(&hw, &curve);
        ctl.tick().unwrap();
        ctl.restore().unwrap();
        ctl.restore().unwrap();
        assert_eq!(ctl.state(), ControlState::Done);
        drop(ctl);
        assert_eq!(hw.automatic_requests(), 1);
    }

    #[test]
    fn test_restore_leaves_initially_manual_fan_alone() {
        let hw = FakeGpu::new(ControlMode::Manual, &[50]);
        let curve = curve();
        let mut ctl = enabled(&hw, &curve);
        ctl.tick().unwrap();
        ctl.restore().unwrap();
        assert_eq!(ctl.state(), ControlState::Done);
        assert_eq!(hw.automatic_requests(), 0);
    }

    #[test]
    fn test_drop_restores() {
        let hw = FakeGpu::new(ControlMode::Automatic, &[50]);
        let curve = curve();
        {
            let mut ctl = enabled(&hw, &curve);
            ctl.tick().unwrap();
        }
        assert_eq!(hw.automatic_requests(), 1);
    }
}
