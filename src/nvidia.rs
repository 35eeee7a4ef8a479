// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! NVIDIA backend over the `nvidia-settings` command line tool.
//!
//! Fan control requires a running X server and the Coolbits option enabled
//! in the X configuration. Queries use terse output (`-t`); assignments are
//! confirmed by parsing the `assigned value N.` text the tool prints.

use crate::error::{ControlError, Result};
use crate::hardware::{self, ControlMode, DeviceDescriptor, FanHardware};
use std::process::{Command, Output, Stdio};

/// Default program name, resolved through `PATH`.
pub const NVIDIA_SETTINGS: &str = "nvidia-settings";

const ATTR_CORE_TEMP: &str = "GPUCoreTemp";
const ATTR_FAN_SPEED: &str = "GPUCurrentFanSpeed";
const ATTR_FAN_RPM: &str = "GPUCurrentFanSpeedRPM";
const ATTR_CONTROL_STATE: &str = "GPUFanControlState";
const ATTR_TARGET_SPEED: &str = "GPUTargetFanSpeed";
const ATTR_DRIVER_VERSION: &str = "NvidiaDriverVersion";

/// `FanHardware` implementation that shells out to `nvidia-settings`.
#[derive(Debug, Clone)]
pub struct NvidiaSettings {
    program: String,
    display: Option<String>,
}

impl Default for NvidiaSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl NvidiaSettings {
    pub fn new() -> Self {
        Self {
            program: NVIDIA_SETTINGS.to_string(),
            display: None,
        }
    }

    /// Use a specific `nvidia-settings` binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Target a specific X display (passed as `--display`).
    pub fn with_display(mut self, display: Option<String>) -> Self {
        self.display = display;
        self
    }

    fn run(&self, args: &[String]) -> std::io::Result<Output> {
        let mut cmd = Command::new(&self.program);
        if let Some(display) = &self.display {
            cmd.arg("--display").arg(display);
        }
        log::trace!("{} {}", self.program, args.join(" "));
        cmd.args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .output()
    }

    /// Run a query and return stdout, mapping failures to `HardwareQuery`.
    fn query(&self, attr: &str) -> Result<String> {
        let output = self
            .run(&["-t".to_string(), "-q".to_string(), attr.to_string()])
            .map_err(|e| {
                ControlError::HardwareQuery(format!("failed to run {}: {e}", self.program))
            })?;
        if !output.status.success() {
            return Err(ControlError::HardwareQuery(format!(
                "query {attr} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn query_int(&self, target: &str, attribute: &str) -> Result<i32> {
        let attr = format!("[{target}]/{attribute}");
        let text = self.query(&attr)?;
        parse_integer(&text).ok_or_else(|| {
            ControlError::HardwareQuery(format!("unexpected output for {attr}: {:?}", text.trim()))
        })
    }

    /// Assign an attribute and return stdout, mapping failures to
    /// `HardwareControl`.
    fn assign(&self, target: &str, attribute: &str, value: i64) -> Result<String> {
        let attr = format!("[{target}]/{attribute}={value}");
        let output = self
            .run(&["-a".to_string(), attr.clone()])
            .map_err(|e| {
                ControlError::HardwareControl(format!("failed to run {}: {e}", self.program))
            })?;
        if !output.status.success() {
            return Err(ControlError::HardwareControl(format!(
                "assignment {attr} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// List `gpus` or `fans` targets as `(index, description)`.
    fn list_targets(&self, kind: &str) -> Result<Vec<(u32, String)>> {
        let output = self
            .run(&["-q".to_string(), format!("{kind}s")])
            .map_err(|e| {
                ControlError::Enumeration(format!("failed to run {}: {e}", self.program))
            })?;
        if !output.status.success() {
            return Err(ControlError::Enumeration(format!(
                "listing {kind}s failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_targets(&String::from_utf8_lossy(&output.stdout), kind))
    }
}

impl FanHardware for NvidiaSettings {
    fn enumerate_devices(&self) -> Result<Vec<DeviceDescriptor>> {
        let gpus = self.list_targets("gpu")?;
        let fans = self.list_targets("fan")?;
        log::debug!("nvidia-settings lists {} GPU(s), {} fan(s)", gpus.len(), fans.len());
        hardware::pair_devices(gpus, fans)
    }

    fn temperature(&self, gpu: u32) -> Result<i32> {
        self.query_int(&format!("gpu:{gpu}"), ATTR_CORE_TEMP)
    }

    fn fan_speed_percent(&self, fan: u32) -> Result<i32> {
        self.query_int(&format!("fan:{fan}"), ATTR_FAN_SPEED)
    }

    fn fan_speed_rpm(&self, fan: u32) -> Result<i32> {
        self.query_int(&format!("fan:{fan}"), ATTR_FAN_RPM)
    }

    fn control_mode(&self, gpu: u32) -> Result<ControlMode> {
        let state = self.query_int(&format!("gpu:{gpu}"), ATTR_CONTROL_STATE)?;
        Ok(mode_from_state(state))
    }

    fn set_control_mode(&self, gpu: u32, mode: ControlMode) -> Result<bool> {
        let wanted = state_from_mode(mode);
        let output = self.assign(&format!("gpu:{gpu}"), ATTR_CONTROL_STATE, wanted)?;
        let confirmed = parse_assigned_value(&output) == Some(wanted);
        if !confirmed {
            log::warn!("gpu:{gpu}: {ATTR_CONTROL_STATE} not confirmed, output: {:?}", output.trim());
            if mode == ControlMode::Manual {
                log::warn!("Is the Coolbits option enabled in /etc/X11/xorg.conf?");
            }
        }
        Ok(confirmed)
    }

    fn set_target_speed_percent(&self, fan: u32, percent: u8) -> Result<()> {
        self.assign(&format!("fan:{fan}"), ATTR_TARGET_SPEED, i64::from(percent))
            .map(|_| ())
    }

    fn driver_version(&self) -> Result<u32> {
        let text = self.query(ATTR_DRIVER_VERSION)?;
        parse_driver_major(&text).ok_or_else(|| {
            ControlError::HardwareQuery(format!("unexpected driver version: {:?}", text.trim()))
        })
    }
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

fn mode_from_state(state: i32) -> ControlMode {
    if state == 1 {
        ControlMode::Manual
    } else {
        ControlMode::Automatic
    }
}

fn state_from_mode(mode: ControlMode) -> i64 {
    match mode {
        ControlMode::Manual => 1,
        ControlMode::Automatic => 0,
    }
}

/// Parse a terse integer reply such as `"45\n"` or `"45."`.
pub fn parse_integer(text: &str) -> Option<i32> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    line.trim_end_matches('.').parse().ok()
}

/// Extract `N` from `... assigned value N.`
pub fn parse_assigned_value(text: &str) -> Option<i64> {
    const MARKER: &str = "assigned value";
    let start = text.find(MARKER)? + MARKER.len();
    let rest = text[start..].trim_start();
    let end = rest
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
        .map_or(rest.len(), |(i, _)| i);
    rest[..end].parse().ok()
}

/// Major component of a version string such as `535.154.05`.
pub fn parse_driver_major(text: &str) -> Option<u32> {
    text.trim().split('.').next()?.trim().parse().ok()
}

/// Parse a target listing:
///
/// ```text
/// 2 GPUs on host:0
///
///     [0] host:0[gpu:0] (NVIDIA GeForce GTX 1080)
///     [1] host:0[gpu:1] (NVIDIA GeForce RTX 3070)
/// ```
pub fn parse_targets(text: &str, kind: &str) -> Vec<(u32, String)> {
    let tag = format!("[{kind}:");
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            let start = line.find(&tag)? + tag.len();
            let end = start + line[start..].find(']')?;
            let index = line[start..end].parse().ok()?;
            let rest = &line[end + 1..];
            let description = match (rest.find('('), rest.rfind(')')) {
                (Some(open), Some(close)) if open < close => rest[open + 1..close].to_string(),
                _ => format!("{kind}:{index}"),
            };
            Some((index, description))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer("45\n"), Some(45));
        assert_eq!(parse_integer("\n  62.\n"), Some(62));
        assert_eq!(parse_integer("-3"), Some(-3));
        assert_eq!(parse_integer(""), None);
        assert_eq!(parse_integer("n/a"), None);
    }

    #[test]
    fn test_parse_assigned_value() {
        let out = "\n  Attribute 'GPUFanControlState' (host:0[gpu:0]) assigned value 1.\n\n";
        assert_eq!(parse_assigned_value(out), Some(1));
        let out = "  Attribute 'GPUTargetFanSpeed' (host:0[fan:0]) assigned value 75.\n";
        assert_eq!(parse_assigned_value(out), Some(75));
        assert_eq!(parse_assigned_value("ERROR: Error assigning value"), None);
    }

    #[test]
    fn test_parse_driver_major() {
        assert_eq!(parse_driver_major("535.154.05\n"), Some(535));
        assert_eq!(parse_driver_major("304.137"), Some(304));
        assert_eq!(parse_driver_major("unknown"), None);
    }

    #[test]
    fn test_parse_targets() {
        let gpus = "\n2 GPUs on host:0\n\n    [0] host:0[gpu:0] (NVIDIA GeForce GTX 1080)\n\n      \
                    Has the following names:\n        GPU-0\n\n    [1] host:0[gpu:1] (NVIDIA GeForce RTX 3070)\n";
        assert_eq!(
            parse_targets(gpus, "gpu"),
            vec![
                (0, "NVIDIA GeForce GTX 1080".to_string()),
                (1, "NVIDIA GeForce RTX 3070".to_string()),
            ]
        );

        let fans = "1 Fan on host:0\n\n    [0] host:0[fan:0] (Fan 0)\n";
        assert_eq!(parse_targets(fans, "fan"), vec![(0, "Fan 0".to_string())]);
        assert!(parse_targets(fans, "gpu").is_empty());
    }

    #[test]
    fn test_control_state_mapping() {
        assert_eq!(mode_from_state(1), ControlMode::Manual);
        assert_eq!(mode_from_state(0), ControlMode::Automatic);
        assert_eq!(state_from_mode(ControlMode::Manual), 1);
    }

    #[test]
    fn test_missing_program_surfaces_typed_errors() {
        let hw = NvidiaSettings::new().with_program("/nonexistent/nvidia-settings");
        assert!(matches!(hw.temperature(0), Err(ControlError::HardwareQuery(_))));
        assert!(matches!(
            hw.set_target_speed_percent(0, 50),
            Err(ControlError::HardwareControl(_))
        ));
        assert!(matches!(hw.enumerate_devices(), Err(ControlError::Enumeration(_))));
    }
}
