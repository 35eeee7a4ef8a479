// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Configuration file handling.
//!
//! Curve points and control tuning live in a TOML file.
//! Default path: `/etc/gpu-fan-curve/config.toml`

use crate::curve::{self, CurveModel, CurvePoint};
use crate::device::DopingPolicy;
use crate::error::{ControlError, Result};
use crate::nvidia::NVIDIA_SETTINGS;
use crate::orchestrator::{EnableFailurePolicy, LoopSettings};
use crate::sampling::{MAX_INTERVAL_SECS, MIN_INTERVAL_SECS, SamplingPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Largest doping increment, in percent.
const MAX_DOPING_INCREMENT_PCT: i32 = 100;

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/gpu-fan-curve/config.toml";

/// Oldest driver series with `GPUFanControlState` support.
pub const DEFAULT_MIN_DRIVER_VERSION: u32 = 304;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub curve: CurveConfig,

    #[serde(default)]
    pub sampling: SamplingPolicy,

    #[serde(default)]
    pub doping: DopingPolicy,

    #[serde(default)]
    pub driver: DriverConfig,

    #[serde(default)]
    pub control: ControlConfig,
}

/// Curve points as `[temperature, speed]` pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveConfig {
    #[serde(default = "curve::default_points")]
    pub points: Vec<CurvePoint>,
}

impl Default for CurveConfig {
    fn default() -> Self {
        Self {
            points: curve::default_points(),
        }
    }
}

/// Driver and tool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Refuse to start below this driver major version.
    #[serde(default = "default_min_driver_version")]
    pub min_version: u32,

    /// `nvidia-settings` binary.
    #[serde(default = "default_program")]
    pub program: String,

    /// X display to talk to, if not the one in `DISPLAY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            min_version: DEFAULT_MIN_DRIVER_VERSION,
            program: NVIDIA_SETTINGS.to_string(),
            display: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default)]
    pub on_enable_failure: EnableFailurePolicy,
}

impl Config {
    /// Reject values the control loop cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.curve.points.is_empty() {
            return Err(ControlError::Config("curve has no points".to_string()));
        }
        if !(self.sampling.warn_rate.is_finite() && self.sampling.warn_rate > 0.0) {
            return Err(ControlError::Config(format!(
                "sampling.warn_rate must be positive, got {}",
                self.sampling.warn_rate
            )));
        }
        if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&self.sampling.max_interval_secs) {
            return Err(ControlError::Config(format!(
                "sampling.max_interval_secs must be within {MIN_INTERVAL_SECS}..={MAX_INTERVAL_SECS}, got {}",
                self.sampling.max_interval_secs
            )));
        }
        if self.doping.threshold_c < 0 {
            return Err(ControlError::Config(format!(
                "doping.threshold_c must not be negative, got {}",
                self.doping.threshold_c
            )));
        }
        if !(0..=MAX_DOPING_INCREMENT_PCT).contains(&self.doping.increment_pct) {
            return Err(ControlError::Config(format!(
                "doping.increment_pct must be within 0..={MAX_DOPING_INCREMENT_PCT}, got {}",
                self.doping.increment_pct
            )));
        }
        Ok(())
    }

    pub fn build_curve(&self) -> Result<CurveModel> {
        CurveModel::build(&self.curve.points)
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            sampling: self.sampling,
            doping: self.doping,
            on_enable_failure: self.control.on_enable_failure,
        }
    }
}

// ---------------------------------------------------------------------------
// Load / Save
// ---------------------------------------------------------------------------

/// Read and validate the config at `path`. A missing file means the
/// built-in curve and tuning.
pub fn load_config(path: &Path) -> Result<Config> {
    let config = match fs::read_to_string(path) {
        Ok(contents) => {
            let config = parse_config(&contents)
                .map_err(|e| ControlError::Config(format!("{}: {e}", path.display())))?;
            log::info!("Loaded config from {}", path.display());
            config
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::info!("No config file at {}, using the built-in curve", path.display());
            Config::default()
        }
        Err(e) => {
            return Err(ControlError::Config(format!(
                "cannot read {}: {e}",
                path.display()
            )));
        }
    };

    config.validate()?;
    Ok(config)
}

/// Parse TOML text into a config. Does not validate.
pub fn parse_config(contents: &str) -> Result<Config> {
    toml::from_str(contents).map_err(|e| ControlError::Config(e.to_string()))
}

/// Write a validated config as TOML, creating its directory.
pub fn save_config(path: &Path, config: &Config) -> Result<()> {
    config.validate()?;
    let contents = toml::to_string_pretty(config)
        .map_err(|e| ControlError::Config(format!("cannot serialize config: {e}")))?;

    let write = |path: &Path| -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, &contents)
    };
    write(path)
        .map_err(|e| ControlError::Config(format!("cannot write {}: {e}", path.display())))?;

    log::info!("Wrote config to {}", path.display());
    Ok(())
}

/// Config path given on the command line, or the system default.
pub fn resolve_config_path(cli_path: Option<&Path>) -> PathBuf {
    cli_path.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), Path::to_path_buf)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn default_min_driver_version() -> u32 {
    DEFAULT_MIN_DRIVER_VERSION
}

fn default_program() -> String {
    NVIDIA_SETTINGS.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.curve.points, curve::default_points());
        assert_eq!(cfg.sampling.max_interval_secs, 10.0);
        assert_eq!(cfg.sampling.warn_rate, 1.0);
        assert!(cfg.doping.enabled);
        assert_eq!(cfg.doping.threshold_c, 10);
        assert_eq!(cfg.doping.increment_pct, 10);
        assert_eq!(cfg.control.on_enable_failure, EnableFailurePolicy::Abort);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(parse_config("").unwrap(), Config::default());
    }

    #[test]
    fn test_parse_partial_document() {
        let cfg = parse_config(
            r#"
[curve]
points = [[30, 20], [60, 60], [85, 100]]

[sampling]
max_interval_secs = 5.0

[doping]
enabled = false

[control]
on_enable_failure = "skip"
"#,
        )
        .unwrap();

        assert_eq!(cfg.curve.points[1], CurvePoint::new(60, 60));
        assert_eq!(cfg.sampling.max_interval_secs, 5.0);
        assert_eq!(cfg.sampling.warn_rate, 1.0);
        assert!(!cfg.doping.enabled);
        assert_eq!(cfg.doping.threshold_c, 10);
        assert_eq!(cfg.driver.program, "nvidia-settings");
        assert_eq!(cfg.control.on_enable_failure, EnableFailurePolicy::Skip);

        let settings = cfg.loop_settings();
        assert_eq!(settings.on_enable_failure, EnableFailurePolicy::Skip);
        assert_eq!(cfg.build_curve().unwrap().evaluate(45), 40);
    }

    #[test]
    fn test_parse_error_is_config_error() {
        let err = parse_config("[curve]\npoints = \"hot\"\n").unwrap_err();
        assert!(matches!(err, ControlError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.curve.points.clear();
        assert!(matches!(cfg.validate(), Err(ControlError::Config(_))));

        let mut cfg = Config::default();
        cfg.sampling.warn_rate = 0.0;
        assert!(matches!(cfg.validate(), Err(ControlError::Config(_))));

        let mut cfg = Config::default();
        cfg.sampling.max_interval_secs = 0.5;
        assert!(matches!(cfg.validate(), Err(ControlError::Config(_))));

        // Values that would overflow the doping sum or the sleep duration
        for text in [
            "[doping]\nincrement_pct = 2147483647\n",
            "[doping]\nincrement_pct = -1\n",
            "[doping]\nthreshold_c = -1\n",
            "[sampling]\nmax_interval_secs = 1e30\n",
            "[sampling]\nmax_interval_secs = 3600.5\n",
        ] {
            let cfg = parse_config(text).unwrap();
            assert!(
                matches!(cfg.validate(), Err(ControlError::Config(_))),
                "accepted {text:?}"
            );
        }

        let cfg = parse_config(
            "[doping]\nthreshold_c = 0\nincrement_pct = 100\n[sampling]\nmax_interval_secs = 3600.0\n",
        )
        .unwrap();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_load_rejects_out_of_range_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[doping]\nincrement_pct = 2147483647\n").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ControlError::Config(_)));

        let mut cfg = Config::default();
        cfg.doping.increment_pct = 500;
        assert!(save_config(&path, &cfg).is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        cfg.driver.display = Some(":1".to_string());
        cfg.doping.increment_pct = 15;
        save_config(&path, &cfg).unwrap();

        assert_eq!(load_config(&path).unwrap(), cfg);
    }

    #[test]
    fn test_resolve_config_path() {
        assert_eq!(
            resolve_config_path(None),
            PathBuf::from(DEFAULT_CONFIG_PATH)
        );
        assert_eq!(
            resolve_config_path(Some(Path::new("/tmp/fans.toml"))),
            PathBuf::from("/tmp/fans.toml")
        );
    }
}
