// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Fan curve definitions and interpolation.
//!
//! A curve maps GPU core temperature (ºC) to a fan speed percentage (0-100).
//! Segment coefficients are computed once when the curve is built, so
//! evaluation is a short scan plus one multiply-add.

use crate::error::{ControlError, Result};
use serde::{Deserialize, Serialize};

/// Lowest commandable fan speed, in percent.
pub const SPEED_MIN: i32 = 0;

/// Highest commandable fan speed, in percent.
pub const SPEED_MAX: i32 = 100;

/// A single point on a fan curve.
///
/// Serialized as a `[temperature, speed]` pair so config files can list
/// points compactly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "(i32, i32)", into = "(i32, i32)")]
pub struct CurvePoint {
    /// Temperature in degrees Celsius
    pub temp_c: i32,
    /// Fan speed in percent
    pub speed: i32,
}

impl CurvePoint {
    pub const fn new(temp_c: i32, speed: i32) -> Self {
        Self { temp_c, speed }
    }
}

impl From<(i32, i32)> for CurvePoint {
    fn from((temp_c, speed): (i32, i32)) -> Self {
        Self { temp_c, speed }
    }
}

impl From<CurvePoint> for (i32, i32) {
    fn from(p: CurvePoint) -> Self {
        (p.temp_c, p.speed)
    }
}

/// Interpolation coefficients between two adjacent points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Segment {
    /// `speed = slope * temp + intercept`
    Linear { slope: f64, intercept: f64 },
    /// Both points share a temperature: a vertical step.
    Degenerate,
}

impl Segment {
    fn between(lo: CurvePoint, hi: CurvePoint) -> Self {
        let (t0, s0) = (lo.temp_c as f64, lo.speed as f64);
        let (t1, s1) = (hi.temp_c as f64, hi.speed as f64);
        if lo.temp_c == hi.temp_c {
            return Segment::Degenerate;
        }
        Segment::Linear {
            slope: (s1 - s0) / (t1 - t0),
            intercept: (t1 * s0 - t0 * s1) / (t1 - t0),
        }
    }
}

/// An immutable temperature-to-speed curve.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveModel {
    points: Vec<CurvePoint>,
    /// `segments[i]` spans `points[i]..points[i + 1]`
    segments: Vec<Segment>,
}

impl CurveModel {
    /// Build a curve from user points.
    ///
    /// Speeds are clamped to 0-100. Points sharing a temperature are accepted
    /// with a warning and evaluate as a hard step.
    pub fn build(points: &[CurvePoint]) -> Result<Self> {
        if points.is_empty() {
            return Err(ControlError::Config(
                "user-defined curve is empty".to_string(),
            ));
        }

        let points: Vec<CurvePoint> = points
            .iter()
            .map(|p| CurvePoint::new(p.temp_c, clamp(p.speed) as i32))
            .collect();

        let segments = points
            .windows(2)
            .map(|pair| {
                let segment = Segment::between(pair[0], pair[1]);
                if segment == Segment::Degenerate {
                    log::warn!(
                        "Curve defines two speeds for the same temperature ({} ºC); \
                         not critical, but check your curve points",
                        pair[0].temp_c
                    );
                }
                segment
            })
            .collect();

        Ok(Self { points, segments })
    }

    /// Speed for a given temperature.
    ///
    /// The enclosing segment starts at the last point of the leading run of
    /// points whose temperature is `<= temp_c`.
    ///
    /// - Below the first point: the first point's speed
    /// - At or above the last point: the last point's speed
    /// - Degenerate segment: the upper point's speed
    /// - Otherwise: linear interpolation, truncated toward zero
    pub fn evaluate(&self, temp_c: i32) -> u8 {
        let covered = self
            .points
            .iter()
            .take_while(|p| p.temp_c <= temp_c)
            .count();
        let Some(left) = covered.checked_sub(1) else {
            return self.points[0].speed as u8;
        };

        if left >= self.points.len() - 1 {
            return self.points[self.points.len() - 1].speed as u8;
        }

        // Exact hit: skip the float path so configured points map to themselves.
        if self.points[left].temp_c == temp_c {
            return self.points[left].speed as u8;
        }

        match self.segments[left] {
            Segment::Linear { slope, intercept } => {
                clamp((slope * temp_c as f64 + intercept) as i32)
            }
            Segment::Degenerate => self.points[left + 1].speed as u8,
        }
    }

    /// Points after speed clamping, in configuration order.
    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

/// Clamp any computed speed into the commandable range.
pub fn clamp(speed: i32) -> u8 {
    speed.clamp(SPEED_MIN, SPEED_MAX) as u8
}

/// The curve shipped as the default configuration.
pub fn default_points() -> Vec<CurvePoint> {
    vec![
        CurvePoint::new(0, 0),
        CurvePoint::new(40, 0),
        CurvePoint::new(50, 40),
        CurvePoint::new(60, 75),
        CurvePoint::new(100, 100),
    ]
}
