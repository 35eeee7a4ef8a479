// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! One-row text bar graph used in the per-sample status log line.

/// Direction of the latest target change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Rising,
    Falling,
    Steady,
}

impl Trend {
    pub fn between(old: Option<u8>, new: u8) -> Self {
        match old {
            Some(old) if new > old => Trend::Rising,
            Some(old) if new < old => Trend::Falling,
            _ => Trend::Steady,
        }
    }

    fn arrow(self) -> &'static str {
        match self {
            Trend::Rising => "-> ",
            Trend::Falling => "<- ",
            Trend::Steady => "",
        }
    }
}

/// Render `value` as a row `|....... 40% -> .........|` spanning `width`
/// columns for the range `min..=max`. Returns an empty string when the
/// width or the range is empty.
pub fn line_graph(value: i32, min: i32, max: i32, width: usize, unit: &str, trend: Trend) -> String {
    if width == 0 || max == min {
        return String::new();
    }

    let label = format!(" {value}{unit} {}", trend.arrow());
    let scale = width as f64 / f64::from(max - min);
    let offset = -(width as f64) * f64::from(min) / f64::from(max - min);
    let x = (scale * f64::from(value) + offset).max(0.0) as usize;

    let label_len = label.chars().count();
    let mut row = String::with_capacity(width + 2);
    row.push('|');
    row.push_str(&".".repeat(x));
    row.push_str(&label);
    row.push_str(&".".repeat(width.saturating_sub(x + label_len)));
    if row.chars().count() <= width + 1 {
        row.push('|');
    }
    row
}
