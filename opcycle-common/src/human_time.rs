//! Timestamp and duration text conversion
//!
//! Upstream collaborators describe time in several textual shapes:
//! - Clock timestamps: `MM:SS`, `MM:SS.s`, `HH:MM:SS`, `HH:MM:SS.s`
//! - Durations with a unit suffix: `12.3s`
//! - Bare seconds: `12.3`
//!
//! All of them are converted to `f64` seconds here. Display helpers go the other
//! way and apply the fixed report precision (2 decimals for times, 1 decimal for
//! percentages). Internal computation never uses the rounded values.

use crate::{Error, Result};

/// Decimal places used when displaying times (seconds)
pub const TIME_DECIMALS: u32 = 2;

/// Decimal places used when displaying percentages and scores
pub const PERCENT_DECIMALS: u32 = 1;

/// Parse a textual timestamp or duration into seconds.
///
/// # Examples
///
/// ```
/// use opcycle_common::human_time::parse_seconds;
///
/// assert_eq!(parse_seconds("01:30").unwrap(), 90.0);
/// assert_eq!(parse_seconds("1:02:03").unwrap(), 3723.0);
/// assert_eq!(parse_seconds("32.6s").unwrap(), 32.6);
/// assert_eq!(parse_seconds("7").unwrap(), 7.0);
/// assert!(parse_seconds("soon").is_err());
/// ```
pub fn parse_seconds(text: &str) -> Result<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("empty time value".to_string()));
    }

    let seconds = if trimmed.contains(':') {
        parse_clock(trimmed)?
    } else {
        let number = trimmed
            .strip_suffix('s')
            .or_else(|| trimmed.strip_suffix('S'))
            .unwrap_or(trimmed)
            .trim();
        parse_component(number, trimmed)?
    };

    if !seconds.is_finite() || seconds < 0.0 {
        return Err(Error::InvalidInput(format!(
            "time value out of range: {:?}",
            text
        )));
    }

    Ok(seconds)
}

/// Parse `MM:SS[.s]` or `HH:MM:SS[.s]`. Only the last component may carry a fraction.
fn parse_clock(text: &str) -> Result<f64> {
    let parts: Vec<&str> = text.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [m, s] => ("0", *m, *s),
        [h, m, s] => (*h, *m, *s),
        _ => {
            return Err(Error::InvalidInput(format!(
                "unrecognized clock format: {:?}",
                text
            )))
        }
    };

    if [hours, minutes, seconds]
        .iter()
        .any(|part| part.trim().starts_with(['+', '-']))
    {
        return Err(Error::InvalidInput(format!(
            "signed clock component in {:?}",
            text
        )));
    }

    let hours = parse_whole(hours, text)?;
    let minutes = parse_whole(minutes, text)?;
    let seconds = parse_component(seconds, text)?;

    Ok(hours * 3600.0 + minutes * 60.0 + seconds)
}

fn parse_whole(part: &str, original: &str) -> Result<f64> {
    part.trim()
        .parse::<u64>()
        .map(|v| v as f64)
        .map_err(|_| Error::InvalidInput(format!("invalid time component in {:?}", original)))
}

fn parse_component(part: &str, original: &str) -> Result<f64> {
    part.trim()
        .parse::<f64>()
        .map_err(|_| Error::InvalidInput(format!("invalid time value {:?}", original)))
}

/// Format seconds as a `MM:SS` timestamp label (minutes are not wrapped into hours).
///
/// ```
/// use opcycle_common::human_time::format_timestamp;
///
/// assert_eq!(format_timestamp(0.0), "00:00");
/// assert_eq!(format_timestamp(95.7), "01:35");
/// assert_eq!(format_timestamp(4500.0), "75:00");
/// ```
pub fn format_timestamp(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// Format seconds as `H:MM:SS` for session-length values.
pub fn format_clock(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// Format a duration as `X.Xs`
///
/// ```
/// use opcycle_common::human_time::format_duration;
///
/// assert_eq!(format_duration(14.0), "14.0s");
/// assert_eq!(format_duration(9.94), "9.9s");
/// ```
pub fn format_duration(seconds: f64) -> String {
    format!("{:.1}s", seconds)
}

/// Round to a fixed number of decimal places for display.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Round a time value (seconds) to display precision
pub fn round_time(value: f64) -> f64 {
    round_to(value, TIME_DECIMALS)
}

/// Round a percentage/score to display precision
pub fn round_percent(value: f64) -> f64 {
    round_to(value, PERCENT_DECIMALS)
}
