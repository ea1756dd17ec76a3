use std::fmt::Display;

use chrono::Duration;
use clap::ValueEnum;

/// Granularity used when presenting a duration to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DisplayMode {
    Seconds,
    Minutes,
    Hours,
    #[default]
    Days,
}

impl Display for DisplayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisplayMode::Seconds => write!(f, "seconds"),
            DisplayMode::Minutes => write!(f, "minutes"),
            DisplayMode::Hours => write!(f, "hours"),
            DisplayMode::Days => write!(f, "days"),
        }
    }
}

/// Formats whole seconds of `value`, always truncating. Negative durations show as zero.
pub fn format_duration(value: Duration, mode: DisplayMode) -> String {
    let seconds = value.num_seconds().max(0);
    match mode {
        DisplayMode::Seconds => format!("{seconds}s"),
        DisplayMode::Minutes => format!("{:02}m{:02}s", seconds / 60, seconds % 60),
        DisplayMode::Hours => {
            let minutes = seconds / 60;
            format!("{:02}h{:02}m", minutes / 60, minutes % 60)
        }
        DisplayMode::Days => format!("{}d{:02}h", seconds / 86400, seconds % 86400 / 3600),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::{format_duration, DisplayMode};

    #[test]
    fn test_modes() {
        let value = Duration::seconds(93_784);
        assert_eq!(format_duration(value, DisplayMode::Seconds), "93784s");
        assert_eq!(format_duration(value, DisplayMode::Minutes), "1563m04s");
        assert_eq!(format_duration(value, DisplayMode::Hours), "26h03m");
        assert_eq!(format_duration(value, DisplayMode::Days), "1d02h");
    }

    #[test]
    fn test_truncates_instead_of_rounding() {
        let value = Duration::milliseconds(59_999);
        assert_eq!(format_duration(value, DisplayMode::Seconds), "59s");
        assert_eq!(format_duration(value, DisplayMode::Minutes), "00m59s");
        assert_eq!(format_duration(value, DisplayMode::Hours), "00h00m");
        assert_eq!(format_duration(value, DisplayMode::Days), "0d00h");
    }

    #[test]
    fn test_negative_is_zero() {
        assert_eq!(
            format_duration(Duration::seconds(-30), DisplayMode::Minutes),
            "00m00s"
        );
    }
}
