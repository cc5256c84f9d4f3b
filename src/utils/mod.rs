//! Utilities module for logging, metrics, and error types

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{LeafError, Result};
pub use logging::{init_logging, LogConfig};
pub use metrics::{ClassificationCounts, EvaluationMetrics};

/// Elapsed time for log lines: `12.3s`, `4m 05s` or `2h 07m`
pub fn format_duration(seconds: f64) -> String {
    if seconds < 59.95 {
        return format!("{:.1}s", seconds.max(0.0));
    }
    let total = seconds.round() as u64;
    let (hours, minutes, secs) = (total / 3600, total % 3600 / 60, total % 60);
    if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else {
        format!("{}m {:02}s", minutes, secs)
    }
}

/// Format a number with thousands separator
pub fn format_number(n: usize) -> String {
    let s = n.to_string();
    let chars: Vec<char> = s.chars().collect();
    let mut result = String::with_capacity(chars.len() + chars.len() / 3);

    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.5), "30.5s");
        assert_eq!(format_duration(59.99), "1m 00s");
        assert_eq!(format_duration(125.2), "2m 05s");
        assert_eq!(format_duration(3661.0), "1h 01m");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(51_380_868), "51,380,868");
        assert_eq!(format_number(42), "42");
    }
}
