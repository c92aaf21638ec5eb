//! VTT timestamp parsing and formatting

use crate::VttError;

/// Parse `HH:MM:SS.mmm` or `MM:SS.mmm` into seconds.
pub fn parse_timestamp(raw: &str) -> Result<f64, VttError> {
    let parts: Vec<&str> = raw.trim().split(':').collect();
    let bad = || VttError::BadTimestamp(raw.to_string());

    match parts.as_slice() {
        [h, m, s] => {
            let hours: f64 = h.parse().map_err(|_| bad())?;
            let minutes: f64 = m.parse().map_err(|_| bad())?;
            let seconds: f64 = s.parse().map_err(|_| bad())?;
            Ok(hours * 3600.0 + minutes * 60.0 + seconds)
        }
        [m, s] => {
            let minutes: f64 = m.parse().map_err(|_| bad())?;
            let seconds: f64 = s.parse().map_err(|_| bad())?;
            Ok(minutes * 60.0 + seconds)
        }
        _ => Err(bad()),
    }
}

/// Format seconds as `HH:MM:SS.mmm`.
pub fn format_timestamp(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let hours = (seconds / 3600.0) as u64;
    let minutes = ((seconds % 3600.0) / 60.0) as u64;
    let secs = (seconds % 60.0) as u64;
    let millis = ((seconds * 1000.0) % 1000.0).round() as u64 % 1000;
    format!("{hours:02}:{minutes:02}:{secs:02}.{millis:03}")
}

/// Parse a NOTE-block duration like `1:45:30` or `45:30` into seconds.
pub fn parse_duration(raw: &str) -> Option<u64> {
    let parts: Vec<&str> = raw.trim().split(':').collect();
    match parts.as_slice() {
        [h, m, s] => {
            let (h, m, s): (u64, u64, u64) =
                (h.parse().ok()?, m.parse().ok()?, s.parse().ok()?);
            Some(h * 3600 + m * 60 + s)
        }
        [m, s] => {
            let (m, s): (u64, u64) = (m.parse().ok()?, s.parse().ok()?);
            Some(m * 60 + s)
        }
        [minutes] => {
            let minutes: f64 = minutes.parse().ok()?;
            Some((minutes * 60.0) as u64)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_timestamp() {
        assert!((parse_timestamp("01:02:03.500").unwrap() - 3723.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_short_timestamp() {
        assert!((parse_timestamp("02:03.250").unwrap() - 123.25).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_timestamp("abc").is_err());
        assert!(parse_timestamp("1:2:3:4").is_err());
    }

    #[test]
    fn test_format_round_trip() {
        let original = 4523.125;
        let parsed = parse_timestamp(&format_timestamp(original)).unwrap();
        assert!((parsed - original).abs() < 0.001);
    }

    #[test]
    fn test_parse_duration_formats() {
        assert_eq!(parse_duration("1:45:30"), Some(6330));
        assert_eq!(parse_duration("45:30"), Some(2730));
        assert_eq!(parse_duration("90"), Some(5400));
        assert_eq!(parse_duration("x"), None);
    }
}
