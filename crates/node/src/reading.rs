//! Scalar measurement sources and the published payload format.

use std::path::PathBuf;

/// Produces the value published on the reading topic.
pub trait ReadingSource: Send {
    /// Sample once.  A non-finite value means "no reading this time".
    fn read(&mut self) -> f32;
}

impl<T: ReadingSource + ?Sized> ReadingSource for Box<T> {
    fn read(&mut self) -> f32 {
        (**self).read()
    }
}

/// Format a reading as a fixed-point decimal with two fraction digits.
///
/// Returns `None` for NaN or infinities, which are never published.
pub fn format_reading(value: f32) -> Option<String> {
    if !value.is_finite() {
        return None;
    }
    let s = format!("{value:.2}");
    // Values that round to zero from below would otherwise print "-0.00".
    if s == "-0.00" {
        return Some("0.00".to_string());
    }
    Some(s)
}

// ---------------------------------------------------------------------------
// Host thermal zone
// ---------------------------------------------------------------------------

/// Default Linux thermal zone exposed by most SoCs.
pub const DEFAULT_THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Reads a Linux thermal zone (millidegrees Celsius).
pub struct ThermalZone {
    path: PathBuf,
}

impl ThermalZone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

// Blocking read: sysfs attributes are served from kernel memory and return
// immediately.  The publisher samples before taking the session lock.
impl ReadingSource for ThermalZone {
    fn read(&mut self) -> f32 {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => match raw.trim().parse::<i64>() {
                Ok(milli) => milli as f32 / 1000.0,
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), "bad thermal reading: {e}");
                    f32::NAN
                }
            },
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "thermal zone read failed: {e}");
                f32::NAN
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn is_two_decimal(s: &str) -> bool {
        let body = s.strip_prefix('-').unwrap_or(s);
        let Some((int, frac)) = body.split_once('.') else {
            return false;
        };
        !int.is_empty()
            && int.bytes().all(|b| b.is_ascii_digit())
            && frac.len() == 2
            && frac.bytes().all(|b| b.is_ascii_digit())
    }

    // -- format_reading -----------------------------------------------------

    #[test]
    fn format_two_decimals() {
        assert_eq!(format_reading(23.45).as_deref(), Some("23.45"));
        assert_eq!(format_reading(23.0).as_deref(), Some("23.00"));
        assert_eq!(format_reading(-5.5).as_deref(), Some("-5.50"));
    }

    #[test]
    fn format_rounds_to_two_decimals() {
        assert_eq!(format_reading(23.456).as_deref(), Some("23.46"));
        assert_eq!(format_reading(99.994).as_deref(), Some("99.99"));
    }

    #[test]
    fn format_negative_zero_is_plain_zero() {
        assert_eq!(format_reading(-0.001).as_deref(), Some("0.00"));
        assert_eq!(format_reading(-0.0).as_deref(), Some("0.00"));
    }

    #[test]
    fn format_rejects_non_finite() {
        assert_eq!(format_reading(f32::NAN), None);
        assert_eq!(format_reading(f32::INFINITY), None);
        assert_eq!(format_reading(f32::NEG_INFINITY), None);
    }

    #[test]
    fn format_matches_pattern_across_operating_range() {
        // On-die sensor range is roughly -40..125 C; sweep it in small steps.
        let mut v = -40.0_f32;
        while v <= 125.0 {
            let s = format_reading(v).unwrap();
            assert!(is_two_decimal(&s), "{v} formatted as {s:?}");
            v += 0.37;
        }
    }

    // -- ThermalZone --------------------------------------------------------

    #[test]
    fn thermal_zone_reads_millidegrees() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "48312").unwrap();
        let mut zone = ThermalZone::new(file.path());
        assert!((zone.read() - 48.312).abs() < 1e-3);
    }

    #[test]
    fn thermal_zone_missing_file_is_nan() {
        let mut zone = ThermalZone::new("/nonexistent/thermal/temp");
        assert!(zone.read().is_nan());
    }

    #[test]
    fn thermal_zone_garbage_is_nan() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "warm").unwrap();
        let mut zone = ThermalZone::new(file.path());
        assert!(zone.read().is_nan());
    }
}
