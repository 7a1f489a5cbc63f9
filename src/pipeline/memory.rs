use std::fs;

use crate::error::ResourceExhaustionError;

/// Reports how much system memory is in use.
pub trait MemoryProbe: Send + Sync {
    /// Percentage of memory in use, or `None` when unknown.
    fn used_percent(&self) -> Option<f64>;
}

/// Never reports pressure.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProbe;

impl MemoryProbe for NoProbe {
    fn used_percent(&self) -> Option<f64> {
        None
    }
}

/// Reads `MemTotal` and `MemAvailable` from `/proc/meminfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcMeminfo;

impl MemoryProbe for ProcMeminfo {
    fn used_percent(&self) -> Option<f64> {
        let text = fs::read_to_string("/proc/meminfo").ok()?;
        parse_meminfo(&text)
    }
}

fn parse_meminfo(text: &str) -> Option<f64> {
    let field = |name: &str| -> Option<f64> {
        text.lines()
            .find_map(|line| line.strip_prefix(name))
            .and_then(|rest| rest.trim_start_matches(':').split_whitespace().next())
            .and_then(|kb| kb.parse::<f64>().ok())
    };
    let total = field("MemTotal")?;
    let available = field("MemAvailable")?;
    if total <= 0.0 {
        return None;
    }
    Some((total - available) / total * 100.0)
}

/// Compare the probe reading against `limit_percent`.
pub fn check_pressure(
    probe: &dyn MemoryProbe,
    limit_percent: f64,
) -> Result<(), ResourceExhaustionError> {
    match probe.used_percent() {
        Some(used_percent) if used_percent > limit_percent => {
            Err(ResourceExhaustionError::MemoryPressure {
                used_percent,
                limit_percent,
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(f64);

    impl MemoryProbe for Fixed {
        fn used_percent(&self) -> Option<f64> {
            Some(self.0)
        }
    }

    #[test]
    fn parses_meminfo() {
        let text = "MemTotal:       16000000 kB\nMemFree:         1000000 kB\nMemAvailable:    4000000 kB\n";
        let used = parse_meminfo(text).unwrap();
        assert!((used - 75.0).abs() < 1e-9);
        assert!(parse_meminfo("MemFree: 1 kB").is_none());
    }

    #[test]
    fn pressure_only_above_limit() {
        assert!(check_pressure(&Fixed(95.0), 95.0).is_ok());
        assert!(matches!(
            check_pressure(&Fixed(97.5), 95.0),
            Err(ResourceExhaustionError::MemoryPressure { .. })
        ));
        assert!(check_pressure(&NoProbe, 0.0).is_ok());
    }
}
