//! Controller configuration and runner-set annotation keys

use std::time::Duration;

use crate::controller::AllocatorStrategy;

// =============================================================================
// Annotation Keys
// =============================================================================
// Annotation values always win over the pod template when both are present.

/// Enables autoscaling for a runner set (opt-in; the value must be `"true"`)
pub const ANNOTATION_ENABLED: &str = "gantry.dev/autoscaler-enabled";

/// Per-runner CPU requirement (e.g. `"2000m"`, `"0.5"`, or raw millicores)
///
/// Raw integer values are taken as millicores verbatim: `"2"` means 2
/// milli-CPU, not two cores. Write `"2000m"` or `"2.0"` for two cores.
pub const ANNOTATION_CPU: &str = "gantry.dev/autoscaler-cpu";

/// Per-runner memory requirement (e.g. `"8Gi"`, `"512Mi"`, or raw bytes)
pub const ANNOTATION_MEMORY: &str = "gantry.dev/autoscaler-memory";

/// Allocation priority (signed integer; higher is allocated first; default 0)
pub const ANNOTATION_PRIORITY: &str = "gantry.dev/autoscaler-priority";

/// Guaranteed minimum slot count (non-negative integer; default 0)
pub const ANNOTATION_MIN_RUNNERS: &str = "gantry.dev/autoscaler-min-runners";

// =============================================================================
// Configuration
// =============================================================================

/// Controller configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Percentage of otherwise-available CPU withheld as reserve (0-100)
    pub cpu_buffer_percent: u8,

    /// Percentage of otherwise-available memory withheld as reserve (0-100)
    pub memory_buffer_percent: u8,

    /// How often to run the reconciliation loop
    pub reconcile_interval: Duration,

    /// Namespaces to watch for runner sets (empty means all namespaces)
    pub namespaces: Vec<String>,

    /// Calculate changes but do not apply them to the cluster
    pub dry_run: bool,

    /// Which allocation algorithm to run
    pub allocator: AllocatorStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cpu_buffer_percent: 10,
            memory_buffer_percent: 10,
            reconcile_interval: Duration::from_secs(30),
            namespaces: Vec::new(),
            dry_run: false,
            allocator: AllocatorStrategy::FairShare,
        }
    }
}

/// Parse a duration string like `"30s"`, `"5m"`, or `"1h30m"`.
///
/// Accepts combinations of hours (`h`), minutes (`m`), and seconds (`s`) with
/// non-negative integer values. A bare number is taken as seconds. The total
/// must be positive; a zero interval would spin the loop.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration cannot be empty".to_string());
    }

    // Bare seconds, for convenience
    if let Ok(secs) = s.parse::<u64>() {
        return positive(Duration::from_secs(secs));
    }

    let mut total_secs = 0u64;
    let mut remaining = s;

    while !remaining.is_empty() {
        let num_end = remaining
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(remaining.len());
        if num_end == 0 {
            return Err(format!(
                "expected a number at position {} in '{}'",
                s.len() - remaining.len(),
                s
            ));
        }
        let num: u64 = remaining[..num_end]
            .parse()
            .map_err(|_| format!("invalid number in duration '{}'", s))?;
        remaining = &remaining[num_end..];

        let unit = match remaining.chars().next() {
            Some(u) => u,
            None => return Err(format!("missing unit suffix (h/m/s) in duration '{}'", s)),
        };
        let unit_secs = match unit {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            other => {
                return Err(format!(
                    "invalid duration unit '{}' in '{}' (expected h, m, or s)",
                    other, s
                ))
            }
        };
        remaining = &remaining[1..];

        total_secs = total_secs
            .checked_add(num.saturating_mul(unit_secs))
            .ok_or_else(|| format!("duration '{}' overflows", s))?;
    }

    positive(Duration::from_secs(total_secs))
}

fn positive(duration: Duration) -> Result<Duration, String> {
    if duration.is_zero() {
        return Err("duration must be positive".to_string());
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cpu_buffer_percent, 10);
        assert_eq!(config.memory_buffer_percent, 10);
        assert_eq!(config.reconcile_interval, Duration::from_secs(30));
        assert!(config.namespaces.is_empty());
        assert!(!config.dry_run);
        assert_eq!(config.allocator, AllocatorStrategy::FairShare);
    }

    #[test]
    fn test_parse_duration_single_unit() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_duration_combined_units() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("2m30s").unwrap(), Duration::from_secs(150));
    }

    #[test]
    fn test_parse_duration_bare_seconds() {
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("1x").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("30s5").is_err());
    }

    #[test]
    fn test_parse_duration_rejects_zero() {
        assert!(parse_duration("0").is_err());
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("0h0m").is_err());
    }
}
