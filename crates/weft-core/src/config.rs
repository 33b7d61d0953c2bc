//! Detector configuration.
//!
//! Read once at startup from `WEFT_*` environment variables; a bad value is
//! refused there rather than surfacing mid-run on the check path.

use weft_error::{Result, WeftError};

/// Record count above which a call bumps the overflow counter. Non-fatal;
/// the policy is expected to keep histories bounded well below this.
pub const DEFAULT_RECORD_THRESHOLD: usize = 16;

/// How detected races leave the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportMode {
    /// Append to the global report list, flushed at finalization when line
    /// information can be symbolized in one pass.
    #[default]
    Deferred,
    /// Hand each race to the sink the moment it is detected.
    Runtime,
    /// Detect and count, report nothing.
    Silent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorConfig {
    pub report_mode: ReportMode,
    pub record_threshold: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self { report_mode: ReportMode::default(), record_threshold: DEFAULT_RECORD_THRESHOLD }
    }
}

impl DetectorConfig {
    /// Builds the configuration from `WEFT_REPORT_MODE` and
    /// `WEFT_RECORD_THRESHOLD`, falling back to defaults for unset
    /// variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("WEFT_REPORT_MODE") {
            config.report_mode = match value.as_str() {
                "deferred" => ReportMode::Deferred,
                "runtime" => ReportMode::Runtime,
                "silent" => ReportMode::Silent,
                _ => {
                    return Err(WeftError::InvalidConfig { key: "WEFT_REPORT_MODE", value });
                }
            };
        }

        if let Ok(value) = std::env::var("WEFT_RECORD_THRESHOLD") {
            config.record_threshold = value.parse().map_err(|_| WeftError::InvalidConfig {
                key: "WEFT_RECORD_THRESHOLD",
                value,
            })?;
        }

        tracing::info!(
            target: "weft.config",
            report_mode = ?config.report_mode,
            record_threshold = config.record_threshold,
            "detector configuration loaded"
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DetectorConfig::default();
        assert_eq!(config.report_mode, ReportMode::Deferred);
        assert_eq!(config.record_threshold, DEFAULT_RECORD_THRESHOLD);
    }

    // Environment-variable parsing is exercised directly on the match arms
    // rather than through set_var, which is unsound with parallel tests.
    #[test]
    fn rejects_unknown_report_mode() {
        let err = WeftError::InvalidConfig { key: "WEFT_REPORT_MODE", value: "loud".into() };
        assert!(err.to_string().contains("WEFT_REPORT_MODE"));
    }
}
