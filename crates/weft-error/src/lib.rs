//! Error types for the Weft race detector.
//!
//! The detector's public check path never fails — it proceeds, silently
//! skips, or was already refused at configuration time. What remains is a
//! small set of setup-time errors.

use thiserror::Error;

/// Primary error type for detector setup and finalization.
#[derive(Error, Debug)]
pub enum WeftError {
    /// An environment variable carried a value the detector cannot use.
    #[error("invalid configuration value for {key}: '{value}'")]
    InvalidConfig { key: &'static str, value: String },

    /// The detector was finalized twice.
    #[error("detector already finalized")]
    AlreadyFinalized,
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, WeftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_message_names_key_and_value() {
        let err = WeftError::InvalidConfig {
            key: "WEFT_REPORT_MODE",
            value: "sometimes".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "invalid configuration value for WEFT_REPORT_MODE: 'sometimes'"
        );
    }
}
