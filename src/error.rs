//! Unified error hierarchy for sweatrs
//!
//! Every fallible operation in the library returns [`SweatError`]. The
//! numeric engines only ever raise the first three variants; the rest come
//! from the boundary adapters (config files, stream importers).

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for all sweatrs operations
#[derive(Debug, Error)]
pub enum SweatError {
    /// A required stream or athlete threshold was not supplied
    #[error("Missing parameter for {operation}: {parameter}")]
    MissingParameter { parameter: String, operation: String },

    /// Caller passed an unusable combination of options
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Nonlinear solver failed to produce a trustworthy fit
    #[error("Fit did not converge for {model}: {reason}")]
    FitDivergence { model: String, reason: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV stream file errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON stream file errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Stream file is readable but its contents are unusable
    #[error("Import error in {path}: {reason}")]
    Import { path: PathBuf, reason: String },

    /// Configuration file errors
    #[error("Configuration file error: {0}")]
    Config(String),
}

/// Result type alias for sweatrs operations
pub type Result<T> = std::result::Result<T, SweatError>;

impl SweatError {
    pub fn missing(parameter: impl Into<String>, operation: impl Into<String>) -> Self {
        SweatError::MissingParameter {
            parameter: parameter.into(),
            operation: operation.into(),
        }
    }

    pub fn divergence(model: impl Into<String>, reason: impl Into<String>) -> Self {
        SweatError::FitDivergence {
            model: model.into(),
            reason: reason.into(),
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            SweatError::MissingParameter { .. } | SweatError::FitDivergence { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            SweatError::MissingParameter { parameter, operation } => {
                format!(
                    "Cannot compute {} without '{}'. Add it to the workout data or athlete profile.",
                    operation, parameter
                )
            }
            SweatError::FitDivergence { model, .. } => {
                format!(
                    "The {} model could not be fitted to this data. Try a different model or more samples.",
                    model
                )
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Operation cannot run on this input, the data itself is fine
    Warning,
    /// Bad input or environment
    Error,
}

impl ErrorSeverity {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorSeverity::Warning => "warning:",
            ErrorSeverity::Error => "error:",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        let err = SweatError::missing("cp", "w_prime_balance");
        assert_eq!(err.severity(), ErrorSeverity::Warning);

        let err = SweatError::InvalidConfiguration("unknown algorithm".to_string());
        assert_eq!(err.severity(), ErrorSeverity::Error);
        assert_eq!(err.severity().label(), "error:");
    }

    #[test]
    fn test_user_messages() {
        let err = SweatError::missing("power", "mean_max");
        assert!(err.user_message().contains("'power'"));

        let err = SweatError::divergence("2-parameter", "budget exhausted");
        assert!(err.user_message().contains("2-parameter"));
        assert!(err.to_string().contains("budget exhausted"));
    }
}
