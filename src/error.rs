//! Unified error handling for the ride-comfort library.
//!
//! Almost nothing in this crate is fatal: degenerate geometry yields `None`,
//! off-route samples are dropped and capacity pressure is resolved by
//! eviction. Errors are reserved for misconfiguration at construction time
//! and for failures reported by external collaborators.

use thiserror::Error;

/// Unified error type for ride-comfort operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComfortError {
    /// A configuration value is outside its valid range
    #[error("Invalid configuration for '{field}': {message}")]
    InvalidConfig { field: &'static str, message: String },

    /// An encoded polyline could not be decoded
    #[error("Invalid polyline: {message}")]
    InvalidPolyline { message: String },

    /// An external provider (attributes, elevation) failed
    #[error("Provider '{provider}' failed: {message}")]
    ProviderFailed { provider: String, message: String },
}

impl ComfortError {
    pub(crate) fn invalid_config(field: &'static str, message: impl Into<String>) -> Self {
        ComfortError::InvalidConfig {
            field,
            message: message.into(),
        }
    }

    /// Shorthand for provider implementations.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        ComfortError::ProviderFailed {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for ride-comfort operations.
pub type Result<T> = std::result::Result<T, ComfortError>;

/// Reject values outside the closed unit interval (or non-finite).
pub(crate) fn ensure_unit_interval(field: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ComfortError::invalid_config(
            field,
            format!("expected a value in [0, 1], got {}", value),
        ))
    }
}

/// Reject zero, negative and non-finite values.
pub(crate) fn ensure_positive(field: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ComfortError::invalid_config(
            field,
            format!("expected a positive value, got {}", value),
        ))
    }
}
