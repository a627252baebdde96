//! Unified error handling for the tripflow library.
//!
//! Build-time failures (zone polygons, raw trip sources) are fatal and abort the
//! run. Per-row problems are not errors at all: they are counted as
//! [`DropReason`](crate::normalize::DropReason)s by the normalizer.

use thiserror::Error;

/// Unified error type for tripflow operations.
#[derive(Debug, Clone, Error)]
pub enum TripflowError {
    /// Polygon or raw trip source is missing, unreadable or corrupt
    #[error("Data source '{source_name}' failed: {message}")]
    DataSource {
        source_name: String,
        message: String,
    },
    /// Query cannot be answered with the data at hand (empty set, k too large)
    #[error("Insufficient data: {message}")]
    InsufficientData { message: String },
    /// Sampling bounds violated
    #[error("Sampling error: {message}")]
    Sampling { message: String },
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },
    /// Persisted dataset could not be written or read back
    #[error("Persistence error: {message}")]
    Persistence { message: String },
    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TripflowError {
    /// Shorthand for a [`TripflowError::DataSource`] error.
    pub fn data_source(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        TripflowError::DataSource {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a [`TripflowError::InsufficientData`] error.
    pub fn insufficient(message: impl Into<String>) -> Self {
        TripflowError::InsufficientData {
            message: message.into(),
        }
    }

    /// Shorthand for a [`TripflowError::Persistence`] error.
    pub fn persistence(message: impl Into<String>) -> Self {
        TripflowError::Persistence {
            message: message.into(),
        }
    }

    /// Whether this error means "nothing to compute" rather than a failure.
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, TripflowError::InsufficientData { .. })
    }
}

/// Result type alias for tripflow operations.
pub type Result<T> = std::result::Result<T, TripflowError>;

/// Extension trait for converting Option to TripflowError.
pub trait OptionExt<T> {
    /// Convert Option to Result with an insufficient data error.
    fn ok_or_insufficient(self, message: &str) -> Result<T>;

    /// Convert Option to Result with generic internal error.
    fn ok_or_internal(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_insufficient(self, message: &str) -> Result<T> {
        self.ok_or_else(|| TripflowError::insufficient(message))
    }

    fn ok_or_internal(self, message: &str) -> Result<T> {
        self.ok_or_else(|| TripflowError::Internal {
            message: message.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TripflowError::data_source("taxi_zones.geojson", "file not found");
        assert!(err.to_string().contains("taxi_zones.geojson"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_option_ext() {
        let none: Option<i32> = None;
        let result = none.ok_or_insufficient("empty dataset");
        assert!(matches!(
            result,
            Err(TripflowError::InsufficientData { .. })
        ));
        assert!(result.unwrap_err().is_insufficient_data());
    }
}
