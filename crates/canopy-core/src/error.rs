use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanopyError {
    #[error("Invalid input: {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Grid shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected: String, found: String },

    /// Area was requested in a coordinate system whose units are not metres.
    #[error("Invalid CRS: {0}")]
    InvalidCrs(String),

    #[error("Empty mask: {0}")]
    EmptyMask(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Data quality gate failed: {0}")]
    QualityGateFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CanopyError {
    pub(crate) fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        CanopyError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for CanopyError {
    fn from(e: serde_json::Error) -> Self {
        CanopyError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for CanopyError {
    fn from(e: serde_yaml::Error) -> Self {
        CanopyError::Serialization(e.to_string())
    }
}
