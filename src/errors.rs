use sea_orm::error::DbErr;
use serde::Serialize;
use uuid::Uuid;

/// Coarse classification used by the batch orchestrator to decide whether a
/// failure skips one product or stops the whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    InsufficientData,
    ProductNotFound,
    ArtifactCorrupt,
    FeatureMismatch,
    InvalidInput,
    InvalidOperation,
    Infrastructure,
}

#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Product not found: {0}")]
    ProductNotFound(Uuid),

    #[error("Artifact corrupt for key {key}: {reason}")]
    ArtifactCorrupt { key: String, reason: String },

    #[error("Feature mismatch: model expects {expected:?}, vector has {actual:?}")]
    FeatureMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Storage error: {0}")]
    StorageError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<validator::ValidationErrors> for ForecastError {
    fn from(err: validator::ValidationErrors) -> Self {
        ForecastError::InvalidInput(err.to_string())
    }
}

impl From<serde_json::Error> for ForecastError {
    fn from(err: serde_json::Error) -> Self {
        ForecastError::SerializationError(err.to_string())
    }
}

impl ForecastError {
    pub fn insufficient_data(product_id: Uuid, detail: impl AsRef<str>) -> Self {
        ForecastError::InsufficientData(format!("product {}: {}", product_id, detail.as_ref()))
    }

    pub fn artifact_corrupt(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ForecastError::ArtifactCorrupt {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Returns the classification for this error.
    /// This is the single source of truth for the skip/abort policy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InsufficientData(_) => ErrorKind::InsufficientData,
            Self::ProductNotFound(_) => ErrorKind::ProductNotFound,
            Self::ArtifactCorrupt { .. } => ErrorKind::ArtifactCorrupt,
            Self::FeatureMismatch { .. } => ErrorKind::FeatureMismatch,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::InvalidOperation(_) => ErrorKind::InvalidOperation,
            Self::DatabaseError(_)
            | Self::StorageError(_)
            | Self::SerializationError(_)
            | Self::ConfigError(_) => ErrorKind::Infrastructure,
        }
    }

    /// Per-product failures that must never abort sibling products.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Infrastructure)
    }

    /// Message safe to show in a batch summary. Infrastructure details stay in the logs.
    pub fn summary_message(&self) -> String {
        match self.kind() {
            ErrorKind::Infrastructure => "Infrastructure error".to_string(),
            _ => self.to_string(),
        }
    }
}

pub type Result<T, E = ForecastError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_errors_are_not_recoverable() {
        let db = ForecastError::DatabaseError(DbErr::Custom("connection refused".into()));
        assert!(!db.is_recoverable());
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(!ForecastError::from(io).is_recoverable());
        assert_eq!(
            ForecastError::ConfigError("x".into()).kind(),
            ErrorKind::Infrastructure
        );
    }

    #[test]
    fn per_product_errors_are_recoverable() {
        let id = Uuid::new_v4();
        assert!(ForecastError::insufficient_data(id, "no order lines").is_recoverable());
        assert!(ForecastError::ProductNotFound(id).is_recoverable());
        assert!(ForecastError::artifact_corrupt("k", "truncated").is_recoverable());
        assert_eq!(
            ForecastError::ProductNotFound(id).kind(),
            ErrorKind::ProductNotFound
        );
    }

    #[test]
    fn summary_message_hides_infrastructure_details() {
        let db = ForecastError::DatabaseError(DbErr::Custom("password authentication failed".into()));
        assert_eq!(db.summary_message(), "Infrastructure error");
        let id = Uuid::nil();
        assert_eq!(
            ForecastError::ProductNotFound(id).summary_message(),
            format!("Product not found: {}", id)
        );
    }

    #[test]
    fn error_kind_renders_snake_case() {
        assert_eq!(ErrorKind::InsufficientData.to_string(), "insufficient_data");
        assert_eq!(ErrorKind::ArtifactCorrupt.as_ref(), "artifact_corrupt");
    }
}
