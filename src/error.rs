//! Error taxonomy shared by every pipeline stage.

use thiserror::Error;

/// Errors produced by the acquisition, consumption and notification stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Item, watch or preference lookup found nothing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The shared request budget for this window is exhausted.
    #[error("Rate limited: {key} at {count}/{limit}")]
    RateLimited { key: String, count: u64, limit: u64 },

    /// Unique key violated on create.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed event payload.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid or inconsistent configuration.
    #[error("Invalid config: {0}")]
    BadConfig(String),

    /// Unrecoverable failure; the owning component exits.
    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Marketplace answered, but not with a usable price.
    #[error("Market error: {0}")]
    Market(String),

    #[error("Event bus error: {0}")]
    Bus(String),

    #[error("Cache error: {0}")]
    Cache(String),

    /// A notification channel refused or failed delivery.
    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Transient failures are retried at the envelope or cycle level.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::Database(_)
                | PipelineError::Http(_)
                | PipelineError::Bus(_)
                | PipelineError::Cache(_)
                | PipelineError::Timeout(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PipelineError::NotFound(_))
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::NotFound("skin 42".to_string());
        assert!(err.to_string().contains("Not found"));

        let err = PipelineError::RateLimited {
            key: "rl:parser:steam".to_string(),
            count: 61,
            limit: 60,
        };
        assert_eq!(err.to_string(), "Rate limited: rl:parser:steam at 61/60");
    }

    #[test]
    fn test_transient_classification() {
        assert!(PipelineError::Bus("broker down".into()).is_transient());
        assert!(PipelineError::Timeout(std::time::Duration::from_secs(10)).is_transient());
        assert!(!PipelineError::Decode("bad json".into()).is_transient());
        assert!(!PipelineError::NotFound("x".into()).is_transient());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: PipelineError = json_err.into();
        assert!(matches!(err, PipelineError::Decode(_)));
    }
}
