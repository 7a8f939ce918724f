use crate::events::Topic;
use thiserror::Error;

pub type Result<T, E = FeedError> = std::result::Result<T, E>;

/// Failures surfaced by the feed engine and the backend contract.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// A change event lacked the field needed to locate its target.
    #[error("{topic} event {row_id} carries no {missing}")]
    PartialEventInformation {
        topic: Topic,
        row_id: String,
        missing: &'static str,
    },
    #[error("malformed {topic} row: {source}")]
    MalformedRow {
        topic: Topic,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("engine is no longer running")]
    EngineClosed,
}

impl FeedError {
    pub fn network(err: impl std::fmt::Display) -> Self {
        FeedError::Network(err.to_string())
    }

    /// Errors that leave state untouched and should be shown to the user.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            FeedError::Network(_)
                | FeedError::NotFound(_)
                | FeedError::Unauthorized(_)
                | FeedError::InvalidInput(_)
        )
    }
}

impl From<anyhow::Error> for FeedError {
    fn from(err: anyhow::Error) -> Self {
        FeedError::Network(format!("{err:#}"))
    }
}
