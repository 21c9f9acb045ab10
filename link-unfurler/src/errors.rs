use crate::signature::SignatureError;
use thiserror::Error;

/// Result type alias for link-unfurler operations
pub type Result<T, E = UnfurlError> = std::result::Result<T, E>;

/// Errors that can occur while receiving an event or delivering its unfurls
#[derive(Error, Debug)]
pub enum UnfurlError {
    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Request body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("Invalid event payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("Signature verification failed: {0}")]
    Signature(#[from] SignatureError),

    #[error("Failed to enrich {url}: {reason}")]
    EnrichmentFailed { url: String, reason: String },

    #[error("Slack request failed: {0}")]
    SlackRequestFailed(#[from] reqwest::Error),

    #[error("Slack responded with status {0}")]
    SlackStatus(http::StatusCode),

    #[error("Slack API error: {0}")]
    SlackApiError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Hyper error: {0}")]
    HyperError(#[from] hyper::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
