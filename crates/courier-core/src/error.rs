use thiserror::Error;

/// Errors produced by the data layer.
///
/// The queue and reconciler care about exactly one distinction: whether an
/// error is worth retrying. Everything else propagates to the caller.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("network unavailable")]
    NetworkUnavailable,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("subscription closed")]
    SubscriptionClosed,

    #[error("permission denied")]
    PermissionDenied,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("quota exceeded for {feature}, resets at {reset_at}")]
    QuotaExceeded { feature: String, reset_at: i64 },

    #[error("unknown feature: {0}")]
    UnknownFeature(String),

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Transient errors are retried with backoff; anything else is terminal
    /// for the operation that hit it.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::NetworkUnavailable
                | CoreError::DeadlineExceeded
                | CoreError::SubscriptionClosed
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::MalformedPayload(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
