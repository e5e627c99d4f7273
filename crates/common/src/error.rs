use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Shared error type whose variant is the error *kind*: layers wrap errors
/// with context but keep the kind, so the outermost handler can map it to
/// the right HTTP or gRPC status.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid parameter")]
    InvalidParam,

    #[error("unauthorized")]
    Unauthorized,

    #[error("token expired")]
    TokenExpired,

    #[error("invalid token")]
    InvalidToken,

    #[error("user not found")]
    UserNotFound,

    #[error("session not found")]
    SessionNotFound,

    #[error("channel or user not found")]
    ChannelOrUserNotFound,

    #[error("exceed max number of messages")]
    ExceedMessageNum,

    /// A downstream dependency (store, broker, upstream service) failed.
    /// Eligible for retry; surfaces as 500 / `Unavailable` once exhausted.
    #[error("{context}: {source}")]
    Unavailable {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{0}")]
    Message(String),
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    #[must_use]
    pub fn unavailable(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unavailable {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether a retry against the same dependency may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// The HTTP status this kind maps to at the outermost handler.
    #[must_use]
    pub fn http_status(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Self::InvalidParam | Self::ExceedMessageNum => StatusCode::BAD_REQUEST,
            Self::Unauthorized | Self::TokenExpired | Self::InvalidToken => {
                StatusCode::UNAUTHORIZED
            },
            Self::UserNotFound | Self::SessionNotFound | Self::ChannelOrUserNotFound => {
                StatusCode::NOT_FOUND
            },
            Self::Unavailable { .. } | Self::Message(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
