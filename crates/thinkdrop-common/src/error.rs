use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    /// The backing database file is locked by another process. Retryable.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("embedder not initialised")]
    EmbedderNotReady,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("ocr error: {0}")]
    Ocr(String),

    #[error("capture error: {0}")]
    Capture(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Stable wire codes surfaced in the response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "INVALID_REQUEST")]
    InvalidRequest,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "PAYLOAD_TOO_LARGE")]
    PayloadTooLarge,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "EMBEDDING_FAILED")]
    EmbeddingFailed,
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::NotFound => "NOT_FOUND",
            Self::EmbeddingFailed => "EMBEDDING_FAILED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl Error {
    /// Map the error onto its stable wire code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::PayloadTooLarge(_) => ErrorCode::PayloadTooLarge,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Embedding(_) | Self::EmbedderNotReady => ErrorCode::EmbeddingFailed,
            Self::Database(_) | Self::StoreUnavailable(_) => ErrorCode::DatabaseError,
            Self::Config(_)
            | Self::Ocr(_)
            | Self::Capture(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// HTTP status for the uniform error envelope.
    pub fn http_status(&self) -> u16 {
        match self.code() {
            ErrorCode::InvalidRequest => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::NotFound => 404,
            ErrorCode::PayloadTooLarge => 413,
            ErrorCode::EmbeddingFailed
            | ErrorCode::DatabaseError
            | ErrorCode::InternalError => 500,
        }
    }

    /// Lock-contention errors are worth retrying with backoff; everything else is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}
