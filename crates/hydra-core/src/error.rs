//! Error types for the hydra RPC gateway

/// Result type alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for the gateway
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error (bad YAML, invalid URL, failed validation)
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid inbound request (bad body, undecodable gzip payload)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Transport failure talking to an upstream provider
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Upstream did not answer within the configured deadline
    #[error("upstream request timed out")]
    UpstreamTimeout,

    /// No provider is currently eligible to serve a request
    #[error("no healthy target available")]
    NoHealthyTarget,

    /// HTTP protocol error while building a request or response
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    /// JSON (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Listener or task failure at runtime
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Map an error to the HTTP status served to the client.
    pub fn to_status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::Upstream(_) | Error::UpstreamTimeout => StatusCode::BAD_GATEWAY,
            Error::NoHealthyTarget => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
