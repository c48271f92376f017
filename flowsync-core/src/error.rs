use thiserror::Error;

/// Classified failure of a single logical API call.
///
/// All three variants reach callers through the same type so that retry and
/// "resource is gone" decisions can be made on `status()` alone.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// No response was obtained (connect failure, timeout, broken body).
    #[error("Network error: {message}")]
    Network { message: String },

    /// The server answered with a non-success status.
    #[error("HTTP error ({status}): {body}")]
    Http { status: u16, body: String },

    /// The response body did not match the expected shape.
    #[error("Decode error: {message}")]
    Decode { message: String },
}

impl ApiError {
    /// HTTP status carried by the error, absent for `Network` and `Decode`.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the transport should retry after this error.
    pub fn is_retryable(&self, retryable_statuses: &[u16]) -> bool {
        match self {
            ApiError::Network { .. } => true,
            ApiError::Http { status, .. } => retryable_statuses.contains(status),
            ApiError::Decode { .. } => false,
        }
    }

    /// The server reports the resource no longer exists; retrying cannot help.
    pub fn is_gone(&self) -> bool {
        matches!(self.status(), Some(404) | Some(410))
    }

    /// A definitive answer from the server that polling again cannot change:
    /// any HTTP status outside `retryable_statuses`. Network and decode
    /// failures leave the resource state unknown, so they are never permanent.
    pub fn is_permanent(&self, retryable_statuses: &[u16]) -> bool {
        match self {
            ApiError::Http { status, .. } => !retryable_statuses.contains(status),
            ApiError::Network { .. } | ApiError::Decode { .. } => false,
        }
    }

    /// Short tag used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Network { .. } => "network",
            ApiError::Http { .. } => "http",
            ApiError::Decode { .. } => "decode",
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode {
                message: e.to_string(),
            }
        } else {
            ApiError::Network {
                message: e.to_string(),
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum FlowsyncError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Push channel error: {0}")]
    Push(String),

    #[error("Other error: {0}")]
    Other(String),
}
