use thiserror::Error;

/// Terminal outcomes of dispatching a request. Both are answered with a 503.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InternalError {
    #[error("No backend server available")]
    NoBackendAvailable,

    #[error("Max attempts reached")]
    MaxAttemptsReached,
}

/// Failure to forward a single request to a backend server. Always recoverable: the dispatcher
/// either retries the same backend or fails over to another one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ForwardError {
    #[error("backend server did not answer in time")]
    Timeout,

    #[error("backend server unreachable: {0}")]
    Transport(String),

    #[error("request cannot be forwarded: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for ForwardError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ForwardError::Timeout
        } else if e.is_builder() {
            ForwardError::InvalidRequest(e.to_string())
        } else {
            ForwardError::Transport(e.to_string())
        }
    }
}

/// Invalid startup configuration. Reported before the server starts listening.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Please provide one or more backends to load balance")]
    NoBackends,

    #[error("Invalid backend address {address}: {reason}")]
    InvalidBackendAddress { address: String, reason: String },
}
