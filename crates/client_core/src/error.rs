use thiserror::Error;

/// Why one exchange with a remote service did not produce a usable response.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("service responded with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed response body: {0}")]
    Decode(String),
    /// For service implementations that fail before any transport is
    /// involved, e.g. an in-process stand-in with no backing service.
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl ExchangeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExchangeError::Transport(err) if err.is_timeout())
    }
}
