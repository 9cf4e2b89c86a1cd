use shared::error::ErrorClass;
use thiserror::Error;

/// Failure of a single page fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("malformed page: {0}")]
    Protocol(String),
}

impl FetchError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transport(_) => ErrorClass::Transport,
            // The data engine rejecting a query is a logical failure on its side.
            Self::Query(_) => ErrorClass::Service,
            Self::Protocol(_) => ErrorClass::Protocol,
        }
    }
}

/// Failure of a favorite mutation. `Service` may still carry the value the
/// server reports as realized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("unexpected http status {status}")]
    Http { status: u16 },
    #[error("request timed out")]
    TimedOut,
    #[error("request cancelled")]
    Cancelled,
    #[error("service failure code {code}")]
    Service {
        code: i64,
        server_value: Option<bool>,
    },
    #[error("malformed response: {0}")]
    Protocol(String),
}

impl MutationError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transport(_) | Self::Http { .. } | Self::TimedOut | Self::Cancelled => {
                ErrorClass::Transport
            }
            Self::Service { .. } => ErrorClass::Service,
            Self::Protocol(_) => ErrorClass::Protocol,
        }
    }

    pub fn server_value(&self) -> Option<bool> {
        match self {
            Self::Service { server_value, .. } => *server_value,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for MutationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::TimedOut
        } else if err.is_decode() {
            Self::Protocol(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
