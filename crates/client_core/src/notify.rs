use std::fmt;

use shared::protocol::FaveAction;

pub const LINK_SUCCEEDED: &str = "Flickr account successfully linked.";
pub const LINK_WINDOW_CLOSED: &str = "Authorisation window closed";

/// User-facing message raised by a controller. Rendering is up to the front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Info(String),
    Error(String),
}

impl Notification {
    pub fn fave_failed(action: FaveAction) -> Self {
        Self::Error(format!("Failed to {} image.", action.verb()))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Info(message) | Self::Error(message) => message,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}
