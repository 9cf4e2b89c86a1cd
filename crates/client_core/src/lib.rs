//! Asynchronous controllers behind the gallery: the paginated image stream,
//! the optimistic favorite toggles and the account link that gates them.

use std::time::Duration;

pub mod error;
pub mod favorites;
pub mod link;
pub mod notify;
pub mod session;
pub mod source;
pub mod stream;
pub mod toggle;

pub use error::{FetchError, MutationError};
pub use favorites::{FavoriteSnapshot, FavoriteStore};
pub use link::{
    AccountLink, AuthFlagStore, AuthOutcome, Authoriser, LinkController, LinkEvent, LinkState,
    MissingAuthoriser, AUTH_FLAG_KEY, AUTH_FLAG_VALUE,
};
pub use notify::Notification;
pub use session::{GalleryItem, GallerySession, SessionPorts};
pub use source::{CatalogSource, DataSource, Page, PageRequest, SourceFactory};
pub use stream::{Items, StreamController, StreamPhase, StreamSnapshot};
pub use toggle::{
    FavoriteAck, HttpFavoriteService, RemoteMutationService, ToggleController, ToggleCoordinator,
};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(1000);
pub const DEFAULT_TOGGLE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Timing knobs shared by the controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Pause after every successful page before the next queued fetch starts.
    pub cooldown: Duration,
    /// Upper bound on a single favorite mutation; expiry cancels it.
    pub toggle_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            toggle_timeout: DEFAULT_TOGGLE_TIMEOUT,
        }
    }
}
