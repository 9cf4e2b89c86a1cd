//! Optimistic favorite toggles against the remote favorites service.

mod controller;
mod coordinator;
mod service;

pub use controller::ToggleController;
pub use coordinator::{RequestId, ToggleCommand, ToggleCoordinator, ToggleEvent, ToggleRequest};
pub use service::{FavoriteAck, HttpFavoriteService, RemoteMutationService};
