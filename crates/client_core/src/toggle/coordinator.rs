use std::{collections::HashMap, fmt};

use shared::{domain::ImageId, protocol::FaveAction};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::service::FavoriteAck;
use crate::{
    error::MutationError,
    favorites::{FavoriteSnapshot, FavoriteStore},
    notify::Notification,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One attempt to move an image to `desired`.
#[derive(Debug, Clone)]
pub struct ToggleRequest {
    pub request_id: RequestId,
    pub image_id: ImageId,
    pub desired: bool,
    /// Set when this request superseded an unresolved one for the same image.
    pub is_undo: bool,
    pub token: CancellationToken,
}

impl ToggleRequest {
    pub fn action(&self) -> FaveAction {
        FaveAction::for_desired(self.desired)
    }
}

#[derive(Debug, Clone)]
pub enum ToggleEvent {
    Toggle(ImageId),
    Settled {
        image_id: ImageId,
        request_id: RequestId,
        outcome: Result<FavoriteAck, MutationError>,
    },
}

#[derive(Debug, Clone)]
pub enum ToggleCommand {
    Send(ToggleRequest),
    Notify(Notification),
}

/// Pure bookkeeping for favorite toggles: owns the favorite flags and at most
/// one in-flight request per image.
#[derive(Debug, Default)]
pub struct ToggleCoordinator {
    favorites: FavoriteStore,
    in_flight: HashMap<ImageId, ToggleRequest>,
    next_request_id: u64,
}

impl ToggleCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_faved(&self, image_id: &ImageId) -> bool {
        self.favorites.get(image_id)
    }

    pub fn favorites(&self) -> FavoriteSnapshot {
        self.favorites.snapshot()
    }

    pub fn in_flight(&self, image_id: &ImageId) -> Option<&ToggleRequest> {
        self.in_flight.get(image_id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn handle(&mut self, event: ToggleEvent) -> Vec<ToggleCommand> {
        match event {
            ToggleEvent::Toggle(image_id) => self.toggle(image_id),
            ToggleEvent::Settled {
                image_id,
                request_id,
                outcome,
            } => self.settle(image_id, request_id, outcome),
        }
    }

    /// Cancels every in-flight request. Their settlements still arrive and are
    /// treated as stale.
    pub fn cancel_all(&mut self) {
        for request in self.in_flight.values() {
            request.token.cancel();
        }
    }

    fn toggle(&mut self, image_id: ImageId) -> Vec<ToggleCommand> {
        let desired = !self.favorites.get(&image_id);

        let mut is_undo = false;
        if let Some(current) = self.in_flight.get(&image_id) {
            if current.desired == desired {
                debug!(%image_id, desired, "fave: already toggling to the same state");
                return Vec::new();
            }
            info!(
                %image_id,
                superseded = %current.request_id,
                "fave: cancelling request superseded by a new toggle"
            );
            current.token.cancel();
            is_undo = true;
        }

        self.favorites.set(&image_id, desired);
        self.next_request_id += 1;
        let request = ToggleRequest {
            request_id: RequestId(self.next_request_id),
            image_id: image_id.clone(),
            desired,
            is_undo,
            token: CancellationToken::new(),
        };
        debug!(
            %image_id,
            request_id = %request.request_id,
            desired,
            is_undo,
            "fave: issuing toggle"
        );
        self.in_flight.insert(image_id, request.clone());
        vec![ToggleCommand::Send(request)]
    }

    fn settle(
        &mut self,
        image_id: ImageId,
        request_id: RequestId,
        outcome: Result<FavoriteAck, MutationError>,
    ) -> Vec<ToggleCommand> {
        let is_current = self
            .in_flight
            .get(&image_id)
            .is_some_and(|request| request.request_id == request_id);
        if !is_current {
            debug!(
                %image_id,
                %request_id,
                outcome = ?outcome,
                "fave: ignoring settlement of superseded request"
            );
            return Vec::new();
        }
        let Some(request) = self.in_flight.remove(&image_id) else {
            return Vec::new();
        };

        let action = request.action();
        let (value, report) = match outcome {
            Ok(FavoriteAck {
                confirmed: true,
                server_value,
            }) => (server_value.unwrap_or(request.desired), false),
            Ok(FavoriteAck {
                confirmed: false,
                server_value,
            }) => (server_value.unwrap_or(!request.desired), true),
            Err(MutationError::Cancelled) => (!request.desired, false),
            Err(err) => {
                warn!(
                    %image_id,
                    %request_id,
                    is_undo = request.is_undo,
                    class = %err.class(),
                    "fave: toggle failed: {err}"
                );
                (err.server_value().unwrap_or(!request.desired), true)
            }
        };

        self.favorites.set(&image_id, value);
        debug!(%image_id, %request_id, faved = value, "fave: toggle settled");

        if report {
            vec![ToggleCommand::Notify(Notification::fave_failed(action))]
        } else {
            Vec::new()
        }
    }
}
