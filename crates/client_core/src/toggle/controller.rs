use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use shared::domain::ImageId;
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, error, info};

use super::{
    coordinator::{ToggleCommand, ToggleCoordinator, ToggleEvent, ToggleRequest},
    service::RemoteMutationService,
};
use crate::{
    error::MutationError, favorites::FavoriteSnapshot, notify::Notification, ControllerConfig,
};

/// Runs a [`ToggleCoordinator`] on a background task.
///
/// Events that are already queued are handled as one batch before any
/// mutation is dispatched, so a toggle undone within the same batch never
/// reaches the network. Its cancelled settlement is still fed back.
pub struct ToggleController {
    inbox: mpsc::UnboundedSender<ToggleEvent>,
    submitted: AtomicU64,
    progress: watch::Receiver<Progress>,
    favorites: watch::Receiver<FavoriteSnapshot>,
    notifications: broadcast::Sender<Notification>,
    task: JoinHandle<()>,
}

impl ToggleController {
    pub fn spawn(service: Arc<dyn RemoteMutationService>, config: ControllerConfig) -> Self {
        let (inbox, rx) = mpsc::unbounded_channel();
        let coordinator = ToggleCoordinator::new();
        let (favorites_tx, favorites) = watch::channel(coordinator.favorites());
        let (progress_tx, progress) = watch::channel(Progress::default());
        let (notifications, _) = broadcast::channel(64);
        let task = tokio::spawn(run_toggles(
            coordinator,
            service,
            config.toggle_timeout,
            rx,
            Publish {
                favorites: favorites_tx,
                progress: progress_tx,
                notifications: notifications.clone(),
            },
        ));
        info!("fave: toggle controller started");
        Self {
            inbox,
            submitted: AtomicU64::new(0),
            progress,
            favorites,
            notifications,
            task,
        }
    }

    pub fn toggle(&self, image_id: ImageId) {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        if self.inbox.send(ToggleEvent::Toggle(image_id)).is_err() {
            debug!("fave: toggle controller already stopped");
        }
    }

    /// Resolves once every toggle submitted so far has been handled and no
    /// mutation is in flight.
    pub async fn settled(&self) {
        let target = self.submitted.load(Ordering::SeqCst);
        let mut progress = self.progress.clone();
        let _ = progress
            .wait_for(|progress| progress.handled >= target && progress.in_flight == 0)
            .await;
    }

    pub fn favorites(&self) -> FavoriteSnapshot {
        self.favorites.borrow().clone()
    }

    pub fn is_faved(&self, image_id: &ImageId) -> bool {
        self.favorites
            .borrow()
            .get(image_id)
            .copied()
            .unwrap_or(false)
    }

    pub fn subscribe(&self) -> watch::Receiver<FavoriteSnapshot> {
        self.favorites.clone()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Sender side of the notification channel, for components that want to
    /// raise messages on the same stream.
    pub fn notifier(&self) -> broadcast::Sender<Notification> {
        self.notifications.clone()
    }
}

impl Drop for ToggleController {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Progress {
    handled: u64,
    in_flight: usize,
}

struct Publish {
    favorites: watch::Sender<FavoriteSnapshot>,
    progress: watch::Sender<Progress>,
    notifications: broadcast::Sender<Notification>,
}

async fn run_toggles(
    mut coordinator: ToggleCoordinator,
    service: Arc<dyn RemoteMutationService>,
    timeout: Duration,
    mut inbox: mpsc::UnboundedReceiver<ToggleEvent>,
    publish: Publish,
) {
    let notifications = &publish.notifications;
    let mut handled = 0u64;
    let mut tasks: JoinSet<ToggleEvent> = JoinSet::new();
    loop {
        let first = tokio::select! {
            biased;
            Some(joined) = tasks.join_next() => match joined {
                Ok(event) => event,
                Err(err) => {
                    if !err.is_cancelled() {
                        error!("fave: mutation task failed: {err}");
                    }
                    continue;
                }
            },
            message = inbox.recv() => match message {
                Some(event) => event,
                None => break,
            },
        };

        let mut batch = vec![first];
        while let Ok(event) = inbox.try_recv() {
            batch.push(event);
        }

        let mut outgoing = Vec::new();
        for event in batch {
            if matches!(event, ToggleEvent::Toggle(_)) {
                handled += 1;
            }
            apply(&mut coordinator, event, &mut outgoing, notifications);
        }

        // Requests cancelled by a later toggle in this batch settle immediately.
        let mut pending = outgoing;
        while !pending.is_empty() {
            let mut next = Vec::new();
            for request in pending {
                if request.token.is_cancelled() {
                    debug!(
                        image_id = %request.image_id,
                        request_id = %request.request_id,
                        "fave: dropping request superseded before dispatch"
                    );
                    let settled = ToggleEvent::Settled {
                        image_id: request.image_id,
                        request_id: request.request_id,
                        outcome: Err(MutationError::Cancelled),
                    };
                    apply(&mut coordinator, settled, &mut next, notifications);
                } else {
                    tasks.spawn(send_request(Arc::clone(&service), request, timeout));
                }
            }
            pending = next;
        }

        publish.favorites.send_replace(coordinator.favorites());
        publish.progress.send_replace(Progress {
            handled,
            in_flight: coordinator.in_flight_count(),
        });
    }

    coordinator.cancel_all();
    debug!("fave: inbox closed, stopping");
}

fn apply(
    coordinator: &mut ToggleCoordinator,
    event: ToggleEvent,
    outgoing: &mut Vec<ToggleRequest>,
    notifications: &broadcast::Sender<Notification>,
) {
    for command in coordinator.handle(event) {
        match command {
            ToggleCommand::Send(request) => outgoing.push(request),
            ToggleCommand::Notify(notification) => {
                let _ = notifications.send(notification);
            }
        }
    }
}

async fn send_request(
    service: Arc<dyn RemoteMutationService>,
    request: ToggleRequest,
    timeout: Duration,
) -> ToggleEvent {
    let outcome = tokio::select! {
        biased;
        _ = request.token.cancelled() => Err(MutationError::Cancelled),
        _ = tokio::time::sleep(timeout) => {
            request.token.cancel();
            Err(MutationError::TimedOut)
        }
        result = service.set_favorite(&request.image_id, request.desired, request.token.clone()) => result,
    };
    ToggleEvent::Settled {
        image_id: request.image_id,
        request_id: request.request_id,
        outcome,
    }
}

#[cfg(test)]
#[path = "../tests/toggle_controller_tests.rs"]
mod tests;
