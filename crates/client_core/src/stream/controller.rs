use std::sync::Arc;

use shared::domain::{Collection, Cursor};
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::{JoinHandle, JoinSet},
};
use tracing::{debug, error, info};

use super::machine::{StreamCommand, StreamEvent, StreamMachine, StreamSnapshot};
use crate::{error::FetchError, source::DataSource, ControllerConfig};

/// Owns one [`StreamMachine`] on a background task. Dropping the controller
/// aborts the task together with any fetch or cooldown it was waiting on.
pub struct StreamController {
    collection: Collection,
    inbox: mpsc::UnboundedSender<StreamEvent>,
    snapshots: watch::Receiver<StreamSnapshot>,
    errors: broadcast::Sender<FetchError>,
    task: JoinHandle<()>,
}

impl StreamController {
    pub fn spawn(
        collection: Collection,
        source: Arc<dyn DataSource>,
        config: ControllerConfig,
    ) -> Self {
        let machine = StreamMachine::new(collection, source.order());
        Self::spawn_machine(collection, machine, source, config)
    }

    /// Starts a stream at a previously saved cursor.
    pub fn spawn_from(
        collection: Collection,
        source: Arc<dyn DataSource>,
        config: ControllerConfig,
        cursor: Cursor,
    ) -> Self {
        let machine = StreamMachine::resume_from(collection, source.order(), cursor);
        Self::spawn_machine(collection, machine, source, config)
    }

    fn spawn_machine(
        collection: Collection,
        machine: StreamMachine,
        source: Arc<dyn DataSource>,
        config: ControllerConfig,
    ) -> Self {
        let (inbox, rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshots) = watch::channel(machine.snapshot());
        let (errors, _) = broadcast::channel(16);
        info!(%collection, "stream: controller started");
        let task = tokio::spawn(run_stream(
            machine,
            source,
            config,
            rx,
            snapshot_tx,
            errors.clone(),
        ));
        Self {
            collection,
            inbox,
            snapshots,
            errors,
            task,
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Announces that items `[start, start + count)` will be needed soon.
    pub fn request_range(&self, start: usize, count: usize) {
        if self
            .inbox
            .send(StreamEvent::RequestRange { start, count })
            .is_err()
        {
            debug!(collection = %self.collection, "stream: controller already stopped");
        }
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamSnapshot> {
        self.snapshots.clone()
    }

    /// Each failed fetch is delivered here exactly once.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<FetchError> {
        self.errors.subscribe()
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        self.task.abort();
        debug!(collection = %self.collection, "stream: controller dropped");
    }
}

async fn run_stream(
    mut machine: StreamMachine,
    source: Arc<dyn DataSource>,
    config: ControllerConfig,
    mut inbox: mpsc::UnboundedReceiver<StreamEvent>,
    snapshots: watch::Sender<StreamSnapshot>,
    errors: broadcast::Sender<FetchError>,
) {
    let mut tasks: JoinSet<StreamEvent> = JoinSet::new();
    loop {
        let event = tokio::select! {
            biased;
            Some(joined) = tasks.join_next() => match joined {
                Ok(event) => event,
                Err(err) if err.is_cancelled() => continue,
                Err(err) => StreamEvent::PageFailed(FetchError::Transport(format!(
                    "fetch task failed: {err}"
                ))),
            },
            message = inbox.recv() => match message {
                Some(event) => event,
                None => break,
            },
        };

        for command in machine.handle(event) {
            match command {
                StreamCommand::Fetch(request) => {
                    let source = Arc::clone(&source);
                    tasks.spawn(async move {
                        match source.fetch_page(request).await {
                            Ok(page) => StreamEvent::PageLoaded(page),
                            Err(err) => StreamEvent::PageFailed(err),
                        }
                    });
                }
                StreamCommand::StartCooldown => {
                    let cooldown = config.cooldown;
                    tasks.spawn(async move {
                        tokio::time::sleep(cooldown).await;
                        StreamEvent::CooldownElapsed
                    });
                }
                StreamCommand::ReportError(err) => {
                    error!(
                        collection = %machine.collection(),
                        class = %err.class(),
                        "stream: page fetch failed: {err}"
                    );
                    let _ = errors.send(err);
                }
            }
        }

        snapshots.send_replace(machine.snapshot());
    }
    debug!("stream: inbox closed, stopping");
}

#[cfg(test)]
#[path = "../tests/stream_controller_tests.rs"]
mod tests;
