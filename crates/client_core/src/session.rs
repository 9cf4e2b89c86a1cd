use std::sync::Arc;

use anyhow::Result;
use shared::domain::{BookId, Collection, Cursor, Image, ImageId, ViewerMode};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    error::FetchError,
    favorites::FavoriteSnapshot,
    link::{AuthFlagStore, Authoriser, LinkController, LinkState},
    notify::Notification,
    source::SourceFactory,
    stream::{StreamController, StreamSnapshot},
    toggle::{RemoteMutationService, ToggleController},
    ControllerConfig,
};

/// External collaborators a session is built from.
#[derive(Clone)]
pub struct SessionPorts {
    pub sources: Arc<dyn SourceFactory>,
    pub favorites: Arc<dyn RemoteMutationService>,
    pub auth_flag: Arc<dyn AuthFlagStore>,
    pub authoriser: Arc<dyn Authoriser>,
}

/// An image together with its current favorite flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryItem {
    pub image: Image,
    pub is_faved: bool,
}

impl GalleryItem {
    pub fn annotate<'a>(
        images: impl IntoIterator<Item = &'a Image>,
        favorites: &FavoriteSnapshot,
    ) -> Vec<GalleryItem> {
        images
            .into_iter()
            .map(|image| GalleryItem {
                is_faved: favorites.get(&image.id).copied().unwrap_or(false),
                image: image.clone(),
            })
            .collect()
    }
}

/// Glue between the front-end and the controllers: one main stream, an
/// optional book stream on top of it, and a single toggle controller.
pub struct GallerySession {
    config: ControllerConfig,
    sources: Arc<dyn SourceFactory>,
    mode: ViewerMode,
    main: StreamController,
    book: Option<StreamController>,
    toggles: ToggleController,
    link: LinkController,
}

impl GallerySession {
    pub async fn start(ports: SessionPorts, mode: ViewerMode, config: ControllerConfig) -> Result<Self> {
        let toggles = ToggleController::spawn(ports.favorites, config);
        let link = LinkController::start(ports.auth_flag, ports.authoriser, toggles.notifier()).await?;
        let main = open_stream(&ports.sources, Collection::Mode(mode), None, config);
        info!(%mode, link = %link.state(), "session: started");
        Ok(Self {
            config,
            sources: ports.sources,
            mode,
            main,
            book: None,
            toggles,
            link,
        })
    }

    pub fn mode(&self) -> ViewerMode {
        self.mode
    }

    pub fn open_book_id(&self) -> Option<BookId> {
        self.book.as_ref().and_then(|stream| match stream.collection() {
            Collection::Book(book_id) => Some(book_id),
            Collection::Mode(_) => None,
        })
    }

    /// The collection `request_range` currently feeds.
    pub fn active_collection(&self) -> Collection {
        self.active_stream().collection()
    }

    pub fn active_stream(&self) -> &StreamController {
        self.book.as_ref().unwrap_or(&self.main)
    }

    pub fn main_stream(&self) -> &StreamController {
        &self.main
    }

    /// Switches the main stream to `mode`, discarding it and any open book.
    /// Selecting the active mode only closes the book, if one is open.
    pub fn select_mode(&mut self, mode: ViewerMode) -> bool {
        if mode == self.mode {
            debug!(%mode, "session: mode already active");
            return self.close_book();
        }
        self.replace_main(mode, None);
        true
    }

    /// Like [`select_mode`](Self::select_mode) but continues from a saved
    /// cursor. Always rebuilds the stream.
    pub fn resume_mode(&mut self, mode: ViewerMode, cursor: Cursor) {
        self.replace_main(mode, Some(cursor));
    }

    pub fn open_book(&mut self, book_id: BookId) -> bool {
        if self.open_book_id() == Some(book_id) {
            debug!(%book_id, "session: book already open");
            return false;
        }
        info!(%book_id, "session: opening book");
        self.book = Some(open_stream(
            &self.sources,
            Collection::Book(book_id),
            None,
            self.config,
        ));
        true
    }

    pub fn close_book(&mut self) -> bool {
        match self.book.take() {
            Some(stream) => {
                info!(collection = %stream.collection(), "session: closing book");
                true
            }
            None => false,
        }
    }

    pub fn request_range(&self, start: usize, count: usize) {
        self.active_stream().request_range(start, count);
    }

    /// Forwards a toggle when the account is linked. Returns whether it was
    /// accepted.
    pub fn toggle(&self, image_id: ImageId) -> bool {
        if !self.link.is_authorised() {
            debug!(%image_id, link = %self.link.state(), "session: toggle ignored, account not linked");
            return false;
        }
        self.toggles.toggle(image_id);
        true
    }

    pub async fn authorise(&self) -> Result<LinkState> {
        self.link.authorise().await
    }

    pub async fn storage_reported_authorised(&self) -> Result<()> {
        self.link.storage_reported_authorised().await
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    pub fn stream_snapshot(&self) -> StreamSnapshot {
        self.active_stream().snapshot()
    }

    pub fn favorites(&self) -> FavoriteSnapshot {
        self.toggles.favorites()
    }

    pub fn toggles(&self) -> &ToggleController {
        &self.toggles
    }

    /// Items of the active stream annotated with their favorite flags.
    pub fn items(&self) -> Vec<GalleryItem> {
        let snapshot = self.stream_snapshot();
        GalleryItem::annotate(snapshot.items.iter(), &self.favorites())
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.toggles.subscribe_notifications()
    }

    pub fn subscribe_stream_errors(&self) -> broadcast::Receiver<FetchError> {
        self.active_stream().subscribe_errors()
    }

    fn replace_main(&mut self, mode: ViewerMode, cursor: Option<Cursor>) {
        info!(from = %self.mode, to = %mode, resumed = cursor.is_some(), "session: switching mode");
        self.book = None;
        self.mode = mode;
        self.main = open_stream(&self.sources, Collection::Mode(mode), cursor, self.config);
    }
}

fn open_stream(
    sources: &Arc<dyn SourceFactory>,
    collection: Collection,
    cursor: Option<Cursor>,
    config: ControllerConfig,
) -> StreamController {
    let source = sources.source_for(collection);
    match cursor {
        Some(cursor) => StreamController::spawn_from(collection, source, config, cursor),
        None => StreamController::spawn(collection, source, config),
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
