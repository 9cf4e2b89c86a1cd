//! Linking the user's Flickr account. Favorite toggles are only accepted once
//! the link is authorised.

use std::{fmt, sync::Arc};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use shared::protocol::AuthResultMessage;
use storage::Storage;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};

use crate::notify::{Notification, LINK_SUCCEEDED, LINK_WINDOW_CLOSED};

pub const AUTH_FLAG_KEY: &str = "flickr-authorised";
pub const AUTH_FLAG_VALUE: &str = "yes";

/// Durable "previously authorised" marker.
#[async_trait]
pub trait AuthFlagStore: Send + Sync {
    async fn load_authorised(&self) -> Result<bool>;
    async fn store_authorised(&self) -> Result<()>;
}

#[async_trait]
impl AuthFlagStore for Storage {
    async fn load_authorised(&self) -> Result<bool> {
        let value = self.load_setting(AUTH_FLAG_KEY).await?;
        Ok(value.as_deref() == Some(AUTH_FLAG_VALUE))
    }

    async fn store_authorised(&self) -> Result<()> {
        self.save_setting(AUTH_FLAG_KEY, AUTH_FLAG_VALUE).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Succeeded,
    Failed(String),
    WindowClosed,
}

impl From<AuthResultMessage> for AuthOutcome {
    fn from(message: AuthResultMessage) -> Self {
        if message.success {
            Self::Succeeded
        } else {
            Self::Failed(
                message
                    .error
                    .unwrap_or_else(|| "authorisation failed".to_string()),
            )
        }
    }
}

/// Runs the interactive authorisation handshake.
#[async_trait]
pub trait Authoriser: Send + Sync {
    async fn authorise(&self) -> Result<AuthOutcome>;
}

pub struct MissingAuthoriser;

#[async_trait]
impl Authoriser for MissingAuthoriser {
    async fn authorise(&self) -> Result<AuthOutcome> {
        Err(anyhow!("account linking is not available"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    NotAuthorised,
    Authorising,
    Authorised,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotAuthorised => "not authorised",
            Self::Authorising => "authorising",
            Self::Authorised => "authorised",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Authorise,
    AuthSucceeded,
    AuthFailed(String),
    AuthWindowClosed,
    /// Another session stored the marker.
    StorageReportedAuthorised,
}

impl From<AuthOutcome> for LinkEvent {
    fn from(outcome: AuthOutcome) -> Self {
        match outcome {
            AuthOutcome::Succeeded => Self::AuthSucceeded,
            AuthOutcome::Failed(message) => Self::AuthFailed(message),
            AuthOutcome::WindowClosed => Self::AuthWindowClosed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    StartAuthorisation,
    PersistAuthorised,
    Notify(Notification),
}

#[derive(Debug)]
pub struct AccountLink {
    state: LinkState,
}

impl AccountLink {
    pub fn starting(previously_authorised: bool) -> Self {
        let state = if previously_authorised {
            LinkState::Authorised
        } else {
            LinkState::NotAuthorised
        };
        Self { state }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn handle(&mut self, event: LinkEvent) -> Vec<LinkCommand> {
        match (self.state, event) {
            (LinkState::NotAuthorised, LinkEvent::Authorise) => {
                self.state = LinkState::Authorising;
                vec![LinkCommand::StartAuthorisation]
            }
            (LinkState::NotAuthorised, LinkEvent::StorageReportedAuthorised) => {
                self.state = LinkState::Authorised;
                vec![LinkCommand::PersistAuthorised]
            }
            (LinkState::Authorising, LinkEvent::AuthSucceeded) => {
                self.state = LinkState::Authorised;
                vec![
                    LinkCommand::Notify(Notification::Info(LINK_SUCCEEDED.to_string())),
                    LinkCommand::PersistAuthorised,
                ]
            }
            (LinkState::Authorising, LinkEvent::AuthFailed(message)) => {
                self.state = LinkState::NotAuthorised;
                vec![LinkCommand::Notify(Notification::Error(message))]
            }
            (LinkState::Authorising, LinkEvent::AuthWindowClosed) => {
                self.state = LinkState::NotAuthorised;
                vec![LinkCommand::Notify(Notification::Info(
                    LINK_WINDOW_CLOSED.to_string(),
                ))]
            }
            (state, event) => {
                debug!(%state, ?event, "link: event ignored");
                Vec::new()
            }
        }
    }
}

/// Drives [`AccountLink`] against the flag store and the authoriser.
pub struct LinkController {
    link: Mutex<AccountLink>,
    state: watch::Sender<LinkState>,
    store: Arc<dyn AuthFlagStore>,
    authoriser: Arc<dyn Authoriser>,
    notifications: broadcast::Sender<Notification>,
}

impl LinkController {
    /// Reads the persisted marker once and starts in the matching state.
    pub async fn start(
        store: Arc<dyn AuthFlagStore>,
        authoriser: Arc<dyn Authoriser>,
        notifications: broadcast::Sender<Notification>,
    ) -> Result<Self> {
        let previously_authorised = store
            .load_authorised()
            .await
            .context("failed to read account link marker")?;
        let link = AccountLink::starting(previously_authorised);
        info!(state = %link.state(), "link: starting");
        let (state, _) = watch::channel(link.state());
        Ok(Self {
            link: Mutex::new(link),
            state,
            store,
            authoriser,
            notifications,
        })
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn is_authorised(&self) -> bool {
        self.state() == LinkState::Authorised
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Runs the handshake if the account is not linked yet and returns the
    /// resulting state. A handshake already in progress is left alone.
    pub async fn authorise(&self) -> Result<LinkState> {
        if !self.dispatch(LinkEvent::Authorise).await? {
            return Ok(self.state());
        }

        let event = match self.authoriser.authorise().await {
            Ok(outcome) => LinkEvent::from(outcome),
            Err(err) => {
                warn!("link: authorisation flow failed: {err:#}");
                LinkEvent::AuthFailed(format!("{err:#}"))
            }
        };
        self.dispatch(event).await?;
        Ok(self.state())
    }

    pub async fn storage_reported_authorised(&self) -> Result<()> {
        self.dispatch(LinkEvent::StorageReportedAuthorised).await?;
        Ok(())
    }

    /// Returns whether the handshake has to be started.
    async fn dispatch(&self, event: LinkEvent) -> Result<bool> {
        let (commands, state) = {
            let mut link = self.link.lock().await;
            let commands = link.handle(event);
            (commands, link.state())
        };
        self.state.send_replace(state);

        let mut start = false;
        for command in commands {
            match command {
                LinkCommand::StartAuthorisation => start = true,
                LinkCommand::PersistAuthorised => {
                    self.store
                        .store_authorised()
                        .await
                        .context("failed to persist account link marker")?;
                    info!("link: account authorised");
                }
                LinkCommand::Notify(notification) => {
                    let _ = self.notifications.send(notification);
                }
            }
        }
        Ok(start)
    }
}
