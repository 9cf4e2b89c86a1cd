use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    AuthFlagStore, GallerySession, HttpFavoriteService, LinkState, Notification, SessionPorts,
};
use shared::domain::{BookId, Collection, Cursor, ImageId, ViewerMode};
use storage::{CatalogQuery, Storage};
use tokio::sync::broadcast;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod auth;
mod config;

use auth::TerminalAuthoriser;
use config::Settings;

#[derive(Parser, Debug)]
#[command(about = "Browse the image catalog and manage favorites")]
struct Cli {
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[arg(long)]
    database_url: Option<String>,
    #[arg(long)]
    api_base_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print images of a viewer mode or a single book.
    Browse {
        #[arg(long)]
        mode: Option<ViewerMode>,
        #[arg(long)]
        book: Option<i64>,
        /// Number of images to load; defaults to one page.
        #[arg(long)]
        count: Option<usize>,
        /// Token printed by a previous browse, to continue where it stopped.
        #[arg(long)]
        cursor: Option<String>,
    },
    /// Favorite an image.
    Fave { image_id: String },
    /// Link the Flickr account.
    Link,
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let mut settings = config::load_settings(&cli.config)?;
    if let Some(database_url) = cli.database_url {
        settings.database_url = config::normalize_database_url(&database_url);
    }
    if let Some(api_base_url) = cli.api_base_url {
        settings.api_base_url = api_base_url;
    }

    let storage = Storage::new(&settings.database_url).await?;

    match cli.command {
        Command::Browse {
            mode,
            book,
            count,
            cursor,
        } => {
            let mut session =
                open_session(&storage, &settings, mode.unwrap_or(settings.default_mode)).await?;
            let count = count.unwrap_or(settings.page_size);
            browse(&mut session, settings.page_size, count, book.map(BookId), cursor).await?;
        }
        Command::Fave { image_id } => {
            let session = open_session(&storage, &settings, settings.default_mode).await?;
            fave(&session, ImageId::new(image_id)).await?;
        }
        Command::Link => {
            let session = open_session(&storage, &settings, settings.default_mode).await?;
            link(&session).await?;
        }
        Command::Status => status(&storage, &settings).await?,
    }

    Ok(())
}

async fn open_session(
    storage: &Storage,
    settings: &Settings,
    mode: ViewerMode,
) -> Result<GallerySession> {
    let favorites =
        HttpFavoriteService::new(&settings.api_base_url, settings.session_cookie.clone())
            .with_context(|| format!("invalid api base url '{}'", settings.api_base_url))?;
    let ports = SessionPorts {
        sources: Arc::new(storage.clone()),
        favorites: Arc::new(favorites),
        auth_flag: Arc::new(storage.clone()),
        authoriser: Arc::new(TerminalAuthoriser::new(&settings.api_base_url)),
    };
    GallerySession::start(ports, mode, settings.controller_config()).await
}

async fn browse(
    session: &mut GallerySession,
    page_size: usize,
    count: usize,
    book: Option<BookId>,
    cursor: Option<String>,
) -> Result<()> {
    if let Some(token) = cursor {
        match Cursor::from_token(&token) {
            Ok(cursor) => session.resume_mode(session.mode(), cursor),
            Err(err) => warn!("browse: discarding cursor token: {err}"),
        }
    }
    if let Some(book_id) = book {
        session.open_book(book_id);
    }

    // Scroll through the collection a page at a time.
    let page_size = page_size.max(1);
    let mut loaded = 0;
    while loaded < count {
        let target = loaded + page_size.min(count - loaded);
        session.request_range(loaded, target - loaded);
        let snapshot = session
            .active_stream()
            .subscribe()
            .wait_for(|snapshot| {
                snapshot.items.len() >= target || snapshot.exhausted || snapshot.last_error.is_some()
            })
            .await
            .context("image stream stopped")?
            .clone();
        if let Some(err) = snapshot.last_error {
            bail!("failed to load {}: {err}", snapshot.collection);
        }
        loaded = snapshot.items.len();
        if snapshot.exhausted {
            break;
        }
    }

    for item in session.items() {
        let image = &item.image;
        println!(
            "{}\t{}\tbook={}\tratio={:.2}\tfaves={}\tviews={}{}\t{}",
            image.rowid,
            image.id,
            image.book_id,
            image.aspect_ratio(),
            image.faves,
            image.views,
            if item.is_faved { "\t*" } else { "" },
            image.thumbnail_url()
        );
    }

    let snapshot = session.stream_snapshot();
    if snapshot.exhausted {
        println!("end of {}", snapshot.collection);
    } else if let Some(cursor) = snapshot.cursor {
        println!("next cursor: {}", cursor.to_token()?);
    }
    Ok(())
}

async fn fave(session: &GallerySession, image_id: ImageId) -> Result<()> {
    if session.link_state() != LinkState::Authorised {
        bail!("account is not linked, run `gallery link` first");
    }

    let mut notifications = session.subscribe_notifications();
    session.toggle(image_id.clone());
    session.toggles().settled().await;

    let failed = print_notifications(&mut notifications);
    let faved = session.toggles().is_faved(&image_id);
    println!("{image_id}: {}", if faved { "faved" } else { "not faved" });
    if failed {
        bail!("favorite change for {image_id} was rolled back");
    }
    Ok(())
}

async fn link(session: &GallerySession) -> Result<()> {
    if session.link_state() == LinkState::Authorised {
        println!("account already linked");
        return Ok(());
    }

    let mut notifications = session.subscribe_notifications();
    let state = session.authorise().await?;
    print_notifications(&mut notifications);
    println!("link state: {state}");
    Ok(())
}

async fn status(storage: &Storage, settings: &Settings) -> Result<()> {
    storage.health_check().await?;
    println!("database: {}", settings.database_url);
    println!("api: {}", settings.api_base_url);
    let linked = storage.load_authorised().await?;
    println!("account: {}", if linked { "linked" } else { "not linked" });

    for mode in ViewerMode::ALL {
        let filter = CatalogQuery::for_collection(Collection::Mode(mode)).filter;
        let count = storage.count_images(filter).await?;
        println!("{:<18}{count}", mode.as_str());
    }
    Ok(())
}

/// Prints queued notifications, returning whether any was an error.
fn print_notifications(notifications: &mut broadcast::Receiver<Notification>) -> bool {
    let mut saw_error = false;
    while let Ok(notification) = notifications.try_recv() {
        if notification.is_error() {
            eprintln!("error: {notification}");
            saw_error = true;
        } else {
            println!("{notification}");
        }
    }
    saw_error
}
