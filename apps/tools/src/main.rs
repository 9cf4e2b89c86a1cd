use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shared::domain::{BookId, Collection, ViewerMode};
use storage::{CatalogFilter, CatalogQuery, NewImage, Storage};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/gallery.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    InitDb,
    AddImage {
        id: String,
        book_id: i64,
        server: String,
        secret: String,
        original_secret: String,
        width: u32,
        height: u32,
        #[arg(long, default_value_t = 0)]
        faves: i64,
        #[arg(long, default_value_t = 0)]
        views: i64,
        #[arg(long, default_value_t = 0)]
        comments: i64,
    },
    /// Load a JSON array of images.
    Import { path: PathBuf },
    /// Fill the catalog with generated images.
    Seed {
        #[arg(long, default_value_t = 200)]
        images: u32,
        #[arg(long, default_value_t = 10)]
        books: u32,
    },
    Count {
        #[arg(long)]
        book: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::InitDb => {
            storage.health_check().await?;
            println!("catalog ready at {}", cli.database_url);
        }
        Command::AddImage {
            id,
            book_id,
            server,
            secret,
            original_secret,
            width,
            height,
            faves,
            views,
            comments,
        } => {
            let rowid = storage
                .insert_image(&NewImage {
                    id,
                    book_id,
                    server,
                    secret,
                    original_secret,
                    width,
                    height,
                    faves,
                    views,
                    comments,
                })
                .await?;
            println!("stored rowid={rowid}");
        }
        Command::Import { path } => {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read '{}'", path.display()))?;
            let images: Vec<NewImage> = serde_json::from_str(&raw)
                .with_context(|| format!("'{}' is not a json array of images", path.display()))?;
            for image in &images {
                storage.insert_image(image).await?;
            }
            println!("imported {} images", images.len());
        }
        Command::Seed { images, books } => {
            let books = books.max(1);
            for n in 0..images {
                storage.insert_image(&seeded_image(n, books)).await?;
            }
            println!("seeded {images} images across {books} books");
        }
        Command::Count { book } => {
            if let Some(book_id) = book {
                let filter = CatalogFilter::Book(BookId(book_id));
                println!("book/{book_id}: {}", storage.count_images(filter).await?);
            } else {
                for mode in ViewerMode::ALL {
                    let filter = CatalogQuery::for_collection(Collection::Mode(mode)).filter;
                    println!("{}: {}", mode, storage.count_images(filter).await?);
                }
            }
        }
    }

    Ok(())
}

/// Deterministic test data: roughly a third of the images are never faved
/// and most of those stay under fifty views.
fn seeded_image(n: u32, books: u32) -> NewImage {
    let n = i64::from(n);
    let faves = if n % 3 == 0 { 0 } else { (n * 7) % 13 };
    NewImage {
        id: format!("{}", 50_000_000_000 + n),
        book_id: 1 + n % i64::from(books),
        server: "65535".into(),
        secret: format!("{:010x}", n * 2_654_435_761 % 0xff_ffff_ffff),
        original_secret: format!("{:010x}", n * 40_503 % 0xff_ffff_ffff),
        width: 1024,
        height: if n % 2 == 0 { 768 } else { 1365 },
        faves,
        views: (n * 31) % 120,
        comments: n % 5,
    }
}
