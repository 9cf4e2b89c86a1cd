use super::*;
use shared::domain::{BookId, Collection, ImageId, SortOrder, ViewerMode};

fn new_image(id: &str, book_id: i64, faves: i64, views: i64, comments: i64) -> NewImage {
    NewImage {
        id: id.to_string(),
        book_id,
        server: "3845".into(),
        secret: format!("s{id}"),
        original_secret: format!("o{id}"),
        width: 640,
        height: 480,
        faves,
        views,
        comments,
    }
}

async fn seeded() -> Storage {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    for image in [
        new_image("100", 1, 0, 10, 0),
        new_image("101", 1, 5, 300, 2),
        new_image("102", 2, 0, 80, 1),
        new_image("103", 2, 9, 900, 4),
        new_image("104", 1, 5, 300, 2),
        new_image("105", 3, 0, 5, 0),
    ] {
        storage.insert_image(&image).await.expect("insert");
    }
    storage
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = std::env::temp_dir().join(format!("gallery_storage_test_{suffix}"));
    let db_path = temp_root.join("nested").join("catalog.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );

    std::fs::remove_dir_all(temp_root).expect("cleanup");
}

#[test]
fn sqlite_path_ignores_memory_and_query_string() {
    assert_eq!(sqlite_path("sqlite::memory:"), None);
    assert_eq!(sqlite_path("postgres://db"), None);
    assert_eq!(
        sqlite_path("sqlite://./data/gallery.db?mode=rwc"),
        Some(PathBuf::from("./data/gallery.db"))
    );
}

#[tokio::test]
async fn reinserting_an_image_keeps_its_rowid_and_refreshes_counters() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let first = storage
        .insert_image(&new_image("500", 1, 0, 1, 0))
        .await
        .expect("insert");
    let again = storage
        .insert_image(&new_image("500", 1, 7, 40, 1))
        .await
        .expect("upsert");
    assert_eq!(first, again);

    let page = storage
        .fetch_images(
            &CatalogQuery::for_collection(Collection::Mode(ViewerMode::Popular)),
            10,
            None,
            true,
        )
        .await
        .expect("page");
    assert_eq!(page.images.len(), 1);
    assert_eq!(page.images[0].faves, 7);
}

#[tokio::test]
async fn counts_follow_filters() {
    let storage = seeded().await;
    assert_eq!(storage.count_images(CatalogFilter::All).await.expect("all"), 6);
    assert_eq!(
        storage.count_images(CatalogFilter::Popular).await.expect("popular"),
        3
    );
    assert_eq!(
        storage
            .count_images(CatalogFilter::Overlooked)
            .await
            .expect("overlooked"),
        2
    );
    assert_eq!(
        storage
            .count_images(CatalogFilter::Book(BookId(2)))
            .await
            .expect("book"),
        2
    );
}

#[tokio::test]
async fn rejects_zero_limit() {
    let storage = seeded().await;
    let query = CatalogQuery::for_collection(Collection::Mode(ViewerMode::Popular));
    let err = storage
        .fetch_images(&query, 0, None, true)
        .await
        .expect_err("zero limit");
    assert!(err.to_string().contains("positive"));
}

#[tokio::test]
async fn popular_pages_continue_after_cursor() {
    let storage = seeded().await;
    let query = CatalogQuery::for_collection(Collection::Mode(ViewerMode::Popular));

    let first = storage
        .fetch_images(&query, 2, None, true)
        .await
        .expect("first page");
    let ids: Vec<_> = first.images.iter().map(|image| image.id.as_str()).collect();
    assert_eq!(ids, ["103", "104"]);

    let cursor = first.cursor.expect("cursor");
    let second = storage
        .fetch_images(&query, 2, Some(&cursor), false)
        .await
        .expect("second page");
    let ids: Vec<_> = second.images.iter().map(|image| image.id.as_str()).collect();
    assert_eq!(ids, ["101"]);
}

#[tokio::test]
async fn initial_fetch_from_cursor_includes_the_cursor_row() {
    let storage = seeded().await;
    let query = CatalogQuery::for_collection(Collection::Book(BookId(1)));
    let first = storage
        .fetch_images(&query, 1, None, true)
        .await
        .expect("first");
    let cursor = first.cursor.expect("cursor");

    let resumed = storage
        .fetch_images(&query, 1, Some(&cursor), true)
        .await
        .expect("resumed");
    assert_eq!(resumed.images[0].id, first.images[0].id);

    let next = storage
        .fetch_images(&query, 1, Some(&cursor), false)
        .await
        .expect("next");
    assert_ne!(next.images[0].id, first.images[0].id);
}

#[tokio::test]
async fn book_query_only_returns_that_book() {
    let storage = seeded().await;
    let query = CatalogQuery::for_collection(Collection::Book(BookId(1)));
    let page = storage
        .fetch_images(&query, 10, None, true)
        .await
        .expect("page");
    assert_eq!(page.images.len(), 3);
    assert!(page.images.iter().all(|image| image.book_id == BookId(1)));
    assert_eq!(page.images[0].id, ImageId::from("104"));
}

#[tokio::test]
async fn random_query_orders_by_storage_position() {
    let storage = seeded().await;
    let query = CatalogQuery::for_collection(Collection::Mode(ViewerMode::Random));
    assert_eq!(query.order, SortOrder::STORAGE);
    assert!(query.random_start);

    let page = storage
        .fetch_images(&query, 10, None, true)
        .await
        .expect("page");
    assert!(!page.images.is_empty());
    assert!(page
        .images
        .windows(2)
        .all(|pair| pair[0].rowid < pair[1].rowid));
}

#[tokio::test]
async fn empty_page_has_no_cursor() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let query = CatalogQuery::for_collection(Collection::Mode(ViewerMode::Popular));
    let page = storage
        .fetch_images(&query, 5, None, true)
        .await
        .expect("page");
    assert!(page.images.is_empty());
    assert!(page.cursor.is_none());
}

#[tokio::test]
async fn settings_upsert_and_delete() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    assert_eq!(storage.load_setting("flickr-authorised").await.expect("load"), None);

    storage
        .save_setting("flickr-authorised", "no")
        .await
        .expect("save");
    storage
        .save_setting("flickr-authorised", "yes")
        .await
        .expect("overwrite");
    assert_eq!(
        storage.load_setting("flickr-authorised").await.expect("load"),
        Some("yes".to_string())
    );

    assert!(storage.delete_setting("flickr-authorised").await.expect("delete"));
    assert!(!storage.delete_setting("flickr-authorised").await.expect("delete again"));
}
