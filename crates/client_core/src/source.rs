use std::sync::Arc;

use async_trait::async_trait;
use shared::domain::{Collection, Cursor, Image, SortOrder};
use storage::{CatalogQuery, Storage};

use crate::error::FetchError;

/// Arguments of one page fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u32,
    pub cursor: Option<Cursor>,
    /// Set while the stream holds no items yet.
    pub initial: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Page {
    pub images: Vec<Image>,
    pub cursor: Option<Cursor>,
}

/// Pages of one collection, ordered consistently with [`DataSource::order`].
#[async_trait]
pub trait DataSource: Send + Sync {
    fn order(&self) -> SortOrder;

    async fn fetch_page(&self, request: PageRequest) -> Result<Page, FetchError>;
}

/// Hands out a data source per collection; the session uses it whenever it
/// opens a new stream.
pub trait SourceFactory: Send + Sync {
    fn source_for(&self, collection: Collection) -> Arc<dyn DataSource>;
}

/// Data source backed by the local SQLite catalog.
#[derive(Clone)]
pub struct CatalogSource {
    storage: Storage,
    query: CatalogQuery,
}

impl CatalogSource {
    pub fn new(storage: Storage, collection: Collection) -> Self {
        Self {
            storage,
            query: CatalogQuery::for_collection(collection),
        }
    }
}

#[async_trait]
impl DataSource for CatalogSource {
    fn order(&self) -> SortOrder {
        self.query.order
    }

    async fn fetch_page(&self, request: PageRequest) -> Result<Page, FetchError> {
        let page = self
            .storage
            .fetch_images(
                &self.query,
                request.limit,
                request.cursor.as_ref(),
                request.initial,
            )
            .await
            .map_err(classify_catalog_error)?;
        Ok(Page {
            images: page.images,
            cursor: page.cursor,
        })
    }
}

impl SourceFactory for Storage {
    fn source_for(&self, collection: Collection) -> Arc<dyn DataSource> {
        Arc::new(CatalogSource::new(self.clone(), collection))
    }
}

fn classify_catalog_error(err: anyhow::Error) -> FetchError {
    let message = format!("{err:#}");
    if err
        .chain()
        .any(|cause| cause.downcast_ref::<std::io::Error>().is_some())
    {
        FetchError::Transport(message)
    } else {
        FetchError::Query(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::domain::ViewerMode;
    use storage::NewImage;

    #[tokio::test]
    async fn catalog_source_pages_through_storage() {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        for n in 0..3 {
            storage
                .insert_image(&NewImage {
                    id: format!("{}", 700 + n),
                    book_id: 1,
                    server: "1".into(),
                    secret: "s".into(),
                    original_secret: "o".into(),
                    width: 10,
                    height: 10,
                    faves: 3 - n,
                    views: 0,
                    comments: 0,
                })
                .await
                .expect("insert");
        }

        let source = storage.source_for(Collection::Mode(ViewerMode::Popular));
        assert_eq!(source.order(), SortOrder::POPULARITY);
        let page = source
            .fetch_page(PageRequest {
                limit: 2,
                cursor: None,
                initial: true,
            })
            .await
            .expect("page");
        assert_eq!(page.images.len(), 2);
        assert_eq!(page.cursor, page.images.last().map(Image::cursor));
    }

    #[tokio::test]
    async fn rejected_query_is_classified_as_query_error() {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let source = CatalogSource::new(storage, Collection::Mode(ViewerMode::Random));
        let err = source
            .fetch_page(PageRequest {
                limit: 0,
                cursor: None,
                initial: true,
            })
            .await
            .expect_err("zero limit");
        assert!(matches!(err, FetchError::Query(_)));
    }
}
