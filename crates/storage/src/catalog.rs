//! Keyset-paginated reads over the image catalog.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use shared::domain::{
    BookId, Collection, Cursor, Image, ImageId, OrderField, RowId, SortDirection, SortOrder,
    ViewerMode,
};
use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite};
use tracing::debug;

use crate::Storage;

const IMAGE_COLUMNS: &str =
    "rowid, id, book_id, server, secret, original_secret, width, height, faves, views, comments";

/// Which slice of the catalog a query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFilter {
    All,
    Popular,
    Overlooked,
    Book(BookId),
}

/// The full description of one stream's query: filter, ordering and whether a
/// cursor-less first page starts at a random position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogQuery {
    pub order: SortOrder,
    pub filter: CatalogFilter,
    pub random_start: bool,
}

impl CatalogQuery {
    pub fn for_collection(collection: Collection) -> Self {
        match collection {
            Collection::Mode(ViewerMode::Random) => Self::random(CatalogFilter::All),
            Collection::Mode(ViewerMode::RandomPopular) => Self::random(CatalogFilter::Popular),
            Collection::Mode(ViewerMode::RandomOverlooked) => {
                Self::random(CatalogFilter::Overlooked)
            }
            Collection::Mode(ViewerMode::Popular) => Self {
                order: SortOrder::POPULARITY,
                filter: CatalogFilter::Popular,
                random_start: false,
            },
            Collection::Book(book_id) => Self {
                order: SortOrder::POPULARITY,
                filter: CatalogFilter::Book(book_id),
                random_start: false,
            },
        }
    }

    fn random(filter: CatalogFilter) -> Self {
        Self {
            order: SortOrder::STORAGE,
            filter,
            random_start: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPage {
    pub images: Vec<Image>,
    /// Built from the last image; `None` when the page came back empty.
    pub cursor: Option<Cursor>,
}

/// An image row as it is written into the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewImage {
    pub id: String,
    pub book_id: i64,
    pub server: String,
    pub secret: String,
    pub original_secret: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub faves: i64,
    #[serde(default)]
    pub views: i64,
    #[serde(default)]
    pub comments: i64,
}

impl Storage {
    pub async fn insert_image(&self, image: &NewImage) -> Result<RowId> {
        let row = sqlx::query(
            "INSERT INTO images (id, book_id, server, secret, original_secret, width, height, faves, views, comments)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                faves = excluded.faves,
                views = excluded.views,
                comments = excluded.comments
             RETURNING rowid",
        )
        .bind(&image.id)
        .bind(image.book_id)
        .bind(&image.server)
        .bind(&image.secret)
        .bind(&image.original_secret)
        .bind(i64::from(image.width))
        .bind(i64::from(image.height))
        .bind(image.faves)
        .bind(image.views)
        .bind(image.comments)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to insert image {}", image.id))?;
        Ok(RowId(row.try_get::<i64, _>(0)?))
    }

    pub async fn count_images(&self, filter: CatalogFilter) -> Result<i64> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT count(*) FROM images");
        let mut has_where = false;
        push_filter(&mut builder, &mut has_where, filter);
        let count: i64 = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .context("failed to count images")?;
        Ok(count)
    }

    /// One page of `query`, strictly after `cursor` in the query's order. With
    /// `initial` set, the cursor's own row is included so a stream resumed from
    /// a saved cursor starts on the image the cursor was taken from.
    pub async fn fetch_images(
        &self,
        query: &CatalogQuery,
        limit: u32,
        cursor: Option<&Cursor>,
        initial: bool,
    ) -> Result<CatalogPage> {
        if limit == 0 {
            bail!("limit must be a positive number");
        }

        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {IMAGE_COLUMNS} FROM images"));
        let mut has_where = false;
        push_filter(&mut builder, &mut has_where, query.filter);

        if let Some(cursor) = cursor {
            push_keyset(&mut builder, &mut has_where, query.order, cursor, initial);
        } else if query.random_start {
            push_condition(&mut builder, &mut has_where);
            builder.push("rowid >= abs(random() % (SELECT max(rowid) FROM images))");
        }

        builder.push(" ORDER BY ");
        let direction = match query.order.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        for (idx, field) in query.order.fields.iter().enumerate() {
            if idx > 0 {
                builder.push(", ");
            }
            builder.push(field.column()).push(" ").push(direction);
        }
        builder.push(" LIMIT ").push_bind(i64::from(limit));

        debug!(sql = builder.sql(), limit, initial, "catalog: executing page query");
        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .context("catalog page query failed")?;

        let images = rows
            .iter()
            .map(image_from_row)
            .collect::<Result<Vec<_>>>()?;
        let cursor = images.last().map(Image::cursor);
        Ok(CatalogPage { images, cursor })
    }
}

fn push_condition(builder: &mut QueryBuilder<'_, Sqlite>, has_where: &mut bool) {
    builder.push(if *has_where { " AND " } else { " WHERE " });
    *has_where = true;
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, has_where: &mut bool, filter: CatalogFilter) {
    match filter {
        CatalogFilter::All => {}
        CatalogFilter::Popular => {
            push_condition(builder, has_where);
            builder.push("faves > 0");
        }
        CatalogFilter::Overlooked => {
            push_condition(builder, has_where);
            builder.push("views < 50 AND faves = 0");
        }
        CatalogFilter::Book(book_id) => {
            push_condition(builder, has_where);
            builder.push("book_id = ").push_bind(book_id.0);
        }
    }
}

fn push_keyset(
    builder: &mut QueryBuilder<'_, Sqlite>,
    has_where: &mut bool,
    order: SortOrder,
    cursor: &Cursor,
    inclusive: bool,
) {
    push_condition(builder, has_where);

    let columns = order
        .fields
        .iter()
        .map(|field| field.column())
        .collect::<Vec<_>>()
        .join(", ");
    let comparator = match (order.direction, inclusive) {
        (SortDirection::Asc, false) => ">",
        (SortDirection::Asc, true) => ">=",
        (SortDirection::Desc, false) => "<",
        (SortDirection::Desc, true) => "<=",
    };
    builder.push(format!("({columns}) {comparator} ("));

    let mut values = builder.separated(", ");
    for field in order.fields {
        match field {
            OrderField::RowId => values.push_bind(cursor.rowid.0),
            OrderField::Faves => values.push_bind(cursor.faves),
            OrderField::Views => values.push_bind(cursor.views),
            OrderField::Comments => values.push_bind(cursor.comments),
            OrderField::Id => values.push_bind(cursor.id.0.clone()),
        };
    }
    values.push_unseparated(")");
}

fn image_from_row(row: &SqliteRow) -> Result<Image> {
    let width: i64 = row.try_get("width")?;
    let height: i64 = row.try_get("height")?;
    Ok(Image {
        rowid: RowId(row.try_get("rowid")?),
        id: ImageId(row.try_get("id")?),
        book_id: BookId(row.try_get("book_id")?),
        server: row.try_get("server")?,
        secret: row.try_get("secret")?,
        original_secret: row.try_get("original_secret")?,
        width: u32::try_from(width).with_context(|| format!("invalid image width {width}"))?,
        height: u32::try_from(height).with_context(|| format!("invalid image height {height}"))?,
        faves: row.try_get("faves")?,
        views: row.try_get("views")?,
        comments: row.try_get("comments")?,
    })
}
