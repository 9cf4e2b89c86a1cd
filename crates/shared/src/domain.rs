use std::{cmp::Ordering, fmt, str::FromStr};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(BookId);
id_newtype!(RowId);

const PHOTO_HOST: &str = "https://live.staticflickr.com";
const PHOTO_PAGE_PREFIX: &str = "https://www.flickr.com/photos/internetarchivebookimages";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(pub String);

impl ImageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One catalogued image. Never mutated after it has been fetched; whether
/// the user has faved it lives in the favorites store, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub rowid: RowId,
    pub id: ImageId,
    pub book_id: BookId,
    pub server: String,
    pub secret: String,
    pub original_secret: String,
    pub width: u32,
    pub height: u32,
    pub faves: i64,
    pub views: i64,
    pub comments: i64,
}

impl Image {
    pub fn cursor(&self) -> Cursor {
        Cursor {
            faves: self.faves,
            views: self.views,
            comments: self.comments,
            id: self.id.clone(),
            rowid: self.rowid,
        }
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 1.0;
        }
        f64::from(self.width) / f64::from(self.height)
    }

    pub fn thumbnail_url(&self) -> String {
        format!("{PHOTO_HOST}/{}/{}_{}_b_d.jpg", self.server, self.id, self.secret)
    }

    pub fn original_url(&self) -> String {
        format!(
            "{PHOTO_HOST}/{}/{}_{}_o.jpg",
            self.server, self.id, self.original_secret
        )
    }

    pub fn page_url(&self) -> String {
        format!("{PHOTO_PAGE_PREFIX}/{}", self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderField {
    RowId,
    Faves,
    Views,
    Comments,
    Id,
}

impl OrderField {
    pub const fn column(self) -> &'static str {
        match self {
            Self::RowId => "rowid",
            Self::Faves => "faves",
            Self::Views => "views",
            Self::Comments => "comments",
            Self::Id => "id",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Ordering a stream is paged in. The cursor carries a value for every field
/// listed here, so keyset comparisons never need the full row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SortOrder {
    pub fields: &'static [OrderField],
    pub direction: SortDirection,
}

impl SortOrder {
    pub const STORAGE: Self = Self {
        fields: &[OrderField::RowId],
        direction: SortDirection::Asc,
    };

    pub const POPULARITY: Self = Self {
        fields: &[
            OrderField::Faves,
            OrderField::Views,
            OrderField::Comments,
            OrderField::Id,
        ],
        direction: SortDirection::Desc,
    };
}

/// Keyset resumption token built from the last image of a fetched page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor {
    pub faves: i64,
    pub views: i64,
    pub comments: i64,
    pub id: ImageId,
    pub rowid: RowId,
}

#[derive(Debug, Error)]
pub enum CursorTokenError {
    #[error("cursor token is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("cursor token payload is malformed: {0}")]
    Payload(#[from] serde_json::Error),
}

impl Cursor {
    /// Where `self` sits relative to `other` in a stream paged by `order`.
    /// `Less` means `self` is served first.
    pub fn compare(&self, other: &Cursor, order: SortOrder) -> Ordering {
        for field in order.fields {
            let natural = match field {
                OrderField::RowId => self.rowid.cmp(&other.rowid),
                OrderField::Faves => self.faves.cmp(&other.faves),
                OrderField::Views => self.views.cmp(&other.views),
                OrderField::Comments => self.comments.cmp(&other.comments),
                OrderField::Id => self.id.cmp(&other.id),
            };
            let ordered = match order.direction {
                SortDirection::Asc => natural,
                SortDirection::Desc => natural.reverse(),
            };
            if ordered != Ordering::Equal {
                return ordered;
            }
        }
        Ordering::Equal
    }

    pub fn to_token(&self) -> Result<String, CursorTokenError> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn from_token(token: &str) -> Result<Self, CursorTokenError> {
        let json = URL_SAFE_NO_PAD.decode(token.trim().as_bytes())?;
        Ok(serde_json::from_slice(&json)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewerMode {
    Random,
    #[default]
    RandomPopular,
    RandomOverlooked,
    Popular,
}

impl ViewerMode {
    pub const ALL: [ViewerMode; 4] = [
        Self::Random,
        Self::RandomPopular,
        Self::RandomOverlooked,
        Self::Popular,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::RandomPopular => "randompopular",
            Self::RandomOverlooked => "randomoverlooked",
            Self::Popular => "popular",
        }
    }
}

impl fmt::Display for ViewerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown viewer mode '{0}'")]
pub struct UnknownViewerMode(pub String);

impl FromStr for ViewerMode {
    type Err = UnknownViewerMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', '_'], "");
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized)
            .ok_or_else(|| UnknownViewerMode(s.to_string()))
    }
}

/// What a stream is paging through: one of the top-level modes, or the
/// images of a single book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Mode(ViewerMode),
    Book(BookId),
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mode(mode) => write!(f, "{mode}"),
            Self::Book(book_id) => write!(f, "book/{book_id}"),
        }
    }
}
