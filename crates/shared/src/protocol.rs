use serde::{Deserialize, Serialize};

use crate::domain::ImageId;

/// Failure code the favorites API returns when unfaving an image that is not
/// a favorite. The image is therefore not faved on the server.
pub const FAIL_CODE_NOT_FAVED: i64 = 1;
/// Failure code for faving an image that already is a favorite.
pub const FAIL_CODE_ALREADY_FAVED: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaveStat {
    Ok,
    Fail,
}

/// Body of a favorite/unfavorite call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaveResponse {
    pub stat: FaveStat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FaveResponse {
    pub fn ok() -> Self {
        Self {
            stat: FaveStat::Ok,
            code: None,
            message: None,
        }
    }

    pub fn fail(code: i64, message: impl Into<String>) -> Self {
        Self {
            stat: FaveStat::Fail,
            code: Some(code),
            message: Some(message.into()),
        }
    }

    /// The favorite state the server reports for a failed call, when the
    /// failure code pins it down.
    pub fn realized_value(&self) -> Option<bool> {
        match (self.stat, self.code) {
            (FaveStat::Fail, Some(FAIL_CODE_NOT_FAVED)) => Some(false),
            (FaveStat::Fail, Some(FAIL_CODE_ALREADY_FAVED)) => Some(true),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaveAction {
    Fave,
    Unfave,
}

impl FaveAction {
    pub const fn for_desired(desired: bool) -> Self {
        if desired {
            Self::Fave
        } else {
            Self::Unfave
        }
    }

    pub const fn desired(self) -> bool {
        matches!(self, Self::Fave)
    }

    pub const fn endpoint(self) -> &'static str {
        match self {
            Self::Fave => "favorite",
            Self::Unfave => "unfavorite",
        }
    }

    pub const fn verb(self) -> &'static str {
        match self {
            Self::Fave => "fave",
            Self::Unfave => "unfave",
        }
    }

    /// Path relative to the API base, e.g. `api/favorite/123`.
    pub fn path(self, image_id: &ImageId) -> String {
        format!("api/{}/{}", self.endpoint(), image_id)
    }
}

/// Result message posted back by the account-link popup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResultMessage {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
