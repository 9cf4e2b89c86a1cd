use async_trait::async_trait;
use reqwest::{header::COOKIE, Client};
use shared::{
    domain::ImageId,
    protocol::{FaveAction, FaveResponse, FaveStat},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::MutationError;

/// What the service reports after a mutation call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FavoriteAck {
    pub confirmed: bool,
    /// The value the service says is now in effect, when it says so.
    pub server_value: Option<bool>,
}

#[async_trait]
pub trait RemoteMutationService: Send + Sync {
    /// Resolves with [`MutationError::Cancelled`] once `cancel` fires.
    async fn set_favorite(
        &self,
        image_id: &ImageId,
        desired: bool,
        cancel: CancellationToken,
    ) -> Result<FavoriteAck, MutationError>;
}

/// Favorites over the gallery backend's HTTP API:
/// `GET {base}/api/favorite/{id}` and `GET {base}/api/unfavorite/{id}`.
#[derive(Clone)]
pub struct HttpFavoriteService {
    http: Client,
    base_url: Url,
    session_cookie: Option<String>,
}

impl HttpFavoriteService {
    pub fn new(base_url: &str, session_cookie: Option<String>) -> Result<Self, url::ParseError> {
        Ok(Self {
            http: Client::new(),
            base_url: normalize_base_url(base_url)?,
            session_cookie,
        })
    }

    pub fn endpoint(&self, action: FaveAction, image_id: &ImageId) -> Result<Url, url::ParseError> {
        self.base_url.join(&action.path(image_id))
    }

    async fn call(&self, action: FaveAction, image_id: &ImageId) -> Result<FavoriteAck, MutationError> {
        let url = self
            .endpoint(action, image_id)
            .map_err(|err| MutationError::Transport(format!("invalid endpoint: {err}")))?;

        let mut request = self.http.get(url);
        if let Some(cookie) = &self.session_cookie {
            request = request.header(COOKIE, cookie);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MutationError::Http {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        let parsed: FaveResponse = serde_json::from_slice(&body)
            .map_err(|err| MutationError::Protocol(format!("invalid fave response: {err}")))?;
        interpret_response(action, parsed)
    }
}

#[async_trait]
impl RemoteMutationService for HttpFavoriteService {
    async fn set_favorite(
        &self,
        image_id: &ImageId,
        desired: bool,
        cancel: CancellationToken,
    ) -> Result<FavoriteAck, MutationError> {
        let action = FaveAction::for_desired(desired);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(%image_id, action = action.verb(), "fave: request aborted");
                Err(MutationError::Cancelled)
            }
            result = self.call(action, image_id) => result,
        }
    }
}

fn interpret_response(action: FaveAction, response: FaveResponse) -> Result<FavoriteAck, MutationError> {
    match response.stat {
        FaveStat::Ok => Ok(FavoriteAck {
            confirmed: true,
            server_value: Some(action.desired()),
        }),
        FaveStat::Fail => match (response.code, response.realized_value()) {
            (Some(code), Some(server_value)) => Err(MutationError::Service {
                code,
                server_value: Some(server_value),
            }),
            (code, None) => Err(MutationError::Protocol(format!(
                "unexpected failure code {code:?} for {}: {}",
                action.verb(),
                response.message.as_deref().unwrap_or("no message")
            ))),
            (None, Some(_)) => Err(MutationError::Protocol(
                "failure without a code".to_string(),
            )),
        },
    }
}

fn normalize_base_url(base_url: &str) -> Result<Url, url::ParseError> {
    let trimmed = base_url.trim();
    if trimmed.ends_with('/') {
        Url::parse(trimmed)
    } else {
        Url::parse(&format!("{trimmed}/"))
    }
}

#[cfg(test)]
#[path = "../tests/favorite_service_tests.rs"]
mod tests;
