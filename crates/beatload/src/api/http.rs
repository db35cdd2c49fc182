use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, trace, warn};
use url::Url;

use super::types::{BoardEnvelope, CardEnvelope, SeriesEnvelope, SeriesListEnvelope};
use super::{AdminApi, ApiConnector, ApiResult, ApplicationApi, Board, Card, Series};
use crate::error::ApiError;
use crate::sse::ByteStream;

/// Timeout for ordinary request/response calls. The event stream has none.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const SESSION_COOKIE: &str = "session";

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// HTTP implementation of the application API with its own cookie jar.
pub struct HttpApiClient {
    base: Url,
    base_str: String,
    client: Client,
    jar: Arc<Jar>,
}

impl HttpApiClient {
    pub fn new(base_url: &str) -> ApiResult<Self> {
        let base = Url::parse(base_url).map_err(|e| ApiError::InvalidUrl {
            input: base_url.to_string(),
            reason: e.to_string(),
        })?;

        install_rustls_provider();
        let jar = Arc::new(Jar::default());
        let client = Client::builder().cookie_provider(jar.clone()).build()?;

        Ok(Self {
            base_str: base_url.trim_end_matches('/').to_string(),
            base,
            client,
            jar,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_str, path)
    }

    /// Whether the jar holds a session cookie for the server.
    pub fn has_session(&self) -> bool {
        self.jar
            .cookies(&self.base)
            .and_then(|header| header.to_str().map(str::to_owned).ok())
            .is_some_and(|cookies| {
                cookies
                    .split(';')
                    .any(|c| c.trim().starts_with(&format!("{SESSION_COOKIE}=")))
            })
    }

    fn require_session(&self, operation: &'static str) -> ApiResult<()> {
        if self.has_session() {
            Ok(())
        } else {
            warn!(operation, "No session cookie received");
            Err(ApiError::MissingSession { operation })
        }
    }

    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> ApiResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        trace!(operation, %status, "Response received");

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        trace!(operation, %status, body = %body, "Request failed");
        Err(ApiError::from_status(operation, status, body))
    }

    async fn post(
        &self,
        operation: &'static str,
        path: &str,
        body: serde_json::Value,
    ) -> ApiResult<Response> {
        trace!(operation, path, %body, "POST");
        let request = self
            .client
            .post(self.url(path))
            .timeout(REQUEST_TIMEOUT)
            .json(&body);
        self.send(operation, request).await
    }

    async fn get(&self, operation: &'static str, path: &str) -> ApiResult<Response> {
        trace!(operation, path, "GET");
        let request = self.client.get(self.url(path)).timeout(REQUEST_TIMEOUT);
        self.send(operation, request).await
    }

    async fn put(
        &self,
        operation: &'static str,
        path: &str,
        body: serde_json::Value,
    ) -> ApiResult<Response> {
        trace!(operation, path, %body, "PUT");
        let request = self
            .client
            .put(self.url(path))
            .timeout(REQUEST_TIMEOUT)
            .json(&body);
        self.send(operation, request).await
    }

    async fn patch(
        &self,
        operation: &'static str,
        path: &str,
        body: serde_json::Value,
    ) -> ApiResult<Response> {
        trace!(operation, path, %body, "PATCH");
        let request = self
            .client
            .patch(self.url(path))
            .timeout(REQUEST_TIMEOUT)
            .json(&body);
        self.send(operation, request).await
    }

    async fn decode<T: DeserializeOwned>(
        operation: &'static str,
        response: Response,
    ) -> ApiResult<T> {
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::invalid_response(operation, e.to_string()))
    }
}

#[async_trait]
impl ApplicationApi for HttpApiClient {
    async fn register(&self, email: &str, name: &str, password: &str) -> ApiResult<()> {
        debug!(email, "Registering user");
        self.post(
            "register",
            "/api/auth/register",
            json!({ "email": email, "name": name, "password": password }),
        )
        .await?;

        self.require_session("register")
    }

    async fn login(&self, email: &str, password: &str) -> ApiResult<()> {
        self.post(
            "login",
            "/api/auth/login",
            json!({ "email": email, "password": password }),
        )
        .await?;

        self.require_session("login")
    }

    async fn open_event_stream(&self, board_id: &str) -> ApiResult<ByteStream> {
        let request = self
            .client
            .get(self.url("/api/sse"))
            .query(&[("boardId", board_id)])
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        let response = self.send("open event stream", request).await?;

        Ok(response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed())
    }

    async fn join_board(&self, client_id: &str, board_id: &str, user_id: &str) -> ApiResult<()> {
        self.post(
            "join board",
            "/api/sse",
            json!({
                "action": "join_board",
                "clientId": client_id,
                "boardId": board_id,
                "userId": user_id,
            }),
        )
        .await?;
        Ok(())
    }

    async fn get_board(&self, board_id: &str) -> ApiResult<Board> {
        let response = self.get("get board", &format!("/api/boards/{board_id}")).await?;
        let envelope: BoardEnvelope = Self::decode("get board", response).await?;
        envelope
            .board
            .ok_or_else(|| ApiError::invalid_response("get board", "no board in response"))
    }

    async fn create_card(
        &self,
        board_id: &str,
        column_id: &str,
        content: &str,
    ) -> ApiResult<Card> {
        let response = self
            .post(
                "create card",
                &format!("/api/boards/{board_id}/cards"),
                json!({ "columnId": column_id, "content": content }),
            )
            .await?;
        let envelope: CardEnvelope = Self::decode("create card", response).await?;
        envelope
            .card
            .ok_or_else(|| ApiError::invalid_response("create card", "no card in response"))
    }

    async fn move_card(&self, card_id: &str, column_id: &str) -> ApiResult<()> {
        self.put(
            "move card",
            &format!("/api/cards/{card_id}/move"),
            json!({ "columnId": column_id }),
        )
        .await?;
        Ok(())
    }

    async fn vote_on_card(&self, card_id: &str) -> ApiResult<()> {
        self.post("vote", &format!("/api/cards/{card_id}/vote"), json!({}))
            .await?;
        Ok(())
    }

    async fn group_cards(
        &self,
        board_id: &str,
        card_ids: &[String],
        group_id: &str,
    ) -> ApiResult<()> {
        self.post(
            "group cards",
            &format!("/api/boards/{board_id}/cards/group"),
            json!({ "cardIds": card_ids, "groupId": group_id }),
        )
        .await?;
        Ok(())
    }

    async fn group_card_onto(&self, card_id: &str, target_card_id: &str) -> ApiResult<()> {
        self.post(
            "group card onto",
            &format!("/api/cards/{card_id}/group-onto"),
            json!({ "targetCardId": target_card_id }),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AdminApi for HttpApiClient {
    async fn create_series(&self, name: &str, description: &str) -> ApiResult<Series> {
        let response = self
            .post(
                "create series",
                "/api/series",
                json!({ "name": name, "description": description }),
            )
            .await?;
        let envelope: SeriesEnvelope = Self::decode("create series", response).await?;
        envelope
            .series
            .ok_or_else(|| ApiError::invalid_response("create series", "no series in response"))
    }

    async fn list_series(&self) -> ApiResult<Vec<Series>> {
        let response = self.get("get series", "/api/series").await?;
        let envelope: SeriesListEnvelope = Self::decode("get series", response).await?;
        Ok(envelope.series)
    }

    async fn create_board(&self, name: &str, series_id: &str) -> ApiResult<Board> {
        let response = self
            .post(
                "create board",
                "/api/boards",
                json!({ "name": name, "seriesId": series_id }),
            )
            .await?;
        let envelope: BoardEnvelope = Self::decode("create board", response).await?;
        envelope
            .board
            .ok_or_else(|| ApiError::invalid_response("create board", "no board in response"))
    }

    async fn setup_board_template(&self, board_id: &str, template: &str) -> ApiResult<()> {
        self.post(
            "setup template",
            &format!("/api/boards/{board_id}/setup-template"),
            json!({ "template": template }),
        )
        .await?;
        Ok(())
    }

    async fn update_board_status(&self, board_id: &str, status: &str) -> ApiResult<()> {
        self.patch(
            "update board",
            &format!("/api/boards/{board_id}"),
            json!({ "status": status }),
        )
        .await?;
        Ok(())
    }

    async fn update_scene_flags(
        &self,
        board_id: &str,
        scene_id: &str,
        flags: &[&str],
    ) -> ApiResult<()> {
        debug!(board_id, scene_id, ?flags, "Updating scene flags");
        self.patch(
            "update scene",
            &format!("/api/boards/{board_id}/scenes/{scene_id}"),
            json!({ "flags": flags }),
        )
        .await?;
        Ok(())
    }

    async fn add_user_to_series(
        &self,
        series_id: &str,
        email: &str,
        role: &str,
    ) -> ApiResult<()> {
        self.post(
            "add user to series",
            &format!("/api/series/{series_id}/users"),
            json!({ "email": email, "role": role }),
        )
        .await?;
        Ok(())
    }
}

/// Connector handing out one [`HttpApiClient`] per actor.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    base_url: String,
}

impl HttpConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl ApiConnector for HttpConnector {
    fn connect(&self) -> ApiResult<Arc<dyn ApplicationApi>> {
        Ok(Arc::new(HttpApiClient::new(&self.base_url)?))
    }
}
