//! Application API boundary.
//!
//! Actors and the orchestrator only talk to the server under test through the
//! traits in this module, so a run can be driven against the real HTTP client
//! or an in-memory double.

mod http;
pub mod types;

pub use http::{HttpApiClient, HttpConnector, install_rustls_provider};
pub use types::{Board, Card, Column, Scene, Series};

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::ApiError;
use crate::sse::ByteStream;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Operations a single simulated actor performs. One instance per actor; the
/// implementation owns that actor's session.
#[async_trait]
pub trait ApplicationApi: Send + Sync {
    /// Create an account and start a session for it.
    async fn register(&self, email: &str, name: &str, password: &str) -> ApiResult<()>;

    async fn login(&self, email: &str, password: &str) -> ApiResult<()>;

    /// Open the board's push stream with this session.
    async fn open_event_stream(&self, board_id: &str) -> ApiResult<ByteStream>;

    /// Announce the stream identified by `client_id` as a board member.
    async fn join_board(&self, client_id: &str, board_id: &str, user_id: &str) -> ApiResult<()>;

    async fn get_board(&self, board_id: &str) -> ApiResult<Board>;

    async fn create_card(&self, board_id: &str, column_id: &str, content: &str)
    -> ApiResult<Card>;

    async fn move_card(&self, card_id: &str, column_id: &str) -> ApiResult<()>;

    async fn vote_on_card(&self, card_id: &str) -> ApiResult<()>;

    async fn group_cards(&self, board_id: &str, card_ids: &[String], group_id: &str)
    -> ApiResult<()>;

    async fn group_card_onto(&self, card_id: &str, target_card_id: &str) -> ApiResult<()>;
}

/// Provisioning operations, performed once per run by the admin session.
#[async_trait]
pub trait AdminApi: ApplicationApi {
    async fn create_series(&self, name: &str, description: &str) -> ApiResult<Series>;

    async fn list_series(&self) -> ApiResult<Vec<Series>>;

    async fn create_board(&self, name: &str, series_id: &str) -> ApiResult<Board>;

    async fn setup_board_template(&self, board_id: &str, template: &str) -> ApiResult<()>;

    async fn update_board_status(&self, board_id: &str, status: &str) -> ApiResult<()>;

    async fn update_scene_flags(
        &self,
        board_id: &str,
        scene_id: &str,
        flags: &[&str],
    ) -> ApiResult<()>;

    async fn add_user_to_series(&self, series_id: &str, email: &str, role: &str)
    -> ApiResult<()>;
}

/// Creates one independent session per simulated actor.
pub trait ApiConnector: Send + Sync {
    fn connect(&self) -> ApiResult<Arc<dyn ApplicationApi>>;
}
