//! In-memory board server shared by the integration tests.
//!
//! Every session opened through [`FakeConnector`] talks to the same
//! [`FakeServer`]; successful mutations are broadcast to every open event
//! stream before the call returns, like the real server does.

#![allow(dead_code)]

use async_trait::async_trait;
use beatload::ApiError;
use beatload::api::{
    AdminApi, ApiConnector, ApiResult, ApplicationApi, Board, Card, Column, Scene, Series,
};
use beatload::sse::ByteStream;
use bytes::Bytes;
use futures::StreamExt;
use futures::channel::mpsc::{UnboundedSender, unbounded};
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::io;
use std::sync::Arc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Knobs for failure injection.
#[derive(Debug, Default, Clone)]
pub struct Behaviour {
    /// Streams never send the handshake.
    pub silent_handshake: bool,
    /// The first `n` board joins fail.
    pub failing_joins: usize,
    /// Card creation answers 429.
    pub rate_limit_cards: bool,
    /// Registration answers 409 for every account.
    pub reject_register: bool,
}

#[derive(Default)]
struct State {
    behaviour: Behaviour,
    board: Board,
    series: Vec<Series>,
    streams: Vec<UnboundedSender<io::Result<Bytes>>>,
    registered: HashSet<String>,
    members: Vec<String>,
    logins: usize,
    joins: usize,
    next_id: u64,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn card_mut(&mut self, card_id: &str) -> Option<&mut Card> {
        self.board
            .columns
            .iter_mut()
            .flat_map(|c| c.cards.iter_mut())
            .find(|c| c.id == card_id)
    }

    fn broadcast(&mut self, event: &str, data: Value) {
        let frame = Bytes::from(format!("event: {event}\ndata: {data}\n\n"));
        self.streams
            .retain(|tx| tx.unbounded_send(Ok(frame.clone())).is_ok());
    }
}

#[derive(Default)]
pub struct FakeServer {
    state: Mutex<State>,
}

impl FakeServer {
    pub fn new(behaviour: Behaviour) -> Arc<Self> {
        let server = Self::default();
        server.state.lock().behaviour = behaviour;
        Arc::new(server)
    }

    pub fn client(self: &Arc<Self>) -> Arc<FakeClient> {
        Arc::new(FakeClient {
            server: self.clone(),
        })
    }

    pub fn connector(self: &Arc<Self>) -> Arc<FakeConnector> {
        Arc::new(FakeConnector {
            server: self.clone(),
        })
    }

    /// A board with three columns and one scene, without going through the
    /// admin calls.
    pub fn seed_board(&self) -> Board {
        let mut state = self.state.lock();
        state.board = Board {
            id: "board-1".into(),
            name: "seeded".into(),
            series_id: "series-1".into(),
            status: "active".into(),
            current_scene_id: "scene-1".into(),
            columns: (1..=3)
                .map(|i| Column {
                    id: format!("col-{i}"),
                    name: format!("Column {i}"),
                    order: i,
                    cards: Vec::new(),
                })
                .collect(),
            scenes: vec![Scene {
                id: "scene-1".into(),
                title: "Brainstorm".into(),
                mode: "columns".into(),
                flags: Vec::new(),
            }],
        };
        state.board.clone()
    }

    /// Put a card straight onto the board.
    pub fn add_card(&self, column_id: &str, card_id: &str) {
        let mut state = self.state.lock();
        if let Some(column) = state.board.columns.iter_mut().find(|c| c.id == column_id) {
            column.cards.push(Card {
                id: card_id.into(),
                content: "seeded".into(),
                column_id: column_id.into(),
                group_id: String::new(),
            });
        }
    }

    /// Push a raw notification to every open stream.
    pub fn broadcast(&self, event: &str, data: Value) {
        self.state.lock().broadcast(event, data);
    }

    pub fn board(&self) -> Board {
        self.state.lock().board.clone()
    }

    pub fn members(&self) -> Vec<String> {
        self.state.lock().members.clone()
    }

    pub fn logins(&self) -> usize {
        self.state.lock().logins
    }

    pub fn open_streams(&self) -> usize {
        let mut state = self.state.lock();
        state.streams.retain(|tx| !tx.is_closed());
        state.streams.len()
    }
}

fn status(operation: &'static str, code: StatusCode, body: &str) -> ApiError {
    ApiError::from_status(operation, code, body.to_string())
}

pub struct FakeClient {
    server: Arc<FakeServer>,
}

#[async_trait]
impl ApplicationApi for FakeClient {
    async fn register(&self, email: &str, _name: &str, _password: &str) -> ApiResult<()> {
        let mut state = self.server.state.lock();
        if state.behaviour.reject_register || !state.registered.insert(email.to_string()) {
            return Err(status("register", StatusCode::CONFLICT, "already exists"));
        }
        Ok(())
    }

    async fn login(&self, _email: &str, _password: &str) -> ApiResult<()> {
        self.server.state.lock().logins += 1;
        Ok(())
    }

    async fn open_event_stream(&self, _board_id: &str) -> ApiResult<ByteStream> {
        let mut state = self.server.state.lock();
        let (tx, rx) = unbounded();
        if !state.behaviour.silent_handshake {
            let client_id = state.next_id("client");
            let hello = format!("event: connected\ndata: {{\"clientId\":\"{client_id}\"}}\n\n");
            let _ = tx.unbounded_send(Ok(Bytes::from(hello)));
        }
        state.streams.push(tx);
        Ok(rx.boxed())
    }

    async fn join_board(&self, _client_id: &str, _board_id: &str, _user_id: &str) -> ApiResult<()> {
        let mut state = self.server.state.lock();
        state.joins += 1;
        if state.joins <= state.behaviour.failing_joins {
            return Err(status("join board", StatusCode::INTERNAL_SERVER_ERROR, "boom"));
        }
        Ok(())
    }

    async fn get_board(&self, _board_id: &str) -> ApiResult<Board> {
        Ok(self.server.state.lock().board.clone())
    }

    async fn create_card(
        &self,
        _board_id: &str,
        column_id: &str,
        content: &str,
    ) -> ApiResult<Card> {
        let mut state = self.server.state.lock();
        if state.behaviour.rate_limit_cards {
            return Err(status(
                "create card",
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests",
            ));
        }
        let card = Card {
            id: state.next_id("card"),
            content: content.to_string(),
            column_id: column_id.to_string(),
            group_id: String::new(),
        };
        let column = state
            .board
            .columns
            .iter_mut()
            .find(|c| c.id == column_id)
            .ok_or_else(|| status("create card", StatusCode::NOT_FOUND, "no column"))?;
        column.cards.push(card.clone());
        state.broadcast("card_created", json!({ "card": { "id": card.id } }));
        Ok(card)
    }

    async fn move_card(&self, card_id: &str, column_id: &str) -> ApiResult<()> {
        let mut state = self.server.state.lock();
        let mut moved = None;
        for column in &mut state.board.columns {
            if let Some(pos) = column.cards.iter().position(|c| c.id == card_id) {
                moved = Some(column.cards.remove(pos));
            }
        }
        let mut card = moved.ok_or_else(|| status("move card", StatusCode::NOT_FOUND, "no card"))?;
        card.column_id = column_id.to_string();
        if let Some(column) = state.board.columns.iter_mut().find(|c| c.id == column_id) {
            column.cards.push(card);
        }
        state.broadcast("card_updated", json!({ "card": { "id": card_id } }));
        Ok(())
    }

    async fn vote_on_card(&self, card_id: &str) -> ApiResult<()> {
        let mut state = self.server.state.lock();
        if state.card_mut(card_id).is_none() {
            return Err(status("vote", StatusCode::NOT_FOUND, "no card"));
        }
        // Payload carries its own type; the event line is generic.
        state.broadcast(
            "message",
            json!({ "type": "vote_changed", "card_id": card_id, "votes": 1 }),
        );
        Ok(())
    }

    async fn group_cards(
        &self,
        _board_id: &str,
        card_ids: &[String],
        group_id: &str,
    ) -> ApiResult<()> {
        let mut state = self.server.state.lock();
        for id in card_ids {
            if let Some(card) = state.card_mut(id) {
                card.group_id = group_id.to_string();
            }
        }
        state.broadcast(
            "cards_grouped",
            json!({ "groupId": group_id, "cardIds": card_ids }),
        );
        Ok(())
    }

    async fn group_card_onto(&self, card_id: &str, target_card_id: &str) -> ApiResult<()> {
        let mut state = self.server.state.lock();
        let group_id = state.next_id("group");
        for id in [card_id, target_card_id] {
            if let Some(card) = state.card_mut(id) {
                card.group_id = group_id.clone();
            }
        }
        state.broadcast(
            "card_grouped_onto",
            json!({ "cardId": card_id, "targetCardId": target_card_id }),
        );
        Ok(())
    }
}

#[async_trait]
impl AdminApi for FakeClient {
    async fn create_series(&self, name: &str, description: &str) -> ApiResult<Series> {
        let mut state = self.server.state.lock();
        let series = Series {
            id: state.next_id("series"),
            name: name.to_string(),
            description: description.to_string(),
        };
        state.series.push(series.clone());
        Ok(series)
    }

    async fn list_series(&self) -> ApiResult<Vec<Series>> {
        Ok(self.server.state.lock().series.clone())
    }

    async fn create_board(&self, name: &str, series_id: &str) -> ApiResult<Board> {
        let mut state = self.server.state.lock();
        state.board = Board {
            id: state.next_id("board"),
            name: name.to_string(),
            series_id: series_id.to_string(),
            status: "draft".into(),
            ..Default::default()
        };
        Ok(state.board.clone())
    }

    async fn setup_board_template(&self, _board_id: &str, _template: &str) -> ApiResult<()> {
        let mut state = self.server.state.lock();
        let scene_id = state.next_id("scene");
        state.board.columns = (1..=3)
            .map(|i| Column {
                id: format!("col-{i}"),
                name: format!("Column {i}"),
                order: i,
                cards: Vec::new(),
            })
            .collect();
        state.board.scenes = vec![Scene {
            id: scene_id.clone(),
            title: "Brainstorm".into(),
            mode: "columns".into(),
            flags: vec!["allow_add_cards".into()],
        }];
        state.board.current_scene_id = scene_id;
        Ok(())
    }

    async fn update_board_status(&self, _board_id: &str, status: &str) -> ApiResult<()> {
        self.server.state.lock().board.status = status.to_string();
        Ok(())
    }

    async fn update_scene_flags(
        &self,
        _board_id: &str,
        scene_id: &str,
        flags: &[&str],
    ) -> ApiResult<()> {
        let mut state = self.server.state.lock();
        if let Some(scene) = state.board.scenes.iter_mut().find(|s| s.id == scene_id) {
            scene.flags = flags.iter().map(|f| f.to_string()).collect();
        }
        Ok(())
    }

    async fn add_user_to_series(
        &self,
        _series_id: &str,
        email: &str,
        _role: &str,
    ) -> ApiResult<()> {
        self.server.state.lock().members.push(email.to_string());
        Ok(())
    }
}

pub struct FakeConnector {
    server: Arc<FakeServer>,
}

impl ApiConnector for FakeConnector {
    fn connect(&self) -> ApiResult<Arc<dyn ApplicationApi>> {
        Ok(self.server.client())
    }
}
