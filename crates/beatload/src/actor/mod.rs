//! Simulated board participant.
//!
//! An actor owns one authenticated session and one event stream reader. After
//! [`SimulatedActor::start`] it runs two tasks until stopped: a listener that
//! forwards decoded notifications to the [`EventCorrelator`], and an action
//! loop that performs one weighted-random board mutation per shared tick.

pub mod actions;

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use strum::Display;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use self::actions::{ActionKind, random_index};
use crate::api::{ApiResult, ApplicationApi};
use crate::config::RunConfig;
use crate::correlator::EventCorrelator;
use crate::error::{Error, Result};
use crate::event::{ActorId, EventKind};
use crate::sse::{SseReader, StreamEvent};
use crate::ticker::SharedTicker;

const DEFAULT_PASSWORD: &str = "testpass123";
const EMAIL_DOMAIN: &str = "loadtest.local";

/// Lifecycle of a simulated actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ActorPhase {
    Created,
    Authenticating,
    ConnectingStream,
    Joined,
    Active,
    Stopping,
    Stopped,
}

/// Account credentials of one actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl Credentials {
    /// Fresh credentials for actor `id`, unique across runs.
    pub fn generate(id: ActorId) -> Self {
        let suffix = Utc::now().timestamp_nanos_opt().unwrap_or_default() % 1_000_000;
        let username = format!("testuser{id}_{suffix}");
        Self {
            email: format!("{username}@{EMAIL_DOMAIN}"),
            username,
            password: DEFAULT_PASSWORD.to_string(),
        }
    }
}

/// The provisioned board every actor works on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardContext {
    pub board_id: String,
    pub series_id: String,
    pub column_ids: Vec<String>,
}

/// Run-level signals shared by every actor.
#[derive(Debug, Clone, Default)]
pub struct RunSignals {
    /// Ends every action loop; listeners keep draining.
    pub actions_stop: CancellationToken,
    /// Fired by an actor that hit a server rate limit.
    pub abort: CancellationToken,
}

/// Result of one action attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Sent {
        kind: EventKind,
        key: String,
        event_id: String,
    },
    /// Preconditions not met, nothing was sent.
    Skipped(&'static str),
}

/// State shared between the actor and its two tasks.
struct ActorCore {
    id: ActorId,
    credentials: Credentials,
    board: BoardContext,
    api: Arc<dyn ApplicationApi>,
    correlator: Arc<EventCorrelator>,
    connected: AtomicBool,
    phase: Mutex<ActorPhase>,
    own_cards: Mutex<Vec<String>>,
}

pub struct SimulatedActor {
    core: Arc<ActorCore>,
    cancel: CancellationToken,
    stopped: AtomicBool,
    reader: Option<SseReader>,
    inbox: Option<mpsc::Receiver<StreamEvent>>,
    tasks: Vec<JoinHandle<()>>,
    handshake_timeout: Duration,
    queue_capacity: usize,
    client_id: Option<String>,
}

impl SimulatedActor {
    pub fn new(
        id: ActorId,
        board: BoardContext,
        api: Arc<dyn ApplicationApi>,
        correlator: Arc<EventCorrelator>,
        config: &RunConfig,
    ) -> Self {
        Self::with_credentials(id, Credentials::generate(id), board, api, correlator, config)
    }

    pub fn with_credentials(
        id: ActorId,
        credentials: Credentials,
        board: BoardContext,
        api: Arc<dyn ApplicationApi>,
        correlator: Arc<EventCorrelator>,
        config: &RunConfig,
    ) -> Self {
        Self {
            core: Arc::new(ActorCore {
                id,
                credentials,
                board,
                api,
                correlator,
                connected: AtomicBool::new(false),
                phase: Mutex::new(ActorPhase::Created),
                own_cards: Mutex::new(Vec::new()),
            }),
            cancel: CancellationToken::new(),
            stopped: AtomicBool::new(false),
            reader: None,
            inbox: None,
            tasks: Vec::new(),
            handshake_timeout: config.handshake_timeout,
            queue_capacity: config.event_queue_capacity,
            client_id: None,
        }
    }

    pub fn id(&self) -> ActorId {
        self.core.id
    }

    pub fn credentials(&self) -> &Credentials {
        &self.core.credentials
    }

    pub fn phase(&self) -> ActorPhase {
        *self.core.phase.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.core.connected.load(Ordering::Acquire)
    }

    /// Client id assigned by the server's stream handshake.
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Cards this actor created during the run.
    pub fn own_cards(&self) -> Vec<String> {
        self.core.own_cards.lock().clone()
    }

    /// Authenticate, open the event stream, wait for its handshake and join
    /// the board.
    ///
    /// On failure the actor is left disconnected and must not be started.
    pub async fn setup(&mut self) -> Result<()> {
        let core = self.core.clone();
        let creds = &core.credentials;

        core.set_phase(ActorPhase::Authenticating);
        if let Err(e) = core
            .api
            .register(&creds.email, &creds.username, &creds.password)
            .await
        {
            if e.is_rate_limited() {
                return Err(Error::Authentication(e));
            }
            debug!(actor_id = core.id, error = %e, "Registration failed, trying login");
            core.api
                .login(&creds.email, &creds.password)
                .await
                .map_err(Error::Authentication)?;
        }

        core.set_phase(ActorPhase::ConnectingStream);
        let stream = core.api.open_event_stream(&core.board.board_id).await?;
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let mut reader = SseReader::spawn(stream, tx, self.cancel.child_token());

        let client_id = match reader.wait_for_handshake(self.handshake_timeout).await {
            Ok(id) => id,
            Err(e) => {
                reader.close();
                return Err(e);
            }
        };

        if let Err(e) = core
            .api
            .join_board(&client_id, &core.board.board_id, &creds.username)
            .await
        {
            reader.close();
            return Err(e.into());
        }

        debug!(actor_id = core.id, client_id = %client_id, "Joined board");
        self.client_id = Some(client_id);
        self.reader = Some(reader);
        self.inbox = Some(rx);
        core.connected.store(true, Ordering::Release);
        core.set_phase(ActorPhase::Joined);
        Ok(())
    }

    /// Launch the listener and action loops.
    ///
    /// The action loop ends on `signals.actions_stop` or [`stop`](Self::stop);
    /// the listener only on `stop`, so notifications keep being recorded
    /// during the grace period.
    pub fn start(&mut self, ticker: SharedTicker, signals: RunSignals) {
        let Some(inbox) = self.inbox.take() else {
            warn!(actor_id = self.core.id, "Start called before a successful setup");
            return;
        };
        self.core.set_phase(ActorPhase::Active);

        self.tasks.push(tokio::spawn(listen(
            self.core.clone(),
            inbox,
            self.cancel.clone(),
        )));
        self.tasks.push(tokio::spawn(act(
            self.core.clone(),
            ticker,
            signals,
            self.cancel.clone(),
        )));
    }

    /// Signal both loops to exit and close the event stream. Later calls are
    /// no-ops.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.core.set_phase(ActorPhase::Stopping);
        self.cancel.cancel();
        if let Some(reader) = &self.reader {
            reader.close();
        }
        self.core.connected.store(false, Ordering::Release);
    }

    /// Wait for the loops and the reader to finish. Call after [`stop`](Self::stop).
    pub async fn wait(&mut self) {
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        if let Some(reader) = self.reader.take() {
            reader.join().await;
        }
        self.core.set_phase(ActorPhase::Stopped);
    }

    /// Perform one specific action. Used by the action loop and by tests.
    pub async fn perform(&self, kind: ActionKind) -> ApiResult<ActionOutcome> {
        self.core.perform(kind).await
    }
}

impl Drop for SimulatedActor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn listen(
    core: Arc<ActorCore>,
    mut inbox: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = inbox.recv() => {
                let Some(event) = event else {
                    debug!(actor_id = core.id, "Event stream ended");
                    break;
                };
                // Own broadcasts are recorded like everyone else's.
                core.correlator.record_received(
                    event.kind,
                    &event.key,
                    core.id,
                    event.received_at,
                );
            }
        }
    }
}

async fn act(
    core: Arc<ActorCore>,
    ticker: SharedTicker,
    signals: RunSignals,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = signals.actions_stop.cancelled() => break,
            _ = cancel.cancelled() => break,
            tick = ticker.tick() => {
                if tick.is_none() {
                    break;
                }
            }
        }

        if !core.connected.load(Ordering::Acquire) {
            continue;
        }

        let kind = actions::sample();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = core.perform(kind) => result,
        };

        match result {
            Ok(ActionOutcome::Sent { key, .. }) => {
                debug!(actor_id = core.id, action = %kind, key = %key, "Action sent");
            }
            Ok(ActionOutcome::Skipped(reason)) => {
                debug!(actor_id = core.id, action = %kind, reason, "Action skipped");
            }
            Err(e) if e.is_rate_limited() => {
                error!(
                    actor_id = core.id,
                    action = %kind,
                    error = %e,
                    "Rate limited, aborting run"
                );
                signals.abort.cancel();
                break;
            }
            Err(e) => {
                debug!(actor_id = core.id, action = %kind, error = %e, "Action failed");
            }
        }
    }
}

impl ActorCore {
    fn set_phase(&self, phase: ActorPhase) {
        *self.phase.lock() = phase;
    }

    fn record(&self, kind: EventKind, key: String) -> ActionOutcome {
        let event_id = self.correlator.record_sent(kind, key.clone(), self.id);
        ActionOutcome::Sent {
            kind,
            key,
            event_id,
        }
    }

    async fn perform(&self, kind: ActionKind) -> ApiResult<ActionOutcome> {
        match kind {
            ActionKind::CreateCard => self.create_card().await,
            ActionKind::MoveCard => self.move_card().await,
            ActionKind::Vote => self.vote().await,
            ActionKind::GroupCards => self.group_cards().await,
            ActionKind::GroupCardOnto => self.group_card_onto().await,
        }
    }

    async fn create_card(&self) -> ApiResult<ActionOutcome> {
        let columns = &self.board.column_ids;
        if columns.is_empty() {
            return Ok(ActionOutcome::Skipped("no columns"));
        }
        let column = &columns[random_index(columns.len())];
        let content = format!(
            "Test card from user {} at {}",
            self.id,
            chrono::Local::now().format("%H:%M:%S")
        );

        let card = self
            .api
            .create_card(&self.board.board_id, column, &content)
            .await?;
        let outcome = self.record(EventKind::CardCreated, card.id.clone());

        self.own_cards.lock().push(card.id);
        Ok(outcome)
    }

    async fn move_card(&self) -> ApiResult<ActionOutcome> {
        let card = {
            let cards = self.own_cards.lock();
            if cards.is_empty() {
                return Ok(ActionOutcome::Skipped("no own cards"));
            }
            cards[random_index(cards.len())].clone()
        };
        let columns = &self.board.column_ids;
        if columns.is_empty() {
            return Ok(ActionOutcome::Skipped("no columns"));
        }
        let column = &columns[random_index(columns.len())];

        self.api.move_card(&card, column).await?;
        Ok(self.record(EventKind::CardUpdated, card))
    }

    async fn vote(&self) -> ApiResult<ActionOutcome> {
        let board = self.api.get_board(&self.board.board_id).await?;
        let cards: Vec<&str> = board.cards().map(|c| c.id.as_str()).collect();
        if cards.is_empty() {
            return Ok(ActionOutcome::Skipped("no cards on board"));
        }
        let card = cards[random_index(cards.len())].to_string();

        self.api.vote_on_card(&card).await?;
        Ok(self.record(EventKind::VoteChanged, card))
    }

    async fn group_cards(&self) -> ApiResult<ActionOutcome> {
        let board = self.api.get_board(&self.board.board_id).await?;

        let candidates = board.columns.iter().find_map(|column| {
            let ungrouped: Vec<String> = column
                .cards
                .iter()
                .filter(|c| !c.is_grouped())
                .map(|c| c.id.clone())
                .collect();
            (ungrouped.len() >= 2).then_some(ungrouped)
        });
        let Some(mut card_ids) = candidates else {
            return Ok(ActionOutcome::Skipped("no column with two ungrouped cards"));
        };

        card_ids.truncate(2 + random_index(2));
        let group_id = format!(
            "group-{}-{}",
            self.id,
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );

        self.api
            .group_cards(&self.board.board_id, &card_ids, &group_id)
            .await?;
        Ok(self.record(EventKind::CardsGrouped, group_id))
    }

    async fn group_card_onto(&self) -> ApiResult<ActionOutcome> {
        let own = self.own_cards.lock().clone();
        if own.is_empty() {
            return Ok(ActionOutcome::Skipped("no own cards"));
        }
        let board = self.api.get_board(&self.board.board_id).await?;

        let pair = board.columns.iter().find_map(|column| {
            let card = column
                .cards
                .iter()
                .find(|c| !c.is_grouped() && own.contains(&c.id))?;
            Some((column, card))
        });
        let Some((column, card)) = pair else {
            return Ok(ActionOutcome::Skipped("no ungrouped own card"));
        };
        let Some(target) = column.cards.iter().find(|c| c.id != card.id) else {
            return Ok(ActionOutcome::Skipped("no target card in column"));
        };

        self.api.group_card_onto(&card.id, &target.id).await?;
        Ok(self.record(EventKind::CardGroupedOnto, card.id.clone()))
    }
}
