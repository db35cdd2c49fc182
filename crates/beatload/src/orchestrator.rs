//! Run orchestration.
//!
//! One run goes through these phases:
//!
//! 1. provision a board with the admin session,
//! 2. spawn actors one by one with a fixed stagger,
//! 3. let them act for the configured duration while a monitor samples
//!    progress,
//! 4. stop the action loops, wait the grace period, disconnect everyone,
//! 5. build the [`RunReport`] from the correlator.
//!
//! Progress is published as [`RunEvent`]s on a broadcast channel so a
//! front-end can render it without the library printing anything.

use chrono::Utc;
use futures::FutureExt;
use serde::{Serialize, Serializer};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actor::{BoardContext, RunSignals, SimulatedActor};
use crate::api::types::ALL_SCENE_FLAGS;
use crate::api::{AdminApi, ApiConnector, HttpApiClient, HttpConnector};
use crate::config::RunConfig;
use crate::correlator::{DeliveryReport, EventCorrelator};
use crate::error::{Error, Result};
use crate::event::ActorId;
use crate::ticker::SharedTicker;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const BOARD_TEMPLATE: &str = "basic";
const MEMBER_ROLE: &str = "member";

/// Overall outcome of a run, judged on the delivery rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Warn,
    Fail,
}

impl Verdict {
    pub const PASS_THRESHOLD: f64 = 99.9;
    pub const WARN_THRESHOLD: f64 = 99.0;

    pub fn from_rate(rate: f64) -> Self {
        if rate >= Self::PASS_THRESHOLD {
            Verdict::Pass
        } else if rate >= Self::WARN_THRESHOLD {
            Verdict::Warn
        } else {
            Verdict::Fail
        }
    }
}

/// How the measured phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunEnd {
    Completed,
    Interrupted,
}

/// Final result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub board_id: String,
    /// Measured phase only, excluding setup and the grace period.
    #[serde(rename = "duration_secs", serialize_with = "as_secs")]
    pub duration: Duration,
    pub requested_users: usize,
    pub connected_users: usize,
    pub failed_connections: usize,
    pub end: RunEnd,
    pub delivery: DeliveryReport,
}

impl RunReport {
    /// Overall delivery percentage; 0 when nothing was expected.
    pub fn delivery_rate(&self) -> f64 {
        self.delivery.delivery_rate()
    }

    /// Confirmed actions per second over the measured phase.
    pub fn operations_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.delivery.events_sent as f64 / secs
        } else {
            0.0
        }
    }

    pub fn operations_per_minute(&self) -> f64 {
        self.operations_per_second() * 60.0
    }

    pub fn verdict(&self) -> Verdict {
        Verdict::from_rate(self.delivery_rate())
    }
}

fn as_secs<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Periodic progress sample.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSnapshot {
    pub elapsed: Duration,
    pub active_users: usize,
    pub connected_users: usize,
    pub sent: usize,
    pub received: usize,
    /// Sent events per second since the measured phase started.
    pub send_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Working,
    Done,
    Info,
    Warning,
}

/// Progress notifications published during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// Pausing before provisioning.
    SetupDelay(Duration),
    SetupStep {
        status: StepStatus,
        message: String,
    },
    BoardReady {
        board_id: String,
        url: String,
        start_delay: Duration,
    },
    SpawningActors(usize),
    ActorConnected {
        id: ActorId,
        requested: usize,
    },
    ActorFailed {
        id: ActorId,
        reason: String,
    },
    SpawnComplete {
        connected: usize,
        requested: usize,
        failed: usize,
    },
    MonitoringStarted,
    Monitor(MonitorSnapshot),
    MeasurementEnded(RunEnd),
    StoppingActions,
    GracePeriod(Duration),
    DisconnectingActors,
}

/// Drives one load run.
pub struct Orchestrator {
    config: RunConfig,
    admin: Arc<dyn AdminApi>,
    connector: Arc<dyn ApiConnector>,
    correlator: Arc<EventCorrelator>,
    events: broadcast::Sender<RunEvent>,
}

impl Orchestrator {
    pub fn new(
        config: RunConfig,
        admin: Arc<dyn AdminApi>,
        connector: Arc<dyn ApiConnector>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            admin,
            connector,
            correlator: Arc::new(EventCorrelator::new()),
            events,
        }
    }

    /// Orchestrator talking HTTP to `config.base_url`.
    pub fn http(config: RunConfig) -> Result<Self> {
        config.validate()?;
        let admin = Arc::new(HttpApiClient::new(&config.base_url)?);
        let connector = Arc::new(HttpConnector::new(config.base_url.clone()));
        Ok(Self::new(config, admin, connector))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    pub fn correlator(&self) -> Arc<EventCorrelator> {
        self.correlator.clone()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    fn emit(&self, event: RunEvent) {
        let _ = self.events.send(event);
    }

    fn step(&self, status: StepStatus, message: impl Into<String>) {
        self.emit(RunEvent::SetupStep {
            status,
            message: message.into(),
        });
    }

    /// Run to completion.
    ///
    /// `shutdown` resolving ends the measured phase early; the cleanup
    /// protocol and the report still run. A rate limit anywhere aborts the run
    /// with an error.
    pub async fn run<F>(&self, shutdown: F) -> Result<RunReport>
    where
        F: Future<Output = ()>,
    {
        self.config.validate()?;
        let shutdown = shutdown.fuse();
        tokio::pin!(shutdown);

        self.emit(RunEvent::SetupDelay(self.config.setup_delay));
        tokio::time::sleep(self.config.setup_delay).await;

        let board = self.provision().await?;

        let url = self.config.board_url(&board.board_id);
        info!(board_id = %board.board_id, %url, "Board ready");
        self.emit(RunEvent::BoardReady {
            board_id: board.board_id.clone(),
            url,
            start_delay: self.config.start_delay,
        });
        tokio::time::sleep(self.config.start_delay).await;

        let ticker_stop = CancellationToken::new();
        let ticker = SharedTicker::spawn(self.config.tick_interval(), ticker_stop.clone());
        let signals = RunSignals::default();

        let requested = self.config.users;
        self.emit(RunEvent::SpawningActors(requested));

        let mut actors: Vec<SimulatedActor> = Vec::with_capacity(requested);
        let mut failed = 0usize;
        let mut interrupted = false;
        let mut fatal: Option<Error> = None;

        for id in 1..=requested {
            match self.spawn_actor(id, &board).await {
                Ok(mut actor) => {
                    // Counted before it can act, so its own sends include it.
                    self.correlator.set_connected_users(actors.len() + 1);
                    actor.start(ticker.clone(), signals.clone());
                    debug!(actor_id = id, "Actor started");
                    actors.push(actor);
                    self.emit(RunEvent::ActorConnected { id, requested });
                }
                Err(e) if e.is_rate_limited() => {
                    fatal = Some(e);
                    break;
                }
                Err(e) => {
                    warn!(actor_id = id, error = %e, "Actor setup failed");
                    failed += 1;
                    self.emit(RunEvent::ActorFailed {
                        id,
                        reason: e.to_string(),
                    });
                    continue;
                }
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    interrupted = true;
                    break;
                }
                _ = signals.abort.cancelled() => break,
                _ = tokio::time::sleep(self.config.spawn_stagger) => {}
            }
        }

        let connected = actors.len();
        self.emit(RunEvent::SpawnComplete {
            connected,
            requested,
            failed,
        });

        if let Some(e) = fatal {
            ticker_stop.cancel();
            Self::disconnect(&mut actors).await;
            return Err(e);
        }

        self.emit(RunEvent::MonitoringStarted);
        let started = Instant::now();

        let end = if interrupted || signals.abort.is_cancelled() {
            RunEnd::Interrupted
        } else {
            self.measure(&actors, &signals, started, shutdown.as_mut()).await
        };
        let duration = started.elapsed();
        self.emit(RunEvent::MeasurementEnded(end));

        self.emit(RunEvent::StoppingActions);
        signals.actions_stop.cancel();
        ticker_stop.cancel();

        self.emit(RunEvent::GracePeriod(self.config.grace_period));
        tokio::time::sleep(self.config.grace_period).await;

        self.emit(RunEvent::DisconnectingActors);
        Self::disconnect(&mut actors).await;

        if signals.abort.is_cancelled() {
            return Err(Error::RateLimited(
                "an actor was rate limited during the run".to_string(),
            ));
        }

        let report = RunReport {
            board_id: board.board_id,
            duration,
            requested_users: requested,
            connected_users: connected,
            failed_connections: failed,
            end,
            delivery: self.correlator.generate_report(connected),
        };
        info!(
            sent = report.delivery.events_sent,
            received = report.delivery.events_received,
            rate = report.delivery_rate(),
            verdict = %report.verdict(),
            "Run finished"
        );
        Ok(report)
    }

    /// Wait for the run timer, an interrupt or an abort, emitting monitor
    /// snapshots in the meantime.
    async fn measure<S>(
        &self,
        actors: &[SimulatedActor],
        signals: &RunSignals,
        started: Instant,
        mut shutdown: std::pin::Pin<&mut S>,
    ) -> RunEnd
    where
        S: Future<Output = ()>,
    {
        let period = self.config.monitor_interval;
        let mut monitor = tokio::time::interval_at(started + period, period);
        monitor.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let deadline = tokio::time::sleep_until(started + self.config.duration);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = signals.abort.cancelled() => return RunEnd::Interrupted,
                _ = shutdown.as_mut() => return RunEnd::Interrupted,
                _ = &mut deadline => return RunEnd::Completed,
                _ = monitor.tick() => {
                    let snapshot = self.snapshot(actors, started);
                    debug!(
                        sent = snapshot.sent,
                        received = snapshot.received,
                        active = snapshot.active_users,
                        "Monitor tick"
                    );
                    self.emit(RunEvent::Monitor(snapshot));
                }
            }
        }
    }

    fn snapshot(&self, actors: &[SimulatedActor], started: Instant) -> MonitorSnapshot {
        let elapsed = started.elapsed();
        let (sent, received) = self.correlator.stats();
        let secs = elapsed.as_secs_f64();
        MonitorSnapshot {
            elapsed,
            active_users: actors.iter().filter(|a| a.is_connected()).count(),
            connected_users: actors.len(),
            sent,
            received,
            send_rate: if secs > 0.0 { sent as f64 / secs } else { 0.0 },
        }
    }

    /// Set up one actor and register it as a series member. The caller starts
    /// its loops once the connected count includes it.
    async fn spawn_actor(&self, id: ActorId, board: &BoardContext) -> Result<SimulatedActor> {
        let api = self.connector.connect()?;
        let mut actor = SimulatedActor::new(
            id,
            board.clone(),
            api,
            self.correlator.clone(),
            &self.config,
        );

        actor.setup().await?;

        let email = actor.credentials().email.clone();
        if let Err(e) = self
            .admin
            .add_user_to_series(&board.series_id, &email, MEMBER_ROLE)
            .await
        {
            actor.stop();
            actor.wait().await;
            return Err(e.into());
        }

        Ok(actor)
    }

    async fn disconnect(actors: &mut [SimulatedActor]) {
        for actor in actors.iter() {
            actor.stop();
        }
        for actor in actors.iter_mut() {
            actor.wait().await;
        }
    }

    /// Create the admin account, a series and an activated board whose current
    /// scene allows every action the actors perform.
    pub async fn provision(&self) -> Result<BoardContext> {
        let unix = Utc::now().timestamp();
        let admin_email = self
            .config
            .admin_email
            .clone()
            .unwrap_or_else(|| format!("admin{unix}@loadtest.local"));
        let admin_password = format!("TestPass{unix}!");

        self.step(StepStatus::Working, "Creating admin account");
        self.admin
            .register(&admin_email, "Admin User", &admin_password)
            .await
            .map_err(Error::Authentication)?;
        self.step(StepStatus::Done, "Admin registered and authenticated");

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");

        self.step(StepStatus::Done, "Creating test series");
        let series = match self
            .admin
            .create_series(
                &format!("Load Test Series {stamp}"),
                "Series for load testing",
            )
            .await
        {
            Ok(series) => series,
            Err(e) if e.is_rate_limited() => return Err(e.into()),
            Err(e) => {
                debug!(error = %e, "Series creation failed, falling back to an existing one");
                let existing = self.admin.list_series().await?;
                let series = existing.into_iter().next().ok_or_else(|| {
                    Error::setup(format!("failed to create or get series: {e}"))
                })?;
                self.step(
                    StepStatus::Info,
                    format!("Using existing series: {}", series.id),
                );
                series
            }
        };

        self.step(StepStatus::Done, "Creating test board");
        let board = self
            .admin
            .create_board(&format!("Load Test Board {stamp}"), &series.id)
            .await?;
        let board_id = board.id;

        self.step(StepStatus::Done, "Setting up board template");
        self.admin
            .setup_board_template(&board_id, BOARD_TEMPLATE)
            .await?;

        self.step(StepStatus::Done, "Activating board");
        if let Err(e) = self.admin.update_board_status(&board_id, "active").await {
            if e.is_rate_limited() {
                return Err(e.into());
            }
            warn!(error = %e, "Failed to activate board");
            self.step(
                StepStatus::Warning,
                "Failed to activate board, continuing anyway",
            );
        }

        let board = self.admin.get_board(&board_id).await?;
        let column_ids = board.column_ids();
        if column_ids.is_empty() {
            return Err(Error::setup("no columns found in board"));
        }
        self.step(
            StepStatus::Done,
            format!("Found {} columns", column_ids.len()),
        );

        self.enable_scene_permissions(&board_id, &board).await?;

        Ok(BoardContext {
            board_id,
            series_id: series.id,
            column_ids,
        })
    }

    async fn enable_scene_permissions(
        &self,
        board_id: &str,
        board: &crate::api::Board,
    ) -> Result<()> {
        if board.current_scene_id.is_empty() {
            self.step(
                StepStatus::Warning,
                "No current scene ID - permissions may be restricted",
            );
            return Ok(());
        }
        let Some(scene) = board.current_scene() else {
            self.step(
                StepStatus::Warning,
                "No current scene found - permissions may be restricted",
            );
            return Ok(());
        };

        self.step(
            StepStatus::Info,
            format!("Current scene: {} ({})", scene.title, scene.mode),
        );
        self.step(
            StepStatus::Working,
            "Ensuring all scene permissions enabled for testing",
        );
        self.admin
            .update_scene_flags(board_id, &scene.id, ALL_SCENE_FLAGS)
            .await?;
        self.step(StepStatus::Done, "Scene permissions enabled");

        let refreshed = self.admin.get_board(board_id).await?;
        debug!(
            current_scene_id = %refreshed.current_scene_id,
            scenes = refreshed.scenes.len(),
            "Re-fetched board"
        );
        if let Some(scene) = refreshed.current_scene() {
            let missing = scene.missing_flags();
            if !missing.is_empty() {
                return Err(Error::setup(format!(
                    "scene permissions not properly set, missing {missing:?} (flags={:?})",
                    scene.flags
                )));
            }
            self.step(StepStatus::Done, "Scene permissions verified");
        }
        Ok(())
    }
}
