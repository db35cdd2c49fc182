mod common;

use beatload::actor::actions::ActionKind;
use beatload::actor::{ActionOutcome, BoardContext, Credentials, RunSignals};
use beatload::api::ApplicationApi;
use beatload::ticker::SharedTicker;
use beatload::{ActorPhase, Error, EventCorrelator, EventKind, RunConfig, SimulatedActor};
use common::{Behaviour, FakeServer};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn context(server: &FakeServer) -> BoardContext {
    let board = server.seed_board();
    BoardContext {
        board_id: board.id.clone(),
        series_id: board.series_id.clone(),
        column_ids: board.column_ids(),
    }
}

fn actor(
    server: &Arc<FakeServer>,
    id: usize,
    board: &BoardContext,
    correlator: &Arc<EventCorrelator>,
) -> SimulatedActor {
    let config = RunConfig {
        handshake_timeout: Duration::from_secs(1),
        ..Default::default()
    };
    let api: Arc<dyn ApplicationApi> = server.client();
    SimulatedActor::new(id, board.clone(), api, correlator.clone(), &config)
}

/// Poll `done` until it holds, giving the reader and listener tasks room to run.
async fn eventually(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_setup_joins_board() {
    common::init_tracing();
    let server = FakeServer::new(Behaviour::default());
    let board = context(&server);
    let correlator = Arc::new(EventCorrelator::new());

    let mut a = actor(&server, 1, &board, &correlator);
    assert_eq!(a.phase(), ActorPhase::Created);
    assert!(!a.is_connected());

    a.setup().await.unwrap();
    assert_eq!(a.phase(), ActorPhase::Joined);
    assert!(a.is_connected());
    assert!(a.client_id().is_some_and(|id| id.starts_with("client-")));
    assert_eq!(server.logins(), 0);

    a.stop();
    a.wait().await;
    assert_eq!(a.phase(), ActorPhase::Stopped);
    assert!(!a.is_connected());
}

#[tokio::test]
async fn test_register_conflict_falls_back_to_login() {
    let server = FakeServer::new(Behaviour {
        reject_register: true,
        ..Default::default()
    });
    let board = context(&server);
    let correlator = Arc::new(EventCorrelator::new());

    let mut a = actor(&server, 1, &board, &correlator);
    a.setup().await.unwrap();
    assert_eq!(server.logins(), 1);
    a.stop();
    a.wait().await;
}

#[tokio::test(start_paused = true)]
async fn test_handshake_timeout_fails_setup() {
    let server = FakeServer::new(Behaviour {
        silent_handshake: true,
        ..Default::default()
    });
    let board = context(&server);
    let correlator = Arc::new(EventCorrelator::new());

    let mut a = actor(&server, 1, &board, &correlator);
    let err = a.setup().await.unwrap_err();
    assert!(matches!(err, Error::HandshakeTimeout(_)));
    assert!(!a.is_connected());
    assert!(!err.is_rate_limited());
}

#[tokio::test]
async fn test_join_failure_fails_setup() {
    let server = FakeServer::new(Behaviour {
        failing_joins: 1,
        ..Default::default()
    });
    let board = context(&server);
    let correlator = Arc::new(EventCorrelator::new());

    let mut a = actor(&server, 1, &board, &correlator);
    assert!(matches!(a.setup().await, Err(Error::Api(_))));
    assert!(!a.is_connected());

    eventually(|| server.open_streams() == 0).await;
}

#[tokio::test]
async fn test_actions_are_recorded_and_delivered() {
    let server = FakeServer::new(Behaviour::default());
    let board = context(&server);
    let correlator = Arc::new(EventCorrelator::new());
    let signals = RunSignals::default();
    let ticker_stop = CancellationToken::new();
    let ticker = SharedTicker::spawn(Duration::from_secs(3600), ticker_stop.clone());

    let mut actors = Vec::new();
    for id in 1..=2 {
        let mut a = actor(&server, id, &board, &correlator);
        a.setup().await.unwrap();
        a.start(ticker.clone(), signals.clone());
        assert_eq!(a.phase(), ActorPhase::Active);
        actors.push(a);
    }
    correlator.set_connected_users(2);

    // Nothing to move or group onto yet.
    assert!(matches!(
        actors[0].perform(ActionKind::MoveCard).await.unwrap(),
        ActionOutcome::Skipped(_)
    ));

    for _ in 0..2 {
        let outcome = actors[0].perform(ActionKind::CreateCard).await.unwrap();
        assert!(matches!(
            outcome,
            ActionOutcome::Sent {
                kind: EventKind::CardCreated,
                ..
            }
        ));
    }
    assert_eq!(actors[0].own_cards().len(), 2);

    // Two foreign cards per column, so every column has a grouping target.
    for column in &board.column_ids {
        for n in 0..2 {
            server.add_card(column, &format!("peer-{column}-{n}"));
        }
    }

    for kind in [
        ActionKind::MoveCard,
        ActionKind::Vote,
        ActionKind::GroupCardOnto,
    ] {
        let outcome = actors[0].perform(kind).await.unwrap();
        match outcome {
            ActionOutcome::Sent { kind: sent, .. } => assert_eq!(sent, kind.event_kind()),
            ActionOutcome::Skipped(reason) => panic!("{kind} skipped: {reason}"),
        }
    }
    let outcome = actors[1].perform(ActionKind::GroupCards).await.unwrap();
    assert!(matches!(
        outcome,
        ActionOutcome::Sent {
            kind: EventKind::CardsGrouped,
            ..
        }
    ));

    eventually(|| correlator.stats().1 == 12).await;

    for a in &actors {
        a.stop();
        a.stop();
    }
    for a in &mut actors {
        a.wait().await;
    }
    ticker_stop.cancel();

    let report = correlator.generate_report(2);
    assert_eq!(report.events_sent, 6);
    assert_eq!(report.events_expected, 12);
    assert_eq!(report.events_received, 12);
    assert_eq!(correlator.pending_len(), 0);
}

#[tokio::test]
async fn test_rate_limited_action_aborts_run() {
    let server = FakeServer::new(Behaviour {
        rate_limit_cards: true,
        ..Default::default()
    });
    let board = context(&server);
    let correlator = Arc::new(EventCorrelator::new());

    let mut a = actor(&server, 1, &board, &correlator);
    a.setup().await.unwrap();

    let err = a.perform(ActionKind::CreateCard).await.unwrap_err();
    assert!(err.is_rate_limited());
    assert_eq!(correlator.stats(), (0, 0));

    a.stop();
    a.wait().await;
}

#[test]
fn test_generated_credentials() {
    let creds = Credentials::generate(7);
    assert!(creds.username.starts_with("testuser7_"));
    assert_eq!(creds.email, format!("{}@loadtest.local", creds.username));
    assert_eq!(creds.password, "testpass123");
}
