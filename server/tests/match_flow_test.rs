//! Flow tests for matchmaking, settings, scoring and match conclusion.
//!
//! These drive the session handlers directly against an in-process
//! `AppState` with channel-backed connections, so scoring scenarios can be
//! set up deterministically.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use volley_server::game::handlers::{self, SessionCtx};
use volley_server::game::manager::lock_room;
use volley_server::game::simulation::{BallVelocity, Difficulty, MatchSetting, BALL_SPEED};
use volley_server::presence::PresenceStatus;
use volley_server::services::{IdentityService, LocalRoster, RecordService};
use volley_server::state::AppState;
use volley_server::ws::protocol::ServerEvent;
use volley_server::ws::ConnectionHandle;

struct TestClient {
    ctx: SessionCtx,
    rx: mpsc::UnboundedReceiver<axum::extract::ws::Message>,
}

impl TestClient {
    /// Pull everything currently buffered on this connection.
    fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            if let axum::extract::ws::Message::Text(text) = msg {
                if let Ok(event) = serde_json::from_str::<ServerEvent>(text.as_str()) {
                    events.push(event);
                }
            }
        }
        events
    }
}

fn test_state(roster: &Arc<LocalRoster>) -> AppState {
    let identity: Arc<dyn IdentityService> = roster.clone();
    let records: Arc<dyn RecordService> = roster.clone();
    AppState::new(identity, records)
}

async fn connect(state: &AppState, user_id: &str, display_name: &str) -> TestClient {
    let (tx, rx) = mpsc::unbounded_channel();
    let ctx = SessionCtx {
        user_id: user_id.to_string(),
        display_name: display_name.to_string(),
        connection: ConnectionHandle::new(tx),
    };
    handlers::handle_connect(state, &ctx).await;
    TestClient { ctx, rx }
}

/// Park the ball one step short of the left goal line with the left paddle
/// out of the way, so the next two accepted moves score for the right side.
fn rig_left_goal(state: &AppState, user_id: &str) {
    let (_, room_arc) = state.rooms.room_of_player(user_id).expect("room exists");
    let mut room = lock_room(&room_arc);
    room.sim.ball.x = 45.0;
    room.sim.ball.y = 300.0;
    room.sim.vel = BallVelocity {
        x_dir: -1.0,
        y_dir: 0.0,
        speed: BALL_SPEED,
    };
    room.sim.left_paddle = 0.0;
}

#[tokio::test]
async fn queue_pairing_designates_lower_rated_selector() {
    let roster = Arc::new(LocalRoster::new());
    roster.register("t-alice", "alice", "Alice", 1200);
    roster.register("t-bob", "bob", "Bob", 1000);
    let state = test_state(&roster);

    let mut alice = connect(&state, "alice", "Alice").await;
    let mut bob = connect(&state, "bob", "Bob").await;
    alice.drain();
    bob.drain();

    handlers::join_queue(&state, &alice.ctx).await;
    assert!(handlers::is_starting_game(&state, "alice"));
    assert!(!handlers::is_starting_game(&state, "bob"));

    handlers::join_queue(&state, &bob.ctx).await;

    // Bob has the lower rating: he chooses the settings.
    let bob_events = bob.drain();
    assert!(
        bob_events
            .iter()
            .any(|e| matches!(e, ServerEvent::SelectSettings { .. })),
        "lower-rated player should receive select-settings, got {bob_events:?}"
    );
    let alice_events = alice.drain();
    assert!(alice_events
        .iter()
        .any(|e| matches!(e, ServerEvent::StandBy { .. })));

    // Both are now playing as far as peers can tell.
    assert_eq!(
        volley_server::presence::status_of(&state, "alice"),
        PresenceStatus::Playing
    );
    assert!(handlers::is_starting_game(&state, "bob"));
    assert_eq!(state.rooms.live_count(), 1);
}

#[tokio::test]
async fn queued_player_cannot_queue_twice() {
    let roster = Arc::new(LocalRoster::new());
    roster.register("t-alice", "alice", "Alice", 1000);
    let state = test_state(&roster);

    let mut alice = connect(&state, "alice", "Alice").await;
    handlers::join_queue(&state, &alice.ctx).await;
    alice.drain();

    handlers::join_queue(&state, &alice.ctx).await;
    let events = alice.drain();
    assert!(events
        .iter()
        .any(|e| matches!(e, ServerEvent::Error { .. })));
}

#[tokio::test]
async fn settings_to_finish_emits_exactly_one_match_finished() {
    let roster = Arc::new(LocalRoster::new());
    roster.register("t-alice", "alice", "Alice", 1000);
    roster.register("t-bob", "bob", "Bob", 1000);
    let state = test_state(&roster);

    let mut alice = connect(&state, "alice", "Alice").await;
    let mut bob = connect(&state, "bob", "Bob").await;

    handlers::join_queue(&state, &alice.ctx).await;
    handlers::join_queue(&state, &bob.ctx).await;
    alice.drain();
    bob.drain();

    // Equal ratings: slot 0 (Alice, queued first) picks the settings.
    handlers::confirm_settings(
        &state,
        &alice.ctx,
        MatchSetting {
            difficulty: Difficulty::Easy,
            target_score: 1,
        },
    );
    assert!(alice
        .drain()
        .iter()
        .any(|e| matches!(e, ServerEvent::MatchStarted { .. })));
    assert!(bob
        .drain()
        .iter()
        .any(|e| matches!(e, ServerEvent::MatchStarted { .. })));

    // Ball one step short of Alice's uncovered goal line; two accepted
    // moves later Bob reaches the target score.
    rig_left_goal(&state, "alice");
    handlers::paddle_move(&state, &bob.ctx, 0.0);
    handlers::paddle_move(&state, &bob.ctx, 0.0);

    let alice_finished: Vec<_> = alice
        .drain()
        .into_iter()
        .filter(|e| matches!(e, ServerEvent::MatchFinished { .. }))
        .collect();
    let bob_finished: Vec<_> = bob
        .drain()
        .into_iter()
        .filter(|e| matches!(e, ServerEvent::MatchFinished { .. }))
        .collect();
    assert_eq!(alice_finished.len(), 1);
    assert_eq!(bob_finished.len(), 1);

    // Easy halves the base reward: 10 * 1 / 2 = 5 points at stake.
    match &bob_finished[0] {
        ServerEvent::MatchFinished {
            point_delta,
            summary,
        } => {
            assert_eq!(*point_delta, Some(5));
            assert_eq!(summary.winner_id, "bob");
            assert_eq!(summary.winner_score, 1);
        }
        _ => unreachable!(),
    }
    match &alice_finished[0] {
        ServerEvent::MatchFinished { point_delta, .. } => assert_eq!(*point_delta, Some(-5)),
        _ => unreachable!(),
    }

    // No residual room, nobody still counts as starting a game.
    assert_eq!(state.rooms.live_count(), 0);
    assert!(!handlers::is_starting_game(&state, "alice"));
    assert!(!handlers::is_starting_game(&state, "bob"));
    assert_eq!(
        volley_server::presence::status_of(&state, "bob"),
        PresenceStatus::Online
    );

    // The record write happens in a detached task.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let recorded = roster.recorded_matches();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].winner_id, "bob");
    assert_eq!(roster.points_of("bob"), Some(1005));
    assert_eq!(roster.points_of("alice"), Some(995));
}

#[tokio::test]
async fn loser_points_floor_at_zero() {
    let roster = Arc::new(LocalRoster::new());
    roster.register("t-alice", "alice", "Alice", 3);
    roster.register("t-bob", "bob", "Bob", 1000);
    let state = test_state(&roster);

    let mut alice = connect(&state, "alice", "Alice").await;
    let bob = connect(&state, "bob", "Bob").await;

    handlers::join_queue(&state, &alice.ctx).await;
    handlers::join_queue(&state, &bob.ctx).await;

    // Alice (3 points) is the underdog selector.
    handlers::confirm_settings(
        &state,
        &alice.ctx,
        MatchSetting {
            difficulty: Difficulty::Hard,
            target_score: 1,
        },
    );
    alice.drain();

    rig_left_goal(&state, "alice");
    handlers::paddle_move(&state, &bob.ctx, 0.0);
    handlers::paddle_move(&state, &bob.ctx, 0.0);

    let deltas: Vec<_> = alice
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            ServerEvent::MatchFinished { point_delta, .. } => point_delta,
            _ => None,
        })
        .collect();
    assert_eq!(deltas, vec![-3], "loss is capped at current points");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(roster.points_of("alice"), Some(0));
}

#[tokio::test]
async fn concurrent_cancels_notify_once() {
    let roster = Arc::new(LocalRoster::new());
    roster.register("t-alice", "alice", "Alice", 1000);
    roster.register("t-bob", "bob", "Bob", 1000);
    let state = test_state(&roster);

    let mut alice = connect(&state, "alice", "Alice").await;
    let mut bob = connect(&state, "bob", "Bob").await;

    handlers::join_queue(&state, &alice.ctx).await;
    handlers::join_queue(&state, &bob.ctx).await;
    handlers::confirm_settings(
        &state,
        &alice.ctx,
        MatchSetting {
            difficulty: Difficulty::Normal,
            target_score: 3,
        },
    );
    alice.drain();
    bob.drain();

    // Both players cancel; only the first removal wins.
    handlers::cancel_match(&state, &alice.ctx);
    handlers::cancel_match(&state, &bob.ctx);

    let cancelled = |events: Vec<ServerEvent>| {
        events
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::MatchCancelled))
            .count()
    };
    assert_eq!(cancelled(alice.drain()), 1);
    assert_eq!(cancelled(bob.drain()), 1);
    assert_eq!(state.rooms.live_count(), 0);

    // Cancellations never reach the record service.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(roster.recorded_matches().is_empty());
}

#[tokio::test]
async fn cancelling_during_settings_is_valid() {
    let roster = Arc::new(LocalRoster::new());
    roster.register("t-alice", "alice", "Alice", 1000);
    roster.register("t-bob", "bob", "Bob", 1000);
    let state = test_state(&roster);

    let mut alice = connect(&state, "alice", "Alice").await;
    let bob = connect(&state, "bob", "Bob").await;

    handlers::join_queue(&state, &alice.ctx).await;
    handlers::join_queue(&state, &bob.ctx).await;
    alice.drain();

    handlers::cancel_match(&state, &bob.ctx);
    assert!(alice
        .drain()
        .iter()
        .any(|e| matches!(e, ServerEvent::MatchCancelled)));
    assert_eq!(state.rooms.live_count(), 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(roster.recorded_matches().is_empty());
}

#[tokio::test]
async fn disconnect_cleanup_is_idempotent_and_cancels_the_match() {
    let roster = Arc::new(LocalRoster::new());
    roster.register("t-alice", "alice", "Alice", 1000);
    roster.register("t-bob", "bob", "Bob", 1000);
    let state = test_state(&roster);

    let alice = connect(&state, "alice", "Alice").await;
    let mut bob = connect(&state, "bob", "Bob").await;

    handlers::join_queue(&state, &alice.ctx).await;
    handlers::join_queue(&state, &bob.ctx).await;
    bob.drain();

    handlers::handle_disconnect(&state, &alice.ctx).await;
    handlers::handle_disconnect(&state, &alice.ctx).await;

    let cancellations = bob
        .drain()
        .into_iter()
        .filter(|e| matches!(e, ServerEvent::MatchCancelled))
        .count();
    assert_eq!(cancellations, 1, "second disconnect must be a no-op");
    assert_eq!(state.rooms.live_count(), 0);
    assert_eq!(
        volley_server::presence::status_of(&state, "alice"),
        PresenceStatus::Offline
    );
    assert!(!handlers::is_starting_game(&state, "bob"));
}

#[tokio::test]
async fn spectators_get_neutral_updates_and_cannot_move_the_ball() {
    let roster = Arc::new(LocalRoster::new());
    roster.register("t-alice", "alice", "Alice", 1000);
    roster.register("t-bob", "bob", "Bob", 1000);
    roster.register("t-carol", "carol", "Carol", 1000);
    let state = test_state(&roster);

    let mut alice = connect(&state, "alice", "Alice").await;
    let bob = connect(&state, "bob", "Bob").await;
    let mut carol = connect(&state, "carol", "Carol").await;

    handlers::join_queue(&state, &alice.ctx).await;
    handlers::join_queue(&state, &bob.ctx).await;
    handlers::confirm_settings(
        &state,
        &alice.ctx,
        MatchSetting {
            difficulty: Difficulty::Easy,
            target_score: 1,
        },
    );
    carol.drain();

    handlers::watch_friend(&state, &carol.ctx, "alice");
    let events = carol.drain();
    assert!(events
        .iter()
        .any(|e| matches!(e, ServerEvent::MatchStarted { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, ServerEvent::StateUpdate { .. })));
    assert_eq!(
        volley_server::presence::status_of(&state, "carol"),
        PresenceStatus::Playing
    );

    // Spectator input refreshes state without mutating the simulation.
    let (_, room_arc) = state.rooms.room_of_player("alice").unwrap();
    let ball_before = lock_room(&room_arc).sim.ball;
    handlers::paddle_move(&state, &carol.ctx, 100.0);
    let ball_after = lock_room(&room_arc).sim.ball;
    assert_eq!(ball_before, ball_after);
    assert!(carol
        .drain()
        .iter()
        .any(|e| matches!(e, ServerEvent::StateUpdate { .. })));

    // Spectators get a neutral match-finished summary.
    rig_left_goal(&state, "alice");
    handlers::paddle_move(&state, &bob.ctx, 0.0);
    handlers::paddle_move(&state, &bob.ctx, 0.0);
    alice.drain();
    let carol_finished: Vec<_> = carol
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            ServerEvent::MatchFinished { point_delta, .. } => Some(point_delta),
            _ => None,
        })
        .collect();
    assert_eq!(carol_finished, vec![None]);
    assert_eq!(
        volley_server::presence::status_of(&state, "carol"),
        PresenceStatus::Online
    );
}

#[tokio::test]
async fn watch_list_reports_playing_rooms() {
    let roster = Arc::new(LocalRoster::new());
    roster.register("t-alice", "alice", "Alice", 1000);
    roster.register("t-bob", "bob", "Bob", 1000);
    roster.register("t-carol", "carol", "Carol", 1000);
    let state = test_state(&roster);

    let alice = connect(&state, "alice", "Alice").await;
    let bob = connect(&state, "bob", "Bob").await;
    let mut carol = connect(&state, "carol", "Carol").await;

    handlers::join_queue(&state, &alice.ctx).await;
    handlers::join_queue(&state, &bob.ctx).await;
    carol.drain();

    // Still choosing settings: not watchable yet.
    handlers::watch_list(&state, &carol.ctx);
    match carol.drain().as_slice() {
        [ServerEvent::WatchList { rooms }] => assert!(rooms.is_empty()),
        other => panic!("expected a watch list, got {other:?}"),
    }

    handlers::confirm_settings(
        &state,
        &alice.ctx,
        MatchSetting {
            difficulty: Difficulty::Normal,
            target_score: 3,
        },
    );
    handlers::watch_list(&state, &carol.ctx);
    match carol.drain().as_slice() {
        [ServerEvent::WatchList { rooms }] => {
            assert_eq!(rooms.len(), 1);
            assert_eq!(rooms[0].player_names, ["Alice", "Bob"]);
        }
        other => panic!("expected a watch list, got {other:?}"),
    }
}
