//! Session protocol handlers: the message-level operations driving
//! matchmaking, invitations, rooms and spectating.
//!
//! Handlers are short and mostly synchronous. The points lookups are the
//! only await points; every handler that awaits re-validates its
//! preconditions after resuming, because other connections' events may have
//! interleaved during the suspension.

use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::game::manager::lock_room;
use crate::game::queue::QueuedPlayer;
use crate::game::room::{GameState, MatchOutcome, MoveEffect, PlayerHandle, Room, Spectator};
use crate::game::simulation::{MatchSetting, Side};
use crate::game::GameError;
use crate::presence;
use crate::services::RecordService;
use crate::state::AppState;
use crate::ws::broadcast::{send_event, send_to_user};
use crate::ws::protocol::{MatchSummary, ServerEvent};
use crate::ws::{find_connection, register_connection, remove_connection, ConnectionHandle};

/// Who is speaking: resolved once per connection by the identity service.
#[derive(Clone)]
pub struct SessionCtx {
    pub user_id: String,
    pub display_name: String,
    pub connection: ConnectionHandle,
}

fn fail(ctx: &SessionCtx, err: GameError) {
    tracing::debug!(user_id = %ctx.user_id, error = %err, "rejected game event");
    send_event(
        &ctx.connection.sender,
        &ServerEvent::Error {
            message: err.to_string(),
        },
    );
}

fn serve_sign(rng: &mut impl Rng) -> f32 {
    if rng.random_bool(0.5) {
        1.0
    } else {
        -1.0
    }
}

fn state_event(room: &Room) -> ServerEvent {
    ServerEvent::StateUpdate {
        paddle1: room.sim.paddle_y(Side::Left),
        paddle2: room.sim.paddle_y(Side::Right),
        ball: room.sim.ball,
    }
}

fn score_event(room: &Room) -> ServerEvent {
    let scores = room.scores();
    ServerEvent::ScoreUpdate {
        score1: scores[0],
        score2: scores[1],
    }
}

/// True iff the user is in the queue, a player in a live room, or a party
/// to an outstanding invitation. This predicate is the sole gate against
/// double-matching.
pub fn is_starting_game(state: &AppState, user_id: &str) -> bool {
    if state.rooms.is_player(user_id) {
        return true;
    }
    state
        .matchmaking
        .lock()
        .expect("matchmaking lock poisoned")
        .involves(user_id)
}

// --- Connection lifecycle ---

/// Register a new authenticated connection: presence goes online, the new
/// client receives the presence snapshot, and invitations naming it as
/// guest are resurfaced.
pub async fn handle_connect(state: &AppState, ctx: &SessionCtx) {
    register_connection(&state.connections, &ctx.user_id, ctx.connection.clone());
    state.identity.set_online(&ctx.user_id).await;
    presence::note_online(state, &ctx.user_id, &ctx.display_name);

    for (user_id, status) in presence::snapshot(state) {
        send_event(
            &ctx.connection.sender,
            &ServerEvent::StatusUpdate { user_id, status },
        );
    }

    let hosts = {
        let mm = state.matchmaking.lock().expect("matchmaking lock poisoned");
        mm.invites.hosts_inviting(&ctx.user_id)
    };
    for host_id in hosts {
        let host_name =
            presence::display_name_of(state, &host_id).unwrap_or_else(|| host_id.clone());
        send_event(
            &ctx.connection.sender,
            &ServerEvent::InviteReceived { host_id, host_name },
        );
    }
}

/// Tear down one connection. Idempotent and total: the registry entry is
/// the guard, and queue, invitations, rooms and presence are all settled.
pub async fn handle_disconnect(state: &AppState, ctx: &SessionCtx) {
    if !remove_connection(&state.connections, &ctx.user_id, ctx.connection.id) {
        return;
    }

    // Queue entry and any invitation authored over this connection.
    let cancelled_invite = {
        let mut mm = state.matchmaking.lock().expect("matchmaking lock poisoned");
        mm.queue.remove_connection(ctx.connection.id);
        mm.invites.cancel_by_connection(ctx.connection.id)
    };
    if let Some(invitation) = cancelled_invite {
        send_to_user(
            &state.connections,
            &invitation.guest_id,
            &ServerEvent::InviteCancelled {
                host_id: invitation.host_id,
            },
        );
    }

    // Seated in a room over this connection: the match cannot continue.
    if let Some((room_id, room_arc)) = state.rooms.room_of_player(&ctx.user_id) {
        let seated_here = {
            let room = lock_room(&room_arc);
            room.players
                .iter()
                .any(|p| p.connection.id == ctx.connection.id)
        };
        if seated_here {
            cancel_room(state, room_id);
        }
    }

    // Spectating: plain removal, no cancellation.
    if let Some((room_id, _)) = state.rooms.unregister_watcher(ctx.connection.id) {
        if let Some(room_arc) = state.rooms.get(room_id) {
            let mut room = lock_room(&room_arc);
            room.spectators
                .retain(|s| s.connection.id != ctx.connection.id);
        }
        settle_playing(state, &ctx.user_id);
    }

    let has_remaining = state
        .connections
        .get(&ctx.user_id)
        .map(|v| !v.is_empty())
        .unwrap_or(false);
    if !has_remaining {
        presence::note_offline(state, &ctx.user_id);
        state.identity.set_offline(&ctx.user_id).await;
    }
}

// --- Matchmaking ---

pub async fn join_queue(state: &AppState, ctx: &SessionCtx) {
    if is_starting_game(state, &ctx.user_id) {
        fail(ctx, GameError::AlreadyStartingGame);
        return;
    }

    let points = match state.records.load_points(&ctx.user_id).await {
        Ok(points) => points,
        Err(e) => {
            fail(ctx, e.into());
            return;
        }
    };

    // The lookup suspended us: re-validate and pair or enqueue atomically.
    let paired: Result<Option<QueuedPlayer>, GameError> = {
        let mut mm = state.matchmaking.lock().expect("matchmaking lock poisoned");
        if state.rooms.is_player(&ctx.user_id) || mm.involves(&ctx.user_id) {
            Err(GameError::AlreadyStartingGame)
        } else if let Some(opponent) = mm.queue.dequeue_opponent_for(&ctx.user_id) {
            Ok(Some(opponent))
        } else {
            mm.queue.enqueue(QueuedPlayer {
                user_id: ctx.user_id.clone(),
                display_name: ctx.display_name.clone(),
                points,
                connection: ctx.connection.clone(),
            });
            Ok(None)
        }
    };

    match paired {
        Err(e) => fail(ctx, e),
        Ok(None) => {
            tracing::debug!(user_id = %ctx.user_id, "queued for matchmaking");
        }
        Ok(Some(opponent)) => {
            let first = PlayerHandle::new(
                &opponent.user_id,
                &opponent.display_name,
                opponent.points,
                opponent.connection,
            );
            let second = PlayerHandle::new(
                &ctx.user_id,
                &ctx.display_name,
                points,
                ctx.connection.clone(),
            );
            open_room(state, first, second);
        }
    }
}

pub fn cancel_queue(state: &AppState, ctx: &SessionCtx) {
    let removed = state
        .matchmaking
        .lock()
        .expect("matchmaking lock poisoned")
        .queue
        .remove_connection(ctx.connection.id);
    if !removed {
        tracing::debug!(user_id = %ctx.user_id, "cancel-queue without queue entry");
    }
}

// --- Invitations ---

pub fn invite(state: &AppState, ctx: &SessionCtx, host_id: &str, guest_id: &str) {
    if host_id != ctx.user_id {
        fail(ctx, GameError::WrongSender);
        return;
    }
    if guest_id == ctx.user_id {
        fail(ctx, GameError::SelfInvite);
        return;
    }

    let result = {
        let mut mm = state.matchmaking.lock().expect("matchmaking lock poisoned");
        if mm.invites.find_by_host(&ctx.user_id).is_some() {
            Err(GameError::InvitePending)
        } else if state.rooms.is_player(&ctx.user_id) || mm.involves(&ctx.user_id) {
            Err(GameError::AlreadyStartingGame)
        } else {
            mm.invites.invite(&ctx.user_id, guest_id, ctx.connection.id);
            Ok(())
        }
    };

    match result {
        Err(e) => fail(ctx, e),
        Ok(()) => {
            tracing::info!(host_id = %ctx.user_id, guest_id = %guest_id, "invitation sent");
            send_to_user(
                &state.connections,
                guest_id,
                &ServerEvent::InviteReceived {
                    host_id: ctx.user_id.clone(),
                    host_name: ctx.display_name.clone(),
                },
            );
        }
    }
}

pub fn cancel_invite(state: &AppState, ctx: &SessionCtx, host_id: &str) {
    if host_id != ctx.user_id {
        fail(ctx, GameError::WrongSender);
        return;
    }
    let cancelled = {
        let mut mm = state.matchmaking.lock().expect("matchmaking lock poisoned");
        mm.invites.cancel(&ctx.user_id)
    };
    match cancelled {
        Some(invitation) => {
            send_to_user(
                &state.connections,
                &invitation.guest_id,
                &ServerEvent::InviteCancelled {
                    host_id: invitation.host_id,
                },
            );
        }
        None => {
            tracing::debug!(user_id = %ctx.user_id, "cancel-invite without invitation");
        }
    }
}

pub fn deny_invite(state: &AppState, ctx: &SessionCtx, host_id: &str) {
    let denied = {
        let mut mm = state.matchmaking.lock().expect("matchmaking lock poisoned");
        let addressed_to_sender = mm
            .invites
            .find_by_host(host_id)
            .is_some_and(|inv| inv.guest_id == ctx.user_id);
        if addressed_to_sender {
            mm.invites.cancel(host_id)
        } else {
            None
        }
    };
    match denied {
        Some(invitation) => {
            send_to_user(
                &state.connections,
                &invitation.host_id,
                &ServerEvent::InviteDenied,
            );
        }
        None => fail(ctx, GameError::InviteUnavailable),
    }
}

pub async fn accept_invite(state: &AppState, ctx: &SessionCtx, host_id: &str, guest_id: &str) {
    if guest_id != ctx.user_id {
        fail(ctx, GameError::WrongSender);
        return;
    }

    let invitation = {
        let mm = state.matchmaking.lock().expect("matchmaking lock poisoned");
        mm.invites.find_by_host(host_id).cloned()
    };
    let Some(invitation) = invitation.filter(|inv| inv.guest_id == ctx.user_id) else {
        fail(ctx, GameError::InviteUnavailable);
        return;
    };
    if state.rooms.is_player(&ctx.user_id) || state.rooms.is_player(host_id) {
        fail(ctx, GameError::AlreadyStartingGame);
        return;
    }

    let lookups = tokio::join!(
        state.records.load_points(host_id),
        state.records.load_points(&ctx.user_id)
    );
    let (host_points, guest_points) = match lookups {
        (Ok(host_points), Ok(guest_points)) => (host_points, guest_points),
        (Err(e), _) | (_, Err(e)) => {
            fail(ctx, e.into());
            return;
        }
    };

    // The lookups suspended us; the invitation may have been consumed or
    // either player matched elsewhere. Re-validate and consume atomically.
    let consumed = {
        let mut mm = state.matchmaking.lock().expect("matchmaking lock poisoned");
        let still_valid = mm.invites.find_by_host(host_id).is_some_and(|inv| {
            inv.guest_id == ctx.user_id && inv.host_connection == invitation.host_connection
        }) && !mm.queue.contains_user(host_id)
            && !mm.queue.contains_user(&ctx.user_id)
            && !state.rooms.is_player(host_id)
            && !state.rooms.is_player(&ctx.user_id);
        if still_valid {
            mm.invites.cancel(host_id)
        } else {
            None
        }
    };
    let Some(invitation) = consumed else {
        fail(ctx, GameError::InviteUnavailable);
        return;
    };

    let Some(host_connection) =
        find_connection(&state.connections, host_id, invitation.host_connection)
    else {
        fail(ctx, GameError::InviteUnavailable);
        return;
    };
    let host_name =
        presence::display_name_of(state, host_id).unwrap_or_else(|| host_id.to_string());

    // Host invited first, so the host takes slot 0.
    open_room(
        state,
        PlayerHandle::new(host_id, &host_name, host_points, host_connection),
        PlayerHandle::new(
            &ctx.user_id,
            &ctx.display_name,
            guest_points,
            ctx.connection.clone(),
        ),
    );
}

/// Resurface open invitations naming the requester as guest.
pub fn invited_list(state: &AppState, ctx: &SessionCtx, user_id: &str) {
    if user_id != ctx.user_id {
        fail(ctx, GameError::WrongSender);
        return;
    }
    let hosts = {
        let mm = state.matchmaking.lock().expect("matchmaking lock poisoned");
        mm.invites.hosts_inviting(&ctx.user_id)
    };
    for host_id in hosts {
        let host_name =
            presence::display_name_of(state, &host_id).unwrap_or_else(|| host_id.clone());
        send_event(
            &ctx.connection.sender,
            &ServerEvent::InviteReceived { host_id, host_name },
        );
    }
}

// --- Rooms ---

/// Create a room for two freshly paired players and prompt the designated
/// settings-selector. Slot 0 belongs to whichever player committed first.
fn open_room(state: &AppState, first: PlayerHandle, second: PlayerHandle) {
    let mut rng = rand::rng();
    let room = Room::new(first, second, rng.random_bool(0.5), serve_sign(&mut rng));
    let room_id = room.id;
    let names = room.player_names();
    let selector = room.selector();
    let players: Vec<(String, ConnectionHandle)> = room
        .players
        .iter()
        .map(|p| (p.user_id.clone(), p.connection.clone()))
        .collect();

    state.rooms.insert(room);
    tracing::info!(room_id = %room_id, players = ?names, "room opened");

    for (idx, (_, connection)) in players.iter().enumerate() {
        let event = if idx == selector {
            ServerEvent::SelectSettings {
                player_names: names.clone(),
            }
        } else {
            ServerEvent::StandBy {
                player_names: names.clone(),
            }
        };
        send_event(&connection.sender, &event);
    }
    for (user_id, _) in &players {
        presence::mark_playing(state, user_id);
    }
}

pub fn confirm_settings(state: &AppState, ctx: &SessionCtx, setting: MatchSetting) {
    let Some((room_id, room_arc)) = state.rooms.room_of_player(&ctx.user_id) else {
        fail(ctx, GameError::NotInMatch);
        return;
    };

    let confirmed = {
        let mut room = lock_room(&room_arc);
        room.confirm_settings(&ctx.user_id, setting)
            .map(|settings| (settings, room.participant_connections(), state_event(&room)))
    };

    match confirmed {
        Err(e) => fail(ctx, e),
        Ok((settings, targets, initial_state)) => {
            tracing::info!(
                room_id = %room_id,
                difficulty = ?settings.difficulty,
                target_score = settings.target_score,
                "match started"
            );
            for connection in &targets {
                send_event(&connection.sender, &ServerEvent::MatchStarted { settings });
                send_event(&connection.sender, &initial_state);
            }
        }
    }
}

pub fn paddle_move(state: &AppState, ctx: &SessionCtx, delta: f32) {
    if let Some((room_id, room_arc)) = state.rooms.room_of_player(&ctx.user_id) {
        let sign = serve_sign(&mut rand::rng());
        let (effect, targets, events) = {
            let mut room = lock_room(&room_arc);
            let effect = room.apply_move(&ctx.user_id, delta, sign);
            let mut events = Vec::new();
            match &effect {
                MoveEffect::Ignored => {}
                MoveEffect::Advanced => events.push(state_event(&room)),
                MoveEffect::Scored { .. } => {
                    events.push(state_event(&room));
                    events.push(score_event(&room));
                }
            }
            (effect, room.participant_connections(), events)
        };

        for event in &events {
            for connection in &targets {
                send_event(&connection.sender, event);
            }
        }
        if let MoveEffect::Scored {
            finished: Some(outcome),
            ..
        } = effect
        {
            conclude_match(state, room_id, outcome);
        }
    } else if let Some(room_id) = state.rooms.watched_room(ctx.connection.id) {
        // Spectator input is a presence refresh: resend state, mutate nothing.
        if let Some(room_arc) = state.rooms.get(room_id) {
            let (current, scores) = {
                let room = lock_room(&room_arc);
                (state_event(&room), score_event(&room))
            };
            send_event(&ctx.connection.sender, &current);
            send_event(&ctx.connection.sender, &scores);
        }
    } else {
        fail(ctx, GameError::NotInMatch);
    }
}

pub fn cancel_match(state: &AppState, ctx: &SessionCtx) {
    let Some((room_id, _)) = state.rooms.room_of_player(&ctx.user_id) else {
        fail(ctx, GameError::NotInMatch);
        return;
    };
    // Losing the removal race means the room was concluded concurrently;
    // nothing further to do.
    cancel_room(state, room_id);
}

// --- Spectating ---

pub fn watch_room(state: &AppState, ctx: &SessionCtx, room_id: Uuid) {
    let Some(room_arc) = state.rooms.get(room_id) else {
        fail(ctx, GameError::RoomGone);
        return;
    };

    let joined = {
        let mut room = lock_room(&room_arc);
        if !room.is_live() {
            Err(GameError::RoomGone)
        } else {
            if !room
                .spectators
                .iter()
                .any(|s| s.connection.id == ctx.connection.id)
            {
                room.spectators.push(Spectator {
                    user_id: ctx.user_id.clone(),
                    connection: ctx.connection.clone(),
                });
            }
            Ok((room.setting, state_event(&room), score_event(&room)))
        }
    };

    match joined {
        Err(e) => fail(ctx, e),
        Ok((setting, current, scores)) => {
            let displaced = state
                .rooms
                .register_watcher(ctx.connection.id, room_id, &ctx.user_id);
            // A connection watches one room at a time: detach it from the
            // room it was pointed at before.
            if let Some((previous_room, _)) = displaced {
                if previous_room != room_id {
                    if let Some(previous_arc) = state.rooms.get(previous_room) {
                        let mut previous = lock_room(&previous_arc);
                        previous
                            .spectators
                            .retain(|s| s.connection.id != ctx.connection.id);
                    }
                }
            }
            if state.rooms.get(room_id).is_none() {
                // The room concluded while we were joining.
                state.rooms.unregister_watcher(ctx.connection.id);
                fail(ctx, GameError::RoomGone);
                return;
            }
            presence::mark_playing(state, &ctx.user_id);
            if let Some(settings) = setting {
                send_event(&ctx.connection.sender, &ServerEvent::MatchStarted { settings });
            }
            send_event(&ctx.connection.sender, &current);
            send_event(&ctx.connection.sender, &scores);
        }
    }
}

pub fn watch_friend(state: &AppState, ctx: &SessionCtx, friend_id: &str) {
    match state.rooms.room_of_player(friend_id) {
        Some((room_id, _)) => watch_room(state, ctx, room_id),
        None => fail(ctx, GameError::NotInMatch),
    }
}

pub fn watch_list(state: &AppState, ctx: &SessionCtx) {
    send_event(
        &ctx.connection.sender,
        &ServerEvent::WatchList {
            rooms: state.rooms.watch_list(),
        },
    );
}

pub fn user_status(state: &AppState, ctx: &SessionCtx, user_id: &str) {
    send_event(
        &ctx.connection.sender,
        &ServerEvent::StatusUpdate {
            user_id: user_id.to_string(),
            status: presence::status_of(state, user_id),
        },
    );
}

// --- Match conclusion ---

/// Clear the playing flag unless the user still occupies some other room.
fn settle_playing(state: &AppState, user_id: &str) {
    if !state.rooms.is_player(user_id) && !state.rooms.user_watches_any(user_id) {
        presence::clear_playing(state, user_id);
    }
}

/// Finish a match: personalized notifications, record submission, presence
/// cleanup, room removal. The removal decides the winner of concurrent
/// finish/cancel attempts.
fn conclude_match(state: &AppState, room_id: Uuid, outcome: MatchOutcome) {
    let Some(room_arc) = state.rooms.remove(room_id) else {
        return;
    };

    let participants: Vec<String> = {
        let room = lock_room(&room_arc);
        let winner = &room.players[outcome.winner];
        let loser = &room.players[outcome.loser()];
        let summary = MatchSummary {
            winner_id: winner.user_id.clone(),
            winner_name: winner.display_name.clone(),
            loser_id: loser.user_id.clone(),
            loser_name: loser.display_name.clone(),
            winner_score: outcome.winner_score,
            loser_score: outcome.loser_score,
            finished_at: Utc::now(),
        };

        send_event(
            &winner.connection.sender,
            &ServerEvent::MatchFinished {
                point_delta: Some(outcome.winner_gain as i64),
                summary: summary.clone(),
            },
        );
        send_event(
            &loser.connection.sender,
            &ServerEvent::MatchFinished {
                point_delta: Some(-(outcome.loser_loss as i64)),
                summary: summary.clone(),
            },
        );
        for spectator in &room.spectators {
            send_event(
                &spectator.connection.sender,
                &ServerEvent::MatchFinished {
                    point_delta: None,
                    summary: summary.clone(),
                },
            );
        }

        tracing::info!(
            room_id = %room_id,
            winner = %winner.user_id,
            loser = %loser.user_id,
            score = ?[outcome.winner_score, outcome.loser_score],
            "match finished"
        );
        submit_record(state.records.clone(), summary, &outcome);

        room.players
            .iter()
            .map(|p| p.user_id.clone())
            .chain(room.spectators.iter().map(|s| s.user_id.clone()))
            .collect()
    };

    for user_id in participants {
        settle_playing(state, &user_id);
    }
}

/// Cancel a live room (explicit cancel or terminal disconnect). Returns
/// false when another caller concluded the room first. Cancellations are
/// never reported to the record service.
fn cancel_room(state: &AppState, room_id: Uuid) -> bool {
    let Some(room_arc) = state.rooms.remove(room_id) else {
        return false;
    };

    let participants: Vec<String> = {
        let mut room = lock_room(&room_arc);
        room.state = GameState::Cancelled;
        for connection in room.participant_connections() {
            send_event(&connection.sender, &ServerEvent::MatchCancelled);
        }
        room.players
            .iter()
            .map(|p| p.user_id.clone())
            .chain(room.spectators.iter().map(|s| s.user_id.clone()))
            .collect()
    };

    tracing::info!(room_id = %room_id, "match cancelled");
    for user_id in participants {
        settle_playing(state, &user_id);
    }
    true
}

/// Fire-and-forget record submission with bounded retries. Gameplay never
/// waits on the persistence collaborator.
fn submit_record(records: Arc<dyn RecordService>, summary: MatchSummary, outcome: &MatchOutcome) {
    let winner_gain = outcome.winner_gain as i64;
    let loser_loss = outcome.loser_loss as i64;
    tokio::spawn(async move {
        for attempt in 1u32..=3 {
            match records
                .record_match(
                    &summary.winner_id,
                    &summary.loser_id,
                    summary.winner_score,
                    summary.loser_score,
                )
                .await
            {
                Ok(match_id) => {
                    tracing::info!(match_id = %match_id, "match result recorded");
                    if let Err(e) = records
                        .apply_rating_delta(&summary.winner_id, winner_gain)
                        .await
                    {
                        tracing::warn!(user_id = %summary.winner_id, error = %e, "rating delta failed");
                    }
                    if let Err(e) = records
                        .apply_rating_delta(&summary.loser_id, -loser_loss)
                        .await
                    {
                        tracing::warn!(user_id = %summary.loser_id, error = %e, "rating delta failed");
                    }
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        attempt,
                        "record service rejected match result"
                    );
                    tokio::time::sleep(Duration::from_millis(250 * attempt as u64)).await;
                }
            }
        }
        tracing::error!(
            winner = %summary.winner_id,
            loser = %summary.loser_id,
            "giving up on match record after retries"
        );
    });
}
