//! A room: the authoritative state for one live match.
//!
//! The two player slots are immutable for the room's lifetime; only the
//! spectator list, the simulation state, scores and the lifecycle state
//! mutate after creation.

use uuid::Uuid;

use crate::game::simulation::{Difficulty, MatchSetting, Side, SimState, StepOutcome};
use crate::game::GameError;
use crate::ws::ConnectionHandle;

/// Room lifecycle. `Setting` is entered at creation; `Playing` once the
/// designated player confirms the match settings. The terminal states take
/// the room out of the live set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    Setting,
    Playing,
    Finished,
    Cancelled,
}

/// One seated player. Owned exclusively by its room once the match starts.
#[derive(Clone)]
pub struct PlayerHandle {
    pub user_id: String,
    pub display_name: String,
    /// Rating points at pairing time, used for the settings-selector
    /// designation and the loser's floor-at-zero penalty.
    pub points: u32,
    pub connection: ConnectionHandle,
    pub score: u32,
}

impl PlayerHandle {
    pub fn new(user_id: &str, display_name: &str, points: u32, connection: ConnectionHandle) -> Self {
        Self {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            points,
            connection,
            score: 0,
        }
    }
}

/// A watching connection. Users may spectate any number of rooms.
#[derive(Clone)]
pub struct Spectator {
    pub user_id: String,
    pub connection: ConnectionHandle,
}

/// Effect of one accepted paddle-move input.
pub enum MoveEffect {
    /// Sender is not a seated player or the room is not in `Playing`.
    Ignored,
    Advanced,
    Scored {
        scorer: Side,
        finished: Option<MatchOutcome>,
    },
}

/// Terminal result of a finished match.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    /// Index of the winning player slot.
    pub winner: usize,
    pub winner_score: u32,
    pub loser_score: u32,
    pub winner_gain: u32,
    /// Capped at the loser's current points so ratings floor at zero.
    pub loser_loss: u32,
}

impl MatchOutcome {
    pub fn loser(&self) -> usize {
        1 - self.winner
    }
}

pub struct Room {
    pub id: Uuid,
    /// Slot 0 is the player who was paired first (queue head or invite host)
    /// and defends the left goal; slot 1 defends the right.
    pub players: [PlayerHandle; 2],
    pub spectators: Vec<Spectator>,
    pub sim: SimState,
    pub setting: Option<MatchSetting>,
    /// Serving side for the next point, toggled after every score.
    pub serve_toward_left: bool,
    pub state: GameState,
    pub reward: u32,
}

impl Room {
    pub fn new(
        first: PlayerHandle,
        second: PlayerHandle,
        serve_toward_left: bool,
        serve_y_sign: f32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            players: [first, second],
            spectators: Vec::new(),
            sim: SimState::new(Difficulty::Normal.paddle_len(), serve_toward_left, serve_y_sign),
            setting: None,
            serve_toward_left,
            state: GameState::Setting,
            reward: 0,
        }
    }

    /// Index of the player who chooses the match settings: the lower-rated
    /// player picks, and an exact tie goes to whoever was paired first.
    pub fn selector(&self) -> usize {
        if self.players[0].points <= self.players[1].points {
            0
        } else {
            1
        }
    }

    pub fn player_index(&self, user_id: &str) -> Option<usize> {
        self.players.iter().position(|p| p.user_id == user_id)
    }

    pub fn side_of(&self, user_id: &str) -> Option<Side> {
        match self.player_index(user_id) {
            Some(0) => Some(Side::Left),
            Some(1) => Some(Side::Right),
            _ => None,
        }
    }

    pub fn player_names(&self) -> [String; 2] {
        [
            self.players[0].display_name.clone(),
            self.players[1].display_name.clone(),
        ]
    }

    pub fn scores(&self) -> [u32; 2] {
        [self.players[0].score, self.players[1].score]
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state, GameState::Setting | GameState::Playing)
    }

    /// All outbound channels that should see room events: both players plus
    /// every spectator.
    pub fn participant_connections(&self) -> Vec<ConnectionHandle> {
        self.players
            .iter()
            .map(|p| p.connection.clone())
            .chain(self.spectators.iter().map(|s| s.connection.clone()))
            .collect()
    }

    /// Confirm match settings and enter `Playing`. Only the designated
    /// selector may confirm, and only while the room is still in `Setting`.
    /// The target score is clamped rather than rejected.
    pub fn confirm_settings(
        &mut self,
        user_id: &str,
        mut setting: MatchSetting,
    ) -> Result<MatchSetting, GameError> {
        if self.state != GameState::Setting {
            return Err(GameError::WrongPhase);
        }
        if self.player_index(user_id) != Some(self.selector()) {
            return Err(GameError::NotSettingsSelector);
        }
        setting.target_score = setting.target_score.clamp(1, 100);
        self.sim.set_paddle_len(setting.difficulty.paddle_len());
        self.reward = setting.reward();
        self.setting = Some(setting);
        self.state = GameState::Playing;
        Ok(setting)
    }

    /// Apply one paddle-move input and advance the simulation a single step.
    /// Inputs from non-players and inputs outside `Playing` change nothing.
    pub fn apply_move(&mut self, user_id: &str, delta: f32, serve_y_sign: f32) -> MoveEffect {
        if self.state != GameState::Playing {
            return MoveEffect::Ignored;
        }
        let Some(side) = self.side_of(user_id) else {
            return MoveEffect::Ignored;
        };

        self.sim.move_paddle(side, delta);
        match self.sim.step() {
            StepOutcome::Advanced => MoveEffect::Advanced,
            StepOutcome::Scored(scorer) => {
                let idx = match scorer {
                    Side::Left => 0,
                    Side::Right => 1,
                };
                self.players[idx].score += 1;
                self.serve_toward_left = !self.serve_toward_left;
                self.sim.reset_ball(self.serve_toward_left, serve_y_sign);

                let target = self
                    .setting
                    .map(|s| s.target_score)
                    .unwrap_or(u32::MAX);
                let finished = if self.players[idx].score >= target {
                    self.state = GameState::Finished;
                    let loser = 1 - idx;
                    Some(MatchOutcome {
                        winner: idx,
                        winner_score: self.players[idx].score,
                        loser_score: self.players[loser].score,
                        winner_gain: self.reward,
                        loser_loss: self.reward.min(self.players[loser].points),
                    })
                } else {
                    None
                };
                MoveEffect::Scored { scorer, finished }
            }
        }
    }
}
