//! Authoritative match simulation.
//!
//! The step function is pure: no I/O, no locks, no clock. It advances once
//! per accepted paddle-move input, not on a fixed server tick. Randomness
//! (the vertical serve direction) is injected by the caller so every path
//! here is unit-testable.

use serde::{Deserialize, Serialize};

pub const BOARD_WIDTH: f32 = 1000.0;
pub const BOARD_HEIGHT: f32 = 600.0;
/// Goal lines sit inset from the board edges; a ball crossing one while the
/// defending paddle does not cover it ends the rally.
pub const LEFT_GOAL_X: f32 = 40.0;
pub const RIGHT_GOAL_X: f32 = BOARD_WIDTH - 40.0;
pub const BALL_RADIUS: f32 = 10.0;
pub const BALL_SPEED: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Difficulty {
    Easy,
    Normal,
    Hard,
}

impl Difficulty {
    /// Paddle length: longer bars make the game easier.
    pub fn paddle_len(self) -> f32 {
        match self {
            Self::Easy => 240.0,
            Self::Normal => 180.0,
            Self::Hard => 120.0,
        }
    }
}

/// Per-room match settings, chosen once by the designated player and
/// immutable afterward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSetting {
    pub difficulty: Difficulty,
    pub target_score: u32,
}

impl MatchSetting {
    /// Reward points at stake: hard matches double the base, easy halves it.
    pub fn reward(&self) -> u32 {
        let base = 10 * self.target_score;
        match self.difficulty {
            Difficulty::Hard => base * 2,
            Difficulty::Normal => base,
            Difficulty::Easy => base / 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ball {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BallVelocity {
    pub x_dir: f32,
    pub y_dir: f32,
    pub speed: f32,
}

/// The two player sides. Left defends the left goal line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Result of one simulation step. `Scored` names the side that won the point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Advanced,
    Scored(Side),
}

/// Paddle and ball state for one room. Paddle positions are the top edge of
/// the bar, clamped to `[0, BOARD_HEIGHT - paddle_len]`.
#[derive(Debug, Clone)]
pub struct SimState {
    pub ball: Ball,
    pub vel: BallVelocity,
    pub left_paddle: f32,
    pub right_paddle: f32,
    pub paddle_len: f32,
}

impl SimState {
    pub fn new(paddle_len: f32, serve_toward_left: bool, serve_y_sign: f32) -> Self {
        let centered = (BOARD_HEIGHT - paddle_len) / 2.0;
        let mut sim = Self {
            ball: Ball {
                x: BOARD_WIDTH / 2.0,
                y: BOARD_HEIGHT / 2.0,
                radius: BALL_RADIUS,
            },
            vel: BallVelocity {
                x_dir: 0.0,
                y_dir: 0.0,
                speed: BALL_SPEED,
            },
            left_paddle: centered,
            right_paddle: centered,
            paddle_len,
        };
        sim.reset_ball(serve_toward_left, serve_y_sign);
        sim
    }

    pub fn max_paddle_y(paddle_len: f32) -> f32 {
        BOARD_HEIGHT - paddle_len
    }

    /// Swap in a new paddle length and re-clamp both paddles so neither
    /// extends past the board edge.
    pub fn set_paddle_len(&mut self, paddle_len: f32) {
        self.paddle_len = paddle_len;
        let max = Self::max_paddle_y(paddle_len);
        self.left_paddle = self.left_paddle.clamp(0.0, max);
        self.right_paddle = self.right_paddle.clamp(0.0, max);
    }

    pub fn paddle_y(&self, side: Side) -> f32 {
        match side {
            Side::Left => self.left_paddle,
            Side::Right => self.right_paddle,
        }
    }

    /// Apply a move input: shift the paddle and clamp it to the board.
    pub fn move_paddle(&mut self, side: Side, delta: f32) {
        let max = Self::max_paddle_y(self.paddle_len);
        let paddle = match side {
            Side::Left => &mut self.left_paddle,
            Side::Right => &mut self.right_paddle,
        };
        *paddle = (*paddle + delta).clamp(0.0, max);
    }

    /// Recenter the ball and serve it toward the given side.
    pub fn reset_ball(&mut self, serve_toward_left: bool, serve_y_sign: f32) {
        self.ball.x = BOARD_WIDTH / 2.0;
        self.ball.y = BOARD_HEIGHT / 2.0;
        self.vel.x_dir = if serve_toward_left { -1.0 } else { 1.0 };
        self.vel.y_dir = serve_y_sign.signum();
        self.vel.speed = BALL_SPEED;
    }

    /// One authoritative step: wall bounce, goal-line test, advance.
    ///
    /// A ball crossing a goal line while the defending paddle covers its
    /// vertical position bounces back, deflected proportionally to how far
    /// from the paddle center it hit. Otherwise the attacker scores and the
    /// ball does not advance (the caller resets it).
    pub fn step(&mut self) -> StepOutcome {
        // Wall bounce only when heading further out of bounds.
        if (self.ball.y - self.ball.radius <= 0.0 && self.vel.y_dir < 0.0)
            || (self.ball.y + self.ball.radius >= BOARD_HEIGHT && self.vel.y_dir > 0.0)
        {
            self.vel.y_dir = -self.vel.y_dir;
        }

        if self.ball.x <= LEFT_GOAL_X && self.vel.x_dir < 0.0 {
            if Self::covers(self.left_paddle, self.paddle_len, self.ball.y) {
                self.vel.x_dir = -self.vel.x_dir;
                self.vel.y_dir = Self::deflect(self.left_paddle, self.paddle_len, self.ball.y);
            } else {
                return StepOutcome::Scored(Side::Right);
            }
        } else if self.ball.x >= RIGHT_GOAL_X && self.vel.x_dir > 0.0 {
            if Self::covers(self.right_paddle, self.paddle_len, self.ball.y) {
                self.vel.x_dir = -self.vel.x_dir;
                self.vel.y_dir = Self::deflect(self.right_paddle, self.paddle_len, self.ball.y);
            } else {
                return StepOutcome::Scored(Side::Left);
            }
        }

        self.ball.x += self.vel.x_dir * self.vel.speed;
        self.ball.y += self.vel.y_dir * self.vel.speed;
        StepOutcome::Advanced
    }

    fn covers(paddle_y: f32, paddle_len: f32, ball_y: f32) -> bool {
        ball_y >= paddle_y && ball_y <= paddle_y + paddle_len
    }

    /// Linear deflection: hitting the paddle center returns the ball flat,
    /// hitting an edge returns it at the steepest angle.
    fn deflect(paddle_y: f32, paddle_len: f32, ball_y: f32) -> f32 {
        let offset = ball_y - (paddle_y + paddle_len / 2.0);
        (offset / (paddle_len / 2.0)).clamp(-1.0, 1.0)
    }
}
