use serde::{Deserialize, Serialize};

pub const GAME_WIDTH: f32 = 800.0;
pub const GAME_HEIGHT: f32 = 600.0;
pub const GRAVITY: f32 = 200.0;
pub const PLAYER_SPEED: f32 = 200.0;
pub const PLAYER_SIZE: f32 = 32.0;
pub const SPAWN_X: f32 = 0.0;
pub const SPAWN_Y: f32 = 0.0;
pub const PROTOCOL_VERSION: u32 = 1;

/// Identity assigned by the session layer. Never generated by the simulation.
/// Public: every client sees every id in each snapshot.
pub type UserId = String;

/// Secret handed to a single client on connect. Presenting it again is the
/// only way to resume that session.
pub type SessionToken = String;

/// Static axis-aligned box, top-left origin.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Platform {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Platform {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Default level layout shared by the server simulation and any renderer.
pub const PLATFORMS: [Platform; 5] = [
    Platform::new(40.0, 530.0, 288.0, 16.0),
    Platform::new(340.0, 440.0, 192.0, 16.0),
    Platform::new(140.0, 350.0, 192.0, 16.0),
    Platform::new(360.0, 270.0, 288.0, 16.0),
    Platform::new(704.0, 200.0, 96.0, 16.0),
];

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum XDirection {
    #[default]
    None,
    Left,
    Right,
}

impl XDirection {
    /// Reports the direction of actual motion from a horizontal velocity.
    pub fn from_velocity(velocity: f32) -> Self {
        if velocity < 0.0 {
            XDirection::Left
        } else if velocity > 0.0 {
            XDirection::Right
        } else {
            XDirection::None
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum YDirection {
    #[default]
    None,
    Up,
    Down,
}

impl YDirection {
    /// Reports the direction of actual motion from a vertical velocity.
    /// Screen coordinates: negative is up.
    pub fn from_velocity(velocity: f32) -> Self {
        if velocity < 0.0 {
            YDirection::Up
        } else if velocity > 0.0 {
            YDirection::Down
        } else {
            YDirection::None
        }
    }
}

/// Directional input pair. Sent by clients on every input change and stored
/// by the server as the player's intent.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct Direction {
    pub horizontal: XDirection,
    pub vertical: YDirection,
}

impl Direction {
    pub fn new(horizontal: XDirection, vertical: YDirection) -> Self {
        Self {
            horizontal,
            vertical,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct JoinGameRequest;

/// Public view of one player as delivered to clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    pub id: UserId,
    pub x: f32,
    pub y: f32,
    pub horizontal_direction: XDirection,
    pub vertical_direction: YDirection,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct GameSnapshot {
    pub players: Vec<PlayerSnapshot>,
}

impl GameSnapshot {
    pub fn player(&self, id: &str) -> Option<&PlayerSnapshot> {
        self.players.iter().find(|player| player.id == id)
    }

    /// Blends positions between two consecutive snapshots for smooth display.
    ///
    /// The roster and the reported directions always come from `to`; players
    /// that only exist in `to` are returned unchanged.
    pub fn interpolate(&self, to: &GameSnapshot, pct_elapsed: f32) -> GameSnapshot {
        let pct = pct_elapsed.clamp(0.0, 1.0);
        let players = to
            .players
            .iter()
            .map(|to_player| match self.player(&to_player.id) {
                Some(from_player) => PlayerSnapshot {
                    id: to_player.id.clone(),
                    x: from_player.x + (to_player.x - from_player.x) * pct,
                    y: from_player.y + (to_player.y - from_player.y) * pct,
                    horizontal_direction: to_player.horizontal_direction,
                    vertical_direction: to_player.vertical_direction,
                },
                None => to_player.clone(),
            })
            .collect();

        GameSnapshot { players }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    Connect {
        client_version: u32,
        /// Secret from an earlier `Connected`, used to resume that session.
        token: Option<SessionToken>,
    },
    JoinGame(JoinGameRequest),
    SetDirection(Direction),
    Heartbeat,
    Disconnect,

    Connected {
        user_id: UserId,
        token: SessionToken,
    },
    Response {
        result: Result<(), String>,
    },
    GameState {
        tick: u32,
        timestamp: u64,
        state: GameSnapshot,
    },
    Disconnected {
        reason: String,
    },
}
