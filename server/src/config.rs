//! Match configuration.
//!
//! Everything here has a default matching the stock level, so a match can be
//! created with `GameConfig::default()`. The server binary overrides
//! individual fields from its command-line arguments.

use shared::{Platform, GAME_HEIGHT, GAME_WIDTH, GRAVITY, PLATFORMS, PLAYER_SPEED};

#[derive(Debug, Clone, PartialEq)]
pub struct GameConfig {
    pub world_width: f32,
    pub world_height: f32,
    /// Downward acceleration in units/s². Also the magnitude of a jump.
    pub gravity: f32,
    /// Horizontal walking speed in units/s.
    pub player_speed: f32,
    /// Minimum downward speed while holding down in the air. `None` leaves
    /// descent to gravity alone.
    pub fast_fall_speed: Option<f32>,
    pub platforms: Vec<Platform>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            world_width: GAME_WIDTH,
            world_height: GAME_HEIGHT,
            gravity: GRAVITY,
            player_speed: PLAYER_SPEED,
            fast_fall_speed: None,
            platforms: PLATFORMS.to_vec(),
        }
    }
}
