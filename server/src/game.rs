//! Authoritative match simulation.
//!
//! [`GameState`] owns the world: the players in join order, the static level
//! geometry and the physics backend that moves everything. It is driven from
//! outside, once per request and once per fixed tick, and is never re-entered.

use crate::config::GameConfig;
use crate::error::GameError;
use crate::physics::{ArcadePhysics, BodyHandle, BodyProperties, PhysicsBackend};
use log::{debug, info, trace};
use shared::{
    Direction, GameSnapshot, JoinGameRequest, PlayerSnapshot, UserId, XDirection, YDirection,
    PLAYER_SIZE, SPAWN_X, SPAWN_Y,
};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Player {
    pub id: UserId,
    pub body: BodyHandle,
    /// Last input set by the player. Drives acceleration only; what clients
    /// see is derived from the resulting velocity.
    pub intent: Direction,
}

#[derive(Debug)]
pub struct GameState<P: PhysicsBackend = ArcadePhysics> {
    pub tick: u32,
    config: GameConfig,
    physics: P,
    players: Vec<Player>,
    platforms: Vec<BodyHandle>,
}

impl GameState<ArcadePhysics> {
    /// Creates a fresh match world with the configured level layout.
    pub fn initialize(config: GameConfig) -> Self {
        let physics = ArcadePhysics::new(config.world_width, config.world_height, config.gravity);
        Self::with_backend(physics, config)
    }
}

impl<P: PhysicsBackend> GameState<P> {
    pub fn with_backend(mut physics: P, config: GameConfig) -> Self {
        let platforms = config
            .platforms
            .iter()
            .map(|platform| {
                let body =
                    physics.create_body(platform.x, platform.y, platform.width, platform.height);
                physics.set_body_properties(body, BodyProperties::STATIC);
                body
            })
            .collect();

        Self {
            tick: 0,
            config,
            physics,
            players: Vec::new(),
            platforms,
        }
    }

    pub fn join_game(&mut self, user_id: &str, _request: &JoinGameRequest) -> Result<(), GameError> {
        if self.player(user_id).is_some() {
            debug!("Rejected join from {}: already joined", user_id);
            return Err(GameError::AlreadyJoined);
        }

        let body = self
            .physics
            .create_body(SPAWN_X, SPAWN_Y, PLAYER_SIZE, PLAYER_SIZE);
        self.physics
            .set_body_properties(body, BodyProperties::CHARACTER);

        for player in &self.players {
            self.physics.add_collider(body, player.body);
        }
        for platform in &self.platforms {
            self.physics.add_collider(body, *platform);
        }

        self.players.push(Player {
            id: user_id.to_string(),
            body,
            intent: Direction::default(),
        });

        info!(
            "Player {} joined at ({}, {}), {} players in match",
            user_id,
            SPAWN_X,
            SPAWN_Y,
            self.players.len()
        );
        Ok(())
    }

    pub fn set_direction(&mut self, user_id: &str, request: &Direction) -> Result<(), GameError> {
        match self.players.iter_mut().find(|player| player.id == user_id) {
            Some(player) => {
                player.intent = *request;
                Ok(())
            }
            None => {
                debug!("Rejected direction from {}: not joined", user_id);
                Err(GameError::NotJoined)
            }
        }
    }

    /// Advances the world by one fixed step.
    pub fn on_tick(&mut self, elapsed_seconds: f32) {
        let speed = self.config.player_speed;
        let jump_velocity = -self.config.gravity;

        for player in &self.players {
            let body = player.body;
            let blocked = self.physics.blocked(body);

            let velocity_x = match player.intent.horizontal {
                XDirection::Left if !blocked.left => -speed,
                XDirection::Right if !blocked.right => speed,
                _ => 0.0,
            };
            self.physics.set_velocity_x(body, velocity_x);

            match player.intent.vertical {
                YDirection::Up if blocked.down => {
                    self.physics.set_velocity_y(body, jump_velocity);
                }
                YDirection::Down if !blocked.down => {
                    if let Some(fast_fall) = self.config.fast_fall_speed {
                        let velocity_y = self.physics.velocity(body).y;
                        self.physics.set_velocity_y(body, velocity_y.max(fast_fall));
                    }
                }
                _ => {}
            }
        }

        if self.is_idle() {
            trace!("Tick {}: every player at rest, skipping integration", self.tick);
            return;
        }

        let delta = Duration::try_from_secs_f32(elapsed_seconds).unwrap_or(Duration::ZERO);
        self.physics.advance(delta);
    }

    /// True when nobody is moving and everybody stands on something.
    fn is_idle(&self) -> bool {
        self.players.iter().all(|player| {
            self.physics.velocity(player.body).is_zero() && self.physics.blocked(player.body).down
        })
    }

    /// Public view of the world. Identical for every viewer.
    pub fn get_user_state(&self, _user_id: &str) -> GameSnapshot {
        let players = self
            .players
            .iter()
            .map(|player| {
                let position = self.physics.position(player.body);
                let velocity = self.physics.velocity(player.body);
                PlayerSnapshot {
                    id: player.id.clone(),
                    x: position.x,
                    y: position.y,
                    horizontal_direction: XDirection::from_velocity(velocity.x),
                    vertical_direction: YDirection::from_velocity(velocity.y),
                }
            })
            .collect();

        GameSnapshot { players }
    }

    pub fn player(&self, user_id: &str) -> Option<&Player> {
        self.players.iter().find(|player| player.id == user_id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn platform_count(&self) -> usize {
        self.platforms.len()
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn physics(&self) -> &P {
        &self.physics
    }
}
