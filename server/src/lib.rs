//! # Platformer Match Server
//!
//! Authoritative server for a small multiplayer side-scrolling platformer.
//! Clients only send intent (which way they want to move); the server owns
//! every position and broadcasts the resulting world to all participants.
//!
//! ## Module Organization
//!
//! ### Game Module (`game`)
//! The match simulation: joining, directional input, the fixed-step tick and
//! the public snapshot each client receives.
//!
//! ### Physics Module (`physics`)
//! Axis-aligned box integration and collision resolution behind the
//! [`physics::PhysicsBackend`] trait. Players are solid against each other
//! and against the level, neither can push the other, and nothing tunnels
//! through the thin platforms.
//!
//! ### Client Manager Module (`client_manager`)
//! Session tracking: user id assignment, reconnects, capacity, timeouts.
//!
//! ### Network Module (`network`)
//! UDP transport and the single loop that serializes every request and tick
//! into the simulation.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::GameConfig;
//! use server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     // 20Hz ticks, up to 16 clients, 5 second liveness timeout
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         Duration::from_millis(50),
//!         16,
//!         Duration::from_secs(5),
//!         GameConfig::default(),
//!     )
//!     .await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod error;
pub mod game;
pub mod network;
pub mod physics;
