//! # Authoritative Simulation Server
//!
//! This library runs the authoritative side of the state-sync core. It owns
//! the canonical world, consumes player inputs, advances the simulation at a
//! fixed tick rate and streams quantized snapshots back to every client.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Every tick each connected player is advanced with the latest input it sent,
//! using the same movement rule the client predicts with. Physics is reached
//! through a narrow per-player step contract so the collision engine can be
//! replaced (even at runtime) without touching the tick pipeline.
//!
//! ### Player Management
//! Handles the complete lifecycle of a player:
//! - Handshake, world definition and module code delivery
//! - Input buffering in a bounded ring, latest-wins consumption
//! - Timeout and goodbye handling, applied at the next tick boundary
//! - Session tokens so a dropped client can resume its saved state
//!
//! ### State Broadcasting
//! Snapshots are quantized and, after the first full one, delta-encoded per
//! player. An optional relevance radius trims what each player receives.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Tick Loop
//! All world state lives in [`game::World`], owned by one task. Network tasks
//! only decode datagrams and forward them over a channel; they never touch
//! player state, so no locking is needed around the simulation.
//!
//! ### UDP-Based Communication
//! Uses UDP sockets and the compact wire codec from `shared`. Lost snapshots
//! are simply superseded by the next one.
//!
//! ## Module Organization
//!
//! - [`player_store`]: player records, input rings, transports
//! - [`game`]: the `World` and its per-tick pipeline, hot swap, handshakes
//! - [`physics`]: physics step contract and the default flat-ground body
//! - [`modules`]: content module contract
//! - [`lag_compensation`]: rewindable per-player transform history
//! - [`spatial`]: uniform grid for collision broad phase and relevance
//! - [`session`]: reconnect tokens and saved state
//! - [`event_log`]: bounded, queryable, replayable world event log
//! - [`network`]: UDP receiver/sender/timeout tasks around the tick loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::game::SimulationConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let config = SimulationConfig {
//!         tick_rate: 60,
//!         max_players: 32,
//!         ..Default::default()
//!     };
//!     let mut server = Server::new("127.0.0.1:8080", config).await?;
//!
//!     // Runs until a Shutdown message arrives on `server.control()`.
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod event_log;
pub mod game;
pub mod lag_compensation;
pub mod modules;
pub mod network;
pub mod physics;
pub mod player_store;
pub mod session;
pub mod spatial;
