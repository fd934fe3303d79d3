//! # Predicting Client Library
//!
//! Client-side half of the state-sync core. It hides network latency by
//! simulating the local player ahead of the server, reconciles that
//! prediction against authoritative samples, and smooths everything it does
//! not own with Kalman estimators.
//!
//! ## Architecture Overview
//!
//! ### Client-Side Prediction
//! Inputs are applied locally the moment they are produced, using the
//! movement rule and flat-ground integrator from `shared`, the same code the
//! server runs. Each predicted input is kept with its sequence number until
//! the server acknowledges it.
//!
//! ### Server Reconciliation
//! When a snapshot arrives, the local player's authoritative sample is
//! compared with what was predicted for the same input sequence. Small
//! errors are nudged away over a few snapshots. Large ones snap to the server
//! and replay every unacknowledged input.
//!
//! ### State Estimation
//! Remote players and entities get one estimator set each: position and
//! velocity filters per axis plus a quaternion filter. Samples correct them,
//! display frames advance them, so motion stays continuous through lost
//! snapshots for a bounded number of frames.
//!
//! ## Module Organization
//!
//! - [`estimator`]: Kalman filters and the per-record estimator set
//! - [`predictor`]: prediction history, divergence classification, replay,
//!   display state
//! - [`input`]: scripted input patterns for headless runs
//! - [`network`]: UDP client that ties the above to a live server
//!
//! ## Usage Example
//!
//! ```rust
//! use client::predictor::{ClientPredictor, PredictorConfig};
//! use shared::movement::MovementConfig;
//! use shared::snapshot::Snapshot;
//! use shared::{Input, PlayerState};
//!
//! let mut predictor = ClientPredictor::new(1, MovementConfig::default(), 60, PredictorConfig::default());
//!
//! // The first authoritative sample seeds the local state.
//! let spawn = Snapshot {
//!     tick: 1,
//!     players: vec![PlayerState::new(1, [0.0; 3])],
//!     ..Default::default()
//! };
//! predictor.on_server_snapshot(&spawn);
//!
//! // Predict ahead; the stamped input is what goes on the wire.
//! let stamped = predictor.predict(Input { forward: true, ..Default::default() });
//! assert_eq!(stamped.sequence, 1);
//!
//! let display = predictor.get_display_state(1, 1);
//! assert!(display.local.is_some());
//! ```

pub mod estimator;
pub mod input;
pub mod network;
pub mod predictor;
