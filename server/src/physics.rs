//! Per-player physics step contract.
//!
//! The engine behind this trait owns collision shapes and gravity. The tick
//! loop only ever asks it to advance one player by `dt` and to step the
//! world once afterwards.

use crate::game::SimulationError;
use shared::movement::{integrate_flat_ground, BodyStep, MovementConfig};
use shared::{PlayerId, PlayerState};
use std::collections::HashSet;

pub trait PhysicsWorld: Send {
    fn add_player(&mut self, player_id: PlayerId, state: &PlayerState);

    fn remove_player(&mut self, player_id: PlayerId);

    /// Advances one player. `state.velocity` already holds the wished
    /// velocity from the movement rule.
    fn step_player(&mut self, player_id: PlayerId, state: &PlayerState, dt: f64) -> Result<BodyStep, SimulationError>;

    fn step_world(&mut self, _dt: f64) -> Result<(), SimulationError> {
        Ok(())
    }

    fn body_count(&self) -> usize;
}

/// Gravity over an infinite flat floor. Matches what the client predicts.
#[derive(Debug, Clone, Default)]
pub struct FlatGroundPhysics {
    config: MovementConfig,
    bodies: HashSet<PlayerId>,
}

impl FlatGroundPhysics {
    pub fn new(config: MovementConfig) -> Self {
        Self {
            config,
            bodies: HashSet::new(),
        }
    }
}

impl PhysicsWorld for FlatGroundPhysics {
    fn add_player(&mut self, player_id: PlayerId, _state: &PlayerState) {
        self.bodies.insert(player_id);
    }

    fn remove_player(&mut self, player_id: PlayerId) {
        self.bodies.remove(&player_id);
    }

    fn step_player(&mut self, player_id: PlayerId, state: &PlayerState, dt: f64) -> Result<BodyStep, SimulationError> {
        if !self.bodies.contains(&player_id) {
            return Err(SimulationError::UnknownBody(player_id));
        }
        Ok(integrate_flat_ground(&self.config, state.position, state.velocity, dt))
    }

    fn body_count(&self) -> usize {
        self.bodies.len()
    }
}
