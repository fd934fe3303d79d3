//! # Shared Simulation Library
//!
//! Types and rules that must be identical on both sides of the wire: the
//! player/entity data model, the movement rule, the flat-ground integrator
//! used for prediction, and every codec that turns them into bytes.
//!
//! ## Modules
//!
//! - [`math`]: array-based vector and quaternion helpers
//! - [`movement`]: input → wished velocity, and gravity/ground integration
//! - [`wire`]: compact self-describing binary encoding
//! - [`snapshot`]: lossy fixed-precision world snapshots, full and delta
//! - [`protocol`]: the message envelope exchanged between client and server
//! - [`time`]: wall-clock abstraction so history code is testable

use serde::{Deserialize, Serialize};

pub mod math;
pub mod movement;
pub mod protocol;
pub mod snapshot;
pub mod time;
pub mod wire;

pub use math::{Quat, Vec3, QUAT_IDENTITY};

/// Server-assigned player identifier. Monotonically increasing, never reused.
pub type PlayerId = u32;

/// Content-module entity identifier.
pub type EntityId = String;

pub const DEFAULT_TICK_RATE: u32 = 60;
pub const SERVER_INPUT_CAPACITY: usize = 128;
pub const CLIENT_INPUT_CAPACITY: usize = 60;
pub const MAX_HEALTH: f64 = 100.0;
pub const CAPSULE_RADIUS: f64 = 0.35;

/// Authoritative state for one player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub id: PlayerId,
    pub position: Vec3,
    /// Unit quaternion, `[x, y, z, w]`.
    pub rotation: Quat,
    pub velocity: Vec3,
    pub on_ground: bool,
    pub health: f64,
    /// 0 standing, 1 crouched.
    pub crouch: u8,
    pub look_pitch: f64,
    pub look_yaw: f64,
    /// Last input sequence folded into this state.
    pub input_sequence: u32,
}

impl PlayerState {
    pub fn new(id: PlayerId, position: Vec3) -> Self {
        Self {
            id,
            position,
            rotation: QUAT_IDENTITY,
            velocity: [0.0; 3],
            on_ground: true,
            health: MAX_HEALTH,
            crouch: 0,
            look_pitch: 0.0,
            look_yaw: 0.0,
            input_sequence: 0,
        }
    }

    pub fn horizontal_speed(&self) -> f64 {
        math::horizontal_length(self.velocity)
    }
}

/// One frame of player intent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Input {
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub jump: bool,
    pub sprint: bool,
    pub crouch: bool,
    pub yaw: f64,
    pub pitch: f64,
    pub shoot: bool,
    pub reload: bool,
}

impl Input {
    pub fn has_movement(&self) -> bool {
        self.forward || self.backward || self.left || self.right
    }
}

/// An input as received or produced, tagged with its sequence number and
/// arrival (server) or creation (client) timestamp in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputState {
    pub sequence: u32,
    pub timestamp: i64,
    pub input: Input,
}

/// Non-player world object owned by a content module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub id: EntityId,
    pub model: String,
    pub position: Vec3,
    pub rotation: Quat,
    pub body_type: String,
    /// Opaque per-entity data passed through unquantized.
    pub custom: wire::Value,
}

impl EntityState {
    pub fn new(id: impl Into<EntityId>, model: impl Into<String>, position: Vec3) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            position,
            rotation: QUAT_IDENTITY,
            body_type: "static".to_string(),
            custom: wire::Value::Nil,
        }
    }
}
