//! Movement rule and flat-ground integration.
//!
//! The movement rule turns an input plus the current velocity into the
//! velocity the player wishes to have. Horizontal velocity is input-owned,
//! vertical velocity is owned by whatever integrates gravity, so the server
//! overwrites the physics result's horizontal components with the output of
//! this rule every tick. The client predictor runs the exact same code.

use crate::math::{self, Vec3};
use crate::wire::Value;
use crate::{Input, PlayerState};
use serde::{Deserialize, Serialize};

/// Tunables shared by server simulation and client prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementConfig {
    pub ground_accel: f64,
    pub air_accel: f64,
    pub max_speed: f64,
    pub friction: f64,
    pub stop_speed: f64,
    pub jump_speed: f64,
    pub gravity: f64,
    pub sprint_multiplier: f64,
    pub crouch_multiplier: f64,
    pub ground_height: f64,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            ground_accel: 10.0,
            air_accel: 1.0,
            max_speed: 4.0,
            friction: 6.0,
            stop_speed: 2.0,
            jump_speed: 5.0,
            gravity: 9.81,
            sprint_multiplier: 1.5,
            crouch_multiplier: 0.5,
            ground_height: 0.0,
        }
    }
}

/// Converts input into a new velocity. Implementations must be pure so the
/// client can replay inputs deterministically.
pub trait MovementRule: Send + Sync {
    fn apply(&self, velocity: Vec3, on_ground: bool, input: Option<&Input>, dt: f64) -> Vec3;
}

/// Result of integrating one body for one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyStep {
    pub position: Vec3,
    pub velocity: Vec3,
    pub on_ground: bool,
}

/// Unit wish direction on the XZ plane; −Z is forward at yaw 0.
pub fn wish_direction(input: &Input) -> Vec3 {
    let mut x = 0.0;
    let mut z = 0.0;
    if input.forward {
        z -= 1.0;
    }
    if input.backward {
        z += 1.0;
    }
    if input.left {
        x -= 1.0;
    }
    if input.right {
        x += 1.0;
    }

    let (sin, cos) = input.yaw.sin_cos();
    math::normalize([x * cos + z * sin, 0.0, -x * sin + z * cos])
}

/// Removes `max(speed, stop_speed) * friction * dt` from a speed, never below zero.
fn apply_friction(speed: f64, config: &MovementConfig, dt: f64) -> f64 {
    let drop = speed.max(config.stop_speed) * config.friction * dt;
    (speed - drop).max(0.0)
}

impl MovementConfig {
    pub fn max_speed_for(&self, input: &Input) -> f64 {
        let mut max_speed = self.max_speed;
        if input.sprint {
            max_speed *= self.sprint_multiplier;
        }
        if input.crouch {
            max_speed *= self.crouch_multiplier;
        }
        max_speed
    }

    /// Field list shipped inside the world definition.
    pub fn to_value(&self) -> Value {
        Value::map([
            ("groundAccel", Value::Float(self.ground_accel)),
            ("airAccel", Value::Float(self.air_accel)),
            ("maxSpeed", Value::Float(self.max_speed)),
            ("friction", Value::Float(self.friction)),
            ("stopSpeed", Value::Float(self.stop_speed)),
            ("jumpSpeed", Value::Float(self.jump_speed)),
            ("gravity", Value::Float(self.gravity)),
            ("sprintMultiplier", Value::Float(self.sprint_multiplier)),
            ("crouchMultiplier", Value::Float(self.crouch_multiplier)),
            ("groundHeight", Value::Float(self.ground_height)),
        ])
    }

    /// Reads whatever fields are present; missing ones keep their defaults.
    pub fn from_value(value: &Value) -> Self {
        let defaults = Self::default();
        let read = |name: &str, fallback: f64| value.get(name).and_then(Value::as_f64).unwrap_or(fallback);
        Self {
            ground_accel: read("groundAccel", defaults.ground_accel),
            air_accel: read("airAccel", defaults.air_accel),
            max_speed: read("maxSpeed", defaults.max_speed),
            friction: read("friction", defaults.friction),
            stop_speed: read("stopSpeed", defaults.stop_speed),
            jump_speed: read("jumpSpeed", defaults.jump_speed),
            gravity: read("gravity", defaults.gravity),
            sprint_multiplier: read("sprintMultiplier", defaults.sprint_multiplier),
            crouch_multiplier: read("crouchMultiplier", defaults.crouch_multiplier),
            ground_height: read("groundHeight", defaults.ground_height),
        }
    }

    fn ground_move(&self, horizontal: Vec3, wish: Vec3, max_speed: f64, dt: f64) -> Vec3 {
        let along = math::dot(horizontal, wish);
        let lateral = math::sub(horizontal, math::scale(wish, along));

        // Sideways drift bleeds off under friction while steering.
        let lateral_speed = math::length(lateral);
        let lateral = if lateral_speed > 0.0 {
            math::scale(lateral, apply_friction(lateral_speed, self, dt) / lateral_speed)
        } else {
            lateral
        };

        let along = if along > max_speed {
            apply_friction(along, self, dt).max(max_speed)
        } else {
            let add = max_speed - along;
            along + (self.ground_accel * max_speed * dt).min(add)
        };

        math::add(lateral, math::scale(wish, along))
    }
}

impl MovementRule for MovementConfig {
    fn apply(&self, velocity: Vec3, on_ground: bool, input: Option<&Input>, dt: f64) -> Vec3 {
        let horizontal = [velocity[0], 0.0, velocity[2]];
        let mut vertical = velocity[1];

        let moving = input.filter(|i| i.has_movement());
        let next = match (moving, on_ground) {
            (Some(input), true) => {
                let wish = wish_direction(input);
                self.ground_move(horizontal, wish, self.max_speed_for(input), dt)
            }
            (Some(input), false) => {
                let wish = wish_direction(input);
                let accel = self.air_accel * self.max_speed_for(input) * dt;
                math::add(horizontal, math::scale(wish, accel))
            }
            (None, true) => {
                let speed = math::length(horizontal);
                if speed > 0.0 {
                    math::scale(horizontal, apply_friction(speed, self, dt) / speed)
                } else {
                    horizontal
                }
            }
            (None, false) => horizontal,
        };

        if on_ground && input.map_or(false, |i| i.jump) {
            vertical = self.jump_speed;
        }

        [next[0], vertical, next[2]]
    }
}

/// Gravity plus a flat floor at `ground_height`.
pub fn integrate_flat_ground(config: &MovementConfig, position: Vec3, velocity: Vec3, dt: f64) -> BodyStep {
    let mut velocity = velocity;
    velocity[1] -= config.gravity * dt;

    let mut position = math::add(position, math::scale(velocity, dt));
    let mut on_ground = false;

    if position[1] <= config.ground_height {
        position[1] = config.ground_height;
        if velocity[1] < 0.0 {
            velocity[1] = 0.0;
        }
        on_ground = true;
    }

    BodyStep {
        position,
        velocity,
        on_ground,
    }
}

/// Copies look angles and stance from the input into the state. The body
/// rotation follows yaw only.
pub fn apply_orientation(state: &mut PlayerState, input: &Input) {
    state.look_yaw = input.yaw;
    state.look_pitch = input.pitch;
    state.rotation = math::quat_from_yaw(input.yaw);
    state.crouch = u8::from(input.crouch);
}
