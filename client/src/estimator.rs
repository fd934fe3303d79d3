//! Kalman estimators for remotely observed players and entities.
//!
//! Authoritative samples arrive at snapshot rate and can be lost. These
//! filters turn that sparse stream into something that can be queried every
//! display frame: `predict` advances the estimate, `update` corrects it when
//! a new sample lands.

use serde::{Deserialize, Serialize};
use shared::math::{self, Quat, Vec3, QUAT_IDENTITY};

/// Below this angular step the rotation delta uses the first-order form.
const SMALL_ANGLE: f64 = 1e-6;

/// Two-state (position, velocity) constant-velocity filter for one axis.
#[derive(Debug, Clone, PartialEq)]
pub struct KalmanFilter {
    pub x: f64,
    pub v: f64,
    pub p: [[f64; 2]; 2],
    /// Process noise.
    pub q: f64,
    /// Measurement noise.
    pub r: f64,
}

impl KalmanFilter {
    pub fn new(q: f64, r: f64) -> Self {
        Self {
            x: 0.0,
            v: 0.0,
            p: [[1.0, 0.0], [0.0, 1.0]],
            q,
            r,
        }
    }

    pub fn predict(&mut self, dt: f64) {
        self.x += self.v * dt;

        let [[p00, p01], [p10, p11]] = self.p;
        let dt2 = dt * dt;
        let dt3 = dt2 * dt;
        let dt4 = dt3 * dt;

        // F P F^T + Q G, with G the discretized white-acceleration model.
        self.p = [
            [
                p00 + dt * (p01 + p10) + dt2 * p11 + self.q * dt4 / 4.0,
                p01 + dt * p11 + self.q * dt3 / 2.0,
            ],
            [
                p10 + dt * p11 + self.q * dt3 / 2.0,
                p11 + self.q * dt2,
            ],
        ];
    }

    /// Corrects with a position measurement. Velocity moves through the
    /// covariance cross-term only.
    pub fn update(&mut self, measurement: f64) {
        let [[p00, p01], [p10, p11]] = self.p;
        let innovation = measurement - self.x;
        let s = p00 + self.r;
        if s <= 0.0 {
            return;
        }
        let k0 = p00 / s;
        let k1 = p10 / s;

        self.x += k0 * innovation;
        self.v += k1 * innovation;
        self.p = [
            [(1.0 - k0) * p00, (1.0 - k0) * p01],
            [p10 - k1 * p00, p11 - k1 * p01],
        ];
    }

    pub fn reset(&mut self, position: f64, velocity: f64) {
        self.x = position;
        self.v = velocity;
        self.p = [[1.0, 0.0], [0.0, 1.0]];
    }
}

/// Quaternion estimate with constant angular velocity.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationFilter {
    pub q: Quat,
    /// Radians per second about each axis.
    pub angular_velocity: Vec3,
    pub process_noise: f64,
    pub measurement_noise: f64,
}

impl RotationFilter {
    pub fn new(process_noise: f64, measurement_noise: f64) -> Self {
        Self {
            q: QUAT_IDENTITY,
            angular_velocity: [0.0; 3],
            process_noise,
            measurement_noise,
        }
    }

    pub fn predict(&mut self, dt: f64) {
        let delta = rotation_delta(self.angular_velocity, dt);
        self.q = math::quat_normalize(math::quat_mul(delta, self.q));
    }

    pub fn update(&mut self, measured: Quat) {
        let measured = if math::quat_dot(self.q, measured) < 0.0 {
            [-measured[0], -measured[1], -measured[2], -measured[3]]
        } else {
            measured
        };

        let total = self.process_noise + self.measurement_noise;
        let weight = if total > 0.0 { self.process_noise / total } else { 1.0 };
        self.q = math::quat_normalize(math::slerp(self.q, measured, weight));
    }

    pub fn reset(&mut self, rotation: Quat, angular_velocity: Vec3) {
        self.q = math::quat_normalize(rotation);
        self.angular_velocity = angular_velocity;
    }
}

/// Rotation accumulated over `dt` at constant angular velocity `omega`.
fn rotation_delta(omega: Vec3, dt: f64) -> Quat {
    let angle = math::length(omega) * dt;
    if angle < SMALL_ANGLE {
        let half = dt * 0.5;
        return math::quat_normalize([omega[0] * half, omega[1] * half, omega[2] * half, 1.0]);
    }

    let axis = math::normalize(omega);
    let (sin, cos) = (angle * 0.5).sin_cos();
    [axis[0] * sin, axis[1] * sin, axis[2] * sin, cos]
}

/// Angular velocity that carries `from` onto `to` in `elapsed` seconds.
pub fn angular_velocity_between(from: Quat, to: Quat, elapsed: f64) -> Vec3 {
    if elapsed <= 0.0 {
        return [0.0; 3];
    }

    let mut delta = math::quat_mul(to, math::quat_conjugate(from));
    if delta[3] < 0.0 {
        delta = [-delta[0], -delta[1], -delta[2], -delta[3]];
    }

    let sin_half = (delta[0] * delta[0] + delta[1] * delta[1] + delta[2] * delta[2]).sqrt();
    if sin_half < SMALL_ANGLE {
        return [0.0; 3];
    }

    let angle = 2.0 * sin_half.atan2(delta[3]);
    let rate = angle / (sin_half * elapsed);
    [delta[0] * rate, delta[1] * rate, delta[2] * rate]
}

/// Noise parameters for one estimator set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimatorNoise {
    pub position_q: f64,
    pub position_r: f64,
    pub rotation_q: f64,
    pub rotation_r: f64,
}

impl Default for EstimatorNoise {
    fn default() -> Self {
        Self {
            position_q: 1.0,
            position_r: 0.01,
            rotation_q: 0.5,
            rotation_r: 0.1,
        }
    }
}

/// Six axis filters (position and velocity) plus a rotation filter for one
/// observed record.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Sample {
    position: Vec3,
    velocity: Vec3,
    rotation: Quat,
}

#[derive(Debug, Clone)]
pub struct EntityEstimator {
    position: [KalmanFilter; 3],
    velocity: [KalmanFilter; 3],
    rotation: RotationFilter,
    last_sample: Option<Sample>,
    frames_since_sample: u32,
}

impl EntityEstimator {
    pub fn new(noise: EstimatorNoise) -> Self {
        let axis = KalmanFilter::new(noise.position_q, noise.position_r);
        Self {
            position: [axis.clone(), axis.clone(), axis.clone()],
            velocity: [axis.clone(), axis.clone(), axis],
            rotation: RotationFilter::new(noise.rotation_q, noise.rotation_r),
            last_sample: None,
            frames_since_sample: 0,
        }
    }

    /// Feeds an authoritative sample taken `elapsed` seconds after the
    /// previous one. The first sample initializes instead of correcting.
    pub fn observe(&mut self, position: Vec3, velocity: Vec3, rotation: Quat, elapsed: f64) {
        let Some(previous) = self.last_sample else {
            self.reset(position, velocity, rotation);
            return;
        };

        for axis in 0..3 {
            self.position[axis].update(position[axis]);
            self.velocity[axis].update(velocity[axis]);
        }
        self.rotation.update(rotation);
        self.rotation.angular_velocity = angular_velocity_between(previous.rotation, rotation, elapsed);
        self.last_sample = Some(Sample {
            position,
            velocity,
            rotation,
        });
        self.frames_since_sample = 0;
    }

    /// Confirms that the record still holds its last sampled state, as a
    /// delta that leaves it out does. A no-op before the first sample.
    pub fn observe_unchanged(&mut self, elapsed: f64) {
        if let Some(sample) = self.last_sample {
            self.observe(sample.position, sample.velocity, sample.rotation, elapsed);
        }
    }

    pub fn predict(&mut self, dt: f64) {
        for axis in 0..3 {
            self.position[axis].predict(dt);
            self.velocity[axis].predict(dt);
        }
        self.rotation.predict(dt);
        self.frames_since_sample = self.frames_since_sample.saturating_add(1);
    }

    /// Display frames advanced since the last sample.
    pub fn frames_since_sample(&self) -> u32 {
        self.frames_since_sample
    }

    /// Snaps every filter to the given state and clears the angular velocity.
    pub fn reset(&mut self, position: Vec3, velocity: Vec3, rotation: Quat) {
        for axis in 0..3 {
            self.position[axis].reset(position[axis], velocity[axis]);
            self.velocity[axis].reset(velocity[axis], 0.0);
        }
        self.rotation.reset(rotation, [0.0; 3]);
        self.last_sample = Some(Sample {
            position,
            velocity,
            rotation,
        });
        self.frames_since_sample = 0;
    }

    pub fn position(&self) -> Vec3 {
        [self.position[0].x, self.position[1].x, self.position[2].x]
    }

    pub fn velocity(&self) -> Vec3 {
        [self.velocity[0].x, self.velocity[1].x, self.velocity[2].x]
    }

    pub fn rotation(&self) -> Quat {
        self.rotation.q
    }

    pub fn angular_velocity(&self) -> Vec3 {
        self.rotation.angular_velocity
    }
}
