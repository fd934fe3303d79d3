//! Client-side prediction and reconciliation.
//!
//! The local player is simulated ahead of the server with the same movement
//! rule and flat-ground integrator the server uses. Every predicted input is
//! kept, tagged with its sequence, until the server acknowledges it. When an
//! authoritative sample arrives it is compared with what was predicted for
//! the same input sequence and the divergence is classified:
//!
//! - none: prediction stands
//! - minor: a bounded nudge toward the server
//! - major: snap to the server sample and replay every unacknowledged input
//!
//! Remote players and entities are not predicted. They get one
//! [`EntityEstimator`] each, corrected by samples and advanced per display
//! frame.

use crate::estimator::{EntityEstimator, EstimatorNoise};
use log::debug;
use serde::{Deserialize, Serialize};
use shared::math::{self, Quat, Vec3};
use shared::movement::{apply_orientation, integrate_flat_ground, MovementConfig, MovementRule};
use shared::snapshot::{RecordId, Snapshot};
use shared::time::get_timestamp;
use shared::{Input, InputState, PlayerId, PlayerState, CLIENT_INPUT_CAPACITY};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// Divergence at or below this is ignored.
    pub minor_threshold: f64,
    /// Divergence above this triggers a replay.
    pub major_threshold: f64,
    /// Fraction of a minor error removed per snapshot.
    pub nudge_rate: f64,
    /// Cap on a single nudge, in units.
    pub max_nudge: f64,
    pub noise: EstimatorNoise,
    /// Display frames a remote record keeps moving without a new sample.
    pub max_extrapolation_frames: u32,
    pub history_capacity: usize,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            minor_threshold: 0.01,
            major_threshold: 0.5,
            nudge_rate: 0.2,
            max_nudge: 0.1,
            noise: EstimatorNoise::default(),
            max_extrapolation_frames: 10,
            history_capacity: CLIENT_INPUT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    None,
    Minor,
    Major,
}

#[derive(Debug, Clone)]
struct PredictedInput {
    input: InputState,
    /// Local state right after this input was applied.
    state: PlayerState,
}

/// Smoothed view of one remote record.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDisplay {
    pub id: RecordId,
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplayState {
    pub tick: u32,
    pub local: Option<PlayerState>,
    pub remotes: Vec<RemoteDisplay>,
}

pub struct ClientPredictor {
    player_id: PlayerId,
    config: PredictorConfig,
    movement: MovementConfig,
    dt: f64,
    local_state: Option<PlayerState>,
    history: VecDeque<PredictedInput>,
    next_sequence: u32,
    estimators: HashMap<RecordId, EntityEstimator>,
    last_snapshot_tick: Option<u32>,
    last_acked: Option<u32>,
    replays: u64,
}

impl ClientPredictor {
    pub fn new(player_id: PlayerId, movement: MovementConfig, tick_rate: u32, config: PredictorConfig) -> Self {
        Self {
            player_id,
            config,
            movement,
            dt: 1.0 / f64::from(tick_rate.max(1)),
            local_state: None,
            history: VecDeque::with_capacity(config.history_capacity),
            next_sequence: 1,
            estimators: HashMap::new(),
            last_snapshot_tick: None,
            last_acked: None,
            replays: 0,
        }
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    pub fn local_state(&self) -> Option<&PlayerState> {
        self.local_state.as_ref()
    }

    /// Inputs predicted but not yet acknowledged.
    pub fn pending_inputs(&self) -> usize {
        self.history.len()
    }

    /// Number of major corrections performed so far.
    pub fn replay_count(&self) -> u64 {
        self.replays
    }

    pub fn estimator(&self, id: &RecordId) -> Option<&EntityEstimator> {
        self.estimators.get(id)
    }

    /// Replaces the movement tunables, e.g. after a world definition arrives.
    pub fn set_movement(&mut self, movement: MovementConfig) {
        self.movement = movement;
    }

    /// Starts predicting from a known state, such as a recovery bundle.
    pub fn reset_local(&mut self, state: PlayerState) {
        self.next_sequence = self.next_sequence.max(state.input_sequence.wrapping_add(1));
        self.last_acked = Some(state.input_sequence);
        self.local_state = Some(state);
        self.history.clear();
    }

    /// Applies one input locally and returns it stamped for sending. Before
    /// the first authoritative sample there is nothing to predict from, but
    /// the input still gets a sequence so the server sees it.
    pub fn predict(&mut self, input: Input) -> InputState {
        let stamped = InputState {
            sequence: self.next_sequence,
            timestamp: get_timestamp(),
            input,
        };
        self.next_sequence = self.next_sequence.wrapping_add(1);

        if let Some(state) = self.local_state.as_mut() {
            simulate(&self.movement, state, &stamped, self.dt);
            self.history.push_back(PredictedInput {
                input: stamped,
                state: state.clone(),
            });
            while self.history.len() > self.config.history_capacity {
                self.history.pop_front();
            }
        }

        stamped
    }

    /// Folds an authoritative snapshot (full or delta) into the predictor.
    /// Returns `None` when the snapshot carries no sample of the local player,
    /// or when it is not newer than the last one applied (reordered or
    /// duplicated datagrams).
    pub fn on_server_snapshot(&mut self, snapshot: &Snapshot) -> Option<Reconciliation> {
        let elapsed = match self.last_snapshot_tick {
            Some(previous) if snapshot.tick <= previous => {
                debug!("Ignoring stale snapshot for tick {} (last applied {})", snapshot.tick, previous);
                return None;
            }
            Some(previous) => f64::from(snapshot.tick - previous) * self.dt,
            None => 0.0,
        };
        self.last_snapshot_tick = Some(snapshot.tick);

        self.observe_remotes(snapshot, elapsed);

        let sample = snapshot.player(self.player_id)?.clone();
        let outcome = self.reconcile(sample);
        if outcome == Reconciliation::Major {
            self.reset_estimators(snapshot);
        }
        Some(outcome)
    }

    fn observe_remotes(&mut self, snapshot: &Snapshot, elapsed: f64) {
        if snapshot.delta {
            for removed in &snapshot.removed {
                self.estimators.remove(removed);
            }
        } else {
            let present: Vec<RecordId> = snapshot
                .players
                .iter()
                .map(|p| RecordId::Player(p.id))
                .chain(snapshot.entities.iter().map(|e| RecordId::Entity(e.id.clone())))
                .collect();
            self.estimators.retain(|id, _| present.contains(id));
        }

        // A delta leaves out records whose state did not change since the
        // previous tick.
        if snapshot.delta {
            for (id, estimator) in self.estimators.iter_mut() {
                let carried = match id {
                    RecordId::Player(pid) => snapshot.player(*pid).is_some(),
                    RecordId::Entity(eid) => snapshot.entities.iter().any(|e| e.id == *eid),
                };
                if !carried {
                    estimator.observe_unchanged(elapsed);
                }
            }
        }

        let noise = self.config.noise;
        for player in &snapshot.players {
            self.estimators
                .entry(RecordId::Player(player.id))
                .or_insert_with(|| EntityEstimator::new(noise))
                .observe(player.position, player.velocity, player.rotation, elapsed);
        }
        for entity in &snapshot.entities {
            self.estimators
                .entry(RecordId::Entity(entity.id.clone()))
                .or_insert_with(|| EntityEstimator::new(noise))
                .observe(entity.position, [0.0; 3], entity.rotation, elapsed);
        }
    }

    fn reset_estimators(&mut self, snapshot: &Snapshot) {
        for player in &snapshot.players {
            if let Some(estimator) = self.estimators.get_mut(&RecordId::Player(player.id)) {
                estimator.reset(player.position, player.velocity, player.rotation);
            }
        }
        for entity in &snapshot.entities {
            if let Some(estimator) = self.estimators.get_mut(&RecordId::Entity(entity.id.clone())) {
                estimator.reset(entity.position, [0.0; 3], entity.rotation);
            }
        }
    }

    fn reconcile(&mut self, sample: PlayerState) -> Reconciliation {
        let acked = sample.input_sequence;

        let Some(local) = self.local_state.as_ref() else {
            debug!("Adopting first authoritative state for player {}", self.player_id);
            self.reset_local(sample);
            return Reconciliation::Major;
        };

        if self.last_acked.is_some_and(|last| acked < last) {
            debug!("Ignoring sample acknowledging {} after {:?}", acked, self.last_acked);
            return Reconciliation::None;
        }
        self.last_acked = Some(acked);

        // What we predicted for the same input sequence. With nothing newer
        // pending the current local state is that prediction.
        let newest = self.history.back().map(|p| p.input.sequence);
        let predicted = match self.history.iter().find(|p| p.input.sequence == acked) {
            Some(entry) => Some(entry.state.clone()),
            None if newest.map_or(true, |newest| acked >= newest) => Some(local.clone()),
            None => None,
        };

        self.history.retain(|p| p.input.sequence > acked);

        let Some(predicted) = predicted else {
            debug!("No prediction retained for sequence {}, replaying", acked);
            self.replay_from(sample);
            return Reconciliation::Major;
        };

        let error = divergence(&sample, &predicted);
        if error <= self.config.minor_threshold {
            return Reconciliation::None;
        }

        if error > self.config.major_threshold || sample.on_ground != predicted.on_ground {
            debug!("Major divergence {:.3} at sequence {}, replaying {} inputs", error, acked, self.history.len());
            self.replay_from(sample);
            return Reconciliation::Major;
        }

        let offset = math::sub(sample.position, predicted.position);
        let mut nudge = math::scale(offset, self.config.nudge_rate);
        let length = math::length(nudge);
        if length > self.config.max_nudge {
            nudge = math::scale(nudge, self.config.max_nudge / length);
        }
        if let Some(local) = self.local_state.as_mut() {
            local.position = math::add(local.position, nudge);
        }
        debug!("Minor divergence {:.3} at sequence {}", error, acked);
        Reconciliation::Minor
    }

    /// Replaces local state with `sample` and re-applies every pending input.
    fn replay_from(&mut self, sample: PlayerState) {
        let mut state = sample;
        for entry in self.history.iter_mut() {
            simulate(&self.movement, &mut state, &entry.input, self.dt);
            entry.state = state.clone();
        }
        self.local_state = Some(state);
        self.replays += 1;
    }

    /// Advances every remote estimator by one display frame and reads the
    /// result back. A record stops moving once it has gone
    /// `max_extrapolation_frames` without a sample, and everything holds
    /// once `frames_since_snapshot` passes that limit.
    pub fn get_display_state(&mut self, tick: u32, frames_since_snapshot: u32) -> DisplayState {
        let limit = self.config.max_extrapolation_frames;
        if frames_since_snapshot <= limit {
            for estimator in self.estimators.values_mut() {
                if estimator.frames_since_sample() < limit {
                    estimator.predict(self.dt);
                }
            }
        }

        let local_id = RecordId::Player(self.player_id);
        let mut remotes: Vec<RemoteDisplay> = self
            .estimators
            .iter()
            .filter(|(id, _)| **id != local_id)
            .map(|(id, estimator)| RemoteDisplay {
                id: id.clone(),
                position: estimator.position(),
                rotation: estimator.rotation(),
                velocity: estimator.velocity(),
            })
            .collect();
        remotes.sort_by(|a, b| a.id.cmp(&b.id));

        DisplayState {
            tick,
            local: self.local_state.clone(),
            remotes,
        }
    }
}

/// One prediction step, mirroring the server's per-player step over flat
/// ground.
pub fn simulate(movement: &MovementConfig, state: &mut PlayerState, input: &InputState, dt: f64) {
    apply_orientation(state, &input.input);
    let wished = movement.apply(state.velocity, state.on_ground, Some(&input.input), dt);
    let step = integrate_flat_ground(movement, state.position, wished, dt);
    state.position = step.position;
    state.velocity = [wished[0], step.velocity[1], wished[2]];
    state.on_ground = step.on_ground;
    state.input_sequence = input.sequence;
}

fn divergence(a: &PlayerState, b: &PlayerState) -> f64 {
    math::distance(a.position, b.position).max(math::distance(a.velocity, b.velocity) * 0.1)
}
