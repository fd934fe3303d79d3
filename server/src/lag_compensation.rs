//! Time-windowed history of authoritative player transforms.
//!
//! Each player gets a bounded ring of samples recorded once per tick.
//! Samples older than the window are evicted lazily when a new sample is
//! written, so a quiet player can hold entries older than the window until
//! its next write.

use serde::{Deserialize, Serialize};
use shared::math::{self, Quat, Vec3};
use shared::time::Clock;
use shared::PlayerId;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LagCompensationConfig {
    pub window_ms: i64,
    pub capacity: usize,
    /// Targets moving faster than this produce low-confidence results.
    pub fast_target_speed: f64,
}

impl Default for LagCompensationConfig {
    fn default() -> Self {
        Self {
            window_ms: 500,
            capacity: 128,
            fast_target_speed: 8.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryEntry {
    pub tick: u32,
    pub timestamp: i64,
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShotValidation {
    /// No usable history for the shooter or the target.
    Unavailable,
    Compensated {
        target: HistoryEntry,
        confidence: Confidence,
    },
}

pub struct LagCompensator {
    config: LagCompensationConfig,
    clock: Arc<dyn Clock>,
    histories: HashMap<PlayerId, VecDeque<HistoryEntry>>,
}

impl LagCompensator {
    pub fn new(config: LagCompensationConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            histories: HashMap::new(),
        }
    }

    pub fn config(&self) -> &LagCompensationConfig {
        &self.config
    }

    pub fn record(&mut self, player_id: PlayerId, position: Vec3, rotation: Quat, velocity: Vec3, tick: u32) {
        let now = self.clock.now_millis();
        let capacity = self.config.capacity.max(1);
        let cutoff = now - self.config.window_ms;

        let history = self
            .histories
            .entry(player_id)
            .or_insert_with(|| VecDeque::with_capacity(capacity));

        while history.front().map_or(false, |e| e.timestamp < cutoff) {
            history.pop_front();
        }
        if history.len() == capacity {
            history.pop_front();
        }
        history.push_back(HistoryEntry {
            tick,
            timestamp: now,
            position,
            rotation,
            velocity,
        });
    }

    /// Newest sample at or before `now - millis_ago`.
    pub fn state_at_time(&self, player_id: PlayerId, millis_ago: i64) -> Option<HistoryEntry> {
        let target = self.clock.now_millis() - millis_ago.max(0);
        let history = self.histories.get(&player_id)?;

        let mut found = None;
        for entry in history {
            if entry.timestamp > target {
                break;
            }
            found = Some(*entry);
        }
        found
    }

    pub fn latest(&self, player_id: PlayerId) -> Option<HistoryEntry> {
        self.histories.get(&player_id)?.back().copied()
    }

    /// Where the target was `latency_ms` ago from the shooter's point of view.
    /// Latency beyond the window is clamped to it. Fast targets are flagged
    /// rather than rejected.
    pub fn validate_shot(&self, shooter_id: PlayerId, target_id: PlayerId, latency_ms: i64) -> ShotValidation {
        if !self.histories.contains_key(&shooter_id) {
            return ShotValidation::Unavailable;
        }

        let rewind = latency_ms.clamp(0, self.config.window_ms);
        match self.state_at_time(target_id, rewind) {
            Some(target) => {
                let speed = math::length(target.velocity);
                let confidence = if speed > self.config.fast_target_speed {
                    Confidence::Low
                } else {
                    Confidence::High
                };
                ShotValidation::Compensated { target, confidence }
            }
            None => ShotValidation::Unavailable,
        }
    }

    /// True when `new_position` is farther than `threshold` from the last
    /// recorded sample. No history means no teleport.
    pub fn detect_teleport(&self, player_id: PlayerId, new_position: Vec3, threshold: f64) -> bool {
        self.latest(player_id)
            .map_or(false, |entry| math::distance(entry.position, new_position) > threshold)
    }

    pub fn remove_player(&mut self, player_id: PlayerId) {
        self.histories.remove(&player_id);
    }

    pub fn history_len(&self, player_id: PlayerId) -> usize {
        self.histories.get(&player_id).map_or(0, VecDeque::len)
    }
}
