//! Authoritative player records and their input buffers
//!
//! This module owns everything the server knows about a connected player:
//! - The authoritative `PlayerState`, mutated only by the tick loop
//! - A bounded ring of received inputs (oldest dropped on overflow)
//! - The outbound transport used for `send_to` and `broadcast`
//! - Per-player delta-snapshot continuity and liveness tracking
//!
//! Player ids are handed out monotonically starting at 1 and never reused,
//! so iteration order over the store is also join order.

use log::{info, warn};
use shared::snapshot::DeltaKeys;
use shared::{InputState, PlayerId, PlayerState, SERVER_INPUT_CAPACITY};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("transport i/o failure: {0}")]
    Io(String),
}

/// Outbound byte channel to one client.
pub trait Transport: Send {
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError>;
}

/// In-process transport that records every frame it is given. Clones share
/// the same frame list.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything sent so far.
    pub fn take_frames(&self) -> Vec<Vec<u8>> {
        match self.frames.lock() {
            Ok(mut frames) => std::mem::take(&mut *frames),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl Transport for MemoryTransport {
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.frames
            .lock()
            .map_err(|_| TransportError::Closed)?
            .push(bytes.to_vec());
        Ok(())
    }
}

/// Fixed-capacity FIFO of inputs. Pushing into a full ring drops the oldest.
#[derive(Debug, Clone)]
pub struct InputRing {
    inputs: VecDeque<InputState>,
    capacity: usize,
}

impl InputRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inputs: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, input: InputState) {
        if self.inputs.len() == self.capacity {
            self.inputs.pop_front();
        }
        self.inputs.push_back(input);
    }

    /// Most recently arrived input; everything older is discarded.
    pub fn take_latest(&mut self) -> Option<InputState> {
        let latest = self.inputs.pop_back();
        self.inputs.clear();
        latest
    }

    pub fn iter(&self) -> impl Iterator<Item = &InputState> {
        self.inputs.iter()
    }

    pub fn clear(&mut self) {
        self.inputs.clear();
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A connected player.
pub struct Player {
    pub state: PlayerState,
    pub inputs: InputRing,
    transport: Box<dyn Transport>,
    /// Key map from the last snapshot this player received.
    pub snapshot_keys: DeltaKeys,
    /// Set on join; the next snapshot to this player is sent in full.
    pub needs_full_snapshot: bool,
    pub last_seen: Instant,
}

impl Player {
    pub fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.transport.send(bytes)
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

pub struct PlayerStore {
    players: BTreeMap<PlayerId, Player>,
    next_player_id: PlayerId,
    max_players: usize,
    input_capacity: usize,
    /// Bumped on every add/remove.
    generation: u64,
    connected_cache: Option<(u64, Arc<[PlayerId]>)>,
}

impl PlayerStore {
    pub fn new(max_players: usize) -> Self {
        Self::with_input_capacity(max_players, SERVER_INPUT_CAPACITY)
    }

    pub fn with_input_capacity(max_players: usize, input_capacity: usize) -> Self {
        Self {
            players: BTreeMap::new(),
            next_player_id: 1,
            max_players,
            input_capacity,
            generation: 0,
            connected_cache: None,
        }
    }

    /// Registers a player and returns its id, or `None` when the store is at
    /// capacity. The id field of `initial` is overwritten.
    pub fn add_player(&mut self, transport: Box<dyn Transport>, initial: PlayerState) -> Option<PlayerId> {
        if self.players.len() >= self.max_players {
            return None;
        }

        let player_id = self.next_player_id;
        self.next_player_id += 1;

        let mut state = initial;
        state.id = player_id;
        let player = Player {
            state,
            inputs: InputRing::new(self.input_capacity),
            transport,
            snapshot_keys: DeltaKeys::default(),
            needs_full_snapshot: true,
            last_seen: Instant::now(),
        };

        info!("Player {} added", player_id);
        self.players.insert(player_id, player);
        self.generation += 1;
        Some(player_id)
    }

    pub fn remove_player(&mut self, player_id: PlayerId) -> Option<Player> {
        let removed = self.players.remove(&player_id);
        if removed.is_some() {
            info!("Player {} removed", player_id);
            self.generation += 1;
        }
        removed
    }

    /// Buffers an input. The player's `input_sequence` tracks the highest
    /// sequence received so far.
    pub fn add_input(&mut self, player_id: PlayerId, input: InputState) -> bool {
        match self.players.get_mut(&player_id) {
            Some(player) => {
                player.last_seen = Instant::now();
                player.state.input_sequence = player.state.input_sequence.max(input.sequence);
                player.inputs.push(input);
                true
            }
            None => false,
        }
    }

    pub fn get_inputs(&self, player_id: PlayerId) -> Vec<InputState> {
        self.players
            .get(&player_id)
            .map(|p| p.inputs.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn clear_inputs(&mut self, player_id: PlayerId) {
        if let Some(player) = self.players.get_mut(&player_id) {
            player.inputs.clear();
        }
    }

    pub fn take_latest_input(&mut self, player_id: PlayerId) -> Option<InputState> {
        self.players.get_mut(&player_id)?.inputs.take_latest()
    }

    /// Ids of every connected player in join order. Rebuilt only after the
    /// roster changes.
    pub fn connected_players(&mut self) -> Arc<[PlayerId]> {
        if let Some((generation, ids)) = &self.connected_cache {
            if *generation == self.generation {
                return Arc::clone(ids);
            }
        }
        let ids: Arc<[PlayerId]> = self.players.keys().copied().collect();
        self.connected_cache = Some((self.generation, Arc::clone(&ids)));
        ids
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get(&self, player_id: PlayerId) -> Option<&Player> {
        self.players.get(&player_id)
    }

    pub fn get_mut(&mut self, player_id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(&player_id)
    }

    pub fn state(&self, player_id: PlayerId) -> Option<&PlayerState> {
        self.players.get(&player_id).map(|p| &p.state)
    }

    pub fn states(&self) -> impl Iterator<Item = &PlayerState> {
        self.players.values().map(|p| &p.state)
    }

    pub fn touch(&mut self, player_id: PlayerId) {
        if let Some(player) = self.players.get_mut(&player_id) {
            player.last_seen = Instant::now();
        }
    }

    /// Players silent for longer than `timeout`. Removal is left to the
    /// caller so it can happen at a tick boundary.
    pub fn timed_out(&self, timeout: Duration) -> Vec<PlayerId> {
        self.players
            .iter()
            .filter(|(_, player)| player.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn send_to(&self, player_id: PlayerId, bytes: &[u8]) -> bool {
        match self.players.get(&player_id) {
            Some(player) => match player.send(bytes) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to send to player {}: {}", player_id, e);
                    false
                }
            },
            None => false,
        }
    }

    /// Sends to every player except `exclude`. Returns how many sends succeeded.
    pub fn broadcast(&self, bytes: &[u8], exclude: Option<PlayerId>) -> usize {
        self.players
            .keys()
            .filter(|id| Some(**id) != exclude)
            .filter(|id| self.send_to(**id, bytes))
            .count()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }
}
