//! Authoritative world state and the fixed-tick simulation pipeline.
//!
//! One call to [`World::tick`] runs, in order:
//! 1. queued subsystem swaps and queued player removals
//! 2. per-player step in join order: latest input → movement rule → physics,
//!    with the horizontal velocity taken from the movement rule
//! 3. one interpenetration pass over player pairs
//! 4. one physics world step
//! 5. content modules
//! 6. lag-compensation sampling and per-player snapshot broadcast
//!
//! A failing player step or module is logged and skipped; it never stops the
//! rest of the tick.

use crate::event_log::{Event, EventFilter, EventKind, EventLog, EventMeta};
use crate::lag_compensation::{LagCompensationConfig, LagCompensator, ShotValidation};
use crate::modules::{ContentModule, EntityTable, ModuleContext};
use crate::physics::{FlatGroundPhysics, PhysicsWorld};
use crate::player_store::{PlayerStore, Transport};
use crate::session::{SessionConfig, SessionError, SessionManager};
use crate::spatial::{horizontal_distance_sq, SpatialGrid};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use shared::movement::{apply_orientation, MovementConfig, MovementRule};
use shared::protocol::{encode_message, encode_snapshot_message, DisconnectCode, Message, PROTOCOL_VERSION};
use shared::snapshot::{self, Snapshot};
use shared::time::Clock;
use shared::wire::Value;
use shared::{
    EntityId, EntityState, InputState, PlayerId, PlayerState, Vec3, CAPSULE_RADIUS, DEFAULT_TICK_RATE,
    SERVER_INPUT_CAPACITY,
};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub tick_rate: u32,
    pub max_players: usize,
    pub capsule_radius: f64,
    pub input_capacity: usize,
    pub delta_snapshots: bool,
    /// Every Nth tick goes out in full regardless of deltas. 0 disables.
    pub full_snapshot_interval: u32,
    /// Horizontal radius outside which players and entities are left out of
    /// a player's snapshot. `None` sends everything to everyone.
    pub relevance_radius: Option<f64>,
    pub grid_cell_size: f64,
    pub spawn_point: Vec3,
    pub teleport_threshold: f64,
    pub event_capacity: usize,
    pub movement: MovementConfig,
    pub lag: LagCompensationConfig,
    pub session: SessionConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            max_players: 32,
            capsule_radius: CAPSULE_RADIUS,
            input_capacity: SERVER_INPUT_CAPACITY,
            delta_snapshots: true,
            full_snapshot_interval: 60,
            relevance_radius: None,
            grid_cell_size: 8.0,
            spawn_point: [0.0, 0.0, 0.0],
            teleport_threshold: 5.0,
            event_capacity: crate::event_log::DEFAULT_EVENT_CAPACITY,
            movement: MovementConfig::default(),
            lag: LagCompensationConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn dt(&self) -> f64 {
        1.0 / self.tick_rate.max(1) as f64
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error("no such player {0}")]
    UnknownPlayer(PlayerId),
    #[error("no physics body for player {0}")]
    UnknownBody(PlayerId),
    #[error("physics step failed: {0}")]
    Physics(String),
    #[error("module `{module}` failed: {reason}")]
    Module { module: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum JoinError {
    #[error("server full")]
    ServerFull,
    #[error("client protocol {client} does not match server protocol {server}")]
    VersionMismatch { client: u32, server: u32 },
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl JoinError {
    pub fn disconnect_code(&self) -> DisconnectCode {
        match self {
            JoinError::ServerFull => DisconnectCode::ServerFull,
            JoinError::VersionMismatch { .. } => DisconnectCode::VersionMismatch,
            JoinError::Session(e) => e.disconnect_code(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    /// Client said goodbye; nothing is kept for reconnect.
    Disconnected,
    TimedOut,
    Malformed,
    /// A reconnect with the same token took over.
    Replaced,
}

impl LeaveReason {
    fn as_str(self) -> &'static str {
        match self {
            LeaveReason::Disconnected => "disconnected",
            LeaveReason::TimedOut => "timeout",
            LeaveReason::Malformed => "malformed",
            LeaveReason::Replaced => "replaced",
        }
    }

    fn disconnect_code(self) -> Option<DisconnectCode> {
        match self {
            LeaveReason::TimedOut => Some(DisconnectCode::Timeout),
            LeaveReason::Malformed => Some(DisconnectCode::MalformedMessage),
            LeaveReason::Disconnected | LeaveReason::Replaced => None,
        }
    }
}

/// Replacement subsystem, installed at the next tick boundary.
pub enum SubsystemSwap {
    Movement(Box<dyn MovementRule>),
    Physics(Box<dyn PhysicsWorld>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub tick: u32,
    pub players_stepped: usize,
    pub player_errors: usize,
    pub module_errors: usize,
    pub collisions_resolved: usize,
    pub snapshots_sent: usize,
    pub bytes_sent: usize,
}

pub struct World {
    config: SimulationConfig,
    clock: Arc<dyn Clock>,
    tick: u32,
    players: PlayerStore,
    entities: EntityTable,
    movement: Box<dyn MovementRule>,
    physics: Box<dyn PhysicsWorld>,
    modules: Vec<Box<dyn ContentModule>>,
    lag: LagCompensator,
    sessions: SessionManager,
    events: EventLog,
    grid: SpatialGrid,
    world_definition: Value,
    pending_swaps: Vec<SubsystemSwap>,
    pending_removals: Vec<(PlayerId, LeaveReason)>,
}

impl World {
    pub fn new(config: SimulationConfig, clock: Arc<dyn Clock>) -> Self {
        let world_definition = Value::map([
            ("tickRate", Value::from(config.tick_rate)),
            ("capsuleRadius", Value::Float(config.capsule_radius)),
            ("movement", config.movement.to_value()),
        ]);

        Self {
            players: PlayerStore::with_input_capacity(config.max_players, config.input_capacity),
            entities: EntityTable::new(),
            movement: Box::new(config.movement),
            physics: Box::new(FlatGroundPhysics::new(config.movement)),
            modules: Vec::new(),
            lag: LagCompensator::new(config.lag, Arc::clone(&clock)),
            sessions: SessionManager::new(config.session, Arc::clone(&clock)),
            events: EventLog::new(config.event_capacity),
            grid: SpatialGrid::new(config.grid_cell_size),
            world_definition,
            pending_swaps: Vec::new(),
            pending_removals: Vec::new(),
            tick: 0,
            clock,
            config,
        }
    }

    pub fn with_physics(mut self, physics: Box<dyn PhysicsWorld>) -> Self {
        self.physics = physics;
        self
    }

    pub fn with_movement(mut self, movement: Box<dyn MovementRule>) -> Self {
        self.movement = movement;
        self
    }

    pub fn add_module(&mut self, module: Box<dyn ContentModule>) {
        info!("Content module `{}` loaded", module.name());
        self.modules.push(module);
    }

    pub fn set_world_definition(&mut self, definition: Value) {
        self.world_definition = definition;
    }

    pub fn spawn_entity(&mut self, entity: EntityState) {
        self.entities.insert(entity.id.clone(), entity);
    }

    pub fn remove_entity(&mut self, id: &str) -> Option<EntityState> {
        self.entities.remove(id)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn current_tick(&self) -> u32 {
        self.tick
    }

    pub fn player(&self, id: PlayerId) -> Option<&PlayerState> {
        self.players.state(id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn players(&self) -> &PlayerStore {
        &self.players
    }

    pub fn entities(&self) -> &EntityTable {
        &self.entities
    }

    pub fn entity(&self, id: &EntityId) -> Option<&EntityState> {
        self.entities.get(id)
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn lag(&self) -> &LagCompensator {
        &self.lag
    }

    pub fn session_token(&self, id: PlayerId) -> Option<&str> {
        self.sessions.token_for(id)
    }

    pub fn validate_shot(&self, shooter: PlayerId, target: PlayerId, latency_ms: i64) -> ShotValidation {
        self.lag.validate_shot(shooter, target, latency_ms)
    }

    pub fn touch(&mut self, id: PlayerId) {
        self.players.touch(id);
    }

    pub fn timed_out(&self, timeout: std::time::Duration) -> Vec<PlayerId> {
        self.players.timed_out(timeout)
    }

    fn spawn_position(&self, id: PlayerId) -> Vec3 {
        let slot = id.saturating_sub(1);
        let spacing = self.config.capsule_radius * 4.0;
        [
            self.config.spawn_point[0] + (slot % 8) as f64 * spacing,
            self.config.spawn_point[1],
            self.config.spawn_point[2] + (slot / 8 % 8) as f64 * spacing,
        ]
    }

    fn log_event(&mut self, kind: EventKind, data: Value, meta: EventMeta) -> u64 {
        let now = self.clock.now_millis();
        self.events.log(self.tick, now, kind, data, meta)
    }

    fn refuse(transport: &dyn Transport, error: &JoinError) {
        let bytes = encode_message(&Message::DisconnectReason {
            code: error.disconnect_code(),
            message: error.to_string(),
        });
        if let Err(e) = transport.send(&bytes) {
            warn!("Failed to send refusal: {}", e);
        }
    }

    /// Admits a new player: handshake-ack, world definition, module code
    /// bundles, then a full snapshot. A refused client gets a disconnect
    /// reason instead.
    pub fn connect(&mut self, transport: Box<dyn Transport>, client_version: u32) -> Result<PlayerId, JoinError> {
        if client_version != PROTOCOL_VERSION {
            let error = JoinError::VersionMismatch {
                client: client_version,
                server: PROTOCOL_VERSION,
            };
            Self::refuse(transport.as_ref(), &error);
            return Err(error);
        }
        if self.players.len() >= self.players.max_players() {
            Self::refuse(transport.as_ref(), &JoinError::ServerFull);
            return Err(JoinError::ServerFull);
        }

        let id = self
            .players
            .add_player(transport, PlayerState::new(0, self.config.spawn_point))
            .ok_or(JoinError::ServerFull)?;
        let spawn = self.spawn_position(id);
        let state = match self.players.get_mut(id) {
            Some(player) => {
                player.state.position = spawn;
                player.state.clone()
            }
            None => return Err(JoinError::ServerFull),
        };

        self.physics.add_player(id, &state);
        let session_token = self.sessions.issue(id);

        let mut frames = vec![
            encode_message(&Message::HandshakeAck {
                player_id: id,
                tick: self.tick,
                session_token,
                tick_rate: self.config.tick_rate,
            }),
            encode_message(&Message::WorldDefinition {
                world: self.world_definition.clone(),
            }),
        ];
        frames.extend(self.modules.iter().map(|module| {
            encode_message(&Message::AppModule {
                name: module.name().to_string(),
                code: module.code(),
            })
        }));
        for frame in &frames {
            self.players.send_to(id, frame);
        }
        self.send_full_snapshot(id);

        self.log_event(EventKind::PlayerJoined, Value::Nil, EventMeta::actor(id));
        self.players
            .broadcast(&encode_message(&Message::PlayerJoin { player_id: id }), Some(id));
        info!("Player {} joined at tick {}", id, self.tick);
        Ok(id)
    }

    /// Restores a player from a session token under a fresh id and sends
    /// reconnect-ack plus a one-shot state recovery carrying every logged
    /// event since `last_tick`.
    pub fn reconnect(&mut self, transport: Box<dyn Transport>, token: &str, last_tick: u32) -> Result<PlayerId, JoinError> {
        if let Some(live) = self.sessions.player_for(token) {
            self.remove_now(live, LeaveReason::Replaced);
        }
        if self.players.len() >= self.players.max_players() {
            Self::refuse(transport.as_ref(), &JoinError::ServerFull);
            return Err(JoinError::ServerFull);
        }

        let saved = match self.sessions.resume(token) {
            Ok(saved) => saved,
            Err(e) => {
                let error = JoinError::from(e);
                Self::refuse(transport.as_ref(), &error);
                warn!("Reconnect refused: {}", error);
                return Err(error);
            }
        };

        let id = self
            .players
            .add_player(transport, saved.state.clone())
            .ok_or(JoinError::ServerFull)?;
        self.sessions.rebind(token, id);
        let state = match self.players.state(id) {
            Some(state) => state.clone(),
            None => return Err(JoinError::ServerFull),
        };
        self.physics.add_player(id, &state);

        let recovery = self.full_snapshot();
        let events = self
            .events
            .query(&EventFilter::default().since(last_tick))
            .into_iter()
            .map(Event::to_value)
            .collect();

        self.players.send_to(
            id,
            &encode_message(&Message::ReconnectAck {
                player_id: id,
                tick: self.tick,
                session_token: token.to_string(),
                tick_rate: self.config.tick_rate,
            }),
        );
        self.players.send_to(
            id,
            &encode_message(&Message::StateRecovery {
                player: state,
                snapshot: recovery.clone(),
                events,
            }),
        );
        if let Some(player) = self.players.get_mut(id) {
            player.snapshot_keys = snapshot::keys_for(&recovery);
            player.needs_full_snapshot = false;
        }

        self.log_event(
            EventKind::PlayerReconnected,
            Value::map([("previousId", Value::from(saved.player_id))]),
            EventMeta::actor(id),
        );
        self.players
            .broadcast(&encode_message(&Message::PlayerJoin { player_id: id }), Some(id));
        info!("Player {} reconnected as {}", saved.player_id, id);
        Ok(id)
    }

    /// Routes a message from a connected player. Inputs are buffered for the
    /// next tick; nothing here advances the simulation.
    pub fn handle_message(&mut self, id: PlayerId, message: Message) {
        self.players.touch(id);
        match message {
            Message::Input {
                sequence,
                timestamp: _,
                input,
            } => {
                let arrival = self.clock.now_millis();
                self.players.add_input(
                    id,
                    InputState {
                        sequence,
                        timestamp: arrival,
                        input,
                    },
                );
            }
            Message::AppEvent { name, data } => self.dispatch_app_event(id, &name, &data),
            Message::Disconnect => self.queue_removal(id, LeaveReason::Disconnected),
            Message::Connect { .. } | Message::Reconnect { .. } => {
                debug!("Ignoring repeated handshake from player {}", id);
            }
            Message::HandshakeAck { .. }
            | Message::WorldDefinition { .. }
            | Message::AppModule { .. }
            | Message::Snapshot(_)
            | Message::ReconnectAck { .. }
            | Message::StateRecovery { .. }
            | Message::DisconnectReason { .. }
            | Message::PlayerJoin { .. }
            | Message::PlayerLeave { .. } => {
                warn!("Player {} sent server-only message `{}`", id, message.type_name());
            }
        }
    }

    fn dispatch_app_event(&mut self, id: PlayerId, name: &str, data: &Value) {
        let cause = self.log_event(
            EventKind::AppEvent,
            Value::map([("name", Value::from(name)), ("data", data.clone())]),
            EventMeta::actor(id),
        );

        let dt = self.config.dt();
        let mut failures = Vec::new();
        let mut emitted = Vec::new();
        for module in self.modules.iter_mut() {
            let mut ctx = ModuleContext::new(self.tick, dt, &self.players, &mut self.entities);
            let result = module.on_app_event(id, name, data, &mut ctx);
            let module_name = module.name().to_string();
            emitted.extend(ctx.into_emitted().into_iter().map(|(n, d)| (module_name.clone(), n, d)));
            if let Err(e) = result {
                failures.push((module_name, e));
            }
        }
        self.finish_module_pass(failures, emitted, Some(cause));
    }

    fn finish_module_pass(
        &mut self,
        failures: Vec<(String, SimulationError)>,
        emitted: Vec<(String, String, Value)>,
        cause: Option<u64>,
    ) -> usize {
        let failed = failures.len();
        for (module, error) in failures {
            warn!("Module `{}` failed at tick {}: {}", module, self.tick, error);
            let meta = EventMeta {
                source_app: Some(module),
                reason: Some(error.to_string()),
                causal_event_id: cause,
                ..Default::default()
            };
            self.log_event(EventKind::ModuleError, Value::Nil, meta);
        }
        for (module, name, data) in emitted {
            let meta = EventMeta {
                source_app: Some(module),
                causal_event_id: cause,
                ..Default::default()
            };
            self.log_event(
                EventKind::AppEvent,
                Value::map([("name", Value::from(name.as_str())), ("data", data.clone())]),
                meta,
            );
            self.players
                .broadcast(&encode_message(&Message::AppEvent { name, data }), None);
        }
        failed
    }

    /// Removal happens at the start of the next tick.
    /// Removes a player right away rather than at the next tick boundary.
    /// Only safe between ticks, when a client takes over its own slot.
    pub fn remove_player(&mut self, id: PlayerId, reason: LeaveReason) {
        self.pending_removals.retain(|(queued, _)| *queued != id);
        self.remove_now(id, reason);
    }

    pub fn queue_removal(&mut self, id: PlayerId, reason: LeaveReason) {
        if !self.pending_removals.iter().any(|(queued, _)| *queued == id) {
            self.pending_removals.push((id, reason));
        }
    }

    pub fn schedule_swap(&mut self, swap: SubsystemSwap) {
        self.pending_swaps.push(swap);
    }

    fn apply_swaps(&mut self) {
        for swap in std::mem::take(&mut self.pending_swaps) {
            match swap {
                SubsystemSwap::Movement(rule) => {
                    self.movement = rule;
                    info!("Movement rule swapped at tick {}", self.tick);
                }
                SubsystemSwap::Physics(mut physics) => {
                    for state in self.players.states() {
                        physics.add_player(state.id, state);
                    }
                    self.physics = physics;
                    info!(
                        "Physics swapped at tick {} with {} bodies carried over",
                        self.tick,
                        self.physics.body_count()
                    );
                }
            }
        }
    }

    fn apply_removals(&mut self) {
        for (id, reason) in std::mem::take(&mut self.pending_removals) {
            self.remove_now(id, reason);
        }
    }

    fn remove_now(&mut self, id: PlayerId, reason: LeaveReason) {
        let player = match self.players.remove_player(id) {
            Some(player) => player,
            None => return,
        };
        self.physics.remove_player(id);
        self.lag.remove_player(id);

        match reason {
            LeaveReason::Disconnected => self.sessions.revoke(id),
            _ => {
                self.sessions.save(id, player.state.clone(), self.tick);
            }
        }
        if let Some(code) = reason.disconnect_code() {
            let bytes = encode_message(&Message::DisconnectReason {
                code,
                message: reason.as_str().to_string(),
            });
            if let Err(e) = player.send(&bytes) {
                debug!("Could not notify player {}: {}", id, e);
            }
        }

        self.log_event(
            EventKind::PlayerLeft,
            Value::Nil,
            EventMeta::actor(id).with_reason(reason.as_str()),
        );
        self.players
            .broadcast(&encode_message(&Message::PlayerLeave { player_id: id }), None);
        info!("Player {} left ({})", id, reason.as_str());
    }

    /// Advances the world by one fixed step.
    pub fn tick(&mut self) -> TickReport {
        self.apply_swaps();
        self.apply_removals();

        self.tick = self.tick.wrapping_add(1);
        let dt = self.config.dt();
        let mut report = TickReport {
            tick: self.tick,
            ..Default::default()
        };

        let ids = self.players.connected_players();
        for &id in ids.iter() {
            match self.step_player(id, dt) {
                Ok(()) => report.players_stepped += 1,
                Err(e) => {
                    warn!("Player {} not advanced at tick {}: {}", id, self.tick, e);
                    report.player_errors += 1;
                }
            }
        }

        report.collisions_resolved = self.resolve_interpenetration();

        if let Err(e) = self.physics.step_world(dt) {
            warn!("Physics world step failed at tick {}: {}", self.tick, e);
        }

        report.module_errors = self.tick_modules(dt);

        for &id in ids.iter() {
            if let Some(state) = self.players.state(id) {
                self.lag
                    .record(id, state.position, state.rotation, state.velocity, self.tick);
            }
        }

        let (sent, bytes) = self.broadcast_snapshots();
        report.snapshots_sent = sent;
        report.bytes_sent = bytes;

        if self.tick % self.config.tick_rate.max(1) == 0 {
            let purged = self.sessions.purge_expired();
            debug!(
                "Tick {}: {} players, {} entities, {} snapshot bytes, {} sessions purged",
                self.tick,
                self.players.len(),
                self.entities.len(),
                bytes,
                purged
            );
        }
        report
    }

    fn step_player(&mut self, id: PlayerId, dt: f64) -> Result<(), SimulationError> {
        let input = self.players.take_latest_input(id);
        let mut state = self
            .players
            .state(id)
            .cloned()
            .ok_or(SimulationError::UnknownPlayer(id))?;

        if let Some(latest) = &input {
            apply_orientation(&mut state, &latest.input);
        }
        let wished = self
            .movement
            .apply(state.velocity, state.on_ground, input.as_ref().map(|i| &i.input), dt);
        state.velocity = wished;

        let step = self.physics.step_player(id, &state, dt)?;

        if self
            .lag
            .detect_teleport(id, step.position, self.config.teleport_threshold)
        {
            warn!("Player {} moved further than {} in one tick", id, self.config.teleport_threshold);
            let data = Value::map([(
                "position",
                Value::Array(step.position.iter().map(|&c| Value::Float(c)).collect()),
            )]);
            self.log_event(EventKind::TeleportDetected, data, EventMeta::actor(id));
        }

        state.position = step.position;
        state.velocity = [wished[0], step.velocity[1], wished[2]];
        state.on_ground = step.on_ground;

        let player = self
            .players
            .get_mut(id)
            .ok_or(SimulationError::UnknownPlayer(id))?;
        player.state = state;
        Ok(())
    }

    /// Pushes overlapping capsules apart on the XZ plane, half the overlap
    /// each. Each unordered pair is resolved at most once.
    fn resolve_interpenetration(&mut self) -> usize {
        let min_distance = self.config.capsule_radius * 2.0;
        self.grid
            .rebuild(self.players.states().map(|s| (s.id, &s.position)));

        let mut resolved = HashSet::new();
        let mut count = 0;
        for (a, b) in self.grid.potential_pairs() {
            if !resolved.insert((a.min(b), a.max(b))) {
                continue;
            }
            let (pa, pb) = match (self.players.state(a), self.players.state(b)) {
                (Some(pa), Some(pb)) => (pa.position, pb.position),
                _ => continue,
            };

            let dx = pb[0] - pa[0];
            let dz = pb[2] - pa[2];
            let distance = (dx * dx + dz * dz).sqrt();
            if distance >= min_distance {
                continue;
            }
            let (nx, nz) = if distance > 1e-9 {
                (dx / distance, dz / distance)
            } else {
                (1.0, 0.0)
            };
            let push = (min_distance - distance) / 2.0;

            if let Some(player) = self.players.get_mut(a) {
                player.state.position[0] -= nx * push;
                player.state.position[2] -= nz * push;
            }
            if let Some(player) = self.players.get_mut(b) {
                player.state.position[0] += nx * push;
                player.state.position[2] += nz * push;
            }
            count += 1;
        }
        count
    }

    fn tick_modules(&mut self, dt: f64) -> usize {
        let mut failures = Vec::new();
        let mut emitted = Vec::new();
        for module in self.modules.iter_mut() {
            let mut ctx = ModuleContext::new(self.tick, dt, &self.players, &mut self.entities);
            let result = module.tick(&mut ctx);
            let module_name = module.name().to_string();
            emitted.extend(ctx.into_emitted().into_iter().map(|(n, d)| (module_name.clone(), n, d)));
            if let Err(e) = result {
                failures.push((module_name, e));
            }
        }
        self.finish_module_pass(failures, emitted, None)
    }

    /// Every player and entity at the current tick.
    pub fn full_snapshot(&self) -> Snapshot {
        Snapshot {
            tick: self.tick,
            timestamp: self.clock.now_millis(),
            players: self.players.states().cloned().collect(),
            entities: self.entities.values().cloned().collect(),
            removed: Vec::new(),
            delta: false,
        }
    }

    fn snapshot_for(&self, id: PlayerId, everything: &Snapshot) -> Snapshot {
        let radius = match self.config.relevance_radius {
            Some(radius) => radius,
            None => return everything.clone(),
        };
        let center = match self.players.state(id) {
            Some(state) => state.position,
            None => return everything.clone(),
        };

        let radius_sq = radius * radius;
        let nearby: Vec<PlayerId> = if radius <= self.grid.cell_size() {
            self.grid.query_radius(center, radius)
        } else {
            let mut ids: Vec<PlayerId> = everything
                .players
                .iter()
                .filter(|p| horizontal_distance_sq(p.position, center) <= radius_sq)
                .map(|p| p.id)
                .collect();
            ids.sort_unstable();
            ids
        };

        Snapshot {
            players: everything
                .players
                .iter()
                .filter(|p| p.id == id || nearby.binary_search(&p.id).is_ok())
                .cloned()
                .collect(),
            entities: everything
                .entities
                .iter()
                .filter(|e| horizontal_distance_sq(e.position, center) <= radius_sq)
                .cloned()
                .collect(),
            ..everything.clone()
        }
    }

    fn send_full_snapshot(&mut self, id: PlayerId) {
        let everything = self.full_snapshot();
        let snapshot = self.snapshot_for(id, &everything);
        if let Some(player) = self.players.get_mut(id) {
            player.snapshot_keys = snapshot::keys_for(&snapshot);
            player.needs_full_snapshot = false;
            if let Err(e) = player.send(&encode_snapshot_message(&snapshot::encode(&snapshot))) {
                warn!("Failed to send snapshot to player {}: {}", id, e);
            }
        }
    }

    fn broadcast_snapshots(&mut self) -> (usize, usize) {
        if self.players.is_empty() {
            return (0, 0);
        }

        let everything = self.full_snapshot();
        if self.config.relevance_radius.is_some() {
            self.grid
                .rebuild(self.players.states().map(|s| (s.id, &s.position)));
        }
        let periodic_full = !self.config.delta_snapshots
            || (self.config.full_snapshot_interval > 0 && self.tick % self.config.full_snapshot_interval == 0);

        let mut sent = 0;
        let mut bytes_sent = 0;
        for &id in self.players.connected_players().iter() {
            let snapshot = self.snapshot_for(id, &everything);
            let player = match self.players.get_mut(id) {
                Some(player) => player,
                None => continue,
            };

            let encoded = if periodic_full || player.needs_full_snapshot {
                player.snapshot_keys = snapshot::keys_for(&snapshot);
                snapshot::encode(&snapshot)
            } else {
                let (encoded, keys) = snapshot::encode_delta(&snapshot, &player.snapshot_keys);
                player.snapshot_keys = keys;
                encoded
            };
            player.needs_full_snapshot = false;

            let bytes = encode_snapshot_message(&encoded);
            match player.send(&bytes) {
                Ok(()) => {
                    sent += 1;
                    bytes_sent += bytes.len();
                }
                Err(e) => warn!("Failed to send snapshot to player {}: {}", id, e),
            }
        }
        (sent, bytes_sent)
    }
}
