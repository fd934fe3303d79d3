//! Quantized world snapshots.
//!
//! Encoding is lossy on purpose: positions and velocities travel as
//! hundredths of a unit, quaternion components as ten-thousandths, and look
//! angles as a single byte each. Records are fixed-order integer arrays:
//!
//! ```text
//! player: [id, px, py, pz, qx, qy, qz, qw, vx, vy, vz, onGround, health,
//!          inputSequence, crouch, pitchByte, yawByte]
//! entity: [id, model, px, py, pz, qx, qy, qz, qw, bodyType, custom]
//! ```
//!
//! Delta encoding keeps no state of its own: the caller hands in the key map
//! returned by the previous call and gets the next one back.

use crate::wire::{DecodeError, Value};
use crate::{EntityId, EntityState, PlayerId, PlayerState};
use std::collections::HashMap;
use std::f64::consts::{FRAC_PI_2, PI, TAU};

pub const POSITION_SCALE: f64 = 100.0;
pub const ROTATION_SCALE: f64 = 10_000.0;
pub const PLAYER_FIELDS: usize = 17;
pub const ENTITY_FIELDS: usize = 11;

pub type EncodedPlayer = [i64; PLAYER_FIELDS];

/// Identifies a record in a `removed` list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordId {
    Player(PlayerId),
    Entity(EntityId),
}

impl RecordId {
    fn to_value(&self) -> Value {
        match self {
            RecordId::Player(id) => Value::from(*id),
            RecordId::Entity(id) => Value::from(id.as_str()),
        }
    }

    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Str(id) => Ok(RecordId::Entity(id.clone())),
            other => Ok(RecordId::Player(other.expect_u32()?)),
        }
    }
}

/// World state at one tick, before encoding or after decoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub tick: u32,
    pub timestamp: i64,
    pub players: Vec<PlayerState>,
    pub entities: Vec<EntityState>,
    pub removed: Vec<RecordId>,
    pub delta: bool,
}

impl Snapshot {
    pub fn player(&self, id: PlayerId) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.id == id)
    }

    /// Folds a delta into this snapshot: changed records replace or extend,
    /// removed ids are dropped. A full snapshot replaces everything. An
    /// update older than this snapshot is left unapplied and `false` is
    /// returned.
    pub fn merge(&mut self, update: Snapshot) -> bool {
        if update.tick < self.tick {
            return false;
        }
        self.tick = update.tick;
        self.timestamp = update.timestamp;

        if !update.delta {
            self.players = update.players;
            self.entities = update.entities;
            return true;
        }

        for removed in &update.removed {
            match removed {
                RecordId::Player(id) => self.players.retain(|p| p.id != *id),
                RecordId::Entity(id) => self.entities.retain(|e| e.id != *id),
            }
        }
        for player in update.players {
            match self.players.iter_mut().find(|p| p.id == player.id) {
                Some(existing) => *existing = player,
                None => self.players.push(player),
            }
        }
        for entity in update.entities {
            match self.entities.iter_mut().find(|e| e.id == entity.id) {
                Some(existing) => *existing = entity,
                None => self.entities.push(entity),
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodedEntity {
    pub id: EntityId,
    pub model: String,
    /// `[px, py, pz, qx, qy, qz, qw]`, quantized.
    pub transform: [i64; 7],
    pub body_type: String,
    pub custom: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedSnapshot {
    pub tick: u32,
    pub timestamp: i64,
    pub players: Vec<EncodedPlayer>,
    pub entities: Vec<EncodedEntity>,
    pub removed: Vec<RecordId>,
    pub delta: bool,
}

/// Per-record change keys from the previous delta call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaKeys {
    pub players: HashMap<PlayerId, String>,
    pub entities: HashMap<EntityId, String>,
}

pub fn quantize_position(v: f64) -> i64 {
    (v * POSITION_SCALE).round() as i64
}

pub fn dequantize_position(q: f64) -> f64 {
    q / POSITION_SCALE
}

pub fn quantize_rotation(v: f64) -> i64 {
    (v * ROTATION_SCALE).round() as i64
}

pub fn dequantize_rotation(q: f64) -> f64 {
    q / ROTATION_SCALE
}

/// Pitch covers `[-π/2, π/2]`.
pub fn pitch_to_byte(pitch: f64) -> i64 {
    let clamped = pitch.clamp(-FRAC_PI_2, FRAC_PI_2);
    ((clamped + FRAC_PI_2) / PI * 255.0).round() as i64
}

pub fn byte_to_pitch(byte: f64) -> f64 {
    byte.clamp(0.0, 255.0) / 255.0 * PI - FRAC_PI_2
}

/// Yaw wraps into `[-π, π)` before mapping.
pub fn yaw_to_byte(yaw: f64) -> i64 {
    let wrapped = (yaw + PI).rem_euclid(TAU) - PI;
    ((wrapped + PI) / TAU * 255.0).round() as i64
}

pub fn byte_to_yaw(byte: f64) -> f64 {
    byte.clamp(0.0, 255.0) / 255.0 * TAU - PI
}

pub fn encode_player(player: &PlayerState) -> EncodedPlayer {
    let p = player.position;
    let q = player.rotation;
    let v = player.velocity;
    [
        player.id as i64,
        quantize_position(p[0]),
        quantize_position(p[1]),
        quantize_position(p[2]),
        quantize_rotation(q[0]),
        quantize_rotation(q[1]),
        quantize_rotation(q[2]),
        quantize_rotation(q[3]),
        quantize_position(v[0]),
        quantize_position(v[1]),
        quantize_position(v[2]),
        i64::from(player.on_ground),
        player.health.max(0.0).round() as i64,
        player.input_sequence as i64,
        i64::from(player.crouch.min(1)),
        pitch_to_byte(player.look_pitch),
        yaw_to_byte(player.look_yaw),
    ]
}

fn player_from_fields(fields: &[f64]) -> PlayerState {
    PlayerState {
        id: fields[0] as PlayerId,
        position: [
            dequantize_position(fields[1]),
            dequantize_position(fields[2]),
            dequantize_position(fields[3]),
        ],
        rotation: [
            dequantize_rotation(fields[4]),
            dequantize_rotation(fields[5]),
            dequantize_rotation(fields[6]),
            dequantize_rotation(fields[7]),
        ],
        velocity: [
            dequantize_position(fields[8]),
            dequantize_position(fields[9]),
            dequantize_position(fields[10]),
        ],
        on_ground: fields[11] != 0.0,
        health: fields[12].max(0.0),
        input_sequence: fields[13] as u32,
        crouch: u8::from(fields[14] != 0.0),
        look_pitch: byte_to_pitch(fields[15]),
        look_yaw: byte_to_yaw(fields[16]),
    }
}

pub fn decode_player(encoded: &EncodedPlayer) -> PlayerState {
    let fields: Vec<f64> = encoded.iter().map(|&n| n as f64).collect();
    player_from_fields(&fields)
}

pub fn encode_entity(entity: &EntityState) -> EncodedEntity {
    let p = entity.position;
    let q = entity.rotation;
    EncodedEntity {
        id: entity.id.clone(),
        model: entity.model.clone(),
        transform: [
            quantize_position(p[0]),
            quantize_position(p[1]),
            quantize_position(p[2]),
            quantize_rotation(q[0]),
            quantize_rotation(q[1]),
            quantize_rotation(q[2]),
            quantize_rotation(q[3]),
        ],
        body_type: entity.body_type.clone(),
        custom: entity.custom.clone(),
    }
}

pub fn decode_entity(encoded: &EncodedEntity) -> EntityState {
    let t = encoded.transform.map(|n| n as f64);
    EntityState {
        id: encoded.id.clone(),
        model: encoded.model.clone(),
        position: [
            dequantize_position(t[0]),
            dequantize_position(t[1]),
            dequantize_position(t[2]),
        ],
        rotation: [
            dequantize_rotation(t[3]),
            dequantize_rotation(t[4]),
            dequantize_rotation(t[5]),
            dequantize_rotation(t[6]),
        ],
        body_type: encoded.body_type.clone(),
        custom: encoded.custom.clone(),
    }
}

fn player_key(encoded: &EncodedPlayer) -> String {
    encoded[1..]
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn entity_key(encoded: &EncodedEntity) -> String {
    let transform = encoded
        .transform
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "{}|{}|{}|{:?}",
        encoded.model, transform, encoded.body_type, encoded.custom
    )
}

/// Full encoding of every record.
pub fn encode(snapshot: &Snapshot) -> EncodedSnapshot {
    EncodedSnapshot {
        tick: snapshot.tick,
        timestamp: snapshot.timestamp,
        players: snapshot.players.iter().map(encode_player).collect(),
        entities: snapshot.entities.iter().map(encode_entity).collect(),
        removed: Vec::new(),
        delta: false,
    }
}

/// Emits only records whose encoded form changed since `previous`, plus the
/// ids that disappeared. Returns the key map to pass to the next call.
pub fn encode_delta(snapshot: &Snapshot, previous: &DeltaKeys) -> (EncodedSnapshot, DeltaKeys) {
    let mut next = DeltaKeys::default();
    let mut out = EncodedSnapshot {
        tick: snapshot.tick,
        timestamp: snapshot.timestamp,
        delta: true,
        ..Default::default()
    };

    for player in &snapshot.players {
        let encoded = encode_player(player);
        let key = player_key(&encoded);
        if previous.players.get(&player.id) != Some(&key) {
            out.players.push(encoded);
        }
        next.players.insert(player.id, key);
    }

    for entity in &snapshot.entities {
        let encoded = encode_entity(entity);
        let key = entity_key(&encoded);
        if previous.entities.get(&entity.id) != Some(&key) {
            out.entities.push(encoded);
        }
        next.entities.insert(entity.id.clone(), key);
    }

    let mut removed: Vec<RecordId> = previous
        .players
        .keys()
        .filter(|id| !next.players.contains_key(id))
        .map(|id| RecordId::Player(*id))
        .chain(
            previous
                .entities
                .keys()
                .filter(|id| !next.entities.contains_key(*id))
                .map(|id| RecordId::Entity(id.clone())),
        )
        .collect();
    removed.sort();
    out.removed = removed;

    (out, next)
}

/// Rebuilds the key map a receiver of `snapshot` would hold, for seeding
/// delta encoding after a full send.
pub fn keys_for(snapshot: &Snapshot) -> DeltaKeys {
    encode_delta(snapshot, &DeltaKeys::default()).1
}

impl EncodedSnapshot {
    pub fn to_value(&self) -> Value {
        let players = self
            .players
            .iter()
            .map(|record| Value::Array(record.iter().map(|&n| Value::Int(n)).collect()))
            .collect();

        let entities = self
            .entities
            .iter()
            .map(|e| {
                let mut fields = Vec::with_capacity(ENTITY_FIELDS);
                fields.push(Value::from(e.id.as_str()));
                fields.push(Value::from(e.model.as_str()));
                fields.extend(e.transform.iter().map(|&n| Value::Int(n)));
                fields.push(Value::from(e.body_type.as_str()));
                fields.push(e.custom.clone());
                Value::Array(fields)
            })
            .collect();

        let mut entries = vec![
            ("tick".to_string(), Value::from(self.tick)),
            ("timestamp".to_string(), Value::Int(self.timestamp)),
            ("players".to_string(), Value::Array(players)),
            ("entities".to_string(), Value::Array(entities)),
        ];
        if !self.removed.is_empty() {
            let removed = self.removed.iter().map(RecordId::to_value).collect();
            entries.push(("removed".to_string(), Value::Array(removed)));
        }
        if self.delta {
            entries.push(("delta".to_string(), Value::Bool(true)));
        }
        Value::Map(entries)
    }
}

fn decode_player_value(value: &Value) -> Result<PlayerState, DecodeError> {
    match value {
        Value::Array(items) => {
            if items.len() != PLAYER_FIELDS {
                return Err(DecodeError::InvalidField {
                    field: "players",
                    reason: format!("expected {} columns, got {}", PLAYER_FIELDS, items.len()),
                });
            }
            let fields = items
                .iter()
                .map(Value::expect_f64)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(player_from_fields(&fields))
        }
        // Object form passes through unquantized.
        Value::Map(_) => Ok(PlayerState {
            id: value.field("id")?.expect_u32()?,
            position: vec3(value.field("position")?)?,
            rotation: quat(value.field("rotation")?)?,
            velocity: vec3(value.field("velocity")?)?,
            on_ground: value.get("onGround").and_then(Value::as_bool).unwrap_or(true),
            health: value.get("health").and_then(Value::as_f64).unwrap_or(0.0).max(0.0),
            input_sequence: value.get("inputSequence").and_then(Value::as_u64).unwrap_or(0) as u32,
            crouch: u8::from(value.get("crouch").and_then(Value::as_i64).unwrap_or(0) != 0),
            look_pitch: value.get("lookPitch").and_then(Value::as_f64).unwrap_or(0.0),
            look_yaw: value.get("lookYaw").and_then(Value::as_f64).unwrap_or(0.0),
        }),
        other => Err(DecodeError::UnexpectedType {
            expected: "player record",
            found: other.kind(),
        }),
    }
}

fn decode_entity_value(value: &Value) -> Result<EntityState, DecodeError> {
    match value {
        Value::Array(items) => {
            if items.len() != ENTITY_FIELDS {
                return Err(DecodeError::InvalidField {
                    field: "entities",
                    reason: format!("expected {} columns, got {}", ENTITY_FIELDS, items.len()),
                });
            }
            let mut transform = [0i64; 7];
            for (slot, item) in transform.iter_mut().zip(&items[2..9]) {
                *slot = item.expect_f64()?.round() as i64;
            }
            Ok(decode_entity(&EncodedEntity {
                id: items[0].expect_str()?.to_string(),
                model: items[1].expect_str()?.to_string(),
                transform,
                body_type: items[9].expect_str()?.to_string(),
                custom: items[10].clone(),
            }))
        }
        Value::Map(_) => Ok(EntityState {
            id: value.field("id")?.expect_str()?.to_string(),
            model: value.field("model")?.expect_str()?.to_string(),
            position: vec3(value.field("position")?)?,
            rotation: quat(value.field("rotation")?)?,
            body_type: value
                .get("bodyType")
                .and_then(Value::as_str)
                .unwrap_or("static")
                .to_string(),
            custom: value.get("custom").cloned().unwrap_or(Value::Nil),
        }),
        other => Err(DecodeError::UnexpectedType {
            expected: "entity record",
            found: other.kind(),
        }),
    }
}

fn floats<const N: usize>(value: &Value, field: &'static str) -> Result<[f64; N], DecodeError> {
    let items = value.expect_array()?;
    if items.len() != N {
        return Err(DecodeError::InvalidField {
            field,
            reason: format!("expected {} components, got {}", N, items.len()),
        });
    }
    let mut out = [0.0; N];
    for (slot, item) in out.iter_mut().zip(items) {
        *slot = item.expect_f64()?;
    }
    Ok(out)
}

fn vec3(value: &Value) -> Result<[f64; 3], DecodeError> {
    floats(value, "vector")
}

fn quat(value: &Value) -> Result<[f64; 4], DecodeError> {
    floats(value, "quaternion")
}

/// Decodes a snapshot payload. Records may be in array form or object form.
pub fn decode(value: &Value) -> Result<Snapshot, DecodeError> {
    let players = value
        .field("players")?
        .expect_array()?
        .iter()
        .map(decode_player_value)
        .collect::<Result<Vec<_>, _>>()?;
    let entities = match value.get("entities") {
        Some(list) => list
            .expect_array()?
            .iter()
            .map(decode_entity_value)
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    let removed = match value.get("removed") {
        Some(list) => list
            .expect_array()?
            .iter()
            .map(RecordId::from_value)
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    Ok(Snapshot {
        tick: value.field("tick")?.expect_u32()?,
        timestamp: value.field("timestamp")?.expect_i64()?,
        players,
        entities,
        removed,
        delta: value.get("delta").and_then(Value::as_bool).unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{quat_from_yaw, quat_normalize};
    use crate::wire;
    use assert_approx_eq::assert_approx_eq;

    fn sample_player(id: PlayerId) -> PlayerState {
        let mut player = PlayerState::new(id, [1.234_56, 0.5, -7.891_23]);
        player.rotation = quat_normalize([0.123_45, 0.678_91, -0.234_56, 0.5]);
        player.velocity = [3.333, -1.0, 0.004];
        player.health = 87.6;
        player.input_sequence = 42;
        player.look_pitch = 0.4;
        player.look_yaw = -2.0;
        player
    }

    fn sample_snapshot() -> Snapshot {
        Snapshot {
            tick: 10,
            timestamp: 1_000,
            players: vec![sample_player(1), sample_player(2)],
            entities: vec![
                EntityState::new("door", "door.glb", [1.0, 0.0, 1.0]),
                EntityState::new("lift", "lift.glb", [5.0, 2.0, 0.0]),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_player_column_order() {
        let encoded = encode_player(&sample_player(9));
        assert_eq!(encoded[0], 9);
        assert_eq!(encoded[1], 123);
        assert_eq!(encoded[2], 50);
        assert_eq!(encoded[3], -789);
        assert_eq!(encoded[8], 333);
        assert_eq!(encoded[11], 1);
        assert_eq!(encoded[12], 88);
        assert_eq!(encoded[13], 42);
        assert_eq!(encoded[14], 0);
        assert!((0..=255).contains(&encoded[15]));
        assert!((0..=255).contains(&encoded[16]));
    }

    #[test]
    fn test_position_quantization_bound() {
        let mut x = -50.0;
        while x < 50.0 {
            let mut player = PlayerState::new(1, [x, x * 0.37, -x * 1.3]);
            player.rotation = quat_from_yaw(x);
            let decoded = decode_player(&encode_player(&player));
            for axis in 0..3 {
                assert!((decoded.position[axis] - player.position[axis]).abs() <= 0.005 + 1e-9);
            }
            for c in 0..4 {
                assert!((decoded.rotation[c] - player.rotation[c]).abs() <= 0.000_05 + 1e-12);
            }
            x += 0.013_7;
        }
    }

    #[test]
    fn test_look_angle_bytes() {
        assert_eq!(pitch_to_byte(-FRAC_PI_2), 0);
        assert_eq!(pitch_to_byte(FRAC_PI_2), 255);
        assert_eq!(pitch_to_byte(10.0), 255);
        assert_eq!(yaw_to_byte(-PI), 0);
        assert_approx_eq!(byte_to_yaw(yaw_to_byte(1.0) as f64), 1.0, TAU / 255.0);
        assert_approx_eq!(byte_to_yaw(yaw_to_byte(1.0 + TAU) as f64), 1.0, TAU / 255.0);
        assert_approx_eq!(byte_to_pitch(pitch_to_byte(0.3) as f64), 0.3, PI / 255.0);
    }

    #[test]
    fn test_full_encode_through_wire() {
        let snapshot = sample_snapshot();
        let value = encode(&snapshot).to_value();
        let bytes = wire::encode(&value);
        let decoded = decode(&wire::decode(&bytes).unwrap()).unwrap();

        assert_eq!(decoded.tick, 10);
        assert_eq!(decoded.timestamp, 1_000);
        assert!(!decoded.delta);
        assert_eq!(decoded.players.len(), 2);
        assert_eq!(decoded.entities.len(), 2);
        assert_eq!(decoded.entities[1].id, "lift");
        assert_approx_eq!(decoded.players[0].position[0], 1.23, 1e-9);
        assert_eq!(decoded.players[0].input_sequence, 42);
    }

    #[test]
    fn test_delta_emits_only_changed_entity() {
        let first = sample_snapshot();
        let (_, keys) = encode_delta(&first, &DeltaKeys::default());

        let mut second = first.clone();
        second.tick = 11;
        second.entities[1].position[1] = 3.0;
        let (delta, _) = encode_delta(&second, &keys);

        assert!(delta.delta);
        assert!(delta.players.is_empty());
        assert_eq!(delta.entities.len(), 1);
        assert_eq!(delta.entities[0].id, "lift");
        assert!(delta.removed.is_empty());
    }

    #[test]
    fn test_delta_reports_removed_entity() {
        let first = sample_snapshot();
        let keys = keys_for(&first);

        let mut second = first.clone();
        second.entities.retain(|e| e.id != "door");
        let (delta, next) = encode_delta(&second, &keys);

        assert!(delta.entities.is_empty());
        assert_eq!(delta.removed, vec![RecordId::Entity("door".to_string())]);
        assert!(!next.entities.contains_key("door"));
    }

    #[test]
    fn test_delta_ignores_sub_quantum_motion() {
        let first = sample_snapshot();
        let keys = keys_for(&first);
        let mut second = first.clone();
        second.players[0].position[0] += 0.000_1;
        let (delta, _) = encode_delta(&second, &keys);
        assert!(delta.players.is_empty());
    }

    #[test]
    fn test_delta_reports_removed_player() {
        let first = sample_snapshot();
        let keys = keys_for(&first);
        let mut second = first.clone();
        second.players.remove(0);
        let (delta, _) = encode_delta(&second, &keys);
        assert_eq!(delta.removed, vec![RecordId::Player(1)]);
    }

    fn float_array(values: &[f64]) -> Value {
        Value::Array(values.iter().map(|&v| Value::Float(v)).collect())
    }

    #[test]
    fn test_decode_object_form() {
        let value = Value::map([
            ("tick", Value::UInt(3)),
            ("timestamp", Value::Int(99)),
            (
                "players",
                Value::Array(vec![Value::map([
                    ("id", Value::UInt(4)),
                    ("position", float_array(&[1.2345, 0.0, 2.0])),
                    ("rotation", float_array(&[0.0, 0.0, 0.0, 1.0])),
                    ("velocity", float_array(&[0.0, 0.0, 0.0])),
                    ("health", Value::Float(50.0)),
                ])]),
            ),
            (
                "entities",
                Value::Array(vec![Value::map([
                    ("id", Value::from("e1")),
                    ("model", Value::from("m.glb")),
                    ("position", float_array(&[1.0, 2.0, 3.0])),
                    ("rotation", float_array(&[0.0, 0.0, 0.0, 1.0])),
                ])]),
            ),
        ]);

        let snapshot = decode(&value).unwrap();
        assert_eq!(snapshot.players[0].id, 4);
        assert_eq!(snapshot.players[0].position[0], 1.2345);
        assert_eq!(snapshot.players[0].health, 50.0);
        assert_eq!(snapshot.entities[0].body_type, "static");
    }

    #[test]
    fn test_decode_rejects_short_record() {
        let value = Value::map([
            ("tick", Value::UInt(1)),
            ("timestamp", Value::Int(1)),
            ("players", Value::Array(vec![Value::Array(vec![Value::UInt(1)])])),
        ]);
        assert!(matches!(decode(&value), Err(DecodeError::InvalidField { field: "players", .. })));
    }

    #[test]
    fn test_decode_removed_ids() {
        let encoded = EncodedSnapshot {
            tick: 2,
            timestamp: 5,
            removed: vec![RecordId::Player(3), RecordId::Entity("x".to_string())],
            delta: true,
            ..Default::default()
        };
        let decoded = decode(&encoded.to_value()).unwrap();
        assert!(decoded.delta);
        assert_eq!(decoded.removed, encoded.removed);
    }

    #[test]
    fn test_merge_applies_delta() {
        let mut base = sample_snapshot();
        let mut moved = sample_player(2);
        moved.position = [9.0, 0.0, 9.0];
        let update = Snapshot {
            tick: 11,
            timestamp: 1_016,
            players: vec![moved, sample_player(3)],
            removed: vec![RecordId::Player(1), RecordId::Entity("door".to_string())],
            delta: true,
            ..Default::default()
        };
        assert!(base.merge(update));

        assert_eq!(base.tick, 11);
        assert!(base.player(1).is_none());
        assert_eq!(base.player(2).map(|p| p.position), Some([9.0, 0.0, 9.0]));
        assert!(base.player(3).is_some());
        assert_eq!(base.entities.len(), 1);
    }

    #[test]
    fn test_merge_ignores_older_update() {
        let mut base = sample_snapshot();
        let tick = base.tick;
        let mut moved = sample_player(2);
        moved.position = [9.0, 0.0, 9.0];
        let late = Snapshot {
            tick: tick - 1,
            players: vec![moved],
            removed: vec![RecordId::Player(1)],
            delta: true,
            ..Default::default()
        };

        assert!(!base.merge(late));
        assert_eq!(base.tick, tick);
        assert!(base.player(1).is_some());
        assert_ne!(base.player(2).map(|p| p.position), Some([9.0, 0.0, 9.0]));
    }
}
