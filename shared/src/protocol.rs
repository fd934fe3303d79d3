//! Message envelope exchanged between client and server.
//!
//! On the wire every message is a two-entry map: `type` names the variant
//! and `payload` carries its fields. Decoding matches the type name against
//! a closed set, so an unknown type is a decode error rather than something
//! dispatched at runtime.

use crate::snapshot::{self, EncodedSnapshot, Snapshot};
use crate::wire::{self, DecodeError, Value};
use crate::{Input, PlayerId, PlayerState};

pub const PROTOCOL_VERSION: u32 = 1;

/// Why the server is closing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCode {
    ServerFull = 1,
    InvalidSession = 2,
    SessionExpired = 3,
    MalformedMessage = 4,
    Timeout = 5,
    Shutdown = 6,
    VersionMismatch = 7,
}

impl DisconnectCode {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(DisconnectCode::ServerFull),
            2 => Some(DisconnectCode::InvalidSession),
            3 => Some(DisconnectCode::SessionExpired),
            4 => Some(DisconnectCode::MalformedMessage),
            5 => Some(DisconnectCode::Timeout),
            6 => Some(DisconnectCode::Shutdown),
            7 => Some(DisconnectCode::VersionMismatch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Client hello.
    Connect { client_version: u32 },
    HandshakeAck {
        player_id: PlayerId,
        tick: u32,
        session_token: String,
        tick_rate: u32,
    },
    WorldDefinition { world: Value },
    /// Content-module code bundle.
    AppModule { name: String, code: Vec<u8> },
    Input {
        sequence: u32,
        timestamp: i64,
        input: Input,
    },
    AppEvent { name: String, data: Value },
    Snapshot(Snapshot),
    Reconnect { session_token: String, last_tick: u32 },
    ReconnectAck {
        player_id: PlayerId,
        tick: u32,
        session_token: String,
        tick_rate: u32,
    },
    /// One-shot recovery bundle sent after a successful reconnect.
    StateRecovery {
        player: PlayerState,
        snapshot: Snapshot,
        events: Vec<Value>,
    },
    DisconnectReason { code: DisconnectCode, message: String },
    PlayerJoin { player_id: PlayerId },
    PlayerLeave { player_id: PlayerId },
    /// Client goodbye.
    Disconnect,
}

impl Message {
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Connect { .. } => "connect",
            Message::HandshakeAck { .. } => "handshakeAck",
            Message::WorldDefinition { .. } => "worldDefinition",
            Message::AppModule { .. } => "appModule",
            Message::Input { .. } => "input",
            Message::AppEvent { .. } => "appEvent",
            Message::Snapshot(_) => "snapshot",
            Message::Reconnect { .. } => "reconnect",
            Message::ReconnectAck { .. } => "reconnectAck",
            Message::StateRecovery { .. } => "stateRecovery",
            Message::DisconnectReason { .. } => "disconnectReason",
            Message::PlayerJoin { .. } => "playerJoin",
            Message::PlayerLeave { .. } => "playerLeave",
            Message::Disconnect => "disconnect",
        }
    }

    fn payload(&self) -> Value {
        match self {
            Message::Connect { client_version } => {
                Value::map([("clientVersion", Value::from(*client_version))])
            }
            Message::HandshakeAck {
                player_id,
                tick,
                session_token,
                tick_rate,
            }
            | Message::ReconnectAck {
                player_id,
                tick,
                session_token,
                tick_rate,
            } => Value::map([
                ("id", Value::from(*player_id)),
                ("tick", Value::from(*tick)),
                ("sessionToken", Value::from(session_token.as_str())),
                ("tickRate", Value::from(*tick_rate)),
            ]),
            Message::WorldDefinition { world } => world.clone(),
            Message::AppModule { name, code } => Value::map([
                ("name", Value::from(name.as_str())),
                ("code", Value::Bin(code.clone())),
            ]),
            Message::Input {
                sequence,
                timestamp,
                input,
            } => input_to_value(*sequence, *timestamp, input),
            Message::AppEvent { name, data } => {
                Value::map([("name", Value::from(name.as_str())), ("data", data.clone())])
            }
            Message::Snapshot(s) => snapshot_to_value(s),
            Message::Reconnect {
                session_token,
                last_tick,
            } => Value::map([
                ("sessionToken", Value::from(session_token.as_str())),
                ("lastTick", Value::from(*last_tick)),
            ]),
            Message::StateRecovery {
                player,
                snapshot,
                events,
            } => Value::map([
                (
                    "player",
                    Value::Array(snapshot::encode_player(player).iter().map(|&n| Value::Int(n)).collect()),
                ),
                ("snapshot", snapshot_to_value(snapshot)),
                ("events", Value::Array(events.clone())),
            ]),
            Message::DisconnectReason { code, message } => Value::map([
                ("code", Value::from(*code as u32)),
                ("message", Value::from(message.as_str())),
            ]),
            Message::PlayerJoin { player_id } | Message::PlayerLeave { player_id } => {
                Value::map([("id", Value::from(*player_id))])
            }
            Message::Disconnect => Value::Nil,
        }
    }

    pub fn to_value(&self) -> Value {
        envelope(self.type_name(), self.payload())
    }

    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let kind = value.field("type")?.expect_str()?;
        let payload = value.get("payload").unwrap_or(&Value::Nil);

        let message = match kind {
            "connect" => Message::Connect {
                client_version: payload.field("clientVersion")?.expect_u32()?,
            },
            "handshakeAck" => {
                let (player_id, tick, session_token, tick_rate) = ack_fields(payload)?;
                Message::HandshakeAck {
                    player_id,
                    tick,
                    session_token,
                    tick_rate,
                }
            }
            "reconnectAck" => {
                let (player_id, tick, session_token, tick_rate) = ack_fields(payload)?;
                Message::ReconnectAck {
                    player_id,
                    tick,
                    session_token,
                    tick_rate,
                }
            }
            "worldDefinition" => Message::WorldDefinition {
                world: payload.clone(),
            },
            "appModule" => Message::AppModule {
                name: payload.field("name")?.expect_str()?.to_string(),
                code: match payload.field("code")? {
                    Value::Bin(bytes) => bytes.clone(),
                    other => {
                        return Err(DecodeError::UnexpectedType {
                            expected: "binary",
                            found: other.kind(),
                        })
                    }
                },
            },
            "input" => {
                let (sequence, timestamp, input) = input_from_value(payload)?;
                Message::Input {
                    sequence,
                    timestamp,
                    input,
                }
            }
            "appEvent" => Message::AppEvent {
                name: payload.field("name")?.expect_str()?.to_string(),
                data: payload.get("data").cloned().unwrap_or(Value::Nil),
            },
            "snapshot" => Message::Snapshot(snapshot::decode(payload)?),
            "reconnect" => Message::Reconnect {
                session_token: payload.field("sessionToken")?.expect_str()?.to_string(),
                last_tick: payload.get("lastTick").and_then(Value::as_u64).unwrap_or(0) as u32,
            },
            "stateRecovery" => {
                let record = Value::Array(vec![payload.field("player")?.clone()]);
                let wrapper = Value::map([
                    ("tick", Value::UInt(0)),
                    ("timestamp", Value::Int(0)),
                    ("players", record),
                ]);
                let player = snapshot::decode(&wrapper)?
                    .players
                    .pop()
                    .ok_or(DecodeError::MissingField("player"))?;
                Message::StateRecovery {
                    player,
                    snapshot: snapshot::decode(payload.field("snapshot")?)?,
                    events: payload
                        .get("events")
                        .and_then(Value::as_array)
                        .map(<[Value]>::to_vec)
                        .unwrap_or_default(),
                }
            }
            "disconnectReason" => {
                let raw = payload.field("code")?.expect_u32()?;
                Message::DisconnectReason {
                    code: DisconnectCode::from_code(raw).ok_or_else(|| DecodeError::InvalidField {
                        field: "code",
                        reason: format!("unknown disconnect code {}", raw),
                    })?,
                    message: payload
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                }
            }
            "playerJoin" => Message::PlayerJoin {
                player_id: payload.field("id")?.expect_u32()?,
            },
            "playerLeave" => Message::PlayerLeave {
                player_id: payload.field("id")?.expect_u32()?,
            },
            "disconnect" => Message::Disconnect,
            other => return Err(DecodeError::UnknownMessageType(other.to_string())),
        };
        Ok(message)
    }
}

fn envelope(kind: &str, payload: Value) -> Value {
    Value::map([("type", Value::from(kind)), ("payload", payload)])
}

fn snapshot_to_value(s: &Snapshot) -> Value {
    let mut encoded = snapshot::encode(s);
    encoded.removed = s.removed.clone();
    encoded.delta = s.delta;
    encoded.to_value()
}

fn ack_fields(payload: &Value) -> Result<(PlayerId, u32, String, u32), DecodeError> {
    Ok((
        payload.field("id")?.expect_u32()?,
        payload.field("tick")?.expect_u32()?,
        payload.field("sessionToken")?.expect_str()?.to_string(),
        payload.field("tickRate")?.expect_u32()?,
    ))
}

fn input_to_value(sequence: u32, timestamp: i64, input: &Input) -> Value {
    Value::map([
        ("sequence", Value::from(sequence)),
        ("timestamp", Value::Int(timestamp)),
        ("forward", Value::Bool(input.forward)),
        ("backward", Value::Bool(input.backward)),
        ("left", Value::Bool(input.left)),
        ("right", Value::Bool(input.right)),
        ("jump", Value::Bool(input.jump)),
        ("sprint", Value::Bool(input.sprint)),
        ("crouch", Value::Bool(input.crouch)),
        ("yaw", Value::Float(input.yaw)),
        ("pitch", Value::Float(input.pitch)),
        ("shoot", Value::Bool(input.shoot)),
        ("reload", Value::Bool(input.reload)),
    ])
}

fn input_from_value(payload: &Value) -> Result<(u32, i64, Input), DecodeError> {
    let flag = |name: &str| payload.get(name).and_then(Value::as_bool).unwrap_or(false);
    let angle = |name: &str| payload.get(name).and_then(Value::as_f64).unwrap_or(0.0);
    let input = Input {
        forward: flag("forward"),
        backward: flag("backward"),
        left: flag("left"),
        right: flag("right"),
        jump: flag("jump"),
        sprint: flag("sprint"),
        crouch: flag("crouch"),
        yaw: angle("yaw"),
        pitch: angle("pitch"),
        shoot: flag("shoot"),
        reload: flag("reload"),
    };
    Ok((
        payload.field("sequence")?.expect_u32()?,
        payload.get("timestamp").and_then(Value::as_i64).unwrap_or(0),
        input,
    ))
}

pub fn encode_message(message: &Message) -> Vec<u8> {
    wire::encode(&message.to_value())
}

/// Frames an already-encoded snapshot (full or delta) without a decode/re-encode pass.
pub fn encode_snapshot_message(encoded: &EncodedSnapshot) -> Vec<u8> {
    wire::encode(&envelope("snapshot", encoded.to_value()))
}

pub fn decode_message(bytes: &[u8]) -> Result<Message, DecodeError> {
    Message::from_value(&wire::decode(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::RecordId;
    use crate::EntityState;

    fn roundtrip(message: Message) -> Message {
        decode_message(&encode_message(&message)).unwrap()
    }

    #[test]
    fn test_connect_roundtrip() {
        let message = Message::Connect { client_version: 1 };
        assert_eq!(roundtrip(message.clone()), message);
    }

    #[test]
    fn test_handshake_roundtrip() {
        let message = Message::HandshakeAck {
            player_id: 7,
            tick: 1234,
            session_token: "abc123".to_string(),
            tick_rate: 60,
        };
        assert_eq!(roundtrip(message.clone()), message);
    }

    #[test]
    fn test_input_roundtrip() {
        let message = Message::Input {
            sequence: 99,
            timestamp: 1_700_000_000_000,
            input: Input {
                forward: true,
                sprint: true,
                yaw: 1.25,
                pitch: -0.5,
                shoot: true,
                ..Default::default()
            },
        };
        assert_eq!(roundtrip(message.clone()), message);
    }

    #[test]
    fn test_app_module_roundtrip() {
        let message = Message::AppModule {
            name: "doors".to_string(),
            code: vec![1, 2, 3, 250],
        };
        assert_eq!(roundtrip(message.clone()), message);
    }

    #[test]
    fn test_disconnect_reason_roundtrip() {
        let message = Message::DisconnectReason {
            code: DisconnectCode::SessionExpired,
            message: "token expired".to_string(),
        };
        assert_eq!(roundtrip(message.clone()), message);
        assert_eq!(roundtrip(Message::Disconnect), Message::Disconnect);
    }

    #[test]
    fn test_snapshot_message_keeps_delta_fields() {
        let snapshot = Snapshot {
            tick: 5,
            timestamp: 77,
            players: vec![PlayerState::new(3, [1.0, 0.0, 2.0])],
            entities: vec![EntityState::new("e", "m", [0.0; 3])],
            removed: vec![RecordId::Player(9)],
            delta: true,
        };
        match roundtrip(Message::Snapshot(snapshot)) {
            Message::Snapshot(decoded) => {
                assert!(decoded.delta);
                assert_eq!(decoded.removed, vec![RecordId::Player(9)]);
                assert_eq!(decoded.players[0].position, [1.0, 0.0, 2.0]);
                assert_eq!(decoded.entities[0].id, "e");
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_encoded_snapshot_framing_matches_message() {
        let snapshot = Snapshot {
            tick: 1,
            timestamp: 2,
            players: vec![PlayerState::new(1, [0.5, 0.0, 0.25])],
            ..Default::default()
        };
        let framed = encode_snapshot_message(&snapshot::encode(&snapshot));
        assert_eq!(framed, encode_message(&Message::Snapshot(snapshot)));
    }

    #[test]
    fn test_state_recovery_roundtrip() {
        let mut player = PlayerState::new(4, [3.0, 1.5, -2.0]);
        player.input_sequence = 12;
        let message = Message::StateRecovery {
            player: player.clone(),
            snapshot: Snapshot {
                tick: 40,
                timestamp: 9,
                players: vec![player],
                ..Default::default()
            },
            events: vec![Value::map([("id", Value::UInt(1))])],
        };
        match roundtrip(message) {
            Message::StateRecovery {
                player,
                snapshot,
                events,
            } => {
                assert_eq!(player.id, 4);
                assert_eq!(player.input_sequence, 12);
                assert_eq!(snapshot.tick, 40);
                assert_eq!(events.len(), 1);
            }
            other => panic!("expected recovery, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let bytes = wire::encode(&envelope("teleport", Value::Nil));
        assert_eq!(
            decode_message(&bytes),
            Err(DecodeError::UnknownMessageType("teleport".to_string()))
        );
    }

    #[test]
    fn test_missing_type_is_rejected() {
        let bytes = wire::encode(&Value::map([("payload", Value::Nil)]));
        assert_eq!(decode_message(&bytes), Err(DecodeError::MissingField("type")));
    }

    #[test]
    fn test_unknown_disconnect_code_is_rejected() {
        let bytes = wire::encode(&envelope(
            "disconnectReason",
            Value::map([("code", Value::UInt(200))]),
        ));
        assert!(matches!(
            decode_message(&bytes),
            Err(DecodeError::InvalidField { field: "code", .. })
        ));
    }

    #[test]
    fn test_garbage_bytes_are_rejected() {
        assert!(decode_message(&[0xc1, 0x00]).is_err());
    }
}
