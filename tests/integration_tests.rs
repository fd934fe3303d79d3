//! Integration tests for the state-sync core
//!
//! These tests validate cross-component interactions: the server tick feeding
//! the snapshot codec feeding the client predictor, and real UDP behavior.

use assert_approx_eq::assert_approx_eq;
use client::estimator::KalmanFilter;
use client::network::{Client, ClientOptions};
use client::predictor::{ClientPredictor, PredictorConfig, Reconciliation};
use server::game::{SimulationConfig, World};
use server::network::{Server, ServerMessage};
use server::player_store::MemoryTransport;
use shared::math;
use shared::movement::{MovementConfig, MovementRule};
use shared::protocol::{decode_message, Message, PROTOCOL_VERSION};
use shared::snapshot::Snapshot;
use shared::time::ManualClock;
use shared::{Input, PlayerId};
use std::sync::Arc;
use std::time::Duration;

const DT: f64 = 1.0 / 60.0;

fn forward() -> Input {
    Input {
        forward: true,
        ..Default::default()
    }
}

fn world_with(config: SimulationConfig) -> (World, ManualClock) {
    let clock = ManualClock::new(1_000_000);
    let world = World::new(config, Arc::new(clock.clone()));
    (world, clock)
}

fn join(world: &mut World) -> (PlayerId, MemoryTransport) {
    let transport = MemoryTransport::new();
    let id = world
        .connect(Box::new(transport.clone()), PROTOCOL_VERSION)
        .expect("join accepted");
    (id, transport)
}

fn decode_all(transport: &MemoryTransport) -> Vec<Message> {
    transport
        .take_frames()
        .iter()
        .map(|frame| decode_message(frame).expect("server frames decode"))
        .collect()
}

fn snapshots(messages: Vec<Message>) -> Vec<Snapshot> {
    messages
        .into_iter()
        .filter_map(|message| match message {
            Message::Snapshot(snapshot) => Some(snapshot),
            _ => None,
        })
        .collect()
}

/// MOVEMENT SCENARIOS
mod movement_scenarios {
    use super::*;

    /// Sustained forward input accelerates toward max speed
    #[test]
    fn forward_acceleration_through_world() {
        let (mut world, clock) = world_with(SimulationConfig::default());
        let (id, _transport) = join(&mut world);

        let mut speeds = Vec::new();
        for sequence in 1..=180 {
            world.handle_message(
                id,
                Message::Input {
                    sequence,
                    timestamp: 0,
                    input: forward(),
                },
            );
            world.tick();
            clock.advance(16);
            speeds.push(world.player(id).unwrap().horizontal_speed());
        }

        assert_approx_eq!(speeds[0], 0.6667, 0.6667 * 0.01);
        assert!(speeds[5] >= 3.9);
        assert_approx_eq!(speeds[179], 4.0, 1e-9);
    }

    /// Releasing input at full speed bleeds off to rest under friction
    #[test]
    fn friction_stops_released_player() {
        let config = MovementConfig::default();
        let mut velocity = [0.0, 0.0, -4.0];
        let mut stopped_at = None;

        for tick in 1..=40 {
            velocity = config.apply(velocity, true, None, DT);
            if math::horizontal_length(velocity) < 0.05 {
                stopped_at = Some(tick);
                break;
            }
        }

        let stopped_at = stopped_at.expect("player comes to rest");
        assert!(stopped_at <= 21, "stopped after {} ticks", stopped_at);
        assert!(stopped_at > 10, "stopped too early at tick {}", stopped_at);
    }

    /// Server and client integrate identical inputs identically
    #[test]
    fn client_and_server_steps_agree() {
        let (mut world, _clock) = world_with(SimulationConfig::default());
        let (id, _transport) = join(&mut world);
        let mut predictor = ClientPredictor::new(id, MovementConfig::default(), 60, PredictorConfig::default());
        predictor.reset_local(world.player(id).unwrap().clone());

        let script = [forward(), forward(), Input { jump: true, forward: true, ..Default::default() }, forward()];
        for input in script.iter().cycle().take(40) {
            let stamped = predictor.predict(*input);
            world.handle_message(
                id,
                Message::Input {
                    sequence: stamped.sequence,
                    timestamp: stamped.timestamp,
                    input: stamped.input,
                },
            );
            world.tick();
        }

        let server = world.player(id).unwrap();
        let local = predictor.local_state().unwrap();
        for axis in 0..3 {
            assert_approx_eq!(server.position[axis], local.position[axis], 1e-12);
            assert_approx_eq!(server.velocity[axis], local.velocity[axis], 1e-12);
        }
        assert_eq!(server.on_ground, local.on_ground);
        assert_eq!(server.input_sequence, local.input_sequence);
    }
}

/// CLIENT-SERVER INTEGRATION TESTS
mod client_server_tests {
    use super::*;

    /// Handshake order seen by a joining client
    #[test]
    fn connect_sequence_order() {
        let (mut world, _clock) = world_with(SimulationConfig::default());
        let (id, transport) = join(&mut world);

        let messages = decode_all(&transport);
        assert!(matches!(messages[0], Message::HandshakeAck { player_id, .. } if player_id == id));
        assert!(matches!(messages[1], Message::WorldDefinition { .. }));
        match &messages[2] {
            Message::Snapshot(snapshot) => {
                assert!(!snapshot.delta);
                assert!(snapshot.player(id).is_some());
            }
            other => panic!("expected full snapshot, got {:?}", other),
        }
    }

    /// Lockstep prediction against real snapshots never needs a correction
    #[test]
    fn lockstep_prediction_stays_reconciled() {
        let (mut world, _clock) = world_with(SimulationConfig::default());
        let (id, transport) = join(&mut world);
        let mut predictor = ClientPredictor::new(id, MovementConfig::default(), 60, PredictorConfig::default());

        for snapshot in snapshots(decode_all(&transport)) {
            predictor.on_server_snapshot(&snapshot);
        }
        assert!(predictor.local_state().is_some());

        for _ in 0..90 {
            let stamped = predictor.predict(forward());
            world.handle_message(
                id,
                Message::Input {
                    sequence: stamped.sequence,
                    timestamp: stamped.timestamp,
                    input: stamped.input,
                },
            );
            world.tick();

            for snapshot in snapshots(decode_all(&transport)) {
                let outcome = predictor.on_server_snapshot(&snapshot);
                assert!(
                    matches!(outcome, None | Some(Reconciliation::None)),
                    "unexpected correction {:?} at tick {}",
                    outcome,
                    snapshot.tick
                );
            }
        }

        assert_eq!(predictor.replay_count(), 0);
        let server = world.player(id).unwrap().position;
        let local = predictor.local_state().unwrap().position;
        assert!(math::distance(server, local) < 1e-9);
    }

    /// A client predicting with the wrong tunables is pulled back by the server
    #[test]
    fn mismatched_prediction_is_corrected() {
        let (mut world, _clock) = world_with(SimulationConfig::default());
        let (id, transport) = join(&mut world);
        let wrong = MovementConfig {
            max_speed: 16.0,
            ..Default::default()
        };
        let config = PredictorConfig::default();
        let mut predictor = ClientPredictor::new(id, wrong, 60, config);

        for snapshot in snapshots(decode_all(&transport)) {
            predictor.on_server_snapshot(&snapshot);
        }

        let mut corrections = 0;
        for _ in 0..120 {
            let stamped = predictor.predict(forward());
            world.handle_message(
                id,
                Message::Input {
                    sequence: stamped.sequence,
                    timestamp: stamped.timestamp,
                    input: stamped.input,
                },
            );
            world.tick();

            for snapshot in snapshots(decode_all(&transport)) {
                if let Some(Reconciliation::Minor | Reconciliation::Major) = predictor.on_server_snapshot(&snapshot) {
                    corrections += 1;
                }
            }

            let server = world.player(id).unwrap().position;
            let local = predictor.local_state().unwrap().position;
            assert!(math::distance(server, local) < config.major_threshold + 0.2);
        }

        assert!(corrections > 0);
        assert!(predictor.replay_count() > 0);
    }

    /// Remote players appear in the display state and keep moving between snapshots
    #[test]
    fn remote_player_is_smoothed() {
        let (mut world, _clock) = world_with(SimulationConfig::default());
        let (watcher, transport) = join(&mut world);
        let (runner, _runner_transport) = join(&mut world);
        let mut predictor = ClientPredictor::new(watcher, MovementConfig::default(), 60, PredictorConfig::default());

        for sequence in 1..=60 {
            world.handle_message(
                runner,
                Message::Input {
                    sequence,
                    timestamp: 0,
                    input: forward(),
                },
            );
            world.tick();
            for snapshot in snapshots(decode_all(&transport)) {
                predictor.on_server_snapshot(&snapshot);
            }
            predictor.get_display_state(world.current_tick(), 0);
        }

        let before = predictor.get_display_state(world.current_tick(), 1);
        let after = predictor.get_display_state(world.current_tick(), 2);
        assert_eq!(before.remotes.len(), 1);
        let moved = after.remotes[0].position[2] - before.remotes[0].position[2];
        assert!(moved < 0.0, "remote should keep moving forward, moved {}", moved);
        assert_approx_eq!(before.remotes[0].position[2], world.player(runner).unwrap().position[2], 0.2);
    }
}

/// ESTIMATOR AND HISTORY PROPERTIES
mod property_tests {
    use super::*;
    use server::lag_compensation::{LagCompensationConfig, LagCompensator};
    use shared::QUAT_IDENTITY;

    /// Corrections always shrink the error left by a predict-only stretch
    #[test]
    fn kalman_update_reduces_error() {
        let velocity = 2.5;
        let period = 4;
        for &(q, r) in &[(0.01, 0.01), (1.0, 0.1), (0.1, 5.0), (10.0, 0.001)] {
            let mut filter = KalmanFilter::new(q, r);
            let mut truth = 1.0;

            for step in 1..=200 {
                truth += velocity * DT;
                filter.predict(DT);
                if step % period == 0 {
                    let before = (filter.x - truth).abs();
                    filter.update(truth);
                    let after = (filter.x - truth).abs();
                    if before > 1e-12 {
                        assert!(after < before, "q={} r={} step={}: {} !< {}", q, r, step, after, before);
                    }
                }
            }
        }
    }

    /// Rewinding never yields a future sample
    #[test]
    fn lag_compensator_monotonicity() {
        let clock = ManualClock::new(10_000);
        let config = LagCompensationConfig::default();
        let mut lag = LagCompensator::new(config, Arc::new(clock.clone()));

        for tick in 1..=60u32 {
            lag.record(1, [f64::from(tick), 0.0, 0.0], QUAT_IDENTITY, [0.0; 3], tick);
            clock.advance(16);
        }
        clock.advance(-16);

        let newest = lag.state_at_time(1, 0).unwrap();
        assert_eq!(newest.tick, 60);

        match lag.state_at_time(1, config.window_ms) {
            None => {}
            Some(entry) => {
                assert!(entry.timestamp <= 10_000 + 59 * 16 - config.window_ms);
                assert!(entry.tick < newest.tick);
            }
        }

        let mut previous_tick = u32::MAX;
        for millis_ago in (0..=config.window_ms).step_by(16) {
            if let Some(entry) = lag.state_at_time(1, millis_ago) {
                assert!(entry.tick <= previous_tick);
                previous_tick = entry.tick;
            }
        }
    }

    /// Large mixed payload survives the wire codec byte for byte
    #[test]
    fn wire_codec_large_payload() {
        use shared::wire::{self, Value};

        let value = Value::map([
            ("items", Value::Array((0..70_000u32).map(Value::from).collect())),
            ("label", Value::from("x".repeat(300))),
            ("offset", Value::Int(-2_000_000_000)),
        ]);

        let bytes = wire::encode(&value);
        let decoded = wire::decode(&bytes).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(wire::encode(&decoded), bytes);
    }
}

/// REAL NETWORK TESTS
mod network_tests {
    use super::*;
    use client::input::InputPattern;

    /// Full handshake and snapshot stream over loopback UDP
    #[tokio::test]
    async fn udp_handshake_and_snapshots() {
        let mut server = Server::new("127.0.0.1:0", SimulationConfig::default()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let control = server.control();

        let mut client = Client::new(ClientOptions {
            server: addr.to_string(),
            pattern: InputPattern::Forward,
            duration: Some(Duration::from_millis(600)),
            ..Default::default()
        })
        .await
        .unwrap();

        let (server_result, client_result) = tokio::join!(server.run(), async {
            let result = client.run().await;
            let _ = control.send(ServerMessage::Shutdown);
            result
        });

        assert!(server_result.is_ok());
        assert!(client_result.is_ok());
        assert_eq!(client.player_id(), Some(1));
        assert!(client.stats().inputs_sent > 0);
        assert!(client.stats().snapshots > 0);
        assert!(client.world().player(1).is_some());
        assert!(client.predictor().and_then(|p| p.local_state()).is_some());
    }

    /// A wrong protocol version is refused with a reason, not silence
    #[tokio::test]
    async fn version_mismatch_is_refused() {
        let mut server = Server::new("127.0.0.1:0", SimulationConfig::default()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let control = server.control();

        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let probe = async {
            let hello = shared::protocol::encode_message(&Message::Connect {
                client_version: PROTOCOL_VERSION + 1,
            });
            socket.send_to(&hello, addr).await.unwrap();

            let mut buffer = vec![0u8; 2048];
            let received = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buffer)).await;
            let _ = control.send(ServerMessage::Shutdown);
            let (len, _) = received.expect("reply before timeout").unwrap();
            decode_message(&buffer[..len]).unwrap()
        };

        let (server_result, reply) = tokio::join!(server.run(), probe);
        assert!(server_result.is_ok());
        match reply {
            Message::DisconnectReason { code, .. } => {
                assert_eq!(code, shared::protocol::DisconnectCode::VersionMismatch)
            }
            other => panic!("expected disconnect reason, got {:?}", other),
        }
        assert_eq!(server.world().player_count(), 0);
    }
}
