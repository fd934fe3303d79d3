//! Performance benchmarks for the per-tick hot paths

use client::estimator::{EntityEstimator, EstimatorNoise, KalmanFilter};
use client::predictor::{ClientPredictor, PredictorConfig};
use server::game::{SimulationConfig, World};
use server::player_store::MemoryTransport;
use shared::movement::MovementConfig;
use shared::protocol::{decode_message, Message, PROTOCOL_VERSION};
use shared::snapshot::{self, Snapshot};
use shared::time::ManualClock;
use shared::wire::{self, Value};
use shared::{EntityState, Input, PlayerState};
use std::sync::Arc;
use std::time::Instant;

fn forward() -> Input {
    Input {
        forward: true,
        ..Default::default()
    }
}

fn crowd(count: u32) -> Vec<PlayerState> {
    (1..=count)
        .map(|id| {
            let mut player = PlayerState::new(id, [id as f64 * 1.5, 0.0, -(id as f64) * 0.75]);
            player.velocity = [1.25, 0.0, -3.5];
            player.input_sequence = id * 10;
            player
        })
        .collect()
}

/// Benchmarks a full authoritative tick with a busy server
#[test]
fn benchmark_world_tick() {
    let clock = ManualClock::new(0);
    let mut world = World::new(SimulationConfig::default(), Arc::new(clock.clone()));
    let transports: Vec<(u32, MemoryTransport)> = (0..32)
        .map(|_| {
            let transport = MemoryTransport::new();
            let id = world
                .connect(Box::new(transport.clone()), PROTOCOL_VERSION)
                .unwrap();
            (id, transport)
        })
        .collect();

    let iterations = 300u32;
    let start = Instant::now();

    for sequence in 1..=iterations {
        for (id, _) in &transports {
            world.handle_message(
                *id,
                Message::Input {
                    sequence,
                    timestamp: 0,
                    input: Input {
                        yaw: f64::from(*id) * 0.2,
                        ..forward()
                    },
                },
            );
        }
        world.tick();
        clock.advance(16);
        for (_, transport) in &transports {
            transport.take_frames();
        }
    }

    let duration = start.elapsed();
    let per_tick = duration.as_micros() as f64 / f64::from(iterations);
    println!(
        "World tick (32 players): {} ticks in {:?} ({:.2} μs/tick)",
        iterations, duration, per_tick
    );

    // One 60 Hz tick is 16.6ms
    assert!(per_tick < 16_600.0);
    assert_eq!(world.player_count(), 32);
}

/// Benchmarks full snapshot encode and decode through the wire codec
#[test]
fn benchmark_snapshot_codec() {
    let snapshot = Snapshot {
        tick: 42,
        timestamp: 1_000,
        players: crowd(64),
        entities: (0..32)
            .map(|i| EntityState::new(format!("crate-{}", i), "crate.glb", [i as f64, 0.5, 2.0]))
            .collect(),
        ..Default::default()
    };

    let iterations = 1_000;
    let start = Instant::now();
    let mut bytes = 0;

    for _ in 0..iterations {
        let encoded = wire::encode(&snapshot::encode(&snapshot).to_value());
        bytes = encoded.len();
        let decoded = snapshot::decode(&wire::decode(&encoded).unwrap()).unwrap();
        assert_eq!(decoded.players.len(), 64);
    }

    let duration = start.elapsed();
    println!(
        "Snapshot codec: {} round trips of {} bytes in {:?} ({:.2} μs/iter)",
        iterations,
        bytes,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 5_000);
}

/// Benchmarks delta encoding when most records are unchanged
#[test]
fn benchmark_delta_encoding() {
    let mut snapshot = Snapshot {
        players: crowd(64),
        ..Default::default()
    };
    let mut keys = snapshot::keys_for(&snapshot);

    let iterations = 1_000;
    let start = Instant::now();
    let mut changed = 0;

    for tick in 0..iterations {
        snapshot.tick = tick;
        snapshot.players[(tick % 64) as usize].position[0] += 0.5;
        let (encoded, next) = snapshot::encode_delta(&snapshot, &keys);
        changed += encoded.players.len();
        keys = next;
    }

    let duration = start.elapsed();
    println!(
        "Delta encoding: {} snapshots in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(changed, iterations as usize);
    assert!(duration.as_millis() < 5_000);
}

/// Benchmarks message framing for inputs, the most frequent client message
#[test]
fn benchmark_input_messages() {
    let iterations = 100_000u32;
    let start = Instant::now();

    for sequence in 0..iterations {
        let bytes = shared::protocol::encode_message(&Message::Input {
            sequence,
            timestamp: 1_700_000_000_000,
            input: forward(),
        });
        let decoded = decode_message(&bytes).unwrap();
        assert!(matches!(decoded, Message::Input { .. }));
    }

    let duration = start.elapsed();
    println!(
        "Input messages: {} round trips in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / f64::from(iterations)
    );

    assert!(duration.as_millis() < 5_000);
}

/// Benchmarks a full-history replay on the client
#[test]
fn benchmark_predictor_replay() {
    let mut predictor = ClientPredictor::new(1, MovementConfig::default(), 60, PredictorConfig::default());
    predictor.reset_local(PlayerState::new(1, [0.0; 3]));

    let iterations = 1_000;
    let start = Instant::now();

    for round in 0..iterations {
        for _ in 0..60 {
            predictor.predict(forward());
        }
        // Far enough off to force a replay of everything still pending.
        let mut sample = predictor.local_state().unwrap().clone();
        sample.input_sequence -= 59;
        sample.position[0] += 10.0 + round as f64;
        let snapshot = Snapshot {
            tick: round + 1,
            players: vec![sample],
            ..Default::default()
        };
        predictor.on_server_snapshot(&snapshot);
    }

    let duration = start.elapsed();
    println!(
        "Predictor replay: {} replays in {:?} ({:.2} μs/replay)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(predictor.replay_count(), u64::from(iterations));
    assert!(duration.as_millis() < 5_000);
}

/// Benchmarks estimator predict/update cycles
#[test]
fn benchmark_estimators() {
    let mut filter = KalmanFilter::new(1.0, 0.01);
    let mut estimator = EntityEstimator::new(EstimatorNoise::default());
    let dt = 1.0 / 60.0;

    let iterations = 100_000;
    let start = Instant::now();

    for step in 0..iterations {
        let t = step as f64 * dt;
        filter.predict(dt);
        filter.update(2.0 * t);
        estimator.predict(dt);
        if step % 3 == 0 {
            estimator.observe([t, 0.0, -t], [1.0, 0.0, -1.0], shared::math::quat_from_yaw(t), 3.0 * dt);
        }
    }

    let duration = start.elapsed();
    println!(
        "Estimators: {} cycles in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert!(filter.x.is_finite());
    assert!(estimator.position()[0].is_finite());
    assert!(duration.as_millis() < 5_000);
}

/// Benchmarks wire encoding of a large mixed document
#[test]
fn benchmark_wire_codec() {
    let value = Value::map([
        ("items", Value::Array((0..10_000u32).map(Value::from).collect())),
        ("floats", Value::Array((0..1_000).map(|i| Value::Float(i as f64 * 0.25)).collect())),
        ("blob", Value::Bin(vec![7u8; 4096])),
    ]);

    let iterations = 100;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = wire::encode(&value);
        let decoded = wire::decode(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    let duration = start.elapsed();
    println!(
        "Wire codec: {} round trips in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert!(duration.as_millis() < 5_000);
}
