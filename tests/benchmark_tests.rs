//! Performance benchmarks for critical server systems

use bincode::{deserialize, serialize};
use server::config::GameConfig;
use server::game::GameState;
use server::physics::{ArcadePhysics, BodyProperties, PhysicsBackend};
use shared::{
    Direction, GameSnapshot, JoinGameRequest, Packet, PlayerSnapshot, XDirection, YDirection,
    GAME_HEIGHT, GAME_WIDTH, GRAVITY,
};
use std::time::{Duration, Instant};

const DT: f32 = 0.05;

fn direction_for(i: usize) -> Direction {
    let horizontal = match i % 3 {
        0 => XDirection::Left,
        1 => XDirection::Right,
        _ => XDirection::None,
    };
    let vertical = if i % 2 == 0 {
        YDirection::Up
    } else {
        YDirection::None
    };
    Direction::new(horizontal, vertical)
}

/// Benchmarks full ticks with a busy match
#[test]
fn benchmark_busy_match_ticks() {
    let mut game = GameState::initialize(GameConfig::default());
    for i in 0..16 {
        game.join_game(&format!("player-{}", i), &JoinGameRequest)
            .unwrap();
    }

    let iterations = 200;
    let start = Instant::now();

    for tick in 0..iterations {
        if tick % 20 == 0 {
            for i in 0..16 {
                let direction = direction_for(i + tick / 20);
                game.set_direction(&format!("player-{}", i), &direction)
                    .unwrap();
            }
        }
        game.on_tick(DT);
    }

    let duration = start.elapsed();
    println!(
        "Busy match: {} ticks with 16 players in {:?} ({:.2} ms/tick)",
        iterations,
        duration,
        duration.as_secs_f64() * 1000.0 / iterations as f64
    );

    assert_eq!(game.get_user_state("player-0").players.len(), 16);
    // Should complete in under 5 seconds even unoptimized
    assert!(duration < Duration::from_secs(5));
}

/// Benchmarks the idle early exit on a settled world
#[test]
fn benchmark_idle_ticks() {
    let mut game = GameState::initialize(GameConfig::default());
    game.join_game("resting", &JoinGameRequest).unwrap();
    for _ in 0..200 {
        game.on_tick(DT);
    }
    let settled = game.get_user_state("resting");

    let iterations = 100_000;
    let start = Instant::now();

    for _ in 0..iterations {
        game.on_tick(DT);
    }

    let duration = start.elapsed();
    println!(
        "Idle ticks: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert_eq!(game.get_user_state("resting"), settled);
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks raw physics stepping with many falling bodies over a floor
#[test]
fn benchmark_physics_advance() {
    let mut physics = ArcadePhysics::new(GAME_WIDTH, GAME_HEIGHT, GRAVITY);
    let floor = physics.create_body(0.0, 560.0, GAME_WIDTH, 40.0);
    physics.set_body_properties(floor, BodyProperties::STATIC);

    for i in 0..20 {
        let body = physics.create_body(i as f32 * 40.0, 0.0, 32.0, 32.0);
        physics.set_body_properties(body, BodyProperties::CHARACTER);
        physics.add_collider(body, floor);
    }

    let iterations = 500;
    let start = Instant::now();

    for _ in 0..iterations {
        physics.advance(Duration::from_millis(50));
    }

    let duration = start.elapsed();
    println!(
        "Physics advance: {} steps with {} bodies in {:?}",
        iterations,
        physics.body_count(),
        duration
    );

    assert!(duration.as_millis() < 2000);
}

/// Benchmarks snapshot packet serialization
#[test]
fn benchmark_snapshot_serialization() {
    let state = GameSnapshot {
        players: (0..32)
            .map(|i| PlayerSnapshot {
                id: format!("anon-{:08x}", i),
                x: i as f32 * 20.0,
                y: 568.0,
                horizontal_direction: XDirection::Right,
                vertical_direction: YDirection::None,
            })
            .collect(),
    };
    let packet = Packet::GameState {
        tick: 1,
        timestamp: 1234567890,
        state,
    };

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let data = serialize(&packet).unwrap();
        let _: Packet = deserialize(&data).unwrap();
    }

    let duration = start.elapsed();
    let size = serialize(&packet).unwrap().len();
    println!(
        "Snapshot serialization: {} round trips of {} bytes in {:?}",
        iterations, size, duration
    );

    // Must fit the server's receive buffer
    assert!(size < 2048);
    assert!(duration.as_millis() < 2000);
}
