//! Scalability benchmarks for the arena server
//!
//! Measures the tick, delta and grid costs at growing player counts against
//! the 33ms tick budget.
//!
//! Run with: cargo bench --bench scalability

use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use arena_combat_server::game::game_loop::GameLoop;
use arena_combat_server::game::spatial::Aabb;
use arena_combat_server::game::state::{Session, World};
use arena_combat_server::game::systems::respawn::find_spawn_point;
use arena_combat_server::net::delta::DeltaCompressor;
use arena_combat_server::net::protocol::{encode, MoveInput, ServerMessage};
use arena_combat_server::store::AccountRecord;

const PLAYER_COUNTS: [usize; 4] = [10, 50, 100, 250];
const TICK: Duration = Duration::from_millis(33);

/// A seeded world with `count` players spread over clear spawn points
fn create_world_with_players(count: usize, now: Instant) -> World {
    let mut world = World::with_seed(7, now);
    let mut rng = StdRng::seed_from_u64(11);

    for i in 0..count {
        let account = AccountRecord::new(format!("bench-{}", i), format!("Player{}", i));
        let position = find_spawn_point(&world.obstacles, &world.arena, &mut rng);
        let mut session = Session::new(Uuid::new_v4(), &account, position, now);
        session.heading = rng.gen_range(0.0..std::f32::consts::TAU);
        world.insert_session(session);
    }

    world
}

/// Every player fires, then the world advances one tick per iteration
fn bench_full_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_tick");
    group.sample_size(30);

    for count in PLAYER_COUNTS {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let start = Instant::now();
            let mut game = GameLoop::new(create_world_with_players(count, start));
            let ids: Vec<_> = game.state.sessions.keys().copied().collect();
            let mut now = start;

            b.iter(|| {
                now += TICK;
                for id in &ids {
                    game.handle_shoot(*id, now);
                }
                black_box(game.tick(now))
            });
        });
    }

    group.finish();
}

/// Movement input applied to every player
fn bench_movement(c: &mut Criterion) {
    let mut group = c.benchmark_group("movement");
    group.sample_size(50);

    let input = MoveInput {
        up: true,
        left: true,
        ..Default::default()
    };

    for count in PLAYER_COUNTS {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let mut game = GameLoop::new(create_world_with_players(count, Instant::now()));
            let ids: Vec<_> = game.state.sessions.keys().copied().collect();

            b.iter(|| {
                for id in &ids {
                    black_box(game.handle_move(*id, input));
                }
            });
        });
    }

    group.finish();
}

/// Snapshot, diff and encode after one tick of motion
fn bench_delta_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta_encode");
    group.sample_size(50);

    for count in PLAYER_COUNTS {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let start = Instant::now();
            let mut game = GameLoop::new(create_world_with_players(count, start));
            let ids: Vec<_> = game.state.sessions.keys().copied().collect();
            let mut compressor = DeltaCompressor::new();
            compressor.compress_world(&game.state);
            let mut now = start;
            let mut flip = false;

            b.iter(|| {
                now += TICK;
                flip = !flip;
                let input = MoveInput {
                    up: flip,
                    down: !flip,
                    ..Default::default()
                };
                for id in &ids {
                    game.handle_move(*id, input);
                }
                game.tick(now);
                let delta = compressor.compress_world(&game.state);
                black_box(encode(&ServerMessage::DeltaState(delta)))
            });
        });
    }

    group.finish();
}

/// Grid rebuild plus a query around every entry
fn bench_spatial_grid(c: &mut Criterion) {
    use arena_combat_server::game::spatial::SpatialGrid;

    let mut group = c.benchmark_group("spatial_grid");
    group.sample_size(50);

    for count in PLAYER_COUNTS {
        let mut rng = StdRng::seed_from_u64(3);
        let entries: Vec<(u64, Aabb)> = (0..count as u64)
            .map(|id| {
                let x = rng.gen_range(0.0..4000.0);
                let y = rng.gen_range(0.0..3000.0);
                (id, Aabb::new(x - 20.0, y - 20.0, 40.0, 40.0))
            })
            .collect();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &entries, |b, entries| {
            b.iter(|| {
                let mut grid = SpatialGrid::new(200.0);
                for (id, bounds) in entries {
                    grid.insert(*id, *bounds);
                }
                let mut hits = 0;
                for (_, bounds) in entries {
                    hits += grid.query_area(bounds).len();
                }
                black_box(hits)
            });
        });
    }

    group.finish();
}

/// The full tick against the 33ms budget at the largest size
fn bench_tick_budget(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick_budget");
    group.sample_size(100);
    group.measurement_time(Duration::from_secs(10));

    let count = PLAYER_COUNTS[PLAYER_COUNTS.len() - 1];
    group.bench_function(BenchmarkId::new("tick_and_delta", count), |b| {
        let start = Instant::now();
        let mut game = GameLoop::new(create_world_with_players(count, start));
        let mut compressor = DeltaCompressor::new();
        let mut now = start;

        b.iter(|| {
            now += TICK;
            let events = game.tick(now);
            let delta = compressor.compress_world(&game.state);
            black_box((events, delta))
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_full_tick,
    bench_movement,
    bench_delta_encode,
    bench_spatial_grid,
    bench_tick_budget,
);
criterion_main!(benches);
