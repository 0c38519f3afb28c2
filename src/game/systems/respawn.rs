//! Death handling, respawn timers and spawn-point selection

use std::time::Instant;

use rand::Rng;

use crate::game::constants::spawn;
use crate::game::game_loop::GameLoopEvent;
use crate::game::state::{Arena, LifeState, SessionId, World};
use crate::game::systems::obstacles::ObstacleField;
use crate::util::vec2::Vec2;

/// Whether a tank could stand at `point` without overlapping an obstacle
pub fn is_clear(obstacles: &ObstacleField, arena: &Arena, point: Vec2) -> bool {
    let inset = spawn::EDGE_INSET;
    point.is_finite()
        && point.x >= inset
        && point.x <= arena.width - inset
        && point.y >= inset
        && point.y <= arena.height - inset
        && obstacles.check_collision(point, spawn::CLEARANCE_RADIUS).is_none()
}

/// Rejection-sample a clear spawn point; the last sample is used if none is clear
pub fn find_spawn_point<R: Rng>(obstacles: &ObstacleField, arena: &Arena, rng: &mut R) -> Vec2 {
    let inset = spawn::EDGE_INSET;
    let mut candidate = Vec2::new(arena.width / 2.0, arena.height / 2.0);

    for _ in 0..spawn::MAX_ATTEMPTS {
        candidate = Vec2::new(
            rng.gen_range(inset..arena.width - inset),
            rng.gen_range(inset..arena.height - inset),
        );
        if obstacles.check_collision(candidate, spawn::CLEARANCE_RADIUS).is_none() {
            return candidate;
        }
    }
    candidate
}

/// Spawn point for a joining player: their last position if still clear, else a sampled one
pub fn initial_spawn_point(world: &mut World, last_position: Option<Vec2>) -> Vec2 {
    match last_position {
        Some(p) if is_clear(&world.obstacles, &world.arena, p) => p,
        _ => find_spawn_point(&world.obstacles, &world.arena, &mut world.rng),
    }
}

/// ALIVE -> DEAD: credit the killer, take the victim out of the grid and arm the timer
pub fn kill(
    world: &mut World,
    victim_id: SessionId,
    killer_id: SessionId,
    now: Instant,
    events: &mut Vec<GameLoopEvent>,
) {
    let Some(victim) = world.sessions.get_mut(&victim_id) else {
        return;
    };
    if !victim.is_alive() {
        return;
    }

    victim.health = 0.0;
    victim.stats.deaths += 1;
    victim.life = LifeState::Dead {
        respawn_at: now + spawn::RESPAWN_DELAY,
    };
    victim.effects.clear();
    world.player_grid.remove(victim_id);

    let credited = match world.sessions.get_mut(&killer_id) {
        Some(killer) if killer_id != victim_id => {
            killer.score += 1;
            killer.stats.kills += 1;
            Some(killer_id)
        }
        _ => None,
    };

    events.push(GameLoopEvent::PlayerKilled {
        killer_id: credited,
        victim_id,
    });
}

/// Move freshly dead sessions into the waiting state and fire due respawns
pub fn advance(world: &mut World, now: Instant, events: &mut Vec<GameLoopEvent>) {
    let mut due = Vec::new();

    for session in world.sessions.values_mut() {
        match session.life {
            LifeState::Alive => {}
            LifeState::Dead { respawn_at } | LifeState::PendingRespawn { respawn_at } => {
                session.life = LifeState::PendingRespawn { respawn_at };
                if now >= respawn_at {
                    due.push(session.id);
                }
            }
        }
    }

    for session_id in due {
        if let Some(position) = respawn(world, session_id, now) {
            events.push(GameLoopEvent::PlayerRespawned { session_id, position });
        }
    }
}

/// PENDING_RESPAWN -> ALIVE at a freshly sampled point
pub fn respawn(world: &mut World, session_id: SessionId, now: Instant) -> Option<Vec2> {
    if !world.sessions.get(&session_id).is_some_and(|s| !s.is_alive()) {
        return None;
    }

    let position = find_spawn_point(&world.obstacles, &world.arena, &mut world.rng);
    let session = world.sessions.get_mut(&session_id)?;
    session.position = position;
    session.health = session.max_health;
    session.life = LifeState::Alive;
    session.last_regen = now;
    session.last_shot = None;

    let bounds = session.bounds();
    world.player_grid.insert(session_id, bounds);
    Some(position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::arena;
    use crate::game::state::test_support::*;
    use crate::game::systems::obstacles::ObstacleKind;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;

    #[test]
    fn test_spawn_point_avoids_obstacles() {
        let mut rng = StdRng::seed_from_u64(9);
        let obstacles = ObstacleField::generate(arena::WIDTH, arena::HEIGHT, &mut rng);
        let field_arena = Arena::default();

        for _ in 0..50 {
            let p = find_spawn_point(&obstacles, &field_arena, &mut rng);
            assert!(p.x >= 100.0 && p.x < 3900.0 && p.y >= 100.0 && p.y < 2900.0);
            assert!(obstacles.check_collision(p, spawn::CLEARANCE_RADIUS).is_none());
        }
    }

    #[test]
    fn test_spawn_point_falls_back_when_blocked() {
        let mut obstacles = ObstacleField::empty();
        obstacles.add(Vec2::new(2000.0, 1500.0), 4000.0, 3000.0, ObstacleKind::Wall, None);
        let p = find_spawn_point(&obstacles, &Arena::default(), &mut StdRng::seed_from_u64(1));
        assert!(p.x >= 100.0 && p.x < 3900.0);
    }

    #[test]
    fn test_kill_then_respawn_after_delay() {
        let now = Instant::now();
        let mut world = open_world(now);
        let killer = spawn_at(&mut world, Vec2::new(500.0, 500.0), now);
        let victim = spawn_at(&mut world, Vec2::new(600.0, 500.0), now);

        let mut events = Vec::new();
        kill(&mut world, victim, killer, now, &mut events);
        assert!(matches!(world.session(victim).unwrap().life, LifeState::Dead { .. }));

        advance(&mut world, now + Duration::from_millis(33), &mut events);
        assert!(matches!(
            world.session(victim).unwrap().life,
            LifeState::PendingRespawn { .. }
        ));
        assert!(!world.player_grid.contains(victim));

        events.clear();
        advance(&mut world, now + Duration::from_secs(39), &mut events);
        assert!(events.is_empty());

        advance(&mut world, now + Duration::from_secs(40), &mut events);
        let session = world.session(victim).unwrap();
        assert!(session.is_alive());
        assert_eq!(session.health, session.max_health);
        assert!(world.player_grid.contains(victim));
        assert!(matches!(events[0], GameLoopEvent::PlayerRespawned { session_id, .. } if session_id == victim));
    }

    #[test]
    fn test_kill_is_once() {
        let now = Instant::now();
        let mut world = open_world(now);
        let killer = spawn_at(&mut world, Vec2::new(500.0, 500.0), now);
        let victim = spawn_at(&mut world, Vec2::new(600.0, 500.0), now);

        let mut events = Vec::new();
        kill(&mut world, victim, killer, now, &mut events);
        kill(&mut world, victim, killer, now, &mut events);
        assert_eq!(events.len(), 1);
        assert_eq!(world.session(killer).unwrap().score, 1);
        assert_eq!(world.session(victim).unwrap().stats.deaths, 1);
    }

    #[test]
    fn test_kill_by_departed_player_has_no_credit() {
        let now = Instant::now();
        let mut world = open_world(now);
        let killer = spawn_at(&mut world, Vec2::new(500.0, 500.0), now);
        let victim = spawn_at(&mut world, Vec2::new(600.0, 500.0), now);
        world.remove_session(killer);

        let mut events = Vec::new();
        kill(&mut world, victim, killer, now, &mut events);
        assert!(matches!(events[0], GameLoopEvent::PlayerKilled { killer_id: None, .. }));
    }

    #[test]
    fn test_respawn_of_missing_session_is_noop() {
        let now = Instant::now();
        let mut world = open_world(now);
        assert!(respawn(&mut world, uuid::Uuid::new_v4(), now).is_none());
    }

    #[test]
    fn test_initial_spawn_prefers_last_position() {
        let now = Instant::now();
        let mut world = open_world(now);
        let last = Vec2::new(1234.0, 987.0);
        assert_eq!(initial_spawn_point(&mut world, Some(last)), last);

        world.obstacles.add(last, 50.0, 50.0, ObstacleKind::Rock, None);
        assert_ne!(initial_spawn_point(&mut world, Some(last)), last);
    }
}
