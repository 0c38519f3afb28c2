//! Per-message tank movement
//!
//! Movement is applied as each `Move` message arrives rather than on the tick:
//! forward/back along the heading, then turning, then world clamp, then
//! obstacle push-back.

use crate::game::constants::player::{RADIUS, TURN_RATE};
use crate::game::state::{SessionId, World};
use crate::net::protocol::MoveInput;

/// Apply one movement message. Returns false when the session is unknown or not alive.
pub fn apply_move(world: &mut World, session_id: SessionId, input: MoveInput) -> bool {
    let Some(session) = world.sessions.get_mut(&session_id) else {
        return false;
    };
    if !session.is_alive() {
        return false;
    }

    let step = session.speed * session.effects.speed_multiplier();

    let mut position = session.position;
    if input.up {
        position = position.ahead(session.heading, step);
    }
    if input.down {
        position = position.ahead(session.heading, -step);
    }
    if input.left {
        session.turn(-TURN_RATE);
    }
    if input.right {
        session.turn(TURN_RATE);
    }

    position = position.clamp_inside(world.arena.width, world.arena.height, RADIUS);
    position = world.obstacles.resolve_circle(position, RADIUS);

    session.position = position;
    let bounds = session.bounds();
    world.player_grid.update(session_id, bounds);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::spatial::Aabb;
    use crate::game::state::test_support::*;
    use crate::game::state::LifeState;
    use crate::game::systems::obstacles::ObstacleKind;
    use crate::game::systems::powerups::PowerUpKind;
    use crate::util::vec2::Vec2;
    use std::time::{Duration, Instant};

    const FORWARD: MoveInput = MoveInput {
        up: true,
        down: false,
        left: false,
        right: false,
    };

    #[test]
    fn test_forward_along_heading() {
        let now = Instant::now();
        let mut world = open_world(now);
        let id = spawn_at(&mut world, Vec2::new(1000.0, 1000.0), now);

        assert!(apply_move(&mut world, id, FORWARD));
        let position = world.session(id).unwrap().position;
        assert!((position.x - 1003.0).abs() < 1e-4);
        assert!((position.y - 1000.0).abs() < 1e-4);
    }

    #[test]
    fn test_turning_changes_heading_only() {
        let now = Instant::now();
        let mut world = open_world(now);
        let id = spawn_at(&mut world, Vec2::new(1000.0, 1000.0), now);

        let right = MoveInput {
            right: true,
            ..Default::default()
        };
        apply_move(&mut world, id, right);
        let session = world.session(id).unwrap();
        assert!((session.heading - TURN_RATE).abs() < 1e-6);
        assert_eq!(session.position, Vec2::new(1000.0, 1000.0));
    }

    #[test]
    fn test_speed_effect_doubles_step() {
        let now = Instant::now();
        let mut world = open_world(now);
        let id = spawn_at(&mut world, Vec2::new(1000.0, 1000.0), now);
        let boost = world.power_ups.spawn(PowerUpKind::Speed, Vec2::ZERO, now);
        world.session_mut(id).unwrap().effects.apply(&boost, now);

        apply_move(&mut world, id, FORWARD);
        assert!((world.session(id).unwrap().position.x - 1006.0).abs() < 1e-4);
    }

    #[test]
    fn test_clamped_to_world() {
        let now = Instant::now();
        let mut world = open_world(now);
        let pos = Vec2::new(world.arena.width - 21.0, 500.0);
        let id = spawn_at(&mut world, pos, now);

        apply_move(&mut world, id, FORWARD);
        assert_eq!(world.session(id).unwrap().position.x, world.arena.width - RADIUS);
    }

    #[test]
    fn test_pushed_out_of_obstacle() {
        let now = Instant::now();
        let mut world = open_world(now);
        world
            .obstacles
            .add(Vec2::new(1050.0, 1000.0), 40.0, 40.0, ObstacleKind::Rock, None);
        let id = spawn_at(&mut world, Vec2::new(1008.0, 1000.0), now);

        apply_move(&mut world, id, FORWARD);
        let position = world.session(id).unwrap().position;
        // Rock's left edge is at 1030; the tank must end up a full radius away
        assert!((position.x - 1010.0).abs() < 1e-3);
        assert!(world.obstacles.check_collision(position, RADIUS).is_none());
    }

    #[test]
    fn test_grid_follows_movement() {
        let now = Instant::now();
        let mut world = open_world(now);
        let id = spawn_at(&mut world, Vec2::new(1000.0, 1000.0), now);
        for _ in 0..100 {
            apply_move(&mut world, id, FORWARD);
        }
        let here = world.player_grid.query_area(&Aabb::around(Vec2::new(1300.0, 1000.0), 5.0));
        assert_eq!(here, vec![id]);
        assert!(world
            .player_grid
            .query_area(&Aabb::around(Vec2::new(1000.0, 1000.0), 5.0))
            .is_empty());
    }

    #[test]
    fn test_dead_session_cannot_move() {
        let now = Instant::now();
        let mut world = open_world(now);
        let id = spawn_at(&mut world, Vec2::new(1000.0, 1000.0), now);
        world.session_mut(id).unwrap().life = LifeState::PendingRespawn {
            respawn_at: now + Duration::from_secs(40),
        };

        assert!(!apply_move(&mut world, id, FORWARD));
        assert_eq!(world.session(id).unwrap().position, Vec2::new(1000.0, 1000.0));
    }
}
