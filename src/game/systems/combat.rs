//! Firing, bullet simulation, damage and regeneration

use std::time::Instant;

use crate::game::constants::{player, weapon};
use crate::game::game_loop::GameLoopEvent;
use crate::game::spatial::Aabb;
use crate::game::state::{Bullet, BulletId, SessionId, World};
use crate::game::systems::respawn;
use crate::util::vec2::Vec2;

/// Fire a bullet if the session is alive and off cooldown.
///
/// An early shot is dropped without error.
pub fn try_fire(world: &mut World, session_id: SessionId, now: Instant) -> Option<Bullet> {
    let session = world.sessions.get_mut(&session_id)?;
    if !session.is_alive() {
        return None;
    }
    if let Some(last) = session.last_shot {
        if now.saturating_duration_since(last) <= session.shot_cooldown() {
            return None;
        }
    }
    session.last_shot = Some(now);

    let direction = Vec2::from_angle(session.heading);
    let bullet = world.bullet_pool.create(
        session_id,
        session.position.ahead(session.heading, weapon::MUZZLE_OFFSET),
        direction * weapon::BULLET_SPEED,
        session.damage * session.effects.damage_multiplier(),
    );

    world.bullet_grid.insert(bullet.id, bullet.bounds());
    world.bullets.insert(bullet.id, bullet.clone());
    Some(bullet)
}

/// Restore `regen` HP per elapsed second on each session's own clock
pub fn regenerate(world: &mut World, now: Instant) {
    for session in world.sessions.values_mut() {
        if !session.is_alive() || session.regen <= 0.0 || session.health >= session.max_health {
            continue;
        }
        if now.saturating_duration_since(session.last_regen) >= player::REGEN_INTERVAL {
            session.health = (session.health + session.regen).min(session.max_health);
            session.last_regen = now;
        }
    }
}

/// Advance bullets and resolve obstacle, bounds and player collisions, in that order
pub fn update_bullets(world: &mut World, now: Instant, events: &mut Vec<GameLoopEvent>) {
    let ids: Vec<BulletId> = world.bullets.keys().copied().collect();

    // Advance
    for bullet in world.bullets.values_mut() {
        bullet.position += bullet.velocity;
        world.bullet_grid.update(bullet.id, bullet.bounds());
    }

    // Obstacles
    for &id in &ids {
        let Some((position, damage)) = world.bullets.get(&id).map(|b| (b.position, b.damage)) else {
            continue;
        };
        let Some(obstacle_id) = world
            .obstacles
            .check_collision(position, weapon::BULLET_RADIUS)
            .map(|o| o.id)
        else {
            continue;
        };

        if world.obstacles.damage_obstacle(obstacle_id, damage) {
            events.push(GameLoopEvent::ObstacleDestroyed { obstacle_id });
        }
        world.destroy_bullet(id);
    }

    // Bounds
    for &id in &ids {
        let outside = world
            .bullets
            .get(&id)
            .is_some_and(|b| !world.arena.contains(b.position));
        if outside {
            world.destroy_bullet(id);
        }
    }

    // Players
    for &id in &ids {
        let Some(bullet) = world.bullets.get(&id) else {
            continue;
        };
        let (owner, position, damage) = (bullet.owner, bullet.position, bullet.damage);

        let victim = world
            .player_grid
            .query_area(&Aabb::around(position, weapon::QUERY_HALF_EXTENT))
            .into_iter()
            .filter(|candidate| *candidate != owner)
            .find(|candidate| {
                world.sessions.get(candidate).is_some_and(|s| {
                    s.is_alive() && s.position.distance_to(position) < player::HIT_DISTANCE
                })
            });

        if let Some(victim_id) = victim {
            apply_damage(world, owner, victim_id, damage, now, events);
            world.destroy_bullet(id);
        }
    }
}

/// Apply bullet damage after shield reduction and handle the kill if it was lethal
pub fn apply_damage(
    world: &mut World,
    attacker_id: SessionId,
    victim_id: SessionId,
    raw_damage: f32,
    now: Instant,
    events: &mut Vec<GameLoopEvent>,
) {
    let Some(victim) = world.sessions.get_mut(&victim_id) else {
        return;
    };
    if !victim.is_alive() {
        return;
    }

    let reduction = victim.effects.damage_reduction().clamp(0.0, 1.0);
    let dealt = raw_damage * (1.0 - reduction);
    victim.health -= dealt;
    victim.stats.damage_taken += dealt;
    let lethal = victim.health <= 0.0;

    if let Some(attacker) = world.sessions.get_mut(&attacker_id) {
        attacker.stats.damage_dealt += dealt;
    }

    if lethal {
        respawn::kill(world, victim_id, attacker_id, now, events);
    }
}
