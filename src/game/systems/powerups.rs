//! Power-up spawning, pickup and per-session timed effects

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::game::constants::{player, powerup};
use crate::game::game_loop::GameLoopEvent;
use crate::game::state::World;
use crate::util::vec2::Vec2;

/// Unique identifier for power-ups
pub type PowerUpId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PowerUpKind {
    Health,
    Speed,
    Damage,
    RapidFire,
    Shield,
}

/// Static tuning for one power-up kind
#[derive(Debug, Clone, Copy)]
pub struct PowerUpProfile {
    pub value: f32,
    /// Zero for instant effects
    pub duration: Duration,
    /// Time the pickup stays in the world
    pub ttl: Duration,
    pub radius: f32,
}

impl PowerUpKind {
    pub const ALL: [PowerUpKind; 5] = [
        PowerUpKind::Health,
        PowerUpKind::Speed,
        PowerUpKind::Damage,
        PowerUpKind::RapidFire,
        PowerUpKind::Shield,
    ];

    pub fn profile(self) -> PowerUpProfile {
        let (value, duration_ms, ttl_ms, radius) = match self {
            PowerUpKind::Health => (50.0, 0, 30_000, 20.0),
            PowerUpKind::Speed => (2.0, 10_000, 45_000, 20.0),
            PowerUpKind::Damage => (2.0, 15_000, 60_000, 20.0),
            PowerUpKind::RapidFire => (0.5, 10_000, 45_000, 20.0),
            PowerUpKind::Shield => (0.5, 20_000, 90_000, 25.0),
        };
        PowerUpProfile {
            value,
            duration: Duration::from_millis(duration_ms),
            ttl: Duration::from_millis(ttl_ms),
            radius,
        }
    }

    pub fn is_instant(self) -> bool {
        self.profile().duration.is_zero()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PowerUp {
    pub id: PowerUpId,
    pub kind: PowerUpKind,
    pub position: Vec2,
    pub radius: f32,
    pub value: f32,
    pub duration: Duration,
    pub ttl: Duration,
    pub spawned_at: Instant,
}

/// Changes produced by one spawner update
#[derive(Debug, Default)]
pub struct SpawnerUpdate {
    pub spawned: Option<PowerUp>,
    pub expired: Vec<PowerUpId>,
}

/// World spawner owning every live power-up
pub struct PowerUpSpawner {
    power_ups: BTreeMap<PowerUpId, PowerUp>,
    spawn_points: Vec<Vec2>,
    next_id: PowerUpId,
    last_spawn: Instant,
}

impl PowerUpSpawner {
    /// Build the spawn-point lattice for an arena; the spawn clock starts at `now`
    pub fn new(width: f32, height: f32, now: Instant) -> Self {
        let grid = powerup::SPAWN_GRID;
        let mut spawn_points = Vec::new();
        let mut x = grid;
        while x < width - grid {
            let mut y = grid;
            while y < height - grid {
                spawn_points.push(Vec2::new(x, y));
                y += grid;
            }
            x += grid;
        }

        Self {
            power_ups: BTreeMap::new(),
            spawn_points,
            next_id: 0,
            last_spawn: now,
        }
    }

    /// Spawn on interval (below the cap) and drop expired pickups
    pub fn update<R: Rng>(&mut self, now: Instant, rng: &mut R) -> SpawnerUpdate {
        let mut changes = SpawnerUpdate::default();

        if now.saturating_duration_since(self.last_spawn) >= powerup::SPAWN_INTERVAL
            && self.power_ups.len() < powerup::MAX_ACTIVE
        {
            changes.spawned = self.spawn_random(now, rng);
            self.last_spawn = now;
        }

        self.power_ups.retain(|id, p| {
            let alive = now.saturating_duration_since(p.spawned_at) <= p.ttl;
            if !alive {
                changes.expired.push(*id);
            }
            alive
        });

        changes
    }

    fn spawn_random<R: Rng>(&mut self, now: Instant, rng: &mut R) -> Option<PowerUp> {
        let position = *self.spawn_points.choose(rng)?;
        let kind = *PowerUpKind::ALL.choose(rng)?;
        Some(self.spawn(kind, position, now))
    }

    /// Place a power-up of `kind` at `position`
    pub fn spawn(&mut self, kind: PowerUpKind, position: Vec2, now: Instant) -> PowerUp {
        let profile = kind.profile();
        let power_up = PowerUp {
            id: self.next_id,
            kind,
            position,
            radius: profile.radius,
            value: profile.value,
            duration: profile.duration,
            ttl: profile.ttl,
            spawned_at: now,
        };
        self.next_id += 1;
        self.power_ups.insert(power_up.id, power_up.clone());
        power_up
    }

    /// Remove and return the lowest-id pickup touching a circle at `position`
    pub fn try_collect(&mut self, position: Vec2, radius: f32) -> Option<PowerUp> {
        let id = self
            .power_ups
            .values()
            .find(|p| position.distance_to(p.position) < radius + p.radius)
            .map(|p| p.id)?;
        self.power_ups.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PowerUp> {
        self.power_ups.values()
    }

    pub fn len(&self) -> usize {
        self.power_ups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.power_ups.is_empty()
    }

    pub fn spawn_points(&self) -> &[Vec2] {
        &self.spawn_points
    }
}

/// An active timed effect
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveEffect {
    pub value: f32,
    pub duration: Duration,
    pub started_at: Instant,
}

/// Per-session timed effects, at most one per kind
#[derive(Debug, Clone, Default)]
pub struct EffectTracker {
    effects: HashMap<PowerUpKind, ActiveEffect>,
}

impl EffectTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the effect of a collected power-up.
    ///
    /// Instant kinds are not tracked; returns whether an effect was recorded.
    pub fn apply(&mut self, power_up: &PowerUp, now: Instant) -> bool {
        if power_up.duration.is_zero() {
            return false;
        }
        self.effects.insert(
            power_up.kind,
            ActiveEffect {
                value: power_up.value,
                duration: power_up.duration,
                started_at: now,
            },
        );
        true
    }

    /// Drop effects whose duration has fully elapsed; returns the expired kinds
    pub fn update(&mut self, now: Instant) -> Vec<PowerUpKind> {
        let mut expired = Vec::new();
        self.effects.retain(|kind, effect| {
            let done = now.saturating_duration_since(effect.started_at) >= effect.duration;
            if done {
                expired.push(*kind);
            }
            !done
        });
        expired
    }

    pub fn get(&self, kind: PowerUpKind) -> Option<&ActiveEffect> {
        self.effects.get(&kind)
    }

    pub fn has(&self, kind: PowerUpKind) -> bool {
        self.effects.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn clear(&mut self) {
        self.effects.clear();
    }

    fn value_or(&self, kind: PowerUpKind, neutral: f32) -> f32 {
        self.effects.get(&kind).map_or(neutral, |e| e.value)
    }

    pub fn speed_multiplier(&self) -> f32 {
        self.value_or(PowerUpKind::Speed, 1.0)
    }

    pub fn damage_multiplier(&self) -> f32 {
        self.value_or(PowerUpKind::Damage, 1.0)
    }

    pub fn fire_rate_multiplier(&self) -> f32 {
        self.value_or(PowerUpKind::RapidFire, 1.0)
    }

    pub fn damage_reduction(&self) -> f32 {
        self.value_or(PowerUpKind::Shield, 0.0)
    }
}

// ============================================================================
// World systems
// ============================================================================

/// Resolve pickups for every alive session, one per session per tick
pub fn collect_pickups(world: &mut World, now: Instant, events: &mut Vec<GameLoopEvent>) {
    for session in world.sessions.values_mut() {
        if !session.is_alive() {
            continue;
        }
        let Some(power_up) = world.power_ups.try_collect(session.position, player::RADIUS) else {
            continue;
        };

        if power_up.kind == PowerUpKind::Health {
            session.health = (session.health + power_up.value).min(session.max_health);
        } else {
            session.effects.apply(&power_up, now);
        }

        events.push(GameLoopEvent::PowerUpCollected {
            session_id: session.id,
            kind: power_up.kind,
            value: power_up.value,
            duration: power_up.duration,
        });
    }
}

/// Purge timed effects that have run their course
pub fn expire_effects(world: &mut World, now: Instant) {
    for session in world.sessions.values_mut() {
        session.effects.update(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::arena;
    use crate::game::state::test_support::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_spawn_points_lattice() {
        let spawner = PowerUpSpawner::new(arena::WIDTH, arena::HEIGHT, Instant::now());
        // x: 500..3500 (7), y: 500..2500 (5)
        assert_eq!(spawner.spawn_points().len(), 35);
        assert!(spawner
            .spawn_points()
            .iter()
            .all(|p| p.x >= 500.0 && p.x < 3500.0 && p.y >= 500.0 && p.y < 2500.0));
    }

    #[test]
    fn test_spawns_on_interval_up_to_cap() {
        let start = Instant::now();
        let mut rng = StdRng::seed_from_u64(3);
        let mut spawner = PowerUpSpawner::new(arena::WIDTH, arena::HEIGHT, start);

        assert!(spawner.update(start + Duration::from_secs(4), &mut rng).spawned.is_none());
        assert!(spawner.update(start + Duration::from_secs(5), &mut rng).spawned.is_some());
        assert!(spawner.update(start + Duration::from_secs(6), &mut rng).spawned.is_none());

        for i in 0..40u64 {
            spawner.update(start + Duration::from_secs(10 + i * 5), &mut rng);
        }
        assert!(spawner.len() <= powerup::MAX_ACTIVE);
    }

    #[test]
    fn test_expires_after_ttl() {
        let start = Instant::now();
        let mut rng = StdRng::seed_from_u64(1);
        let mut spawner = PowerUpSpawner::new(arena::WIDTH, arena::HEIGHT, start);
        let health = spawner.spawn(PowerUpKind::Health, Vec2::new(500.0, 500.0), start);

        let at_ttl = spawner.update(start + Duration::from_secs(30), &mut rng);
        assert!(at_ttl.expired.is_empty());

        let after = spawner.update(start + Duration::from_millis(30_001), &mut rng);
        assert_eq!(after.expired, vec![health.id]);
    }

    #[test]
    fn test_collect_removes_once() {
        let now = Instant::now();
        let mut spawner = PowerUpSpawner::new(arena::WIDTH, arena::HEIGHT, now);
        let shield = spawner.spawn(PowerUpKind::Shield, Vec2::new(1000.0, 1000.0), now);

        // 20 + 25 = 45 pickup distance
        assert!(spawner.try_collect(Vec2::new(1046.0, 1000.0), 20.0).is_none());
        assert_eq!(spawner.try_collect(Vec2::new(1044.0, 1000.0), 20.0).map(|p| p.id), Some(shield.id));
        assert!(spawner.try_collect(Vec2::new(1000.0, 1000.0), 20.0).is_none());
    }

    #[test]
    fn test_instant_health_not_tracked() {
        let now = Instant::now();
        let mut spawner = PowerUpSpawner::new(arena::WIDTH, arena::HEIGHT, now);
        let health = spawner.spawn(PowerUpKind::Health, Vec2::ZERO, now);

        let mut tracker = EffectTracker::new();
        assert!(!tracker.apply(&health, now));
        assert!(tracker.is_empty());
        assert!(PowerUpKind::Health.is_instant());
    }

    #[test]
    fn test_effect_overwrites_and_expires() {
        let start = Instant::now();
        let mut spawner = PowerUpSpawner::new(arena::WIDTH, arena::HEIGHT, start);
        let speed = spawner.spawn(PowerUpKind::Speed, Vec2::ZERO, start);

        let mut tracker = EffectTracker::new();
        assert_eq!(tracker.speed_multiplier(), 1.0);
        assert_eq!(tracker.damage_reduction(), 0.0);

        tracker.apply(&speed, start);
        let later = start + Duration::from_secs(6);
        tracker.apply(&speed, later);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.speed_multiplier(), 2.0);

        // Restarted at `later`, so still active 10 s after `start`
        assert!(tracker.update(start + Duration::from_secs(10)).is_empty());
        assert_eq!(tracker.update(later + Duration::from_secs(10)), vec![PowerUpKind::Speed]);
        assert_eq!(tracker.speed_multiplier(), 1.0);
    }

    #[test]
    fn test_health_pickup_clamped_and_untracked() {
        let now = Instant::now();
        let mut world = open_world(now);
        let id = spawn_at(&mut world, Vec2::new(1000.0, 1000.0), now);
        {
            let session = world.session_mut(id).unwrap();
            session.max_health = 120.0;
            session.health = 60.0;
        }
        world.power_ups.spawn(PowerUpKind::Health, Vec2::new(1010.0, 1000.0), now);

        let mut events = Vec::new();
        collect_pickups(&mut world, now, &mut events);

        let session = world.session(id).unwrap();
        assert_eq!(session.health, 110.0);
        assert!(session.effects.is_empty());
        assert!(world.power_ups.is_empty());
        assert!(matches!(
            events[0],
            GameLoopEvent::PowerUpCollected { kind: PowerUpKind::Health, .. }
        ));
    }

    #[test]
    fn test_single_pickup_for_two_players() {
        let now = Instant::now();
        let mut world = open_world(now);
        spawn_at(&mut world, Vec2::new(1000.0, 1000.0), now);
        spawn_at(&mut world, Vec2::new(1004.0, 1000.0), now);
        world.power_ups.spawn(PowerUpKind::Damage, Vec2::new(1002.0, 1000.0), now);

        let mut events = Vec::new();
        collect_pickups(&mut world, now, &mut events);
        assert_eq!(events.len(), 1);
        assert_eq!(
            world
                .sessions
                .values()
                .filter(|s| s.effects.has(PowerUpKind::Damage))
                .count(),
            1
        );
    }

    #[test]
    fn test_expire_effects_on_world() {
        let now = Instant::now();
        let mut world = open_world(now);
        let id = spawn_at(&mut world, Vec2::new(1000.0, 1000.0), now);
        let shield = world.power_ups.spawn(PowerUpKind::Shield, Vec2::ZERO, now);
        world.session_mut(id).unwrap().effects.apply(&shield, now);

        expire_effects(&mut world, now + Duration::from_secs(19));
        assert!(world.session(id).unwrap().effects.has(PowerUpKind::Shield));
        expire_effects(&mut world, now + Duration::from_secs(20));
        assert!(!world.session(id).unwrap().effects.has(PowerUpKind::Shield));
    }

    #[test]
    fn test_neutral_defaults() {
        let tracker = EffectTracker::new();
        assert_eq!(tracker.damage_multiplier(), 1.0);
        assert_eq!(tracker.fire_rate_multiplier(), 1.0);
    }
}
