//! Authoritative world state: sessions, bullets, obstacles and power-ups
//!
//! Everything here is mutated from one place at a time (the tick or a single
//! inbound message) under the session lock.

use std::collections::BTreeMap;
use std::f32::consts::TAU;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::constants::{arena, player, weapon};
use crate::game::pool::BulletPool;
use crate::game::spatial::{Aabb, SpatialGrid};
use crate::game::systems::obstacles::ObstacleField;
use crate::game::systems::powerups::{EffectTracker, PowerUpSpawner};
use crate::store::{AccountId, AccountRecord, Attributes, SessionSummary};
use crate::util::vec2::Vec2;

/// Unique identifier for a live connection's session
pub type SessionId = Uuid;

/// Monotonic bullet identifier
pub type BulletId = u64;

/// Cell size of the bullet grid
const BULLET_GRID_CELL_SIZE: f32 = 100.0;

// ============================================================================
// Bullets
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bullet {
    pub id: BulletId,
    pub owner: SessionId,
    pub position: Vec2,
    pub velocity: Vec2,
    pub damage: f32,
}

impl Bullet {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::around(self.position, weapon::QUERY_HALF_EXTENT)
    }
}

// ============================================================================
// Sessions
// ============================================================================

/// Death/respawn state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifeState {
    Alive,
    /// Killed this tick; becomes `PendingRespawn` at the end of the tick
    Dead { respawn_at: Instant },
    /// Waiting out the respawn delay (also the state restored on reconnect)
    PendingRespawn { respawn_at: Instant },
}

impl LifeState {
    pub fn is_alive(&self) -> bool {
        matches!(self, LifeState::Alive)
    }

    pub fn respawn_at(&self) -> Option<Instant> {
        match self {
            LifeState::Alive => None,
            LifeState::Dead { respawn_at } | LifeState::PendingRespawn { respawn_at } => Some(*respawn_at),
        }
    }
}

/// Counters for the current session only
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionStats {
    pub kills: u32,
    pub deaths: u32,
    pub damage_dealt: f32,
    pub damage_taken: f32,
}

/// Combat values derived from attribute points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedStats {
    pub max_health: f32,
    pub speed: f32,
    pub damage: f32,
    pub regen: f32,
    pub attack_speed: f32,
}

impl DerivedStats {
    pub fn from_attributes(attributes: &Attributes) -> Self {
        Self {
            max_health: player::BASE_HEALTH + player::HEALTH_PER_POINT * attributes.health as f32,
            speed: player::BASE_SPEED + player::SPEED_PER_POINT * attributes.speed as f32,
            damage: player::BASE_DAMAGE + player::DAMAGE_PER_POINT * attributes.damage as f32,
            regen: player::REGEN_PER_POINT * attributes.regeneration as f32,
            attack_speed: attributes.attack_speed as f32,
        }
    }
}

/// One connected player's tank
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub account_id: AccountId,
    pub username: String,
    pub tank_color: String,
    pub level: u32,
    pub clan_tag: Option<String>,

    pub position: Vec2,
    /// Facing angle in radians, kept in `[0, TAU)`
    pub heading: f32,
    pub health: f32,
    pub max_health: f32,
    pub speed: f32,
    pub damage: f32,
    pub attack_speed: f32,
    pub regen: f32,

    pub score: u32,
    pub stats: SessionStats,
    pub life: LifeState,
    pub last_shot: Option<Instant>,
    pub last_regen: Instant,
    pub effects: EffectTracker,
}

impl Session {
    /// Build a live session for `account` at `position`
    pub fn new(id: SessionId, account: &AccountRecord, position: Vec2, now: Instant) -> Self {
        let derived = DerivedStats::from_attributes(&account.attributes);
        Self {
            id,
            account_id: account.account_id.clone(),
            username: account.username.clone(),
            tank_color: account.tank_color.clone(),
            level: account.progression.level,
            clan_tag: account.clan.as_ref().map(|c| c.tag.clone()),
            position,
            heading: 0.0,
            health: derived.max_health,
            max_health: derived.max_health,
            speed: derived.speed,
            damage: derived.damage,
            attack_speed: derived.attack_speed,
            regen: derived.regen,
            score: 0,
            stats: SessionStats::default(),
            life: LifeState::Alive,
            last_shot: None,
            last_regen: now,
            effects: EffectTracker::new(),
        }
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.life.is_alive()
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::around(self.position, player::RADIUS)
    }

    /// Minimum gap between shots given attack speed and rapid fire
    pub fn shot_cooldown(&self) -> Duration {
        let factor = (1.0 - self.attack_speed * weapon::COOLDOWN_REDUCTION_PER_POINT).max(0.0);
        let ms = weapon::BASE_COOLDOWN_MS * factor * self.effects.fire_rate_multiplier();
        Duration::from_secs_f64((ms.max(0.0) as f64) / 1000.0)
    }

    /// Rotate by `delta` radians, wrapping into `[0, TAU)`
    pub fn turn(&mut self, delta: f32) {
        self.heading = (self.heading + delta).rem_euclid(TAU);
    }

    /// Totals to flush to the account store
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            kills: self.stats.kills,
            deaths: self.stats.deaths,
            damage_dealt: self.stats.damage_dealt,
            damage_taken: self.stats.damage_taken,
            score: self.score,
            last_position: self.is_alive().then_some(self.position),
        }
    }
}

// ============================================================================
// World
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Arena {
    pub width: f32,
    pub height: f32,
}

impl Arena {
    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= 0.0 && point.x <= self.width && point.y >= 0.0 && point.y <= self.height
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self {
            width: arena::WIDTH,
            height: arena::HEIGHT,
        }
    }
}

pub struct World {
    pub arena: Arena,
    pub sessions: BTreeMap<SessionId, Session>,
    pub bullets: BTreeMap<BulletId, Bullet>,
    /// Contains exactly the alive sessions
    pub player_grid: SpatialGrid<SessionId>,
    pub bullet_grid: SpatialGrid<BulletId>,
    pub bullet_pool: BulletPool,
    pub obstacles: ObstacleField,
    pub power_ups: PowerUpSpawner,
    pub rng: StdRng,
}

impl World {
    /// Standard arena with generated obstacles
    pub fn new(now: Instant) -> Self {
        Self::generate(StdRng::from_entropy(), now)
    }

    /// Reproducible arena
    pub fn with_seed(seed: u64, now: Instant) -> Self {
        Self::generate(StdRng::seed_from_u64(seed), now)
    }

    fn generate(mut rng: StdRng, now: Instant) -> Self {
        let arena = Arena::default();
        let obstacles = ObstacleField::generate(arena.width, arena.height, &mut rng);
        Self::with_obstacles(arena, obstacles, rng, now)
    }

    pub fn with_obstacles(arena: Arena, obstacles: ObstacleField, rng: StdRng, now: Instant) -> Self {
        Self {
            arena,
            sessions: BTreeMap::new(),
            bullets: BTreeMap::new(),
            player_grid: SpatialGrid::new(player::GRID_CELL_SIZE),
            bullet_grid: SpatialGrid::new(BULLET_GRID_CELL_SIZE),
            bullet_pool: BulletPool::default(),
            obstacles,
            power_ups: PowerUpSpawner::new(arena.width, arena.height, now),
            rng,
        }
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn session_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Add a session, indexing it only when alive
    pub fn insert_session(&mut self, session: Session) {
        if session.is_alive() {
            self.player_grid.insert(session.id, session.bounds());
        }
        self.sessions.insert(session.id, session);
    }

    pub fn remove_session(&mut self, id: SessionId) -> Option<Session> {
        self.player_grid.remove(id);
        self.sessions.remove(&id)
    }

    /// Remove a bullet and hand its object back to the pool
    pub fn destroy_bullet(&mut self, id: BulletId) {
        if let Some(bullet) = self.bullets.remove(&id) {
            self.bullet_grid.remove(id);
            self.bullet_pool.release(bullet);
        }
    }

    pub fn alive_count(&self) -> usize {
        self.player_grid.len()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Obstacle-free world with a fixed seed
    pub fn open_world(now: Instant) -> World {
        World::with_obstacles(Arena::default(), ObstacleField::empty(), StdRng::seed_from_u64(42), now)
    }

    pub fn account(id: &str) -> AccountRecord {
        AccountRecord::new(id, format!("player-{id}"))
    }

    /// Insert an alive session for a fresh account at `position`
    pub fn spawn_at(world: &mut World, position: Vec2, now: Instant) -> SessionId {
        let id = Uuid::new_v4();
        let record = account(&id.to_string());
        world.insert_session(Session::new(id, &record, position, now));
        id
    }
}
