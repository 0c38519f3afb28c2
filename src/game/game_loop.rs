//! Fixed-order world tick and per-message entry points
//!
//! Tick order:
//! 1. power-up spawn/expire
//! 2. pickups
//! 3. effect expiry
//! 4. regeneration
//! 5-10. bullets (advance, obstacles, bounds, players, damage, deaths)
//! 11. due respawns

use std::time::{Duration, Instant};

use crate::game::state::{Bullet, SessionId, World};
use crate::game::systems::obstacles::ObstacleId;
use crate::game::systems::powerups::{PowerUpId, PowerUpKind};
use crate::game::systems::{combat, movement, powerups, respawn};
use crate::net::protocol::MoveInput;
use crate::util::vec2::Vec2;

/// Outcomes of a tick that need to reach clients or the store
#[derive(Debug, Clone, PartialEq)]
pub enum GameLoopEvent {
    PowerUpSpawned {
        power_up_id: PowerUpId,
        kind: PowerUpKind,
        position: Vec2,
    },
    /// Pickups that outlived their time-to-live uncollected
    PowerUpsExpired {
        power_up_ids: Vec<PowerUpId>,
    },
    PowerUpCollected {
        session_id: SessionId,
        kind: PowerUpKind,
        value: f32,
        duration: Duration,
    },
    ObstacleDestroyed {
        obstacle_id: ObstacleId,
    },
    /// `killer_id` is `None` when the shooter has already left
    PlayerKilled {
        killer_id: Option<SessionId>,
        victim_id: SessionId,
    },
    PlayerRespawned {
        session_id: SessionId,
        position: Vec2,
    },
}

pub struct GameLoop {
    pub state: World,
    tick: u64,
}

impl GameLoop {
    pub fn new(state: World) -> Self {
        Self { state, tick: 0 }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Run one simulation step at `now`
    pub fn tick(&mut self, now: Instant) -> Vec<GameLoopEvent> {
        self.tick += 1;
        let mut events = Vec::new();
        let world = &mut self.state;

        let spawner = world.power_ups.update(now, &mut world.rng);
        if let Some(power_up) = spawner.spawned {
            events.push(GameLoopEvent::PowerUpSpawned {
                power_up_id: power_up.id,
                kind: power_up.kind,
                position: power_up.position,
            });
        }
        if !spawner.expired.is_empty() {
            events.push(GameLoopEvent::PowerUpsExpired {
                power_up_ids: spawner.expired,
            });
        }
        powerups::collect_pickups(world, now, &mut events);
        powerups::expire_effects(world, now);
        combat::regenerate(world, now);
        combat::update_bullets(world, now, &mut events);
        respawn::advance(world, now, &mut events);

        events
    }

    pub fn handle_move(&mut self, session_id: SessionId, input: MoveInput) -> bool {
        movement::apply_move(&mut self.state, session_id, input)
    }

    pub fn handle_shoot(&mut self, session_id: SessionId, now: Instant) -> Option<Bullet> {
        combat::try_fire(&mut self.state, session_id, now)
    }
}
