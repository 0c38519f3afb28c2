/// Simulation clock - one tick advances every bullet by one velocity step
pub mod physics {
    /// Server tick rate in Hz
    pub const TICK_RATE: u32 = 30;
    /// Tick duration in milliseconds
    pub const TICK_DURATION_MS: u64 = 1000 / TICK_RATE as u64;
}

/// Playfield dimensions (top-left origin)
pub mod arena {
    pub const WIDTH: f32 = 4000.0;
    pub const HEIGHT: f32 = 3000.0;
    /// Thickness of the indestructible boundary walls
    pub const WALL_THICKNESS: f32 = 40.0;
}

/// Tank body and derived-stat constants
pub mod player {
    use std::time::Duration;

    /// Collision radius used for movement clamping and pickups
    pub const RADIUS: f32 = 20.0;
    /// Bullet hit distance (center to center)
    pub const HIT_DISTANCE: f32 = 20.0;

    pub const BASE_HEALTH: f32 = 100.0;
    pub const HEALTH_PER_POINT: f32 = 10.0;
    pub const BASE_SPEED: f32 = 3.0;
    pub const SPEED_PER_POINT: f32 = 0.3;
    pub const BASE_DAMAGE: f32 = 20.0;
    pub const DAMAGE_PER_POINT: f32 = 5.0;
    /// HP regenerated per second per regeneration point
    pub const REGEN_PER_POINT: f32 = 0.5;

    /// Heading change per move message (radians)
    pub const TURN_RATE: f32 = 0.08;
    /// Minimum gap between regeneration ticks
    pub const REGEN_INTERVAL: Duration = Duration::from_secs(1);

    /// Cell size of the player spatial grid
    pub const GRID_CELL_SIZE: f32 = 200.0;
}

/// Firing and bullet constants
pub mod weapon {
    /// Base delay between shots in milliseconds
    pub const BASE_COOLDOWN_MS: f32 = 500.0;
    /// Cooldown reduction per attack-speed point (fraction of base)
    pub const COOLDOWN_REDUCTION_PER_POINT: f32 = 0.05;
    /// Bullet travel per tick
    pub const BULLET_SPEED: f32 = 10.0;
    /// Distance in front of the tank where bullets appear
    pub const MUZZLE_OFFSET: f32 = 30.0;
    /// Radius used for bullet vs obstacle tests
    pub const BULLET_RADIUS: f32 = 4.0;
    /// Half extent of the broad-phase query box around a bullet
    pub const QUERY_HALF_EXTENT: f32 = 5.0;

    /// Bullets preallocated at startup
    pub const POOL_INITIAL: usize = 50;
    /// Pool retains at most this many released bullets
    pub const POOL_MAX: usize = 200;
}

/// Spawn and respawn constants
pub mod spawn {
    use std::time::Duration;

    /// Delay between death and respawn
    pub const RESPAWN_DELAY: Duration = Duration::from_secs(40);
    /// Spawn candidates stay this far from the arena edge
    pub const EDGE_INSET: f32 = 100.0;
    /// Rejection-sampling attempts before falling back
    pub const MAX_ATTEMPTS: u32 = 50;
    /// Candidate spawn must be obstacle-free within this radius
    pub const CLEARANCE_RADIUS: f32 = 30.0;
}

/// Obstacle field generation
pub mod obstacle {
    /// First row/column of the obstacle lattice
    pub const GRID_START: f32 = 200.0;
    /// Lattice spacing
    pub const GRID_SPACING: f32 = 400.0;
    /// Roll < this places a wall
    pub const WALL_CHANCE: f32 = 0.3;
    /// Roll < this (and >= WALL_CHANCE) places a box
    pub const BOX_CHANCE: f32 = 0.6;
    /// Roll < this (and >= BOX_CHANCE) places a rock
    pub const ROCK_CHANCE: f32 = 0.8;
    pub const LARGE_WALL_COUNT: usize = 20;
    pub const BOX_CLUSTER_COUNT: usize = 30;
    /// Starting health of destructible boxes
    pub const BOX_HEALTH: f32 = 100.0;
    /// Cell size of the obstacle spatial index
    pub const GRID_CELL_SIZE: f32 = 200.0;
}

/// Power-up spawning
pub mod powerup {
    use std::time::Duration;

    pub const SPAWN_INTERVAL: Duration = Duration::from_secs(5);
    pub const MAX_ACTIVE: usize = 20;
    /// Spacing of the candidate spawn lattice
    pub const SPAWN_GRID: f32 = 500.0;
}

/// Chat limits
pub mod chat {
    /// In-memory history length
    pub const MAX_MESSAGES: usize = 50;
    /// Messages allowed per sender per window
    pub const RATE_LIMIT: u32 = 3;
    pub const RATE_WINDOW_MS: u64 = 10_000;
    /// Sanitized message length cap (characters)
    pub const MAX_LENGTH: usize = 200;
    /// Raw payload cap enforced before sanitizing (bytes)
    pub const MAX_INPUT_BYTES: usize = 1024;
    pub const BANNED_WORDS: [&str; 3] = ["spam", "hack", "cheat"];
    /// Messages delivered with the init payload
    pub const HISTORY_ON_JOIN: usize = 20;
    /// Persisted messages older than this are pruned
    pub const RETENTION_MS: u64 = 60 * 60 * 1000;
}

/// Experience and levelling
pub mod experience {
    pub const PER_KILL: u64 = 50;
    /// Experience needed to leave level 1
    pub const BASE_TO_NEXT: f64 = 100.0;
    /// Each level needs this factor more than the previous
    pub const GROWTH: f64 = 1.5;
    pub const POINTS_PER_LEVEL: u32 = 2;
}

/// Network constants
pub mod net {
    /// Maximum framed message size (64 KiB)
    pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;
    /// Per-connection outbound queue depth
    pub const OUTBOX_CAPACITY: usize = 256;
    /// Seconds a client has to authenticate after opening its stream
    pub const AUTH_TIMEOUT_SECS: u64 = 10;
    /// Level-ups the store worker may report ahead of the next tick
    pub const LEVEL_UP_CAPACITY: usize = 64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_duration() {
        assert_eq!(physics::TICK_DURATION_MS, 33);
    }

    #[test]
    fn test_chance_bands_ordered() {
        assert!(obstacle::WALL_CHANCE < obstacle::BOX_CHANCE);
        assert!(obstacle::BOX_CHANCE < obstacle::ROCK_CHANCE);
        assert!(obstacle::ROCK_CHANCE < 1.0);
    }

    #[test]
    fn test_spawn_inset_inside_arena() {
        assert!(spawn::EDGE_INSET * 2.0 < arena::WIDTH);
        assert!(spawn::EDGE_INSET * 2.0 < arena::HEIGHT);
        assert!(player::RADIUS < spawn::EDGE_INSET);
    }
}
