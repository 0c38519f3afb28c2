pub mod combat;
pub mod movement;
pub mod obstacles;
pub mod powerups;
pub mod respawn;
