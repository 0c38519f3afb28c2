//! Wire protocol: client and server messages plus the snapshot/delta payloads
//!
//! Everything is bincode (legacy config) inside the length-prefixed framing.

use serde::{Deserialize, Serialize};

use crate::game::chat::ChatMessage;
use crate::game::constants::chat::MAX_INPUT_BYTES;
use crate::game::state::{Arena, Bullet, BulletId, Session, SessionId, World};
use crate::game::systems::obstacles::{Obstacle, ObstacleId};
use crate::game::systems::powerups::{PowerUp, PowerUpId, PowerUpKind};
use crate::store::{AccountRecord, AccountStats, Attributes, ClanMembership};
use crate::util::vec2::Vec2;

/// Longest bearer token accepted
pub const MAX_TOKEN_BYTES: usize = 4096;

// ============================================================================
// Client -> Server
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveInput {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Must be the first message on a connection
    Authenticate { token: String },
    Move(MoveInput),
    Shoot,
    ChatMessage { text: String },
    Ping { timestamp: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Chat message too long: {0} bytes (max {1})")]
    ChatTooLong(usize, usize),
    #[error("Token too long: {0} bytes (max {1})")]
    TokenTooLong(usize, usize),
    #[error("Empty token")]
    EmptyToken,
}

impl ClientMessage {
    /// Structural checks applied before any state is touched
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            ClientMessage::Authenticate { token } if token.is_empty() => Err(ValidationError::EmptyToken),
            ClientMessage::Authenticate { token } if token.len() > MAX_TOKEN_BYTES => {
                Err(ValidationError::TokenTooLong(token.len(), MAX_TOKEN_BYTES))
            }
            ClientMessage::ChatMessage { text } if text.len() > MAX_INPUT_BYTES => {
                Err(ValidationError::ChatTooLong(text.len(), MAX_INPUT_BYTES))
            }
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Snapshots
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: SessionId,
    pub username: String,
    pub tank_color: String,
    pub level: u32,
    pub clan_tag: Option<String>,
    pub position: Vec2,
    pub heading: f32,
    pub health: f32,
    pub max_health: f32,
    pub score: u32,
    pub alive: bool,
}

impl PlayerSnapshot {
    pub fn from_session(session: &Session) -> Self {
        Self {
            id: session.id,
            username: session.username.clone(),
            tank_color: session.tank_color.clone(),
            level: session.level,
            clan_tag: session.clan_tag.clone(),
            position: session.position,
            heading: session.heading,
            health: session.health,
            max_health: session.max_health,
            score: session.score,
            alive: session.is_alive(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulletSnapshot {
    pub id: BulletId,
    pub owner: SessionId,
    pub position: Vec2,
    pub velocity: Vec2,
    pub damage: f32,
}

impl BulletSnapshot {
    pub fn from_bullet(bullet: &Bullet) -> Self {
        Self {
            id: bullet.id,
            owner: bullet.owner,
            position: bullet.position,
            velocity: bullet.velocity,
            damage: bullet.damage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerUpSnapshot {
    pub id: PowerUpId,
    pub kind: PowerUpKind,
    pub position: Vec2,
    pub radius: f32,
    pub value: f32,
    pub duration_ms: u64,
}

impl PowerUpSnapshot {
    pub fn from_power_up(power_up: &PowerUp) -> Self {
        Self {
            id: power_up.id,
            kind: power_up.kind,
            position: power_up.position,
            radius: power_up.radius,
            value: power_up.value,
            duration_ms: power_up.duration.as_millis() as u64,
        }
    }
}

/// The diffable part of the world
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub players: Vec<PlayerSnapshot>,
    pub bullets: Vec<BulletSnapshot>,
    pub power_ups: Vec<PowerUpSnapshot>,
}

impl WorldSnapshot {
    pub fn capture(world: &World) -> Self {
        Self {
            players: world.sessions.values().map(PlayerSnapshot::from_session).collect(),
            bullets: world.bullets.values().map(BulletSnapshot::from_bullet).collect(),
            power_ups: world.power_ups.iter().map(PowerUpSnapshot::from_power_up).collect(),
        }
    }
}

/// Unfiltered baseline sent on join or reconnect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullSnapshot {
    pub world: WorldSnapshot,
    pub obstacles: Vec<Obstacle>,
    pub arena: Arena,
}

impl FullSnapshot {
    pub fn capture(world: &World) -> Self {
        Self {
            world: WorldSnapshot::capture(world),
            obstacles: world.obstacles.iter().cloned().collect(),
            arena: world.arena,
        }
    }
}

// ============================================================================
// Deltas
// ============================================================================

/// Changed fields of a surviving player; `None` means unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerDelta {
    pub id: SessionId,
    pub position: Option<Vec2>,
    pub heading: Option<f32>,
    pub health: Option<f32>,
    pub score: Option<u32>,
    pub alive: Option<bool>,
    pub level: Option<u32>,
}

impl PlayerDelta {
    pub fn has_changes(&self) -> bool {
        self.position.is_some()
            || self.heading.is_some()
            || self.health.is_some()
            || self.score.is_some()
            || self.alive.is_some()
            || self.level.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerChanges {
    pub joined: Vec<PlayerSnapshot>,
    pub left: Vec<SessionId>,
    pub updated: Vec<PlayerDelta>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BulletMove {
    pub id: BulletId,
    pub position: Vec2,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulletChanges {
    pub added: Vec<BulletSnapshot>,
    pub removed: Vec<BulletId>,
    pub updated: Vec<BulletMove>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerUpChanges {
    pub added: Vec<PowerUpSnapshot>,
    pub removed: Vec<PowerUpId>,
}

/// Per-tick broadcast; a collection with no changes is `None`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaState {
    pub players: Option<PlayerChanges>,
    pub bullets: Option<BulletChanges>,
    pub power_ups: Option<PowerUpChanges>,
}

impl DeltaState {
    pub fn is_empty(&self) -> bool {
        self.players.is_none() && self.bullets.is_none() && self.power_ups.is_none()
    }
}

// ============================================================================
// Server -> Client
// ============================================================================

/// Account details shown to the owning client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub username: String,
    pub tank_color: String,
    pub level: u32,
    pub experience: u64,
    pub experience_to_next: u64,
    pub attribute_points: u32,
    pub attributes: Attributes,
    pub stats: AccountStats,
    pub clan: Option<ClanMembership>,
}

impl AccountSummary {
    pub fn from_record(record: &AccountRecord) -> Self {
        Self {
            username: record.username.clone(),
            tank_color: record.tank_color.clone(),
            level: record.progression.level,
            experience: record.progression.experience,
            experience_to_next: record.progression.experience_to_next,
            attribute_points: record.progression.attribute_points,
            attributes: record.attributes,
            stats: record.stats.clone(),
            clan: record.clan.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRespawnInfo {
    pub remaining_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitPayload {
    pub session_id: SessionId,
    pub account: AccountSummary,
    pub snapshot: FullSnapshot,
    pub chat_history: Vec<ChatMessage>,
    pub pending_respawn: Option<PendingRespawnInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    // Targeted
    Init(Box<InitPayload>),
    /// Fresh baseline for a connection that lost a frame
    Resync(Box<FullSnapshot>),
    Death { respawn_delay_ms: u64 },
    Respawn { position: Vec2, health: f32 },
    PowerUpCollected {
        kind: PowerUpKind,
        value: f32,
        /// `None` for instant effects
        duration_ms: Option<u64>,
    },
    StatsUpdate { kills: u32, deaths: u32 },
    LevelUp { new_level: u32, attribute_points: u32 },
    ForceDisconnect { reason: String },
    AuthRejected { reason: String },
    Pong { timestamp: u64, server_time_ms: u64 },

    // Broadcast
    DeltaState(DeltaState),
    PlayerJoined(PlayerSnapshot),
    PlayerLeft { session_id: SessionId },
    BulletFired(BulletSnapshot),
    ObstacleDestroyed { obstacle_id: ObstacleId },
    ChatMessage(ChatMessage),
}

/// Encode a message using bincode
/// Uses legacy config for fixed-size integers
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);
