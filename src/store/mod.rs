//! Durable account and chat storage
//!
//! The simulation only talks to the [`PlayerStore`] and [`ChatStore`] traits,
//! and only from the persistence worker, so a slow store never stalls a tick.

pub mod memory;
pub mod queue;

#[cfg(feature = "file_store")]
pub mod file;

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::chat::ChatMessage;
use crate::game::constants::experience;
use crate::util::vec2::Vec2;

pub use memory::MemoryStore;

/// Account key shared with the external account service
pub type AccountId = String;

/// Idempotency key attached to every store mutation
pub type OpId = Uuid;

/// Applied op ids remembered for duplicate detection
const APPLIED_OPS_CAPACITY: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ============================================================================
// Account model
// ============================================================================

/// Attribute points spent by the player
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    pub health: u32,
    pub speed: u32,
    pub damage: u32,
    pub regeneration: u32,
    pub attack_speed: u32,
}

/// Lifetime combat statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountStats {
    pub total_kills: u64,
    pub total_deaths: u64,
    pub games_played: u64,
    pub highest_score: u32,
    pub total_damage_dealt: f64,
    pub total_damage_taken: f64,
}

/// Level, experience and unspent attribute points
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progression {
    pub level: u32,
    pub experience: u64,
    pub experience_to_next: u64,
    pub attribute_points: u32,
}

/// Result of an experience gain that crossed at least one level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelUp {
    pub new_level: u32,
    pub levels_gained: u32,
    pub attribute_points: u32,
}

/// Experience needed to advance from `level` to the next one
pub fn experience_to_next(level: u32) -> u64 {
    let exponent = level.saturating_sub(1) as i32;
    (experience::BASE_TO_NEXT * experience::GROWTH.powi(exponent)).floor() as u64
}

impl Progression {
    pub fn new() -> Self {
        Self {
            level: 1,
            experience: 0,
            experience_to_next: experience_to_next(1),
            attribute_points: 0,
        }
    }

    /// Add experience and roll over as many levels as it covers
    pub fn add_experience(&mut self, amount: u64) -> Option<LevelUp> {
        self.experience += amount;

        let mut levels_gained = 0;
        while self.experience >= self.experience_to_next {
            self.experience -= self.experience_to_next;
            self.level += 1;
            self.attribute_points += experience::POINTS_PER_LEVEL;
            self.experience_to_next = experience_to_next(self.level);
            levels_gained += 1;
        }

        (levels_gained > 0).then_some(LevelUp {
            new_level: self.level,
            levels_gained,
            attribute_points: self.attribute_points,
        })
    }
}

impl Default for Progression {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClanMembership {
    pub name: String,
    pub tag: String,
}

/// Everything the server reads about an account on connect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account_id: AccountId,
    pub username: String,
    pub tank_color: String,
    #[serde(default)]
    pub stats: AccountStats,
    #[serde(default)]
    pub progression: Progression,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub clan: Option<ClanMembership>,
    #[serde(default)]
    pub last_position: Option<Vec2>,
    /// Unix milliseconds of the most recent death
    #[serde(default)]
    pub last_death_at_ms: Option<u64>,
}

impl AccountRecord {
    pub fn new(account_id: impl Into<AccountId>, username: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            username: username.into(),
            tank_color: "#4ade80".to_string(),
            stats: AccountStats::default(),
            progression: Progression::new(),
            attributes: Attributes::default(),
            clan: None,
            last_position: None,
            last_death_at_ms: None,
        }
    }
}

/// Per-session totals written when a session ends
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub kills: u32,
    pub deaths: u32,
    pub damage_dealt: f32,
    pub damage_taken: f32,
    pub score: u32,
    pub last_position: Option<Vec2>,
}

impl SessionSummary {
    /// Experience awarded when the session is flushed
    pub fn experience(&self) -> u64 {
        (self.damage_dealt as f64 * 0.5 + self.score as f64 * 10.0).floor() as u64
    }
}

// ============================================================================
// Store traits
// ============================================================================

/// Durable account storage. Every increment carries an [`OpId`]; replays are ignored.
#[async_trait]
pub trait PlayerStore: Send + Sync {
    /// Reachability check used at startup
    async fn ping(&self) -> Result<(), StoreError>;

    async fn load_account(&self, account_id: &str) -> Result<Option<AccountRecord>, StoreError>;

    /// Insert `record` unless the account already exists; returns the stored record
    async fn register_account(&self, record: AccountRecord) -> Result<AccountRecord, StoreError>;

    async fn record_kill(&self, op_id: OpId, account_id: &str) -> Result<(), StoreError>;

    async fn record_death(&self, op_id: OpId, account_id: &str, at_ms: u64) -> Result<(), StoreError>;

    /// Returns the level-up, if the gain crossed a level boundary
    async fn add_experience(
        &self,
        op_id: OpId,
        account_id: &str,
        amount: u64,
    ) -> Result<Option<LevelUp>, StoreError>;

    async fn flush_session(
        &self,
        op_id: OpId,
        account_id: &str,
        summary: &SessionSummary,
    ) -> Result<Option<LevelUp>, StoreError>;
}

/// Durable chat history
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn append(&self, message: &ChatMessage) -> Result<(), StoreError>;

    /// Up to `limit` most recent messages, oldest first
    async fn recent(&self, limit: usize) -> Result<Vec<ChatMessage>, StoreError>;

    /// Delete messages older than `cutoff_ms`; returns how many were removed
    async fn prune_older_than(&self, cutoff_ms: u64) -> Result<usize, StoreError>;
}

// ============================================================================
// Shared state for the bundled stores
// ============================================================================

/// Plain data behind both bundled stores; the file store serializes it whole
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct StoreState {
    pub accounts: BTreeMap<AccountId, AccountRecord>,
    #[serde(default)]
    pub chat: Vec<ChatMessage>,
    #[serde(default)]
    applied_order: VecDeque<OpId>,
    #[serde(skip)]
    applied: HashSet<OpId>,
}

impl StoreState {
    /// Rebuild the lookup set after deserializing
    pub fn reindex(&mut self) {
        self.applied = self.applied_order.iter().copied().collect();
    }

    /// Record `op_id`; false when it was already applied
    fn first_delivery(&mut self, op_id: OpId) -> bool {
        if !self.applied.insert(op_id) {
            return false;
        }
        self.applied_order.push_back(op_id);
        while self.applied_order.len() > APPLIED_OPS_CAPACITY {
            if let Some(old) = self.applied_order.pop_front() {
                self.applied.remove(&old);
            }
        }
        true
    }

    fn account_mut(&mut self, account_id: &str) -> Result<&mut AccountRecord, StoreError> {
        self.accounts
            .get_mut(account_id)
            .ok_or_else(|| StoreError::AccountNotFound(account_id.to_string()))
    }

    pub fn record_kill(&mut self, op_id: OpId, account_id: &str) -> Result<bool, StoreError> {
        self.account_mut(account_id)?;
        if !self.first_delivery(op_id) {
            return Ok(false);
        }
        self.account_mut(account_id)?.stats.total_kills += 1;
        Ok(true)
    }

    pub fn record_death(&mut self, op_id: OpId, account_id: &str, at_ms: u64) -> Result<bool, StoreError> {
        self.account_mut(account_id)?;
        if !self.first_delivery(op_id) {
            return Ok(false);
        }
        let account = self.account_mut(account_id)?;
        account.stats.total_deaths += 1;
        account.last_death_at_ms = Some(account.last_death_at_ms.map_or(at_ms, |t| t.max(at_ms)));
        Ok(true)
    }

    pub fn add_experience(
        &mut self,
        op_id: OpId,
        account_id: &str,
        amount: u64,
    ) -> Result<Option<LevelUp>, StoreError> {
        self.account_mut(account_id)?;
        if !self.first_delivery(op_id) {
            return Ok(None);
        }
        Ok(self.account_mut(account_id)?.progression.add_experience(amount))
    }

    pub fn flush_session(
        &mut self,
        op_id: OpId,
        account_id: &str,
        summary: &SessionSummary,
    ) -> Result<Option<LevelUp>, StoreError> {
        self.account_mut(account_id)?;
        if !self.first_delivery(op_id) {
            return Ok(None);
        }

        let account = self.account_mut(account_id)?;
        account.stats.games_played += 1;
        account.stats.highest_score = account.stats.highest_score.max(summary.score);
        account.stats.total_damage_dealt += summary.damage_dealt as f64;
        account.stats.total_damage_taken += summary.damage_taken as f64;
        if summary.last_position.is_some() {
            account.last_position = summary.last_position;
        }
        Ok(account.progression.add_experience(summary.experience()))
    }

    pub fn append_chat(&mut self, message: &ChatMessage) {
        if self.chat.iter().rev().any(|m| m.id == message.id) {
            return;
        }
        self.chat.push(message.clone());
    }

    pub fn recent_chat(&self, limit: usize) -> Vec<ChatMessage> {
        let skip = self.chat.len().saturating_sub(limit);
        self.chat[skip..].to_vec()
    }

    pub fn prune_chat(&mut self, cutoff_ms: u64) -> usize {
        let before = self.chat.len();
        self.chat.retain(|m| m.timestamp_ms >= cutoff_ms);
        before - self.chat.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_curve() {
        assert_eq!(experience_to_next(1), 100);
        assert_eq!(experience_to_next(2), 150);
        assert_eq!(experience_to_next(3), 225);
        assert_eq!(experience_to_next(4), 337);
    }

    #[test]
    fn test_add_experience_rolls_multiple_levels() {
        let mut progression = Progression::new();
        assert!(progression.add_experience(50).is_none());

        // 50 + 210 = 260: level 1 -> 2 (100), 2 -> 3 (150), 10 left over
        let level_up = progression.add_experience(210);
        assert_eq!(
            level_up,
            Some(LevelUp {
                new_level: 3,
                levels_gained: 2,
                attribute_points: 4
            })
        );
        assert_eq!(progression.experience, 10);
        assert_eq!(progression.experience_to_next, 225);
    }

    #[test]
    fn test_summary_experience() {
        let summary = SessionSummary {
            damage_dealt: 85.0,
            score: 3,
            ..Default::default()
        };
        assert_eq!(summary.experience(), 42 + 30);
    }

    #[test]
    fn test_duplicate_op_ignored() {
        let mut state = StoreState::default();
        state.accounts.insert("u1".into(), AccountRecord::new("u1", "ann"));

        let op = Uuid::new_v4();
        assert!(state.record_kill(op, "u1").unwrap());
        assert!(!state.record_kill(op, "u1").unwrap());
        assert_eq!(state.accounts["u1"].stats.total_kills, 1);
    }

    #[test]
    fn test_unknown_account_errors() {
        let mut state = StoreState::default();
        assert!(matches!(
            state.record_death(Uuid::new_v4(), "ghost", 5),
            Err(StoreError::AccountNotFound(_))
        ));
    }

    #[test]
    fn test_death_timestamp_is_monotonic() {
        let mut state = StoreState::default();
        state.accounts.insert("u1".into(), AccountRecord::new("u1", "ann"));
        state.record_death(Uuid::new_v4(), "u1", 2_000).unwrap();
        state.record_death(Uuid::new_v4(), "u1", 1_000).unwrap();
        assert_eq!(state.accounts["u1"].last_death_at_ms, Some(2_000));
        assert_eq!(state.accounts["u1"].stats.total_deaths, 2);
    }
}
