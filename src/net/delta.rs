//! Delta compression for per-tick broadcasts
//!
//! The compressor keeps a deep copy of the last broadcast world and diffs the
//! current one against it. Players and bullets use dead-zones so sub-threshold
//! jitter never reaches the wire; power-ups only ever appear or vanish.

use std::collections::BTreeMap;
use std::f32::consts::TAU;

use hashbrown::HashMap;

use crate::game::state::{SessionId, World};
use crate::net::protocol::{
    BulletChanges, BulletMove, DeltaState, FullSnapshot, PlayerChanges, PlayerDelta,
    PlayerSnapshot, PowerUpChanges, WorldSnapshot,
};
use crate::util::vec2::Vec2;

// ============================================================================
// Change Detection Thresholds
// ============================================================================

/// Position dead-zone (world units)
const POSITION_EPSILON: f32 = 0.1;

/// Heading dead-zone (radians)
const HEADING_EPSILON: f32 = 0.01;

/// Per-axis check; a move of exactly the epsilon stays silent
fn position_changed(a: Vec2, b: Vec2) -> bool {
    (a.x - b.x).abs() > POSITION_EPSILON || (a.y - b.y).abs() > POSITION_EPSILON
}

/// Shortest-arc difference, so a turn across zero is not a full revolution
fn heading_changed(a: f32, b: f32) -> bool {
    let d = (a - b).rem_euclid(TAU);
    d.min(TAU - d) >= HEADING_EPSILON
}

/// Diff engine plus per-connection full snapshots
#[derive(Debug, Default)]
pub struct DeltaCompressor {
    baseline: WorldSnapshot,
    snapshots: HashMap<SessionId, FullSnapshot>,
}

impl DeltaCompressor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff `current` against the last broadcast and make it the new baseline
    pub fn compress(&mut self, current: WorldSnapshot) -> DeltaState {
        let delta = diff(&self.baseline, &current);
        self.baseline = current;
        delta
    }

    /// Capture and diff the world in one step
    pub fn compress_world(&mut self, world: &World) -> DeltaState {
        self.compress(WorldSnapshot::capture(world))
    }

    /// Unfiltered baseline for a joining or reconnecting connection
    pub fn create_player_snapshot(&mut self, session_id: SessionId, world: &World) -> FullSnapshot {
        let snapshot = FullSnapshot::capture(world);
        self.snapshots.insert(session_id, snapshot.clone());
        snapshot
    }

    pub fn player_snapshot(&self, session_id: SessionId) -> Option<&FullSnapshot> {
        self.snapshots.get(&session_id)
    }

    pub fn remove_player_snapshot(&mut self, session_id: SessionId) {
        self.snapshots.remove(&session_id);
    }

    pub fn cached_snapshots(&self) -> usize {
        self.snapshots.len()
    }
}

/// Compute the minimal delta from `base` to `current`
pub fn diff(base: &WorldSnapshot, current: &WorldSnapshot) -> DeltaState {
    DeltaState {
        players: diff_players(base, current),
        bullets: diff_bullets(base, current),
        power_ups: diff_power_ups(base, current),
    }
}

fn diff_players(base: &WorldSnapshot, current: &WorldSnapshot) -> Option<PlayerChanges> {
    let base_players: BTreeMap<SessionId, &PlayerSnapshot> =
        base.players.iter().map(|p| (p.id, p)).collect();
    let current_ids: BTreeMap<SessionId, ()> = current.players.iter().map(|p| (p.id, ())).collect();

    let mut changes = PlayerChanges::default();
    for player in &current.players {
        match base_players.get(&player.id) {
            Some(previous) => {
                if let Some(delta) = player_delta(previous, player) {
                    changes.updated.push(delta);
                }
            }
            None => changes.joined.push(player.clone()),
        }
    }
    changes.left = base_players
        .keys()
        .filter(|id| !current_ids.contains_key(id))
        .copied()
        .collect();

    if changes.joined.is_empty() && changes.left.is_empty() && changes.updated.is_empty() {
        None
    } else {
        Some(changes)
    }
}

/// Changed fields of one player, or `None` when every field is within its dead-zone
fn player_delta(base: &PlayerSnapshot, current: &PlayerSnapshot) -> Option<PlayerDelta> {
    let mut delta = PlayerDelta {
        id: current.id,
        ..Default::default()
    };

    if position_changed(current.position, base.position) {
        delta.position = Some(current.position);
    }
    if heading_changed(current.heading, base.heading) {
        delta.heading = Some(current.heading);
    }
    if current.health != base.health {
        delta.health = Some(current.health);
    }
    if current.score != base.score {
        delta.score = Some(current.score);
    }
    if current.alive != base.alive {
        delta.alive = Some(current.alive);
    }
    if current.level != base.level {
        delta.level = Some(current.level);
    }

    delta.has_changes().then_some(delta)
}

fn diff_bullets(base: &WorldSnapshot, current: &WorldSnapshot) -> Option<BulletChanges> {
    let base_bullets: BTreeMap<_, _> = base.bullets.iter().map(|b| (b.id, b)).collect();
    let current_bullets: BTreeMap<_, _> = current.bullets.iter().map(|b| (b.id, b)).collect();

    let mut changes = BulletChanges::default();
    for (id, bullet) in &current_bullets {
        match base_bullets.get(id) {
            Some(previous) => {
                if position_changed(bullet.position, previous.position) {
                    changes.updated.push(BulletMove {
                        id: *id,
                        position: bullet.position,
                    });
                }
            }
            None => changes.added.push((*bullet).clone()),
        }
    }
    changes.removed = base_bullets
        .keys()
        .filter(|id| !current_bullets.contains_key(id))
        .copied()
        .collect();

    if changes.added.is_empty() && changes.removed.is_empty() && changes.updated.is_empty() {
        None
    } else {
        Some(changes)
    }
}

fn diff_power_ups(base: &WorldSnapshot, current: &WorldSnapshot) -> Option<PowerUpChanges> {
    let base_ids: BTreeMap<_, _> = base.power_ups.iter().map(|p| (p.id, p)).collect();
    let current_ids: BTreeMap<_, _> = current.power_ups.iter().map(|p| (p.id, p)).collect();

    let added: Vec<_> = current_ids
        .iter()
        .filter(|(id, _)| !base_ids.contains_key(id))
        .map(|(_, p)| (*p).clone())
        .collect();
    let removed: Vec<_> = base_ids
        .keys()
        .filter(|id| !current_ids.contains_key(id))
        .copied()
        .collect();

    if added.is_empty() && removed.is_empty() {
        None
    } else {
        Some(PowerUpChanges { added, removed })
    }
}

// ============================================================================
// Tests
// ============================================================================
