//! Game session manager: owns the world, the connection registry and chat,
//! runs the tick and fans results out to connections.
//!
//! Everything here runs under one `tokio::sync::RwLock<GameSession>` write guard,
//! held for exactly one tick or one inbound message.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::game::chat::{ChatKind, ChatLog, ChatMessage};
use crate::game::constants::{chat, experience, net, physics, spawn};
use crate::game::game_loop::{GameLoop, GameLoopEvent};
use crate::game::state::{LifeState, Session, SessionId, World};
use crate::game::systems::respawn;
use crate::metrics::Metrics;
use crate::net::connection::{encode_frame, Delivery, Frame, Outbox, PlayerConnection};
use crate::net::delta::DeltaCompressor;
use crate::net::protocol::{
    AccountSummary, BulletSnapshot, InitPayload, MoveInput, PendingRespawnInfo, PlayerSnapshot,
    ServerMessage,
};
use crate::store::queue::{LevelUpNotice, LevelUpSender, PersistJob, PersistQueue};
use crate::store::{AccountId, AccountRecord};
use crate::util::unix_millis;

const EVICTION_REASON: &str = "Logged in from another location";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AdmitError {
    #[error("Server full")]
    ServerFull,
}

/// Shared game session that manages the world and player connections
pub struct GameSession {
    pub game_loop: GameLoop,
    connections: HashMap<SessionId, PlayerConnection>,
    /// Single live session per account
    accounts: HashMap<AccountId, SessionId>,
    chat: ChatLog,
    delta: DeltaCompressor,
    persist: PersistQueue,
    /// Deaths not yet visible in the store, keyed by account (unix ms)
    recent_deaths: HashMap<AccountId, u64>,
    /// Level-ups reported by the persistence worker, applied on the next tick
    level_ups: (LevelUpSender, mpsc::Receiver<LevelUpNotice>),
    max_players: usize,
    metrics: Arc<Metrics>,
}

impl GameSession {
    pub fn new(world: World, chat: ChatLog, persist: PersistQueue, metrics: Arc<Metrics>) -> Self {
        metrics
            .obstacle_count
            .store(world.obstacles.len() as u64, Ordering::Relaxed);
        Self {
            game_loop: GameLoop::new(world),
            connections: HashMap::new(),
            accounts: HashMap::new(),
            chat,
            delta: DeltaCompressor::new(),
            persist,
            recent_deaths: HashMap::new(),
            level_ups: mpsc::channel(net::LEVEL_UP_CAPACITY),
            max_players: usize::MAX,
            metrics,
        }
    }

    /// Cap concurrent sessions; a reconnecting account never counts against it
    pub fn with_max_players(mut self, max_players: usize) -> Self {
        self.max_players = max_players;
        self
    }

    pub fn player_count(&self) -> usize {
        self.connections.len()
    }

    pub fn session_for_account(&self, account_id: &str) -> Option<SessionId> {
        self.accounts.get(account_id).copied()
    }

    pub fn is_connected(&self, session_id: SessionId) -> bool {
        self.connections.contains_key(&session_id)
    }

    // ========================================================================
    // Chat history
    // ========================================================================

    /// True when the in-memory history cannot serve `n` messages
    pub fn chat_needs_backfill(&self, n: usize) -> bool {
        self.chat.len() < n
    }

    /// Fold messages fetched from the chat store into the cache
    pub fn merge_chat_history(&mut self, fetched: Vec<ChatMessage>) {
        self.chat.merge(fetched);
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Bring an authenticated account into the world, evicting any live session it has
    pub fn admit(
        &mut self,
        record: AccountRecord,
        outbox: Outbox,
        now: Instant,
        now_ms: u64,
    ) -> Result<SessionId, AdmitError> {
        let previous = self.accounts.get(&record.account_id).copied();
        if previous.is_none() && self.connections.len() >= self.max_players {
            return Err(AdmitError::ServerFull);
        }

        if let Some(previous) = previous {
            info!("Evicting previous session {} for {}", previous, record.username);
            if let Some(conn) = self.connections.get_mut(&previous) {
                conn.send(&ServerMessage::ForceDisconnect {
                    reason: EVICTION_REASON.to_string(),
                });
            }
            self.disconnect(previous, now_ms);
        }

        let session_id = Uuid::new_v4();
        let remaining = self.pending_respawn_remaining(&record, now_ms);
        let world = &mut self.game_loop.state;
        let position = respawn::initial_spawn_point(world, record.last_position);
        let mut session = Session::new(session_id, &record, position, now);

        if let Some(remaining) = remaining {
            session.health = 0.0;
            session.life = LifeState::PendingRespawn {
                respawn_at: now + remaining,
            };
        }
        let joined = PlayerSnapshot::from_session(&session);
        world.insert_session(session);

        let mut conn = PlayerConnection::new(session_id, record.account_id.clone(), record.username.clone(), outbox);
        let snapshot = self.delta.create_player_snapshot(session_id, &self.game_loop.state);
        let init = ServerMessage::Init(Box::new(InitPayload {
            session_id,
            account: AccountSummary::from_record(&record),
            snapshot,
            chat_history: self.chat.recent(chat::HISTORY_ON_JOIN),
            pending_respawn: remaining.map(|r| PendingRespawnInfo {
                remaining_ms: r.as_millis() as u64,
            }),
        }));
        match encode_frame(&init) {
            Ok(frame) => {
                let delivery = conn.send_frame(&frame);
                self.count_delivery(delivery, frame.len());
            }
            Err(e) => warn!("Failed to encode init for {}: {}", record.username, e),
        }

        self.connections.insert(session_id, conn);
        self.accounts.insert(record.account_id.clone(), session_id);

        info!(
            "{} joined as {}{}",
            record.username,
            session_id,
            if remaining.is_some() { " (pending respawn)" } else { "" }
        );

        self.broadcast_except(session_id, &ServerMessage::PlayerJoined(joined));
        self.post_system(format!("{} joined the game", record.username), ChatKind::System, now_ms);
        self.update_metrics();
        Ok(session_id)
    }

    /// Remaining respawn delay for an account that died recently
    fn pending_respawn_remaining(&self, record: &AccountRecord, now_ms: u64) -> Option<Duration> {
        let stored = record.last_death_at_ms;
        let cached = self.recent_deaths.get(&record.account_id).copied();
        let last_death = stored.max(cached)?;

        let delay_ms = spawn::RESPAWN_DELAY.as_millis() as u64;
        let elapsed = now_ms.saturating_sub(last_death);
        (elapsed < delay_ms).then(|| Duration::from_millis(delay_ms - elapsed))
    }

    /// Remove a session, flush its totals and tell everyone else
    pub fn disconnect(&mut self, session_id: SessionId, now_ms: u64) {
        let Some(conn) = self.connections.remove(&session_id) else {
            return;
        };
        if self.accounts.get(&conn.account_id) == Some(&session_id) {
            self.accounts.remove(&conn.account_id);
        }

        if let Some(session) = self.game_loop.state.remove_session(session_id) {
            self.persist
                .push(PersistJob::flush_session(conn.account_id.clone(), session.summary()));
        }
        self.delta.remove_player_snapshot(session_id);
        self.chat.forget_sender(session_id);

        info!(
            "{} ({}) left after {}s",
            conn.username,
            session_id,
            conn.connected_at.elapsed().as_secs()
        );

        self.post_system(format!("{} left the game", conn.username), ChatKind::System, now_ms);
        self.broadcast(&ServerMessage::PlayerLeft { session_id });
        self.update_metrics();
    }

    /// Disconnect everyone, flushing each session; used on shutdown
    pub fn disconnect_all(&mut self, now_ms: u64) {
        let ids: Vec<SessionId> = self.connections.keys().copied().collect();
        for id in ids {
            self.disconnect(id, now_ms);
        }
    }

    pub fn persist_queue(&self) -> &PersistQueue {
        &self.persist
    }

    // ========================================================================
    // Inbound messages
    // ========================================================================

    pub fn handle_move(&mut self, session_id: SessionId, input: MoveInput) {
        self.game_loop.handle_move(session_id, input);
    }

    pub fn handle_shoot(&mut self, session_id: SessionId, now: Instant) {
        if let Some(bullet) = self.game_loop.handle_shoot(session_id, now) {
            self.broadcast(&ServerMessage::BulletFired(BulletSnapshot::from_bullet(&bullet)));
        }
    }

    pub fn handle_chat(&mut self, session_id: SessionId, text: &str, now_ms: u64) {
        let Some(username) = self.connections.get(&session_id).map(|c| c.username.clone()) else {
            return;
        };
        match self.chat.post_player(session_id, &username, text, now_ms) {
            Ok(message) => {
                self.metrics.chat_messages.fetch_add(1, Ordering::Relaxed);
                self.persist.push(PersistJob::AppendChat(message.clone()));
                self.broadcast(&ServerMessage::ChatMessage(message));
            }
            Err(e) => {
                self.metrics.chat_rejected.fetch_add(1, Ordering::Relaxed);
                debug!("Chat from {} rejected: {}", username, e);
            }
        }
    }

    pub fn handle_ping(&mut self, session_id: SessionId, timestamp: u64, now_ms: u64) {
        self.send_to(
            session_id,
            &ServerMessage::Pong {
                timestamp,
                server_time_ms: now_ms,
            },
        );
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Advance the world one step and deliver its outcomes
    pub fn tick(&mut self, now: Instant, now_ms: u64) {
        self.apply_level_ups();

        let events = self.game_loop.tick(now);
        for event in events {
            self.dispatch(event, now_ms);
        }

        let delay_ms = spawn::RESPAWN_DELAY.as_millis() as u64;
        self.recent_deaths
            .retain(|_, at| now_ms.saturating_sub(*at) < delay_ms);

        let delta = self.delta.compress_world(&self.game_loop.state);
        let frame = if delta.is_empty() {
            None
        } else {
            self.metrics.deltas_sent.fetch_add(1, Ordering::Relaxed);
            match encode_frame(&ServerMessage::DeltaState(delta)) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    warn!("Failed to encode delta: {}", e);
                    None
                }
            }
        };
        self.deliver_world_update(frame);

        self.update_metrics();
    }

    /// Send this tick's delta, or a full snapshot to connections that lost a frame
    fn deliver_world_update(&mut self, delta: Option<Frame>) {
        let lagging: Vec<SessionId> = self
            .connections
            .values()
            .filter(|c| c.needs_resync)
            .map(|c| c.session_id)
            .collect();
        for session_id in &lagging {
            self.resync(*session_id);
        }

        let Some(frame) = delta else {
            return;
        };
        let mut deliveries = Vec::with_capacity(self.connections.len());
        for (id, conn) in self.connections.iter_mut() {
            if !lagging.contains(id) {
                deliveries.push(conn.send_frame(&frame));
            }
        }
        for delivery in deliveries {
            self.count_delivery(delivery, frame.len());
        }
    }

    fn resync(&mut self, session_id: SessionId) {
        let snapshot = self.delta.create_player_snapshot(session_id, &self.game_loop.state);
        let Some(conn) = self.connections.get_mut(&session_id) else {
            return;
        };
        let frame = match encode_frame(&ServerMessage::Resync(Box::new(snapshot))) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode resync for {}: {}", conn.username, e);
                return;
            }
        };
        // a dropped snapshot leaves the flag set for the next tick
        conn.needs_resync = false;
        let delivery = conn.send_frame(&frame);
        if delivery == Delivery::Queued {
            self.metrics.resyncs_sent.fetch_add(1, Ordering::Relaxed);
            debug!("Resynced {} with a full snapshot", conn.username);
        }
        self.count_delivery(delivery, frame.len());
    }

    /// Fold level-ups from the store into live sessions and tell their owners
    fn apply_level_ups(&mut self) {
        while let Ok(notice) = self.level_ups.1.try_recv() {
            let Some(session_id) = self.accounts.get(&notice.account_id).copied() else {
                continue;
            };
            let LevelUpNotice { account_id, level_up } = notice;
            if let Some(session) = self.game_loop.state.session_mut(session_id) {
                session.level = session.level.max(level_up.new_level);
            }
            self.metrics.level_ups.fetch_add(1, Ordering::Relaxed);
            info!("{} reached level {}", account_id, level_up.new_level);
            self.send_to(
                session_id,
                &ServerMessage::LevelUp {
                    new_level: level_up.new_level,
                    attribute_points: level_up.attribute_points,
                },
            );
        }
    }

    fn dispatch(&mut self, event: GameLoopEvent, now_ms: u64) {
        match event {
            GameLoopEvent::PowerUpSpawned {
                power_up_id,
                kind,
                position,
            } => {
                self.metrics.power_ups_spawned.fetch_add(1, Ordering::Relaxed);
                debug!("Power-up {} ({:?}) spawned at {:?}", power_up_id, kind, position);
            }
            GameLoopEvent::PowerUpsExpired { power_up_ids } => {
                self.metrics
                    .power_ups_expired
                    .fetch_add(power_up_ids.len() as u64, Ordering::Relaxed);
                debug!("Power-ups expired: {:?}", power_up_ids);
            }
            GameLoopEvent::PowerUpCollected {
                session_id,
                kind,
                value,
                duration,
            } => {
                let duration_ms = (!duration.is_zero()).then(|| duration.as_millis() as u64);
                self.send_to(
                    session_id,
                    &ServerMessage::PowerUpCollected {
                        kind,
                        value,
                        duration_ms,
                    },
                );
            }
            GameLoopEvent::ObstacleDestroyed { obstacle_id } => {
                self.broadcast(&ServerMessage::ObstacleDestroyed { obstacle_id });
            }
            GameLoopEvent::PlayerKilled { killer_id, victim_id } => {
                self.on_kill(killer_id, victim_id, now_ms);
            }
            GameLoopEvent::PlayerRespawned { session_id, position } => {
                let health = self
                    .game_loop
                    .state
                    .session(session_id)
                    .map_or(0.0, |s| s.health);
                self.send_to(session_id, &ServerMessage::Respawn { position, health });
            }
        }
    }

    fn on_kill(&mut self, killer_id: Option<SessionId>, victim_id: SessionId, now_ms: u64) {
        let victim_name = match self.connections.get(&victim_id) {
            Some(conn) => {
                let account_id = conn.account_id.clone();
                self.persist.push(PersistJob::record_death(account_id.clone(), now_ms));
                self.recent_deaths.insert(account_id, now_ms);
                conn.username.clone()
            }
            None => return,
        };

        self.send_to(
            victim_id,
            &ServerMessage::Death {
                respawn_delay_ms: spawn::RESPAWN_DELAY.as_millis() as u64,
            },
        );
        self.send_stats(victim_id);

        let killer = killer_id.and_then(|id| self.connections.get(&id).map(|c| (id, c)));
        let line = match killer {
            Some((id, conn)) => {
                let account_id = conn.account_id.clone();
                let killer_name = conn.username.clone();
                let notify = Some(self.level_ups.0.clone());
                self.persist.push(PersistJob::record_kill(account_id.clone()));
                self.persist
                    .push(PersistJob::add_experience(account_id, experience::PER_KILL, notify));
                self.send_stats(id);
                format!("{} destroyed {}", killer_name, victim_name)
            }
            None => format!("{} was destroyed", victim_name),
        };

        self.post_system(line, ChatKind::Kill, now_ms);
    }

    fn send_stats(&mut self, session_id: SessionId) {
        if let Some(stats) = self.game_loop.state.session(session_id).map(|s| s.stats) {
            self.send_to(
                session_id,
                &ServerMessage::StatsUpdate {
                    kills: stats.kills,
                    deaths: stats.deaths,
                },
            );
        }
    }

    /// Drop chat older than the retention window, in memory and in the store
    pub fn prune_chat(&mut self, now_ms: u64) -> usize {
        let cutoff_ms = now_ms.saturating_sub(chat::RETENTION_MS);
        let removed = self.chat.prune_older_than(cutoff_ms);
        self.persist.push(PersistJob::PruneChat { cutoff_ms });
        removed
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    fn post_system(&mut self, text: String, kind: ChatKind, now_ms: u64) {
        let message = self.chat.post_system(text, kind, now_ms);
        self.metrics.chat_messages.fetch_add(1, Ordering::Relaxed);
        self.persist.push(PersistJob::AppendChat(message.clone()));
        self.broadcast(&ServerMessage::ChatMessage(message));
    }

    fn send_to(&mut self, session_id: SessionId, message: &ServerMessage) {
        let Some(conn) = self.connections.get_mut(&session_id) else {
            return;
        };
        let frame = match encode_frame(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode message for {}: {}", conn.username, e);
                return;
            }
        };
        let delivery = conn.send_frame(&frame);
        self.count_delivery(delivery, frame.len());
    }

    /// Broadcast a message to all connected players
    fn broadcast(&mut self, message: &ServerMessage) {
        self.broadcast_filtered(message, None);
    }

    fn broadcast_except(&mut self, excluded: SessionId, message: &ServerMessage) {
        self.broadcast_filtered(message, Some(excluded));
    }

    fn broadcast_filtered(&mut self, message: &ServerMessage, excluded: Option<SessionId>) {
        let frame: Frame = match encode_frame(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode message for broadcast: {}", e);
                return;
            }
        };

        let mut deliveries = Vec::with_capacity(self.connections.len());
        for (id, conn) in self.connections.iter_mut() {
            if Some(*id) != excluded {
                deliveries.push(conn.send_frame(&frame));
            }
        }
        for delivery in deliveries {
            self.count_delivery(delivery, frame.len());
        }
    }

    fn count_delivery(&self, delivery: Delivery, bytes: usize) {
        match delivery {
            Delivery::Queued => self.metrics.record_sent(bytes),
            Delivery::Dropped => {
                self.metrics.messages_dropped.fetch_add(1, Ordering::Relaxed);
            }
            Delivery::Closed => {}
        }
    }

    fn update_metrics(&self) {
        let world = &self.game_loop.state;
        let m = &self.metrics;
        let alive = world.alive_count() as u64;
        m.players_total.store(world.sessions.len() as u64, Ordering::Relaxed);
        m.players_alive.store(alive, Ordering::Relaxed);
        m.players_pending_respawn
            .store((world.sessions.len() as u64).saturating_sub(alive), Ordering::Relaxed);
        m.bullet_count.store(world.bullets.len() as u64, Ordering::Relaxed);
        m.bullets_pooled
            .store(world.bullet_pool.available() as u64, Ordering::Relaxed);
        m.bullet_fresh_allocations
            .store(world.bullet_pool.fresh_allocations(), Ordering::Relaxed);
        m.power_up_count.store(world.power_ups.len() as u64, Ordering::Relaxed);
        m.obstacle_count.store(world.obstacles.len() as u64, Ordering::Relaxed);
        m.grid_max_per_cell
            .store(world.player_grid.stats().max_per_cell as u64, Ordering::Relaxed);
        m.connections_active
            .store(self.connections.len() as u64, Ordering::Relaxed);
    }
}

/// Start the game loop background task
pub fn start_game_loop(session: Arc<RwLock<GameSession>>, metrics: Arc<Metrics>) {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_millis(physics::TICK_DURATION_MS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("Game loop started at {} Hz", physics::TICK_RATE);
        let start = Instant::now();
        let mut tick_count: u64 = 0;

        loop {
            ticker.tick().await;
            tick_count += 1;

            let tick_start = Instant::now();
            {
                let mut guard = session.write().await;
                guard.tick(tick_start, unix_millis());
            }
            metrics.record_tick_time(tick_start.elapsed());

            if tick_count % (physics::TICK_RATE as u64 * 30) == 0 {
                let guard = session.read().await;
                let world = &guard.game_loop.state;
                info!(
                    "Game: {}s, tick {}, {} players ({} alive), {} bullets, {} power-ups | tick p95 {}us",
                    start.elapsed().as_secs(),
                    guard.game_loop.tick_count(),
                    world.sessions.len(),
                    world.alive_count(),
                    world.bullets.len(),
                    world.power_ups.len(),
                    metrics.tick_time_p95_us.load(Ordering::Relaxed)
                );
            }
        }
    });
}

/// Hourly chat retention sweep
pub fn start_chat_maintenance(session: Arc<RwLock<GameSession>>) {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_millis(chat::RETENTION_MS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = session.write().await.prune_chat(unix_millis());
            info!("Chat maintenance pruned {} cached messages", removed);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::test_support::{account, open_world};
    use crate::net::connection::{outbox, Frame};
    use crate::net::protocol::decode;
    use crate::store::LevelUp;
    use crate::util::vec2::Vec2;
    use std::f32::consts::PI;
    use tokio::sync::mpsc;

    const T0_MS: u64 = 1_000_000;

    fn session() -> (GameSession, mpsc::Receiver<PersistJob>) {
        let metrics = Arc::new(Metrics::new());
        let (persist, jobs) = PersistQueue::detached(256, metrics.clone());
        (
            GameSession::new(open_world(Instant::now()), ChatLog::new(), persist, metrics),
            jobs,
        )
    }

    fn drain(rx: &mut mpsc::Receiver<Frame>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(decode(&frame).unwrap());
        }
        out
    }

    fn drain_jobs(rx: &mut mpsc::Receiver<PersistJob>) -> Vec<PersistJob> {
        let mut out = Vec::new();
        while let Ok(job) = rx.try_recv() {
            out.push(job);
        }
        out
    }

    fn join(
        game: &mut GameSession,
        record: AccountRecord,
        now: Instant,
    ) -> (SessionId, mpsc::Receiver<Frame>) {
        let (tx, rx) = outbox();
        (game.admit(record, tx, now, T0_MS).unwrap(), rx)
    }

    #[tokio::test]
    async fn test_admit_sends_init_then_announces() {
        let (mut game, _jobs) = session();
        let now = Instant::now();
        let (a, mut rx_a) = join(&mut game, account("a"), now);
        let (b, _rx_b) = join(&mut game, account("b"), now);

        let messages = drain(&mut rx_a);
        match &messages[0] {
            ServerMessage::Init(init) => {
                assert_eq!(init.session_id, a);
                assert!(init.pending_respawn.is_none());
            }
            other => panic!("expected init, got {other:?}"),
        }
        assert!(messages
            .iter()
            .any(|m| matches!(m, ServerMessage::PlayerJoined(p) if p.id == b)));
        assert!(messages.iter().any(
            |m| matches!(m, ServerMessage::ChatMessage(c) if c.text == "player-b joined the game")
        ));
        assert_eq!(game.player_count(), 2);
    }

    #[tokio::test]
    async fn test_second_login_evicts_first() {
        let (mut game, mut jobs) = session();
        let now = Instant::now();
        let (first, mut rx_first) = join(&mut game, account("a"), now);
        let (second, _rx_second) = join(&mut game, account("a"), now);

        assert_ne!(first, second);
        assert_eq!(game.session_for_account("a"), Some(second));
        assert!(!game.is_connected(first));
        assert!(game.game_loop.state.session(first).is_none());

        let messages = drain(&mut rx_first);
        assert!(matches!(
            messages.last(),
            Some(ServerMessage::ForceDisconnect { .. })
        ));
        // Sender dropped with the evicted connection
        assert!(rx_first.recv().await.is_none());

        assert!(drain_jobs(&mut jobs)
            .iter()
            .any(|j| matches!(j, PersistJob::FlushSession { account_id, .. } if account_id == "a")));
    }

    #[tokio::test]
    async fn test_recent_death_restores_pending_respawn() {
        let (mut game, _jobs) = session();
        let now = Instant::now();
        let mut record = account("a");
        record.last_death_at_ms = Some(T0_MS - 10_000);

        let (id, mut rx) = join(&mut game, record, now);
        match &drain(&mut rx)[0] {
            ServerMessage::Init(init) => {
                assert_eq!(init.pending_respawn, Some(PendingRespawnInfo { remaining_ms: 30_000 }));
            }
            other => panic!("expected init, got {other:?}"),
        }
        let session = game.game_loop.state.session(id).unwrap();
        assert!(matches!(session.life, LifeState::PendingRespawn { .. }));
        assert_eq!(game.game_loop.state.alive_count(), 0);

        game.tick(now + Duration::from_secs(31), T0_MS + 31_000);
        assert!(game.game_loop.state.session(id).unwrap().is_alive());
        assert!(drain(&mut rx)
            .iter()
            .any(|m| matches!(m, ServerMessage::Respawn { .. })));
    }

    #[tokio::test]
    async fn test_kill_notifies_and_persists() {
        let (mut game, mut jobs) = session();
        let now = Instant::now();
        let (a, mut rx_a) = join(&mut game, account("a"), now);
        let (b, mut rx_b) = join(&mut game, account("b"), now);

        let world = &mut game.game_loop.state;
        for (id, x, heading) in [(a, 1000.0, 0.0), (b, 1100.0, PI)] {
            let s = world.sessions.get_mut(&id).unwrap();
            s.position = Vec2::new(x, 1000.0);
            s.heading = heading;
            let bounds = s.bounds();
            world.player_grid.insert(id, bounds);
        }
        world.session_mut(b).unwrap().health = 20.0;
        drain(&mut rx_a);
        drain(&mut rx_b);
        drain_jobs(&mut jobs);

        game.handle_shoot(a, now);
        let mut t = now;
        for i in 1..=10 {
            t += Duration::from_millis(33);
            game.tick(t, T0_MS + i * 33);
        }

        let to_b = drain(&mut rx_b);
        assert!(to_b
            .iter()
            .any(|m| matches!(m, ServerMessage::Death { respawn_delay_ms: 40_000 })));
        assert!(to_b
            .iter()
            .any(|m| matches!(m, ServerMessage::StatsUpdate { kills: 0, deaths: 1 })));

        let to_a = drain(&mut rx_a);
        assert!(to_a.iter().any(|m| matches!(m, ServerMessage::BulletFired(_))));
        assert!(to_a
            .iter()
            .any(|m| matches!(m, ServerMessage::StatsUpdate { kills: 1, deaths: 0 })));
        assert!(to_a.iter().any(
            |m| matches!(m, ServerMessage::ChatMessage(c) if c.text == "player-a destroyed player-b")
        ));

        let jobs = drain_jobs(&mut jobs);
        assert!(jobs
            .iter()
            .any(|j| matches!(j, PersistJob::RecordDeath { account_id, .. } if account_id == "b")));
        assert!(jobs
            .iter()
            .any(|j| matches!(j, PersistJob::RecordKill { account_id, .. } if account_id == "a")));
        assert!(jobs.iter().any(|j| matches!(
            j,
            PersistJob::AddExperience { account_id, amount: 50, notify: Some(_), .. } if account_id == "a"
        )));

        // Reconnect before the store has seen the death: still pending
        game.disconnect(b, T0_MS + 1_000);
        let (b2, mut rx_b2) = join(&mut game, account("b"), t);
        match &drain(&mut rx_b2)[0] {
            ServerMessage::Init(init) => assert!(init.pending_respawn.is_some()),
            other => panic!("expected init, got {other:?}"),
        }
        assert!(!game.game_loop.state.session(b2).unwrap().is_alive());
    }

    #[tokio::test]
    async fn test_idle_tick_sends_no_delta() {
        let (mut game, _jobs) = session();
        let now = Instant::now();
        let (_a, mut rx) = join(&mut game, account("a"), now);

        game.tick(now + Duration::from_millis(33), T0_MS + 33);
        drain(&mut rx);
        game.tick(now + Duration::from_millis(66), T0_MS + 66);
        assert!(!drain(&mut rx)
            .iter()
            .any(|m| matches!(m, ServerMessage::DeltaState(_))));
    }

    #[tokio::test]
    async fn test_lost_delta_is_followed_by_resync() {
        let (mut game, _jobs) = session();
        let now = Instant::now();
        let (a, mut rx) = join(&mut game, account("a"), now);
        game.tick(now + Duration::from_millis(33), T0_MS + 33);
        drain(&mut rx);

        for i in 0..net::OUTBOX_CAPACITY {
            game.handle_ping(a, i as u64, T0_MS);
        }
        game.game_loop.state.session_mut(a).unwrap().position = Vec2::new(640.0, 480.0);
        game.tick(now + Duration::from_millis(66), T0_MS + 66);
        assert_eq!(drain(&mut rx).len(), net::OUTBOX_CAPACITY);

        // The world is idle now, so only the resync carries the move
        game.tick(now + Duration::from_millis(99), T0_MS + 99);
        match drain(&mut rx).as_slice() {
            [ServerMessage::Resync(snapshot)] => {
                assert_eq!(snapshot.world.players[0].id, a);
                assert_eq!(snapshot.world.players[0].position, Vec2::new(640.0, 480.0));
            }
            other => panic!("expected a single resync, got {other:?}"),
        }
        assert_eq!(game.metrics.resyncs_sent.load(Ordering::Relaxed), 1);

        game.tick(now + Duration::from_millis(132), T0_MS + 132);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_level_up_reaches_world_and_clients() {
        let (mut game, _jobs) = session();
        let now = Instant::now();
        let (a, mut rx_a) = join(&mut game, account("a"), now);
        let (_b, mut rx_b) = join(&mut game, account("b"), now);
        game.tick(now + Duration::from_millis(33), T0_MS + 33);
        drain(&mut rx_a);
        drain(&mut rx_b);

        game.level_ups
            .0
            .try_send(LevelUpNotice {
                account_id: "a".to_string(),
                level_up: LevelUp {
                    new_level: 2,
                    levels_gained: 1,
                    attribute_points: 2,
                },
            })
            .unwrap();
        game.tick(now + Duration::from_millis(66), T0_MS + 66);

        assert_eq!(game.game_loop.state.session(a).unwrap().level, 2);
        assert!(drain(&mut rx_a).contains(&ServerMessage::LevelUp {
            new_level: 2,
            attribute_points: 2
        }));
        assert!(drain(&mut rx_b).iter().any(|m| match m {
            ServerMessage::DeltaState(delta) => delta
                .players
                .as_ref()
                .is_some_and(|p| p.updated.iter().any(|u| u.id == a && u.level == Some(2))),
            _ => false,
        }));
        assert_eq!(game.metrics.level_ups.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_full_server_still_admits_reconnect() {
        let (game, _jobs) = session();
        let mut game = game.with_max_players(1);
        let now = Instant::now();
        let (first, _rx_first) = join(&mut game, account("a"), now);

        let (tx, _rx_b) = outbox();
        assert_eq!(
            game.admit(account("b"), tx, now, T0_MS),
            Err(AdmitError::ServerFull)
        );
        assert!(game.session_for_account("b").is_none());

        let (second, _rx_second) = join(&mut game, account("a"), now);
        assert_ne!(first, second);
        assert_eq!(game.player_count(), 1);
    }

    #[tokio::test]
    async fn test_spawner_activity_is_counted() {
        let (mut game, _jobs) = session();
        let now = Instant::now();

        game.tick(now + Duration::from_secs(5), T0_MS + 5_000);
        assert_eq!(game.metrics.power_ups_spawned.load(Ordering::Relaxed), 1);
        assert_eq!(game.metrics.power_ups_expired.load(Ordering::Relaxed), 0);

        // past the longest pickup lifetime
        game.tick(now + Duration::from_secs(96), T0_MS + 96_000);
        assert_eq!(game.metrics.power_ups_spawned.load(Ordering::Relaxed), 2);
        assert_eq!(game.metrics.power_ups_expired.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_chat_rate_limit_and_persist() {
        let (mut game, mut jobs) = session();
        let now = Instant::now();
        let (a, mut rx) = join(&mut game, account("a"), now);
        drain(&mut rx);
        drain_jobs(&mut jobs);

        for i in 0..4 {
            game.handle_chat(a, &format!("hello {i}"), T0_MS + i);
        }
        let chats = drain(&mut rx)
            .into_iter()
            .filter(|m| matches!(m, ServerMessage::ChatMessage(_)))
            .count();
        assert_eq!(chats, 3);
        assert_eq!(
            drain_jobs(&mut jobs)
                .iter()
                .filter(|j| matches!(j, PersistJob::AppendChat(_)))
                .count(),
            3
        );
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (mut game, _jobs) = session();
        let (a, mut rx) = join(&mut game, account("a"), Instant::now());
        drain(&mut rx);

        game.handle_ping(a, 42, T0_MS);
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::Pong {
                timestamp: 42,
                server_time_ms: T0_MS
            }]
        );
    }
}
