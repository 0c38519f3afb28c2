//! Bounded persistence queue
//!
//! The tick and message handlers enqueue jobs with `try_send`; one worker task
//! applies them to the stores in order. A full queue drops the job.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{AccountId, ChatStore, LevelUp, OpId, PlayerStore, SessionSummary, StoreError};
use crate::game::chat::ChatMessage;
use crate::metrics::Metrics;

/// A level-up reported back to the game session that earned it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelUpNotice {
    pub account_id: AccountId,
    pub level_up: LevelUp,
}

/// Where the worker reports level-ups
pub type LevelUpSender = mpsc::Sender<LevelUpNotice>;

/// One durable write
#[derive(Debug)]
pub enum PersistJob {
    RecordKill {
        op_id: OpId,
        account_id: AccountId,
    },
    RecordDeath {
        op_id: OpId,
        account_id: AccountId,
        at_ms: u64,
    },
    AddExperience {
        op_id: OpId,
        account_id: AccountId,
        amount: u64,
        /// Where to report a resulting level-up
        notify: Option<LevelUpSender>,
    },
    FlushSession {
        op_id: OpId,
        account_id: AccountId,
        summary: SessionSummary,
    },
    AppendChat(ChatMessage),
    PruneChat {
        cutoff_ms: u64,
    },
}

impl PersistJob {
    pub fn record_kill(account_id: AccountId) -> Self {
        Self::RecordKill {
            op_id: Uuid::new_v4(),
            account_id,
        }
    }

    pub fn record_death(account_id: AccountId, at_ms: u64) -> Self {
        Self::RecordDeath {
            op_id: Uuid::new_v4(),
            account_id,
            at_ms,
        }
    }

    pub fn add_experience(account_id: AccountId, amount: u64, notify: Option<LevelUpSender>) -> Self {
        Self::AddExperience {
            op_id: Uuid::new_v4(),
            account_id,
            amount,
            notify,
        }
    }

    pub fn flush_session(account_id: AccountId, summary: SessionSummary) -> Self {
        Self::FlushSession {
            op_id: Uuid::new_v4(),
            account_id,
            summary,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            PersistJob::RecordKill { .. } => "record_kill",
            PersistJob::RecordDeath { .. } => "record_death",
            PersistJob::AddExperience { .. } => "add_experience",
            PersistJob::FlushSession { .. } => "flush_session",
            PersistJob::AppendChat(_) => "append_chat",
            PersistJob::PruneChat { .. } => "prune_chat",
        }
    }
}

/// Handle used by the game session to enqueue jobs
#[derive(Clone)]
pub struct PersistQueue {
    tx: mpsc::Sender<PersistJob>,
    metrics: Arc<Metrics>,
}

impl PersistQueue {
    /// Create the queue and spawn its worker
    pub fn spawn(
        players: Arc<dyn PlayerStore>,
        chat: Arc<dyn ChatStore>,
        capacity: usize,
        metrics: Arc<Metrics>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let worker = PersistWorker {
            players,
            chat,
            metrics: metrics.clone(),
        };
        let handle = tokio::spawn(worker.run(rx));
        (Self { tx, metrics }, handle)
    }

    /// Enqueue without waiting; returns false when the job was dropped
    pub fn push(&self, job: PersistJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.metrics.persist_dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Persistence queue full, dropping {}", job.name());
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.metrics.persist_dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Persistence worker stopped, dropping {}", job.name());
                false
            }
        }
    }

    /// Jobs accepted but not yet picked up by the worker
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Wait up to `timeout` for the worker to pick up everything queued so far
    pub async fn settle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.pending() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn detached(capacity: usize, metrics: Arc<Metrics>) -> (Self, mpsc::Receiver<PersistJob>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, metrics }, rx)
    }
}

struct PersistWorker {
    players: Arc<dyn PlayerStore>,
    chat: Arc<dyn ChatStore>,
    metrics: Arc<Metrics>,
}

impl PersistWorker {
    async fn run(self, mut rx: mpsc::Receiver<PersistJob>) {
        while let Some(job) = rx.recv().await {
            let name = job.name();
            match self.apply(job).await {
                Ok(()) => {
                    self.metrics.persist_jobs.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.metrics.persist_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Persistence job {} failed: {}", name, e);
                }
            }
        }
        info!("Persistence worker stopped");
    }

    async fn apply(&self, job: PersistJob) -> Result<(), StoreError> {
        match job {
            PersistJob::RecordKill { op_id, account_id } => {
                self.players.record_kill(op_id, &account_id).await
            }
            PersistJob::RecordDeath {
                op_id,
                account_id,
                at_ms,
            } => self.players.record_death(op_id, &account_id, at_ms).await,
            PersistJob::AddExperience {
                op_id,
                account_id,
                amount,
                notify,
            } => {
                let level_up = self.players.add_experience(op_id, &account_id, amount).await?;
                if let (Some(level_up), Some(notify)) = (level_up, notify) {
                    let notice = LevelUpNotice { account_id, level_up };
                    if let Err(e) = notify.try_send(notice) {
                        warn!("Level-up notice dropped: {}", e);
                    }
                }
                Ok(())
            }
            PersistJob::FlushSession {
                op_id,
                account_id,
                summary,
            } => {
                let level_up = self.players.flush_session(op_id, &account_id, &summary).await?;
                if let Some(level_up) = level_up {
                    debug!("{} reached level {} on session flush", account_id, level_up.new_level);
                }
                Ok(())
            }
            PersistJob::AppendChat(message) => self.chat.append(&message).await,
            PersistJob::PruneChat { cutoff_ms } => {
                let removed = self.chat.prune_older_than(cutoff_ms).await?;
                if removed > 0 {
                    info!("Pruned {} stored chat messages", removed);
                }
                Ok(())
            }
        }
    }
}
