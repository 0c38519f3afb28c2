//! JSON file store: the whole state lives in one document under the data
//! directory and is rewritten (write-then-rename) after every mutation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use super::{
    AccountRecord, ChatStore, LevelUp, OpId, PlayerStore, SessionSummary, StoreError, StoreState,
};
use crate::game::chat::ChatMessage;

const STORE_FILE: &str = "store.json";
const STORE_TMP_FILE: &str = "store.json.tmp";

pub struct FileStore {
    dir: PathBuf,
    /// Held across the file write so snapshots land in mutation order
    state: Mutex<StoreState>,
}

impl FileStore {
    /// Open (or initialize) the store under `dir`
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(STORE_FILE);
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let mut state: StoreState = serde_json::from_slice(&bytes)?;
                state.reindex();
                info!(
                    "Loaded store from {} ({} accounts, {} chat messages)",
                    path.display(),
                    state.accounts.len(),
                    state.chat.len()
                );
                state
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            dir,
            state: Mutex::new(state),
        })
    }

    async fn save(&self, state: &StoreState) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp = self.dir.join(STORE_TMP_FILE);
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, self.dir.join(STORE_FILE)).await?;
        Ok(())
    }

    /// Create or replace an account
    pub async fn upsert_account(&self, record: AccountRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.accounts.insert(record.account_id.clone(), record);
        self.save(&state).await
    }
}

#[async_trait]
impl PlayerStore for FileStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let meta = tokio::fs::metadata(&self.dir).await?;
        if meta.is_dir() {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("{} is not a directory", self.dir.display())))
        }
    }

    async fn load_account(&self, account_id: &str) -> Result<Option<AccountRecord>, StoreError> {
        Ok(self.state.lock().await.accounts.get(account_id).cloned())
    }

    async fn register_account(&self, record: AccountRecord) -> Result<AccountRecord, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.accounts.get(&record.account_id) {
            return Ok(existing.clone());
        }
        state.accounts.insert(record.account_id.clone(), record.clone());
        self.save(&state).await?;
        Ok(record)
    }

    async fn record_kill(&self, op_id: OpId, account_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.record_kill(op_id, account_id)? {
            self.save(&state).await?;
        }
        Ok(())
    }

    async fn record_death(&self, op_id: OpId, account_id: &str, at_ms: u64) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.record_death(op_id, account_id, at_ms)? {
            self.save(&state).await?;
        }
        Ok(())
    }

    async fn add_experience(
        &self,
        op_id: OpId,
        account_id: &str,
        amount: u64,
    ) -> Result<Option<LevelUp>, StoreError> {
        let mut state = self.state.lock().await;
        let level_up = state.add_experience(op_id, account_id, amount)?;
        self.save(&state).await?;
        Ok(level_up)
    }

    async fn flush_session(
        &self,
        op_id: OpId,
        account_id: &str,
        summary: &SessionSummary,
    ) -> Result<Option<LevelUp>, StoreError> {
        let mut state = self.state.lock().await;
        let level_up = state.flush_session(op_id, account_id, summary)?;
        self.save(&state).await?;
        Ok(level_up)
    }
}

#[async_trait]
impl ChatStore for FileStore {
    async fn append(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.append_chat(message);
        self.save(&state).await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self.state.lock().await.recent_chat(limit))
    }

    async fn prune_older_than(&self, cutoff_ms: u64) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let removed = state.prune_chat(cutoff_ms);
        if removed > 0 {
            self.save(&state).await?;
        }
        Ok(removed)
    }
}
