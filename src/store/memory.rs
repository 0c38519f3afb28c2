//! In-process store used for tests and when no data directory is configured

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{
    AccountRecord, ChatStore, LevelUp, OpId, PlayerStore, SessionSummary, StoreError, StoreState,
};
use crate::game::chat::ChatMessage;

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace an account
    pub fn upsert_account(&self, record: AccountRecord) {
        self.state.write().accounts.insert(record.account_id.clone(), record);
    }

    pub fn account(&self, account_id: &str) -> Option<AccountRecord> {
        self.state.read().accounts.get(account_id).cloned()
    }

    pub fn chat_len(&self) -> usize {
        self.state.read().chat.len()
    }
}

#[async_trait]
impl PlayerStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn load_account(&self, account_id: &str) -> Result<Option<AccountRecord>, StoreError> {
        Ok(self.account(account_id))
    }

    async fn register_account(&self, record: AccountRecord) -> Result<AccountRecord, StoreError> {
        let mut state = self.state.write();
        Ok(state
            .accounts
            .entry(record.account_id.clone())
            .or_insert(record)
            .clone())
    }

    async fn record_kill(&self, op_id: OpId, account_id: &str) -> Result<(), StoreError> {
        self.state.write().record_kill(op_id, account_id).map(|_| ())
    }

    async fn record_death(&self, op_id: OpId, account_id: &str, at_ms: u64) -> Result<(), StoreError> {
        self.state.write().record_death(op_id, account_id, at_ms).map(|_| ())
    }

    async fn add_experience(
        &self,
        op_id: OpId,
        account_id: &str,
        amount: u64,
    ) -> Result<Option<LevelUp>, StoreError> {
        self.state.write().add_experience(op_id, account_id, amount)
    }

    async fn flush_session(
        &self,
        op_id: OpId,
        account_id: &str,
        summary: &SessionSummary,
    ) -> Result<Option<LevelUp>, StoreError> {
        self.state.write().flush_session(op_id, account_id, summary)
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn append(&self, message: &ChatMessage) -> Result<(), StoreError> {
        self.state.write().append_chat(message);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        Ok(self.state.read().recent_chat(limit))
    }

    async fn prune_older_than(&self, cutoff_ms: u64) -> Result<usize, StoreError> {
        Ok(self.state.write().prune_chat(cutoff_ms))
    }
}
