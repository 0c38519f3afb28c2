//! Chat: sanitizing, per-sender rate limiting and the bounded in-memory history

use std::collections::VecDeque;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::game::constants::chat;
use crate::game::state::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatKind {
    Global,
    System,
    Kill,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: u64,
    /// `None` for server-generated lines
    pub sender_id: Option<SessionId>,
    pub sender: String,
    pub text: String,
    pub kind: ChatKind,
    pub timestamp_ms: u64,
}

/// Why a player message was not accepted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Message is empty after sanitizing")]
    Empty,
    #[error("Message contains banned content")]
    Banned,
}

#[derive(Debug, Clone, Copy)]
struct RateBucket {
    count: u32,
    window_start_ms: u64,
}

/// Collapse whitespace, cap the length and reject banned content
pub fn sanitize(raw: &str) -> Result<String, ChatError> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let text: String = collapsed.chars().take(chat::MAX_LENGTH).collect();

    if text.is_empty() {
        return Err(ChatError::Empty);
    }

    let lowered = text.to_lowercase();
    if chat::BANNED_WORDS.iter().any(|w| lowered.contains(w)) {
        return Err(ChatError::Banned);
    }

    Ok(text)
}

/// In-memory chat history plus rate-limit buckets
pub struct ChatLog {
    messages: VecDeque<ChatMessage>,
    capacity: usize,
    next_id: u64,
    buckets: HashMap<SessionId, RateBucket>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::with_capacity(chat::MAX_MESSAGES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 0,
            buckets: HashMap::new(),
        }
    }

    /// Load persisted history; new ids continue after the highest one seen
    pub fn seed(&mut self, history: Vec<ChatMessage>) {
        self.merge(history);
    }

    /// Post a player message, applying the rate limit then sanitizing
    pub fn post_player(
        &mut self,
        sender_id: SessionId,
        sender: &str,
        raw: &str,
        now_ms: u64,
    ) -> Result<ChatMessage, ChatError> {
        self.check_rate(sender_id, now_ms)?;
        let text = sanitize(raw)?;
        Ok(self.push(Some(sender_id), sender.to_string(), text, ChatKind::Global, now_ms))
    }

    /// Post a server line; never rate limited
    pub fn post_system(&mut self, text: String, kind: ChatKind, now_ms: u64) -> ChatMessage {
        self.push(None, "System".to_string(), text, kind, now_ms)
    }

    fn check_rate(&mut self, sender_id: SessionId, now_ms: u64) -> Result<(), ChatError> {
        let bucket = self.buckets.entry(sender_id).or_insert(RateBucket {
            count: 0,
            window_start_ms: now_ms,
        });

        if now_ms.saturating_sub(bucket.window_start_ms) > chat::RATE_WINDOW_MS {
            bucket.count = 0;
            bucket.window_start_ms = now_ms;
        }

        if bucket.count >= chat::RATE_LIMIT {
            return Err(ChatError::RateLimited);
        }
        bucket.count += 1;
        Ok(())
    }

    fn push(
        &mut self,
        sender_id: Option<SessionId>,
        sender: String,
        text: String,
        kind: ChatKind,
        now_ms: u64,
    ) -> ChatMessage {
        let message = ChatMessage {
            id: self.next_id,
            sender_id,
            sender,
            text,
            kind,
            timestamp_ms: now_ms,
        };
        self.next_id += 1;

        self.messages.push_back(message.clone());
        while self.messages.len() > self.capacity {
            self.messages.pop_front();
        }
        message
    }

    /// Up to `n` most recent messages, oldest first
    pub fn recent(&self, n: usize) -> Vec<ChatMessage> {
        let skip = self.messages.len().saturating_sub(n);
        self.messages.iter().skip(skip).cloned().collect()
    }

    /// Fold messages from the durable store into the cache
    pub fn merge(&mut self, fetched: Vec<ChatMessage>) {
        let mut combined: Vec<ChatMessage> = self.messages.drain(..).collect();
        for message in fetched {
            if !combined.iter().any(|m| m.id == message.id) {
                combined.push(message);
            }
        }
        combined.sort_by_key(|m| m.id);

        if let Some(last) = combined.last() {
            self.next_id = self.next_id.max(last.id + 1);
        }

        let skip = combined.len().saturating_sub(self.capacity);
        self.messages.extend(combined.into_iter().skip(skip));
    }

    /// Drop a disconnected sender's rate bucket
    pub fn forget_sender(&mut self, sender_id: SessionId) {
        self.buckets.remove(&sender_id);
    }

    /// Remove cached messages older than `cutoff_ms`; returns how many were dropped
    pub fn prune_older_than(&mut self, cutoff_ms: u64) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| m.timestamp_ms >= cutoff_ms);
        before - self.messages.len()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for ChatLog {
    fn default() -> Self {
        Self::new()
    }
}
