use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::game::constants::net::OUTBOX_CAPACITY;
use crate::game::state::SessionId;
use crate::net::protocol::{encode, EncodeError, ServerMessage};
use crate::store::AccountId;

/// One encoded server message, shared between every outbox it is broadcast to
pub type Frame = Arc<[u8]>;

/// Sending half of a connection's bounded outbound queue
pub type Outbox = mpsc::Sender<Frame>;

pub fn outbox() -> (Outbox, mpsc::Receiver<Frame>) {
    mpsc::channel(OUTBOX_CAPACITY)
}

pub fn encode_frame(message: &ServerMessage) -> Result<Frame, EncodeError> {
    encode(message).map(Frame::from)
}

/// Outcome of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Outbox full; the message was dropped
    Dropped,
    /// Writer has gone away
    Closed,
}

/// Queue `frame` without waiting
pub fn try_deliver(outbox: &Outbox, frame: &Frame) -> Delivery {
    match outbox.try_send(frame.clone()) {
        Ok(()) => Delivery::Queued,
        Err(TrySendError::Full(_)) => Delivery::Dropped,
        Err(TrySendError::Closed(_)) => Delivery::Closed,
    }
}

/// An authenticated connection bound to a session
#[derive(Debug)]
pub struct PlayerConnection {
    pub session_id: SessionId,
    pub account_id: AccountId,
    pub username: String,
    pub outbox: Outbox,
    pub connected_at: Instant,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    /// Set when a frame was lost; the next tick sends a full snapshot instead of a delta
    pub needs_resync: bool,
}

impl PlayerConnection {
    pub fn new(session_id: SessionId, account_id: AccountId, username: String, outbox: Outbox) -> Self {
        Self {
            session_id,
            account_id,
            username,
            outbox,
            connected_at: Instant::now(),
            frames_sent: 0,
            frames_dropped: 0,
            needs_resync: false,
        }
    }

    /// Enqueue a frame; never blocks the caller
    pub fn send_frame(&mut self, frame: &Frame) -> Delivery {
        let delivery = try_deliver(&self.outbox, frame);
        match delivery {
            Delivery::Queued => self.frames_sent += 1,
            Delivery::Dropped => {
                self.frames_dropped += 1;
                self.needs_resync = true;
                warn!("Outbox full for {}, dropping message", self.username);
            }
            Delivery::Closed => debug!("Outbox closed for {}", self.username),
        }
        delivery
    }

    pub fn send(&mut self, message: &ServerMessage) -> Delivery {
        match encode_frame(message) {
            Ok(frame) => self.send_frame(&frame),
            Err(e) => {
                warn!("Failed to encode message for {}: {}", self.username, e);
                Delivery::Dropped
            }
        }
    }
}
