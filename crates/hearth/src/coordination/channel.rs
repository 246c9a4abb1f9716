//! Named pub/sub channels between sessions of one instance.
//!
//! [`LocalBroadcastHub`] runs every channel over `tokio::sync::broadcast`.
//! Messages travel as JSON strings so that receivers decode exactly what a
//! cross-process transport would deliver; undecodable messages are skipped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::error::BroadcastError;

use super::message::Envelope;

/// Channel carrying migration lifecycle messages.
pub const MIGRATION_CHANNEL: &str = "hearth-migration";

const DEFAULT_CAPACITY: usize = 256;

pub trait BroadcastChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver to every current subscriber, the sender's own included.
    /// Posting with no subscribers is not an error.
    fn post(&self, envelope: &Envelope) -> Result<(), BroadcastError>;

    fn subscribe(&self) -> Subscription;
}

// ============================================================================
// Subscription
// ============================================================================

pub struct Subscription {
    channel: String,
    rx: broadcast::Receiver<String>,
}

impl Subscription {
    fn decode(&self, raw: &str) -> Option<Envelope> {
        match serde_json::from_str(raw) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                tracing::warn!(channel = %self.channel, error = %e, "dropping malformed broadcast");
                None
            }
        }
    }

    /// Wait for the next decodable message. `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.recv().await {
                Ok(raw) => {
                    if let Some(envelope) = self.decode(&raw) {
                        return Some(envelope);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(channel = %self.channel, skipped, "broadcast receiver lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// The next already-delivered message, without waiting.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.try_recv() {
                Ok(raw) => {
                    if let Some(envelope) = self.decode(&raw) {
                        return Some(envelope);
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(channel = %self.channel, skipped, "broadcast receiver lagged");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

// ============================================================================
// LocalBroadcastHub
// ============================================================================

/// In-process hub handing out named channels. Channels with the same name
/// share one underlying broadcast.
pub struct LocalBroadcastHub {
    senders: Mutex<HashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl LocalBroadcastHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            senders: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn channel(&self, name: &str) -> Arc<LocalChannel> {
        let sender = self
            .senders
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone();
        Arc::new(LocalChannel {
            name: name.to_string(),
            sender,
            closed: AtomicBool::new(false),
        })
    }
}

impl Default for LocalBroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One session's handle on a hub channel.
pub struct LocalChannel {
    name: String,
    sender: broadcast::Sender<String>,
    closed: AtomicBool,
}

impl LocalChannel {
    /// Stop posting from this handle. Subscriptions already handed out keep
    /// receiving what other handles post.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl BroadcastChannel for LocalChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn post(&self, envelope: &Envelope) -> Result<(), BroadcastError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BroadcastError::Closed(self.name.clone()));
        }
        let raw = serde_json::to_string(envelope)?;
        // Err only means nobody is listening right now.
        let _ = self.sender.send(raw);
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        Subscription {
            channel: self.name.clone(),
            rx: self.sender.subscribe(),
        }
    }
}
