//! Channel registry and rendezvous engine.
//!
//! Channels live in a sharded map; each channel guards its own waiter set, so
//! traffic on one channel never serializes behind another. A publish hands the
//! message to every subscriber waiting at that instant and keeps nothing. A
//! channel exists only while someone waits on it: the first subscriber creates
//! it and the last one to leave removes it.
//!
//! ## Invariants
//!
//! - Delivery into a waiter's slot happens under the channel's write lock, and a
//!   waiter deregisters under the same lock before concluding it timed out or was
//!   canceled. A message is therefore either received or never counted.
//! - Channels are removed only under the map's shard write lock and only when
//!   their waiter set is empty. Registration and delivery hold at least the shard
//!   read lock, so a waiter can never attach to a channel that is being removed.

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use patchwork_types::ChannelName;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Unique id of one blocked subscribe call.
pub type WaitId = u64;

/// A published payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Opaque body bytes.
    pub body: Bytes,
    /// Content type supplied by the publisher, if any.
    pub content_type: Option<String>,
}

impl Message {
    /// Create a message from a body and optional content type.
    pub fn new(body: impl Into<Bytes>, content_type: Option<String>) -> Self {
        Self {
            body: body.into(),
            content_type,
        }
    }
}

/// How a subscribe call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A publish fulfilled the wait.
    Delivered(Message),
    /// The deadline passed with no publish.
    TimedOut,
    /// The cancellation signal fired first.
    Canceled,
}

#[derive(Debug)]
struct Channel {
    waiters: RwLock<HashMap<WaitId, oneshot::Sender<Message>>>,
}

impl Channel {
    fn new() -> Self {
        Self {
            waiters: RwLock::new(HashMap::new()),
        }
    }

    fn add_waiter(&self, id: WaitId, slot: oneshot::Sender<Message>) {
        self.waiters.write().insert(id, slot);
    }

    fn remove_waiter(&self, id: WaitId) {
        self.waiters.write().remove(&id);
    }

    fn deliver(&self, message: &Message) -> usize {
        std::mem::take(&mut *self.waiters.write())
            .into_values()
            .map(|slot| slot.send(message.clone()).is_ok())
            .filter(|sent| *sent)
            .count()
    }

    fn waiter_count(&self) -> usize {
        self.waiters.read().len()
    }
}

/// Registry of live channels.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: DashMap<ChannelName, Channel>,
    next_wait_id: AtomicU64,
}

/// A registered subscriber slot.
///
/// Dropping it (including when the request future is dropped on client
/// disconnect) removes the slot from its channel.
struct PendingWait<'a> {
    registry: &'a ChannelRegistry,
    channel: &'a ChannelName,
    id: WaitId,
    deadline: Instant,
}

impl Drop for PendingWait<'_> {
    fn drop(&mut self) {
        if let Some(channel) = self.registry.channels.get(self.channel) {
            channel.remove_waiter(self.id);
        }
        // The shard read guard above is released; take the write lock to drop
        // the channel with its last waiter.
        self.registry
            .channels
            .remove_if(self.channel, |_, channel| channel.waiter_count() == 0);
    }
}

enum Wake {
    Slot(Result<Message, oneshot::error::RecvError>),
    Deadline,
    Cancel,
}

fn late_delivery(receiver: &mut oneshot::Receiver<Message>) -> Option<WaitOutcome> {
    receiver.try_recv().ok().map(WaitOutcome::Delivered)
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand `message` to every subscriber currently waiting on `channel`.
    ///
    /// Returns how many waiters received it. Zero waiters is not an error; the
    /// message is simply dropped.
    pub fn publish(&self, channel: &ChannelName, message: Message) -> usize {
        let delivered = self
            .channels
            .get(channel)
            .map_or(0, |existing| existing.deliver(&message));

        tracing::debug!(
            "Published {} bytes to {} ({} waiters)",
            message.body.len(),
            channel,
            delivered
        );
        delivered
    }

    /// Wait on `channel` until a publish, the timeout, or `cancel` resolves.
    pub async fn subscribe<F>(
        &self,
        channel: &ChannelName,
        timeout: Duration,
        cancel: F,
    ) -> WaitOutcome
    where
        F: Future<Output = ()>,
    {
        let (slot, mut receiver) = oneshot::channel();
        let wait = self.register(channel, slot, timeout);
        let wait_id = wait.id;

        tracing::debug!("Waiter {} registered on {} ({:?})", wait_id, channel, timeout);

        tokio::pin!(cancel);
        let wake = tokio::select! {
            biased;
            received = &mut receiver => Wake::Slot(received),
            _ = tokio::time::sleep_until(wait.deadline) => Wake::Deadline,
            _ = &mut cancel => Wake::Cancel,
        };

        let outcome = match wake {
            Wake::Slot(Ok(message)) => WaitOutcome::Delivered(message),
            // Slot dropped without a send: the waiter was torn down underneath us.
            Wake::Slot(Err(_)) => WaitOutcome::Canceled,
            // Deregister first; a publish that won the race is still honoured.
            Wake::Deadline => {
                drop(wait);
                late_delivery(&mut receiver).unwrap_or(WaitOutcome::TimedOut)
            }
            Wake::Cancel => {
                drop(wait);
                late_delivery(&mut receiver).unwrap_or(WaitOutcome::Canceled)
            }
        };

        tracing::debug!(
            "Waiter {} on {} finished: {}",
            wait_id,
            channel,
            match &outcome {
                WaitOutcome::Delivered(_) => "delivered",
                WaitOutcome::TimedOut => "timed out",
                WaitOutcome::Canceled => "canceled",
            }
        );
        outcome
    }

    fn register<'a>(
        &'a self,
        channel: &'a ChannelName,
        slot: oneshot::Sender<Message>,
        timeout: Duration,
    ) -> PendingWait<'a> {
        let id = self.next_wait_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + timeout;

        match self.channels.get(channel) {
            Some(existing) => existing.add_waiter(id, slot),
            None => self
                .channels
                .entry(channel.clone())
                .or_insert_with(Channel::new)
                .add_waiter(id, slot),
        }

        PendingWait {
            registry: self,
            channel,
            id,
            deadline,
        }
    }

    /// Number of subscribers currently waiting on `channel`.
    pub fn waiter_count(&self, channel: &ChannelName) -> usize {
        self.channels
            .get(channel)
            .map(|c| c.waiter_count())
            .unwrap_or(0)
    }

    /// Number of subscribers waiting across all channels.
    pub fn total_waiters(&self) -> usize {
        self.channels.iter().map(|c| c.waiter_count()).sum()
    }

    /// Number of live channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
