use std::collections::HashSet;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Named pub/sub channels carrying JSON payloads.
///
/// Delivery is in publish order per channel; nothing is buffered for channels
/// without listeners.
pub trait EventChannel: Send + Sync {
    fn subscribe(&self, channel: &str) -> Subscription;

    /// Releases one listener. Unknown handles are ignored.
    fn unsubscribe(&self, handle: &SubscriptionHandle);

    /// Returns the number of receivers the payload reached.
    fn publish(&self, channel: &str, payload: Value) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub channel: String,
    pub id: Uuid,
}

pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub receiver: broadcast::Receiver<Value>,
}

struct ChannelSlot {
    sender: broadcast::Sender<Value>,
    listeners: HashSet<Uuid>,
}

pub struct ChannelHub {
    channels: DashMap<String, ChannelSlot>,
    buffer_size: usize,
}

impl ChannelHub {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            channels: DashMap::new(),
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map_or(0, |slot| slot.listeners.len())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl EventChannel for ChannelHub {
    fn subscribe(&self, channel: &str) -> Subscription {
        let mut slot = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| ChannelSlot {
                sender: broadcast::channel(self.buffer_size).0,
                listeners: HashSet::new(),
            });

        let id = Uuid::new_v4();
        slot.listeners.insert(id);
        debug!(channel, listeners = slot.listeners.len(), "channel subscribed");

        Subscription {
            handle: SubscriptionHandle {
                channel: channel.to_string(),
                id,
            },
            receiver: slot.sender.subscribe(),
        }
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) {
        // Dropping the last slot drops its sender, which closes any receiver still alive.
        self.channels.remove_if_mut(&handle.channel, |_, slot| {
            slot.listeners.remove(&handle.id);
            slot.listeners.is_empty()
        });
        debug!(channel = %handle.channel, "channel unsubscribed");
    }

    fn publish(&self, channel: &str, payload: Value) -> usize {
        match self.channels.get(channel) {
            Some(slot) => slot.sender.send(payload).unwrap_or(0),
            None => 0,
        }
    }
}
