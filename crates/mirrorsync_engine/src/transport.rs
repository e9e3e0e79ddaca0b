//! Message bus abstraction.
//!
//! A consumer subscribes to one named channel and receives raw payloads in
//! publish order. Losing a subscription ends its stream; the engine decides
//! whether to resubscribe.

use crate::config::ChannelConfig;
use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc;

/// One message as delivered by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Channel the message arrived on.
    pub channel: String,
    /// Raw payload.
    pub payload: Vec<u8>,
    /// Bus-assigned tag, increasing per channel.
    pub delivery_tag: u64,
    /// True if the bus delivered this message before.
    pub redelivered: bool,
}

/// An active subscription to one channel.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    receiver: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    /// Wraps a receiver.
    pub fn new(channel: impl Into<String>, receiver: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self {
            channel: channel.into(),
            receiver,
        }
    }

    /// Returns the channel name.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Waits for the next delivery. `None` means the subscription is gone.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }
}

/// A message bus delivering raw event payloads.
pub trait MessageBus: Send + Sync {
    /// Subscribes to a channel.
    fn subscribe(&self, channel: &ChannelConfig) -> SyncResult<Subscription>;
}

#[derive(Default)]
struct ChannelState {
    sender: Option<mpsc::UnboundedSender<Delivery>>,
    backlog: VecDeque<Delivery>,
    next_tag: u64,
    closed: bool,
}

/// An in-process message bus.
///
/// Messages published while nobody is subscribed are held and delivered to
/// the next subscriber, flagged as redelivered if a subscriber had already
/// gone away.
#[derive(Default)]
pub struct InMemoryBus {
    channels: Mutex<HashMap<String, ChannelState>>,
    failing_subscribes: Mutex<u32>,
}

impl InMemoryBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a payload. Returns its delivery tag.
    pub fn publish(&self, channel: &str, payload: impl Into<Vec<u8>>) -> SyncResult<u64> {
        let mut channels = self.channels.lock();
        let state = channels.entry(channel.to_string()).or_default();
        if state.closed {
            return Err(SyncError::Transport {
                message: format!("channel {} is closed", channel),
                retryable: false,
            });
        }

        state.next_tag += 1;
        let delivery = Delivery {
            channel: channel.to_string(),
            payload: payload.into(),
            delivery_tag: state.next_tag,
            redelivered: false,
        };

        match &state.sender {
            Some(sender) => {
                if let Err(returned) = sender.send(delivery) {
                    state.sender = None;
                    let mut delivery = returned.0;
                    delivery.redelivered = true;
                    state.backlog.push_back(delivery);
                }
            }
            None => state.backlog.push_back(delivery),
        }
        Ok(state.next_tag)
    }

    /// Closes a channel. Subscribers drain what was sent, then see the end.
    pub fn close(&self, channel: &str) {
        let mut channels = self.channels.lock();
        let state = channels.entry(channel.to_string()).or_default();
        state.closed = true;
        state.sender = None;
    }

    /// Drops the current subscriber without closing the channel.
    pub fn disconnect(&self, channel: &str) {
        if let Some(state) = self.channels.lock().get_mut(channel) {
            state.sender = None;
        }
    }

    /// Makes the next `count` subscribe calls fail with a retryable error.
    pub fn fail_next_subscribes(&self, count: u32) {
        *self.failing_subscribes.lock() = count;
    }

    /// Returns the number of messages waiting for a subscriber.
    pub fn backlog(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map_or(0, |state| state.backlog.len())
    }
}

impl MessageBus for InMemoryBus {
    fn subscribe(&self, channel: &ChannelConfig) -> SyncResult<Subscription> {
        {
            let mut failing = self.failing_subscribes.lock();
            if *failing > 0 {
                *failing -= 1;
                return Err(SyncError::transport_retryable(format!(
                    "broker unavailable for {}",
                    channel.name
                )));
            }
        }

        let mut channels = self.channels.lock();
        let state = channels.entry(channel.name.clone()).or_default();
        if state.closed && state.backlog.is_empty() {
            return Err(SyncError::Transport {
                message: format!("channel {} is closed", channel.name),
                retryable: false,
            });
        }
        let (sender, receiver) = mpsc::unbounded_channel();

        // Backlog first, so publish order is kept.
        for delivery in state.backlog.drain(..) {
            let _ = sender.send(delivery);
        }

        if state.closed {
            // Hand out what is left; the stream ends once drained.
            drop(sender);
        } else {
            state.sender = Some(sender);
        }
        Ok(Subscription::new(channel.name.clone(), receiver))
    }
}
