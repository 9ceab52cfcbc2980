use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{TimeOfDay, Weekday};

const CHANNEL_CAPACITY: usize = 256;

/// What happened to the appointment, from the requester's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    StatusAccepted,
    StatusRejected,
    MovedAndAccepted,
}

/// A delivery intent. The engine decides *that* and *what* to notify; an
/// embedding mailer subscribed to the hub decides *how*. Dispatch happens
/// after the durable commit and is fire-and-forget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationIntent {
    pub appointment: Ulid,
    pub kind: NotificationKind,
    /// Requester email address.
    pub recipient: String,
    pub requester_name: String,
    /// Display name of the provider, as supplied by the calling boundary.
    pub provider_name: String,
    /// Snapshot time of the appointment at the moment of the decision.
    pub weekday: Weekday,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

/// Broadcast hub for notification intents, one channel per provider.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<NotificationIntent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to intents for a provider. Creates the channel if needed.
    pub fn subscribe(&self, provider: Ulid) -> broadcast::Receiver<NotificationIntent> {
        let sender = self
            .channels
            .entry(provider)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an intent. No-op if nobody is listening; a lagging or closed
    /// receiver is logged and never fails the caller.
    pub fn send(&self, provider: Ulid, intent: NotificationIntent) {
        if let Some(sender) = self.channels.get(&provider) {
            if sender.send(intent).is_err() {
                tracing::debug!("notification dropped for provider {provider}: no receivers");
            }
            metrics::counter!(crate::observability::NOTIFICATIONS_TOTAL).increment(1);
        }
    }

    /// Remove a channel (e.g. when a provider is retired).
    pub fn remove(&self, provider: &Ulid) {
        self.channels.remove(provider);
    }
}
