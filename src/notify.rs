use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcasts committed events per business, for the notification
/// collaborator (reminder emails, calendar sync) to follow.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a business's events. Creates the channel if needed.
    pub fn subscribe(&self, business_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(business_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, business_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&business_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a channel once its last subscriber is gone.
    pub fn prune(&self, business_id: &Ulid) {
        self.channels
            .remove_if(business_id, |_, sender| sender.receiver_count() == 0);
    }

    #[cfg(test)]
    pub(crate) fn has_channel(&self, business_id: &Ulid) -> bool {
        self.channels.contains_key(business_id)
    }
}
