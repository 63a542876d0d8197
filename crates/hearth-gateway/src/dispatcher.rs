use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;

use hearth_types::events::GatewayEvent;

const DEFAULT_CAPACITY: usize = 1024;

/// Fans gateway events out to every subscriber of a channel.
///
/// Each channel gets its own broadcast sender, created on first subscribe
/// and dropped once its last receiver goes away.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    capacity: usize,

    /// channel_id -> broadcast sender
    channels: RwLock<HashMap<Uuid, broadcast::Sender<GatewayEvent>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// `capacity` bounds how far a slow subscriber may lag before it starts
    /// losing events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                capacity: capacity.max(1),
                channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to events for one channel.
    pub fn subscribe(&self, channel_id: Uuid) -> broadcast::Receiver<GatewayEvent> {
        let mut channels = self
            .inner
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        channels
            .entry(channel_id)
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .subscribe()
    }

    /// Deliver an event to the subscribers of its channel.
    /// Returns how many receivers it reached.
    pub fn broadcast(&self, event: GatewayEvent) -> usize {
        let channel_id = event.channel_id();

        let delivered = {
            let channels = self
                .inner
                .channels
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match channels.get(&channel_id) {
                Some(tx) => tx.send(event).ok(),
                None => {
                    trace!("No subscribers for channel {}", channel_id);
                    return 0;
                }
            }
        };

        match delivered {
            Some(n) => n,
            None => {
                self.prune(channel_id);
                0
            }
        }
    }

    /// Number of live receivers on a channel.
    pub fn receiver_count(&self, channel_id: Uuid) -> usize {
        self.inner
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel_id)
            .map_or(0, |tx| tx.receiver_count())
    }

    fn prune(&self, channel_id: Uuid) {
        let mut channels = self
            .inner
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        // A subscriber may have arrived between the failed send and this lock
        if channels
            .get(&channel_id)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            channels.remove(&channel_id);
            debug!("Dropped idle channel {}", channel_id);
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
