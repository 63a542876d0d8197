use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use uuid::Uuid;

use hearth_gateway::Dispatcher;
use hearth_types::GatewayEvent;

use crate::store::{ChangeFeed, ChangeStream};

/// The push hub doubles as the change feed: message changes published by a
/// store are filtered out of the channel's gateway events.
impl ChangeFeed for Dispatcher {
    fn subscribe(&self, channel_id: Uuid) -> ChangeStream {
        let mut rx = Dispatcher::subscribe(self, channel_id);

        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(GatewayEvent::MessageChange(change)) => yield change,
                    Ok(_) => continue,
                    Err(RecvError::Lagged(n)) => {
                        warn!("Change feed for {} lagged by {} events", channel_id, n);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
