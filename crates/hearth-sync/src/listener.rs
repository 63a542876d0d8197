use tracing::warn;
use uuid::Uuid;

use hearth_types::MessageRecord;

use crate::error::SyncError;

/// Change to a channel's rendered message sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageChange {
    /// Optimistic record shown before the store has seen it.
    Pending(MessageRecord),
    /// Confirmed record with no local counterpart; goes at the end.
    Appended(MessageRecord),
    /// The pending slot `temp_id` now holds `record`, same position.
    Replaced { temp_id: Uuid, record: MessageRecord },
    /// The pending slot `temp_id` is gone; its confirmed record is already
    /// shown elsewhere or was deleted.
    Retracted { temp_id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Message(MessageChange),
    /// Content or reactions of a confirmed record changed.
    Edited(MessageRecord),
    Deleted { message_id: Uuid },
    /// Persisting a send failed; its pending slot has been removed.
    SendFailed { temp_id: Uuid, error: SyncError },
}

/// Callback form of a channel subscription.
pub trait ChannelListener: Send + Sync + 'static {
    fn on_message(&self, change: MessageChange);

    fn on_edit(&self, record: MessageRecord);

    fn on_delete(&self, message_id: Uuid);

    fn on_send_failed(&self, temp_id: Uuid, error: SyncError) {
        warn!("Send {} failed with no handler: {}", temp_id, error);
    }
}

pub(crate) fn deliver<L: ChannelListener + ?Sized>(listener: &L, event: SyncEvent) {
    match event {
        SyncEvent::Message(change) => listener.on_message(change),
        SyncEvent::Edited(record) => listener.on_edit(record),
        SyncEvent::Deleted { message_id } => listener.on_delete(message_id),
        SyncEvent::SendFailed { temp_id, error } => listener.on_send_failed(temp_id, error),
    }
}
