pub mod cache;
pub mod config;
pub mod content;
pub mod error;
pub mod feed;
pub mod listener;
pub mod sqlite;
pub mod store;
pub mod synchronizer;
pub mod tracker;

pub use config::SyncConfig;
pub use error::SyncError;
pub use listener::{ChannelListener, MessageChange, SyncEvent};
pub use sqlite::SqliteStore;
pub use store::{ChangeFeed, ChangeStream, DataStore, DeleteOutcome, NewMessage, ReactionOp, StoreError};
pub use synchronizer::{ChannelSynchronizer, SendOptions};

pub use hearth_gateway::{Dispatcher, Subscription, TypingPresence};
pub use hearth_types::{Attachment, ChangeEvent, ChangeKind, MessageRecord, ReactionMap, TypingUser};
