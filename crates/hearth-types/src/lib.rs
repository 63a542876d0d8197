pub mod events;
pub mod models;
pub mod reactions;

pub use events::{ChangeEvent, ChangeKind, GatewayEvent, TypingUser};
pub use models::{Attachment, MessageRecord};
pub use reactions::{Reaction, ReactionMap};
