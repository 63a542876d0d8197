pub mod dispatcher;
pub mod subscription;
pub mod typing;

pub use dispatcher::Dispatcher;
pub use subscription::{Liveness, Subscription};
pub use typing::TypingPresence;
