pub mod conversation;
pub mod presence;
pub mod session;
pub mod timer;
pub mod transcript;
pub mod unread;

#[cfg(test)]
mod testing;

pub use conversation::{ConversationSession, ConversationView};
pub use presence::PresenceTracker;
pub use session::ChatSession;
pub use unread::UnreadRegistry;
