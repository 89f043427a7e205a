//! Real-time private messaging core: one STOMP-over-WebSocket broker connection,
//! a message router, conversation state, unread counters and presence polling.

pub mod chat;
pub mod common;
pub mod config;
pub mod network;

pub use chat::{
    ChatSession, ConversationSession, ConversationView, PresenceTracker, UnreadRegistry,
};
pub use common::{ChatError, ChatResult, ConnectionState, Identity, Message, MessageType, UserId};
pub use config::ChatConfig;
