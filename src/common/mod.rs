pub mod commands;
pub mod error;
pub mod events;
pub mod types;

pub use commands::TransportCommand;
pub use error::{ChatError, ChatResult};
pub use events::ConnectionState;
pub use types::{Identity, Message, MessageType, OutboundFrame, UserId};
