pub mod api;
pub mod client;
pub mod router;
pub mod stomp;
pub mod transport;

pub use api::{ChatApi, HttpChatApi};
pub use client::{FramePublisher, TransportConfig, TransportConnection};
pub use router::{ListenerId, MessageRouter};
