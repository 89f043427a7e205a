use std::sync::Arc;

use tokio::sync::watch;

use crate::common::{ChatResult, ConnectionState, Identity};
use crate::config::ChatConfig;
use crate::network::{ChatApi, MessageRouter, TransportConfig, TransportConnection};

use super::conversation::ConversationSession;
use super::presence::PresenceTracker;
use super::unread::UnreadRegistry;

/// Everything one logged-in user needs: a single broker connection, the router
/// fed by it, unread counters, presence polling and a conversation controller.
pub struct ChatSession {
    identity: Identity,
    api: Arc<dyn ChatApi>,
    transport: TransportConnection,
    router: MessageRouter,
    unread: UnreadRegistry,
    presence: PresenceTracker,
    conversation: ConversationSession,
}

impl ChatSession {
    /// Wires the components and starts connecting. Must run inside a tokio runtime.
    pub fn start(
        config: &ChatConfig,
        identity: Identity,
        credential: &str,
        api: Arc<dyn ChatApi>,
    ) -> ChatResult<Self> {
        config.validate()?;

        let transport = TransportConnection::new(TransportConfig::from(config));
        let router = MessageRouter::attach(&transport);

        // Registered before any conversation filter so counters see every frame first.
        let unread = UnreadRegistry::new(identity.id);
        let counter = unread.clone();
        router.add_listener(move |message| {
            if counter.on_message(message) {
                let sender = message.sender_id;
                log::debug!("Unread from {sender} is now {}", counter.count(sender));
            }
            Ok(())
        });

        let presence = PresenceTracker::new(Arc::clone(&api));
        presence.start(config.presence_interval());

        let conversation = ConversationSession::new(
            identity.id,
            Arc::new(transport.clone()),
            router.clone(),
            unread.clone(),
            Arc::clone(&api),
            config.typing_timeout(),
        );

        transport.connect(&identity, credential);
        log::info!("Chat session started for {} ({})", identity.display_name, identity.id);

        Ok(Self {
            identity,
            api,
            transport,
            router,
            unread,
            presence,
            conversation,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn conversation(&self) -> &ConversationSession {
        &self.conversation
    }

    pub fn unread(&self) -> &UnreadRegistry {
        &self.unread
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn transport(&self) -> &TransportConnection {
        &self.transport
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.transport.subscribe_state()
    }

    pub async fn recent_contacts(&self) -> ChatResult<Vec<Identity>> {
        self.api.recent_contacts().await
    }

    pub fn is_peer_online(&self, peer: &Identity) -> bool {
        self.presence.is_online(&peer.email)
    }

    /// Logout: closes the conversation, stops polling, drops every listener and
    /// disconnects. Nothing survives into a later session.
    pub fn shutdown(&self) {
        self.conversation.close();
        self.presence.stop();
        self.router.clear();
        self.transport.disconnect();
        log::info!("Chat session for {} shut down", self.identity.email);
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.presence.stop();
        self.transport.disconnect();
    }
}
