use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{Message, UserId};

/// Per-peer unread CHAT counters for the whole session.
///
/// Invariant: the focused peer never has an entry.
#[derive(Clone)]
pub struct UnreadRegistry {
    inner: Arc<Mutex<UnreadState>>,
}

struct UnreadState {
    local_user_id: UserId,
    focused: Option<UserId>,
    counters: HashMap<UserId, u32>,
}

impl UnreadRegistry {
    pub fn new(local_user_id: UserId) -> Self {
        Self {
            inner: Arc::new(Mutex::new(UnreadState {
                local_user_id,
                focused: None,
                counters: HashMap::new(),
            })),
        }
    }

    /// Counts a CHAT from someone other than the local user and the focused peer.
    /// Focus is read here, at dispatch time. Returns whether a counter moved.
    pub fn on_message(&self, message: &Message) -> bool {
        let mut state = self.inner.lock();
        if !message.is_chat()
            || message.sender_id == state.local_user_id
            || Some(message.sender_id) == state.focused
        {
            return false;
        }
        *state.counters.entry(message.sender_id).or_insert(0) += 1;
        true
    }

    pub fn set_focus(&self, peer_id: Option<UserId>) {
        let mut state = self.inner.lock();
        state.focused = peer_id;
        if let Some(peer_id) = peer_id {
            state.counters.remove(&peer_id);
        }
    }

    pub fn clear(&self, peer_id: UserId) {
        self.inner.lock().counters.remove(&peer_id);
    }

    pub fn focused(&self) -> Option<UserId> {
        self.inner.lock().focused
    }

    pub fn count(&self, peer_id: UserId) -> u32 {
        self.inner
            .lock()
            .counters
            .get(&peer_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn has_entry(&self, peer_id: UserId) -> bool {
        self.inner.lock().counters.contains_key(&peer_id)
    }

    pub fn snapshot(&self) -> HashMap<UserId, u32> {
        self.inner.lock().counters.clone()
    }

    /// Number of conversations with at least one unread message.
    pub fn total_unread_conversations(&self) -> usize {
        self.inner.lock().counters.len()
    }
}
