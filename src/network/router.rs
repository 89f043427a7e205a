use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::common::{ChatError, ChatResult, Message};

use super::client::TransportConnection;

pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&Message) -> ChatResult<()> + Send + Sync>;

/// Fans every parsed message from the private queue out to N listeners.
#[derive(Clone, Default)]
pub struct MessageRouter {
    inner: Arc<RouterInner>,
}

#[derive(Default)]
struct RouterInner {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a router fed by every inbound frame of `transport`.
    pub fn attach(transport: &TransportConnection) -> Self {
        let router = Self::new();
        let feed = router.clone();
        transport.on_frame(move |body| feed.route_frame(body));
        router
    }

    /// Listeners run in registration order. Safe to call from inside a listener.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Message) -> ChatResult<()> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn clear(&self) {
        self.inner.listeners.lock().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Parses one frame body and dispatches it. Malformed bodies are logged and dropped.
    pub fn route_frame(&self, body: &str) {
        match serde_json::from_str::<Message>(body) {
            Ok(message) => self.dispatch(&message),
            Err(err) => {
                let err = ChatError::from(err);
                log::warn!("Dropping frame: {err} (body: {body})");
            }
        }
    }

    pub fn dispatch(&self, message: &Message) {
        log::debug!(
            "{:?} {} -> {}",
            message.kind,
            message.sender_id,
            message.recipient_id
        );
        let snapshot: Vec<(ListenerId, Listener)> = self.inner.listeners.lock().clone();
        for (id, listener) in snapshot {
            // Removed by an earlier listener during this dispatch.
            if !self.is_registered(id) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| listener(message))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => log::error!("Message listener {id} failed: {err}"),
                Err(_) => log::error!("Message listener {id} panicked"),
            }
        }
    }

    fn is_registered(&self, id: ListenerId) -> bool {
        self.inner
            .listeners
            .lock()
            .iter()
            .any(|(listener_id, _)| *listener_id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(log: &Arc<Mutex<Vec<String>>>, entry: &str) {
        log.lock().push(entry.to_string());
    }

    const CHAT: &str = r#"{"senderId":1,"recipientId":2,"content":"hi","type":"CHAT"}"#;

    #[test]
    fn listeners_run_in_registration_order() {
        let router = MessageRouter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let log = log.clone();
            router.add_listener(move |_| {
                record(&log, name);
                Ok(())
            });
        }

        router.route_frame(CHAT);
        assert_eq!(*log.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn failing_listeners_do_not_block_the_rest() {
        let router = MessageRouter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        router.add_listener(|_| Err(ChatError::NoConversation));
        router.add_listener(|_| panic!("listener bug"));
        let tail = log.clone();
        router.add_listener(move |m| {
            record(&tail, m.text());
            Ok(())
        });

        router.route_frame(CHAT);
        router.route_frame(CHAT);
        assert_eq!(*log.lock(), vec!["hi", "hi"]);
    }

    #[test]
    fn malformed_frames_reach_nobody() {
        let router = MessageRouter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        router.add_listener(move |m| {
            record(&sink, m.text());
            Ok(())
        });

        router.route_frame("{not json");
        router.route_frame(r#"{"recipientId":2,"type":"CHAT"}"#);
        router.route_frame(r#"{"senderId":1,"recipientId":2,"type":"WAVE"}"#);
        router.route_frame(CHAT);
        assert_eq!(*log.lock(), vec!["hi"]);
    }

    #[test]
    fn listener_can_remove_itself_and_others() {
        let router = MessageRouter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let own_id = Arc::new(Mutex::new(None::<ListenerId>));

        let handle = router.clone();
        let id_slot = own_id.clone();
        let first_log = log.clone();
        let first = router.add_listener(move |_| {
            record(&first_log, "first");
            if let Some(id) = *id_slot.lock() {
                handle.remove_listener(id);
                handle.remove_listener(id + 1);
            }
            Ok(())
        });
        *own_id.lock() = Some(first);

        let second_log = log.clone();
        router.add_listener(move |_| {
            record(&second_log, "second");
            Ok(())
        });

        router.route_frame(CHAT);
        router.route_frame(CHAT);
        assert_eq!(*log.lock(), vec!["first"]);
        assert_eq!(router.listener_count(), 0);
    }

    #[test]
    fn listener_added_during_dispatch_sees_next_message() {
        let router = MessageRouter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle = router.clone();
        let outer_log = log.clone();
        router.add_listener(move |_| {
            if handle.listener_count() == 1 {
                let inner_log = outer_log.clone();
                handle.add_listener(move |_| {
                    record(&inner_log, "late");
                    Ok(())
                });
            }
            Ok(())
        });

        router.route_frame(CHAT);
        assert!(log.lock().is_empty());
        router.route_frame(CHAT);
        assert_eq!(*log.lock(), vec!["late"]);
    }
}
