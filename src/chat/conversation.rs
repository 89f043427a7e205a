use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::common::{ChatError, ChatResult, Message, MessageType, OutboundFrame, UserId};
use crate::network::{ChatApi, FramePublisher, ListenerId, MessageRouter};

use super::timer::DeferredAction;
use super::transcript::Transcript;
use super::unread::UnreadRegistry;

/// What a conversation view renders, republished after every mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationView {
    pub peer_id: Option<UserId>,
    pub messages: Vec<Message>,
    pub typing: bool,
    /// Index of the message that shows the "Seen" marker.
    pub seen_index: Option<usize>,
    /// History could not be loaded; opening again retries.
    pub history_failed: bool,
}

/// The conversation view controller: one open peer at a time.
pub struct ConversationSession {
    ctx: DispatchContext,
    router: MessageRouter,
    api: Arc<dyn ChatApi>,
}

#[derive(Clone)]
struct DispatchContext {
    publisher: Arc<dyn FramePublisher>,
    unread: UnreadRegistry,
    typing_timeout: Duration,
    shared: Arc<Shared>,
}

struct Shared {
    local_user_id: UserId,
    state: Mutex<ConversationState>,
    view: watch::Sender<ConversationView>,
}

#[derive(Default)]
struct ConversationState {
    /// Bumped on every open and close; stale callbacks compare against it.
    generation: u64,
    peer_id: Option<UserId>,
    listener: Option<ListenerId>,
    transcript: Transcript,
    typing: bool,
    typing_epoch: u64,
    typing_timer: DeferredAction,
    history_failed: bool,
}

impl ConversationState {
    fn hide_typing(&mut self) {
        self.typing = false;
        self.typing_timer.cancel();
    }

    /// A TYPING older than the peer's newest message raced with that message.
    fn is_stale_typing(&self, peer_id: UserId, event: &Message) -> bool {
        let last = self
            .transcript
            .last_from(peer_id)
            .and_then(|message| message.timestamp);
        matches!((event.timestamp, last), (Some(event_at), Some(last_at)) if event_at < last_at)
    }
}

impl Shared {
    fn publish_view(&self, state: &ConversationState) {
        self.view.send_replace(ConversationView {
            peer_id: state.peer_id,
            messages: state.transcript.messages().to_vec(),
            typing: state.typing,
            seen_index: state.transcript.seen_index(self.local_user_id),
            history_failed: state.history_failed,
        });
    }
}

impl ConversationSession {
    pub fn new(
        local_user_id: UserId,
        publisher: Arc<dyn FramePublisher>,
        router: MessageRouter,
        unread: UnreadRegistry,
        api: Arc<dyn ChatApi>,
        typing_timeout: Duration,
    ) -> Self {
        let (view, _) = watch::channel(ConversationView::default());
        Self {
            ctx: DispatchContext {
                publisher,
                unread,
                typing_timeout,
                shared: Arc::new(Shared {
                    local_user_id,
                    state: Mutex::new(ConversationState::default()),
                    view,
                }),
            },
            router,
            api,
        }
    }

    /// Focuses `peer_id`: installs the message filter, loads history, then
    /// acknowledges everything with a read receipt.
    ///
    /// A history result that arrives after another `open`/`close` is discarded.
    pub async fn open(&self, peer_id: UserId) -> ChatResult<()> {
        self.close();

        let generation = {
            let mut state = self.ctx.shared.state.lock();
            state.generation += 1;
            state.peer_id = Some(peer_id);
            let generation = state.generation;
            let ctx = self.ctx.clone();
            state.listener = Some(
                self.router
                    .add_listener(move |message| ctx.handle_incoming(generation, message)),
            );
            self.ctx.shared.publish_view(&state);
            generation
        };
        self.ctx.unread.set_focus(Some(peer_id));
        log::info!("Opened conversation with {peer_id}");

        let history = self.api.history(peer_id).await;

        let mut state = self.ctx.shared.state.lock();
        if state.generation != generation {
            log::debug!("Discarding history for {peer_id}: conversation changed while loading");
            return Ok(());
        }
        match history {
            Ok(history) => {
                state.transcript.merge_history(history);
                state.history_failed = false;
                self.ctx.shared.publish_view(&state);
                drop(state);

                self.ctx.unread.clear(peer_id);
                self.ctx.send_read_receipt(peer_id);
                Ok(())
            }
            Err(err) => {
                log::warn!("Could not load history with {peer_id}: {err}");
                state.history_failed = true;
                self.ctx.shared.publish_view(&state);
                Err(err)
            }
        }
    }

    /// Stops dispatch and timers for the current peer. Server history is untouched.
    pub fn close(&self) {
        let mut state = self.ctx.shared.state.lock();
        if let Some(listener) = state.listener.take() {
            self.router.remove_listener(listener);
        }
        let closed = state.peer_id.take();
        state.generation += 1;
        state.hide_typing();
        state.transcript.clear();
        state.history_failed = false;
        self.ctx.shared.publish_view(&state);
        drop(state);

        if let Some(peer_id) = closed {
            if self.ctx.unread.focused() == Some(peer_id) {
                self.ctx.unread.set_focus(None);
            }
            log::info!("Closed conversation with {peer_id}");
        }
    }

    /// Publishes a CHAT. The transcript only grows once the broker echoes it back.
    pub fn send(&self, text: &str) -> ChatResult<()> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let peer_id = self.peer_id().ok_or(ChatError::NoConversation)?;
        self.ctx.publisher.publish(&OutboundFrame::chat(peer_id, text))
    }

    /// Fire-and-forget typing signal, meant for every keystroke of a non-empty draft.
    pub fn send_typing(&self) -> ChatResult<()> {
        let peer_id = self.peer_id().ok_or(ChatError::NoConversation)?;
        self.ctx.publisher.publish(&OutboundFrame::typing(peer_id))
    }

    pub fn peer_id(&self) -> Option<UserId> {
        self.ctx.shared.state.lock().peer_id
    }

    pub fn transcript(&self) -> Vec<Message> {
        self.ctx.shared.state.lock().transcript.messages().to_vec()
    }

    pub fn typing(&self) -> bool {
        self.ctx.shared.state.lock().typing
    }

    pub fn seen_index(&self) -> Option<usize> {
        let state = self.ctx.shared.state.lock();
        state.transcript.seen_index(self.ctx.shared.local_user_id)
    }

    pub fn history_failed(&self) -> bool {
        self.ctx.shared.state.lock().history_failed
    }

    pub fn view(&self) -> ConversationView {
        self.ctx.shared.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationView> {
        self.ctx.shared.view.subscribe()
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl DispatchContext {
    fn handle_incoming(&self, generation: u64, message: &Message) -> ChatResult<()> {
        let mut state = self.shared.state.lock();
        if state.generation != generation {
            return Ok(());
        }
        let Some(peer_id) = state.peer_id else {
            return Ok(());
        };
        if !message.involves(peer_id) {
            return Ok(());
        }

        match message.kind {
            MessageType::Chat => {
                state.transcript.push(message.clone());
                let from_peer = message.sender_id == peer_id;
                if from_peer {
                    state.hide_typing();
                }
                self.shared.publish_view(&state);
                drop(state);

                if from_peer {
                    self.unread.clear(peer_id);
                    self.send_read_receipt(peer_id);
                }
            }
            MessageType::Typing => {
                if message.sender_id != peer_id {
                    return Ok(());
                }
                if state.is_stale_typing(peer_id, message) {
                    log::debug!("Ignoring stale typing signal from {peer_id}");
                    return Ok(());
                }
                state.typing = true;
                state.typing_epoch += 1;
                let epoch = state.typing_epoch;
                let shared = Arc::clone(&self.shared);
                state.typing_timer.schedule(self.typing_timeout, move || {
                    let mut state = shared.state.lock();
                    if state.generation == generation && state.typing_epoch == epoch {
                        state.typing = false;
                        shared.publish_view(&state);
                    }
                });
                self.shared.publish_view(&state);
            }
            MessageType::ReadReceipt => {
                if message.sender_id != peer_id {
                    return Ok(());
                }
                if state.transcript.mark_read(self.shared.local_user_id) > 0 {
                    self.shared.publish_view(&state);
                }
            }
        }
        Ok(())
    }

    fn send_read_receipt(&self, peer_id: UserId) {
        if let Err(err) = self.publisher.publish(&OutboundFrame::read_receipt(peer_id)) {
            log::debug!("Read receipt for {peer_id} not sent: {err}");
        }
    }
}
