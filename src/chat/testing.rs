//! In-memory collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use crate::common::{ChatError, ChatResult, Identity, Message, MessageType, OutboundFrame, UserId};
use crate::network::{ChatApi, FramePublisher};

type HistoryReply = (Duration, ChatResult<Vec<Message>>);

#[derive(Default)]
pub struct FakeApi {
    history: Mutex<HashMap<UserId, Vec<Message>>>,
    scripted: Mutex<VecDeque<HistoryReply>>,
    contacts: Mutex<Vec<Identity>>,
    online: Mutex<Vec<String>>,
    online_fails: Mutex<bool>,
}

impl FakeApi {
    pub fn set_history(&self, peer_id: UserId, messages: Vec<Message>) {
        self.history.lock().insert(peer_id, messages);
    }

    /// Queues a one-off history reply served after `delay`, ahead of `set_history`.
    pub fn script_history(&self, delay: Duration, reply: ChatResult<Vec<Message>>) {
        self.scripted.lock().push_back((delay, reply));
    }

    pub fn set_contacts(&self, contacts: Vec<Identity>) {
        *self.contacts.lock() = contacts;
    }

    pub fn set_online(&self, emails: &[&str]) {
        *self.online.lock() = emails.iter().map(|email| email.to_string()).collect();
    }

    pub fn fail_online(&self, fail: bool) {
        *self.online_fails.lock() = fail;
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn history(&self, peer_id: UserId) -> ChatResult<Vec<Message>> {
        let scripted = self.scripted.lock().pop_front();
        if let Some((delay, reply)) = scripted {
            tokio::time::sleep(delay).await;
            return reply;
        }
        Ok(self.history.lock().get(&peer_id).cloned().unwrap_or_default())
    }

    async fn recent_contacts(&self) -> ChatResult<Vec<Identity>> {
        Ok(self.contacts.lock().clone())
    }

    async fn online_users(&self) -> ChatResult<Vec<String>> {
        if *self.online_fails.lock() {
            return Err(ChatError::Transport("presence endpoint unavailable".into()));
        }
        Ok(self.online.lock().clone())
    }
}

/// Captures published frames instead of sending them.
#[derive(Default)]
pub struct RecordingPublisher {
    frames: Mutex<Vec<OutboundFrame>>,
    offline: Mutex<bool>,
}

impl RecordingPublisher {
    pub fn frames(&self) -> Vec<OutboundFrame> {
        self.frames.lock().clone()
    }

    pub fn take(&self) -> Vec<OutboundFrame> {
        std::mem::take(&mut *self.frames.lock())
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock() = offline;
    }
}

impl FramePublisher for RecordingPublisher {
    fn publish(&self, frame: &OutboundFrame) -> ChatResult<()> {
        if *self.offline.lock() {
            return Err(ChatError::NotConnected);
        }
        self.frames.lock().push(frame.clone());
        Ok(())
    }
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

pub fn chat(sender: UserId, recipient: UserId, text: &str, secs: i64) -> Message {
    Message {
        id: None,
        sender_id: sender,
        sender_name: None,
        recipient_id: recipient,
        content: Some(text.to_string()),
        timestamp: Some(at(secs)),
        kind: MessageType::Chat,
        is_read: false,
    }
}

pub fn typing(sender: UserId, recipient: UserId, secs: i64) -> Message {
    Message {
        content: None,
        kind: MessageType::Typing,
        ..chat(sender, recipient, "", secs)
    }
}

pub fn read_receipt(sender: UserId, recipient: UserId) -> Message {
    Message {
        content: None,
        timestamp: None,
        kind: MessageType::ReadReceipt,
        ..chat(sender, recipient, "", 0)
    }
}

pub fn identity(id: UserId, email: &str) -> Identity {
    Identity {
        id,
        email: email.to_string(),
        display_name: email.split('@').next().unwrap_or_default().to_string(),
    }
}
