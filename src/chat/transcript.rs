use crate::common::{Message, UserId};

/// Ordered, append-only list of CHAT messages for one conversation.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Loads fetched history. Control signals never enter a transcript.
    pub fn replace(&mut self, history: Vec<Message>) {
        self.messages = history.into_iter().filter(Message::is_chat).collect();
    }

    /// Loads history beneath messages that arrived live while it was in flight.
    /// A live message the history already holds is kept once.
    pub fn merge_history(&mut self, history: Vec<Message>) {
        let live = std::mem::take(&mut self.messages);
        self.replace(history);
        for message in live {
            if !self.messages.iter().any(|known| same_message(known, &message)) {
                self.messages.push(message);
            }
        }
    }

    pub fn push(&mut self, message: Message) {
        if message.is_chat() {
            self.messages.push(message);
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn last_from(&self, sender_id: UserId) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.sender_id == sender_id)
    }

    /// Marks every message authored by `author` as read. Returns how many changed.
    pub fn mark_read(&mut self, author: UserId) -> usize {
        let mut changed = 0;
        for message in &mut self.messages {
            if message.sender_id == author && !message.is_read {
                message.is_read = true;
                changed += 1;
            }
        }
        changed
    }

    /// Index for the "Seen" marker: the newest message, if `local_user` wrote it
    /// and the peer has read it.
    pub fn seen_index(&self, local_user: UserId) -> Option<usize> {
        let last = self.messages.last()?;
        (last.sender_id == local_user && last.is_read).then(|| self.messages.len() - 1)
    }
}

/// Server ids when both sides have one, otherwise sender, time and text.
fn same_message(a: &Message, b: &Message) -> bool {
    match (a.id, b.id) {
        (Some(left), Some(right)) => left == right,
        _ => a.sender_id == b.sender_id && a.timestamp == b.timestamp && a.content == b.content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::MessageType;

    fn msg(sender: UserId, recipient: UserId, text: &str) -> Message {
        Message {
            id: None,
            sender_id: sender,
            sender_name: None,
            recipient_id: recipient,
            content: Some(text.to_string()),
            timestamp: None,
            kind: MessageType::Chat,
            is_read: false,
        }
    }

    #[test]
    fn control_signals_are_filtered_out() {
        let mut transcript = Transcript::default();
        let mut typing = msg(2, 1, "");
        typing.kind = MessageType::Typing;
        transcript.replace(vec![msg(2, 1, "a"), typing.clone()]);
        transcript.push(typing);
        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn history_merge_keeps_live_messages_once() {
        let mut transcript = Transcript::default();
        let mut saved = msg(2, 1, "saved before fetch");
        saved.id = Some(10);
        let mut unsaved = msg(2, 1, "saved after fetch");
        unsaved.id = Some(11);
        transcript.push(saved.clone());
        transcript.push(unsaved);
        transcript.push(msg(1, 2, "no id yet"));

        let mut older = msg(2, 1, "older");
        older.id = Some(9);
        transcript.merge_history(vec![older, saved, msg(1, 2, "no id yet")]);

        let texts: Vec<&str> = transcript.messages().iter().map(Message::text).collect();
        assert_eq!(
            texts,
            vec!["older", "saved before fetch", "no id yet", "saved after fetch"]
        );
    }

    #[test]
    fn mark_read_only_touches_own_messages() {
        let mut transcript = Transcript::default();
        transcript.replace(vec![msg(1, 2, "mine"), msg(2, 1, "theirs"), msg(1, 2, "mine too")]);

        assert_eq!(transcript.mark_read(1), 2);
        assert_eq!(transcript.mark_read(1), 0);
        let read: Vec<bool> = transcript.messages().iter().map(|m| m.is_read).collect();
        assert_eq!(read, vec![true, false, true]);
    }

    #[test]
    fn seen_marker_requires_newest_message_to_be_read_and_mine() {
        let mut transcript = Transcript::default();
        assert_eq!(transcript.seen_index(1), None);

        transcript.push(msg(1, 2, "hello"));
        assert_eq!(transcript.seen_index(1), None);

        transcript.mark_read(1);
        assert_eq!(transcript.seen_index(1), Some(0));

        transcript.push(msg(1, 2, "still there?"));
        assert_eq!(transcript.seen_index(1), None);

        transcript.push(msg(2, 1, "yes"));
        transcript.mark_read(1);
        assert_eq!(transcript.seen_index(1), None);
    }
}
