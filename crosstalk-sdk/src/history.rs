//! Bounded, insertion-ordered message history.

use chrono::{DateTime, Utc};

use crate::message::Message;

/// FIFO ring of the most recent messages, oldest first.
///
/// Appends reject duplicate ids; the cap evicts from the front. Only the
/// connection manager mutates this.
pub(crate) struct History {
    entries: Vec<Message>,
    cap: usize,
}

impl History {
    pub fn new(cap: usize) -> Self {
        Self { entries: Vec::new(), cap }
    }

    pub fn entries(&self) -> &[Message] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.entries.iter().any(|m| m.id == id)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.entries.last().map(|m| m.timestamp)
    }

    /// Append one message, evicting the oldest entry past the cap.
    /// Returns false (and leaves the ring untouched) on a duplicate id.
    pub fn push(&mut self, message: Message) -> bool {
        if self.contains_id(&message.id) {
            return false;
        }
        self.entries.push(message);
        while self.entries.len() > self.cap {
            self.entries.remove(0);
        }
        true
    }

    /// Whether a polled message is new relative to the current ring.
    ///
    /// Strictly newer timestamps always pass. Equal timestamps pass only for
    /// payloads that carried a relay id the ring has not seen, so distinct
    /// same-millisecond messages are not dropped while re-deliveries still
    /// are. Without a relay id a re-delivery is indistinguishable from a new
    /// message, so those keep the strict rule.
    pub fn admits_from_poll(&self, message: &Message, has_wire_id: bool) -> bool {
        match self.last_timestamp() {
            None => true,
            Some(last) => {
                message.timestamp > last
                    || (has_wire_id
                        && message.timestamp == last
                        && !self.contains_id(&message.id))
            }
        }
    }

    /// Replace the whole ring (initial history load), keeping at most `cap`
    /// of the newest entries and skipping duplicate ids within the batch.
    pub fn replace(&mut self, messages: Vec<Message>) {
        let mut fresh: Vec<Message> = Vec::with_capacity(messages.len().min(self.cap));
        for msg in messages {
            if !fresh.iter().any(|m| m.id == msg.id) {
                fresh.push(msg);
            }
        }
        if fresh.len() > self.cap {
            fresh.drain(..fresh.len() - self.cap);
        }
        self.entries = fresh;
    }
}
