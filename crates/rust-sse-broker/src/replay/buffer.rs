use std::collections::VecDeque;
use std::sync::Arc;

use rust_sse_wire::{EventId, Message};

use crate::error::ReplayError;

/// One buffered message together with the topic captured when it was
/// queued. Later changes to a message's topic never affect stored entries.
#[derive(Debug, Clone)]
pub(super) struct Entry {
    pub message: Arc<Message>,
    pub topic: String,
}

/// Id assignment mode of a [`MessageBuffer`].
#[derive(Debug)]
enum IdMode {
    /// Publishers assign ids. Messages without one are not stored. The id
    /// of the most recently evicted entry is remembered so a reconnect at
    /// exactly that point still replays the whole buffer.
    External { last_evicted: Option<String> },
    /// The buffer assigns monotonically increasing base-10 ids. `head` is
    /// the id of the oldest stored entry, `next` the id assigned next.
    Auto { head: u64, next: u64 },
}

/// FIFO of published messages shared by the replay policies.
#[derive(Debug)]
pub(super) struct MessageBuffer {
    entries: VecDeque<Entry>,
    cap: Option<usize>,
    ids: IdMode,
}

impl MessageBuffer {
    pub(super) fn bounded(cap: usize, auto_ids: bool) -> Self {
        Self::new(Some(cap.max(1)), auto_ids)
    }

    pub(super) fn unbounded(auto_ids: bool) -> Self {
        Self::new(None, auto_ids)
    }

    fn new(cap: Option<usize>, auto_ids: bool) -> Self {
        Self {
            entries: VecDeque::new(),
            cap,
            ids: if auto_ids {
                IdMode::Auto { head: 0, next: 0 }
            } else {
                IdMode::External { last_evicted: None }
            },
        }
    }

    /// Queues a message, returning the shared handle the broker fans out.
    ///
    /// In auto-id mode the message receives the buffer's next id before it
    /// is shared. In external-id mode a message without an id is returned
    /// untouched and not stored.
    pub(super) fn queue(&mut self, message: Message) -> Arc<Message> {
        match &mut self.ids {
            IdMode::Auto { next, .. } => {
                let mut message = message;
                message.set_id(EventId::must(next.to_string()));
                *next += 1;
                let message = Arc::new(message);
                self.push(Entry {
                    topic: message.topic().to_string(),
                    message: Arc::clone(&message),
                });
                message
            }
            IdMode::External { .. } => {
                let message = Arc::new(message);
                if message.id().is_set() {
                    self.push(Entry {
                        topic: message.topic().to_string(),
                        message: Arc::clone(&message),
                    });
                }
                message
            }
        }
    }

    fn push(&mut self, entry: Entry) {
        if self.cap == Some(self.entries.len()) {
            self.evict_front();
        }
        self.entries.push_back(entry);
    }

    /// Removes the oldest entry, keeping the id bookkeeping consistent.
    pub(super) fn evict_front(&mut self) -> Option<Entry> {
        let entry = self.entries.pop_front()?;
        match &mut self.ids {
            IdMode::External { last_evicted } => {
                *last_evicted = entry.message.id().as_str().map(str::to_string);
            }
            IdMode::Auto { head, .. } => *head += 1,
        }
        Some(entry)
    }

    pub(super) fn front(&self) -> Option<&Entry> {
        self.entries.front()
    }

    pub(super) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Resolves a last seen id to the entries strictly after it.
    ///
    /// External mode scans for a matching entry; when nothing matches but
    /// the id equals the most recently evicted one, the whole buffer is
    /// after it. Auto mode parses the id and indexes directly.
    pub(super) fn after(&self, id: &str) -> Result<impl Iterator<Item = &Entry>, ReplayError> {
        let start = match &self.ids {
            IdMode::Auto { head, next } => {
                let v: u64 = id
                    .parse()
                    .map_err(|_| ReplayError::InvalidId(id.to_string()))?;
                if v >= *next || v + 1 < *head {
                    return Err(ReplayError::NotFound(id.to_string()));
                }
                (v + 1 - *head) as usize
            }
            IdMode::External { last_evicted } => {
                let found = self
                    .entries
                    .iter()
                    .position(|e| e.message.id().as_str() == Some(id));
                match found {
                    Some(i) => i + 1,
                    None if last_evicted.as_deref() == Some(id) => 0,
                    None => return Err(ReplayError::NotFound(id.to_string())),
                }
            }
        };
        Ok(self.entries.iter().skip(start))
    }
}
