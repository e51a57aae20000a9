use std::collections::HashSet;

use uuid::Uuid;

use crate::message::{Identity, Message};

/// Ordered, de-duplicated message list of one conversation.
///
/// Entries are kept sorted by `(created_at, id)`, whatever order they arrive in.
#[derive(Debug, Clone)]
pub struct Timeline {
    viewer: Identity,
    peer: Identity,
    entries: Vec<Message>,
    ids: HashSet<Uuid>,
}

impl Timeline {
    pub fn new(viewer: Identity, peer: Identity) -> Timeline {
        Timeline {
            viewer,
            peer,
            entries: Vec::new(),
            ids: HashSet::new(),
        }
    }

    pub fn viewer(&self) -> &Identity {
        &self.viewer
    }

    pub fn peer(&self) -> &Identity {
        &self.peer
    }

    pub fn messages(&self) -> &[Message] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.ids.contains(&id)
    }

    /// Inserts `message` at its sorted position. Returns false if it is already
    /// present or belongs to another conversation.
    pub fn insert(&mut self, message: Message) -> bool {
        if !message.is_between(&self.viewer, &self.peer) || self.ids.contains(&message.id) {
            return false;
        }
        let at = self
            .entries
            .partition_point(|m| (m.created_at, m.id) < (message.created_at, message.id));
        self.ids.insert(message.id);
        self.entries.insert(at, message);
        true
    }

    /// Merges a batch, e.g. a history fetch. Returns how many were new.
    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) -> usize {
        messages.into_iter().map(|m| self.insert(m)).filter(|&new| new).count()
    }
}
