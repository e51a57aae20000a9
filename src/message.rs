use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Stable user identifier. Doubles as the name of the user's room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Identity {
        Identity(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(id: &str) -> Self {
        Identity(id.to_owned())
    }
}

impl From<String> for Identity {
    fn from(id: String) -> Self {
        Identity(id)
    }
}

/// A persisted chat message. `id` and `created_at` are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    #[serde(rename = "senderId")]
    pub sender: Identity,
    #[serde(rename = "receiverId")]
    pub receiver: Identity,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Message {
    /// The other side of the conversation as seen by `viewer`.
    pub fn participant(&self, viewer: &Identity) -> &Identity {
        if &self.sender == viewer {
            &self.receiver
        } else {
            &self.sender
        }
    }

    /// Whether this message was exchanged between `a` and `b`, in either direction.
    pub fn is_between(&self, a: &Identity, b: &Identity) -> bool {
        (&self.sender == a && &self.receiver == b) || (&self.sender == b && &self.receiver == a)
    }
}

/// Body of a persist request. The sender is taken from the session, never from here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    #[serde(rename = "receiverId")]
    pub receiver: Identity,
    pub content: String,
}

/// Latest message of one conversation, from the viewer's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: Uuid,
    pub participant_id: Identity,
    pub last_message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub last_message_time: OffsetDateTime,
}

impl ConversationSummary {
    pub fn from_message(viewer: &Identity, message: &Message) -> ConversationSummary {
        ConversationSummary {
            id: message.id,
            participant_id: message.participant(viewer).clone(),
            last_message: message.content.clone(),
            last_message_time: message.created_at,
        }
    }
}
