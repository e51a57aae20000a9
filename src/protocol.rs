//! Socket frames exchanged between the client transport and a delivery session.
//!
//! Every frame is a JSON text message of the form `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};

use crate::message::{Identity, Message};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Handshake; the payload is the identity whose room to join.
    Join(Identity),
    /// Ask the server to push an already persisted message to its receiver.
    SendMessage(Message),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    ReceiveMessage(Message),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join(_) => "join",
            ClientEvent::SendMessage(_) => "sendMessage",
        }
    }

    /// Parses and validates an inbound frame.
    pub fn decode(frame: &str) -> anyhow::Result<ClientEvent> {
        let event: ClientEvent = serde_json::from_str(frame)?;
        match &event {
            ClientEvent::Join(identity) if identity.as_str().is_empty() => {
                anyhow::bail!("join with empty identity")
            }
            ClientEvent::SendMessage(message) if message.content.trim().is_empty() => {
                anyhow::bail!("sendMessage {} with empty content", message.id)
            }
            _ => Ok(event),
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ReceiveMessage(_) => "receiveMessage",
        }
    }

    pub fn decode(frame: &str) -> serde_json::Result<ServerEvent> {
        serde_json::from_str(frame)
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
