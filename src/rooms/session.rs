use anyhow::{anyhow, bail};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{
    message::{Identity, Message},
    protocol::{ClientEvent, ServerEvent},
    store::SharedStore,
};

use super::mux::{ConnectionId, RoomMux};

/// Server-side state of one physical connection.
///
/// `owner` is the identity of the authenticated HTTP session the socket was
/// upgraded from; a `join` may only bind that identity. Dropping the session
/// leaves its room and unregisters the connection.
pub struct DeliverySession {
    id: ConnectionId,
    owner: Identity,
    bound: Option<Identity>,
    rooms: RoomMux,
    store: SharedStore,
}

impl DeliverySession {
    pub fn open(rooms: RoomMux, store: SharedStore, owner: Identity) -> (DeliverySession, mpsc::UnboundedReceiver<ServerEvent>) {
        let (id, outbox) = rooms.connect();
        info!("{id} opened for {owner}");
        (
            DeliverySession {
                id,
                owner,
                bound: None,
                rooms,
                store,
            },
            outbox,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn bound(&self) -> Option<&Identity> {
        self.bound.as_ref()
    }

    pub async fn handle(&mut self, event: ClientEvent) -> anyhow::Result<()> {
        debug!("{} <- {}", self.id, event.name());
        match event {
            ClientEvent::Join(identity) => self.join(identity),
            ClientEvent::SendMessage(message) => self.relay(message).await.map(|_| ()),
        }
    }

    fn join(&mut self, claimed: Identity) -> anyhow::Result<()> {
        if claimed != self.owner {
            bail!("{} claimed {claimed} but is authenticated as {}", self.id, self.owner);
        }
        if self.bound.as_ref() == Some(&claimed) {
            return Ok(());
        }
        self.rooms.join(self.id, &claimed);
        self.bound = Some(claimed);
        Ok(())
    }

    /// Pushes the stored copy of an already persisted message to its receiver.
    async fn relay(&mut self, message: Message) -> anyhow::Result<usize> {
        let Some(bound) = &self.bound else {
            bail!("{} sent message {} before joining", self.id, message.id);
        };
        if &message.sender != bound {
            bail!("{} relayed message {} sent by {}", self.id, message.id, message.sender);
        }

        let stored = self
            .store
            .get(message.id)
            .await?
            .ok_or_else(|| anyhow!("{} relayed unknown message {}", self.id, message.id))?;
        if &stored.sender != bound {
            bail!("{} relayed message {} owned by {}", self.id, stored.id, stored.sender);
        }

        Ok(self.rooms.deliver_message(&stored))
    }
}

impl Drop for DeliverySession {
    fn drop(&mut self) {
        if let Some(identity) = self.bound.take() {
            self.rooms.leave(self.id, &identity);
        }
        self.rooms.disconnect(self.id);
        info!("{} closed", self.id);
    }
}
