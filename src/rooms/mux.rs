use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::{
    message::{Identity, Message},
    protocol::ServerEvent,
};

/// How many delivered message ids a room remembers for de-duplication.
const DELIVERY_LEDGER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

#[derive(Default)]
struct Room {
    members: HashMap<ConnectionId, Outbox>,
    delivered: VecDeque<Uuid>,
}

impl Room {
    /// Records `id` and returns false if it was already delivered here.
    fn record(&mut self, id: Uuid) -> bool {
        if self.delivered.contains(&id) {
            return false;
        }
        if self.delivered.len() == DELIVERY_LEDGER {
            self.delivered.pop_front();
        }
        self.delivered.push_back(id);
        true
    }

    fn fan_out(&self, event: &ServerEvent) -> usize {
        let mut sent = 0;
        for outbox in self.members.values() {
            if outbox.send(event.clone()).is_ok() {
                sent += 1;
            }
        }
        sent
    }
}

#[derive(Default)]
struct Rooms {
    outboxes: HashMap<ConnectionId, Outbox>,
    rooms: HashMap<Identity, Room>,
}

/// Maps identities to the connections currently joined to their room.
///
/// Cheap to clone; all clones share one map. Every operation takes the same
/// lock, so joins, leaves and broadcasts are applied in a single order and a
/// room sees broadcasts in the order they were made.
#[derive(Clone, Default)]
pub struct RoomMux {
    inner: Arc<Mutex<Rooms>>,
    next_id: Arc<AtomicU64>,
}

impl RoomMux {
    pub fn new() -> RoomMux {
        RoomMux::default()
    }

    /// Registers a new physical connection and returns the receiving end of its outbox.
    pub fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().outboxes.insert(id, tx);
        trace!("{id} connected");
        (id, rx)
    }

    /// Adds `conn` to the room of `identity`. Returns false if it was already a
    /// member or the connection is unknown.
    pub fn join(&self, conn: ConnectionId, identity: &Identity) -> bool {
        let mut inner = self.inner.lock();
        let Some(outbox) = inner.outboxes.get(&conn).cloned() else {
            return false;
        };
        let room = inner.rooms.entry(identity.clone()).or_default();
        if room.members.contains_key(&conn) {
            return false;
        }
        room.members.insert(conn, outbox);
        debug!("{conn} joined room {identity} ({} members)", room.members.len());
        true
    }

    /// Removes `conn` from the room of `identity`, dropping the room once empty.
    pub fn leave(&self, conn: ConnectionId, identity: &Identity) -> bool {
        let mut inner = self.inner.lock();
        let Some(room) = inner.rooms.get_mut(identity) else {
            return false;
        };
        let removed = room.members.remove(&conn).is_some();
        if room.members.is_empty() {
            inner.rooms.remove(identity);
        }
        if removed {
            debug!("{conn} left room {identity}");
        }
        removed
    }

    /// Forgets the connection's outbox. Rooms must already have been left.
    pub fn disconnect(&self, conn: ConnectionId) {
        self.inner.lock().outboxes.remove(&conn);
        trace!("{conn} disconnected");
    }

    /// Sends `event` to every connection in the room. Returns how many received it.
    pub fn broadcast(&self, identity: &Identity, event: ServerEvent) -> usize {
        let inner = self.inner.lock();
        match inner.rooms.get(identity) {
            Some(room) => room.fan_out(&event),
            None => 0,
        }
    }

    /// Pushes a persisted message to the receiver's room and to the sender's
    /// other connections. A room that already got this message id is skipped.
    pub fn deliver_message(&self, message: &Message) -> usize {
        let event = ServerEvent::ReceiveMessage(message.clone());
        let mut inner = self.inner.lock();

        let mut delivered = 0;
        let mut targets = vec![&message.receiver];
        if message.sender != message.receiver {
            targets.push(&message.sender);
        }
        for identity in targets {
            if let Some(room) = inner.rooms.get_mut(identity) {
                if room.record(message.id) {
                    delivered += room.fan_out(&event);
                }
            }
        }
        debug!("message {} delivered to {delivered} connections", message.id);
        delivered
    }

    pub fn members(&self, identity: &Identity) -> usize {
        self.inner
            .lock()
            .rooms
            .get(identity)
            .map_or(0, |room| room.members.len())
    }

    pub fn room_count(&self) -> usize {
        self.inner.lock().rooms.len()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().outboxes.len()
    }
}
