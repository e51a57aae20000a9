use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::{
    message::{Identity, Message},
    protocol::{ClientEvent, ServerEvent},
};

use super::{MessageApi, Timeline, Transport, TransportState};

/// Anything that can push a client event onto the live channel.
pub trait EventSink {
    /// Returns false when the event was dropped.
    fn emit(&self, event: ClientEvent) -> bool;
}

impl EventSink for Transport {
    fn emit(&self, event: ClientEvent) -> bool {
        self.send(event)
    }
}

/// Live side of a transport: pushed events plus connection state.
pub struct LiveFeed {
    events: broadcast::Receiver<ServerEvent>,
    state: watch::Receiver<TransportState>,
}

impl LiveFeed {
    pub fn new(events: broadcast::Receiver<ServerEvent>, state: watch::Receiver<TransportState>) -> LiveFeed {
        LiveFeed { events, state }
    }
}

impl From<&Transport> for LiveFeed {
    fn from(transport: &Transport) -> LiveFeed {
        LiveFeed::new(transport.subscribe(), transport.watch_state())
    }
}

/// What one step of [`ChatView::next_update`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveUpdate {
    /// A pushed message arrived; true if it was new to the timeline.
    Pushed(bool),
    /// History was re-fetched after lag or a reconnect; holds how many messages were new.
    Resynced(usize),
    /// The feed ended, or the view was opened without one.
    Closed,
}

enum Step {
    Event(Result<ServerEvent, broadcast::error::RecvError>),
    State(Result<(), watch::error::RecvError>),
}

/// Keeps the timeline of one open conversation, fed by a history fetch and
/// by live `receiveMessage` events.
pub struct ChatView<A> {
    api: A,
    timeline: Timeline,
    live: Option<LiveFeed>,
}

impl<A: MessageApi> ChatView<A> {
    /// Opens the conversation between `viewer` and `peer`, seeded with its history.
    pub async fn open(api: A, viewer: Identity, peer: Identity) -> anyhow::Result<ChatView<A>> {
        Self::load(api, viewer, peer, None).await
    }

    /// Like [`ChatView::open`], but keeps following `feed`.
    ///
    /// The feed must be subscribed before this is called, so a push that
    /// lands during the history fetch is still seen by [`ChatView::next_update`].
    pub async fn follow(api: A, feed: LiveFeed, viewer: Identity, peer: Identity) -> anyhow::Result<ChatView<A>> {
        Self::load(api, viewer, peer, Some(feed)).await
    }

    async fn load(api: A, viewer: Identity, peer: Identity, live: Option<LiveFeed>) -> anyhow::Result<ChatView<A>> {
        let mut timeline = Timeline::new(viewer, peer);
        let history = api.history(timeline.peer()).await?;
        timeline.extend(history);
        Ok(ChatView { api, timeline, live })
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn messages(&self) -> &[Message] {
        self.timeline.messages()
    }

    /// Applies a live event. Returns true if the timeline changed.
    pub fn apply(&mut self, event: ServerEvent) -> bool {
        match event {
            ServerEvent::ReceiveMessage(message) => self.timeline.insert(message),
        }
    }

    /// Persists `content`, shows it locally, then asks the server to push it.
    ///
    /// Nothing is emitted unless the persist call succeeded.
    pub async fn send(&mut self, sink: &impl EventSink, content: &str) -> anyhow::Result<Message> {
        anyhow::ensure!(!content.trim().is_empty(), "message content is empty");

        let message = self.api.send_message(self.timeline.peer(), content).await?;
        self.timeline.insert(message.clone());
        if !sink.emit(ClientEvent::SendMessage(message.clone())) {
            debug!("message {} persisted while offline; receiver will see it on fetch", message.id);
        }
        Ok(message)
    }

    /// Waits for the next live change and merges it.
    ///
    /// Pushed messages are applied directly. When the subscriber lagged behind
    /// and lost events, or the transport came back up after a drop, history
    /// is re-fetched instead.
    pub async fn next_update(&mut self) -> anyhow::Result<LiveUpdate> {
        loop {
            let Some(live) = self.live.as_mut() else {
                return Ok(LiveUpdate::Closed);
            };
            let step = tokio::select! {
                event = live.events.recv() => Step::Event(event),
                changed = live.state.changed() => Step::State(changed),
            };

            match step {
                Step::Event(Ok(event)) => return Ok(LiveUpdate::Pushed(self.apply(event))),
                Step::Event(Err(broadcast::error::RecvError::Lagged(missed))) => {
                    warn!("live feed lagged, {missed} events lost; re-fetching history");
                    return Ok(LiveUpdate::Resynced(self.resync().await?));
                }
                Step::Event(Err(broadcast::error::RecvError::Closed)) | Step::State(Err(_)) => {
                    self.live = None;
                    return Ok(LiveUpdate::Closed);
                }
                Step::State(Ok(())) => {
                    // every Connected is preceded by Connecting or Reconnecting
                    let state = *live.state.borrow_and_update();
                    match state {
                        TransportState::Connected => return Ok(LiveUpdate::Resynced(self.resync().await?)),
                        TransportState::Closed => {
                            self.live = None;
                            return Ok(LiveUpdate::Closed);
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Re-fetches history and merges it, recovering pushes missed while
    /// disconnected. Returns how many messages were new.
    pub async fn resync(&mut self) -> anyhow::Result<usize> {
        let history = self.api.history(self.timeline.peer()).await?;
        let added = self.timeline.extend(history);
        if added > 0 {
            info!("resync recovered {added} messages with {}", self.timeline.peer());
        }
        Ok(added)
    }
}
