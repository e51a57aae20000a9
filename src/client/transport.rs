use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use tokio::{
    net::TcpStream,
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Message as Frame,
        client::IntoClientRequest,
        http::{HeaderValue, Request, header::COOKIE},
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    message::Identity,
    protocol::{ClientEvent, ServerEvent},
};

/// Inbound events buffered per subscriber before it starts lagging.
const SUBSCRIBER_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

/// Exponential reconnect delay with up to 50% random jitter on top.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub min: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            min: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self
            .min
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max);
        let jitter_ms = u64::try_from(base.as_millis() / 2).unwrap_or(u64::MAX);
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Full socket URL, e.g. `ws://localhost:8080/api/socketio`.
    pub url: String,
    /// Identity announced in the `join` handshake.
    pub identity: Identity,
    /// Session cookie (`name=value`) authenticating the upgrade request.
    pub cookie: Option<String>,
    pub backoff: Backoff,
}

impl TransportConfig {
    pub fn new(url: impl Into<String>, identity: Identity) -> TransportConfig {
        TransportConfig {
            url: url.into(),
            identity,
            cookie: None,
            backoff: Backoff::default(),
        }
    }

    fn request(&self) -> anyhow::Result<Request<()>> {
        let mut request = self.url.as_str().into_client_request()?;
        if let Some(cookie) = &self.cookie {
            request
                .headers_mut()
                .insert(COOKIE, HeaderValue::from_str(cookie).context("invalid cookie")?);
        }
        Ok(request)
    }
}

/// One persistent, self-healing connection to the delivery server.
///
/// The connection is (re)established in a background task. Every time it
/// comes up the `join` handshake is sent first. Outbound events are never
/// queued across a disconnect.
pub struct Transport {
    state: watch::Receiver<TransportState>,
    outbound: mpsc::UnboundedSender<ClientEvent>,
    events: Mutex<Option<broadcast::Sender<ServerEvent>>>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    /// Starts connecting in the background. Must be called inside a tokio runtime.
    pub fn connect(config: TransportConfig) -> Transport {
        let (state_tx, state) = watch::channel(TransportState::Disconnected);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(run(config, state_tx, outbound_rx, events.clone(), shutdown.clone()));

        Transport {
            state,
            outbound,
            events: Mutex::new(Some(events)),
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    /// Observes state transitions, e.g. to re-fetch history after a reconnect.
    pub fn watch_state(&self) -> watch::Receiver<TransportState> {
        self.state.clone()
    }

    /// Waits until the transport reaches `wanted`. Returns false if it closed first.
    pub async fn wait_for(&self, wanted: TransportState) -> bool {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|s| *s == wanted || *s == TransportState::Closed)
            .await
            .map(|s| *s == wanted);
        reached.unwrap_or(wanted == TransportState::Closed)
    }

    /// Receives every inbound event from now on. After `close` the receiver
    /// reports the channel closed.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        match &*self.events.lock() {
            Some(events) => events.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Queues `event` for the live connection. Returns false, dropping the
    /// event, when not connected.
    pub fn send(&self, event: ClientEvent) -> bool {
        if self.state() != TransportState::Connected {
            debug!("dropping {} while {:?}", event.name(), self.state());
            return false;
        }
        self.outbound.send(event).is_ok()
    }

    /// Tears the connection down for good. Safe to call repeatedly.
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.events.lock().take();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

enum PumpEnd {
    Dropped,
    Shutdown,
}

async fn run(
    config: TransportConfig,
    state: watch::Sender<TransportState>,
    mut outbound: mpsc::UnboundedReceiver<ClientEvent>,
    events: broadcast::Sender<ServerEvent>,
    shutdown: CancellationToken,
) {
    let mut attempt = 0u32;
    let mut ever_connected = false;

    loop {
        state.send_replace(if ever_connected {
            TransportState::Reconnecting
        } else {
            TransportState::Connecting
        });

        let connected = match config.request() {
            Ok(request) => tokio::select! {
                _ = shutdown.cancelled() => break,
                result = connect_async(request) => result.map_err(anyhow::Error::from),
            },
            Err(e) => Err(e),
        };

        match connected {
            Ok((stream, _)) => {
                info!("connected to {} as {}", config.url, config.identity);
                attempt = 0;
                ever_connected = true;
                state.send_replace(TransportState::Connected);

                let end = pump(stream, &config.identity, &mut outbound, &events, &shutdown).await;
                if let PumpEnd::Shutdown = end {
                    break;
                }
                state.send_replace(TransportState::Reconnecting);
                // nothing queued for the dead connection survives it
                while outbound.try_recv().is_ok() {}
                warn!("connection to {} dropped", config.url);
            }
            Err(e) => warn!("connecting to {} failed: {e:#}", config.url),
        }

        let delay = config.backoff.delay(attempt);
        attempt = attempt.saturating_add(1);
        debug!("reconnecting in {delay:?}");
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    state.send_replace(TransportState::Closed);
    info!("transport to {} closed", config.url);
}

async fn pump(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    identity: &Identity,
    outbound: &mut mpsc::UnboundedReceiver<ClientEvent>,
    events: &broadcast::Sender<ServerEvent>,
    shutdown: &CancellationToken,
) -> PumpEnd {
    let (mut sink, mut source) = stream.split();

    let handshake = ClientEvent::Join(identity.clone());
    match handshake.encode() {
        Ok(text) => {
            if sink.send(Frame::Text(text)).await.is_err() {
                return PumpEnd::Dropped;
            }
        }
        Err(e) => warn!("cannot encode join: {e}"),
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sink.send(Frame::Close(None)).await;
                return PumpEnd::Shutdown;
            }
            Some(event) = outbound.recv() => {
                let text = match event.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("cannot encode {}: {e}", event.name());
                        continue;
                    }
                };
                if sink.send(Frame::Text(text)).await.is_err() {
                    return PumpEnd::Dropped;
                }
            }
            frame = source.next() => match frame {
                Some(Ok(Frame::Text(text))) => match ServerEvent::decode(&text) {
                    // no subscribers means the event is simply lost
                    Ok(event) => { let _ = events.send(event); }
                    Err(e) => warn!("dropped malformed frame: {e}"),
                },
                Some(Ok(Frame::Close(_))) | None => return PumpEnd::Dropped,
                Some(Err(e)) => {
                    debug!("socket error: {e}");
                    return PumpEnd::Dropped;
                }
                Some(Ok(_)) => {}
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let backoff = Backoff {
            min: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };
        let first = backoff.delay(0);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));
        let third = backoff.delay(2);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(600));
        let late = backoff.delay(40);
        assert!(late >= Duration::from_secs(1) && late <= Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn send_is_dropped_while_not_connected() {
        let mut config = TransportConfig::new("ws://127.0.0.1:9/api/socketio", "u1".into());
        config.backoff = Backoff {
            min: Duration::from_secs(60),
            max: Duration::from_secs(60),
        };
        let transport = Transport::connect(config);
        assert!(!transport.send(ClientEvent::Join("u1".into())));

        transport.close().await;
        assert_eq!(transport.state(), TransportState::Closed);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_ends_subscriptions() {
        let config = TransportConfig::new("ws://127.0.0.1:9/api/socketio", "u1".into());
        let transport = Transport::connect(config);
        let mut events = transport.subscribe();

        transport.close().await;
        transport.close().await;

        assert_eq!(transport.state(), TransportState::Closed);
        assert!(matches!(events.recv().await, Err(broadcast::error::RecvError::Closed)));
        assert!(matches!(transport.subscribe().recv().await, Err(broadcast::error::RecvError::Closed)));
        assert!(transport.wait_for(TransportState::Closed).await);
    }

    #[tokio::test]
    async fn join_is_resent_after_every_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut config = TransportConfig::new(format!("ws://{addr}/api/socketio"), "u1".into());
        config.backoff = Backoff {
            min: Duration::from_millis(10),
            max: Duration::from_millis(20),
        };
        let transport = Transport::connect(config);
        let mut states = transport.watch_state();

        for _ in 0..2 {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut socket = accept_async(tcp).await.unwrap();

            let first = socket.next().await.unwrap().unwrap();
            assert_eq!(first, Frame::Text(r#"{"event":"join","data":"u1"}"#.to_owned()));
            assert_eq!(transport.state(), TransportState::Connected);

            drop(socket);
            states
                .wait_for(|s| *s == TransportState::Reconnecting)
                .await
                .unwrap();
        }

        transport.close().await;
        assert_eq!(transport.state(), TransportState::Closed);
    }
}
