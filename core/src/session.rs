/// Transport session: one duplex socket to the relay per local identity
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::events::{ClientEvent, TransportEvent};
use crate::protocol::OutboundMessage;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// How long `close()` waits for the writer to flush its close frame
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Opening the socket
    Connecting,
    /// Socket open, frames flowing
    Connected,
    /// Tearing down before a reconnect or on request
    Closing,
}

/// Who is talking to whom on this connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub local_user: String,
    pub peer_user: String,
}

impl SessionIdentity {
    /// Trim both names and reject blanks
    pub fn new(local_user: &str, peer_user: &str) -> Result<Self> {
        let local_user = local_user.trim();
        let peer_user = peer_user.trim();
        if local_user.is_empty() || peer_user.is_empty() {
            return Err(ChatError::Validation("Enter both usernames".to_string()));
        }
        Ok(Self {
            local_user: local_user.to_string(),
            peer_user: peer_user.to_string(),
        })
    }
}

/// Frame delivered by a link's reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkFrame {
    Text(String),
    Closed,
}

/// Channel ends of one open connection
#[derive(Debug)]
pub struct Link {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<LinkFrame>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl Link {
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<LinkFrame>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            writer: None,
            reader: None,
        }
    }

    /// Attach the tasks driving the socket so the session can shut them down
    pub fn with_tasks(mut self, writer: JoinHandle<()>, reader: JoinHandle<()>) -> Self {
        self.writer = Some(writer);
        self.reader = Some(reader);
        self
    }
}

/// Opens links to the relay
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, local_user: &str) -> Result<Link>;
}

/// [`Connector`] speaking WebSocket to `{server}/ws/{username}`
pub struct WebSocketConnector {
    config: Config,
}

impl WebSocketConnector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, local_user: &str) -> Result<Link> {
        let url = self.config.ws_url(local_user)?;
        debug!("Opening socket {}", url);

        let (ws, _) = timeout(self.config.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| ChatError::Transport(format!("Timed out connecting to {}", url)))?
            .map_err(|e| ChatError::Transport(format!("Failed to connect to {}: {}", url, e)))?;

        let (mut ws_write, mut ws_read) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<LinkFrame>();

        let writer = tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = ws_write.send(Message::Text(text)).await {
                    warn!("Socket write failed: {}", e);
                    break;
                }
            }
            let _ = ws_write.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(next) = ws_read.next().await {
                match next {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(LinkFrame::Text(text)).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        debug!("Relay closed the socket: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Socket read failed: {}", e);
                        break;
                    }
                }
            }
            let _ = in_tx.send(LinkFrame::Closed);
        });

        Ok(Link::new(out_tx, in_rx).with_tasks(writer, reader))
    }
}

async fn await_writer(id: u64, writer: JoinHandle<()>) {
    if timeout(CLOSE_TIMEOUT, writer).await.is_err() {
        warn!("Link {} did not close within {:?}", id, CLOSE_TIMEOUT);
    }
    debug!("Closed link {}", id);
}

/// Why `send` did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyMessage,
    NoPeer,
}

/// Result of one `send` call. Never an error; callers decide what to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Skipped(SkipReason),
    /// Transport not open; the message was discarded
    Dropped,
}

struct ActiveLink {
    id: u64,
    outbound: mpsc::UnboundedSender<String>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    pump: JoinHandle<()>,
}

impl Drop for ActiveLink {
    fn drop(&mut self) {
        self.pump.abort();
        if let Some(reader) = &self.reader {
            reader.abort();
        }
    }
}

/// Owns the identity and at most one open link
pub struct Session {
    connector: Arc<dyn Connector>,
    identity: Option<SessionIdentity>,
    active: Option<ActiveLink>,
    /// Link id reserved by `begin_connect` while its open is in flight
    pending: Option<u64>,
    state: ConnectionState,
    next_link_id: u64,
}

impl Session {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            identity: None,
            active: None,
            pending: None,
            state: ConnectionState::Disconnected,
            next_link_id: 1,
        }
    }

    pub fn identity(&self) -> Option<&SessionIdentity> {
        self.identity.as_ref()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Whether `link` is the currently open link
    pub fn is_current(&self, link: u64) -> bool {
        self.active.as_ref().is_some_and(|a| a.id == link)
    }

    /// Whether `link` is the open still awaited by `begin_connect`
    pub fn is_pending(&self, link: u64) -> bool {
        self.pending == Some(link)
    }

    fn reserve_link_id(&mut self) -> u64 {
        let id = self.next_link_id;
        self.next_link_id += 1;
        id
    }

    /// Replace the identity and open a fresh link.
    ///
    /// Any previous link is closed first. Frames from the new link are
    /// forwarded to `events` tagged with the returned link id, preceded by
    /// [`TransportEvent::Opened`].
    pub async fn connect(
        &mut self,
        identity: SessionIdentity,
        events: &mpsc::UnboundedSender<ClientEvent>,
    ) -> Result<u64> {
        self.close().await;

        self.identity = Some(identity.clone());
        self.state = ConnectionState::Connecting;

        let link = match self.connector.open(&identity.local_user).await {
            Ok(link) => link,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };

        let id = self.reserve_link_id();
        self.install(id, link, events);
        Ok(id)
    }

    /// Replace the identity and open a fresh link in the background.
    ///
    /// Returns at once with the reserved link id. The old link is torn down
    /// and the new one opened on a spawned task, which reports back with
    /// [`ClientEvent::LinkOpened`]; hand that to [`Session::attach`] or
    /// [`Session::abandon`].
    pub fn begin_connect(
        &mut self,
        identity: SessionIdentity,
        events: &mpsc::UnboundedSender<ClientEvent>,
    ) -> u64 {
        let old_writer = self.teardown();

        let id = self.reserve_link_id();
        self.identity = Some(identity.clone());
        self.pending = Some(id);
        self.state = ConnectionState::Connecting;
        debug!("Opening link {} for {} in the background", id, identity.local_user);

        let connector = self.connector.clone();
        let tx = events.clone();
        tokio::spawn(async move {
            if let Some((old_id, writer)) = old_writer {
                await_writer(old_id, writer).await;
            }
            let result = connector.open(&identity.local_user).await;
            let _ = tx.send(ClientEvent::LinkOpened { link: id, result });
        });
        id
    }

    /// Install a link opened by `begin_connect`. Returns false, dropping the
    /// link, when `link` was superseded or cancelled in the meantime.
    pub fn attach(
        &mut self,
        link: u64,
        opened: Link,
        events: &mpsc::UnboundedSender<ClientEvent>,
    ) -> bool {
        if !self.is_pending(link) {
            debug!("Discarding link {}: no longer wanted", link);
            return false;
        }
        self.pending = None;
        self.install(link, opened, events);
        true
    }

    /// Record a failed background open. Returns false for stale links.
    pub fn abandon(&mut self, link: u64) -> bool {
        if !self.is_pending(link) {
            return false;
        }
        self.pending = None;
        self.state = ConnectionState::Disconnected;
        true
    }

    fn install(&mut self, id: u64, link: Link, events: &mpsc::UnboundedSender<ClientEvent>) {
        let _ = events.send(ClientEvent::Transport {
            link: id,
            event: TransportEvent::Opened,
        });

        let Link {
            outbound,
            mut inbound,
            writer,
            reader,
        } = link;

        let tx = events.clone();
        let pump = tokio::spawn(async move {
            loop {
                let event = match inbound.recv().await {
                    Some(LinkFrame::Text(text)) => TransportEvent::Frame(text),
                    Some(LinkFrame::Closed) | None => TransportEvent::Closed,
                };
                let closed = event == TransportEvent::Closed;
                if tx.send(ClientEvent::Transport { link: id, event }).is_err() || closed {
                    break;
                }
            }
        });

        self.active = Some(ActiveLink {
            id,
            outbound,
            writer,
            reader,
            pump,
        });
        self.state = ConnectionState::Connected;
        if let Some(identity) = &self.identity {
            info!(
                "🔌 Connected as {} (peer {}, link {})",
                identity.local_user, identity.peer_user, id
            );
        }
    }

    /// Drop the active link and any pending open. Hands back the old writer
    /// so the caller can wait for its close frame.
    fn teardown(&mut self) -> Option<(u64, JoinHandle<()>)> {
        self.pending = None;
        let mut active = self.active.take()?;
        self.state = ConnectionState::Closing;
        let writer = active.writer.take();
        let id = active.id;
        drop(active);
        writer.map(|w| (id, w))
    }

    /// Voluntary teardown. Waits briefly for the close frame to go out.
    pub async fn close(&mut self) {
        if let Some((id, writer)) = self.teardown() {
            await_writer(id, writer).await;
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Record an involuntary close. Returns false for stale links.
    pub fn mark_closed(&mut self, link: u64) -> bool {
        if !self.is_current(link) {
            return false;
        }
        self.active = None;
        self.state = ConnectionState::Disconnected;
        info!("Link {} disconnected", link);
        true
    }

    /// Send a chat message to the current peer
    pub fn send(&self, message: &str) -> SendOutcome {
        if message.is_empty() {
            return SendOutcome::Skipped(SkipReason::EmptyMessage);
        }
        let Some(identity) = &self.identity else {
            return SendOutcome::Skipped(SkipReason::NoPeer);
        };
        let Some(active) = self.active.as_ref().filter(|_| self.is_connected()) else {
            debug!("Dropping message: transport not open");
            return SendOutcome::Dropped;
        };

        let frame = match OutboundMessage::new(identity.peer_user.clone(), message).to_json() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode outbound message: {}", e);
                return SendOutcome::Dropped;
            }
        };

        match active.outbound.send(frame) {
            Ok(()) => SendOutcome::Sent,
            Err(_) => {
                debug!("Dropping message: writer for link {} is gone", active.id);
                SendOutcome::Dropped
            }
        }
    }
}
