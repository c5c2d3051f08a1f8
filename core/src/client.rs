/// Chat client: the single owner of session, view and side channels
use crate::backend::{Backend, HttpBackend};
use crate::capture::{BufferRasterizer, CaptureAgent, Rasterizer};
use crate::config::Config;
use crate::dispatcher::{dispatch_frame, Dispatch};
use crate::error::Result;
use crate::events::{ClientEvent, TransportEvent};
use crate::moderation::ModerationControls;
use crate::protocol::Sensitivity;
use crate::session::{Connector, SendOutcome, Session, SessionIdentity, WebSocketConnector};
use crate::view::{ConversationView, Origin};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

pub struct ChatClient {
    config: Config,
    session: Session,
    view: ConversationView,
    capture: CaptureAgent,
    moderation: ModerationControls,
    backend: Arc<dyn Backend>,
    /// Settings and capture tasks not yet known to be finished
    side_tasks: Vec<JoinHandle<()>>,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    events_rx: mpsc::UnboundedReceiver<ClientEvent>,
}

impl ChatClient {
    /// Client talking WebSocket + HTTP to `config.server_url`
    pub fn new(config: Config) -> Result<Self> {
        let backend: Arc<dyn Backend> = Arc::new(HttpBackend::new(config.clone())?);
        let connector: Arc<dyn Connector> = Arc::new(WebSocketConnector::new(config.clone()));
        let rasterizer: Arc<dyn Rasterizer> = Arc::new(BufferRasterizer::new(config.capture));
        Ok(Self::with_parts(config, connector, backend, rasterizer))
    }

    /// Client with custom transport, backend and rasterizer
    pub fn with_parts(
        config: Config,
        connector: Arc<dyn Connector>,
        backend: Arc<dyn Backend>,
        rasterizer: Arc<dyn Rasterizer>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            session: Session::new(connector),
            view: ConversationView::new(),
            capture: CaptureAgent::new(rasterizer, backend.clone()),
            moderation: ModerationControls::new(backend.clone(), config.moderation_failures),
            backend,
            side_tasks: Vec::new(),
            config,
            events_tx,
            events_rx,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn view(&self) -> &ConversationView {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut ConversationView {
        &mut self.view
    }

    /// Validate identities, push settings, and open a fresh connection.
    ///
    /// Blank names fail with a validation error before anything else happens.
    /// The settings call never blocks or fails the connection.
    pub async fn connect(
        &mut self,
        local_user: &str,
        peer_user: &str,
        sensitivity: Sensitivity,
    ) -> Result<()> {
        let identity = SessionIdentity::new(local_user, peer_user)?;
        self.submit_settings(&identity.local_user, sensitivity);
        self.session.connect(identity, &self.events_tx).await?;
        Ok(())
    }

    /// Like [`ChatClient::connect`], but returns as soon as the identities
    /// are validated. The socket opens in the background; the outcome shows
    /// up as the usual "Connected" entry, or "Disconnected" if the open fails.
    pub fn start_connect(
        &mut self,
        local_user: &str,
        peer_user: &str,
        sensitivity: Sensitivity,
    ) -> Result<u64> {
        let identity = SessionIdentity::new(local_user, peer_user)?;
        self.submit_settings(&identity.local_user, sensitivity);
        Ok(self.session.begin_connect(identity, &self.events_tx))
    }

    fn submit_settings(&mut self, username: &str, sensitivity: Sensitivity) {
        let backend = self.backend.clone();
        let reports = self.events_tx.clone();
        let username = username.to_string();
        let task = tokio::spawn(async move {
            let result = backend.submit_settings(&username, sensitivity).await;
            let _ = reports.send(ClientEvent::SettingsSettled { username, result });
        });
        self.track(task);
    }

    fn track(&mut self, task: JoinHandle<()>) {
        self.side_tasks.retain(|t| !t.is_finished());
        self.side_tasks.push(task);
    }

    /// Apply queued events, then wait up to `limit` for outstanding settings
    /// and capture tasks and apply what they report.
    ///
    /// Call before exiting so a pending evidence upload is not cut off.
    /// Returns how many tasks were still running when the limit ran out.
    pub async fn drain_side_channels(&mut self, limit: Duration) -> usize {
        let deadline = Instant::now() + limit;
        self.apply_queued();

        let mut unfinished = 0;
        for task in std::mem::take(&mut self.side_tasks) {
            if timeout_at(deadline, task).await.is_err() {
                unfinished += 1;
            }
        }
        self.apply_queued();

        if unfinished > 0 {
            warn!("{} side task(s) still running after {:?}", unfinished, limit);
        }
        unfinished
    }

    fn apply_queued(&mut self) {
        while let Some(event) = self.try_next_event() {
            self.handle(event);
        }
    }

    /// Close the current connection without a "Disconnected" entry
    pub async fn disconnect(&mut self) {
        self.session.close().await;
    }

    pub fn send(&self, message: &str) -> SendOutcome {
        self.session.send(message)
    }

    /// Block the current peer on behalf of the local user
    pub fn block(&self) -> Option<JoinHandle<()>> {
        let identity = self.session.identity()?;
        self.block_pair(&identity.local_user, &identity.peer_user)
    }

    /// Unblock the current peer on behalf of the local user
    pub fn unblock(&self) -> Option<JoinHandle<()>> {
        let identity = self.session.identity()?;
        self.unblock_pair(&identity.local_user, &identity.peer_user)
    }

    pub fn block_pair(&self, victim: &str, offender: &str) -> Option<JoinHandle<()>> {
        self.moderation.block(victim, offender, self.events_tx.clone())
    }

    pub fn unblock_pair(&self, victim: &str, offender: &str) -> Option<JoinHandle<()>> {
        self.moderation.unblock(victim, offender, self.events_tx.clone())
    }

    /// Wait for the next event from the transport or a side channel
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events_rx.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<ClientEvent> {
        self.events_rx.try_recv().ok()
    }

    /// Wait for one event and apply it
    pub async fn step(&mut self) {
        if let Some(event) = self.next_event().await {
            self.handle(event);
        }
    }

    /// Apply one event to the session and view
    pub fn handle(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Transport { link, event } => {
                if !self.session.is_current(link) {
                    debug!("Ignoring {:?} from stale link {}", event, link);
                    return;
                }
                match event {
                    TransportEvent::Opened => {
                        self.view.append("Connected. Start chatting...", Origin::System);
                    }
                    TransportEvent::Frame(text) => self.dispatch(&text),
                    TransportEvent::Closed => {
                        if self.session.mark_closed(link) {
                            self.view.append("Disconnected", Origin::System);
                        }
                    }
                }
            }
            ClientEvent::LinkOpened { link, result } => match result {
                Ok(opened) => {
                    self.session.attach(link, opened, &self.events_tx);
                }
                Err(e) => {
                    if self.session.abandon(link) {
                        warn!("Failed to open link {}: {}", link, e);
                        self.view.append("Disconnected", Origin::System);
                    }
                }
            },
            ClientEvent::SettingsSettled { username, result } => match result {
                Ok(()) => debug!("Settings saved for {}", username),
                Err(e) => warn!("Failed to save settings for {}: {}", username, e),
            },
            ClientEvent::ModerationSettled(report) => {
                if let Some(text) = self.moderation.confirmation(&report) {
                    info!("{}", text);
                    self.view.append(text, Origin::System);
                }
            }
            ClientEvent::CaptureSettled(report) => {
                debug!(
                    "Capture for message {} settled (ok: {})",
                    report.message_id,
                    report.result.is_ok()
                );
            }
        }
    }

    fn dispatch(&mut self, frame: &str) {
        let local_user = self
            .session
            .identity()
            .map(|i| i.local_user.as_str())
            .unwrap_or_default();

        match dispatch_frame(frame, local_user) {
            Dispatch::Append { text, origin } => self.view.append(text, origin),
            Dispatch::Capture(context) => {
                let task = self
                    .capture
                    .capture(context, self.view.clone(), self.events_tx.clone());
                self.track(task);
            }
            Dispatch::Ignore => {}
        }
    }
}
