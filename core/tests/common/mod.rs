#![allow(dead_code)]
/// Shared fakes for integration tests
use async_trait::async_trait;
use cyberbull_core::backend::Backend;
use cyberbull_core::capture::Rasterizer;
use cyberbull_core::events::ClientEvent;
use cyberbull_core::moderation::FailurePolicy;
use cyberbull_core::protocol::{MessageId, Sensitivity};
use cyberbull_core::session::{Connector, Link, LinkFrame};
use cyberbull_core::view::ConversationView;
use cyberbull_core::{ChatClient, ChatError, Config, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

/// Relay side of one in-memory link
pub struct RemoteEnd {
    pub user: String,
    pub to_client: mpsc::UnboundedSender<LinkFrame>,
    pub from_client: mpsc::UnboundedReceiver<String>,
}

impl RemoteEnd {
    pub fn push(&self, frame: &str) {
        self.to_client
            .send(LinkFrame::Text(frame.to_string()))
            .expect("client side of link is gone");
    }

    pub fn sent(&mut self) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(text) = self.from_client.try_recv() {
            out.push(serde_json::from_str(&text).expect("client sent invalid JSON"));
        }
        out
    }
}

#[derive(Default)]
pub struct MemoryConnector {
    remotes: Mutex<Vec<RemoteEnd>>,
    opened: Mutex<Vec<String>>,
}

impl MemoryConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Usernames of every link opened so far
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    /// Take the relay end of the oldest link not yet taken
    pub fn take_remote(&self) -> RemoteEnd {
        let mut remotes = self.remotes.lock().unwrap();
        assert!(!remotes.is_empty(), "no link was opened");
        remotes.remove(0)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, local_user: &str) -> Result<Link> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.opened.lock().unwrap().push(local_user.to_string());
        self.remotes.lock().unwrap().push(RemoteEnd {
            user: local_user.to_string(),
            to_client: in_tx,
            from_client: out_rx,
        });
        Ok(Link::new(out_tx, in_rx))
    }
}

/// Connector whose opens wait until the test releases them
pub struct GatedConnector {
    pub inner: Arc<MemoryConnector>,
    gate: Semaphore,
    refuse: bool,
}

impl GatedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryConnector::new(),
            gate: Semaphore::new(0),
            refuse: false,
        })
    }

    /// Opens fail once released
    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryConnector::new(),
            gate: Semaphore::new(0),
            refuse: true,
        })
    }

    /// Let `n` pending or future opens proceed
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }
}

#[async_trait]
impl Connector for GatedConnector {
    async fn open(&self, local_user: &str) -> Result<Link> {
        self.gate
            .acquire()
            .await
            .map_err(|_| ChatError::Transport("gate closed".to_string()))?
            .forget();
        if self.refuse {
            return Err(ChatError::Transport("connection refused".to_string()));
        }
        self.inner.open(local_user).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Settings { username: String, sensitivity: Sensitivity },
    Block { victim: String, offender: String },
    Unblock { victim: String, offender: String },
    Upload { message_id: String, bytes: usize },
}

#[derive(Default)]
pub struct RecordingBackend {
    calls: Mutex<Vec<Call>>,
    fail_moderation: AtomicBool,
    fail_upload: AtomicBool,
    upload_delay: Mutex<Duration>,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_moderation(&self) {
        self.fail_moderation.store(true, Ordering::SeqCst);
    }

    pub fn fail_upload(&self) {
        self.fail_upload.store(true, Ordering::SeqCst);
    }

    /// Uploads take `delay` and are recorded only once they complete
    pub fn slow_upload(&self, delay: Duration) {
        *self.upload_delay.lock().unwrap() = delay;
    }

    fn moderation_result(&self) -> Result<()> {
        if self.fail_moderation.load(Ordering::SeqCst) {
            Err(ChatError::Transport("backend unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn submit_settings(&self, username: &str, sensitivity: Sensitivity) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Settings {
            username: username.to_string(),
            sensitivity,
        });
        Ok(())
    }

    async fn block(&self, victim: &str, offender: &str) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Block {
            victim: victim.to_string(),
            offender: offender.to_string(),
        });
        self.moderation_result()
    }

    async fn unblock(&self, victim: &str, offender: &str) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Unblock {
            victim: victim.to_string(),
            offender: offender.to_string(),
        });
        self.moderation_result()
    }

    async fn upload_screenshot(&self, message_id: &MessageId, png: Vec<u8>) -> Result<()> {
        let delay = *self.upload_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().unwrap().push(Call::Upload {
            message_id: message_id.to_string(),
            bytes: png.len(),
        });
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(ChatError::Transport("upload rejected".to_string()));
        }
        Ok(())
    }
}

/// Rasterizer returning a fixed blob, or failing
pub struct StubRasterizer {
    pub fail: bool,
}

impl Rasterizer for StubRasterizer {
    fn rasterize(&self, snapshot: &ConversationView) -> Result<Vec<u8>> {
        if self.fail {
            return Err(ChatError::SideChannel("no display".to_string()));
        }
        Ok(vec![0x89; 8 + snapshot.len()])
    }
}

pub fn client_with(
    connector: Arc<MemoryConnector>,
    backend: Arc<RecordingBackend>,
    policy: FailurePolicy,
) -> ChatClient {
    let config = Config {
        moderation_failures: policy,
        ..Default::default()
    };
    ChatClient::with_parts(
        config,
        connector,
        backend,
        Arc::new(StubRasterizer { fail: false }),
    )
}

/// Apply events until the queue stays quiet for a moment
pub async fn settle(client: &mut ChatClient) {
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(100), client.next_event()).await
    {
        client.handle(event);
    }
}

/// Apply events until one matches, failing after a few seconds
pub async fn wait_for<F>(client: &mut ChatClient, mut pred: F) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let event = tokio::time::timeout_at(deadline, client.next_event())
            .await
            .expect("timed out waiting for client event")
            .expect("client event channel closed");
        if pred(&event) {
            return event;
        }
        client.handle(event);
    }
}

pub fn texts(client: &ChatClient) -> Vec<String> {
    client.view().entries().iter().map(|e| e.text.clone()).collect()
}
