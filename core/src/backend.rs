/// Request/response calls to the relay's moderation backend
///
/// Endpoints:
///   POST /settings             form: username, sensitivity
///   POST /block                form: victim, offender
///   POST /unblock              form: victim, offender
///   POST /upload_screenshot    multipart: message_id, screenshot (image/png)
///   GET  /presence             {"active": [...]}
///   GET  /blocked?victim=...   [{offender, status, created_at}]
///   GET  /incidents            [{id, message_id, sender, ...}]
///   GET  /report?offender=&victim=   zip of incidents.csv + screenshots
use crate::config::Config;
use crate::error::Result;
use crate::protocol::{MessageId, Sensitivity};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Calls the chat client makes outside the socket
#[async_trait]
pub trait Backend: Send + Sync {
    async fn submit_settings(&self, username: &str, sensitivity: Sensitivity) -> Result<()>;

    async fn block(&self, victim: &str, offender: &str) -> Result<()>;

    async fn unblock(&self, victim: &str, offender: &str) -> Result<()>;

    async fn upload_screenshot(&self, message_id: &MessageId, png: Vec<u8>) -> Result<()>;
}

/// One row of `GET /blocked`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockedRecord {
    pub offender: String,
    pub status: String,
    pub created_at: String,
}

/// One row of `GET /incidents`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncidentRecord {
    pub id: i64,
    pub message_id: Option<MessageId>,
    pub sender: String,
    pub victim: String,
    pub detected_words: String,
    pub severity: String,
    pub screenshot_path: Option<String>,
    pub created_at: String,
}

#[derive(Deserialize)]
struct PresenceResponse {
    active: Vec<String>,
}

/// [`Backend`] over HTTP with reqwest
#[derive(Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    config: Config,
}

impl HttpBackend {
    pub fn new(config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, config })
    }

    async fn post_form(&self, path: &str, fields: &[(&str, &str)]) -> Result<()> {
        let url = self.config.http_url(path);
        debug!("POST {}", url);
        self.http
            .post(&url)
            .form(fields)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Usernames currently connected to the relay
    pub async fn presence(&self) -> Result<Vec<String>> {
        let resp: PresenceResponse = self
            .http
            .get(self.config.http_url("/presence"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.active)
    }

    /// Users that `victim` has blocked
    pub async fn blocked(&self, victim: &str) -> Result<Vec<BlockedRecord>> {
        let rows = self
            .http
            .get(self.config.http_url("/blocked"))
            .query(&[("victim", victim)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(rows)
    }

    /// Most recent abuse incidents recorded by the relay
    pub async fn incidents(&self) -> Result<Vec<IncidentRecord>> {
        let rows = self
            .http
            .get(self.config.http_url("/incidents"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(rows)
    }

    /// Evidence bundle for one offender/victim pair, as raw zip bytes.
    ///
    /// The relay answers 404 when the pair has no incidents; that comes back
    /// as an error like any other non-2xx status.
    pub async fn report(&self, offender: &str, victim: &str) -> Result<Vec<u8>> {
        let url = self.config.http_url("/report");
        debug!("GET {} (offender={}, victim={})", url, offender, victim);
        let body = self
            .http
            .get(url)
            .query(&[("offender", offender), ("victim", victim)])
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn submit_settings(&self, username: &str, sensitivity: Sensitivity) -> Result<()> {
        self.post_form(
            "/settings",
            &[("username", username), ("sensitivity", sensitivity.as_str())],
        )
        .await
    }

    async fn block(&self, victim: &str, offender: &str) -> Result<()> {
        self.post_form("/block", &[("victim", victim), ("offender", offender)])
            .await
    }

    async fn unblock(&self, victim: &str, offender: &str) -> Result<()> {
        self.post_form("/unblock", &[("victim", victim), ("offender", offender)])
            .await
    }

    async fn upload_screenshot(&self, message_id: &MessageId, png: Vec<u8>) -> Result<()> {
        let url = self.config.http_url("/upload_screenshot");
        let screenshot = Part::bytes(png)
            .file_name("shot.png")
            .mime_str("image/png")?;
        let form = Form::new()
            .text("message_id", message_id.to_string())
            .part("screenshot", screenshot);

        debug!("POST {} (message_id={})", url, message_id);
        self.http
            .post(&url)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
