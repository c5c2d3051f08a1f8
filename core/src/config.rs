/// Configuration management
use crate::error::{ChatError, Result};
use crate::moderation::FailurePolicy;
use crate::protocol::Sensitivity;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";

/// Size of the off-screen conversation snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Terminal columns rendered into the snapshot
    pub cols: u16,
    /// Terminal rows rendered into the snapshot
    pub rows: u16,
    /// Pixel width of one cell
    pub cell_width: u32,
    /// Pixel height of one cell
    pub cell_height: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            cols: 80,
            rows: 24,
            cell_width: 8,
            cell_height: 16,
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base HTTP URL of the relay, e.g. `http://127.0.0.1:8000`
    pub server_url: String,

    /// Sensitivity submitted on connect
    pub sensitivity: Sensitivity,

    /// WebSocket handshake timeout
    pub connect_timeout: Duration,

    /// Timeout for settings, moderation and upload calls
    pub request_timeout: Duration,

    /// What to show when a block/unblock call fails
    pub moderation_failures: FailurePolicy,

    /// Snapshot geometry for the capture agent
    pub capture: CaptureSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            sensitivity: Sensitivity::default(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            moderation_failures: FailurePolicy::default(),
            capture: CaptureSettings::default(),
        }
    }
}

impl Config {
    /// Create config from command line arguments.
    ///
    /// Recognised flags are consumed; everything else is returned untouched
    /// as positional arguments for the caller.
    pub fn from_args(args: &[String]) -> Result<(Self, Vec<String>)> {
        let mut config = Config::default();
        let mut positional = Vec::new();

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--server" => {
                    let url = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--server requires a URL argument".to_string())
                    })?;
                    config.server_url = url.clone();
                    i += 2;
                }
                "--sensitivity" => {
                    let s = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--sensitivity requires low, medium or high".to_string())
                    })?;
                    config.sensitivity = s.parse()?;
                    i += 2;
                }
                "--connect-timeout" => {
                    let secs = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--connect-timeout requires seconds".to_string())
                    })?;
                    let secs = secs.parse::<u64>().map_err(|_| {
                        ChatError::Config("--connect-timeout must be a whole number of seconds".to_string())
                    })?;
                    config.connect_timeout = Duration::from_secs(secs);
                    i += 2;
                }
                "--surface-errors" => {
                    config.moderation_failures = FailurePolicy::Surface;
                    i += 1;
                }
                other => {
                    positional.push(other.to_string());
                    i += 1;
                }
            }
        }

        // Env overrides (nice for scripts)
        if let Ok(url) = std::env::var("CYBERBULL_SERVER") {
            config.server_url = url;
        }
        if let Ok(s) = std::env::var("CYBERBULL_SENSITIVITY") {
            config.sensitivity = s.parse()?;
        }
        if std::env::var("CYBERBULL_SURFACE_ERRORS").is_ok() {
            config.moderation_failures = FailurePolicy::Surface;
        }

        config.server_url = config.server_url.trim_end_matches('/').to_string();
        config.ws_base()?;

        Ok((config, positional))
    }

    /// WebSocket base derived from the HTTP base
    fn ws_base(&self) -> Result<String> {
        let base = self.server_url.trim_end_matches('/');
        if let Some(rest) = base.strip_prefix("https://") {
            Ok(format!("wss://{}", rest))
        } else if let Some(rest) = base.strip_prefix("http://") {
            Ok(format!("ws://{}", rest))
        } else {
            Err(ChatError::Config(format!(
                "Server URL must start with http:// or https:// (got '{}')",
                self.server_url
            )))
        }
    }

    /// Socket endpoint for one local identity
    pub fn ws_url(&self, username: &str) -> Result<String> {
        Ok(format!("{}/ws/{}", self.ws_base()?, urlencoding::encode(username)))
    }

    /// HTTP endpoint on the relay
    pub fn http_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.server_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
