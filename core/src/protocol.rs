/// Wire protocol between the chat client and the relay
use crate::error::ChatError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Type tags the relay is known to send
pub const INBOUND_TAGS: [&str; 4] = ["message", "bot", "bot_info", "capture_screenshot"];

/// Events pushed by the relay over the socket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum InboundEvent {
    /// Chat message relayed between two users (also echoed back to the sender)
    #[serde(rename = "message")]
    Message { from: String, message: String },

    /// Moderation bot speaking to this user
    #[serde(rename = "bot")]
    Bot { message: String },

    /// Informational notice from the relay
    #[serde(rename = "bot_info")]
    BotInfo { message: String },

    /// Request to snapshot the conversation as evidence
    #[serde(rename = "capture_screenshot")]
    CaptureScreenshot { context: CaptureContext },
}

impl InboundEvent {
    /// Get event type as its wire tag
    pub fn event_type(&self) -> &'static str {
        match self {
            InboundEvent::Message { .. } => "message",
            InboundEvent::Bot { .. } => "bot",
            InboundEvent::BotInfo { .. } => "bot_info",
            InboundEvent::CaptureScreenshot { .. } => "capture_screenshot",
        }
    }
}

impl fmt::Display for InboundEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InboundEvent({})", self.event_type())
    }
}

/// Context attached to a capture request.
///
/// Only `message_id` is needed to correlate the upload; the relay also sends
/// the flagged words and the victim, which are kept for logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureContext {
    pub message_id: MessageId,
    #[serde(default)]
    pub words: Vec<String>,
    #[serde(default)]
    pub victim: Option<String>,
}

/// Opaque correlation token for a screenshot upload.
///
/// The relay emits its database id as a JSON number; strings are accepted too.
/// The textual form is forwarded unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for MessageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => MessageId(s),
            RawId::Number(n) => MessageId(number_text(&n)),
        })
    }
}

/// Integer text for ids; integral floats such as `42.0` become `42`
fn number_text(n: &serde_json::Number) -> String {
    if let Some(f) = n.as_f64().filter(|_| n.is_f64()) {
        if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
            return format!("{}", f as i64);
        }
    }
    n.to_string()
}

/// Result of decoding one text frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Event(InboundEvent),
    /// Frame with a missing or unknown `type`; carries the tag if there was one
    Unrecognized(Option<String>),
}

/// Decode one inbound text frame.
///
/// Unknown tags are not an error. A known tag with a malformed payload is.
pub fn decode_inbound(text: &str) -> Result<Decoded, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .map(str::to_owned);

    match kind.as_deref() {
        Some(tag) if INBOUND_TAGS.contains(&tag) => {
            Ok(Decoded::Event(serde_json::from_value(value)?))
        }
        _ => Ok(Decoded::Unrecognized(kind)),
    }
}

/// Chat message sent by this client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundMessage {
    pub to: String,
    pub message: String,
}

impl OutboundMessage {
    pub fn new(to: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// How aggressively the relay should escalate abuse aimed at this user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    #[default]
    Medium,
    High,
}

impl Sensitivity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sensitivity::Low => "low",
            Sensitivity::Medium => "medium",
            Sensitivity::High => "high",
        }
    }

    /// Next level, wrapping around (used by the TUI selector)
    pub fn cycle(self) -> Self {
        match self {
            Sensitivity::Low => Sensitivity::Medium,
            Sensitivity::Medium => Sensitivity::High,
            Sensitivity::High => Sensitivity::Low,
        }
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sensitivity {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Sensitivity::Low),
            "medium" => Ok(Sensitivity::Medium),
            "high" => Ok(Sensitivity::High),
            other => Err(ChatError::Config(format!(
                "Unknown sensitivity '{}' (expected low, medium or high)",
                other
            ))),
        }
    }
}
