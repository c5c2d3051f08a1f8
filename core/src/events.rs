/// Events flowing back into the chat client's single control loop
use crate::error::ChatError;
use crate::protocol::MessageId;
use crate::session::Link;
use std::fmt;

/// Lifecycle and data signals from one transport link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The link finished its handshake
    Opened,
    /// One text frame from the relay
    Frame(String),
    /// The link ended without the client asking for it
    Closed,
}

/// Block or unblock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationAction {
    Block,
    Unblock,
}

impl ModerationAction {
    /// Past tense used in confirmations ("You blocked bob")
    pub fn past_tense(&self) -> &'static str {
        match self {
            ModerationAction::Block => "blocked",
            ModerationAction::Unblock => "unblocked",
        }
    }
}

impl fmt::Display for ModerationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModerationAction::Block => f.write_str("block"),
            ModerationAction::Unblock => f.write_str("unblock"),
        }
    }
}

/// Outcome of a settled block/unblock call
#[derive(Debug)]
pub struct ModerationReport {
    pub action: ModerationAction,
    pub victim: String,
    pub offender: String,
    pub result: Result<(), ChatError>,
}

/// Outcome of one rasterize-then-upload run
#[derive(Debug)]
pub struct CaptureReport {
    pub message_id: MessageId,
    pub result: Result<(), ChatError>,
}

/// Everything the client loop reacts to
#[derive(Debug)]
pub enum ClientEvent {
    Transport { link: u64, event: TransportEvent },
    /// A background open started by `begin_connect` finished
    LinkOpened { link: u64, result: Result<Link, ChatError> },
    SettingsSettled { username: String, result: Result<(), ChatError> },
    ModerationSettled(ModerationReport),
    CaptureSettled(CaptureReport),
}
