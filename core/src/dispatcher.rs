/// Routing of inbound relay events to the conversation view or the capture agent
use crate::protocol::{decode_inbound, CaptureContext, Decoded, InboundEvent};
use crate::view::Origin;
use tracing::debug;

/// What the client should do with one inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Append one conversation entry
    Append { text: String, origin: Origin },
    /// Hand the request to the capture agent; nothing is rendered
    Capture(CaptureContext),
    /// No entry, no side effect
    Ignore,
}

/// Route a decoded event. `local_user` decides self vs peer for chat messages.
pub fn dispatch(event: InboundEvent, local_user: &str) -> Dispatch {
    match event {
        InboundEvent::Message { from, message } => {
            let origin = if from == local_user {
                Origin::Local
            } else {
                Origin::Peer
            };
            Dispatch::Append {
                text: format!("{}: {}", from, message),
                origin,
            }
        }
        InboundEvent::Bot { message } => Dispatch::Append {
            text: format!("BOT: {}", message),
            origin: Origin::Bot,
        },
        InboundEvent::BotInfo { message } => Dispatch::Append {
            text: format!("INFO: {}", message),
            origin: Origin::System,
        },
        InboundEvent::CaptureScreenshot { context } => Dispatch::Capture(context),
    }
}

/// Decode a raw text frame and route it.
///
/// Unknown tags and malformed frames are dropped here.
pub fn dispatch_frame(frame: &str, local_user: &str) -> Dispatch {
    match decode_inbound(frame) {
        Ok(Decoded::Event(event)) => {
            debug!("Dispatching {}", event);
            dispatch(event, local_user)
        }
        Ok(Decoded::Unrecognized(kind)) => {
            debug!("Ignoring frame with unrecognized type {:?}", kind);
            Dispatch::Ignore
        }
        Err(e) => {
            debug!("Ignoring malformed frame: {}", e);
            Dispatch::Ignore
        }
    }
}
