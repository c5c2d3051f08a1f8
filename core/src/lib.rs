/// CyberBull - moderated peer-to-peer chat client
///
/// Connects to a chat relay over WebSocket, renders the conversation,
/// cooperates with the relay's moderation backend (block/unblock, sensitivity)
/// and answers server-issued screenshot requests with evidence uploads.

pub mod backend;
pub mod capture;
pub mod cli_app;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod moderation;
pub mod protocol;
pub mod session;
pub mod view;

pub use client::ChatClient;
pub use config::Config;
pub use error::{ChatError, Result};
