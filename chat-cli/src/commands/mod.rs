//! CLI command implementations.

pub mod history;
pub mod listen;
pub mod send;

use chrono::Local;
use parley_chat_client::{
    ChatSession, ClientConfig, HttpConversationApi, LoopbackMedia, MediaBackend,
    WebSocketTransport,
};
use parley_chat_types::{ChatMessage, UserId};

use crate::Identity;

/// A session over the real event channel and history API.
pub type Session = ChatSession<WebSocketTransport, HttpConversationApi>;

/// Build a session for `identity`.
///
/// The CLI has no audio or video devices; calls and voice notes run
/// against the loopback backend.
pub fn session(config: ClientConfig, identity: &Identity) -> Session {
    let api = HttpConversationApi::new(config.server.api_base.clone(), identity.token.clone());
    let media = LoopbackMedia::new();
    ChatSession::new(
        config,
        UserId::new(identity.user.clone()),
        WebSocketTransport::new(),
        api,
        MediaBackend::loopback(&media),
    )
}

/// One printable line for a message.
pub fn format_message(message: &ChatMessage) -> String {
    let time = message.created_at.with_timezone(&Local).format("%H:%M");
    let body = message.text().unwrap_or("[voice note]");
    let mut flags = String::new();
    if message.is_temporary {
        flags.push_str(" (sending)");
    } else if message.is_read {
        flags.push_str(" (read)");
    }
    if !message.reactions.is_empty() {
        let emoji: Vec<&str> = message.reactions.iter().map(|r| r.emoji.as_str()).collect();
        flags.push_str(&format!(" [{}]", emoji.join("")));
    }
    format!(
        "{} {}: {}{}",
        time,
        message.sender.display_name(),
        body,
        flags
    )
}
