//! Conversation history API.
//!
//! History pages, deletions and reaction toggles go over HTTP rather than
//! the event channel. [`ConversationApi`] is the seam: [`HttpConversationApi`]
//! talks to the real server, [`MockApi`] backs the tests.

mod http;
mod mock;

pub use http::HttpConversationApi;
pub use mock::MockApi;

use async_trait::async_trait;
use parley_chat_core::PageRequest;
use parley_chat_types::{ChatMessage, MessageId, Reaction};
use thiserror::Error;

/// History API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced a response.
    #[error("request failed: {0}")]
    Request(String),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Body or reason phrase.
        message: String,
    },

    /// The response body did not decode.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Collaborator endpoints used by the synchronizer.
#[async_trait]
pub trait ConversationApi: Send + Sync {
    /// Fetch one page of history, newest first or older than
    /// `request.before`.
    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<ChatMessage>, ApiError>;

    /// Delete a message for the local user, or for everyone.
    async fn delete_message(&self, id: &MessageId, for_everyone: bool) -> Result<(), ApiError>;

    /// Toggle the local user's `emoji` on a message. Returns the message's
    /// full reaction list afterwards.
    async fn toggle_reaction(&self, id: &MessageId, emoji: &str)
        -> Result<Vec<Reaction>, ApiError>;
}
