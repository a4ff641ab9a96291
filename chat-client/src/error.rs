//! Client error type.

use parley_chat_core::{PendingError, RecordingError};
use parley_chat_types::{MessageId, ProtocolError};
use thiserror::Error;

use crate::api::ApiError;
use crate::config::ConfigError;
use crate::media::MediaError;
use crate::transport::TransportError;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// History API error.
    #[error("api error: {0}")]
    Api(#[from] ApiError),

    /// Media device or negotiation error.
    #[error("media error: {0}")]
    Media(#[from] MediaError),

    /// Frame encode/decode error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Too many unconfirmed sends.
    #[error("send rejected: {0}")]
    Pending(#[from] PendingError),

    /// No usable recording.
    #[error("recording error: {0}")]
    Recording(#[from] RecordingError),

    /// Not connected to the server.
    #[error("not connected")]
    NotConnected,

    /// No conversation is selected.
    #[error("no conversation selected")]
    NoConversation,

    /// A call is already pending or active.
    #[error("a call is already in progress")]
    CallInProgress,

    /// A deletion for this message is already running.
    #[error("message {0} is already being deleted")]
    DeletionPending(MessageId),

    /// The message is not in the window.
    #[error("message {0} not found")]
    UnknownMessage(MessageId),

    /// The requested deletion is not offered for this message.
    #[error("message {0} cannot be deleted that way")]
    DeletionNotAllowed(MessageId),
}
