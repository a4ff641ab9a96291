//! # chat-client
//!
//! Client library for Parley real-time conversations and call signaling.
//!
//! This is the library applications embed: it owns the event channel, the
//! conversation window, the current call and the voice-note recorder for
//! one signed-in user.
//!
//! ## Features
//!
//! - **Optimistic sends**: messages appear at once and are reconciled by
//!   correlation token when the server confirms them
//! - **Paged history**: newest page on select, older pages on demand, one
//!   fetch in flight at a time
//! - **Call signaling**: offer/answer over the event channel, media behind
//!   pluggable device and peer-connection traits
//! - **Transport abstraction**: WebSocket or mock
//! - **Pure state machines**: uses chat-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use parley_chat_client::{ChatSession, ClientConfig, HttpConversationApi, WebSocketTransport};
//!
//! let config = ClientConfig::from_file(path)?;
//! let api = HttpConversationApi::new(&config.server.api_base, &token);
//! let session = ChatSession::new(config, me, WebSocketTransport::new(), api, media);
//!
//! session.connect(&token).await?;
//! session.select_conversation(peer).await?;
//! session.send_text("hello").await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod call;
pub mod config;
pub mod error;
pub mod media;
pub mod session;
pub mod synchronizer;
pub mod transport;
pub mod voice;

pub use api::{ApiError, ConversationApi, HttpConversationApi, MockApi};
pub use call::{CallController, CallOutcome};
pub use config::{ClientConfig, ConfigError};
pub use error::ClientError;
pub use media::{
    AudioCapture, AudioOutput, ClipSource, IceConfig, LoopbackMedia, MediaBackend,
    MediaConstraints, MediaDevices, MediaError, MediaStream, PeerConnection, PeerConnector,
    PeerEvent,
};
pub use session::{ChatSession, SessionEvent};
pub use synchronizer::{MessageSynchronizer, WindowSnapshot};
pub use transport::{MockTransport, Transport, TransportError, WebSocketTransport};
pub use voice::{VoicePlayer, VoiceRecorder};
