//! # chat-core
//!
//! Pure logic for Parley (no I/O, instant tests).
//!
//! This crate implements the conversation window, the call-signaling state
//! machine and the small controllers around them (typing, recording,
//! playback, pull-to-refresh) without any network, device or timer I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure**. Time is passed in as an
//! argument, and side effects come back as values:
//! - [`CallState::on_event`] returns the next state plus a list of
//!   [`CallAction`]s
//! - [`ConversationWindow`] returns [`PageRequest`]s and lists of ids to
//!   acknowledge
//! - [`TypingNotifier`] returns the outbound events to emit
//!
//! The actual I/O is performed by `chat-client`, which interprets these
//! values.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod call;
pub mod deletion;
pub mod pending;
pub mod player;
pub mod recording;
pub mod refresh;
pub mod typing;
pub mod window;

pub use call::{
    format_call_duration, CallAction, CallEvent, CallInput, CallState, DialStage, EndReason,
};
pub use deletion::{deletion_options, DeletionOptions};
pub use pending::{PendingError, PendingSends};
pub use player::{format_clock, ClipKey, Player, PlayerSnapshot};
pub use recording::{AudioClip, RecordingBuffer, RecordingError, AUDIO_MIME_TYPE};
pub use refresh::{PullToRefresh, ScrollTracker};
pub use typing::{TypingNotifier, TypingSet};
pub use window::{Confirmation, ConversationWindow, PageRequest, StagedSend};
