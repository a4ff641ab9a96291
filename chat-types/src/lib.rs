//! # chat-types
//!
//! Wire vocabulary for the Parley conversation and call-signaling protocol.
//!
//! This crate provides the foundational types used across all Parley crates:
//! - [`UserId`], [`MessageId`], [`CallId`], [`CorrelationId`] - Identity types
//! - [`ChatMessage`] - A message record as the server and the window see it
//! - [`SessionDescription`] - Offer/answer negotiation payloads
//! - [`InboundEvent`], [`OutboundEvent`] - The closed set of channel events
//! - [`ProtocolError`] - Error types
//!
//! Everything that crosses the event channel is decoded into one of these
//! types at the transport boundary. Nothing downstream inspects raw JSON.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod events;
mod ids;
mod message;
mod signal;

pub use error::ProtocolError;
pub use events::{
    CallAnswer, CallAnswered, CallEnd, CallNotice, CallReject, CallRequest, CallSignal,
    InboundEvent, IncomingCall, MessageConfirmation, MessageEnvelope, MessageRef,
    OutboundEvent, ReactionAdded, ReactionRemoved, ReadReceipt, SendMessage, ServerError,
    TypingNotice, TypingTarget,
};
pub use ids::{CallId, CorrelationId, MessageId, UserId};
pub use message::{ChatMessage, MessageBody, MessageKind, Participant, Reaction};
pub use signal::{CallKind, CallRole, SdpType, SessionDescription};
