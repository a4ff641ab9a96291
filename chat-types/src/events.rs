//! Events exchanged over the channel to the coordination server.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! [`InboundEvent`] and [`OutboundEvent`] are closed unions: a frame with an
//! unknown name or a malformed payload fails to decode at the transport
//! boundary and never reaches the state machines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::ids::{CallId, CorrelationId, MessageId, UserId};
use crate::message::{ChatMessage, MessageKind, Reaction};
use crate::signal::{CallKind, SessionDescription};

/// Events the server pushes to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A peer sent us a message (or our own send, echoed).
    NewMessage(MessageEnvelope),
    /// Our send was stored; carries the server record.
    MessageSent(MessageConfirmation),
    /// A peer started typing.
    UserTyping(TypingNotice),
    /// A peer stopped typing.
    UserStoppedTyping(TypingNotice),
    /// Someone reacted to a message.
    ReactionAdded(ReactionAdded),
    /// Someone withdrew a reaction.
    ReactionRemoved(ReactionRemoved),
    /// A message was read by its receiver.
    MessageRead(ReadReceipt),
    /// A message was deleted for everyone.
    MessageDeleted(MessageRef),
    /// Incoming audio call offer.
    AudioCallIncoming(IncomingCall),
    /// Incoming video call offer.
    VideoCallIncoming(IncomingCall),
    /// The callee answered our audio call.
    AudioCallAnswered(CallAnswered),
    /// The callee answered our video call.
    VideoCallAnswered(CallAnswered),
    /// The callee rejected our call.
    AudioCallRejected(CallNotice),
    /// The peer hung up.
    AudioCallEnded(CallNotice),
    /// The caller gave up before we answered.
    AudioCallMissed(CallNotice),
    /// The peer's channel dropped mid-call.
    AudioCallDisconnected(CallNotice),
    /// Server-side error report.
    Error(ServerError),
}

impl InboundEvent {
    /// Decode a text frame.
    pub fn from_json(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(ProtocolError::Decode)
    }

    /// Encode as a text frame. Used by test relays and tooling.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::NewMessage(_) => "new_message",
            InboundEvent::MessageSent(_) => "message_sent",
            InboundEvent::UserTyping(_) => "user_typing",
            InboundEvent::UserStoppedTyping(_) => "user_stopped_typing",
            InboundEvent::ReactionAdded(_) => "reaction_added",
            InboundEvent::ReactionRemoved(_) => "reaction_removed",
            InboundEvent::MessageRead(_) => "message_read",
            InboundEvent::MessageDeleted(_) => "message_deleted",
            InboundEvent::AudioCallIncoming(_) => "audio_call_incoming",
            InboundEvent::VideoCallIncoming(_) => "video_call_incoming",
            InboundEvent::AudioCallAnswered(_) => "audio_call_answered",
            InboundEvent::VideoCallAnswered(_) => "video_call_answered",
            InboundEvent::AudioCallRejected(_) => "audio_call_rejected",
            InboundEvent::AudioCallEnded(_) => "audio_call_ended",
            InboundEvent::AudioCallMissed(_) => "audio_call_missed",
            InboundEvent::AudioCallDisconnected(_) => "audio_call_disconnected",
            InboundEvent::Error(_) => "error",
        }
    }

    /// The call-signaling meaning of this event, if it has one.
    ///
    /// Folds the audio/video variants into one [`CallSignal`] carrying the
    /// [`CallKind`].
    pub fn call_signal(&self) -> Option<CallSignal> {
        let signal = match self {
            InboundEvent::AudioCallIncoming(c) => CallSignal::Incoming {
                kind: CallKind::Audio,
                call: c.clone(),
            },
            InboundEvent::VideoCallIncoming(c) => CallSignal::Incoming {
                kind: CallKind::Video,
                call: c.clone(),
            },
            InboundEvent::AudioCallAnswered(a) => CallSignal::Answered {
                kind: CallKind::Audio,
                answered: a.clone(),
            },
            InboundEvent::VideoCallAnswered(a) => CallSignal::Answered {
                kind: CallKind::Video,
                answered: a.clone(),
            },
            InboundEvent::AudioCallRejected(n) => CallSignal::Rejected(n.call_id.clone()),
            InboundEvent::AudioCallEnded(n) => CallSignal::Ended(n.call_id.clone()),
            InboundEvent::AudioCallMissed(n) => CallSignal::Missed(n.call_id.clone()),
            InboundEvent::AudioCallDisconnected(n) => {
                CallSignal::Disconnected(n.call_id.clone())
            }
            _ => return None,
        };
        Some(signal)
    }
}

/// Call-related inbound events with the kind folded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallSignal {
    /// An offer arrived.
    Incoming {
        /// Audio or video.
        kind: CallKind,
        /// Caller, call id, offer.
        call: IncomingCall,
    },
    /// Our offer was answered.
    Answered {
        /// Audio or video.
        kind: CallKind,
        /// Call id and answer.
        answered: CallAnswered,
    },
    /// Peer rejected.
    Rejected(Option<CallId>),
    /// Peer hung up.
    Ended(Option<CallId>),
    /// Caller gave up.
    Missed(Option<CallId>),
    /// Peer dropped.
    Disconnected(Option<CallId>),
}

/// Payload of `new_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// The message record.
    pub message: ChatMessage,
}

/// Payload of `message_sent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageConfirmation {
    /// The stored record.
    pub message: ChatMessage,
    /// Echo of the send token, when the server supports it.
    #[serde(
        rename = "clientMessageId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_message_id: Option<CorrelationId>,
}

impl MessageConfirmation {
    /// The echoed token, from the envelope or the record.
    pub fn correlation(&self) -> Option<CorrelationId> {
        self.client_message_id.or(self.message.correlation)
    }
}

/// Payload of `user_typing` / `user_stopped_typing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingNotice {
    /// Typist's id, when the server includes it.
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Typist's display name. The typing set is keyed by it.
    #[serde(rename = "userName")]
    pub user_name: String,
}

/// Payload of `reaction_added`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionAdded {
    /// Target message.
    #[serde(rename = "messageId")]
    pub message_id: MessageId,
    /// The reaction to append.
    pub reaction: Reaction,
}

/// Payload of `reaction_removed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionRemoved {
    /// Target message.
    #[serde(rename = "messageId")]
    pub message_id: MessageId,
    /// Who withdrew it.
    #[serde(rename = "userId")]
    pub user_id: UserId,
    /// Which emoji.
    pub emoji: String,
}

/// Payload of `message_read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    /// The message that was read.
    #[serde(rename = "messageId")]
    pub message_id: MessageId,
    /// When.
    #[serde(rename = "readAt", default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

/// A bare message reference (`message_deleted`, `mark_as_read`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    /// The message.
    #[serde(rename = "messageId")]
    pub message_id: MessageId,
}

/// Payload of `audio_call_incoming` / `video_call_incoming`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingCall {
    /// Who is calling.
    #[serde(rename = "callerId")]
    pub caller_id: UserId,
    /// Call attempt id chosen by the caller.
    #[serde(rename = "callId")]
    pub call_id: CallId,
    /// The caller's offer. Answering without one is refused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
}

/// Payload of `audio_call_answered` / `video_call_answered`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallAnswered {
    /// Call id, when the server forwards it.
    #[serde(rename = "callId", default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<CallId>,
    /// The callee's answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
}

/// Payload of the reject/end/miss/disconnect notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallNotice {
    /// The call this notice is about, when the server forwards it.
    #[serde(rename = "callId", default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<CallId>,
}

/// Payload of `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Human-readable description.
    pub message: String,
}

/// Events the client emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// Send a text or audio message.
    SendMessage(SendMessage),
    /// We started typing to a peer.
    TypingStart(TypingTarget),
    /// We stopped typing to a peer.
    TypingStop(TypingTarget),
    /// Acknowledge a received message.
    MarkAsRead(MessageRef),
    /// Place an audio call.
    AudioCallRequest(CallRequest),
    /// Place a video call.
    VideoCallRequest(CallRequest),
    /// Answer an audio call.
    AudioCallAnswer(CallAnswer),
    /// Answer a video call.
    VideoCallAnswer(CallAnswer),
    /// Decline an incoming call.
    AudioCallReject(CallReject),
    /// Hang up.
    AudioCallEnd(CallEnd),
}

impl OutboundEvent {
    /// Call request for the given kind.
    pub fn call_request(kind: CallKind, request: CallRequest) -> Self {
        match kind {
            CallKind::Audio => OutboundEvent::AudioCallRequest(request),
            CallKind::Video => OutboundEvent::VideoCallRequest(request),
        }
    }

    /// Call answer for the given kind.
    pub fn call_answer(kind: CallKind, answer: CallAnswer) -> Self {
        match kind {
            CallKind::Audio => OutboundEvent::AudioCallAnswer(answer),
            CallKind::Video => OutboundEvent::VideoCallAnswer(answer),
        }
    }

    /// Encode as a text frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Decode a text frame. Used by test relays and tooling.
    pub fn from_json(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(ProtocolError::Decode)
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::SendMessage(_) => "send_message",
            OutboundEvent::TypingStart(_) => "typing_start",
            OutboundEvent::TypingStop(_) => "typing_stop",
            OutboundEvent::MarkAsRead(_) => "mark_as_read",
            OutboundEvent::AudioCallRequest(_) => "audio_call_request",
            OutboundEvent::VideoCallRequest(_) => "video_call_request",
            OutboundEvent::AudioCallAnswer(_) => "audio_call_answer",
            OutboundEvent::VideoCallAnswer(_) => "video_call_answer",
            OutboundEvent::AudioCallReject(_) => "audio_call_reject",
            OutboundEvent::AudioCallEnd(_) => "audio_call_end",
        }
    }
}

/// Payload of `send_message`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    /// Text content. Audio sends carry a fixed caption.
    pub content: String,
    /// Addressee.
    #[serde(rename = "receiverId")]
    pub receiver_id: UserId,
    /// Text or audio.
    #[serde(rename = "messageType")]
    pub message_type: MessageKind,
    /// Base64-encoded clip for audio sends.
    #[serde(rename = "audioBlob", default, skip_serializing_if = "Option::is_none")]
    pub audio_blob: Option<String>,
    /// Token echoed back in `message_sent`.
    #[serde(rename = "clientMessageId")]
    pub client_message_id: CorrelationId,
}

impl std::fmt::Debug for SendMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendMessage")
            .field("content", &self.content)
            .field("receiver_id", &self.receiver_id)
            .field("message_type", &self.message_type)
            .field(
                "audio_blob",
                &self
                    .audio_blob
                    .as_ref()
                    .map(|b| format!("[{} bytes REDACTED]", b.len())),
            )
            .field("client_message_id", &self.client_message_id)
            .finish()
    }
}

/// Payload of `typing_start` / `typing_stop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingTarget {
    /// The peer we are typing to.
    #[serde(rename = "receiverId")]
    pub receiver_id: UserId,
}

/// Payload of `audio_call_request` / `video_call_request`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRequest {
    /// Callee.
    #[serde(rename = "receiverId")]
    pub receiver_id: UserId,
    /// Our offer.
    pub offer: SessionDescription,
    /// Freshly generated call id.
    #[serde(rename = "callId")]
    pub call_id: CallId,
}

/// Payload of `audio_call_answer` / `video_call_answer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallAnswer {
    /// Caller.
    #[serde(rename = "callerId")]
    pub caller_id: UserId,
    /// Our answer.
    pub answer: SessionDescription,
    /// Call id from the offer.
    #[serde(rename = "callId")]
    pub call_id: CallId,
}

/// Payload of `audio_call_reject`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallReject {
    /// Call id from the offer.
    #[serde(rename = "callId")]
    pub call_id: CallId,
    /// Caller.
    #[serde(rename = "callerId")]
    pub caller_id: UserId,
}

/// Payload of `audio_call_end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEnd {
    /// The call being ended.
    #[serde(rename = "callId")]
    pub call_id: CallId,
    /// The other party.
    #[serde(rename = "receiverId")]
    pub receiver_id: UserId,
}
