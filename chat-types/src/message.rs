//! Message records as carried by history pages and channel events.
//!
//! The server's JSON form is decoded through a private wire struct and
//! validated before it becomes a [`ChatMessage`]. Message kind is a tagged
//! [`MessageBody`] from that point on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::ids::{CorrelationId, MessageId, UserId};

/// Sender or receiver of a message.
///
/// The server sends either a bare id or a populated user object; both
/// decode to this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ParticipantWire", into = "ParticipantWire")]
pub struct Participant {
    /// The user's id.
    pub id: UserId,
    /// First name, when the server populated the record.
    pub first_name: Option<String>,
    /// Last name, when the server populated the record.
    pub last_name: Option<String>,
}

impl Participant {
    /// A participant known only by id.
    pub fn id_only(id: UserId) -> Self {
        Self {
            id,
            first_name: None,
            last_name: None,
        }
    }

    /// Full name if known, otherwise the raw id.
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => self.id.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ParticipantWire {
    Id(UserId),
    Populated {
        #[serde(rename = "_id")]
        id: UserId,
        #[serde(rename = "firstName", default, skip_serializing_if = "Option::is_none")]
        first_name: Option<String>,
        #[serde(rename = "lastName", default, skip_serializing_if = "Option::is_none")]
        last_name: Option<String>,
    },
}

impl From<ParticipantWire> for Participant {
    fn from(wire: ParticipantWire) -> Self {
        match wire {
            ParticipantWire::Id(id) => Participant::id_only(id),
            ParticipantWire::Populated {
                id,
                first_name,
                last_name,
            } => Participant {
                id,
                first_name,
                last_name,
            },
        }
    }
}

impl From<Participant> for ParticipantWire {
    fn from(p: Participant) -> Self {
        if p.first_name.is_none() && p.last_name.is_none() {
            ParticipantWire::Id(p.id)
        } else {
            ParticipantWire::Populated {
                id: p.id,
                first_name: p.first_name,
                last_name: p.last_name,
            }
        }
    }
}

/// One emoji reaction on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    /// Who reacted.
    #[serde(rename = "userId")]
    pub user_id: UserId,
    /// The emoji, as sent by the client.
    pub emoji: String,
}

/// Discriminant of a [`MessageBody`], as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// Recorded voice clip.
    Audio,
}

/// Content of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// Text content.
    Text {
        /// The text, trimmed on send.
        content: String,
    },
    /// Voice clip.
    Audio {
        /// Media URL once the server stored the clip. `None` while the
        /// message is still optimistic.
        uri: Option<String>,
    },
}

impl MessageBody {
    /// The wire discriminant.
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::Text { .. } => MessageKind::Text,
            MessageBody::Audio { .. } => MessageKind::Audio,
        }
    }
}

/// A message as held in the conversation window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ChatMessageWire", into = "ChatMessageWire")]
pub struct ChatMessage {
    /// Server id, or a temporary id while unconfirmed.
    pub id: MessageId,
    /// Author.
    pub sender: Participant,
    /// Addressee.
    pub receiver: Participant,
    /// Text or audio content.
    pub body: MessageBody,
    /// Creation timestamp. Ordering key of the window.
    pub created_at: DateTime<Utc>,
    /// Whether the receiver has read it.
    pub is_read: bool,
    /// When the receiver read it.
    pub read_at: Option<DateTime<Utc>>,
    /// Reactions in the order the server reports them.
    pub reactions: Vec<Reaction>,
    /// Set on optimistic records until the server confirms them.
    pub is_temporary: bool,
    /// Token of the send that produced this record, if any.
    pub correlation: Option<CorrelationId>,
}

impl ChatMessage {
    /// Optimistic text message awaiting confirmation.
    pub fn pending_text(
        correlation: CorrelationId,
        sender: UserId,
        receiver: UserId,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self::pending(
            correlation,
            sender,
            receiver,
            MessageBody::Text {
                content: content.into(),
            },
            created_at,
        )
    }

    /// Optimistic audio message awaiting confirmation.
    pub fn pending_audio(
        correlation: CorrelationId,
        sender: UserId,
        receiver: UserId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self::pending(
            correlation,
            sender,
            receiver,
            MessageBody::Audio { uri: None },
            created_at,
        )
    }

    fn pending(
        correlation: CorrelationId,
        sender: UserId,
        receiver: UserId,
        body: MessageBody,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::temporary(&correlation),
            sender: Participant::id_only(sender),
            receiver: Participant::id_only(receiver),
            body,
            created_at,
            is_read: false,
            read_at: None,
            reactions: Vec::new(),
            is_temporary: true,
            correlation: Some(correlation),
        }
    }

    /// Message kind.
    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    /// Whether `user` wrote this message.
    pub fn is_from(&self, user: &UserId) -> bool {
        &self.sender.id == user
    }

    /// Whether this message was exchanged between `a` and `b`, in either
    /// direction.
    pub fn is_between(&self, a: &UserId, b: &UserId) -> bool {
        (&self.sender.id == a && &self.receiver.id == b)
            || (&self.sender.id == b && &self.receiver.id == a)
    }

    /// Text content, if this is a text message.
    pub fn text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text { content } => Some(content),
            MessageBody::Audio { .. } => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ChatMessageWire {
    #[serde(rename = "_id")]
    id: MessageId,
    sender: Participant,
    receiver: Participant,
    #[serde(default)]
    content: Option<String>,
    #[serde(rename = "messageType", default = "default_kind")]
    message_type: MessageKind,
    #[serde(rename = "fileUrl", default, skip_serializing_if = "Option::is_none")]
    file_url: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,
    #[serde(rename = "isRead", default)]
    is_read: bool,
    #[serde(rename = "readAt", default, skip_serializing_if = "Option::is_none")]
    read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    reactions: Vec<Reaction>,
    #[serde(rename = "isTemp", default, skip_serializing_if = "std::ops::Not::not")]
    is_temp: bool,
    #[serde(
        rename = "clientMessageId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    client_message_id: Option<CorrelationId>,
}

fn default_kind() -> MessageKind {
    MessageKind::Text
}

impl TryFrom<ChatMessageWire> for ChatMessage {
    type Error = ProtocolError;

    fn try_from(wire: ChatMessageWire) -> Result<Self, Self::Error> {
        if wire.id.as_str().is_empty() {
            return Err(ProtocolError::InvalidMessage("empty message id".into()));
        }
        let body = match wire.message_type {
            MessageKind::Text => MessageBody::Text {
                content: wire.content.ok_or_else(|| {
                    ProtocolError::InvalidMessage(format!(
                        "text message {} without content",
                        wire.id
                    ))
                })?,
            },
            MessageKind::Audio => MessageBody::Audio { uri: wire.file_url },
        };
        Ok(Self {
            is_temporary: wire.is_temp || wire.id.is_temporary(),
            id: wire.id,
            sender: wire.sender,
            receiver: wire.receiver,
            body,
            created_at: wire.created_at,
            is_read: wire.is_read,
            read_at: wire.read_at,
            reactions: wire.reactions,
            correlation: wire.client_message_id,
        })
    }
}

impl From<ChatMessage> for ChatMessageWire {
    fn from(msg: ChatMessage) -> Self {
        let message_type = msg.kind();
        let (content, file_url) = match msg.body {
            MessageBody::Text { content } => (Some(content), None),
            MessageBody::Audio { uri } => (None, uri),
        };
        Self {
            id: msg.id,
            sender: msg.sender,
            receiver: msg.receiver,
            content,
            message_type,
            file_url,
            created_at: msg.created_at,
            is_read: msg.is_read,
            read_at: msg.read_at,
            reactions: msg.reactions,
            is_temp: msg.is_temporary,
            client_message_id: msg.correlation,
        }
    }
}
