//! Call negotiation vocabulary.

use serde::{Deserialize, Serialize};

/// Audio-only or audio+video call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    /// Microphone only.
    Audio,
    /// Microphone and camera.
    Video,
}

impl CallKind {
    /// Whether the call needs a camera track.
    pub fn wants_video(self) -> bool {
        matches!(self, CallKind::Video)
    }
}

/// Which side of the negotiation this client is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallRole {
    /// Sent the offer.
    Caller,
    /// Received the offer.
    Callee,
}

/// Session description type, as used by peer connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Initial offer.
    Offer,
    /// Final answer.
    Answer,
    /// Provisional answer.
    Pranswer,
    /// Roll back to the last stable state.
    Rollback,
}

/// An offer or answer exchanged through the coordination server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer.
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// The SDP body.
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer description.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer description.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}
