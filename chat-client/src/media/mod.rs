//! Media device and peer-connection seams.
//!
//! The session never touches a platform media stack directly. Capture
//! devices sit behind [`MediaDevices`], peer connections behind
//! [`PeerConnector`] and [`PeerConnection`], speakers behind
//! [`AudioOutput`]. [`MediaBackend`] bundles the three for a session.
//! [`LoopbackMedia`] is an in-memory backend that records every device
//! and connection operation, used by the tests and by headless tools.
//!
//! Peer connections report asynchronous happenings (remote tracks,
//! connectivity changes) as [`PeerEvent`]s on the sink handed to
//! [`PeerConnector::connect`]; the session's event loop drains it.

mod loopback;

pub use loopback::{LoopbackMedia, LoopbackStats, OutputCall};

use async_trait::async_trait;
use parley_chat_core::ClipKey;
use parley_chat_types::{CallId, CallKind, SessionDescription};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Media errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    /// The user or platform refused device access.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// No device matches the constraints.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The device exists but could not be started.
    #[error("device error: {0}")]
    Device(String),

    /// Offer/answer negotiation failed.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// The peer connection is closed.
    #[error("peer connection closed")]
    Closed,
}

impl MediaError {
    /// Whether this is an access refusal the user must resolve.
    pub fn is_permission(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

/// Which way the camera faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    /// Front camera.
    User,
    /// Rear camera.
    Environment,
}

/// Microphone settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioConstraints {
    /// Cancel speaker echo.
    pub echo_cancellation: bool,
    /// Suppress background noise.
    pub noise_suppression: bool,
    /// Requested sample rate in Hz, or the device default.
    pub sample_rate: Option<u32>,
}

/// Camera settings. Sizes are ideals, not requirements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoConstraints {
    /// Ideal width in pixels.
    pub width: u32,
    /// Ideal height in pixels.
    pub height: u32,
    /// Camera direction.
    pub facing: FacingMode,
}

/// What to capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConstraints {
    /// Microphone settings.
    pub audio: AudioConstraints,
    /// Camera settings, if video is wanted.
    pub video: Option<VideoConstraints>,
}

impl MediaConstraints {
    /// Tracks for a call of `kind`: microphone, plus a 1280x720 front
    /// camera for video calls.
    pub fn for_call(kind: CallKind) -> Self {
        Self {
            audio: AudioConstraints {
                echo_cancellation: false,
                noise_suppression: false,
                sample_rate: None,
            },
            video: kind.wants_video().then_some(VideoConstraints {
                width: 1280,
                height: 720,
                facing: FacingMode::User,
            }),
        }
    }

    /// Microphone for a voice note: echo cancellation and noise
    /// suppression at 44.1 kHz.
    pub fn voice_note() -> Self {
        Self {
            audio: AudioConstraints {
                echo_cancellation: true,
                noise_suppression: true,
                sample_rate: Some(44_100),
            },
            video: None,
        }
    }
}

/// ICE configuration for peer connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceConfig {
    /// STUN/TURN server URLs.
    pub servers: Vec<String>,
}

impl IceConfig {
    /// Wrap a list of server URLs.
    pub fn new(servers: Vec<String>) -> Self {
        Self { servers }
    }
}

/// A live set of captured or received tracks.
pub trait MediaStream: Send + Sync + std::fmt::Debug {
    /// Stable stream id.
    fn id(&self) -> &str;

    /// Stop every track. Idempotent.
    fn stop(&self);

    /// Whether any track is still live.
    fn is_active(&self) -> bool;
}

/// An open microphone encoding a voice note.
pub trait AudioCapture: Send {
    /// Encoded chunks produced since the last call.
    fn drain(&mut self) -> Vec<Vec<u8>>;

    /// Flush the encoder, release the device and return the final chunks.
    fn finish(&mut self) -> Vec<Vec<u8>>;

    /// Release the device, discarding anything unflushed.
    fn abort(&mut self);
}

/// Capture devices.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open tracks matching `constraints`.
    async fn open(&self, constraints: &MediaConstraints)
        -> Result<Arc<dyn MediaStream>, MediaError>;

    /// Open the microphone and start encoding a voice note.
    async fn record(&self, constraints: &MediaConstraints)
        -> Result<Box<dyn AudioCapture>, MediaError>;
}

/// Connectivity of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceState {
    /// Gathering or checking candidates.
    Checking,
    /// Media path established.
    Connected,
    /// Path lost, may recover.
    Disconnected,
    /// No path could be found.
    Failed,
    /// Closed locally.
    Closed,
}

/// Something a peer connection reports on its own.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Remote tracks arrived.
    RemoteStream(Arc<dyn MediaStream>),
    /// Connectivity changed.
    IceStateChanged(IceState),
}

/// Where a peer connection delivers its events, tagged with its call.
pub type PeerEventSink = mpsc::UnboundedSender<(CallId, PeerEvent)>;

/// Builds peer connections.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Create a connection for `call_id`. Its events go to `events`.
    async fn connect(
        &self,
        call_id: &CallId,
        ice: &IceConfig,
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerConnection>, MediaError>;
}

/// One negotiated media session with the peer.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Send the tracks of `stream`.
    fn add_stream(&mut self, stream: &Arc<dyn MediaStream>) -> Result<(), MediaError>;

    /// Create an offer.
    async fn create_offer(&mut self) -> Result<SessionDescription, MediaError>;

    /// Create an answer to the applied remote offer.
    async fn create_answer(&mut self) -> Result<SessionDescription, MediaError>;

    /// Apply our own description.
    async fn set_local_description(&mut self, desc: SessionDescription)
        -> Result<(), MediaError>;

    /// Apply the peer's description.
    async fn set_remote_description(&mut self, desc: SessionDescription)
        -> Result<(), MediaError>;

    /// Tear the connection down. Idempotent.
    fn close(&mut self);
}

/// Where a clip's audio comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum ClipSource {
    /// Encoded bytes held in memory (the unsent recording).
    Bytes(Vec<u8>),
    /// A stored media reference.
    Url(String),
}

impl std::fmt::Debug for ClipSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bytes(bytes) => write!(f, "Bytes([{} bytes])", bytes.len()),
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
        }
    }
}

/// Speakers. Drives one clip at a time.
///
/// Metadata, position and end-of-clip notifications flow back through
/// the session's player methods.
pub trait AudioOutput: Send + Sync {
    /// Load `source` as `key` and start playing it from the beginning.
    fn start(&self, key: &ClipKey, source: ClipSource) -> Result<(), MediaError>;

    /// Pause the current clip.
    fn pause(&self);

    /// Move the current clip to `seconds`.
    fn seek(&self, seconds: f64);

    /// Stop the current clip and rewind it to 0.
    fn rewind(&self);
}

/// The media collaborators of one session.
#[derive(Clone)]
pub struct MediaBackend {
    /// Capture devices.
    pub devices: Arc<dyn MediaDevices>,
    /// Peer connection factory.
    pub connector: Arc<dyn PeerConnector>,
    /// Speakers.
    pub output: Arc<dyn AudioOutput>,
}

impl MediaBackend {
    /// Every collaborator served by one loopback backend.
    pub fn loopback(media: &LoopbackMedia) -> Self {
        Self {
            devices: Arc::new(media.clone()),
            connector: Arc::new(media.clone()),
            output: Arc::new(media.clone()),
        }
    }
}

impl std::fmt::Debug for MediaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaBackend").finish_non_exhaustive()
    }
}
