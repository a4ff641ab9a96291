//! Voice recording buffer.
//!
//! Holds the encoded chunks of one recording and the elapsed-seconds
//! counter. Device access lives in `chat-client`; this module only decides
//! what the chunks become.

use base64::Engine;

/// Container format of finished clips.
pub const AUDIO_MIME_TYPE: &str = "audio/webm";

/// Error type for recording operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingError {
    /// There is no finished clip to send.
    NoClip,
    /// The operation needs an active recording.
    NotRecording,
}

impl std::fmt::Display for RecordingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingError::NoClip => write!(f, "no finished recording"),
            RecordingError::NotRecording => write!(f, "not recording"),
        }
    }
}

impl std::error::Error for RecordingError {}

/// A finished recording.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioClip {
    bytes: Vec<u8>,
    duration_secs: u32,
}

impl AudioClip {
    /// Wrap encoded audio.
    pub fn new(bytes: Vec<u8>, duration_secs: u32) -> Self {
        Self {
            bytes,
            duration_secs,
        }
    }

    /// Encoded bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Recorded length, from the elapsed counter.
    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }

    /// MIME type of the bytes.
    pub fn mime_type(&self) -> &'static str {
        AUDIO_MIME_TYPE
    }

    /// Standard base64, as carried in `audioBlob`.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }
}

impl std::fmt::Debug for AudioClip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioClip")
            .field("bytes", &format!("[{} bytes REDACTED]", self.bytes.len()))
            .field("duration_secs", &self.duration_secs)
            .finish()
    }
}

#[derive(Debug, Default)]
enum Stage {
    #[default]
    Idle,
    Recording {
        chunks: Vec<Vec<u8>>,
        elapsed_secs: u32,
    },
    Finished(AudioClip),
}

/// Chunks and clock of the current recording.
///
/// `Idle → Recording → Finished → Idle`, with `cancel` returning to `Idle`
/// from anywhere.
#[derive(Debug, Default)]
pub struct RecordingBuffer {
    stage: Stage,
}

impl RecordingBuffer {
    /// Create an idle buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a recording. Returns `false` if one is already running.
    ///
    /// A finished but unsent clip is discarded.
    pub fn start(&mut self) -> bool {
        if self.is_recording() {
            return false;
        }
        self.stage = Stage::Recording {
            chunks: Vec::new(),
            elapsed_secs: 0,
        };
        true
    }

    /// Append an encoded chunk. Ignored unless recording.
    pub fn push_chunk(&mut self, chunk: Vec<u8>) {
        if let Stage::Recording { chunks, .. } = &mut self.stage {
            if !chunk.is_empty() {
                chunks.push(chunk);
            }
        }
    }

    /// One second of recording elapsed. Returns the new count.
    pub fn tick(&mut self) -> Option<u32> {
        match &mut self.stage {
            Stage::Recording { elapsed_secs, .. } => {
                *elapsed_secs += 1;
                Some(*elapsed_secs)
            }
            _ => None,
        }
    }

    /// Finalize the chunks into one clip.
    pub fn stop(&mut self) -> Result<&AudioClip, RecordingError> {
        if !self.is_recording() {
            return Err(RecordingError::NotRecording);
        }
        if let Stage::Recording {
            chunks,
            elapsed_secs,
        } = std::mem::take(&mut self.stage)
        {
            self.stage = Stage::Finished(AudioClip::new(chunks.concat(), elapsed_secs));
        }
        self.clip().ok_or(RecordingError::NoClip)
    }

    /// Discard everything.
    pub fn cancel(&mut self) {
        self.stage = Stage::Idle;
    }

    /// The finished clip, if any.
    pub fn clip(&self) -> Option<&AudioClip> {
        match &self.stage {
            Stage::Finished(clip) => Some(clip),
            _ => None,
        }
    }

    /// Take the finished clip for sending, leaving the buffer idle.
    pub fn take_clip(&mut self) -> Result<AudioClip, RecordingError> {
        match std::mem::take(&mut self.stage) {
            Stage::Finished(clip) => Ok(clip),
            other => {
                self.stage = other;
                Err(RecordingError::NoClip)
            }
        }
    }

    /// Put a clip back after a failed send.
    pub fn restore_clip(&mut self, clip: AudioClip) {
        if matches!(self.stage, Stage::Idle) {
            self.stage = Stage::Finished(clip);
        }
    }

    /// Whether a recording is running.
    pub fn is_recording(&self) -> bool {
        matches!(self.stage, Stage::Recording { .. })
    }

    /// Seconds recorded so far, or the finished clip's length.
    pub fn elapsed_secs(&self) -> u32 {
        match &self.stage {
            Stage::Idle => 0,
            Stage::Recording { elapsed_secs, .. } => *elapsed_secs,
            Stage::Finished(clip) => clip.duration_secs,
        }
    }
}
