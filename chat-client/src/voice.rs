//! Voice-note recording and clip playback.
//!
//! [`VoiceRecorder`] pairs the core [`RecordingBuffer`] with an open
//! microphone; [`VoicePlayer`] pairs the core [`Player`] with the speakers.
//! Both are owned by one session.

use std::sync::Arc;

use parley_chat_core::{
    AudioClip, ClipKey, Player, PlayerSnapshot, RecordingBuffer, RecordingError,
};

use crate::media::{
    AudioCapture, AudioOutput, ClipSource, MediaConstraints, MediaDevices, MediaError,
};

/// Records one voice note at a time.
pub struct VoiceRecorder {
    devices: Arc<dyn MediaDevices>,
    buffer: RecordingBuffer,
    capture: Option<Box<dyn AudioCapture>>,
}

impl VoiceRecorder {
    /// Create an idle recorder.
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            buffer: RecordingBuffer::new(),
            capture: None,
        }
    }

    /// Open the microphone and start recording.
    ///
    /// Returns `Ok(false)` if a recording is already running. On a device
    /// error nothing is started.
    pub async fn start(&mut self) -> Result<bool, MediaError> {
        if self.buffer.is_recording() {
            return Ok(false);
        }
        let capture = self.devices.record(&MediaConstraints::voice_note()).await?;
        self.capture = Some(capture);
        self.buffer.start();
        tracing::debug!("voice note recording started");
        Ok(true)
    }

    /// One second elapsed. Collects pending chunks and returns the new
    /// elapsed count while recording.
    pub fn tick(&mut self) -> Option<u32> {
        if let Some(capture) = self.capture.as_mut() {
            for chunk in capture.drain() {
                self.buffer.push_chunk(chunk);
            }
        }
        self.buffer.tick()
    }

    /// Stop recording and finalize the clip. Releases the microphone.
    pub fn stop(&mut self) -> Result<&AudioClip, RecordingError> {
        if !self.buffer.is_recording() {
            return Err(RecordingError::NotRecording);
        }
        if let Some(mut capture) = self.capture.take() {
            for chunk in capture.finish() {
                self.buffer.push_chunk(chunk);
            }
        }
        let clip = self.buffer.stop()?;
        tracing::debug!(
            duration_secs = clip.duration_secs(),
            bytes = clip.bytes().len(),
            "voice note finished"
        );
        Ok(clip)
    }

    /// Discard the recording or the finished clip. Releases the microphone.
    pub fn cancel(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.abort();
        }
        self.buffer.cancel();
    }

    /// The finished clip, if any.
    pub fn clip(&self) -> Option<&AudioClip> {
        self.buffer.clip()
    }

    /// Take the finished clip for sending.
    pub fn take_clip(&mut self) -> Result<AudioClip, RecordingError> {
        self.buffer.take_clip()
    }

    /// Put a clip back after a failed send.
    pub fn restore_clip(&mut self, clip: AudioClip) {
        self.buffer.restore_clip(clip);
    }

    /// Whether a recording is running.
    pub fn is_recording(&self) -> bool {
        self.buffer.is_recording()
    }

    /// Seconds recorded so far.
    pub fn elapsed_secs(&self) -> u32 {
        self.buffer.elapsed_secs()
    }
}

impl std::fmt::Debug for VoiceRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceRecorder")
            .field("recording", &self.is_recording())
            .field("elapsed_secs", &self.elapsed_secs())
            .finish()
    }
}

/// Plays one clip at a time.
pub struct VoicePlayer {
    output: Arc<dyn AudioOutput>,
    player: Player,
}

impl VoicePlayer {
    /// Create an idle player.
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        Self {
            output,
            player: Player::new(),
        }
    }

    /// Play `key` from the start, stopping and rewinding the current clip.
    pub fn play(&mut self, key: ClipKey, source: ClipSource) -> Result<(), MediaError> {
        if self.player.play(key.clone()).is_some() {
            self.output.rewind();
        }
        if let Err(e) = self.output.start(&key, source) {
            tracing::warn!(error = %e, "clip playback failed");
            self.player.stop();
            return Err(e);
        }
        Ok(())
    }

    /// Pause the current clip.
    pub fn pause(&mut self) {
        if self.player.pause() {
            self.output.pause();
        }
    }

    /// Seek within `key`. Ignored unless `key` is the loaded clip.
    pub fn seek(&mut self, key: &ClipKey, seconds: f64) {
        if let Some(target) = self.player.seek(key, seconds) {
            self.output.seek(target);
        }
    }

    /// Seek to a fraction of `key`'s length.
    pub fn seek_fraction(&mut self, key: &ClipKey, fraction: f64) {
        if let Some(target) = self.player.seek_fraction(key, fraction) {
            self.output.seek(target);
        }
    }

    /// Stop and unload whatever is playing.
    pub fn stop(&mut self) {
        if self.player.stop().is_some() {
            self.output.rewind();
        }
    }

    /// The speakers learned the clip's length.
    pub fn on_metadata(&mut self, duration: f64) {
        self.player.on_metadata(duration);
    }

    /// The speakers reported a new position.
    pub fn on_time_update(&mut self, current_time: f64) {
        self.player.on_time_update(current_time);
    }

    /// The clip played to the end.
    pub fn on_ended(&mut self) {
        self.player.on_ended();
    }

    /// Published player state.
    pub fn snapshot(&self) -> PlayerSnapshot {
        self.player.snapshot().clone()
    }
}

impl std::fmt::Debug for VoicePlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoicePlayer")
            .field("state", self.player.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{LoopbackMedia, OutputCall};
    use parley_chat_types::MessageId;

    fn recorder(media: &LoopbackMedia) -> VoiceRecorder {
        VoiceRecorder::new(Arc::new(media.clone()))
    }

    fn player(media: &LoopbackMedia) -> VoicePlayer {
        VoicePlayer::new(Arc::new(media.clone()))
    }

    // ===== Recording =====

    #[tokio::test]
    async fn record_collects_chunks_into_one_clip() {
        let media = LoopbackMedia::new();
        let mut rec = recorder(&media);

        assert!(rec.start().await.unwrap());
        assert_eq!(media.last_constraints(), Some(MediaConstraints::voice_note()));

        media.push_mic_chunk(vec![1, 2]);
        assert_eq!(rec.tick(), Some(1));
        media.push_mic_chunk(vec![3]);
        assert_eq!(rec.tick(), Some(2));
        media.push_mic_chunk(vec![4]);

        let clip = rec.stop().unwrap();
        assert_eq!(clip.bytes(), &[1, 2, 3, 4]);
        assert_eq!(clip.duration_secs(), 2);
        assert_eq!(media.stats().recordings_released(), 1);
    }

    #[tokio::test]
    async fn start_while_recording_is_noop() {
        let media = LoopbackMedia::new();
        let mut rec = recorder(&media);

        assert!(rec.start().await.unwrap());
        assert!(!rec.start().await.unwrap());
        assert_eq!(media.stats().recordings_opened(), 1);
    }

    #[tokio::test]
    async fn permission_denied_leaves_nothing_started() {
        let media = LoopbackMedia::new();
        media.fail_next_record(MediaError::PermissionDenied("microphone".into()));
        let mut rec = recorder(&media);

        let err = rec.start().await.unwrap_err();
        assert!(err.is_permission());
        assert!(!rec.is_recording());
        assert_eq!(rec.tick(), None);
        assert!(matches!(rec.stop(), Err(RecordingError::NotRecording)));
    }

    #[tokio::test]
    async fn cancel_discards_and_releases() {
        let media = LoopbackMedia::new();
        let mut rec = recorder(&media);

        rec.start().await.unwrap();
        media.push_mic_chunk(vec![9]);
        rec.tick();
        rec.cancel();

        assert!(!rec.is_recording());
        assert_eq!(rec.elapsed_secs(), 0);
        assert!(rec.clip().is_none());
        assert_eq!(media.stats().recordings_released(), 1);
    }

    #[tokio::test]
    async fn take_and_restore_clip() {
        let media = LoopbackMedia::new();
        let mut rec = recorder(&media);

        rec.start().await.unwrap();
        media.push_mic_chunk(vec![5]);
        rec.stop().unwrap();

        let clip = rec.take_clip().unwrap();
        assert!(rec.clip().is_none());
        rec.restore_clip(clip);
        assert_eq!(rec.clip().unwrap().bytes(), &[5]);
    }

    // ===== Playback =====

    #[test]
    fn playing_another_clip_rewinds_the_current_one() {
        let media = LoopbackMedia::new();
        let mut player = player(&media);
        let first = ClipKey::Message(MessageId::new("m1"));
        let second = ClipKey::Message(MessageId::new("m2"));

        player
            .play(first.clone(), ClipSource::Url("/uploads/m1.webm".into()))
            .unwrap();
        player
            .play(second.clone(), ClipSource::Url("/uploads/m2.webm".into()))
            .unwrap();

        assert_eq!(
            media.output_calls(),
            vec![
                OutputCall::Start(first),
                OutputCall::Rewind,
                OutputCall::Start(second.clone()),
            ]
        );
        assert_eq!(player.snapshot().active, Some(second));
    }

    #[test]
    fn seek_targets_only_the_active_clip() {
        let media = LoopbackMedia::new();
        let mut player = player(&media);
        let key = ClipKey::Message(MessageId::new("m1"));

        player.play(key.clone(), ClipSource::Bytes(vec![0; 4])).unwrap();
        player.on_metadata(8.0);
        player.seek(&ClipKey::Preview, 3.0);
        player.seek_fraction(&key, 0.25);

        assert_eq!(media.output_calls().last(), Some(&OutputCall::Seek(2.0)));
        assert_eq!(player.snapshot().current_time, 2.0);
    }

    #[test]
    fn failed_start_unloads() {
        let media = LoopbackMedia::new();
        media.fail_next_playback(MediaError::Device("no output".into()));
        let mut player = player(&media);

        assert!(player
            .play(ClipKey::Preview, ClipSource::Bytes(vec![1]))
            .is_err());
        assert_eq!(player.snapshot(), PlayerSnapshot::default());
    }

    #[test]
    fn pause_and_stop_reach_the_speakers_once() {
        let media = LoopbackMedia::new();
        let mut player = player(&media);

        player.pause();
        player.stop();
        assert!(media.output_calls().is_empty());

        player.play(ClipKey::Preview, ClipSource::Bytes(vec![1])).unwrap();
        player.pause();
        player.pause();
        player.stop();

        assert_eq!(
            media.output_calls(),
            vec![
                OutputCall::Start(ClipKey::Preview),
                OutputCall::Pause,
                OutputCall::Rewind,
            ]
        );
    }
}
