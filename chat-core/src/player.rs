//! Single-clip playback state.
//!
//! One player per session. At most one clip is active; playing another key
//! stops and rewinds the current one first. The audio output itself is
//! driven by `chat-client`, which feeds metadata and time updates back in.

use parley_chat_types::MessageId;

/// Which clip is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClipKey {
    /// The unsent recording.
    Preview,
    /// An audio message in the window.
    Message(MessageId),
}

/// Published player state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerSnapshot {
    /// Loaded clip.
    pub active: Option<ClipKey>,
    /// Whether audio is running.
    pub playing: bool,
    /// Playback position in seconds.
    pub current_time: f64,
    /// Clip length in seconds, 0 until known.
    pub duration: f64,
}

/// Playback state machine.
#[derive(Debug, Default)]
pub struct Player {
    state: PlayerSnapshot,
}

impl Player {
    /// Create an idle player.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and start `key`. Returns the previously active key, which the
    /// caller must stop and rewind.
    pub fn play(&mut self, key: ClipKey) -> Option<ClipKey> {
        let previous = self.state.active.take();
        self.state = PlayerSnapshot {
            active: Some(key),
            playing: true,
            current_time: 0.0,
            duration: 0.0,
        };
        previous
    }

    /// Metadata loaded. Non-finite or non-positive durations read as 0.
    pub fn on_metadata(&mut self, duration: f64) {
        self.state.duration = sanitize(duration);
    }

    /// Position update. Invalid positions are ignored.
    pub fn on_time_update(&mut self, current_time: f64) {
        if current_time.is_finite() && current_time >= 0.0 {
            self.state.current_time = current_time;
        }
    }

    /// The clip played to the end.
    pub fn on_ended(&mut self) {
        self.state.playing = false;
        self.state.current_time = 0.0;
    }

    /// Pause without unloading. Returns `false` if nothing was playing.
    pub fn pause(&mut self) -> bool {
        std::mem::replace(&mut self.state.playing, false)
    }

    /// Seek within `key`. Only honoured for the active key; the target is
    /// clamped to `[0, duration]`. Returns the applied position.
    pub fn seek(&mut self, key: &ClipKey, seconds: f64) -> Option<f64> {
        if self.state.active.as_ref() != Some(key) || !seconds.is_finite() {
            return None;
        }
        let target = seconds.clamp(0.0, self.state.duration);
        self.state.current_time = target;
        Some(target)
    }

    /// Seek to a fraction of the clip (a click on the progress bar).
    pub fn seek_fraction(&mut self, key: &ClipKey, fraction: f64) -> Option<f64> {
        let seconds = fraction * self.state.duration;
        self.seek(key, seconds)
    }

    /// Unload everything. Returns the key that was active.
    pub fn stop(&mut self) -> Option<ClipKey> {
        std::mem::take(&mut self.state).active
    }

    /// Whether `key` is the loaded clip.
    pub fn is_active(&self, key: &ClipKey) -> bool {
        self.state.active.as_ref() == Some(key)
    }

    /// Published state.
    pub fn snapshot(&self) -> &PlayerSnapshot {
        &self.state
    }
}

fn sanitize(duration: f64) -> f64 {
    if duration.is_finite() && duration > 0.0 {
        duration
    } else {
        0.0
    }
}

/// Render seconds as `M:SS`. Invalid input renders as `0:00`.
pub fn format_clock(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "0:00".to_string();
    }
    let whole = seconds.floor() as u64;
    format!("{}:{:02}", whole / 60, whole % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str) -> ClipKey {
        ClipKey::Message(MessageId::new(id))
    }

    #[test]
    fn playing_new_key_replaces_current() {
        let mut player = Player::new();
        assert_eq!(player.play(message("m1")), None);
        player.on_metadata(12.0);
        player.on_time_update(4.0);

        let previous = player.play(message("m2"));

        assert_eq!(previous, Some(message("m1")));
        let snapshot = player.snapshot();
        assert_eq!(snapshot.active, Some(message("m2")));
        assert_eq!(snapshot.current_time, 0.0);
        assert_eq!(snapshot.duration, 0.0);
        assert!(snapshot.playing);
    }

    #[test]
    fn invalid_durations_read_as_zero() {
        let mut player = Player::new();
        player.play(ClipKey::Preview);

        player.on_metadata(f64::INFINITY);
        assert_eq!(player.snapshot().duration, 0.0);
        player.on_metadata(f64::NAN);
        assert_eq!(player.snapshot().duration, 0.0);
        player.on_metadata(-3.0);
        assert_eq!(player.snapshot().duration, 0.0);
        player.on_metadata(7.5);
        assert_eq!(player.snapshot().duration, 7.5);
    }

    #[test]
    fn seek_clamps_to_duration() {
        let mut player = Player::new();
        player.play(message("m1"));
        player.on_metadata(10.0);

        assert_eq!(player.seek(&message("m1"), 42.0), Some(10.0));
        assert_eq!(player.seek(&message("m1"), -1.0), Some(0.0));
        assert_eq!(player.seek_fraction(&message("m1"), 0.5), Some(5.0));
    }

    #[test]
    fn seek_on_inactive_key_is_ignored() {
        let mut player = Player::new();
        player.play(message("m1"));
        player.on_metadata(10.0);
        player.on_time_update(3.0);

        assert_eq!(player.seek(&message("m2"), 5.0), None);
        assert_eq!(player.snapshot().current_time, 3.0);
    }

    #[test]
    fn ended_rewinds_and_stops() {
        let mut player = Player::new();
        player.play(ClipKey::Preview);
        player.on_time_update(2.0);
        player.on_ended();

        assert!(!player.snapshot().playing);
        assert_eq!(player.snapshot().current_time, 0.0);
        assert!(player.is_active(&ClipKey::Preview));
    }

    #[test]
    fn stop_unloads() {
        let mut player = Player::new();
        player.play(ClipKey::Preview);

        assert_eq!(player.stop(), Some(ClipKey::Preview));
        assert_eq!(player.snapshot(), &PlayerSnapshot::default());
        assert!(!player.pause());
    }

    #[test]
    fn clock_format() {
        assert_eq!(format_clock(0.0), "0:00");
        assert_eq!(format_clock(7.9), "0:07");
        assert_eq!(format_clock(65.0), "1:05");
        assert_eq!(format_clock(f64::NAN), "0:00");
    }
}
