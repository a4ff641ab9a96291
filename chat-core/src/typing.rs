//! Typing indicators, in both directions.
//!
//! [`TypingSet`] tracks peers typing to us. Each name expires on its own
//! deadline unless refreshed by another `user_typing`.
//!
//! [`TypingNotifier`] tracks our own indicator. Every keystroke emits
//! `typing_start` (refreshing the peer's deadline) and the indicator
//! stops by itself after a quiet period.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parley_chat_types::{OutboundEvent, TypingTarget, UserId};

/// Default quiet period before an indicator lapses.
pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_secs(2);

/// Display names currently typing to the local user.
#[derive(Debug)]
pub struct TypingSet {
    timeout: Duration,
    deadlines: HashMap<String, Instant>,
}

impl TypingSet {
    /// Create an empty set with the given per-name timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadlines: HashMap::new(),
        }
    }

    /// `user_typing` arrived. Adds or refreshes the name.
    pub fn start(&mut self, name: &str, now: Instant) {
        self.deadlines.insert(name.to_string(), now + self.timeout);
    }

    /// `user_stopped_typing` arrived.
    pub fn stop(&mut self, name: &str) -> bool {
        self.deadlines.remove(name).is_some()
    }

    /// Drop every name whose deadline has passed. Returns the dropped names.
    pub fn expire(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &expired {
            self.deadlines.remove(name);
        }
        expired
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Whether `name` is typing.
    pub fn contains(&self, name: &str) -> bool {
        self.deadlines.contains_key(name)
    }

    /// Names currently typing, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.deadlines.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if nobody is typing.
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Forget everyone.
    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}

impl Default for TypingSet {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_TIMEOUT)
    }
}

/// The local user's own typing indicator.
#[derive(Debug)]
pub struct TypingNotifier {
    timeout: Duration,
    active: Option<(UserId, Instant)>,
}

impl TypingNotifier {
    /// Create an idle notifier.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            active: None,
        }
    }

    /// A keystroke in the compose box addressed to `peer`.
    ///
    /// Stops the indicator for a previous peer first.
    pub fn keystroke(&mut self, peer: &UserId, now: Instant) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        if let Some((previous, _)) = &self.active {
            if previous != peer {
                events.extend(self.stop());
            }
        }
        self.active = Some((peer.clone(), now + self.timeout));
        events.push(OutboundEvent::TypingStart(TypingTarget {
            receiver_id: peer.clone(),
        }));
        events
    }

    /// Stop the indicator now (message sent, conversation switched).
    pub fn stop(&mut self) -> Option<OutboundEvent> {
        let (peer, _) = self.active.take()?;
        Some(OutboundEvent::TypingStop(TypingTarget { receiver_id: peer }))
    }

    /// Stop the indicator if the quiet period has elapsed.
    pub fn expire(&mut self, now: Instant) -> Option<OutboundEvent> {
        match &self.active {
            Some((_, deadline)) if *deadline <= now => self.stop(),
            _ => None,
        }
    }

    /// Whether the indicator is on.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }
}

impl Default for TypingNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_lapses_after_inactivity() {
        let mut set = TypingSet::default();
        let t0 = Instant::now();
        set.start("Alice", t0);

        assert!(set.expire(t0 + Duration::from_millis(1500)).is_empty());
        assert!(set.contains("Alice"));

        let expired = set.expire(t0 + Duration::from_millis(2500));
        assert_eq!(expired, vec!["Alice".to_string()]);
        assert!(set.is_empty());
    }

    #[test]
    fn refresh_extends_deadline() {
        let mut set = TypingSet::default();
        let t0 = Instant::now();
        set.start("Alice", t0);
        set.start("Alice", t0 + Duration::from_millis(1500));

        assert!(set.expire(t0 + Duration::from_millis(2500)).is_empty());
        assert_eq!(
            set.next_deadline(),
            Some(t0 + Duration::from_millis(3500))
        );
    }

    #[test]
    fn stop_removes_immediately() {
        let mut set = TypingSet::default();
        set.start("Alice", Instant::now());
        set.start("Bob", Instant::now());

        assert!(set.stop("Alice"));
        assert!(!set.stop("Alice"));
        assert_eq!(set.names(), vec!["Bob".to_string()]);
    }

    #[test]
    fn every_keystroke_emits_start() {
        let mut notifier = TypingNotifier::default();
        let peer = UserId::new("bob");
        let t0 = Instant::now();

        assert_eq!(notifier.keystroke(&peer, t0).len(), 1);
        assert_eq!(notifier.keystroke(&peer, t0).len(), 1);
        assert!(notifier.is_active());
    }

    #[test]
    fn notifier_stops_after_quiet_period() {
        let mut notifier = TypingNotifier::default();
        let peer = UserId::new("bob");
        let t0 = Instant::now();
        notifier.keystroke(&peer, t0);

        assert!(notifier.expire(t0 + Duration::from_secs(1)).is_none());
        assert_eq!(
            notifier.expire(t0 + Duration::from_secs(2)),
            Some(OutboundEvent::TypingStop(TypingTarget { receiver_id: peer }))
        );
        assert!(!notifier.is_active());
    }

    #[test]
    fn switching_peer_stops_previous_indicator() {
        let mut notifier = TypingNotifier::default();
        let t0 = Instant::now();
        notifier.keystroke(&UserId::new("bob"), t0);

        let events = notifier.keystroke(&UserId::new("carol"), t0);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name(), "typing_stop");
        assert_eq!(events[1].name(), "typing_start");
    }

    #[test]
    fn stop_when_idle_emits_nothing() {
        let mut notifier = TypingNotifier::default();
        assert!(notifier.stop().is_none());
    }
}
