//! ChatSession - the main interface for Parley.
//!
//! A session owns one event channel, one conversation window, one call and
//! one voice recorder/player. Nothing is global: two sessions in one
//! process are fully independent.
//!
//! # Architecture
//!
//! ```text
//! Application → ChatSession → Transport (events) → Server
//!                   │       → ConversationApi (history)
//!                   ↓
//!     MessageSynchronizer / CallController / VoiceRecorder
//!                   ↓
//!              chat-core (pure state)
//! ```
//!
//! Inbound frames are decoded at the boundary and dispatched in arrival
//! order. [`ChatSession::run`] drives the channel, peer-connection events
//! and the timers until the channel closes.
//!
//! # Example
//!
//! ```ignore
//! use parley_chat_client::{ChatSession, ClientConfig, MediaBackend, WebSocketTransport};
//!
//! let session = ChatSession::new(config, me, WebSocketTransport::new(), api, media);
//! session.connect(&token).await?;
//! session.select_conversation(peer).await?;
//! session.send_text("hello").await?;
//! session.run().await?;
//! ```

use std::time::{Duration, Instant};

use chrono::Utc;
use parley_chat_core::{
    CallEvent, CallState, ClipKey, Confirmation, DeletionOptions, PlayerSnapshot, TypingNotifier,
    TypingSet,
};
use parley_chat_types::{
    CallId, CallKind, CorrelationId, InboundEvent, MessageId, OutboundEvent, UserId,
};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::MissedTickBehavior;

use crate::api::ConversationApi;
use crate::call::{CallController, CallOutcome};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::media::{ClipSource, IceConfig, MediaBackend, PeerEvent};
use crate::synchronizer::{MessageSynchronizer, WindowSnapshot};
use crate::transport::{Transport, TransportError};
use crate::voice::{VoicePlayer, VoiceRecorder};

/// Call duration and recording clock period.
const CLOCK_PERIOD: Duration = Duration::from_secs(1);

/// How often typing indicators are checked for expiry.
const TYPING_POLL: Duration = Duration::from_millis(250);

/// Capacity of the observer channel.
const EVENT_CAPACITY: usize = 256;

/// Something observers may want to redraw.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The message window changed.
    WindowChanged,
    /// The set of people typing changed.
    TypingChanged(Vec<String>),
    /// Call lifecycle.
    Call(CallEvent),
    /// The recording clock advanced.
    RecordingElapsed(u32),
    /// The player state changed.
    PlayerChanged(PlayerSnapshot),
    /// The server reported an error.
    ServerError(String),
    /// The event channel closed.
    Disconnected,
}

/// One user's connection to the conversation server.
pub struct ChatSession<T: Transport, A: ConversationApi> {
    config: ClientConfig,
    local_user: UserId,
    transport: T,
    synchronizer: MessageSynchronizer<A>,
    calls: Mutex<CallController>,
    peer_events: Mutex<mpsc::UnboundedReceiver<(CallId, PeerEvent)>>,
    typing: Mutex<TypingSet>,
    notifier: Mutex<TypingNotifier>,
    compose: Mutex<String>,
    recorder: Mutex<VoiceRecorder>,
    player: Mutex<VoicePlayer>,
    events: broadcast::Sender<SessionEvent>,
}

impl<T: Transport, A: ConversationApi> ChatSession<T, A> {
    /// Create a session for `local_user`. Nothing is connected yet.
    pub fn new(
        config: ClientConfig,
        local_user: UserId,
        transport: T,
        api: A,
        media: MediaBackend,
    ) -> Self {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let calls = CallController::new(
            media.devices.clone(),
            media.connector,
            IceConfig::new(config.calls.ice_servers.clone()),
            peer_tx,
        );
        let synchronizer = MessageSynchronizer::new(
            api,
            local_user.clone(),
            config.history.page_size,
            config.messages.max_pending_sends,
            config.delete_for_everyone_window(),
        );

        Self {
            typing: Mutex::new(TypingSet::new(config.typing_timeout())),
            notifier: Mutex::new(TypingNotifier::new(config.typing_timeout())),
            compose: Mutex::new(String::new()),
            recorder: Mutex::new(VoiceRecorder::new(media.devices)),
            player: Mutex::new(VoicePlayer::new(media.output)),
            calls: Mutex::new(calls),
            peer_events: Mutex::new(peer_rx),
            synchronizer,
            local_user,
            transport,
            config,
            events,
        }
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // ===========================================
    // Channel
    // ===========================================

    /// Open the event channel with a bearer credential.
    pub async fn connect(&self, token: &str) -> Result<(), ClientError> {
        let endpoint = &self.config.server.event_endpoint;
        self.transport.connect(endpoint, token).await?;
        tracing::info!(user = %self.local_user, %endpoint, "session connected");
        Ok(())
    }

    /// Whether the event channel is open.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Encode and emit one frame.
    async fn emit(&self, event: &OutboundEvent) -> Result<(), ClientError> {
        if !self.transport.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let frame = event.to_json()?;
        self.transport.send(&frame).await?;
        tracing::debug!(event = event.name(), "frame sent");
        Ok(())
    }

    /// Emit a frame nobody waits on. Failures are logged.
    async fn emit_quietly(&self, event: &OutboundEvent) {
        if let Err(e) = self.emit(event).await {
            tracing::debug!(event = event.name(), error = %e, "frame not sent");
        }
    }

    /// Process frames, peer events and timers until the channel closes.
    ///
    /// Returns `Ok(())` on an orderly close. Any pending or active call is
    /// ended either way.
    pub async fn run(&self) -> Result<(), ClientError> {
        let mut clock = tokio::time::interval(CLOCK_PERIOD);
        clock.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut typing_poll = tokio::time::interval(TYPING_POLL);
        typing_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut peer_events = self.peer_events.lock().await;

        loop {
            tokio::select! {
                frame = self.transport.recv() => match frame {
                    Ok(frame) => {
                        if let Err(e) = self.handle_frame(&frame).await {
                            tracing::warn!(error = %e, "failed to handle event");
                        }
                    }
                    Err(e) => {
                        while let Ok((call_id, event)) = peer_events.try_recv() {
                            self.calls.lock().await.on_peer_event(&call_id, event);
                        }
                        self.on_disconnect().await;
                        return match e {
                            TransportError::ConnectionClosed | TransportError::NotConnected => Ok(()),
                            e => Err(e.into()),
                        };
                    }
                },
                Some((call_id, event)) = peer_events.recv() => {
                    self.calls.lock().await.on_peer_event(&call_id, event);
                }
                _ = clock.tick() => {
                    if let Err(e) = self.tick(Instant::now()).await {
                        tracing::warn!(error = %e, "clock tick failed");
                    }
                }
                _ = typing_poll.tick() => {
                    self.expire_typing(Instant::now()).await;
                }
            }
        }
    }

    /// Deliver peer-connection events that are already queued.
    ///
    /// [`ChatSession::run`] does this continuously; callers that drive the
    /// session by hand use it between steps. Returns at once while `run` is
    /// active, since it owns the queue.
    pub async fn pump_peer_events(&self) {
        let Ok(mut peer_events) = self.peer_events.try_lock() else {
            return;
        };
        while let Ok((call_id, event)) = peer_events.try_recv() {
            self.calls.lock().await.on_peer_event(&call_id, event);
        }
    }

    /// The event channel dropped.
    async fn on_disconnect(&self) {
        tracing::info!(user = %self.local_user, "event channel closed");
        let outcome = self.calls.lock().await.transport_lost().await;
        for event in outcome.events {
            self.publish(SessionEvent::Call(event));
        }
        self.notifier.lock().await.stop();
        self.typing.lock().await.clear();
        self.publish(SessionEvent::Disconnected);
    }

    /// Close the session: end any call (telling the peer), discard any
    /// recording, stop playback and close the channel.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        let outcome = self.calls.lock().await.end_call().await;
        if let Err(e) = self.apply(outcome).await {
            tracing::warn!(error = %e, "call teardown incomplete");
        }
        if let Some(stop) = self.notifier.lock().await.stop() {
            self.emit_quietly(&stop).await;
        }
        self.recorder.lock().await.cancel();
        self.player.lock().await.stop();
        self.transport.close().await?;
        tracing::info!(user = %self.local_user, "session closed");
        Ok(())
    }

    // ===========================================
    // Inbound
    // ===========================================

    /// Decode and dispatch one frame. Undecodable frames are dropped.
    pub async fn handle_frame(&self, frame: &str) -> Result<(), ClientError> {
        match InboundEvent::from_json(frame) {
            Ok(event) => self.handle_event(event).await,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable frame");
                Ok(())
            }
        }
    }

    /// Dispatch one decoded event.
    pub async fn handle_event(&self, event: InboundEvent) -> Result<(), ClientError> {
        tracing::debug!(event = event.name(), "frame received");

        if let Some(signal) = event.call_signal() {
            let outcome = self.calls.lock().await.handle_signal(signal).await;
            return self.apply(outcome).await;
        }

        let changed = match event {
            InboundEvent::NewMessage(envelope) => {
                self.synchronizer.on_remote_message(envelope.message).await
            }
            InboundEvent::MessageSent(confirmation) => {
                self.synchronizer.on_message_confirmed(confirmation).await
                    != Confirmation::Ignored
            }
            InboundEvent::UserTyping(notice) => {
                let mut typing = self.typing.lock().await;
                typing.start(&notice.user_name, Instant::now());
                self.publish(SessionEvent::TypingChanged(typing.names()));
                false
            }
            InboundEvent::UserStoppedTyping(notice) => {
                let mut typing = self.typing.lock().await;
                if typing.stop(&notice.user_name) {
                    self.publish(SessionEvent::TypingChanged(typing.names()));
                }
                false
            }
            InboundEvent::ReactionAdded(added) => self.synchronizer.on_reaction_added(added).await,
            InboundEvent::ReactionRemoved(removed) => {
                self.synchronizer.on_reaction_removed(removed).await
            }
            InboundEvent::MessageRead(receipt) => self.synchronizer.on_message_read(receipt).await,
            InboundEvent::MessageDeleted(deleted) => {
                self.synchronizer.on_message_deleted(deleted).await
            }
            InboundEvent::Error(error) => {
                tracing::error!(message = %error.message, "server reported an error");
                self.publish(SessionEvent::ServerError(error.message));
                false
            }
            other => {
                tracing::debug!(event = other.name(), "event not handled");
                false
            }
        };

        if changed {
            self.window_changed().await?;
        }
        Ok(())
    }

    /// Publish a window change and announce newly visible unread messages.
    async fn window_changed(&self) -> Result<(), ClientError> {
        self.publish(SessionEvent::WindowChanged);
        for read in self.synchronizer.unacknowledged_reads().await {
            self.emit(&read).await?;
        }
        Ok(())
    }

    // ===========================================
    // Timers
    // ===========================================

    /// One clock period elapsed: advance the call duration and the
    /// recording counter.
    pub async fn tick(&self, now: Instant) -> Result<(), ClientError> {
        let outcome = self.calls.lock().await.tick(now).await;
        self.apply(outcome).await?;

        if let Some(elapsed) = self.recorder.lock().await.tick() {
            self.publish(SessionEvent::RecordingElapsed(elapsed));
        }
        Ok(())
    }

    /// Drop typing indicators whose quiet period has passed, on both sides.
    /// Returns the names removed.
    pub async fn expire_typing(&self, now: Instant) -> Vec<String> {
        let expired = {
            let mut typing = self.typing.lock().await;
            let expired = typing.expire(now);
            if !expired.is_empty() {
                self.publish(SessionEvent::TypingChanged(typing.names()));
            }
            expired
        };

        let stop = self.notifier.lock().await.expire(now);
        if let Some(stop) = stop {
            self.emit_quietly(&stop).await;
        }
        expired
    }

    /// Current compose box contents.
    pub async fn compose_text(&self) -> String {
        self.compose.lock().await.clone()
    }

    /// Names currently typing.
    pub async fn typing_users(&self) -> Vec<String> {
        self.typing.lock().await.names()
    }

    // ===========================================
    // Conversation
    // ===========================================

    /// Switch to `peer` and load its newest page.
    ///
    /// Typing indicators, playback and any recording belong to the old
    /// conversation and are dropped.
    pub async fn select_conversation(&self, peer: UserId) -> Result<bool, ClientError> {
        self.typing.lock().await.clear();
        if let Some(stop) = self.notifier.lock().await.stop() {
            self.emit_quietly(&stop).await;
        }
        self.player.lock().await.stop();
        self.recorder.lock().await.cancel();

        let applied = self.synchronizer.select_conversation(peer).await?;
        if applied {
            self.window_changed().await?;
        }
        Ok(applied)
    }

    /// Load the page before the cursor.
    pub async fn load_older_messages(&self) -> Result<usize, ClientError> {
        let added = self.synchronizer.load_older_messages().await?;
        if added > 0 {
            self.window_changed().await?;
        }
        Ok(added)
    }

    /// The compose box changed.
    pub async fn on_compose_input(&self, text: &str) -> Result<(), ClientError> {
        *self.compose.lock().await = text.to_string();
        let Some(peer) = self.synchronizer.peer().await else {
            return Ok(());
        };
        if text.trim().is_empty() {
            return self.stop_typing().await;
        }
        let frames = self.notifier.lock().await.keystroke(&peer, Instant::now());
        for frame in &frames {
            self.emit(frame).await?;
        }
        Ok(())
    }

    async fn stop_typing(&self) -> Result<(), ClientError> {
        let stop = self.notifier.lock().await.stop();
        if let Some(stop) = stop {
            self.emit(&stop).await?;
        }
        Ok(())
    }

    /// Send a text message.
    ///
    /// Returns the correlation token, or `None` for blank content. The
    /// optimistic entry is withdrawn if the frame cannot be sent.
    pub async fn send_text(&self, content: &str) -> Result<Option<CorrelationId>, ClientError> {
        if self.synchronizer.peer().await.is_none() {
            return Err(ClientError::NoConversation);
        }
        let Some(staged) = self.synchronizer.stage_text(content, Utc::now()).await? else {
            return Ok(None);
        };
        self.publish(SessionEvent::WindowChanged);

        if let Err(e) = self.emit(&staged.event).await {
            self.synchronizer.abandon(&staged.token).await;
            self.publish(SessionEvent::WindowChanged);
            return Err(e);
        }
        self.compose.lock().await.clear();
        // The message is out; typing_stop is best effort.
        let stop = self.notifier.lock().await.stop();
        if let Some(stop) = stop {
            self.emit_quietly(&stop).await;
        }
        Ok(Some(staged.token))
    }

    /// Send the finished voice note.
    ///
    /// The clip is kept for another attempt if staging or sending fails.
    pub async fn send_recorded_audio(&self) -> Result<CorrelationId, ClientError> {
        if self.synchronizer.peer().await.is_none() {
            return Err(ClientError::NoConversation);
        }
        let clip = self.recorder.lock().await.take_clip()?;

        let staged = match self.synchronizer.stage_audio(&clip, Utc::now()).await {
            Ok(Some(staged)) => staged,
            Ok(None) => {
                self.recorder.lock().await.restore_clip(clip);
                return Err(ClientError::NoConversation);
            }
            Err(e) => {
                self.recorder.lock().await.restore_clip(clip);
                return Err(e);
            }
        };
        self.publish(SessionEvent::WindowChanged);

        if let Err(e) = self.emit(&staged.event).await {
            self.synchronizer.abandon(&staged.token).await;
            self.recorder.lock().await.restore_clip(clip);
            self.publish(SessionEvent::WindowChanged);
            return Err(e);
        }

        let mut player = self.player.lock().await;
        if player.snapshot().active == Some(ClipKey::Preview) {
            player.stop();
        }
        Ok(staged.token)
    }

    /// Toggle the local user's `emoji` on message `id`.
    pub async fn toggle_reaction(&self, id: &MessageId, emoji: &str) -> Result<(), ClientError> {
        self.synchronizer.toggle_reaction(id, emoji).await?;
        self.publish(SessionEvent::WindowChanged);
        Ok(())
    }

    /// Which deletions message `id` offers right now.
    pub async fn deletion_options(&self, id: &MessageId) -> Option<DeletionOptions> {
        self.synchronizer.deletion_options(id, Utc::now()).await
    }

    /// Delete message `id` for the local user, or for both participants.
    pub async fn delete_message(&self, id: &MessageId, for_everyone: bool) -> Result<(), ClientError> {
        self.synchronizer
            .delete_message(id, for_everyone, Utc::now())
            .await?;
        self.publish(SessionEvent::WindowChanged);
        Ok(())
    }

    /// Copy of the message window.
    pub async fn window(&self) -> WindowSnapshot {
        self.synchronizer.snapshot().await
    }

    /// Take the one-shot "scroll to latest" flag.
    pub async fn take_scroll_to_latest(&self) -> bool {
        self.synchronizer.take_scroll_to_latest().await
    }

    // ===========================================
    // Calls
    // ===========================================

    /// Deliver a call outcome: frames first, then observer events.
    async fn apply(&self, outcome: CallOutcome) -> Result<(), ClientError> {
        let mut sent = Ok(());
        for frame in &outcome.frames {
            if let Err(e) = self.emit(frame).await {
                tracing::warn!(event = frame.name(), error = %e, "call frame not sent");
                sent = Err(e);
                break;
            }
        }
        for event in outcome.events {
            self.publish(SessionEvent::Call(event));
        }
        match outcome.failure {
            Some(failure) => Err(failure.into()),
            None => sent,
        }
    }

    /// Call `peer`. Refused unless idle and connected.
    pub async fn start_call(&self, peer: UserId, kind: CallKind) -> Result<(), ClientError> {
        if !self.transport.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let outcome = self.calls.lock().await.start_call(peer, kind).await?;
        self.apply(outcome).await
    }

    /// Accept the ringing call.
    pub async fn answer_call(&self) -> Result<(), ClientError> {
        let outcome = self.calls.lock().await.answer().await;
        self.apply(outcome).await
    }

    /// Decline the ringing call.
    pub async fn reject_call(&self) -> Result<(), ClientError> {
        let outcome = self.calls.lock().await.reject().await;
        self.apply(outcome).await
    }

    /// Hang up. Does nothing when idle.
    pub async fn end_call(&self) -> Result<(), ClientError> {
        let outcome = self.calls.lock().await.end_call().await;
        self.apply(outcome).await
    }

    /// Copy of the call state.
    pub async fn call_state(&self) -> CallState {
        self.calls.lock().await.state().clone()
    }

    /// Whether the call has a local and a remote stream attached.
    pub async fn call_media(&self) -> (bool, bool) {
        let calls = self.calls.lock().await;
        (calls.local_stream().is_some(), calls.remote_stream().is_some())
    }

    // ===========================================
    // Voice notes
    // ===========================================

    /// Start recording a voice note. `Ok(false)` if already recording.
    pub async fn start_recording(&self) -> Result<bool, ClientError> {
        Ok(self.recorder.lock().await.start().await?)
    }

    /// Finish the recording. Returns its length in seconds.
    pub async fn stop_recording(&self) -> Result<u32, ClientError> {
        let mut recorder = self.recorder.lock().await;
        let clip = recorder.stop()?;
        Ok(clip.duration_secs())
    }

    /// Discard the recording or the finished clip.
    pub async fn cancel_recording(&self) {
        let mut player = self.player.lock().await;
        if player.snapshot().active == Some(ClipKey::Preview) {
            player.stop();
        }
        self.recorder.lock().await.cancel();
    }

    /// Whether a recording is running.
    pub async fn is_recording(&self) -> bool {
        self.recorder.lock().await.is_recording()
    }

    /// Play the finished clip before sending it.
    pub async fn play_preview(&self) -> Result<(), ClientError> {
        let bytes = {
            let recorder = self.recorder.lock().await;
            match recorder.clip() {
                Some(clip) => clip.bytes().to_vec(),
                None => return Ok(()),
            }
        };
        self.play_clip(ClipKey::Preview, ClipSource::Bytes(bytes))
            .await
    }

    /// Play a clip, stopping whatever else is playing.
    pub async fn play_clip(&self, key: ClipKey, source: ClipSource) -> Result<(), ClientError> {
        let mut player = self.player.lock().await;
        let result = player.play(key, source);
        self.publish(SessionEvent::PlayerChanged(player.snapshot()));
        Ok(result?)
    }

    /// Pause playback.
    pub async fn pause_playback(&self) {
        let mut player = self.player.lock().await;
        player.pause();
        self.publish(SessionEvent::PlayerChanged(player.snapshot()));
    }

    /// Seek within `key`, if it is the loaded clip.
    pub async fn seek_playback(&self, key: &ClipKey, seconds: f64) {
        let mut player = self.player.lock().await;
        player.seek(key, seconds);
        self.publish(SessionEvent::PlayerChanged(player.snapshot()));
    }

    /// The speakers learned the clip's length.
    pub async fn on_playback_metadata(&self, duration: f64) {
        let mut player = self.player.lock().await;
        player.on_metadata(duration);
        self.publish(SessionEvent::PlayerChanged(player.snapshot()));
    }

    /// The speakers reported a new position.
    pub async fn on_playback_progress(&self, current_time: f64) {
        let mut player = self.player.lock().await;
        player.on_time_update(current_time);
        self.publish(SessionEvent::PlayerChanged(player.snapshot()));
    }

    /// The clip played to the end.
    pub async fn on_playback_ended(&self) {
        let mut player = self.player.lock().await;
        player.on_ended();
        self.publish(SessionEvent::PlayerChanged(player.snapshot()));
    }

    /// Copy of the player state.
    pub async fn player(&self) -> PlayerSnapshot {
        self.player.lock().await.snapshot()
    }

    // ===========================================
    // Accessors
    // ===========================================

    /// The signed-in user.
    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    /// The session configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Get a reference to the underlying transport (for testing).
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: Transport, A: ConversationApi> std::fmt::Debug for ChatSession<T, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("local_user", &self.local_user)
            .field("connected", &self.transport.is_connected())
            .finish_non_exhaustive()
    }
}
