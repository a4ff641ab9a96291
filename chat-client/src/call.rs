//! Call controller.
//!
//! Drives the pure [`CallState`] machine and executes its actions against
//! the media backend. Every input goes through [`CallController::dispatch`],
//! which reads the state current at that moment, so handlers never act on
//! a stale snapshot.
//!
//! The controller does not own the event channel. Frames the machine wants
//! sent and events it wants published are collected into a [`CallOutcome`]
//! for the session to deliver, after all media work for the input is done.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parley_chat_core::{CallAction, CallEvent, CallInput, CallState};
use parley_chat_types::{CallId, CallKind, CallSignal, OutboundEvent, SessionDescription, UserId};

use crate::error::ClientError;
use crate::media::{
    IceConfig, IceState, MediaConstraints, MediaDevices, MediaError, MediaStream, PeerConnection,
    PeerConnector, PeerEvent, PeerEventSink,
};

/// What one dispatch produced.
#[derive(Debug, Default)]
pub struct CallOutcome {
    /// Frames to emit, in order.
    pub frames: Vec<OutboundEvent>,
    /// Events to publish, in order.
    pub events: Vec<CallEvent>,
    /// Device or negotiation failure that aborted a step.
    pub failure: Option<MediaError>,
}

/// Media handles owned by the current call.
#[derive(Default)]
struct CallMedia {
    local: Option<Arc<dyn MediaStream>>,
    connection: Option<Box<dyn PeerConnection>>,
    remote: Option<Arc<dyn MediaStream>>,
}

impl CallMedia {
    /// Stop local tracks, close the connection, stop remote tracks.
    fn release(&mut self) {
        if let Some(local) = self.local.take() {
            local.stop();
        }
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
        if let Some(remote) = self.remote.take() {
            remote.stop();
        }
    }
}

/// Owns the call state and its media.
pub struct CallController {
    devices: Arc<dyn MediaDevices>,
    connector: Arc<dyn PeerConnector>,
    ice: IceConfig,
    peer_events: PeerEventSink,
    state: CallState,
    media: CallMedia,
    timer_armed: bool,
}

impl CallController {
    /// Create an idle controller. Peer connections report to `peer_events`.
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        connector: Arc<dyn PeerConnector>,
        ice: IceConfig,
        peer_events: PeerEventSink,
    ) -> Self {
        Self {
            devices,
            connector,
            ice,
            peer_events,
            state: CallState::new(),
            media: CallMedia::default(),
            timer_armed: false,
        }
    }

    /// Place a call. Refused without any change unless idle.
    pub async fn start_call(
        &mut self,
        peer: UserId,
        kind: CallKind,
    ) -> Result<CallOutcome, ClientError> {
        if !self.state.is_idle() {
            return Err(ClientError::CallInProgress);
        }
        let call_id = CallId::generate();
        tracing::info!(%peer, %call_id, ?kind, "placing call");
        Ok(self
            .dispatch(CallInput::Dial {
                peer,
                kind,
                call_id,
            })
            .await)
    }

    /// Accept the ringing call.
    pub async fn answer(&mut self) -> CallOutcome {
        self.dispatch(CallInput::AnswerRequested).await
    }

    /// Decline the ringing call.
    pub async fn reject(&mut self) -> CallOutcome {
        self.dispatch(CallInput::Reject).await
    }

    /// Hang up. Does nothing when idle.
    pub async fn end_call(&mut self) -> CallOutcome {
        self.dispatch(CallInput::Hangup).await
    }

    /// The event channel dropped.
    pub async fn transport_lost(&mut self) -> CallOutcome {
        self.dispatch(CallInput::TransportLost).await
    }

    /// One second elapsed.
    pub async fn tick(&mut self, now: Instant) -> CallOutcome {
        if !self.timer_armed {
            return CallOutcome::default();
        }
        self.dispatch(CallInput::Tick { now }).await
    }

    /// A call-related event arrived from the server.
    pub async fn handle_signal(&mut self, signal: CallSignal) -> CallOutcome {
        let input = match signal {
            CallSignal::Incoming { kind, call } => CallInput::IncomingOffer {
                caller: call.caller_id,
                call_id: call.call_id,
                kind,
                offer: call.offer,
            },
            CallSignal::Answered { kind, answered } => CallInput::AnswerReceived {
                call_id: answered.call_id,
                kind,
                answer: answered.answer,
            },
            CallSignal::Rejected(call_id) => CallInput::RemoteRejected { call_id },
            CallSignal::Ended(call_id) => CallInput::RemoteEnded { call_id },
            CallSignal::Missed(call_id) => CallInput::Missed { call_id },
            CallSignal::Disconnected(call_id) => CallInput::Disconnected { call_id },
        };
        self.dispatch(input).await
    }

    /// A peer connection reported something.
    pub fn on_peer_event(&mut self, call_id: &CallId, event: PeerEvent) {
        if self.state.call_id() != Some(call_id) {
            tracing::debug!(%call_id, "discarding peer event for a finished call");
            if let PeerEvent::RemoteStream(stream) = event {
                stream.stop();
            }
            return;
        }
        match event {
            PeerEvent::RemoteStream(stream) => {
                tracing::debug!(%call_id, stream = stream.id(), "remote stream attached");
                if let Some(previous) = self.media.remote.replace(stream) {
                    previous.stop();
                }
            }
            PeerEvent::IceStateChanged(state @ (IceState::Failed | IceState::Disconnected)) => {
                tracing::warn!(%call_id, ?state, "peer connectivity degraded");
            }
            PeerEvent::IceStateChanged(state) => {
                tracing::debug!(%call_id, ?state, "peer connectivity changed");
            }
        }
    }

    /// Feed one input through the machine and execute everything it asks
    /// for, including inputs produced by the media steps themselves.
    pub async fn dispatch(&mut self, input: CallInput) -> CallOutcome {
        let mut outcome = CallOutcome::default();
        let mut queue = VecDeque::from([input]);

        while let Some(input) = queue.pop_front() {
            let label = input_label(&input);
            let (next, actions) = std::mem::take(&mut self.state).on_event(input);
            self.state = next;
            if actions.is_empty() {
                tracing::debug!(input = label, "call input ignored in current state");
            }

            for action in actions {
                if let Some(follow_up) = self.execute(action, &mut outcome).await {
                    queue.push_back(follow_up);
                }
            }
        }
        outcome
    }

    async fn execute(&mut self, action: CallAction, outcome: &mut CallOutcome) -> Option<CallInput> {
        match action {
            CallAction::PrepareOffer { kind } => match self.prepare_offer(kind).await {
                Ok(offer) => Some(CallInput::OfferCreated { offer }),
                Err(e) => Some(self.media_failed(e, outcome)),
            },
            CallAction::PrepareAnswer { kind, offer } => {
                match self.prepare_answer(kind, offer).await {
                    Ok(answer) => Some(CallInput::AnswerCreated {
                        answer,
                        now: Instant::now(),
                    }),
                    Err(e) => Some(self.media_failed(e, outcome)),
                }
            }
            CallAction::ApplyRemoteAnswer { answer } => {
                let Some(connection) = self.media.connection.as_mut() else {
                    tracing::debug!("answer arrived without a peer connection");
                    return Some(CallInput::RemoteAnswerFailed);
                };
                match connection.set_remote_description(answer).await {
                    Ok(()) => Some(CallInput::RemoteAnswerApplied {
                        now: Instant::now(),
                    }),
                    Err(e) => {
                        tracing::warn!(error = %e, "could not apply remote answer");
                        Some(CallInput::RemoteAnswerFailed)
                    }
                }
            }
            CallAction::Send(frame) => {
                outcome.frames.push(frame);
                None
            }
            CallAction::ReleaseMedia => {
                self.media.release();
                None
            }
            CallAction::StartDurationTimer => {
                self.timer_armed = true;
                None
            }
            CallAction::StopDurationTimer => {
                self.timer_armed = false;
                None
            }
            CallAction::EmitEvent(event) => {
                log_event(&event);
                outcome.events.push(event);
                None
            }
        }
    }

    fn media_failed(&mut self, error: MediaError, outcome: &mut CallOutcome) -> CallInput {
        tracing::warn!(error = %error, "call media setup failed");
        let input = CallInput::MediaFailed {
            error: error.to_string(),
        };
        outcome.failure = Some(error);
        input
    }

    /// Acquire media, build the connection and set a local offer.
    async fn prepare_offer(&mut self, kind: CallKind) -> Result<SessionDescription, MediaError> {
        let connection = self.open_media(kind).await?;
        let offer = connection.create_offer().await?;
        connection.set_local_description(offer.clone()).await?;
        Ok(offer)
    }

    /// Acquire media, build the connection, apply the offer and set a
    /// local answer.
    async fn prepare_answer(
        &mut self,
        kind: CallKind,
        offer: SessionDescription,
    ) -> Result<SessionDescription, MediaError> {
        let connection = self.open_media(kind).await?;
        connection.set_remote_description(offer).await?;
        let answer = connection.create_answer().await?;
        connection.set_local_description(answer.clone()).await?;
        Ok(answer)
    }

    /// Open local tracks and a connection carrying them. Both are stored
    /// as soon as they exist so a later failure releases them.
    async fn open_media(&mut self, kind: CallKind) -> Result<&mut Box<dyn PeerConnection>, MediaError> {
        let call_id = self.state.call_id().cloned().ok_or(MediaError::Closed)?;

        let local = self.devices.open(&MediaConstraints::for_call(kind)).await?;
        self.media.local = Some(Arc::clone(&local));

        let connection = self
            .connector
            .connect(&call_id, &self.ice, self.peer_events.clone())
            .await?;
        let connection = self.media.connection.insert(connection);
        connection.add_stream(&local)?;
        Ok(connection)
    }

    /// Current state.
    pub fn state(&self) -> &CallState {
        &self.state
    }

    /// Whether no call is pending or active.
    pub fn is_idle(&self) -> bool {
        self.state.is_idle()
    }

    /// Whether the one-second duration timer should run.
    pub fn timer_armed(&self) -> bool {
        self.timer_armed
    }

    /// Our captured tracks.
    pub fn local_stream(&self) -> Option<&Arc<dyn MediaStream>> {
        self.media.local.as_ref()
    }

    /// The peer's tracks.
    pub fn remote_stream(&self) -> Option<&Arc<dyn MediaStream>> {
        self.media.remote.as_ref()
    }

    /// Whether a peer connection exists.
    pub fn has_connection(&self) -> bool {
        self.media.connection.is_some()
    }
}

impl std::fmt::Debug for CallController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallController")
            .field("state", &self.state)
            .field("timer_armed", &self.timer_armed)
            .finish_non_exhaustive()
    }
}

fn input_label(input: &CallInput) -> &'static str {
    match input {
        CallInput::Dial { .. } => "dial",
        CallInput::OfferCreated { .. } => "offer_created",
        CallInput::IncomingOffer { .. } => "incoming_offer",
        CallInput::AnswerRequested => "answer_requested",
        CallInput::AnswerCreated { .. } => "answer_created",
        CallInput::AnswerReceived { .. } => "answer_received",
        CallInput::RemoteAnswerApplied { .. } => "remote_answer_applied",
        CallInput::RemoteAnswerFailed => "remote_answer_failed",
        CallInput::Reject => "reject",
        CallInput::Missed { .. } => "missed",
        CallInput::Hangup => "hangup",
        CallInput::RemoteEnded { .. } => "remote_ended",
        CallInput::RemoteRejected { .. } => "remote_rejected",
        CallInput::Disconnected { .. } => "disconnected",
        CallInput::TransportLost => "transport_lost",
        CallInput::MediaFailed { .. } => "media_failed",
        CallInput::Tick { .. } => "tick",
    }
}

fn log_event(event: &CallEvent) {
    match event {
        CallEvent::Connected { peer, kind, role } => {
            tracing::info!(%peer, ?kind, ?role, "call connected");
        }
        CallEvent::Ended {
            call_id,
            reason,
            duration_secs,
        } => {
            tracing::info!(%call_id, ?reason, duration_secs, "call ended");
        }
        CallEvent::Incoming {
            caller, call_id, ..
        } => {
            tracing::info!(%caller, %call_id, "incoming call");
        }
        CallEvent::Missed { call_id } => {
            tracing::info!(%call_id, "call missed");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::LoopbackMedia;
    use parley_chat_core::EndReason;
    use parley_chat_types::{CallAnswered, CallRole, IncomingCall};
    use tokio::sync::mpsc;

    type PeerEvents = mpsc::UnboundedReceiver<(CallId, PeerEvent)>;

    fn controller(media: &LoopbackMedia) -> (CallController, PeerEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = CallController::new(
            Arc::new(media.clone()),
            Arc::new(media.clone()),
            IceConfig::new(vec!["stun:stun.l.google.com:19302".into()]),
            tx,
        );
        (controller, rx)
    }

    fn bob() -> UserId {
        UserId::new("bob")
    }

    fn incoming(call_id: &str) -> CallSignal {
        CallSignal::Incoming {
            kind: CallKind::Audio,
            call: IncomingCall {
                caller_id: bob(),
                call_id: CallId::new(call_id),
                offer: Some(SessionDescription::offer("v=0 remote-offer")),
            },
        }
    }

    /// Forward queued peer events into the controller.
    fn pump(controller: &mut CallController, rx: &mut PeerEvents) {
        while let Ok((call_id, event)) = rx.try_recv() {
            controller.on_peer_event(&call_id, event);
        }
    }

    // ===== Caller =====

    #[tokio::test]
    async fn start_call_sends_offer_and_dials() {
        let media = LoopbackMedia::new();
        let (mut calls, _rx) = controller(&media);

        let outcome = calls.start_call(bob(), CallKind::Audio).await.unwrap();

        assert!(matches!(calls.state(), CallState::Dialing { .. }));
        assert_eq!(outcome.frames.len(), 1);
        match &outcome.frames[0] {
            OutboundEvent::AudioCallRequest(request) => {
                assert_eq!(request.receiver_id, bob());
                assert_eq!(Some(&request.call_id), calls.state().call_id());
            }
            other => panic!("unexpected frame: {:?}", other),
        }
        assert!(calls.local_stream().is_some());
        assert!(calls.has_connection());
        assert_eq!(media.last_constraints().unwrap().video, None);
    }

    #[tokio::test]
    async fn video_call_requests_camera() {
        let media = LoopbackMedia::new();
        let (mut calls, _rx) = controller(&media);

        let outcome = calls.start_call(bob(), CallKind::Video).await.unwrap();

        assert!(matches!(outcome.frames[0], OutboundEvent::VideoCallRequest(_)));
        assert!(media.last_constraints().unwrap().video.is_some());
    }

    #[tokio::test]
    async fn start_call_refused_while_busy() {
        let media = LoopbackMedia::new();
        let (mut calls, _rx) = controller(&media);
        calls.start_call(bob(), CallKind::Audio).await.unwrap();
        let before = calls.state().clone();
        let ops = media.stats().total_operations();

        let result = calls.start_call(UserId::new("carol"), CallKind::Video).await;

        assert!(matches!(result, Err(ClientError::CallInProgress)));
        assert_eq!(calls.state(), &before);
        assert_eq!(media.stats().total_operations(), ops);
    }

    #[tokio::test]
    async fn permission_denied_returns_caller_to_idle() {
        let media = LoopbackMedia::new();
        media.fail_next_open(MediaError::PermissionDenied("microphone".into()));
        let (mut calls, _rx) = controller(&media);

        let outcome = calls.start_call(bob(), CallKind::Audio).await.unwrap();

        assert!(calls.is_idle());
        assert!(outcome.frames.is_empty());
        assert!(outcome.failure.unwrap().is_permission());
        assert_eq!(media.stats().live_streams(), 0);
        assert_eq!(media.stats().live_connections(), 0);
    }

    #[tokio::test]
    async fn answer_connects_caller() {
        let media = LoopbackMedia::new();
        let (mut calls, mut rx) = controller(&media);
        calls.start_call(bob(), CallKind::Audio).await.unwrap();
        let call_id = calls.state().call_id().cloned();

        let outcome = calls
            .handle_signal(CallSignal::Answered {
                kind: CallKind::Audio,
                answered: CallAnswered {
                    call_id,
                    answer: Some(SessionDescription::answer("v=0 remote-answer")),
                },
            })
            .await;
        pump(&mut calls, &mut rx);

        assert!(calls.state().is_active());
        assert!(calls.timer_armed());
        assert!(calls.remote_stream().is_some());
        assert!(matches!(
            outcome.events.as_slice(),
            [CallEvent::Connected {
                role: CallRole::Caller,
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn answer_of_other_kind_is_ignored() {
        let media = LoopbackMedia::new();
        let (mut calls, _rx) = controller(&media);
        calls.start_call(bob(), CallKind::Audio).await.unwrap();

        let outcome = calls
            .handle_signal(CallSignal::Answered {
                kind: CallKind::Video,
                answered: CallAnswered {
                    call_id: None,
                    answer: Some(SessionDescription::answer("v=0")),
                },
            })
            .await;

        assert!(outcome.events.is_empty());
        assert!(matches!(calls.state(), CallState::Dialing { .. }));
    }

    #[tokio::test]
    async fn failed_remote_answer_keeps_dialing() {
        let media = LoopbackMedia::new();
        let (mut calls, _rx) = controller(&media);
        calls.start_call(bob(), CallKind::Audio).await.unwrap();
        media.fail_next_negotiation("bad sdp");

        let outcome = calls
            .handle_signal(CallSignal::Answered {
                kind: CallKind::Audio,
                answered: CallAnswered {
                    call_id: None,
                    answer: Some(SessionDescription::answer("v=0")),
                },
            })
            .await;

        assert!(outcome.failure.is_none());
        assert!(matches!(calls.state(), CallState::Dialing { .. }));
        assert!(calls.has_connection());
    }

    // ===== Callee =====

    #[tokio::test]
    async fn incoming_offer_rings_without_media() {
        let media = LoopbackMedia::new();
        let (mut calls, _rx) = controller(&media);

        let outcome = calls.handle_signal(incoming("call_1")).await;

        assert!(matches!(calls.state(), CallState::Ringing { .. }));
        assert!(matches!(outcome.events.as_slice(), [CallEvent::Incoming { .. }]));
        assert_eq!(media.stats().total_operations(), 0);
    }

    #[tokio::test]
    async fn answering_sends_answer_and_goes_active() {
        let media = LoopbackMedia::new();
        let (mut calls, _rx) = controller(&media);
        calls.handle_signal(incoming("call_1")).await;

        let outcome = calls.answer().await;

        assert!(calls.state().is_active());
        match outcome.frames.as_slice() {
            [OutboundEvent::AudioCallAnswer(answer)] => {
                assert_eq!(answer.caller_id, bob());
                assert_eq!(answer.call_id, CallId::new("call_1"));
            }
            other => panic!("unexpected frames: {:?}", other),
        }
    }

    #[tokio::test]
    async fn callee_media_failure_keeps_ringing() {
        let media = LoopbackMedia::new();
        media.fail_next_open(MediaError::DeviceNotFound("microphone".into()));
        let (mut calls, _rx) = controller(&media);
        calls.handle_signal(incoming("call_1")).await;

        let outcome = calls.answer().await;

        assert!(matches!(
            calls.state(),
            CallState::Ringing {
                answering: false,
                ..
            }
        ));
        assert!(matches!(outcome.failure, Some(MediaError::DeviceNotFound(_))));

        // Retry succeeds
        calls.answer().await;
        assert!(calls.state().is_active());
    }

    #[tokio::test]
    async fn reject_sends_reject_and_idles() {
        let media = LoopbackMedia::new();
        let (mut calls, _rx) = controller(&media);
        calls.handle_signal(incoming("call_1")).await;

        let outcome = calls.reject().await;

        assert!(calls.is_idle());
        assert!(matches!(
            outcome.frames.as_slice(),
            [OutboundEvent::AudioCallReject(_)]
        ));
    }

    #[tokio::test]
    async fn second_offer_while_ringing_is_ignored() {
        let media = LoopbackMedia::new();
        let (mut calls, _rx) = controller(&media);
        calls.handle_signal(incoming("call_1")).await;

        let outcome = calls.handle_signal(incoming("call_2")).await;

        assert!(outcome.events.is_empty());
        assert_eq!(calls.state().call_id(), Some(&CallId::new("call_1")));
    }

    // ===== Ending =====

    #[tokio::test]
    async fn end_call_releases_everything_and_notifies_peer() {
        let media = LoopbackMedia::new();
        let (mut calls, mut rx) = controller(&media);
        calls.handle_signal(incoming("call_1")).await;
        calls.answer().await;
        pump(&mut calls, &mut rx);
        assert!(calls.remote_stream().is_some());

        let outcome = calls.end_call().await;

        assert!(calls.is_idle());
        assert!(!calls.timer_armed());
        assert_eq!(media.stats().live_streams(), 0);
        assert_eq!(media.stats().live_connections(), 0);
        match outcome.frames.as_slice() {
            [OutboundEvent::AudioCallEnd(end)] => {
                assert_eq!(end.call_id, CallId::new("call_1"));
                assert_eq!(end.receiver_id, bob());
            }
            other => panic!("unexpected frames: {:?}", other),
        }
    }

    #[tokio::test]
    async fn end_call_twice_is_idempotent() {
        let media = LoopbackMedia::new();
        let (mut calls, _rx) = controller(&media);
        calls.start_call(bob(), CallKind::Audio).await.unwrap();
        calls.end_call().await;
        let ops = media.stats().total_operations();

        let outcome = calls.end_call().await;

        assert!(outcome.frames.is_empty());
        assert!(outcome.events.is_empty());
        assert_eq!(media.stats().total_operations(), ops);
    }

    #[tokio::test]
    async fn stale_remote_end_is_discarded() {
        let media = LoopbackMedia::new();
        let (mut calls, _rx) = controller(&media);
        calls.handle_signal(incoming("call_1")).await;
        calls.answer().await;

        let outcome = calls
            .handle_signal(CallSignal::Ended(Some(CallId::new("call_0"))))
            .await;

        assert!(outcome.events.is_empty());
        assert!(calls.state().is_active());
    }

    #[tokio::test]
    async fn transport_loss_ends_without_emitting() {
        let media = LoopbackMedia::new();
        let (mut calls, mut rx) = controller(&media);
        calls.handle_signal(incoming("call_1")).await;
        calls.answer().await;
        pump(&mut calls, &mut rx);

        let outcome = calls.transport_lost().await;

        assert!(calls.is_idle());
        assert!(outcome.frames.is_empty());
        assert!(matches!(
            outcome.events.as_slice(),
            [CallEvent::Ended {
                reason: EndReason::TransportLost,
                ..
            }]
        ));
        assert_eq!(media.stats().live_streams(), 0);
    }

    #[tokio::test]
    async fn remote_stream_for_finished_call_is_stopped() {
        let media = LoopbackMedia::new();
        let (mut calls, mut rx) = controller(&media);
        calls.handle_signal(incoming("call_1")).await;
        calls.answer().await;
        calls.end_call().await;

        // The remote stream event was still queued when the call ended.
        pump(&mut calls, &mut rx);

        assert!(calls.remote_stream().is_none());
        assert_eq!(media.stats().live_streams(), 0);
    }

    #[tokio::test]
    async fn tick_needs_armed_timer() {
        let media = LoopbackMedia::new();
        let (mut calls, _rx) = controller(&media);

        let outcome = calls.tick(Instant::now()).await;
        assert!(outcome.events.is_empty());

        calls.handle_signal(incoming("call_1")).await;
        calls.answer().await;
        let later = Instant::now() + std::time::Duration::from_secs(3);
        let outcome = calls.tick(later).await;

        assert!(matches!(
            outcome.events.as_slice(),
            [CallEvent::DurationChanged { duration_secs: 3 }]
        ));
        assert_eq!(calls.state().duration_secs(), 3);
    }
}
