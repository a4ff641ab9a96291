//! Call-signaling state machine for Parley.
//!
//! This module provides a pure, side-effect-free state machine for one
//! client's call lifecycle. It takes inputs and produces a new state plus a
//! list of actions to execute:
//!
//! ```text
//! caller:  Idle → Dialing → Active → Idle
//! callee:  Idle → Ringing → Active → Idle
//!          * → Idle on reject / end / disconnect
//! ```
//!
//! Device access, peer connections and the event channel are handled by
//! `chat-client`, which interprets the returned [`CallAction`]s and feeds
//! the results back as [`CallInput`]s.

use std::time::Instant;

use parley_chat_types::{
    CallAnswer, CallEnd, CallId, CallKind, CallReject, CallRequest, CallRole, OutboundEvent,
    SessionDescription, UserId,
};

/// Progress of an outgoing call before it is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialStage {
    /// Acquiring media and creating the offer.
    PreparingOffer,
    /// Offer emitted, waiting for the answer.
    OfferSent,
    /// Answer received, applying it to the peer connection.
    ApplyingAnswer,
}

/// Call state - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallState {
    /// No call.
    Idle,
    /// We are calling `peer`.
    Dialing {
        /// Callee.
        peer: UserId,
        /// Our call id.
        call_id: CallId,
        /// Audio or video.
        kind: CallKind,
        /// How far the offer got.
        stage: DialStage,
    },
    /// `caller` is calling us.
    Ringing {
        /// Caller.
        caller: UserId,
        /// Caller's call id.
        call_id: CallId,
        /// Audio or video.
        kind: CallKind,
        /// Caller's offer, if the server forwarded one.
        offer: Option<SessionDescription>,
        /// Whether we are acquiring media to answer.
        answering: bool,
    },
    /// Media is flowing.
    Active {
        /// Our side of the negotiation.
        role: CallRole,
        /// The other party.
        peer: UserId,
        /// Call id.
        call_id: CallId,
        /// Audio or video.
        kind: CallKind,
        /// When the call connected.
        started_at: Instant,
        /// Whole seconds since `started_at`, as of the last tick.
        duration_secs: u64,
    },
}

impl CallState {
    /// Create a new state machine in the Idle state.
    pub fn new() -> Self {
        Self::Idle
    }

    /// Process an input and return the new state plus actions to execute.
    ///
    /// This is a pure function. Inputs that make no sense in the current
    /// state leave it unchanged and produce no actions.
    pub fn on_event(self, input: CallInput) -> (Self, Vec<CallAction>) {
        match (self, input) {
            // Caller side
            (Self::Idle, CallInput::Dial {
                peer,
                kind,
                call_id,
            }) => (
                Self::Dialing {
                    peer: peer.clone(),
                    call_id: call_id.clone(),
                    kind,
                    stage: DialStage::PreparingOffer,
                },
                vec![
                    CallAction::PrepareOffer { kind },
                    CallAction::EmitEvent(CallEvent::Dialing {
                        peer,
                        kind,
                        call_id,
                    }),
                ],
            ),
            (
                Self::Dialing {
                    peer,
                    call_id,
                    kind,
                    stage: DialStage::PreparingOffer,
                },
                CallInput::OfferCreated { offer },
            ) => {
                let request = OutboundEvent::call_request(
                    kind,
                    CallRequest {
                        receiver_id: peer.clone(),
                        offer,
                        call_id: call_id.clone(),
                    },
                );
                (
                    Self::Dialing {
                        peer,
                        call_id,
                        kind,
                        stage: DialStage::OfferSent,
                    },
                    vec![CallAction::Send(request)],
                )
            }
            (
                Self::Dialing {
                    peer,
                    call_id,
                    kind,
                    stage: DialStage::OfferSent,
                },
                CallInput::AnswerReceived {
                    call_id: answered_id,
                    kind: answered_kind,
                    answer: Some(answer),
                },
            ) if answered_kind == kind
                && answered_id.as_ref().map_or(true, |id| id == &call_id) =>
            {
                (
                    Self::Dialing {
                        peer,
                        call_id,
                        kind,
                        stage: DialStage::ApplyingAnswer,
                    },
                    vec![CallAction::ApplyRemoteAnswer { answer }],
                )
            }
            (
                Self::Dialing {
                    peer,
                    call_id,
                    kind,
                    stage: DialStage::ApplyingAnswer,
                },
                CallInput::RemoteAnswerApplied { now },
            ) => (
                Self::Active {
                    role: CallRole::Caller,
                    peer: peer.clone(),
                    call_id,
                    kind,
                    started_at: now,
                    duration_secs: 0,
                },
                vec![
                    CallAction::StartDurationTimer,
                    CallAction::EmitEvent(CallEvent::Connected {
                        peer,
                        kind,
                        role: CallRole::Caller,
                    }),
                ],
            ),
            (
                Self::Dialing {
                    peer,
                    call_id,
                    kind,
                    stage: DialStage::ApplyingAnswer,
                },
                CallInput::RemoteAnswerFailed,
            ) => (
                Self::Dialing {
                    peer,
                    call_id,
                    kind,
                    stage: DialStage::OfferSent,
                },
                vec![],
            ),
            (Self::Dialing { .. }, CallInput::MediaFailed { error }) => (
                Self::Idle,
                vec![
                    CallAction::ReleaseMedia,
                    CallAction::EmitEvent(CallEvent::Failed { error }),
                ],
            ),

            // Callee side
            (Self::Idle, CallInput::IncomingOffer {
                caller,
                call_id,
                kind,
                offer,
            }) => (
                Self::Ringing {
                    caller: caller.clone(),
                    call_id: call_id.clone(),
                    kind,
                    offer,
                    answering: false,
                },
                vec![CallAction::EmitEvent(CallEvent::Incoming {
                    caller,
                    kind,
                    call_id,
                })],
            ),
            (
                Self::Ringing {
                    caller,
                    call_id,
                    kind,
                    offer: Some(offer),
                    answering: false,
                },
                CallInput::AnswerRequested,
            ) => (
                Self::Ringing {
                    caller,
                    call_id,
                    kind,
                    offer: Some(offer.clone()),
                    answering: true,
                },
                vec![CallAction::PrepareAnswer { kind, offer }],
            ),
            (
                Self::Ringing {
                    caller,
                    call_id,
                    kind,
                    answering: true,
                    ..
                },
                CallInput::AnswerCreated { answer, now },
            ) => {
                let reply = OutboundEvent::call_answer(
                    kind,
                    CallAnswer {
                        caller_id: caller.clone(),
                        answer,
                        call_id: call_id.clone(),
                    },
                );
                (
                    Self::Active {
                        role: CallRole::Callee,
                        peer: caller.clone(),
                        call_id,
                        kind,
                        started_at: now,
                        duration_secs: 0,
                    },
                    vec![
                        CallAction::Send(reply),
                        CallAction::StartDurationTimer,
                        CallAction::EmitEvent(CallEvent::Connected {
                            peer: caller,
                            kind,
                            role: CallRole::Callee,
                        }),
                    ],
                )
            }
            (
                Self::Ringing {
                    caller,
                    call_id,
                    kind,
                    offer,
                    answering: true,
                },
                CallInput::MediaFailed { error },
            ) => (
                Self::Ringing {
                    caller,
                    call_id,
                    kind,
                    offer,
                    answering: false,
                },
                vec![
                    CallAction::ReleaseMedia,
                    CallAction::EmitEvent(CallEvent::Failed { error }),
                ],
            ),
            (
                Self::Ringing {
                    caller, call_id, ..
                },
                CallInput::Reject,
            ) => (
                Self::Idle,
                vec![
                    CallAction::ReleaseMedia,
                    CallAction::Send(OutboundEvent::AudioCallReject(CallReject {
                        call_id: call_id.clone(),
                        caller_id: caller,
                    })),
                    CallAction::EmitEvent(CallEvent::Ended {
                        call_id,
                        reason: EndReason::Declined,
                        duration_secs: 0,
                    }),
                ],
            ),
            (
                Self::Ringing {
                    call_id, answering, ..
                },
                CallInput::Missed {
                    call_id: missed_id,
                },
            ) if matches_call(&missed_id, &call_id) => {
                let mut actions = Vec::new();
                if answering {
                    actions.push(CallAction::ReleaseMedia);
                }
                actions.push(CallAction::EmitEvent(CallEvent::Missed { call_id }));
                (Self::Idle, actions)
            }

            // Active
            (
                Self::Active {
                    role,
                    peer,
                    call_id,
                    kind,
                    started_at,
                    duration_secs,
                },
                CallInput::Tick { now },
            ) => {
                let elapsed = now.saturating_duration_since(started_at).as_secs();
                let actions = if elapsed != duration_secs {
                    vec![CallAction::EmitEvent(CallEvent::DurationChanged {
                        duration_secs: elapsed,
                    })]
                } else {
                    vec![]
                };
                (
                    Self::Active {
                        role,
                        peer,
                        call_id,
                        kind,
                        started_at,
                        duration_secs: elapsed,
                    },
                    actions,
                )
            }

            // Endings, from any non-idle state
            (state, CallInput::Hangup) => state.hang_up(),
            (state, CallInput::RemoteEnded { call_id }) => {
                state.end_remotely(call_id.as_ref(), EndReason::RemoteEnded)
            }
            (state, CallInput::RemoteRejected { call_id }) => {
                state.end_remotely(call_id.as_ref(), EndReason::Rejected)
            }
            (state, CallInput::Disconnected { call_id }) => {
                state.end_remotely(call_id.as_ref(), EndReason::PeerDisconnected)
            }
            (state, CallInput::TransportLost) => state.end_remotely(None, EndReason::TransportLost),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// End the call and tell the peer.
    fn hang_up(self) -> (Self, Vec<CallAction>) {
        let Some((peer, call_id, duration_secs)) = self.ending_parts() else {
            return (self, vec![]);
        };
        let mut actions = self.teardown_actions();
        actions.push(CallAction::Send(OutboundEvent::AudioCallEnd(CallEnd {
            call_id: call_id.clone(),
            receiver_id: peer,
        })));
        actions.push(CallAction::EmitEvent(CallEvent::Ended {
            call_id,
            reason: EndReason::LocalHangup,
            duration_secs,
        }));
        (Self::Idle, actions)
    }

    /// End the call without notifying the peer, if `call_id` matches.
    fn end_remotely(self, call_id: Option<&CallId>, reason: EndReason) -> (Self, Vec<CallAction>) {
        let Some((_, current, duration_secs)) = self.ending_parts() else {
            return (self, vec![]);
        };
        if !matches_call(&call_id.cloned(), &current) {
            return (self, vec![]);
        }
        let mut actions = self.teardown_actions();
        actions.push(CallAction::EmitEvent(CallEvent::Ended {
            call_id: current,
            reason,
            duration_secs,
        }));
        (Self::Idle, actions)
    }

    fn teardown_actions(&self) -> Vec<CallAction> {
        match self {
            Self::Active { .. } => vec![CallAction::StopDurationTimer, CallAction::ReleaseMedia],
            _ => vec![CallAction::ReleaseMedia],
        }
    }

    /// Peer, call id and duration of a non-idle state.
    fn ending_parts(&self) -> Option<(UserId, CallId, u64)> {
        match self {
            Self::Idle => None,
            Self::Dialing { peer, call_id, .. } => Some((peer.clone(), call_id.clone(), 0)),
            Self::Ringing {
                caller, call_id, ..
            } => Some((caller.clone(), call_id.clone(), 0)),
            Self::Active {
                peer,
                call_id,
                duration_secs,
                ..
            } => Some((peer.clone(), call_id.clone(), *duration_secs)),
        }
    }

    /// Check if no call is pending or active.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Check if media is flowing.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// Id of the current call.
    pub fn call_id(&self) -> Option<&CallId> {
        match self {
            Self::Idle => None,
            Self::Dialing { call_id, .. }
            | Self::Ringing { call_id, .. }
            | Self::Active { call_id, .. } => Some(call_id),
        }
    }

    /// The other party.
    pub fn peer(&self) -> Option<&UserId> {
        match self {
            Self::Idle => None,
            Self::Dialing { peer, .. } | Self::Active { peer, .. } => Some(peer),
            Self::Ringing { caller, .. } => Some(caller),
        }
    }

    /// Audio or video.
    pub fn kind(&self) -> Option<CallKind> {
        match self {
            Self::Idle => None,
            Self::Dialing { kind, .. } | Self::Ringing { kind, .. } | Self::Active { kind, .. } => {
                Some(*kind)
            }
        }
    }

    /// Whole seconds connected, 0 unless Active.
    pub fn duration_secs(&self) -> u64 {
        match self {
            Self::Active { duration_secs, .. } => *duration_secs,
            _ => 0,
        }
    }
}

impl Default for CallState {
    fn default() -> Self {
        Self::new()
    }
}

/// A notice without a call id applies to whatever call is current.
fn matches_call(notice: &Option<CallId>, current: &CallId) -> bool {
    notice.as_ref().map_or(true, |id| id == current)
}

/// Inputs to the call state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallInput {
    /// Local user places a call.
    Dial {
        /// Callee.
        peer: UserId,
        /// Audio or video.
        kind: CallKind,
        /// Freshly generated call id.
        call_id: CallId,
    },
    /// Media acquired and local offer set.
    OfferCreated {
        /// The offer to send.
        offer: SessionDescription,
    },
    /// An offer arrived from the server.
    IncomingOffer {
        /// Caller.
        caller: UserId,
        /// Caller's call id.
        call_id: CallId,
        /// Audio or video.
        kind: CallKind,
        /// The offer, if forwarded.
        offer: Option<SessionDescription>,
    },
    /// Local user accepts the ringing call.
    AnswerRequested,
    /// Media acquired, remote offer and local answer set.
    AnswerCreated {
        /// The answer to send.
        answer: SessionDescription,
        /// Connection instant.
        now: Instant,
    },
    /// The callee's answer arrived.
    AnswerReceived {
        /// Call id, if forwarded.
        call_id: Option<CallId>,
        /// Which answer event carried it.
        kind: CallKind,
        /// The answer, if forwarded.
        answer: Option<SessionDescription>,
    },
    /// The answer was set as remote description.
    RemoteAnswerApplied {
        /// Connection instant.
        now: Instant,
    },
    /// The answer could not be applied.
    RemoteAnswerFailed,
    /// Local user declines the ringing call.
    Reject,
    /// The caller gave up before we answered.
    Missed {
        /// Call id, if forwarded.
        call_id: Option<CallId>,
    },
    /// Local user hangs up (or the session shuts down).
    Hangup,
    /// The peer hung up.
    RemoteEnded {
        /// Call id, if forwarded.
        call_id: Option<CallId>,
    },
    /// The peer declined our call.
    RemoteRejected {
        /// Call id, if forwarded.
        call_id: Option<CallId>,
    },
    /// The peer's channel dropped.
    Disconnected {
        /// Call id, if forwarded.
        call_id: Option<CallId>,
    },
    /// Our own channel dropped.
    TransportLost,
    /// Device access failed.
    MediaFailed {
        /// Description of the failure.
        error: String,
    },
    /// One-second timer.
    Tick {
        /// Current instant.
        now: Instant,
    },
}

/// Actions to be executed by the call controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallAction {
    /// Acquire media, build the peer connection, create and set the offer,
    /// then feed back [`CallInput::OfferCreated`].
    PrepareOffer {
        /// Which tracks to acquire.
        kind: CallKind,
    },
    /// Acquire media, build the peer connection, apply `offer`, create and
    /// set the answer, then feed back [`CallInput::AnswerCreated`].
    PrepareAnswer {
        /// Which tracks to acquire.
        kind: CallKind,
        /// Caller's offer.
        offer: SessionDescription,
    },
    /// Set the callee's answer as remote description.
    ApplyRemoteAnswer {
        /// The answer.
        answer: SessionDescription,
    },
    /// Emit a frame on the event channel.
    Send(OutboundEvent),
    /// Stop local tracks, close the peer connection, stop remote tracks.
    ReleaseMedia,
    /// Begin feeding [`CallInput::Tick`] every second.
    StartDurationTimer,
    /// Stop feeding ticks.
    StopDurationTimer,
    /// Publish to observers.
    EmitEvent(CallEvent),
}

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// We hung up.
    LocalHangup,
    /// We declined an incoming call.
    Declined,
    /// The peer hung up.
    RemoteEnded,
    /// The peer declined our call.
    Rejected,
    /// The peer's channel dropped.
    PeerDisconnected,
    /// Our channel dropped.
    TransportLost,
}

/// Events published to call observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// We started calling.
    Dialing {
        /// Callee.
        peer: UserId,
        /// Audio or video.
        kind: CallKind,
        /// Call id.
        call_id: CallId,
    },
    /// Someone is calling.
    Incoming {
        /// Caller.
        caller: UserId,
        /// Audio or video.
        kind: CallKind,
        /// Call id.
        call_id: CallId,
    },
    /// Media is flowing.
    Connected {
        /// The other party.
        peer: UserId,
        /// Audio or video.
        kind: CallKind,
        /// Our side.
        role: CallRole,
    },
    /// The duration counter advanced.
    DurationChanged {
        /// Whole seconds connected.
        duration_secs: u64,
    },
    /// An incoming call went away unanswered.
    Missed {
        /// Call id.
        call_id: CallId,
    },
    /// Device access failed.
    Failed {
        /// Description of the failure.
        error: String,
    },
    /// The call is over.
    Ended {
        /// Call id.
        call_id: CallId,
        /// Why.
        reason: EndReason,
        /// Whole seconds connected.
        duration_secs: u64,
    },
}

/// Render a call duration as `MM:SS`.
pub fn format_call_duration(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}
