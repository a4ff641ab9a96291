//! End-to-end scenarios: two sessions talking through a relay that plays
//! the part of the coordination server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parley_chat_client::{
    ChatSession, ClientConfig, LoopbackMedia, MediaBackend, MockApi, MockTransport,
};
use parley_chat_core::CallState;
use parley_chat_types::{
    CallAnswered, CallKind, CallNotice, ChatMessage, IncomingCall, InboundEvent, MessageBody,
    MessageConfirmation, MessageEnvelope, MessageId, OutboundEvent, Participant, ReadReceipt,
    UserId,
};
use tokio::task::JoinHandle;

type Session = ChatSession<MockTransport, MockApi>;

struct Peer {
    user: UserId,
    session: Arc<Session>,
    transport: MockTransport,
    media: LoopbackMedia,
}

async fn peer(name: &str) -> Peer {
    let user = UserId::new(name);
    let transport = MockTransport::streaming();
    let media = LoopbackMedia::new();
    let session = Arc::new(ChatSession::new(
        ClientConfig::default(),
        user.clone(),
        transport.clone(),
        MockApi::new(),
        MediaBackend::loopback(&media),
    ));
    session.connect(&format!("token-{}", name)).await.unwrap();
    Peer {
        user,
        session,
        transport,
        media,
    }
}

fn run(peer: &Peer) -> JoinHandle<()> {
    let session = Arc::clone(&peer.session);
    tokio::spawn(async move {
        session.run().await.unwrap();
    })
}

/// Forward what `from` emits the way the server would: call frames to
/// `to`, message confirmations back to `from`, messages and read receipts
/// to `to`.
fn relay(from: &Peer, to: &Peer, ids: Arc<AtomicUsize>) -> JoinHandle<()> {
    let mut sent = from.transport.subscribe_sent();
    let sender = from.user.clone();
    let origin = from.transport.clone();
    let target = to.transport.clone();

    tokio::spawn(async move {
        while let Some(frame) = sent.recv().await {
            let Ok(event) = OutboundEvent::from_json(&frame) else {
                continue;
            };
            let (echo, forward) = match event {
                OutboundEvent::SendMessage(send) => {
                    let n = ids.fetch_add(1, Ordering::SeqCst);
                    let content = send.content.clone();
                    let record = ChatMessage {
                        id: MessageId::new(format!("srv-{}", n)),
                        sender: Participant::id_only(sender.clone()),
                        receiver: Participant::id_only(send.receiver_id.clone()),
                        body: MessageBody::Text { content },
                        created_at: Utc::now(),
                        is_read: false,
                        read_at: None,
                        reactions: Vec::new(),
                        is_temporary: false,
                        correlation: None,
                    };
                    (
                        Some(InboundEvent::MessageSent(MessageConfirmation {
                            message: record.clone(),
                            client_message_id: Some(send.client_message_id),
                        })),
                        Some(InboundEvent::NewMessage(MessageEnvelope { message: record })),
                    )
                }
                OutboundEvent::MarkAsRead(read) => (
                    None,
                    Some(InboundEvent::MessageRead(ReadReceipt {
                        message_id: read.message_id,
                        read_at: Some(Utc::now()),
                    })),
                ),
                OutboundEvent::AudioCallRequest(request) => (
                    None,
                    Some(InboundEvent::AudioCallIncoming(IncomingCall {
                        caller_id: sender.clone(),
                        call_id: request.call_id,
                        offer: Some(request.offer),
                    })),
                ),
                OutboundEvent::VideoCallRequest(request) => (
                    None,
                    Some(InboundEvent::VideoCallIncoming(IncomingCall {
                        caller_id: sender.clone(),
                        call_id: request.call_id,
                        offer: Some(request.offer),
                    })),
                ),
                OutboundEvent::AudioCallAnswer(answer) => (
                    None,
                    Some(InboundEvent::AudioCallAnswered(CallAnswered {
                        call_id: Some(answer.call_id),
                        answer: Some(answer.answer),
                    })),
                ),
                OutboundEvent::VideoCallAnswer(answer) => (
                    None,
                    Some(InboundEvent::VideoCallAnswered(CallAnswered {
                        call_id: Some(answer.call_id),
                        answer: Some(answer.answer),
                    })),
                ),
                OutboundEvent::AudioCallReject(reject) => (
                    None,
                    Some(InboundEvent::AudioCallRejected(CallNotice {
                        call_id: Some(reject.call_id),
                    })),
                ),
                OutboundEvent::AudioCallEnd(end) => (
                    None,
                    Some(InboundEvent::AudioCallEnded(CallNotice {
                        call_id: Some(end.call_id),
                    })),
                ),
                OutboundEvent::TypingStart(_) | OutboundEvent::TypingStop(_) => (None, None),
            };
            if let Some(echo) = echo {
                origin.queue_response(echo.to_json().unwrap());
            }
            if let Some(forward) = forward {
                target.queue_response(forward.to_json().unwrap());
            }
        }
    })
}

/// Wire two peers together and start both event loops.
async fn pair() -> (Peer, Peer) {
    let alice = peer("alice").await;
    let bob = peer("bob").await;
    let ids = Arc::new(AtomicUsize::new(1));
    relay(&alice, &bob, Arc::clone(&ids));
    relay(&bob, &alice, ids);
    run(&alice);
    run(&bob);
    (alice, bob)
}

async fn wait_until<F>(session: &Session, what: &str, check: F)
where
    F: Fn(&CallState) -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if check(&session.call_state().await) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}

async fn wait_for_media(session: &Session, expected: (bool, bool)) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while session.call_media().await != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for call media {:?}", expected);
}

fn is_active_audio(state: &CallState) -> bool {
    matches!(
        state,
        CallState::Active {
            kind: CallKind::Audio,
            ..
        }
    )
}

// ===== Calls =====

#[tokio::test]
async fn audio_call_connects_and_ends_on_both_sides() {
    let (alice, bob) = pair().await;

    alice
        .session
        .start_call(bob.user.clone(), CallKind::Audio)
        .await
        .unwrap();
    assert!(matches!(
        alice.session.call_state().await,
        CallState::Dialing { .. }
    ));

    wait_until(&bob.session, "bob ringing", |s| {
        matches!(s, CallState::Ringing { .. })
    })
    .await;

    bob.session.answer_call().await.unwrap();
    assert!(is_active_audio(&bob.session.call_state().await));

    wait_until(&alice.session, "alice active", is_active_audio).await;
    wait_for_media(&alice.session, (true, true)).await;
    wait_for_media(&bob.session, (true, true)).await;

    alice.session.end_call().await.unwrap();
    assert!(alice.session.call_state().await.is_idle());
    wait_until(&bob.session, "bob idle", CallState::is_idle).await;

    for media in [&alice.media, &bob.media] {
        assert_eq!(media.stats().live_streams(), 0);
        assert_eq!(media.stats().live_connections(), 0);
    }
}

#[tokio::test]
async fn rejected_call_returns_caller_to_idle() {
    let (alice, bob) = pair().await;

    alice
        .session
        .start_call(bob.user.clone(), CallKind::Audio)
        .await
        .unwrap();
    wait_until(&bob.session, "bob ringing", |s| {
        matches!(s, CallState::Ringing { .. })
    })
    .await;

    bob.session.reject_call().await.unwrap();
    assert!(bob.session.call_state().await.is_idle());

    wait_until(&alice.session, "alice idle", CallState::is_idle).await;
    assert_eq!(alice.media.stats().live_streams(), 0);
    assert_eq!(alice.media.stats().live_connections(), 0);
}

#[tokio::test]
async fn lost_channel_ends_active_call() {
    let (alice, bob) = pair().await;

    alice
        .session
        .start_call(bob.user.clone(), CallKind::Audio)
        .await
        .unwrap();
    wait_until(&bob.session, "bob ringing", |s| {
        matches!(s, CallState::Ringing { .. })
    })
    .await;
    bob.session.answer_call().await.unwrap();
    wait_until(&alice.session, "alice active", is_active_audio).await;

    bob.transport.disconnect();
    wait_until(&bob.session, "bob idle", CallState::is_idle).await;
    wait_for_media(&bob.session, (false, false)).await;
    assert_eq!(bob.media.stats().live_connections(), 0);

    // The server tells the other side.
    let call_id = alice.session.call_state().await.call_id().cloned();
    alice.transport.queue_response(
        InboundEvent::AudioCallDisconnected(CallNotice { call_id })
            .to_json()
            .unwrap(),
    );
    wait_until(&alice.session, "alice idle", CallState::is_idle).await;
    assert_eq!(alice.media.stats().live_connections(), 0);
}

// ===== Messages =====

#[tokio::test]
async fn message_is_confirmed_delivered_and_read() {
    let (alice, bob) = pair().await;
    alice
        .session
        .select_conversation(bob.user.clone())
        .await
        .unwrap();
    bob.session
        .select_conversation(alice.user.clone())
        .await
        .unwrap();

    alice.session.send_text("hi bob").await.unwrap();

    let delivered = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let bob_view = bob.session.window().await;
            let alice_view = alice.session.window().await;
            let read_by_bob = alice_view
                .messages
                .iter()
                .any(|m| !m.is_temporary && m.is_read);
            if bob_view.messages.len() == 1 && alice_view.messages.len() == 1 && read_by_bob {
                return (alice_view, bob_view);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    let (alice_view, bob_view) = delivered.expect("message round trip timed out");

    assert_eq!(alice_view.messages[0].id, bob_view.messages[0].id);
    assert_eq!(bob_view.messages[0].text(), Some("hi bob"));
}
