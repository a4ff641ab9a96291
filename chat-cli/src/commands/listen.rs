//! Follow one conversation.

use anyhow::{Context, Result};
use parley_chat_client::{ClientConfig, SessionEvent};
use parley_chat_core::{format_call_duration, CallEvent};
use parley_chat_types::{MessageId, UserId};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast::{error::RecvError, Receiver};

use super::{format_message, Session};
use crate::Identity;

/// Run the listen command.
pub async fn run(config: ClientConfig, identity: &Identity, peer: &str) -> Result<()> {
    let session = Arc::new(super::session(config, identity));
    session
        .connect(&identity.token)
        .await
        .context("Failed to connect to the event channel")?;

    let mut events = session.subscribe();
    session
        .select_conversation(UserId::new(peer))
        .await
        .context("Failed to load conversation")?;

    let mut printed = HashSet::new();
    print_new_messages(&session, &mut printed).await;
    println!("Listening for {} (Ctrl-C to stop)...", peer);

    let printer = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { print_events(&session, &mut events, printed).await })
    };

    tokio::select! {
        result = session.run() => {
            result.context("Event channel failed")?;
            println!("Server closed the connection.");
        }
        _ = tokio::signal::ctrl_c() => {
            session.shutdown().await.context("Failed to close session")?;
        }
    }

    printer.abort();
    Ok(())
}

async fn print_events(
    session: &Session,
    events: &mut Receiver<SessionEvent>,
    mut printed: HashSet<MessageId>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event printer fell behind");
                continue;
            }
            Err(RecvError::Closed) => return,
        };
        match event {
            SessionEvent::WindowChanged => print_new_messages(session, &mut printed).await,
            SessionEvent::TypingChanged(names) if !names.is_empty() => {
                println!("  {} typing...", names.join(", "));
            }
            SessionEvent::Call(event) => print_call_event(&event),
            SessionEvent::ServerError(message) => eprintln!("Server error: {}", message),
            SessionEvent::Disconnected => return,
            _ => {}
        }
    }
}

/// Print confirmed messages not shown yet, oldest first.
async fn print_new_messages(session: &Session, printed: &mut HashSet<MessageId>) {
    let window = session.window().await;
    for message in &window.messages {
        if message.is_temporary || !printed.insert(message.id.clone()) {
            continue;
        }
        println!("{}", format_message(message));
    }
}

fn print_call_event(event: &CallEvent) {
    match event {
        CallEvent::Incoming { caller, kind, .. } => {
            println!("Incoming {:?} call from {}", kind, caller);
        }
        CallEvent::Connected { peer, kind, .. } => {
            println!("{:?} call with {} connected", kind, peer);
        }
        CallEvent::Missed { .. } => println!("Missed a call"),
        CallEvent::Ended {
            reason,
            duration_secs,
            ..
        } => {
            println!(
                "Call ended ({:?}) after {}",
                reason,
                format_call_duration(*duration_secs)
            );
        }
        CallEvent::Failed { error } => eprintln!("Call failed: {}", error),
        _ => {}
    }
}
