//! Send one text message.

use anyhow::{Context, Result};
use parley_chat_client::{ClientConfig, SessionEvent};
use parley_chat_types::UserId;
use std::sync::Arc;
use std::time::Duration;

use super::format_message;
use crate::Identity;

/// How long to wait for the server to acknowledge the close.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Run the send command.
pub async fn run(
    config: ClientConfig,
    identity: &Identity,
    to: &str,
    message: &str,
    wait_secs: u64,
) -> Result<()> {
    let session = Arc::new(super::session(config, identity));
    session
        .connect(&identity.token)
        .await
        .context("Failed to connect to the event channel")?;
    session
        .select_conversation(UserId::new(to))
        .await
        .context("Failed to load conversation")?;

    let mut events = session.subscribe();
    let runner = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.run().await })
    };

    let token = session
        .send_text(message)
        .await
        .context("Failed to send message")?
        .ok_or_else(|| anyhow::anyhow!("Message is empty"))?;
    println!("Sending to {}...", to);

    let confirmed = tokio::time::timeout(Duration::from_secs(wait_secs), async {
        loop {
            let window = session.window().await;
            if let Some(sent) = window
                .messages
                .iter()
                .find(|m| !m.is_temporary && m.correlation == Some(token))
            {
                return Ok(sent.clone());
            }
            match events.recv().await {
                Ok(SessionEvent::Disconnected) => {
                    anyhow::bail!("Connection closed before the server confirmed")
                }
                Ok(SessionEvent::ServerError(message)) => anyhow::bail!("Server error: {}", message),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    anyhow::bail!("Session stopped before the server confirmed")
                }
            }
        }
    })
    .await;

    let result = match confirmed {
        Ok(Ok(sent)) => {
            println!("{}", format_message(&sent));
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(anyhow::anyhow!(
            "No confirmation within {} seconds",
            wait_secs
        )),
    };

    session.shutdown().await.context("Failed to close session")?;
    // The loop exits once the server acknowledges the close.
    if tokio::time::timeout(CLOSE_GRACE, runner).await.is_err() {
        tracing::debug!("server did not acknowledge close");
    }
    result
}
