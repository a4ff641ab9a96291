//! Print stored history.

use anyhow::{Context, Result};
use parley_chat_client::{ClientConfig, HttpConversationApi, MessageSynchronizer};
use parley_chat_types::UserId;

use super::format_message;
use crate::Identity;

/// Run the history command.
///
/// Only the history API is used; no event channel is opened.
pub async fn run(config: ClientConfig, identity: &Identity, peer: &str, pages: usize) -> Result<()> {
    let api = HttpConversationApi::new(config.server.api_base.clone(), identity.token.clone());
    let synchronizer = MessageSynchronizer::new(
        api,
        UserId::new(identity.user.clone()),
        config.history.page_size,
        config.messages.max_pending_sends,
        config.delete_for_everyone_window(),
    );

    synchronizer
        .select_conversation(UserId::new(peer))
        .await
        .context("Failed to fetch newest page")?;
    for page in 1..pages {
        let added = synchronizer
            .load_older_messages()
            .await
            .with_context(|| format!("Failed to fetch page {}", page + 1))?;
        if added == 0 {
            break;
        }
    }

    let window = synchronizer.snapshot().await;
    if window.messages.is_empty() {
        println!("No messages with {}.", peer);
        return Ok(());
    }
    for message in &window.messages {
        println!("{}", format_message(message));
    }
    if window.has_more {
        println!("(older messages available, use --pages)");
    }
    Ok(())
}
