//! Which deletions a message offers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parley_chat_types::{ChatMessage, UserId};

/// Deletion choices for one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletionOptions {
    /// Remove it from the local user's view.
    pub for_me: bool,
    /// Remove it for both participants.
    pub for_everyone: bool,
}

impl DeletionOptions {
    /// Whether any deletion is possible.
    pub fn any(&self) -> bool {
        self.for_me || self.for_everyone
    }
}

/// Deletion choices for `message` as seen by `local_user` at `now`.
///
/// Only the author may delete, and only confirmed messages. Deleting for
/// everyone is offered while the message is younger than
/// `for_everyone_window`. A timestamp in the future counts as age zero.
pub fn deletion_options(
    message: &ChatMessage,
    local_user: &UserId,
    now: DateTime<Utc>,
    for_everyone_window: Duration,
) -> DeletionOptions {
    if message.is_temporary || !message.is_from(local_user) {
        return DeletionOptions::default();
    }
    let age = now
        .signed_duration_since(message.created_at)
        .to_std()
        .unwrap_or(Duration::ZERO);
    DeletionOptions {
        for_me: true,
        for_everyone: age < for_everyone_window,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as Age;
    use parley_chat_types::{CorrelationId, MessageBody, MessageId, Participant};

    const WINDOW: Duration = Duration::from_secs(120);

    fn own_message(created_at: DateTime<Utc>) -> ChatMessage {
        ChatMessage {
            id: MessageId::new("m1"),
            sender: Participant::id_only(UserId::new("alice")),
            receiver: Participant::id_only(UserId::new("bob")),
            body: MessageBody::Text {
                content: "hello".into(),
            },
            created_at,
            is_read: false,
            read_at: None,
            reactions: Vec::new(),
            is_temporary: false,
            correlation: None,
        }
    }

    #[test]
    fn recent_message_offers_both() {
        let now = Utc::now();
        let msg = own_message(now - Age::seconds(30));
        let options = deletion_options(&msg, &UserId::new("alice"), now, WINDOW);
        assert_eq!(
            options,
            DeletionOptions {
                for_me: true,
                for_everyone: true
            }
        );
    }

    #[test]
    fn old_message_offers_local_only() {
        let now = Utc::now();
        let msg = own_message(now - Age::minutes(3));
        let options = deletion_options(&msg, &UserId::new("alice"), now, WINDOW);
        assert!(options.for_me);
        assert!(!options.for_everyone);
    }

    #[test]
    fn window_boundary_is_exclusive() {
        let now = Utc::now();
        let msg = own_message(now - Age::seconds(120));
        let options = deletion_options(&msg, &UserId::new("alice"), now, WINDOW);
        assert!(!options.for_everyone);
    }

    #[test]
    fn other_users_messages_offer_nothing() {
        let now = Utc::now();
        let msg = own_message(now);
        let options = deletion_options(&msg, &UserId::new("bob"), now, WINDOW);
        assert!(!options.any());
    }

    #[test]
    fn temporary_messages_offer_nothing() {
        let now = Utc::now();
        let msg = ChatMessage::pending_text(
            CorrelationId::new(),
            UserId::new("alice"),
            UserId::new("bob"),
            "hi",
            now,
        );
        assert!(!deletion_options(&msg, &UserId::new("alice"), now, WINDOW).any());
    }

    #[test]
    fn clock_skew_counts_as_fresh() {
        let now = Utc::now();
        let msg = own_message(now + Age::seconds(10));
        assert!(deletion_options(&msg, &UserId::new("alice"), now, WINDOW).for_everyone);
    }
}
