//! Message synchronizer.
//!
//! Owns the [`ConversationWindow`] and performs the history I/O it asks
//! for. The window lock is never held across an API await: a second
//! `load_older_messages` issued while the first is in flight sees the
//! window's in-flight flag and returns immediately.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parley_chat_core::{
    deletion_options, AudioClip, Confirmation, ConversationWindow, DeletionOptions, StagedSend,
};
use parley_chat_types::{
    ChatMessage, CorrelationId, MessageConfirmation, MessageId, MessageRef, OutboundEvent,
    ReactionAdded, ReactionRemoved, ReadReceipt, UserId,
};
use tokio::sync::Mutex;

use crate::api::ConversationApi;
use crate::error::ClientError;

/// Published view of the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Selected peer.
    pub peer: Option<UserId>,
    /// Loaded messages, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Whether older history may exist.
    pub has_more: bool,
    /// Whether a page fetch is in flight.
    pub loading: bool,
}

/// Keeps one conversation window in sync with the server.
pub struct MessageSynchronizer<A: ConversationApi> {
    api: A,
    window: Mutex<ConversationWindow>,
    for_everyone_window: Duration,
}

impl<A: ConversationApi> MessageSynchronizer<A> {
    /// Create a synchronizer for `local_user`.
    pub fn new(
        api: A,
        local_user: UserId,
        page_size: usize,
        max_pending_sends: usize,
        for_everyone_window: Duration,
    ) -> Self {
        Self {
            api,
            window: Mutex::new(ConversationWindow::new(
                local_user,
                page_size,
                max_pending_sends,
            )),
            for_everyone_window,
        }
    }

    /// The history API.
    pub fn api(&self) -> &A {
        &self.api
    }

    // ===========================================
    // Pagination
    // ===========================================

    /// Switch to `peer` and load its newest page.
    ///
    /// Returns `false` if another peer was selected before the page
    /// arrived; the page is then discarded.
    pub async fn select_conversation(&self, peer: UserId) -> Result<bool, ClientError> {
        let request = self.window.lock().await.select(peer);
        tracing::debug!(peer = %request.peer, "conversation selected");

        match self.api.fetch_page(&request).await {
            Ok(page) => {
                let applied = self
                    .window
                    .lock()
                    .await
                    .apply_latest_page(&request.peer, page);
                if !applied {
                    tracing::debug!(peer = %request.peer, "discarding page for deselected peer");
                }
                Ok(applied)
            }
            Err(e) => {
                self.window.lock().await.fail_load(&request.peer);
                Err(e.into())
            }
        }
    }

    /// Load the page before the cursor. Returns how many messages were
    /// added; 0 when there was nothing to do.
    pub async fn load_older_messages(&self) -> Result<usize, ClientError> {
        let Some(request) = self.window.lock().await.begin_load_older() else {
            return Ok(0);
        };

        match self.api.fetch_page(&request).await {
            Ok(page) => {
                let added = self
                    .window
                    .lock()
                    .await
                    .complete_load_older(&request.peer, page);
                tracing::debug!(peer = %request.peer, added, "older messages loaded");
                Ok(added)
            }
            Err(e) => {
                self.window.lock().await.fail_load(&request.peer);
                Err(e.into())
            }
        }
    }

    /// Take the one-shot "scroll to latest" flag.
    pub async fn take_scroll_to_latest(&self) -> bool {
        self.window.lock().await.take_scroll_to_latest()
    }

    // ===========================================
    // Sends
    // ===========================================

    /// Stage an optimistic text message. `None` for blank content or no
    /// selected conversation.
    pub async fn stage_text(
        &self,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<StagedSend>, ClientError> {
        Ok(self.window.lock().await.stage_text(content, now)?)
    }

    /// Stage an optimistic audio message.
    pub async fn stage_audio(
        &self,
        clip: &AudioClip,
        now: DateTime<Utc>,
    ) -> Result<Option<StagedSend>, ClientError> {
        Ok(self.window.lock().await.stage_audio(clip, now)?)
    }

    /// Drop a staged send that could not be emitted.
    pub async fn abandon(&self, token: &CorrelationId) {
        self.window.lock().await.abandon(token);
    }

    /// Number of sends awaiting confirmation.
    pub async fn pending_sends(&self) -> usize {
        self.window.lock().await.pending_sends()
    }

    // ===========================================
    // Server events
    // ===========================================

    /// Apply a `message_sent` confirmation.
    pub async fn on_message_confirmed(&self, confirmation: MessageConfirmation) -> Confirmation {
        let token = confirmation.correlation();
        let outcome = self
            .window
            .lock()
            .await
            .confirm(token, confirmation.message);
        tracing::debug!(?outcome, "send confirmed");
        outcome
    }

    /// Apply a `new_message` push.
    pub async fn on_remote_message(&self, message: ChatMessage) -> bool {
        self.window.lock().await.insert_remote(message)
    }

    /// Apply a `reaction_added` push.
    pub async fn on_reaction_added(&self, event: ReactionAdded) -> bool {
        self.window
            .lock()
            .await
            .add_reaction(&event.message_id, event.reaction)
    }

    /// Apply a `reaction_removed` push.
    pub async fn on_reaction_removed(&self, event: ReactionRemoved) -> bool {
        self.window
            .lock()
            .await
            .remove_reaction(&event.message_id, &event.user_id, &event.emoji)
    }

    /// Apply a `message_read` push.
    pub async fn on_message_read(&self, receipt: ReadReceipt) -> bool {
        self.window
            .lock()
            .await
            .mark_read(&receipt.message_id, receipt.read_at)
    }

    /// Apply a `message_deleted` push.
    pub async fn on_message_deleted(&self, deleted: MessageRef) -> bool {
        self.window
            .lock()
            .await
            .remove(&deleted.message_id)
            .is_some()
    }

    /// `mark_as_read` frames for every newly visible unread message.
    pub async fn unacknowledged_reads(&self) -> Vec<OutboundEvent> {
        self.window.lock().await.unacknowledged_reads()
    }

    // ===========================================
    // Reactions and deletion
    // ===========================================

    /// Toggle the local user's `emoji` on message `id`.
    pub async fn toggle_reaction(&self, id: &MessageId, emoji: &str) -> Result<(), ClientError> {
        if !self.window.lock().await.contains(id) {
            return Err(ClientError::UnknownMessage(id.clone()));
        }
        let reactions = self.api.toggle_reaction(id, emoji).await?;
        self.window.lock().await.set_reactions(id, reactions);
        Ok(())
    }

    /// Which deletions the local user may perform on `id` at `now`.
    pub async fn deletion_options(
        &self,
        id: &MessageId,
        now: DateTime<Utc>,
    ) -> Option<DeletionOptions> {
        let window = self.window.lock().await;
        let message = window.get(id)?;
        Some(deletion_options(
            message,
            window.local_user(),
            now,
            self.for_everyone_window,
        ))
    }

    /// Delete message `id`. Removed from the window only once the server
    /// agrees.
    ///
    /// Refused unless [`deletion_options`](Self::deletion_options) at `now`
    /// offers the requested kind of deletion.
    pub async fn delete_message(
        &self,
        id: &MessageId,
        for_everyone: bool,
        now: DateTime<Utc>,
    ) -> Result<(), ClientError> {
        {
            let mut window = self.window.lock().await;
            let Some(message) = window.get(id) else {
                return Err(ClientError::UnknownMessage(id.clone()));
            };
            let options =
                deletion_options(message, window.local_user(), now, self.for_everyone_window);
            let allowed = if for_everyone {
                options.for_everyone
            } else {
                options.for_me
            };
            if !allowed {
                return Err(ClientError::DeletionNotAllowed(id.clone()));
            }
            if !window.begin_delete(id) {
                return Err(ClientError::DeletionPending(id.clone()));
            }
        }

        let result = self.api.delete_message(id, for_everyone).await;
        self.window
            .lock()
            .await
            .finish_delete(id, result.is_ok());
        if let Err(e) = &result {
            tracing::warn!(%id, error = %e, "delete failed");
        }
        Ok(result?)
    }

    // ===========================================
    // Accessors
    // ===========================================

    /// Copy of the published window state.
    pub async fn snapshot(&self) -> WindowSnapshot {
        let window = self.window.lock().await;
        WindowSnapshot {
            peer: window.peer().cloned(),
            messages: window.messages().to_vec(),
            has_more: window.has_more(),
            loading: window.is_loading(),
        }
    }

    /// Selected peer.
    pub async fn peer(&self) -> Option<UserId> {
        self.window.lock().await.peer().cloned()
    }

    /// Copy of one message.
    pub async fn message(&self, id: &MessageId) -> Option<ChatMessage> {
        self.window.lock().await.get(id).cloned()
    }
}

impl<A: ConversationApi> std::fmt::Debug for MessageSynchronizer<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSynchronizer")
            .field("for_everyone_window", &self.for_everyone_window)
            .finish_non_exhaustive()
    }
}
