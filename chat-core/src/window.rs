//! The conversation window.
//!
//! A window is the loaded, contiguous-from-newest slice of one peer's
//! history. It owns:
//! - the messages, ordered by creation time, with unconfirmed sends at the tail
//! - the pagination cursor (oldest loaded timestamp) and has-more flag
//! - the in-flight flag that makes concurrent page loads no-ops
//! - the bookkeeping for optimistic sends, deletions and read receipts
//!
//! The window never performs I/O. Operations that need the network hand
//! back a [`PageRequest`] or an [`OutboundEvent`], and the caller reports
//! the outcome with the matching `complete`/`fail` method.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use parley_chat_types::{
    ChatMessage, CorrelationId, MessageId, MessageKind, MessageRef, OutboundEvent, Reaction,
    SendMessage, UserId,
};

use crate::pending::{PendingError, PendingSends};
use crate::recording::AudioClip;

/// Caption carried by audio sends in the `content` field.
const AUDIO_CAPTION: &str = "Audio message";

/// A history fetch the caller must perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Whose conversation.
    pub peer: UserId,
    /// Only messages strictly older than this. `None` for the newest page.
    pub before: Option<DateTime<Utc>>,
    /// Page size.
    pub limit: usize,
}

/// An optimistic send staged in the window.
#[derive(Debug, Clone)]
pub struct StagedSend {
    /// Token the server will echo back.
    pub token: CorrelationId,
    /// The frame to emit.
    pub event: OutboundEvent,
}

/// Outcome of a send confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// The temporary record was replaced by the server record.
    Promoted(MessageId),
    /// The server record was already present; the temporary record was dropped.
    Deduplicated(MessageId),
    /// No outstanding send matched; the record was inserted like a remote one.
    Inserted(MessageId),
    /// Nothing changed.
    Ignored,
}

/// Loaded slice of one conversation.
#[derive(Debug)]
pub struct ConversationWindow {
    local_user: UserId,
    page_size: usize,
    peer: Option<UserId>,
    messages: Vec<ChatMessage>,
    cursor: Option<DateTime<Utc>>,
    has_more: bool,
    loading: bool,
    scroll_to_latest: bool,
    pending: PendingSends,
    deleting: HashSet<MessageId>,
    acknowledged: HashSet<MessageId>,
}

impl ConversationWindow {
    /// Create an empty window for `local_user`.
    pub fn new(local_user: UserId, page_size: usize, max_pending_sends: usize) -> Self {
        Self {
            local_user,
            page_size,
            peer: None,
            messages: Vec::new(),
            cursor: None,
            has_more: true,
            loading: false,
            scroll_to_latest: false,
            pending: PendingSends::new(max_pending_sends),
            deleting: HashSet::new(),
            acknowledged: HashSet::new(),
        }
    }

    // ===========================================
    // Pagination
    // ===========================================

    /// Switch to `peer`. Clears the window and returns the newest-page fetch.
    pub fn select(&mut self, peer: UserId) -> PageRequest {
        self.messages.clear();
        self.pending.clear();
        self.deleting.clear();
        self.acknowledged.clear();
        self.cursor = None;
        self.has_more = true;
        self.loading = true;
        self.scroll_to_latest = false;
        self.peer = Some(peer.clone());
        PageRequest {
            peer,
            before: None,
            limit: self.page_size,
        }
    }

    /// Replace the window with the newest page.
    ///
    /// Returns `false` and changes nothing if `peer` is no longer selected.
    pub fn apply_latest_page(&mut self, peer: &UserId, mut page: Vec<ChatMessage>) -> bool {
        if self.peer.as_ref() != Some(peer) {
            return false;
        }
        page.sort_by_key(|m| m.created_at);
        page.dedup_by(|a, b| a.id == b.id);

        self.has_more = page.len() >= self.page_size;
        self.cursor = page.first().map(|m| m.created_at);
        self.loading = false;

        // Sends staged while the page was in flight stay at the tail.
        let staged: Vec<ChatMessage> = self
            .messages
            .drain(..)
            .filter(|m| m.is_temporary)
            .collect();
        self.messages = page;
        self.messages.extend(staged);
        self.scroll_to_latest = !self.messages.is_empty();
        true
    }

    /// Start loading the page before the cursor.
    ///
    /// Returns `None` if a load is in flight, no older page is known, no
    /// peer is selected, or no cursor exists.
    pub fn begin_load_older(&mut self) -> Option<PageRequest> {
        if self.loading || !self.has_more {
            return None;
        }
        let peer = self.peer.clone()?;
        let before = self.cursor?;
        self.loading = true;
        Some(PageRequest {
            peer,
            before: Some(before),
            limit: self.page_size,
        })
    }

    /// Prepend an older page. Returns how many messages were added.
    ///
    /// Ids already in the window are dropped. A page for a peer that is no
    /// longer selected is discarded.
    pub fn complete_load_older(&mut self, peer: &UserId, mut page: Vec<ChatMessage>) -> usize {
        if self.peer.as_ref() != Some(peer) {
            return 0;
        }
        self.loading = false;
        if page.len() < self.page_size {
            self.has_more = false;
        }
        if let Some(oldest) = page.iter().map(|m| m.created_at).min() {
            self.cursor = Some(self.cursor.map_or(oldest, |c| c.min(oldest)));
        }

        page.retain(|m| !self.contains(&m.id));
        page.sort_by_key(|m| m.created_at);
        page.dedup_by(|a, b| a.id == b.id);
        let added = page.len();
        page.append(&mut self.messages);
        self.messages = page;
        added
    }

    /// A page fetch for `peer` failed. Clears the in-flight flag.
    pub fn fail_load(&mut self, peer: &UserId) {
        if self.peer.as_ref() == Some(peer) {
            self.loading = false;
        }
    }

    /// Take the one-shot "scroll to latest" flag.
    pub fn take_scroll_to_latest(&mut self) -> bool {
        std::mem::take(&mut self.scroll_to_latest)
    }

    // ===========================================
    // Sends
    // ===========================================

    /// Stage an optimistic text message.
    ///
    /// Returns `Ok(None)` for blank content or when no peer is selected.
    pub fn stage_text(
        &mut self,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<StagedSend>, PendingError> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }
        let Some(peer) = self.peer.clone() else {
            return Ok(None);
        };
        let token = CorrelationId::new();
        self.pending.enqueue(token)?;
        self.messages.push(ChatMessage::pending_text(
            token,
            self.local_user.clone(),
            peer.clone(),
            content,
            now,
        ));
        Ok(Some(StagedSend {
            token,
            event: OutboundEvent::SendMessage(SendMessage {
                content: content.to_string(),
                receiver_id: peer,
                message_type: MessageKind::Text,
                audio_blob: None,
                client_message_id: token,
            }),
        }))
    }

    /// Stage an optimistic audio message carrying `clip`.
    pub fn stage_audio(
        &mut self,
        clip: &AudioClip,
        now: DateTime<Utc>,
    ) -> Result<Option<StagedSend>, PendingError> {
        let Some(peer) = self.peer.clone() else {
            return Ok(None);
        };
        let token = CorrelationId::new();
        self.pending.enqueue(token)?;
        self.messages.push(ChatMessage::pending_audio(
            token,
            self.local_user.clone(),
            peer.clone(),
            now,
        ));
        Ok(Some(StagedSend {
            token,
            event: OutboundEvent::SendMessage(SendMessage {
                content: AUDIO_CAPTION.to_string(),
                receiver_id: peer,
                message_type: MessageKind::Audio,
                audio_blob: Some(clip.to_base64()),
                client_message_id: token,
            }),
        }))
    }

    /// The send for `token` could not be emitted. Removes its record.
    pub fn abandon(&mut self, token: &CorrelationId) {
        self.pending.forget(token);
        self.messages
            .retain(|m| !(m.is_temporary && m.correlation.as_ref() == Some(token)));
    }

    /// Apply a `message_sent` confirmation.
    pub fn confirm(&mut self, token: Option<CorrelationId>, mut record: ChatMessage) -> Confirmation {
        let Some(token) = self.pending.resolve(token.as_ref()) else {
            let id = record.id.clone();
            return if self.insert_remote(record) {
                Confirmation::Inserted(id)
            } else {
                Confirmation::Ignored
            };
        };
        let Some(pos) = self
            .messages
            .iter()
            .position(|m| m.is_temporary && m.correlation == Some(token))
        else {
            return Confirmation::Ignored;
        };

        let id = record.id.clone();
        if self.contains(&id) {
            self.messages.remove(pos);
            return Confirmation::Deduplicated(id);
        }
        record.is_read = false;
        record.is_temporary = false;
        record.correlation = Some(token);
        self.messages[pos] = record;
        self.restore_order();
        Confirmation::Promoted(id)
    }

    /// Number of sends awaiting confirmation.
    pub fn pending_sends(&self) -> usize {
        self.pending.len()
    }

    // ===========================================
    // Remote mutations
    // ===========================================

    /// Add a message pushed by the server.
    ///
    /// Returns `false` if the id is already present or the message belongs
    /// to another conversation.
    pub fn insert_remote(&mut self, message: ChatMessage) -> bool {
        let Some(peer) = &self.peer else {
            return false;
        };
        if !message.is_between(&self.local_user, peer) || self.contains(&message.id) {
            return false;
        }
        let tail = self
            .messages
            .iter()
            .position(|m| m.is_temporary)
            .unwrap_or(self.messages.len());
        self.messages.insert(tail, message);
        true
    }

    /// Append a reaction.
    pub fn add_reaction(&mut self, id: &MessageId, reaction: Reaction) -> bool {
        match self.get_mut(id) {
            Some(msg) => {
                msg.reactions.push(reaction);
                true
            }
            None => false,
        }
    }

    /// Remove every reaction by `user` with `emoji`.
    pub fn remove_reaction(&mut self, id: &MessageId, user: &UserId, emoji: &str) -> bool {
        match self.get_mut(id) {
            Some(msg) => {
                msg.reactions
                    .retain(|r| !(&r.user_id == user && r.emoji == emoji));
                true
            }
            None => false,
        }
    }

    /// Replace the reactions of a message.
    pub fn set_reactions(&mut self, id: &MessageId, reactions: Vec<Reaction>) -> bool {
        match self.get_mut(id) {
            Some(msg) => {
                msg.reactions = reactions;
                true
            }
            None => false,
        }
    }

    /// Record a read receipt.
    pub fn mark_read(&mut self, id: &MessageId, read_at: Option<DateTime<Utc>>) -> bool {
        match self.get_mut(id) {
            Some(msg) => {
                msg.is_read = true;
                msg.read_at = read_at;
                true
            }
            None => false,
        }
    }

    /// Remove a message.
    pub fn remove(&mut self, id: &MessageId) -> Option<ChatMessage> {
        let pos = self.messages.iter().position(|m| &m.id == id)?;
        Some(self.messages.remove(pos))
    }

    // ===========================================
    // Deletion and read receipts
    // ===========================================

    /// Start deleting `id`. Returns `false` if it is unknown or a deletion
    /// for it is already pending.
    pub fn begin_delete(&mut self, id: &MessageId) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.deleting.insert(id.clone())
    }

    /// Finish a deletion. The message is removed only on success.
    pub fn finish_delete(&mut self, id: &MessageId, succeeded: bool) {
        self.deleting.remove(id);
        if succeeded {
            self.remove(id);
        }
    }

    /// Whether a deletion for `id` is pending.
    pub fn is_deleting(&self, id: &MessageId) -> bool {
        self.deleting.contains(id)
    }

    /// Confirmed messages addressed to the local user that are unread and
    /// have not been announced yet. Each id is returned at most once.
    pub fn unacknowledged_reads(&mut self) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        for msg in &self.messages {
            if msg.is_temporary || msg.is_read || msg.receiver.id != self.local_user {
                continue;
            }
            if self.acknowledged.insert(msg.id.clone()) {
                events.push(OutboundEvent::MarkAsRead(MessageRef {
                    message_id: msg.id.clone(),
                }));
            }
        }
        events
    }

    // ===========================================
    // Accessors
    // ===========================================

    /// The local user.
    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    /// Selected peer.
    pub fn peer(&self) -> Option<&UserId> {
        self.peer.as_ref()
    }

    /// Loaded messages in display order.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Look up a message.
    pub fn get(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Whether `id` is loaded.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|m| &m.id == id)
    }

    /// Oldest loaded timestamp.
    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.cursor
    }

    /// Whether an older page may exist.
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Whether a page fetch is in flight.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    fn get_mut(&mut self, id: &MessageId) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }

    /// Re-sort confirmed messages by time, keeping temporaries at the tail.
    fn restore_order(&mut self) {
        self.messages.sort_by(|a, b| {
            a.is_temporary
                .cmp(&b.is_temporary)
                .then(a.created_at.cmp(&b.created_at))
        });
    }
}
