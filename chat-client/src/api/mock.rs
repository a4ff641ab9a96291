//! Mock history API for testing.
//!
//! Pages, deletions and reaction toggles are answered from queues, and
//! every request is recorded. Fetches can be held at a gate so tests can
//! observe the window while a page is in flight.

use super::{ApiError, ConversationApi};
use async_trait::async_trait;
use parley_chat_core::PageRequest;
use parley_chat_types::{ChatMessage, MessageId, Reaction};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};

/// Mock history API.
#[derive(Debug, Default)]
pub struct MockApi {
    inner: Arc<Mutex<MockApiInner>>,
    fetch_started: Arc<Notify>,
}

#[derive(Debug, Default)]
struct MockApiInner {
    pages: VecDeque<Vec<ChatMessage>>,
    page_requests: Vec<PageRequest>,
    deletions: Vec<(MessageId, bool)>,
    toggles: Vec<(MessageId, String)>,
    reactions: VecDeque<Vec<Reaction>>,
    gate: Option<Arc<Semaphore>>,
    fail_next_fetch: Option<String>,
    fail_next_delete: Option<String>,
    fail_next_toggle: Option<String>,
}

impl MockApi {
    /// Create a new mock API. Unqueued fetches return an empty page.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the page returned by the next fetch.
    pub fn queue_page(&self, page: Vec<ChatMessage>) {
        self.inner.lock().unwrap().pages.push_back(page);
    }

    /// Queue the reaction list returned by the next toggle.
    pub fn queue_reactions(&self, reactions: Vec<Reaction>) {
        self.inner.lock().unwrap().reactions.push_back(reactions);
    }

    /// Every page request received so far.
    pub fn page_requests(&self) -> Vec<PageRequest> {
        self.inner.lock().unwrap().page_requests.clone()
    }

    /// Number of fetches issued.
    pub fn fetch_count(&self) -> usize {
        self.inner.lock().unwrap().page_requests.len()
    }

    /// Every deletion received so far.
    pub fn deletions(&self) -> Vec<(MessageId, bool)> {
        self.inner.lock().unwrap().deletions.clone()
    }

    /// Every reaction toggle received so far.
    pub fn toggles(&self) -> Vec<(MessageId, String)> {
        self.inner.lock().unwrap().toggles.clone()
    }

    /// Hold every fetch until [`MockApi::release_fetches`] lets it through.
    pub fn hold_fetches(&self) {
        self.inner.lock().unwrap().gate = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `n` held fetches complete.
    pub fn release_fetches(&self, n: usize) {
        if let Some(gate) = &self.inner.lock().unwrap().gate {
            gate.add_permits(n);
        }
    }

    /// Wait until at least `n` fetches have been issued.
    pub async fn wait_for_fetches(&self, n: usize) {
        while self.fetch_count() < n {
            self.fetch_started.notified().await;
        }
    }

    /// Cause the next fetch to fail.
    pub fn fail_next_fetch(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_fetch = Some(error.to_string());
    }

    /// Cause the next deletion to fail.
    pub fn fail_next_delete(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_delete = Some(error.to_string());
    }

    /// Cause the next reaction toggle to fail.
    pub fn fail_next_toggle(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_toggle = Some(error.to_string());
    }
}

impl Clone for MockApi {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            fetch_started: Arc::clone(&self.fetch_started),
        }
    }
}

#[async_trait]
impl ConversationApi for MockApi {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<ChatMessage>, ApiError> {
        let gate = {
            let mut inner = self.inner.lock().unwrap();
            inner.page_requests.push(request.clone());
            inner.gate.clone()
        };
        self.fetch_started.notify_one();

        if let Some(gate) = gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| ApiError::Request(e.to_string()))?;
            permit.forget();
        }

        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_fetch.take() {
            return Err(ApiError::Request(error));
        }
        Ok(inner.pages.pop_front().unwrap_or_default())
    }

    async fn delete_message(&self, id: &MessageId, for_everyone: bool) -> Result<(), ApiError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_delete.take() {
            return Err(ApiError::Status {
                status: 500,
                message: error,
            });
        }
        inner.deletions.push((id.clone(), for_everyone));
        Ok(())
    }

    async fn toggle_reaction(
        &self,
        id: &MessageId,
        emoji: &str,
    ) -> Result<Vec<Reaction>, ApiError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_toggle.take() {
            return Err(ApiError::Request(error));
        }
        inner.toggles.push((id.clone(), emoji.to_string()));
        Ok(inner.reactions.pop_front().unwrap_or_default())
    }
}
