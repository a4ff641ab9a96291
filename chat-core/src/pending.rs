//! Outstanding sends awaiting server confirmation.
//!
//! Every `send_message` carries a [`CorrelationId`]. The token stays here,
//! in send order, until the matching `message_sent` arrives:
//! - a confirmation that echoes the token resolves exactly that send
//! - a confirmation without a token resolves the oldest outstanding send
//!
//! The tracker is bounded so a server that never confirms cannot grow it
//! without limit.

use std::collections::VecDeque;
use parley_chat_types::CorrelationId;

/// Error type for pending-send operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingError {
    /// Too many unconfirmed sends.
    Full {
        /// Configured capacity.
        capacity: usize,
    },
}

impl std::fmt::Display for PendingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PendingError::Full { capacity } => {
                write!(f, "too many unconfirmed sends (capacity: {})", capacity)
            }
        }
    }
}

impl std::error::Error for PendingError {}

/// Send-ordered set of unconfirmed correlation tokens.
#[derive(Debug)]
pub struct PendingSends {
    max_size: usize,
    order: VecDeque<CorrelationId>,
}

impl PendingSends {
    /// Create a tracker holding at most `max_size` tokens.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            order: VecDeque::new(),
        }
    }

    /// Record a new send.
    pub fn enqueue(&mut self, token: CorrelationId) -> Result<(), PendingError> {
        if self.order.len() >= self.max_size {
            return Err(PendingError::Full {
                capacity: self.max_size,
            });
        }
        self.order.push_back(token);
        Ok(())
    }

    /// Resolve a confirmation.
    ///
    /// With `Some(token)`, removes and returns that token if outstanding.
    /// With `None`, removes and returns the oldest outstanding token.
    pub fn resolve(&mut self, token: Option<&CorrelationId>) -> Option<CorrelationId> {
        match token {
            Some(token) => {
                let pos = self.order.iter().position(|t| t == token)?;
                self.order.remove(pos)
            }
            None => self.order.pop_front(),
        }
    }

    /// Drop a token without a confirmation (the send failed).
    pub fn forget(&mut self, token: &CorrelationId) {
        self.order.retain(|t| t != token);
    }

    /// Whether `token` is still awaiting confirmation.
    pub fn is_pending(&self, token: &CorrelationId) -> bool {
        self.order.contains(token)
    }

    /// Number of outstanding sends.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Forget everything (conversation switched).
    pub fn clear(&mut self) {
        self.order.clear();
    }
}
