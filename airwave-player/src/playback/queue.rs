//! Play request queue
//!
//! FIFO of pending [`PlayRequest`]s shared between the command layer
//! (producers) and the orchestrator (consumer).
//!
//! All mutations run under one internal lock. A counting semaphore carries one
//! permit per queued item; every removal consumes a permit first, so a remover
//! can never take an item that another remover has already claimed.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;
use uuid::Uuid;

/// One queued unit of work: intent to play a specific source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayRequest {
    /// Unique request id
    pub id: Uuid,

    /// Who asked for it (display only)
    pub requested_by: String,

    /// Source identifier handed to the resolver
    pub identifier: String,

    /// Forbidden-source retries consumed so far
    pub retry_count: u32,

    pub created_at: DateTime<Utc>,
}

impl PlayRequest {
    pub fn new(requested_by: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            requested_by: requested_by.into(),
            identifier: identifier.into(),
            retry_count: 0,
            created_at: Utc::now(),
        }
    }
}

/// Thread-safe FIFO of pending play requests
pub struct PlaybackQueue {
    items: Mutex<VecDeque<PlayRequest>>,

    /// One permit per queued item
    available: Semaphore,
}

impl PlaybackQueue {
    /// Create new empty queue
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Semaphore::new(0),
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<PlayRequest>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a request and wake one waiting consumer
    ///
    /// Never blocks. Returns the 0-based position the request landed at.
    pub fn enqueue(&self, request: PlayRequest) -> usize {
        let mut items = self.items();
        items.push_back(request);
        self.available.add_permits(1);
        items.len() - 1
    }

    /// Head of the queue without removing it
    pub fn peek(&self) -> Option<PlayRequest> {
        self.items().front().cloned()
    }

    /// Remove the head only if it is still the request with `id`
    ///
    /// The only removal path. Callers name the request they peeked; a
    /// concurrent skip or completion may already have removed it, in which
    /// case nothing is removed.
    pub fn dequeue_if_head(&self, id: Uuid) -> Option<PlayRequest> {
        let mut items = self.items();
        if items.front().map(|r| r.id) != Some(id) {
            return None;
        }
        let permit = self.available.try_acquire().ok()?;
        permit.forget();
        items.pop_front().map(reset_retries)
    }

    /// Record the retry count for a queued request
    ///
    /// Returns false if the request is no longer queued.
    pub fn set_retry_count(&self, id: Uuid, retry_count: u32) -> bool {
        match self.items().iter_mut().find(|r| r.id == id) {
            Some(request) => {
                request.retry_count = retry_count;
                true
            }
            None => false,
        }
    }

    /// Reset every queued request's retry count (on disconnect)
    pub fn reset_retry_counts(&self) {
        for request in self.items().iter_mut() {
            request.retry_count = 0;
        }
    }

    /// Snapshot size; may be stale by the time the caller acts on it
    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// Stable copy of all pending requests, head first
    pub fn snapshot(&self) -> Vec<PlayRequest> {
        self.items().iter().cloned().collect()
    }
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn reset_retries(mut request: PlayRequest) -> PlayRequest {
    request.retry_count = 0;
    request
}
