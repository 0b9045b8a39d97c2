//! Event types for the Airwave player
//!
//! Notifications produced by the playback engine ("added to queue", "now
//! playing", track outcomes) are broadcast over an [`EventBus`]. Emission is
//! non-blocking; slow subscribers lag rather than stall playback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Player notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// A request was appended to the queue
    TrackQueued {
        request_id: Uuid,
        identifier: String,
        requested_by: String,
        /// 0-based queue position (0 = head)
        position: usize,
        timestamp: DateTime<Utc>,
    },

    /// The transcoder confirmed a valid stream for this request
    NowPlaying {
        request_id: Uuid,
        title: String,
        url: String,
        timestamp: DateTime<Utc>,
    },

    /// Track reached natural end of stream
    TrackFinished {
        request_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Track was skipped by the user
    TrackSkipped {
        request_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Upstream rejected the source; another attempt follows
    TrackRetrying {
        request_id: Uuid,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },

    /// Request removed from the queue without playing to completion
    TrackDropped {
        request_id: Uuid,
        reason: DropReason,
        timestamp: DateTime<Utc>,
    },

    /// No session is active any more
    PlaybackIdle {
        timestamp: DateTime<Utc>,
    },
}

/// Why a request was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// No provider could produce a playable URL
    Unresolvable,
    /// The transcoder could not be started
    StartFailed,
    /// Forbidden-source retries exhausted
    RetriesExhausted,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::Unresolvable => write!(f, "unresolvable"),
            DropReason::StartFailed => write!(f, "start failed"),
            DropReason::RetriesExhausted => write!(f, "retries exhausted"),
        }
    }
}

impl PlayerEvent {
    /// Request this event refers to, if any
    pub fn request_id(&self) -> Option<Uuid> {
        match self {
            PlayerEvent::TrackQueued { request_id, .. }
            | PlayerEvent::NowPlaying { request_id, .. }
            | PlayerEvent::TrackFinished { request_id, .. }
            | PlayerEvent::TrackSkipped { request_id, .. }
            | PlayerEvent::TrackRetrying { request_id, .. }
            | PlayerEvent::TrackDropped { request_id, .. } => Some(*request_id),
            PlayerEvent::PlaybackIdle { .. } => None,
        }
    }
}

/// Central event distribution bus
///
/// Wraps `tokio::broadcast`:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use airwave_common::events::{EventBus, PlayerEvent};
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
///
/// bus.emit_lossy(PlayerEvent::PlaybackIdle { timestamp: chrono::Utc::now() });
/// assert!(matches!(rx.try_recv(), Ok(PlayerEvent::PlaybackIdle { .. })));
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered before the oldest are
    /// dropped for lagging subscribers.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }
}
