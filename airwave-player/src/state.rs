//! Player state
//!
//! The single mutable record shared by the orchestrator entry points: current
//! action, the nested stop/skip cancellation scopes and the registered
//! disconnect callback. Owned by [`crate::playback::PlaybackOrchestrator`]
//! behind one lock and only mutated there.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What the player is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerAction {
    Idle,
    Playing,
}

impl std::fmt::Display for PlayerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerAction::Idle => write!(f, "idle"),
            PlayerAction::Playing => write!(f, "playing"),
        }
    }
}

/// Invoked once when the player leaves the outgoing channel
pub type DisconnectCallback = Box<dyn FnOnce() + Send + 'static>;

/// Read-only view of [`PlayerState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlayerSnapshot {
    pub action: PlayerAction,
    pub has_stop_scope: bool,
    pub has_skip_scope: bool,
    pub current_request: Option<Uuid>,
    pub has_disconnect_callback: bool,
}

/// Handle a playback session keeps for its own lifetime
#[derive(Debug, Clone)]
pub(crate) struct SessionScope {
    pub id: u64,
    pub stop: CancellationToken,
}

/// Everything removed from the state by [`PlayerState::clear`]
pub(crate) struct ClearedState {
    pub disconnect: Option<DisconnectCallback>,
    pub stop_scope: Option<CancellationToken>,
    pub skip_scope: Option<CancellationToken>,
}

/// Shared mutable player record
pub struct PlayerState {
    action: PlayerAction,

    /// Outer scope: cancelled by Stop, ends the whole session
    stop_scope: Option<CancellationToken>,

    /// Inner scope, always a child of `stop_scope`: cancelled by Skip
    skip_scope: Option<CancellationToken>,

    /// Request the session is currently serving
    current_request: Option<Uuid>,

    disconnect: Option<DisconnectCallback>,

    /// Incremented per session so a finished session can't clobber a newer one
    session: u64,
}

impl PlayerState {
    pub fn new() -> Self {
        Self {
            action: PlayerAction::Idle,
            stop_scope: None,
            skip_scope: None,
            current_request: None,
            disconnect: None,
            session: 0,
        }
    }

    pub fn action(&self) -> PlayerAction {
        self.action
    }

    pub fn is_playing(&self) -> bool {
        self.action == PlayerAction::Playing
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            action: self.action,
            has_stop_scope: self.stop_scope.is_some(),
            has_skip_scope: self.skip_scope.is_some(),
            current_request: self.current_request,
            has_disconnect_callback: self.disconnect.is_some(),
        }
    }

    pub fn register_disconnect(&mut self, callback: DisconnectCallback) {
        self.disconnect = Some(callback);
    }

    /// Enter Playing: reuse or create the stop scope, create a skip scope under it
    pub(crate) fn begin_session(&mut self) -> SessionScope {
        let stop = self
            .stop_scope
            .get_or_insert_with(CancellationToken::new)
            .clone();
        self.skip_scope = Some(stop.child_token());
        self.action = PlayerAction::Playing;
        self.current_request = None;
        self.session += 1;

        SessionScope { id: self.session, stop }
    }

    /// True while `id` is the live session
    pub(crate) fn is_session(&self, id: u64) -> bool {
        self.session == id && self.is_playing()
    }

    /// Skip scope for the next track of session `id`
    ///
    /// A cancelled (skipped) scope is replaced with a fresh child of the stop
    /// scope. Returns `None` when the session is no longer live.
    pub(crate) fn skip_scope_for(&mut self, id: u64, request_id: Uuid) -> Option<CancellationToken> {
        if !self.is_session(id) {
            return None;
        }
        let stop = self.stop_scope.as_ref()?;
        if stop.is_cancelled() {
            return None;
        }

        let skip = match &self.skip_scope {
            Some(skip) if !skip.is_cancelled() => skip.clone(),
            _ => {
                let fresh = stop.child_token();
                self.skip_scope = Some(fresh.clone());
                fresh
            }
        };
        self.current_request = Some(request_id);
        Some(skip)
    }

    /// Cancel the skip scope only; the stop scope is untouched
    ///
    /// Returns the request that was being served. With no request in progress
    /// nothing is cancelled.
    pub(crate) fn skip_current(&mut self) -> Option<Uuid> {
        let request_id = self.current_request.take()?;
        if let Some(skip) = &self.skip_scope {
            skip.cancel();
        }
        Some(request_id)
    }

    /// Forget `request_id` as the track in progress once it has left the queue
    pub(crate) fn finish_current(&mut self, request_id: Uuid) {
        if self.current_request == Some(request_id) {
            self.current_request = None;
        }
    }

    /// Return to Idle, handing back scopes and callback for disposal
    pub(crate) fn clear(&mut self) -> ClearedState {
        self.action = PlayerAction::Idle;
        self.current_request = None;
        ClearedState {
            disconnect: self.disconnect.take(),
            stop_scope: self.stop_scope.take(),
            skip_scope: self.skip_scope.take(),
        }
    }
}

impl Default for PlayerState {
    fn default() -> Self {
        Self::new()
    }
}
