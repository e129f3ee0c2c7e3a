//! Per-session bookkeeping kept by the pool.

use std::time::{Duration, Instant};

/// Pool-side state of a session slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Parked in the pool and available for checkout.
    Idle,
    /// Checked out by exactly one connection.
    InUse,
}

impl SessionState {
    /// Check if the session is available for checkout.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Metadata about a pooled session.
#[derive(Debug, Clone)]
pub struct SessionMetadata {
    /// Identifier, unique within the pool and increasing in creation order.
    pub id: u64,
    /// When the session was created.
    pub created_at: Instant,
    /// When the session was last checked out or returned.
    pub last_used_at: Instant,
    /// Number of times the session has been checked out.
    pub checkout_count: u64,
    /// Current state of the session.
    pub state: SessionState,
}

impl SessionMetadata {
    /// Create metadata for a new session.
    pub fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_used_at: now,
            checkout_count: 0,
            state: SessionState::Idle,
        }
    }

    /// Check if the session has exceeded its maximum lifetime.
    #[must_use]
    pub fn is_expired(&self, max_lifetime: Duration) -> bool {
        self.created_at.elapsed() > max_lifetime
    }

    /// How long the session has been parked, or `None` while checked out.
    #[must_use]
    pub fn idle_for(&self) -> Option<Duration> {
        self.state
            .is_available()
            .then(|| self.last_used_at.elapsed())
    }

    /// Mark the session as checked out.
    pub fn mark_checkout(&mut self) {
        self.last_used_at = Instant::now();
        self.checkout_count += 1;
        self.state = SessionState::InUse;
    }

    /// Mark the session as returned to idle.
    pub fn mark_checkin(&mut self) {
        self.last_used_at = Instant::now();
        self.state = SessionState::Idle;
    }
}
