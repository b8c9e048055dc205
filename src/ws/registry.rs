//! Session registry and lifecycle state.
//!
//! The registry is the only structure touched by multiple connections at
//! once; all of its mutations go through a single mutex so the "one session
//! per user" and "max N sessions" invariants hold atomically. Everything
//! else a session owns lives inside that session's own tasks.

use crate::ws::protocol::SessionStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Lifecycle of one bridged session. Transitions only move forward.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Initializing,
            1 => SessionState::Active,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// One end-to-end conversation between a client connection and an upstream
/// conversation. Cancelling `cancel` is the session-wide shutdown signal:
/// both listener tasks observe it within one suspension cycle.
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    /// Registry insertion sequence; drives oldest-first eviction.
    seq: u64,
    state: AtomicU8,
    pub cancel: CancellationToken,
}

impl Session {
    fn new(user_id: &str, seq: u64) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        let session_id = format!(
            "auto_voice_{}_{}_{}",
            user_id,
            Utc::now().timestamp(),
            &suffix[..8]
        );
        Self {
            session_id,
            user_id: user_id.to_string(),
            created_at: Utc::now(),
            seq,
            state: AtomicU8::new(SessionState::Initializing as u8),
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Applies a forward transition. Returns false when `next` is not ahead
    /// of the current state; re-entering `Closed` is a permitted no-op.
    pub fn advance(&self, next: SessionState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if next as u8 == current {
                return next == SessionState::Closed;
            }
            if (next as u8) < current {
                return false;
            }
            match self.state.compare_exchange(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            state: self.state(),
            created_at: self.created_at,
        }
    }
}

struct Inner {
    sessions: HashMap<String, Arc<Session>>,
    by_user: HashMap<String, String>,
    next_seq: u64,
}

/// Concurrency-safe map of active sessions with a capacity/eviction policy.
pub struct SessionRegistry {
    max_sessions: usize,
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            max_sessions,
            inner: Mutex::new(Inner {
                sessions: HashMap::new(),
                by_user: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Allocates and registers a new session for `user_id`.
    ///
    /// Any prior session for the same user is evicted first, then the
    /// globally oldest sessions until the capacity bound holds. Evicted
    /// sessions are cancelled; their own drivers run the Closing sequence
    /// and emit `session_stopped` to their clients.
    pub async fn create(&self, user_id: &str) -> Arc<Session> {
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.by_user.get(user_id).cloned() {
            debug!(user_id, session_id = %existing, "evicting prior session for user");
            Self::evict(&mut inner, &existing);
        }

        while inner.sessions.len() >= self.max_sessions {
            let oldest = inner
                .sessions
                .values()
                .min_by_key(|s| s.seq)
                .map(|s| s.session_id.clone());
            let Some(session_id) = oldest else { break };
            info!(%session_id, "session capacity reached, evicting oldest");
            Self::evict(&mut inner, &session_id);
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let session = Arc::new(Session::new(user_id, seq));
        inner
            .sessions
            .insert(session.session_id.clone(), session.clone());
        inner
            .by_user
            .insert(user_id.to_string(), session.session_id.clone());
        session
    }

    fn evict(inner: &mut Inner, session_id: &str) {
        if let Some(session) = inner.sessions.remove(session_id) {
            if inner
                .by_user
                .get(&session.user_id)
                .is_some_and(|id| id == session_id)
            {
                inner.by_user.remove(&session.user_id);
            }
            session.cancel.cancel();
        }
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.inner.lock().await.sessions.get(session_id).cloned()
    }

    /// Removes a session from both maps. Idempotent: a second call for the
    /// same id is a no-op and returns false.
    pub async fn remove(&self, session_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.sessions.remove(session_id) {
            Some(session) => {
                if inner
                    .by_user
                    .get(&session.user_id)
                    .is_some_and(|id| id == session_id)
                {
                    inner.by_user.remove(&session.user_id);
                }
                true
            }
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    /// Cancels every live session. Used on server shutdown.
    pub async fn close_all(&self) {
        let mut inner = self.inner.lock().await;
        info!(count = inner.sessions.len(), "closing all sessions");
        for session in inner.sessions.values() {
            session.cancel.cancel();
        }
        inner.sessions.clear();
        inner.by_user.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_registers_session_in_initializing_state() {
        let registry = SessionRegistry::new(10);
        let session = registry.create("alice").await;

        assert_eq!(session.user_id, "alice");
        assert!(session.session_id.starts_with("auto_voice_alice_"));
        assert_eq!(session.state(), SessionState::Initializing);
        assert!(!session.cancel.is_cancelled());
        assert_eq!(registry.len().await, 1);
        assert!(registry.get(&session.session_id).await.is_some());
    }

    #[tokio::test]
    async fn second_session_for_user_evicts_first() {
        let registry = SessionRegistry::new(10);
        let first = registry.create("alice").await;
        let second = registry.create("alice").await;

        assert_ne!(first.session_id, second.session_id);
        assert!(first.cancel.is_cancelled());
        assert!(!second.cancel.is_cancelled());
        assert!(registry.get(&first.session_id).await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn capacity_evicts_globally_oldest() {
        let registry = SessionRegistry::new(10);
        let mut sessions = Vec::new();
        for i in 0..10 {
            sessions.push(registry.create(&format!("user-{i}")).await);
        }
        assert_eq!(registry.len().await, 10);

        let newest = registry.create("user-10").await;

        assert_eq!(registry.len().await, 10);
        assert!(sessions[0].cancel.is_cancelled());
        assert!(registry.get(&sessions[0].session_id).await.is_none());
        assert!(registry.get(&newest.session_id).await.is_some());
        for survivor in &sessions[1..] {
            assert!(!survivor.cancel.is_cancelled());
        }
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = SessionRegistry::new(10);
        let session = registry.create("alice").await;

        assert!(registry.remove(&session.session_id).await);
        assert!(!registry.remove(&session.session_id).await);
        assert!(registry.get(&session.session_id).await.is_none());
        assert_eq!(registry.len().await, 0);

        // The user slot is free again.
        let replacement = registry.create("alice").await;
        assert!(!replacement.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn states_only_move_forward() {
        let registry = SessionRegistry::new(10);
        let session = registry.create("alice").await;

        assert_eq!(session.state(), SessionState::Initializing);
        assert!(session.advance(SessionState::Active));
        assert!(!session.advance(SessionState::Initializing));
        assert_eq!(session.state(), SessionState::Active);
        assert!(session.advance(SessionState::Closing));
        assert!(!session.advance(SessionState::Active));
        assert!(session.advance(SessionState::Closed));
        // Closed is terminal and idempotent to re-enter.
        assert!(session.advance(SessionState::Closed));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn skipping_ahead_is_allowed() {
        let registry = SessionRegistry::new(10);
        let session = registry.create("alice").await;

        // A handshake failure goes straight from Initializing to Closing.
        assert!(session.advance(SessionState::Closing));
        assert_eq!(session.state(), SessionState::Closing);
    }

    #[tokio::test]
    async fn status_snapshot_reflects_session() {
        let registry = SessionRegistry::new(10);
        let session = registry.create("alice").await;
        session.advance(SessionState::Active);

        let status = session.status();
        assert_eq!(status.session_id, session.session_id);
        assert_eq!(status.user_id, "alice");
        assert_eq!(status.state, SessionState::Active);
    }

    #[tokio::test]
    async fn close_all_cancels_everything() {
        let registry = SessionRegistry::new(10);
        let a = registry.create("alice").await;
        let b = registry.create("bob").await;

        registry.close_all().await;

        assert!(a.cancel.is_cancelled());
        assert!(b.cancel.is_cancelled());
        assert_eq!(registry.len().await, 0);
    }
}
