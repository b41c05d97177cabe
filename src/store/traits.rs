//! The `SessionStore` trait.

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use crate::error::StoreError;
use crate::onboarding::Session;

/// Held while one event for a session is being processed.
///
/// Dropping the guard lets the next event for the same session proceed.
pub type SessionGuard = OwnedMutexGuard<()>;

/// Backend-agnostic storage for onboarding sessions.
///
/// Callers take [`SessionStore::lock`] for a session id before `get` and keep
/// the guard until after `save` / `clear`, so two events for the same user
/// never interleave. Different ids lock independently.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Acquire the per-session lock, waiting for any event already in flight.
    async fn lock(&self, session_id: &str) -> SessionGuard;

    /// Load a session, or a fresh one at the entry state if none exists.
    async fn get(&self, session_id: &str) -> Result<Session, StoreError>;

    /// Persist a session.
    async fn save(&self, session: &Session) -> Result<(), StoreError>;

    /// Remove a session. Removing an unknown id is not an error.
    async fn clear(&self, session_id: &str) -> Result<(), StoreError>;

    /// Number of stored sessions.
    async fn len(&self) -> Result<usize, StoreError>;

    /// Copy of every stored session.
    async fn snapshot(&self) -> Result<Vec<Session>, StoreError>;
}
