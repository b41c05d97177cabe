//! In-memory session store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::debug;

use super::traits::{SessionGuard, SessionStore};
use crate::error::StoreError;
use crate::onboarding::Session;

/// Idle lock entries are pruned once the table grows past this size.
const LOCK_TABLE_PRUNE_THRESHOLD: usize = 1024;

/// Sessions held in process memory. Lost on restart.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn key_lock(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        // A poisoned table only means another thread panicked mid-update;
        // the map itself is still consistent.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);

        let lock = Arc::clone(locks.entry(session_id.to_string()).or_default());

        if locks.len() > LOCK_TABLE_PRUNE_THRESHOLD {
            // An entry only the table references has no holder and no waiter.
            let before = locks.len();
            locks.retain(|_, m| Arc::strong_count(m) > 1);
            debug!(pruned = before - locks.len(), "Pruned idle session locks");
        }

        lock
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn lock(&self, session_id: &str) -> SessionGuard {
        self.key_lock(session_id).lock_owned().await
    }

    async fn get(&self, session_id: &str) -> Result<Session, StoreError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .cloned()
            .unwrap_or_else(|| Session::new(session_id)))
    }

    async fn save(&self, session: &Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id);
        Ok(())
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.sessions.read().await.len())
    }

    async fn snapshot(&self) -> Result<Vec<Session>, StoreError> {
        Ok(self.sessions.read().await.values().cloned().collect())
    }
}
