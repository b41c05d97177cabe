//! OnboardingManager — routes inbound messages through the session store
//! and the conversation machine.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::channels::{IncomingMessage, OutgoingResponse};
use crate::error::StoreError;
use crate::store::SessionStore;

use super::machine::ConversationMachine;
use super::state::OnboardingState;

/// Coordinates one onboarding step per inbound message: lock the session,
/// load it, run the machine, then persist or clear the result.
pub struct OnboardingManager {
    store: Arc<dyn SessionStore>,
    machine: Arc<ConversationMachine>,
}

impl OnboardingManager {
    pub fn new(store: Arc<dyn SessionStore>, machine: Arc<ConversationMachine>) -> Self {
        Self { store, machine }
    }

    /// Handle one inbound message.
    ///
    /// Returns the reply to send, or `None` when the session store failed.
    /// In that case nothing was persisted and the previously stored state
    /// stays authoritative for the next event.
    pub async fn handle(&self, message: &IncomingMessage) -> Option<OutgoingResponse> {
        let session_id = message.session_key();
        match self.process(&session_id, &message.content).await {
            Ok(reply) => Some(reply),
            Err(e) => {
                tracing::error!(
                    session_id = %session_id,
                    channel = %message.channel,
                    error = %e,
                    "Session store failed; dropping event without reply"
                );
                None
            }
        }
    }

    async fn process(&self, session_id: &str, text: &str) -> Result<OutgoingResponse, StoreError> {
        let _guard = self.store.lock(session_id).await;

        let session = self.store.get(session_id).await?;
        let from = session.state;

        let transition = self.machine.handle(session, text).await;

        if transition.is_terminal() {
            self.store.clear(session_id).await?;
        } else {
            self.store.save(&transition.session).await?;
        }

        tracing::debug!(
            session_id,
            from = %from,
            to = %transition.session.state,
            "Onboarding step handled"
        );

        Ok(transition.reply)
    }

    /// Whether handling `message` will likely wait on an external service.
    ///
    /// Read without the session lock; only used to show a typing indicator.
    pub async fn may_be_slow(&self, message: &IncomingMessage) -> bool {
        match self.store.get(&message.session_key()).await {
            Ok(session) => ConversationMachine::needs_service(session.state, &message.content),
            Err(_) => false,
        }
    }

    /// Current onboarding status (for the REST endpoint).
    pub async fn get_status(&self) -> Result<OnboardingStatus, StoreError> {
        let sessions = self.store.snapshot().await?;
        // Every open step is listed, even with no sessions in it.
        let mut by_state: BTreeMap<String, usize> = OnboardingState::ALL
            .iter()
            .filter(|state| !state.is_terminal())
            .map(|state| (state.to_string(), 0))
            .collect();
        for session in &sessions {
            *by_state.entry(session.state.to_string()).or_insert(0) += 1;
        }
        Ok(OnboardingStatus {
            active_sessions: sessions.len(),
            by_state,
            currencies: self.machine.catalog().codes().map(String::from).collect(),
        })
    }
}

/// Onboarding status returned by the REST endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct OnboardingStatus {
    pub active_sessions: usize,
    pub by_state: BTreeMap<String, usize>,
    pub currencies: Vec<String>,
}
