//! Session and answer data models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::state::OnboardingState;

/// Answers collected so far in one conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Currency code, set once the user picked a catalog entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto: Option<String>,
    /// Deposit amount, set once it cleared the minimum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
}

impl Answers {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.crypto.is_none() && self.amount.is_none()
    }
}

/// One user's in-progress onboarding conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Stable identifier of the chat participant.
    pub session_id: String,
    pub state: OnboardingState,
    pub answers: Answers,
    /// Unverified transaction hashes submitted in the current attempt.
    pub verification_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// A fresh session at the entry state.
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            state: OnboardingState::default(),
            answers: Answers::default(),
            verification_attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Discard all progress and go back to the entry state.
    pub fn reset(&mut self) {
        self.state = OnboardingState::AwaitingEmail;
        self.answers = Answers::default();
        self.verification_attempts = 0;
        self.touch();
    }

    /// Move to `target`, bumping `updated_at`.
    ///
    /// Only valid forward transitions are applied; anything else is logged
    /// and ignored so the session never lands in an unreachable state.
    pub fn advance_to(&mut self, target: OnboardingState) -> bool {
        if !self.state.can_transition_to(target) {
            tracing::warn!(
                session_id = %self.session_id,
                from = %self.state,
                to = %target,
                "Rejected invalid onboarding transition"
            );
            return false;
        }
        self.state = target;
        self.touch();
        true
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
