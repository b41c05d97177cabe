//! Onboarding system: the deposit registration conversation.
//!
//! A user is walked through fixed steps: email, investment interest,
//! currency, deposit amount and transaction hash. The `ConversationMachine`
//! decides each transition; the `OnboardingManager` ties it to the session
//! store so that every inbound message yields exactly one reply.

pub mod catalog;
pub mod machine;
pub mod manager;
pub mod model;
pub mod prompts;
pub mod routes;
pub mod state;

pub use catalog::{Currency, CurrencyCatalog};
pub use machine::{ConversationMachine, Input, Transition};
pub use manager::{OnboardingManager, OnboardingStatus};
pub use model::{Answers, Session};
pub use routes::{OnboardingRouteState, onboarding_routes};
pub use state::OnboardingState;
