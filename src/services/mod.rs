//! External collaborators of the onboarding flow.
//!
//! Both services sit behind traits so a real exchange API or blockchain
//! node client can replace the placeholders without touching the state
//! machine, and tests can inject deterministic fakes.

pub mod rates;
pub mod verifier;

pub use rates::{RateProvider, StaticRateProvider};
pub use verifier::{NonEmptyHashVerifier, TransactionVerifier};
