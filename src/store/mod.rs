//! Session storage: per-user onboarding state, serialized per key.

pub mod memory;
pub mod traits;

pub use memory::InMemorySessionStore;
pub use traits::{SessionGuard, SessionStore};
