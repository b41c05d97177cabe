//! Guided crypto deposit onboarding over chat.

pub mod bot;
pub mod channels;
pub mod config;
pub mod error;
pub mod onboarding;
pub mod services;
pub mod store;
