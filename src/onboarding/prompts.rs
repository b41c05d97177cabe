//! Scripted replies for each step of the onboarding conversation.

use rust_decimal::Decimal;

use crate::channels::OutgoingResponse;

use super::catalog::CurrencyCatalog;

pub fn welcome() -> OutgoingResponse {
    OutgoingResponse::text(
        "Welcome! To get started, please enter your email address for registration.",
    )
    .remove_keyboard()
}

pub fn invalid_email() -> OutgoingResponse {
    OutgoingResponse::text("Please enter a valid email address.")
}

fn yes_no() -> Vec<Vec<String>> {
    vec![vec!["Yes".to_string(), "No".to_string()]]
}

pub fn ask_investment_interest() -> OutgoingResponse {
    OutgoingResponse::text(
        "Thank you for providing your email. Are you interested in investing?",
    )
    .with_choices(yes_no())
}

pub fn invalid_investment_interest() -> OutgoingResponse {
    OutgoingResponse::text("Please answer Yes or No. Are you interested in investing?")
        .with_choices(yes_no())
}

pub fn not_interested() -> OutgoingResponse {
    OutgoingResponse::text(
        "Thank you for your interest. If you change your mind, feel free to start over.",
    )
    .remove_keyboard()
}

pub fn choose_crypto(catalog: &CurrencyCatalog) -> OutgoingResponse {
    OutgoingResponse::text("Great! Please choose your preferred cryptocurrency for deposit:")
        .with_choices(catalog.keyboard_rows())
}

pub fn invalid_crypto(catalog: &CurrencyCatalog) -> OutgoingResponse {
    let options = catalog.codes().collect::<Vec<_>>().join(", ");
    OutgoingResponse::text(format!(
        "Please choose a valid cryptocurrency from the options provided: {options}."
    ))
    .with_choices(catalog.keyboard_rows())
}

pub fn ask_deposit_amount(crypto: &str, minimum: Decimal) -> OutgoingResponse {
    OutgoingResponse::text(format!(
        "You've chosen {crypto}. Please enter the amount you wish to deposit. \
         The current minimum deposit for {crypto} is {} {crypto}.",
        minimum.normalize()
    ))
    .remove_keyboard()
}

pub fn invalid_amount() -> OutgoingResponse {
    OutgoingResponse::text("Please enter a valid number for the deposit amount.")
}

pub fn amount_below_minimum(crypto: &str, amount: Decimal, minimum: Decimal) -> OutgoingResponse {
    OutgoingResponse::text(format!(
        "You entered {} {crypto}, but the current minimum deposit for {crypto} is {} {crypto}. \
         Please enter a higher amount.",
        amount.normalize(),
        minimum.normalize()
    ))
}

pub fn deposit_instructions(crypto: &str, amount: Decimal, address: &str) -> OutgoingResponse {
    OutgoingResponse::text(format!(
        "Great! You're depositing {} {crypto}. Send with this address {crypto}: {address}\n\n\
         After sending, please provide the transaction hash for verification.",
        amount.normalize()
    ))
}

pub fn empty_hash() -> OutgoingResponse {
    OutgoingResponse::text(
        "That doesn't look like a transaction hash. Please check it and send the hash of your deposit.",
    )
}

pub fn deposit_confirmed() -> OutgoingResponse {
    OutgoingResponse::text(
        "Your deposit has been confirmed! Our team will process your investment \
         and contact you shortly with further details.",
    )
    .remove_keyboard()
}

pub fn deposit_unverified() -> OutgoingResponse {
    OutgoingResponse::text(
        "We couldn't verify your transaction. Please check the hash and try again, \
         or contact our support team for assistance.",
    )
}

pub fn deposit_unverified_escalated(attempts: u32) -> OutgoingResponse {
    OutgoingResponse::text(format!(
        "We still couldn't verify your transaction after {attempts} attempts. \
         Please contact our support team for assistance. You can also send another hash, \
         or /cancel to stop."
    ))
}

pub fn cancelled() -> OutgoingResponse {
    OutgoingResponse::text(
        "Investment process canceled. Feel free to start over when you're ready.",
    )
    .remove_keyboard()
}

pub fn service_unavailable() -> OutgoingResponse {
    OutgoingResponse::text(
        "Sorry, something went wrong on our side. Please try again in a moment.",
    )
}

pub fn unknown_command() -> OutgoingResponse {
    OutgoingResponse::text(
        "Sorry, I don't know that command. Send /start to begin again or /cancel to stop.",
    )
}
