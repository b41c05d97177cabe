//! Conversation state machine. One transition per inbound text.
//!
//! `handle` takes the session's current state and answers plus the user's
//! text and returns the updated session together with exactly one reply.
//! Every failure path (bad input, unverified hash, service error) leaves
//! `state` and captured answers untouched.

use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::channels::OutgoingResponse;
use crate::config::FlowConfig;
use crate::error::ServiceError;
use crate::services::{RateProvider, TransactionVerifier};

use super::catalog::CurrencyCatalog;
use super::model::Session;
use super::prompts;
use super::state::OnboardingState;

/// Email shape: local part, `@`, domain, `.`, tld. No whitespace, one `@`.
static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is a valid regex")
});

/// What the user sent, classified before any state-specific parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input<'a> {
    /// `start` / `/start`: unconditional reset.
    Start,
    /// `cancel` / `/cancel`: abandon the flow.
    Cancel,
    /// Any other slash command.
    UnknownCommand(&'a str),
    /// Plain text for the current step.
    Text(&'a str),
}

impl<'a> Input<'a> {
    pub fn parse(raw: &'a str) -> Self {
        let trimmed = raw.trim();
        if let Some(command) = trimmed.strip_prefix('/') {
            // Group chats address commands as `/start@botname`.
            let name = command
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .split('@')
                .next()
                .unwrap_or_default();
            return match name.to_ascii_lowercase().as_str() {
                "start" => Self::Start,
                "cancel" => Self::Cancel,
                _ => Self::UnknownCommand(trimmed),
            };
        }
        if trimmed.eq_ignore_ascii_case("start") {
            Self::Start
        } else if trimmed.eq_ignore_ascii_case("cancel") {
            Self::Cancel
        } else {
            Self::Text(raw)
        }
    }
}

/// Outcome of handling one inbound text.
#[derive(Debug, Clone)]
pub struct Transition {
    pub session: Session,
    pub reply: OutgoingResponse,
}

impl Transition {
    fn new(session: Session, reply: OutgoingResponse) -> Self {
        Self { session, reply }
    }

    /// Whether the session ended and should be removed from the store.
    pub fn is_terminal(&self) -> bool {
        self.session.state.is_terminal()
    }
}

/// The onboarding conversation.
pub struct ConversationMachine {
    catalog: Arc<CurrencyCatalog>,
    rates: Arc<dyn RateProvider>,
    verifier: Arc<dyn TransactionVerifier>,
    config: FlowConfig,
}

impl ConversationMachine {
    pub fn new(
        catalog: Arc<CurrencyCatalog>,
        rates: Arc<dyn RateProvider>,
        verifier: Arc<dyn TransactionVerifier>,
        config: FlowConfig,
    ) -> Self {
        Self {
            catalog,
            rates,
            verifier,
            config,
        }
    }

    pub fn catalog(&self) -> &CurrencyCatalog {
        &self.catalog
    }

    /// Whether handling `text` in `state` may call an external service.
    pub fn needs_service(state: OnboardingState, text: &str) -> bool {
        matches!(Input::parse(text), Input::Text(_))
            && matches!(
                state,
                OnboardingState::AwaitingCryptoChoice
                    | OnboardingState::AwaitingDepositAmount
                    | OnboardingState::AwaitingTransactionHash
            )
    }

    /// Compute the transition for one inbound text.
    pub async fn handle(&self, mut session: Session, text: &str) -> Transition {
        // A stored session never sits in a terminal state; if one slips
        // through, treat the event as first contact.
        if session.state.is_terminal() {
            session.reset();
        }

        match Input::parse(text) {
            Input::Start => {
                let had_progress = !session.answers.is_empty();
                session.reset();
                info!(session_id = %session.session_id, had_progress, "Onboarding restarted");
                Transition::new(session, prompts::welcome())
            }
            Input::Cancel => {
                info!(
                    session_id = %session.session_id,
                    state = %session.state,
                    "User canceled the conversation"
                );
                session.advance_to(OnboardingState::Cancelled);
                Transition::new(session, prompts::cancelled())
            }
            Input::UnknownCommand(command) => {
                debug!(session_id = %session.session_id, command, "Unknown command");
                Transition::new(session, prompts::unknown_command())
            }
            Input::Text(text) => match session.state {
                OnboardingState::AwaitingEmail => self.on_email(session, text),
                OnboardingState::AwaitingInvestmentInterest => self.on_interest(session, text),
                OnboardingState::AwaitingCryptoChoice => self.on_crypto(session, text).await,
                OnboardingState::AwaitingDepositAmount => self.on_amount(session, text).await,
                OnboardingState::AwaitingTransactionHash => self.on_hash(session, text).await,
                OnboardingState::Completed | OnboardingState::Cancelled => {
                    self.lost_progress(session)
                }
            },
        }
    }

    fn on_email(&self, mut session: Session, text: &str) -> Transition {
        let email = text.trim();
        if !EMAIL_PATTERN.is_match(email) {
            return Transition::new(session, prompts::invalid_email());
        }

        debug!(session_id = %session.session_id, email, "Email captured");
        session.answers.email = Some(email.to_string());
        session.advance_to(OnboardingState::AwaitingInvestmentInterest);
        Transition::new(session, prompts::ask_investment_interest())
    }

    fn on_interest(&self, mut session: Session, text: &str) -> Transition {
        let answer = text.trim().to_lowercase();
        info!(session_id = %session.session_id, answer = %answer, "Investment interest");

        match answer.as_str() {
            "yes" => {
                session.advance_to(OnboardingState::AwaitingCryptoChoice);
                Transition::new(session, prompts::choose_crypto(&self.catalog))
            }
            "no" => {
                session.advance_to(OnboardingState::Cancelled);
                Transition::new(session, prompts::not_interested())
            }
            _ => Transition::new(session, prompts::invalid_investment_interest()),
        }
    }

    async fn on_crypto(&self, mut session: Session, text: &str) -> Transition {
        let choice = text.trim();

        let minimums = match self.bounded(self.rates.name(), self.rates.minimums()).await {
            Ok(m) => m,
            Err(e) => return self.service_failure(session, &e),
        };

        // Offer only currencies we can both price and receive.
        let Some(code) = self
            .catalog
            .codes()
            .filter(|code| minimums.contains_key(*code))
            .find(|code| code.eq_ignore_ascii_case(choice))
        else {
            return Transition::new(session, prompts::invalid_crypto(&self.catalog));
        };
        let minimum = minimums[code];

        info!(session_id = %session.session_id, crypto = code, "Crypto choice");
        session.answers.crypto = Some(code.to_string());
        session.advance_to(OnboardingState::AwaitingDepositAmount);
        Transition::new(session, prompts::ask_deposit_amount(code, minimum))
    }

    async fn on_amount(&self, mut session: Session, text: &str) -> Transition {
        let Some(crypto) = session.answers.crypto.clone() else {
            return self.lost_progress(session);
        };

        let Some(amount) = parse_amount(text) else {
            return Transition::new(session, prompts::invalid_amount());
        };

        // Rates may have moved since the currency was chosen.
        let minimum = match self.bounded(self.rates.name(), self.rates.minimum(&crypto)).await {
            Ok(m) => m,
            Err(e) => return self.service_failure(session, &e),
        };

        if amount < minimum {
            return Transition::new(
                session,
                prompts::amount_below_minimum(&crypto, amount, minimum),
            );
        }

        let Some(address) = self.catalog.address(&crypto) else {
            warn!(
                session_id = %session.session_id,
                crypto = %crypto,
                "Chosen currency missing from catalog"
            );
            return Transition::new(session, prompts::service_unavailable());
        };

        info!(
            session_id = %session.session_id,
            crypto = %crypto,
            amount = %amount,
            "Deposit amount"
        );
        session.answers.amount = Some(amount);
        session.advance_to(OnboardingState::AwaitingTransactionHash);
        Transition::new(session, prompts::deposit_instructions(&crypto, amount, address))
    }

    async fn on_hash(&self, mut session: Session, text: &str) -> Transition {
        let (Some(crypto), Some(amount)) =
            (session.answers.crypto.clone(), session.answers.amount)
        else {
            return self.lost_progress(session);
        };

        let hash = text.trim();
        if hash.is_empty() {
            return Transition::new(session, prompts::empty_hash());
        }

        info!(session_id = %session.session_id, hash, "Transaction hash received");

        let verified = match self
            .bounded(
                self.verifier.name(),
                self.verifier.verify(&crypto, amount, hash),
            )
            .await
        {
            Ok(verified) => verified,
            // A verifier that never answers counts as "not verified" so the
            // user can retry instead of waiting on a stuck session.
            Err(ServiceError::Timeout { service, timeout }) => {
                warn!(
                    session_id = %session.session_id,
                    service = %service,
                    ?timeout,
                    "Verification timed out"
                );
                false
            }
            Err(e) => return self.service_failure(session, &e),
        };

        if verified {
            info!(
                session_id = %session.session_id,
                crypto = %crypto,
                amount = %amount,
                "Deposit confirmed"
            );
            session.advance_to(OnboardingState::Completed);
            return Transition::new(session, prompts::deposit_confirmed());
        }

        session.verification_attempts += 1;
        session.touch();
        let attempts = session.verification_attempts;
        warn!(session_id = %session.session_id, attempts, "Transaction not verified");

        let reply = match self.config.max_verification_attempts {
            Some(max) if attempts >= max => prompts::deposit_unverified_escalated(attempts),
            _ => prompts::deposit_unverified(),
        };
        Transition::new(session, reply)
    }

    /// Run a service call under the configured timeout.
    async fn bounded<T>(
        &self,
        service: &str,
        call: impl Future<Output = Result<T, ServiceError>>,
    ) -> Result<T, ServiceError> {
        with_timeout(self.config.service_timeout, service, call).await
    }

    fn service_failure(&self, session: Session, error: &ServiceError) -> Transition {
        warn!(
            session_id = %session.session_id,
            state = %session.state,
            error = %error,
            "External service failed; state unchanged"
        );
        Transition::new(session, prompts::service_unavailable())
    }

    /// Answers a later step depends on are missing. Start over rather than guess.
    fn lost_progress(&self, mut session: Session) -> Transition {
        warn!(
            session_id = %session.session_id,
            state = %session.state,
            "Session is missing earlier answers; restarting"
        );
        session.reset();
        Transition::new(session, prompts::welcome())
    }
}

async fn with_timeout<T>(
    timeout: Duration,
    service: &str,
    call: impl Future<Output = Result<T, ServiceError>>,
) -> Result<T, ServiceError> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| ServiceError::Timeout {
            service: service.to_string(),
            timeout,
        })?
}

/// Parse a deposit amount in plain (`0.01`) or scientific (`1e-2`) notation.
pub fn parse_amount(text: &str) -> Option<Decimal> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::channels::Keyboard;
    use crate::services::{NonEmptyHashVerifier, StaticRateProvider};

    /// Rates that can be changed between steps.
    struct MutableRates(Mutex<HashMap<String, Decimal>>);

    impl MutableRates {
        fn set(&self, code: &str, min: Decimal) {
            self.0.lock().unwrap().insert(code.to_string(), min);
        }
    }

    #[async_trait]
    impl RateProvider for MutableRates {
        fn name(&self) -> &str {
            "mutable"
        }
        async fn minimums(&self) -> Result<HashMap<String, Decimal>, ServiceError> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    struct FailingRates;

    #[async_trait]
    impl RateProvider for FailingRates {
        fn name(&self) -> &str {
            "failing"
        }
        async fn minimums(&self) -> Result<HashMap<String, Decimal>, ServiceError> {
            Err(ServiceError::RequestFailed {
                service: "failing".into(),
                reason: "exchange down".into(),
            })
        }
    }

    /// Verifier with a fixed answer that counts calls.
    struct FixedVerifier {
        answer: bool,
        calls: AtomicUsize,
    }

    impl FixedVerifier {
        fn new(answer: bool) -> Self {
            Self {
                answer,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TransactionVerifier for FixedVerifier {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn verify(&self, _: &str, _: Decimal, _: &str) -> Result<bool, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer)
        }
    }

    struct SlowVerifier;

    #[async_trait]
    impl TransactionVerifier for SlowVerifier {
        fn name(&self) -> &str {
            "slow"
        }
        async fn verify(&self, _: &str, _: Decimal, _: &str) -> Result<bool, ServiceError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(true)
        }
    }

    fn machine_with(
        rates: Arc<dyn RateProvider>,
        verifier: Arc<dyn TransactionVerifier>,
        config: FlowConfig,
    ) -> ConversationMachine {
        ConversationMachine::new(Arc::new(CurrencyCatalog::default()), rates, verifier, config)
    }

    fn machine() -> ConversationMachine {
        machine_with(
            Arc::new(StaticRateProvider::default()),
            Arc::new(NonEmptyHashVerifier),
            FlowConfig::default(),
        )
    }

    fn session_at(state: OnboardingState) -> Session {
        let mut s = Session::new("tester");
        s.state = state;
        if state != OnboardingState::AwaitingEmail {
            s.answers.email = Some("user@example.com".into());
        }
        if matches!(
            state,
            OnboardingState::AwaitingDepositAmount | OnboardingState::AwaitingTransactionHash
        ) {
            s.answers.crypto = Some("BTC".into());
        }
        if state == OnboardingState::AwaitingTransactionHash {
            s.answers.amount = Some(dec!(0.01));
        }
        s
    }

    const OPEN_STATES: [OnboardingState; 5] = [
        OnboardingState::AwaitingEmail,
        OnboardingState::AwaitingInvestmentInterest,
        OnboardingState::AwaitingCryptoChoice,
        OnboardingState::AwaitingDepositAmount,
        OnboardingState::AwaitingTransactionHash,
    ];

    // ── Input classification ────────────────────────────────────────

    #[test]
    fn parse_commands() {
        assert_eq!(Input::parse("/start"), Input::Start);
        assert_eq!(Input::parse("  /START  "), Input::Start);
        assert_eq!(Input::parse("/start@deposit_bot"), Input::Start);
        assert_eq!(Input::parse("start"), Input::Start);
        assert_eq!(Input::parse("/cancel"), Input::Cancel);
        assert_eq!(Input::parse("Cancel"), Input::Cancel);
        assert_eq!(Input::parse("/help"), Input::UnknownCommand("/help"));
        assert_eq!(Input::parse("BTC"), Input::Text("BTC"));
        assert_eq!(Input::parse("starting"), Input::Text("starting"));
    }

    #[test]
    fn parse_amount_formats() {
        assert_eq!(parse_amount("0.01"), Some(dec!(0.01)));
        assert_eq!(parse_amount(" 25 "), Some(dec!(25)));
        assert_eq!(parse_amount("1e-2"), Some(dec!(0.01)));
        assert_eq!(parse_amount("-3"), Some(dec!(-3)));
        assert_eq!(parse_amount("ten"), None);
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("1,5"), None);
    }

    // ── Email step ──────────────────────────────────────────────────

    #[tokio::test]
    async fn invalid_email_stays() {
        let t = machine()
            .handle(session_at(OnboardingState::AwaitingEmail), "not-an-email")
            .await;
        assert_eq!(t.session.state, OnboardingState::AwaitingEmail);
        assert_eq!(t.reply.content, "Please enter a valid email address.");
        assert!(t.session.answers.email.is_none());
    }

    #[tokio::test]
    async fn email_with_two_ats_rejected() {
        let t = machine()
            .handle(session_at(OnboardingState::AwaitingEmail), "a@b.co@evil.com")
            .await;
        assert_eq!(t.session.state, OnboardingState::AwaitingEmail);
    }

    #[test]
    fn email_pattern_accepts_plain_addresses_only() {
        assert!(EMAIL_PATTERN.is_match("user@example.com"));
        assert!(EMAIL_PATTERN.is_match("first.last+tag@mail.example.org"));
        assert!(!EMAIL_PATTERN.is_match("user @example.com"));
        assert!(!EMAIL_PATTERN.is_match("user@localhost"));
    }

    #[tokio::test]
    async fn valid_email_advances() {
        let t = machine()
            .handle(session_at(OnboardingState::AwaitingEmail), "user@example.com")
            .await;
        assert_eq!(t.session.state, OnboardingState::AwaitingInvestmentInterest);
        assert_eq!(t.session.answers.email.as_deref(), Some("user@example.com"));
        assert_eq!(
            t.reply.keyboard,
            Some(Keyboard::Choices {
                rows: vec![vec!["Yes".to_string(), "No".to_string()]]
            })
        );
    }

    #[tokio::test]
    async fn repeated_invalid_input_is_idempotent() {
        let m = machine();
        let first = m
            .handle(session_at(OnboardingState::AwaitingEmail), "nope")
            .await;
        let second = m.handle(first.session.clone(), "nope").await;
        assert_eq!(first.session.state, second.session.state);
        assert_eq!(first.session.answers, second.session.answers);
        assert_eq!(first.reply, second.reply);
    }

    // ── Investment interest ─────────────────────────────────────────

    #[tokio::test]
    async fn yes_offers_currencies() {
        let t = machine()
            .handle(session_at(OnboardingState::AwaitingInvestmentInterest), "YES")
            .await;
        assert_eq!(t.session.state, OnboardingState::AwaitingCryptoChoice);
        assert_eq!(
            t.reply.keyboard,
            Some(Keyboard::Choices {
                rows: CurrencyCatalog::default().keyboard_rows()
            })
        );
    }

    #[tokio::test]
    async fn no_cancels() {
        let t = machine()
            .handle(session_at(OnboardingState::AwaitingInvestmentInterest), "No")
            .await;
        assert_eq!(t.session.state, OnboardingState::Cancelled);
        assert!(t.is_terminal());
        assert!(t.reply.content.contains("change your mind"));
    }

    #[tokio::test]
    async fn maybe_reprompts() {
        let t = machine()
            .handle(session_at(OnboardingState::AwaitingInvestmentInterest), "maybe")
            .await;
        assert_eq!(t.session.state, OnboardingState::AwaitingInvestmentInterest);
        assert_eq!(t.session.answers.email.as_deref(), Some("user@example.com"));
    }

    // ── Crypto choice ───────────────────────────────────────────────

    #[tokio::test]
    async fn btc_quotes_minimum() {
        let t = machine()
            .handle(session_at(OnboardingState::AwaitingCryptoChoice), "BTC")
            .await;
        assert_eq!(t.session.state, OnboardingState::AwaitingDepositAmount);
        assert_eq!(t.session.answers.crypto.as_deref(), Some("BTC"));
        assert!(t.reply.content.contains("0.00009"));
        assert_eq!(t.reply.keyboard, Some(Keyboard::Remove));
    }

    #[tokio::test]
    async fn currency_match_is_case_insensitive() {
        let t = machine()
            .handle(session_at(OnboardingState::AwaitingCryptoChoice), "usdt (trc20)")
            .await;
        assert_eq!(t.session.answers.crypto.as_deref(), Some("USDT (TRC20)"));
    }

    #[tokio::test]
    async fn unknown_currency_reprompts_with_options() {
        let t = machine()
            .handle(session_at(OnboardingState::AwaitingCryptoChoice), "XRP")
            .await;
        assert_eq!(t.session.state, OnboardingState::AwaitingCryptoChoice);
        assert!(t.session.answers.crypto.is_none());
        assert!(t.reply.content.contains("BTC, TRX, ETH, DOGE, USDT (TRC20)"));
    }

    #[tokio::test]
    async fn currency_without_rate_is_not_offered() {
        let rates = MutableRates(Mutex::new(HashMap::from([("BTC".to_string(), dec!(1))])));
        let m = machine_with(
            Arc::new(rates),
            Arc::new(NonEmptyHashVerifier),
            FlowConfig::default(),
        );
        let t = m
            .handle(session_at(OnboardingState::AwaitingCryptoChoice), "ETH")
            .await;
        assert_eq!(t.session.state, OnboardingState::AwaitingCryptoChoice);
    }

    #[tokio::test]
    async fn rate_failure_keeps_state() {
        let m = machine_with(
            Arc::new(FailingRates),
            Arc::new(NonEmptyHashVerifier),
            FlowConfig::default(),
        );
        let t = m
            .handle(session_at(OnboardingState::AwaitingCryptoChoice), "BTC")
            .await;
        assert_eq!(t.session.state, OnboardingState::AwaitingCryptoChoice);
        assert!(t.reply.content.contains("try again"));

        let t = m
            .handle(session_at(OnboardingState::AwaitingDepositAmount), "1")
            .await;
        assert_eq!(t.session.state, OnboardingState::AwaitingDepositAmount);
        assert!(t.session.answers.amount.is_none());
    }

    // ── Deposit amount ──────────────────────────────────────────────

    #[tokio::test]
    async fn unparsable_amount_reprompts() {
        let t = machine()
            .handle(session_at(OnboardingState::AwaitingDepositAmount), "lots")
            .await;
        assert_eq!(t.session.state, OnboardingState::AwaitingDepositAmount);
        assert_eq!(
            t.reply.content,
            "Please enter a valid number for the deposit amount."
        );
    }

    #[tokio::test]
    async fn amount_below_minimum_restates_minimum() {
        let t = machine()
            .handle(session_at(OnboardingState::AwaitingDepositAmount), "0.00001")
            .await;
        assert_eq!(t.session.state, OnboardingState::AwaitingDepositAmount);
        assert!(t.session.answers.amount.is_none());
        assert_eq!(t.session.answers.crypto.as_deref(), Some("BTC"));
        assert!(t.reply.content.contains("0.00009"));
        assert!(t.reply.content.contains("0.00001"));
    }

    #[tokio::test]
    async fn amount_at_minimum_is_accepted() {
        let t = machine()
            .handle(session_at(OnboardingState::AwaitingDepositAmount), "0.00009")
            .await;
        assert_eq!(t.session.state, OnboardingState::AwaitingTransactionHash);
    }

    #[tokio::test]
    async fn valid_amount_gives_address() {
        let t = machine()
            .handle(session_at(OnboardingState::AwaitingDepositAmount), "0.01")
            .await;
        assert_eq!(t.session.state, OnboardingState::AwaitingTransactionHash);
        assert_eq!(t.session.answers.amount, Some(dec!(0.01)));
        assert!(
            t.reply
                .content
                .contains("bc1qs3lcvtyvg9cp7kedh5m8vtsxlw8fd2upsuf85p")
        );
    }

    #[tokio::test]
    async fn minimum_is_requeried_at_amount_step() {
        let rates = Arc::new(MutableRates(Mutex::new(HashMap::from([(
            "BTC".to_string(),
            dec!(0.00009),
        )]))));
        let m = machine_with(
            rates.clone(),
            Arc::new(NonEmptyHashVerifier),
            FlowConfig::default(),
        );

        let t = m
            .handle(session_at(OnboardingState::AwaitingCryptoChoice), "BTC")
            .await;
        assert_eq!(t.session.state, OnboardingState::AwaitingDepositAmount);

        rates.set("BTC", dec!(0.05));
        let t = m.handle(t.session, "0.01").await;
        assert_eq!(t.session.state, OnboardingState::AwaitingDepositAmount);
        assert!(t.reply.content.contains("0.05"));
    }

    // ── Transaction hash ────────────────────────────────────────────

    #[tokio::test]
    async fn blank_hash_reprompts_without_verifying() {
        let verifier = Arc::new(FixedVerifier::new(true));
        let m = machine_with(
            Arc::new(StaticRateProvider::default()),
            verifier.clone(),
            FlowConfig::default(),
        );
        for input in ["", "   "] {
            let t = m
                .handle(session_at(OnboardingState::AwaitingTransactionHash), input)
                .await;
            assert_eq!(t.session.state, OnboardingState::AwaitingTransactionHash);
            assert!(t.reply.content.contains("check"));
        }
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn verified_hash_completes() {
        let t = machine()
            .handle(session_at(OnboardingState::AwaitingTransactionHash), "abc123hash")
            .await;
        assert_eq!(t.session.state, OnboardingState::Completed);
        assert!(t.is_terminal());
        assert!(t.reply.content.contains("confirmed"));
    }

    #[tokio::test]
    async fn unverified_hash_keeps_answers() {
        let m = machine_with(
            Arc::new(StaticRateProvider::default()),
            Arc::new(FixedVerifier::new(false)),
            FlowConfig::default(),
        );
        let t = m
            .handle(session_at(OnboardingState::AwaitingTransactionHash), "bad")
            .await;
        assert_eq!(t.session.state, OnboardingState::AwaitingTransactionHash);
        assert_eq!(t.session.answers.crypto.as_deref(), Some("BTC"));
        assert_eq!(t.session.answers.amount, Some(dec!(0.01)));
        assert_eq!(t.session.verification_attempts, 1);
        assert!(t.reply.content.contains("support team"));
    }

    #[tokio::test]
    async fn retry_cap_escalates() {
        let m = machine_with(
            Arc::new(StaticRateProvider::default()),
            Arc::new(FixedVerifier::new(false)),
            FlowConfig {
                max_verification_attempts: Some(2),
                ..FlowConfig::default()
            },
        );
        let t = m
            .handle(session_at(OnboardingState::AwaitingTransactionHash), "bad")
            .await;
        assert_eq!(t.reply, prompts::deposit_unverified());

        let t = m.handle(t.session, "bad again").await;
        assert_eq!(t.session.state, OnboardingState::AwaitingTransactionHash);
        assert!(t.reply.content.contains("after 2 attempts"));
    }

    #[tokio::test]
    async fn verifier_timeout_counts_as_unverified() {
        let m = machine_with(
            Arc::new(StaticRateProvider::default()),
            Arc::new(SlowVerifier),
            FlowConfig {
                service_timeout: Duration::from_millis(50),
                ..FlowConfig::default()
            },
        );
        let t = m
            .handle(session_at(OnboardingState::AwaitingTransactionHash), "abc")
            .await;
        assert_eq!(t.session.state, OnboardingState::AwaitingTransactionHash);
        assert_eq!(t.reply, prompts::deposit_unverified());
    }

    #[tokio::test]
    async fn missing_answers_restart_flow() {
        let mut s = session_at(OnboardingState::AwaitingTransactionHash);
        s.answers.amount = None;
        let t = machine().handle(s, "abc").await;
        assert_eq!(t.session.state, OnboardingState::AwaitingEmail);
        assert!(t.session.answers.is_empty());
    }

    // ── Commands ────────────────────────────────────────────────────

    #[tokio::test]
    async fn start_resets_from_every_open_state() {
        let m = machine();
        for state in OPEN_STATES {
            let t = m.handle(session_at(state), "/start").await;
            assert_eq!(t.session.state, OnboardingState::AwaitingEmail, "from {state}");
            assert!(t.session.answers.is_empty(), "from {state}");
            assert!(t.reply.content.starts_with("Welcome!"));
        }
    }

    #[tokio::test]
    async fn cancel_from_every_open_state() {
        let m = machine();
        for state in OPEN_STATES {
            let t = m.handle(session_at(state), "/cancel").await;
            assert_eq!(t.session.state, OnboardingState::Cancelled, "from {state}");
            assert!(t.is_terminal());
            assert_eq!(t.reply, prompts::cancelled());
        }
    }

    #[tokio::test]
    async fn unknown_command_keeps_state() {
        let t = machine()
            .handle(session_at(OnboardingState::AwaitingDepositAmount), "/balance")
            .await;
        assert_eq!(t.session.state, OnboardingState::AwaitingDepositAmount);
        assert_eq!(t.reply, prompts::unknown_command());
    }

    #[tokio::test]
    async fn terminal_session_is_treated_as_new() {
        let mut s = session_at(OnboardingState::AwaitingTransactionHash);
        s.state = OnboardingState::Completed;
        let t = machine().handle(s, "user@example.com").await;
        assert_eq!(t.session.state, OnboardingState::AwaitingInvestmentInterest);
        assert!(t.session.answers.crypto.is_none());
    }

    #[test]
    fn service_steps() {
        use OnboardingState::*;
        assert!(ConversationMachine::needs_service(AwaitingTransactionHash, "abc"));
        assert!(ConversationMachine::needs_service(AwaitingCryptoChoice, "BTC"));
        assert!(!ConversationMachine::needs_service(AwaitingTransactionHash, "/cancel"));
        assert!(!ConversationMachine::needs_service(AwaitingEmail, "a@b.co"));
    }
}
