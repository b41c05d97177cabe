//! Onboarding states.

use serde::{Deserialize, Serialize};

/// The steps of the deposit onboarding conversation.
///
/// Progresses linearly: AwaitingEmail → AwaitingInvestmentInterest →
/// AwaitingCryptoChoice → AwaitingDepositAmount → AwaitingTransactionHash →
/// Completed. Every non-terminal step may also end in Cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingState {
    #[default]
    AwaitingEmail,
    AwaitingInvestmentInterest,
    AwaitingCryptoChoice,
    AwaitingDepositAmount,
    AwaitingTransactionHash,
    Completed,
    Cancelled,
}

impl OnboardingState {
    /// All states, in flow order.
    pub const ALL: [OnboardingState; 7] = [
        Self::AwaitingEmail,
        Self::AwaitingInvestmentInterest,
        Self::AwaitingCryptoChoice,
        Self::AwaitingDepositAmount,
        Self::AwaitingTransactionHash,
        Self::Completed,
        Self::Cancelled,
    ];

    /// Check if a normal transition from `self` to `target` is valid.
    ///
    /// Restart is not a transition: it replaces the session outright.
    pub fn can_transition_to(&self, target: OnboardingState) -> bool {
        use OnboardingState::*;
        if !self.is_terminal() && target == Cancelled {
            return true;
        }
        self.next() == Some(target)
    }

    /// Whether the conversation is over and the session should be cleared.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// The next state on the success path, if any.
    pub fn next(&self) -> Option<OnboardingState> {
        use OnboardingState::*;
        match self {
            AwaitingEmail => Some(AwaitingInvestmentInterest),
            AwaitingInvestmentInterest => Some(AwaitingCryptoChoice),
            AwaitingCryptoChoice => Some(AwaitingDepositAmount),
            AwaitingDepositAmount => Some(AwaitingTransactionHash),
            AwaitingTransactionHash => Some(Completed),
            Completed | Cancelled => None,
        }
    }
}

impl std::fmt::Display for OnboardingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AwaitingEmail => "awaiting_email",
            Self::AwaitingInvestmentInterest => "awaiting_investment_interest",
            Self::AwaitingCryptoChoice => "awaiting_crypto_choice",
            Self::AwaitingDepositAmount => "awaiting_deposit_amount",
            Self::AwaitingTransactionHash => "awaiting_transaction_hash",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}
