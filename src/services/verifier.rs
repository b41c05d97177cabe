//! Confirms a submitted deposit hash.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::ServiceError;

/// Checks that a transaction hash corresponds to a valid deposit.
///
/// May be slow or fail; callers bound it with a timeout.
#[async_trait]
pub trait TransactionVerifier: Send + Sync {
    /// Verifier name, used in logs and errors.
    fn name(&self) -> &str;

    async fn verify(
        &self,
        currency: &str,
        amount: Decimal,
        hash: &str,
    ) -> Result<bool, ServiceError>;
}

/// Accepts any non-blank hash. Stands in for a blockchain lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonEmptyHashVerifier;

#[async_trait]
impl TransactionVerifier for NonEmptyHashVerifier {
    fn name(&self) -> &str {
        "non-empty-hash"
    }

    async fn verify(
        &self,
        _currency: &str,
        _amount: Decimal,
        hash: &str,
    ) -> Result<bool, ServiceError> {
        Ok(!hash.trim().is_empty())
    }
}
