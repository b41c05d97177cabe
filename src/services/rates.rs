//! Current minimum deposit per currency.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::ServiceError;

/// Source of minimum deposit amounts.
///
/// Implementations must return an entry for every catalog currency. The set
/// of keys returned is also the set of currencies the user may choose.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Provider name, used in logs and errors.
    fn name(&self) -> &str;

    /// Current minimum deposit, keyed by currency code.
    async fn minimums(&self) -> Result<HashMap<String, Decimal>, ServiceError>;

    /// Minimum for a single currency.
    async fn minimum(&self, currency: &str) -> Result<Decimal, ServiceError> {
        self.minimums()
            .await?
            .remove(currency)
            .ok_or_else(|| ServiceError::MissingRate {
                service: self.name().to_string(),
                currency: currency.to_string(),
            })
    }
}

/// Fixed minimums. Stands in for an exchange API.
#[derive(Debug, Clone)]
pub struct StaticRateProvider {
    minimums: HashMap<String, Decimal>,
}

impl StaticRateProvider {
    pub fn new(minimums: HashMap<String, Decimal>) -> Self {
        Self { minimums }
    }
}

impl Default for StaticRateProvider {
    fn default() -> Self {
        let minimums = [
            ("BTC", dec!(0.00009)),
            ("TRX", dec!(25)),
            ("ETH", dec!(0.001)),
            ("DOGE", dec!(22)),
            ("USDT (TRC20)", dec!(5)),
        ]
        .into_iter()
        .map(|(code, min)| (code.to_string(), min))
        .collect();
        Self::new(minimums)
    }
}

#[async_trait]
impl RateProvider for StaticRateProvider {
    fn name(&self) -> &str {
        "static-rates"
    }

    async fn minimums(&self) -> Result<HashMap<String, Decimal>, ServiceError> {
        Ok(self.minimums.clone())
    }
}
