//! Supported deposit currencies and their addresses.

/// A supported deposit currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Currency {
    /// Code shown to the user and sent back as the choice, e.g. `"BTC"`.
    pub code: &'static str,
    /// Address deposits for this currency are sent to.
    pub address: &'static str,
}

/// Built-in deposit currencies, in display order.
const DEFAULT_CURRENCIES: &[Currency] = &[
    Currency {
        code: "BTC",
        address: "bc1qs3lcvtyvg9cp7kedh5m8vtsxlw8fd2upsuf85p",
    },
    Currency {
        code: "TRX",
        address: "TG3KFy2fFTW29xrSbUwB6gszXRoCRNyyQq",
    },
    Currency {
        code: "ETH",
        address: "0x2cc1DF075FE19D46CEde20E68E8F94E62cB3D3eB",
    },
    Currency {
        code: "DOGE",
        address: "D6csY9GbUGax2hos7WMbioHqrYoLShfBBz",
    },
    Currency {
        code: "USDT (TRC20)",
        address: "TG3KFy2fFTW29xrSbUwB6gszXRoCRNyyQq",
    },
];

/// Buttons per keyboard row when offering currencies.
const KEYBOARD_ROW_WIDTH: usize = 3;

/// Immutable mapping of currency code to deposit address.
#[derive(Debug, Clone)]
pub struct CurrencyCatalog {
    currencies: Vec<Currency>,
}

impl CurrencyCatalog {
    pub fn new(currencies: Vec<Currency>) -> Self {
        Self { currencies }
    }

    /// Deposit address for `code`. Codes are matched exactly.
    pub fn address(&self, code: &str) -> Option<&'static str> {
        self.currencies
            .iter()
            .find(|c| c.code == code)
            .map(|c| c.address)
    }

    /// Currency codes in display order.
    pub fn codes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.currencies.iter().map(|c| c.code)
    }

    /// Codes laid out as keyboard rows.
    pub fn keyboard_rows(&self) -> Vec<Vec<String>> {
        self.currencies
            .chunks(KEYBOARD_ROW_WIDTH)
            .map(|row| row.iter().map(|c| c.code.to_string()).collect())
            .collect()
    }
}

impl Default for CurrencyCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_CURRENCIES.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_has_five_currencies() {
        let catalog = CurrencyCatalog::default();
        assert_eq!(catalog.codes().count(), 5);
        assert_eq!(
            catalog.codes().collect::<Vec<_>>(),
            vec!["BTC", "TRX", "ETH", "DOGE", "USDT (TRC20)"]
        );
    }

    #[test]
    fn address_lookup_is_exact() {
        let catalog = CurrencyCatalog::default();
        assert_eq!(
            catalog.address("BTC"),
            Some("bc1qs3lcvtyvg9cp7kedh5m8vtsxlw8fd2upsuf85p")
        );
        assert_eq!(
            catalog.address("USDT (TRC20)"),
            Some("TG3KFy2fFTW29xrSbUwB6gszXRoCRNyyQq")
        );
        assert!(catalog.address("btc").is_none());
        assert!(catalog.address("XRP").is_none());
    }

    #[test]
    fn keyboard_rows_are_three_wide() {
        let rows = CurrencyCatalog::default().keyboard_rows();
        assert_eq!(
            rows,
            vec![
                vec!["BTC".to_string(), "TRX".into(), "ETH".into()],
                vec!["DOGE".to_string(), "USDT (TRC20)".into()],
            ]
        );
    }
}
