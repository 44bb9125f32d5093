use serde::{Deserialize, Serialize};

/// Suffix the analysis backend expects on every Tokyo Stock Exchange code.
pub const MARKET_SUFFIX: &str = ".T";

/// Placeholder shown when a catalog row carries no price.
pub const NOT_AVAILABLE: &str = "N/A";

/// One normalized catalog entry, built once per run by a `CatalogSource`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub code: String,
    pub name: String,
    pub market: String,
    pub current_value: String,
    pub change_rate: String,
}

impl StockRecord {
    /// Returns `None` when `code` is blank; such rows never enter a batch.
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        market: impl Into<String>,
        current_value: impl Into<String>,
        change_rate: impl Into<String>,
    ) -> Option<Self> {
        let code = code.into().trim().to_string();
        if code.is_empty() {
            return None;
        }

        Some(Self {
            code,
            name: name.into(),
            market: market.into(),
            current_value: current_value.into(),
            change_rate: change_rate.into(),
        })
    }

    pub fn symbol(&self) -> String {
        format!("{}{MARKET_SUFFIX}", self.code)
    }
}

/// Recovers the bare exchange code from a backend symbol ("7203.T" -> "7203").
pub fn code_from_symbol(symbol: &str) -> &str {
    symbol.strip_suffix(MARKET_SUFFIX).unwrap_or(symbol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_appends_market_suffix() {
        let r = StockRecord::new("7203", "Toyota", "Prime", "N/A", "").unwrap();
        assert_eq!(r.symbol(), "7203.T");
    }

    #[test]
    fn blank_code_is_rejected() {
        assert!(StockRecord::new("", "x", "y", "N/A", "").is_none());
        assert!(StockRecord::new("   ", "x", "y", "N/A", "").is_none());
    }

    #[test]
    fn strips_suffix_only_once() {
        assert_eq!(code_from_symbol("7203.T"), "7203");
        assert_eq!(code_from_symbol("7203"), "7203");
        assert_eq!(code_from_symbol("7203.T.T"), "7203.T");
    }
}
