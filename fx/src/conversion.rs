//! Currency conversion result types.

use std::fmt;

use fxquote_common::{CurrencyCode, CurrencyPair};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How a conversion rate was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionPath {
    /// Source and destination are the same currency.
    Identity,
    /// Rate stored for `from -> to`.
    Direct,
    /// Reciprocal of the rate stored for `to -> from`.
    Inverse,
    /// Composed from the base currency's rates.
    Triangulated,
}

impl fmt::Display for ConversionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConversionPath::Identity => "identity",
            ConversionPath::Direct => "direct",
            ConversionPath::Inverse => "inverse",
            ConversionPath::Triangulated => "triangulated",
        };
        f.write_str(name)
    }
}

/// A completed conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
    /// Source currency.
    pub from: CurrencyCode,
    /// Destination currency.
    pub to: CurrencyCode,
    /// Requested amount in `from`.
    pub amount: Decimal,
    /// Amount in `to`, quantized to its precision.
    pub converted_amount: Decimal,
    /// Effective rate, quantized to the rate precision.
    pub rate: Decimal,
    /// Resolution path.
    pub path: ConversionPath,
}

impl Conversion {
    /// Get the currency pair.
    pub fn pair(&self) -> CurrencyPair {
        CurrencyPair::new(self.from.clone(), self.to.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_serializes_path_and_amounts() {
        let conversion = Conversion {
            from: CurrencyCode::parse("USD").unwrap(),
            to: CurrencyCode::parse("GBP").unwrap(),
            amount: dec!(90),
            converted_amount: dec!(80.0000),
            rate: dec!(0.8889),
            path: ConversionPath::Triangulated,
        };

        let json = serde_json::to_value(&conversion).unwrap();
        assert_eq!(json["path"], "triangulated");
        assert_eq!(json["converted_amount"], "80.0000");
        assert_eq!(conversion.pair().to_string(), "USD/GBP");
    }
}
