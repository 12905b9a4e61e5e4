//! Money value object.
//!
//! Gateways report amounts in minor units (cents); the ledger stores decimal
//! major units. Conversion goes through the currency's exponent so a
//! zero-decimal currency like JPY is not silently divided by 100.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::ValidationError;

/// ISO 4217 currency code, normalized to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl AsRef<str>) -> Result<Self, ValidationError> {
        let code = code.as_ref().trim();
        if code.is_empty() {
            return Err(ValidationError::empty_field("currency"));
        }
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::invalid_format(
                "currency",
                format!("'{}' is not a three-letter ISO code", code),
            ));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of decimal places in the currency's minor unit.
    pub fn exponent(&self) -> u32 {
        match self.0.as_str() {
            "BIF" | "CLP" | "DJF" | "GNF" | "JPY" | "KMF" | "KRW" | "MGA" | "PYG" | "RWF"
            | "UGX" | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
            "BHD" | "JOD" | "KWD" | "OMR" | "TND" => 3,
            _ => 2,
        }
    }
}

impl TryFrom<String> for Currency {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::new(value)
    }
}

impl From<Currency> for String {
    fn from(c: Currency) -> Self {
        c.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A positive amount in a specific currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

impl Money {
    /// Creates money from a major-unit decimal. The amount must be positive.
    pub fn new(amount: Decimal, currency: Currency) -> Result<Self, ValidationError> {
        if amount <= Decimal::ZERO {
            return Err(ValidationError::not_positive("amount"));
        }
        let amount = amount.round_dp(currency.exponent());
        Ok(Self { amount, currency })
    }

    /// Creates money from a gateway minor-unit integer (e.g. 1999 EUR cents).
    pub fn from_minor_units(minor: i64, currency: Currency) -> Result<Self, ValidationError> {
        let amount = Decimal::new(minor, currency.exponent());
        Self::new(amount, currency)
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    /// Converts back to minor units for the gateway.
    pub fn to_minor_units(&self) -> i64 {
        let scale = Decimal::from(10_i64.pow(self.currency.exponent()));
        (self.amount * scale).trunc().to_i64().unwrap_or(i64::MAX)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::str::FromStr;

    fn eur() -> Currency {
        Currency::new("eur").unwrap()
    }

    #[test]
    fn currency_is_normalized_to_upper_case() {
        assert_eq!(eur().as_str(), "EUR");
    }

    #[test]
    fn currency_rejects_bad_codes() {
        assert!(Currency::new("").is_err());
        assert!(Currency::new("EURO").is_err());
        assert!(Currency::new("E1R").is_err());
    }

    #[test]
    fn minor_units_convert_to_decimal() {
        let money = Money::from_minor_units(1999, eur()).unwrap();
        assert_eq!(money.amount(), Decimal::from_str("19.99").unwrap());
        assert_eq!(money.to_string(), "19.99 EUR");
    }

    #[test]
    fn zero_decimal_currency_keeps_whole_units() {
        let money = Money::from_minor_units(500, Currency::new("JPY").unwrap()).unwrap();
        assert_eq!(money.amount(), Decimal::from(500));
    }

    #[test]
    fn three_decimal_currency() {
        let money = Money::from_minor_units(1250, Currency::new("KWD").unwrap()).unwrap();
        assert_eq!(money.amount(), Decimal::from_str("1.250").unwrap());
    }

    #[test]
    fn zero_and_negative_amounts_are_rejected() {
        assert!(Money::from_minor_units(0, eur()).is_err());
        assert!(Money::from_minor_units(-100, eur()).is_err());
    }

    proptest! {
        #[test]
        fn minor_units_survive_conversion(minor in 1_i64..1_000_000_000_000) {
            let money = Money::from_minor_units(minor, eur()).unwrap();
            prop_assert_eq!(money.to_minor_units(), minor);
        }
    }
}
