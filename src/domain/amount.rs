//! Money types
//!
//! Domain primitives for monetary amounts and wallet balances.
//! Amounts are validated at construction time, so an invalid value
//! never reaches a ledger row or a gateway request.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest single amount or balance the platform accepts (100 million).
pub const MAX_AMOUNT: i64 = 100_000_000;

/// Currency minor units (piasters / cents).
pub const MAX_SCALE: u32 = 2;

/// Amount represents a validated, strictly positive monetary value.
///
/// # Invariants
/// - Value is always positive (> 0)
/// - At most 2 decimal places
/// - At most 100,000,000
///
/// # Example
/// ```
/// use hbrc_platform::domain::Amount;
///
/// let amount: Amount = "150.50".parse().unwrap();
/// assert_eq!(amount.to_minor_units(), 15050);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(Decimal);

/// Errors that can occur when creating an Amount
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Amount must be positive (got {0})")]
    NotPositive(Decimal),

    #[error("Amount has too many decimal places (max {MAX_SCALE}, got {0})")]
    TooManyDecimals(u32),

    #[error("Amount exceeds maximum allowed value ({MAX_AMOUNT})")]
    Overflow,

    #[error("Invalid amount format: {0}")]
    ParseError(String),
}

impl Amount {
    /// Create a new Amount with validation.
    ///
    /// # Errors
    /// - `AmountError::NotPositive` if value <= 0
    /// - `AmountError::TooManyDecimals` if more than 2 significant decimal places
    /// - `AmountError::Overflow` if value > 100,000,000
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value <= Decimal::ZERO {
            return Err(AmountError::NotPositive(value));
        }

        // "10.50" and "10.5" are the same amount; only significant digits count
        let scale = value.normalize().scale();
        if scale > MAX_SCALE {
            return Err(AmountError::TooManyDecimals(scale));
        }

        if value > Decimal::from(MAX_AMOUNT) {
            return Err(AmountError::Overflow);
        }

        Ok(Self(value.round_dp(MAX_SCALE)))
    }

    /// Build an amount from integer minor units (e.g. piasters).
    pub fn from_minor_units(units: i64) -> Result<Self, AmountError> {
        Self::new(Decimal::new(units, MAX_SCALE))
    }

    /// Get the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Value in minor units, as payment providers expect (`amount_cents`).
    pub fn to_minor_units(&self) -> i64 {
        // Bounded by MAX_AMOUNT * 100, always representable
        (self.0 * Decimal::ONE_HUNDRED).to_i64().unwrap_or(i64::MAX)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal =
            Decimal::from_str(s.trim()).map_err(|e| AmountError::ParseError(e.to_string()))?;
        Amount::new(decimal)
    }
}

impl TryFrom<String> for Amount {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Amount::from_str(&value)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        format!("{:.2}", amount.0)
    }
}

/// Balance is a wallet balance: zero or positive, never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance(Decimal);

impl Balance {
    /// Create a new balance (zero or positive)
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value < Decimal::ZERO {
            return Err(AmountError::NotPositive(value));
        }

        if value > Decimal::from(MAX_AMOUNT) {
            return Err(AmountError::Overflow);
        }

        Ok(Self(value))
    }

    /// Create a zero balance
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    /// Get the underlying value
    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Check if balance covers a debit of `amount`
    pub fn is_sufficient_for(&self, amount: &Amount) -> bool {
        self.0 >= amount.value()
    }

    /// Add amount to balance
    pub fn credit(&self, amount: &Amount) -> Result<Balance, AmountError> {
        Balance::new(self.0 + amount.value())
    }

    /// Subtract amount from balance
    pub fn debit(&self, amount: &Amount) -> Result<Balance, AmountError> {
        Balance::new(self.0 - amount.value())
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Default for Balance {
    fn default() -> Self {
        Self::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_positive() {
        let amount = Amount::new(dec!(100)).unwrap();
        assert_eq!(amount.value(), dec!(100));
    }

    #[test]
    fn test_amount_zero_and_negative_rejected() {
        assert!(matches!(Amount::new(Decimal::ZERO), Err(AmountError::NotPositive(_))));
        assert!(matches!(Amount::new(dec!(-5)), Err(AmountError::NotPositive(_))));
    }

    #[test]
    fn test_amount_too_many_decimals() {
        assert!(matches!(
            Amount::new(dec!(0.125)),
            Err(AmountError::TooManyDecimals(3))
        ));
    }

    #[test]
    fn test_amount_trailing_zeros_accepted() {
        let amount: Amount = "10.500".parse().unwrap();
        assert_eq!(amount.value(), dec!(10.50));
        assert_eq!(amount.to_string(), "10.50");
    }

    #[test]
    fn test_amount_overflow() {
        assert!(matches!(Amount::new(dec!(100000000.01)), Err(AmountError::Overflow)));
        assert!(Amount::new(dec!(100000000)).is_ok());
    }

    #[test]
    fn test_amount_parse_error() {
        let result: Result<Amount, _> = "ten pounds".parse();
        assert!(matches!(result, Err(AmountError::ParseError(_))));
    }

    #[test]
    fn test_minor_units() {
        let amount: Amount = "1250.75".parse().unwrap();
        assert_eq!(amount.to_minor_units(), 125075);

        let back = Amount::from_minor_units(125075).unwrap();
        assert_eq!(back, amount);
    }

    #[test]
    fn test_amount_serializes_as_string() {
        let amount: Amount = "99.9".parse().unwrap();
        assert_eq!(serde_json::to_string(&amount).unwrap(), r#""99.90""#);

        let parsed: Amount = serde_json::from_str(r#""42.00""#).unwrap();
        assert_eq!(parsed.value(), dec!(42));
        assert!(serde_json::from_str::<Amount>(r#""-1""#).is_err());
    }

    #[test]
    fn test_balance_credit_debit() {
        let balance = Balance::zero();
        let balance = balance.credit(&Amount::new(dec!(100)).unwrap()).unwrap();
        assert_eq!(balance.value(), dec!(100));

        let balance = balance.debit(&Amount::new(dec!(30)).unwrap()).unwrap();
        assert_eq!(balance.value(), dec!(70));
    }

    #[test]
    fn test_balance_never_negative() {
        let balance = Balance::new(dec!(50)).unwrap();
        let amount = Amount::new(dec!(100)).unwrap();

        assert!(!balance.is_sufficient_for(&amount));
        assert!(matches!(balance.debit(&amount), Err(AmountError::NotPositive(_))));
        assert!(Balance::new(dec!(-0.01)).is_err());
    }
}
