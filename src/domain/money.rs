//! Money type
//!
//! Domain primitive for monetary values. An amount is a fixed-point decimal
//! with four fractional digits, always paired with a currency. Values are
//! validated at construction time and never mutated afterwards.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;

/// Fractional digits carried by every amount
pub const MONEY_SCALE: u32 = 4;

/// ISO 4217 style currency code (three ASCII letters, upper-case)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency([u8; 3]);

impl Currency {
    pub const EUR: Currency = Currency(*b"EUR");
    pub const USD: Currency = Currency(*b"USD");

    /// Parse a currency code. Lower-case input is accepted and normalized.
    pub fn new(code: &str) -> Result<Self, MoneyError> {
        let bytes = code.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_alphabetic) {
            return Err(MoneyError::InvalidCurrency(code.to_string()));
        }
        Ok(Self([
            bytes[0].to_ascii_uppercase(),
            bytes[1].to_ascii_uppercase(),
            bytes[2].to_ascii_uppercase(),
        ]))
    }

    pub fn code(&self) -> &str {
        // Constructed from ASCII letters only
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = MoneyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.code().to_string()
    }
}

/// Errors that can occur when building or combining Money values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("Currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: Currency, right: Currency },

    #[error("Amount has too many decimal places (max {MONEY_SCALE}, got {0})")]
    TooManyDecimals(u32),

    #[error("Invalid currency code: {0:?}")]
    InvalidCurrency(String),

    #[error("Invalid amount format: {0}")]
    ParseError(String),

    #[error("Arithmetic overflow")]
    Overflow,
}

/// Money represents a signed amount in a single currency.
///
/// # Invariants
/// - Scale is always exactly 4 fractional digits
/// - Arithmetic between two values requires the same currency
///
/// # Example
/// ```
/// use rust_decimal::Decimal;
/// use finance_ledger::domain::{Currency, Money};
///
/// let a = Money::new(Decimal::new(-3000, 2), Currency::EUR).unwrap();
/// let b = Money::new(Decimal::new(-7000, 2), Currency::EUR).unwrap();
/// let total = a.checked_add(&b).unwrap();
/// assert_eq!(total.amount(), Decimal::new(-100, 0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "MoneyRepr")]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

#[derive(Deserialize)]
struct MoneyRepr {
    amount: Decimal,
    currency: Currency,
}

impl TryFrom<MoneyRepr> for Money {
    type Error = MoneyError;

    fn try_from(repr: MoneyRepr) -> Result<Self, Self::Error> {
        Money::new(repr.amount, repr.currency)
    }
}

impl Money {
    /// Create a new Money value.
    ///
    /// # Errors
    /// - `MoneyError::TooManyDecimals` if the amount has more than 4 decimal places
    pub fn new(amount: Decimal, currency: Currency) -> Result<Self, MoneyError> {
        let normalized = amount.normalize();
        if normalized.scale() > MONEY_SCALE {
            return Err(MoneyError::TooManyDecimals(normalized.scale()));
        }

        let mut amount = normalized;
        amount.rescale(MONEY_SCALE);
        Ok(Self { amount, currency })
    }

    /// Parse a decimal string such as `"-70.25"` into Money.
    pub fn parse(amount: &str, currency: Currency) -> Result<Self, MoneyError> {
        let decimal = Decimal::from_str(amount.trim())
            .map_err(|e| MoneyError::ParseError(e.to_string()))?;
        Money::new(decimal, currency)
    }

    /// Zero in the given currency
    pub fn zero(currency: Currency) -> Self {
        let mut amount = Decimal::ZERO;
        amount.rescale(MONEY_SCALE);
        Self { amount, currency }
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_negative(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    /// Add another value of the same currency.
    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        let sum = self
            .amount
            .checked_add(other.amount)
            .ok_or(MoneyError::Overflow)?;
        Money::new(sum, self.currency)
    }

    /// Subtract another value of the same currency.
    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        let diff = self
            .amount
            .checked_sub(other.amount)
            .ok_or(MoneyError::Overflow)?;
        Money::new(diff, self.currency)
    }

    /// Sum a sequence of values; every element must share `currency`.
    pub fn sum<'a, I>(currency: Currency, values: I) -> Result<Money, MoneyError>
    where
        I: IntoIterator<Item = &'a Money>,
    {
        values
            .into_iter()
            .try_fold(Money::zero(currency), |acc, value| acc.checked_add(value))
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                left: self.currency,
                right: other.currency,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Self::Output {
        Money {
            amount: -self.amount,
            currency: self.currency,
        }
    }
}

impl Add for Money {
    type Output = Result<Money, MoneyError>;

    fn add(self, rhs: Self) -> Self::Output {
        self.checked_add(&rhs)
    }
}

impl Sub for Money {
    type Output = Result<Money, MoneyError>;

    fn sub(self, rhs: Self) -> Self::Output {
        self.checked_sub(&rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn eur(amount: Decimal) -> Money {
        Money::new(amount, Currency::EUR).unwrap()
    }

    #[test]
    fn test_money_scale_normalized() {
        let money = eur(dec!(12.5));
        assert_eq!(money.amount().scale(), MONEY_SCALE);
        assert_eq!(money.amount(), dec!(12.5000));
        assert_eq!(money.to_string(), "12.5000 EUR");
    }

    #[test]
    fn test_money_too_many_decimals() {
        let result = Money::new(dec!(0.12345), Currency::EUR);
        assert!(matches!(result, Err(MoneyError::TooManyDecimals(5))));

        // Trailing zeros are not significant
        assert!(Money::new(dec!(1.230000), Currency::EUR).is_ok());
    }

    #[test]
    fn test_currency_validation() {
        assert_eq!(Currency::new("usd").unwrap(), Currency::USD);
        assert!(matches!(Currency::new("US"), Err(MoneyError::InvalidCurrency(_))));
        assert!(matches!(Currency::new("U5D"), Err(MoneyError::InvalidCurrency(_))));
        assert!(matches!(Currency::new("EURO"), Err(MoneyError::InvalidCurrency(_))));
    }

    #[test]
    fn test_money_add_sub() {
        let a = eur(dec!(-30));
        let b = eur(dec!(-70));
        assert_eq!((a + b).unwrap().amount(), dec!(-100));
        assert_eq!((a - b).unwrap().amount(), dec!(40));
    }

    #[test]
    fn test_money_currency_mismatch() {
        let a = eur(dec!(10));
        let b = Money::new(dec!(10), Currency::USD).unwrap();
        let result = a.checked_add(&b);
        assert!(matches!(result, Err(MoneyError::CurrencyMismatch { .. })));
    }

    #[test]
    fn test_money_negation_and_sign() {
        let outflow = eur(dec!(-70));
        let inflow = -outflow;
        assert!(outflow.is_negative());
        assert!(!inflow.is_negative());
        assert_eq!(inflow.amount(), dec!(70));
        assert!(!Money::zero(Currency::EUR).is_negative());
    }

    #[test]
    fn test_money_sum() {
        let values = vec![eur(dec!(-30)), eur(dec!(-70)), eur(dec!(0.25))];
        let total = Money::sum(Currency::EUR, &values).unwrap();
        assert_eq!(total.amount(), dec!(-99.75));

        let mixed = vec![eur(dec!(1)), Money::new(dec!(1), Currency::USD).unwrap()];
        assert!(Money::sum(Currency::EUR, &mixed).is_err());
    }

    #[test]
    fn test_money_serde() {
        let money = eur(dec!(-70));
        let json = serde_json::to_string(&money).unwrap();
        assert!(json.contains("\"EUR\""));

        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, money);

        let bad = r#"{"amount":"1.00","currency":"EURO"}"#;
        assert!(serde_json::from_str::<Money>(bad).is_err());
    }
}
