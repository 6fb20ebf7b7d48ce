//! Exact micro-unit monetary arithmetic
//!
//! All balances in the system are integer counts of micro-credits
//! (1 credit = 1,000,000 micro). Amounts cross every boundary as a plain
//! integer string and are parsed back with no precision loss; the backing
//! `Decimal` gives 96 bits of exact magnitude, well past the range where
//! `f64` or `i64` arithmetic would silently degrade.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::Neg;
use std::str::FromStr;
use thiserror::Error;

/// Micro-units per whole credit.
pub const MICRO_PER_CREDIT: u64 = 1_000_000;

/// Monetary arithmetic failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    /// Value is not a canonical integer string
    #[error("Malformed amount: {0:?}")]
    Malformed(String),

    /// Magnitude exceeds the representable range
    #[error("Amount overflow")]
    Overflow,

    /// Negative amount where a non-negative one is required
    #[error("Negative amount: {0}")]
    Negative(String),
}

impl MoneyError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            MoneyError::Malformed(_) => "AMOUNT_MALFORMED",
            MoneyError::Overflow => "AMOUNT_OVERFLOW",
            MoneyError::Negative(_) => "AMOUNT_NEGATIVE",
        }
    }
}

/// An exact, signed count of micro-credits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MicroCredits(Decimal);

impl MicroCredits {
    /// Zero micro-credits
    pub const ZERO: MicroCredits = MicroCredits(Decimal::ZERO);

    /// Parse a canonical integer string: optional leading `-`, then digits.
    ///
    /// No fraction, no exponent, no whitespace, no `+` sign. `-0` canonicalizes
    /// to zero. Digit strings past the 96-bit magnitude are `Overflow`.
    pub fn parse(raw: &str) -> Result<Self, MoneyError> {
        let digits = raw.strip_prefix('-').unwrap_or(raw);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MoneyError::Malformed(raw.to_string()));
        }

        let value = Decimal::from_str(raw).map_err(|_| MoneyError::Overflow)?;
        Ok(Self(value.normalize()))
    }

    /// Whole credits into micro-units
    pub fn from_credits(credits: u64) -> Self {
        Self(Decimal::from(credits) * Decimal::from(MICRO_PER_CREDIT))
    }

    /// Construct from an unsigned micro count
    pub fn from_micro(micro: u64) -> Self {
        Self(Decimal::from(micro))
    }

    /// Checked addition
    pub fn checked_add(self, other: Self) -> Result<Self, MoneyError> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(MoneyError::Overflow)
    }

    /// Checked subtraction
    pub fn checked_sub(self, other: Self) -> Result<Self, MoneyError> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or(MoneyError::Overflow)
    }

    /// The smaller of two amounts
    pub fn min(self, other: Self) -> Self {
        if self <= other {
            self
        } else {
            other
        }
    }

    /// Require a strictly positive amount
    pub fn require_positive(self) -> Result<Self, MoneyError> {
        if self.0 > Decimal::ZERO {
            Ok(self)
        } else {
            Err(MoneyError::Negative(self.to_string()))
        }
    }

    /// Require a non-negative amount
    pub fn require_non_negative(self) -> Result<Self, MoneyError> {
        if self.0 >= Decimal::ZERO {
            Ok(self)
        } else {
            Err(MoneyError::Negative(self.to_string()))
        }
    }

    /// True when strictly positive
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// True when strictly negative
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// True when zero
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl Neg for MicroCredits {
    type Output = MicroCredits;

    fn neg(self) -> Self::Output {
        MicroCredits(-self.0)
    }
}

impl Default for MicroCredits {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for MicroCredits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MicroCredits {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// Amounts serialize as their canonical integer string in every format,
// including the bincode rows in storage. A corrupted stored value therefore
// surfaces as a parse failure on read, which is what the quarantine store
// exists to absorb.
impl Serialize for MicroCredits {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MicroCredits {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        MicroCredits::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical() {
        assert_eq!(MicroCredits::parse("0").unwrap(), MicroCredits::ZERO);
        assert_eq!(
            MicroCredits::parse("1000000").unwrap(),
            MicroCredits::from_credits(1)
        );
        assert_eq!(
            MicroCredits::parse("-5").unwrap(),
            -MicroCredits::from_micro(5)
        );
        // -0 canonicalizes to 0
        assert_eq!(MicroCredits::parse("-0").unwrap(), MicroCredits::ZERO);
    }

    #[test]
    fn test_parse_rejects_non_integers() {
        for raw in ["", "-", "1.5", "1e6", " 42", "42 ", "+1", "12_000", "abc"] {
            let err = MicroCredits::parse(raw).unwrap_err();
            assert_eq!(err.code(), "AMOUNT_MALFORMED", "raw={:?}", raw);
        }
    }

    #[test]
    fn test_parse_beyond_native_safe_range() {
        // Larger than both 2^53 and u64::MAX
        let big = "36893488147419103232"; // 2^65
        let amount = MicroCredits::parse(big).unwrap();
        assert_eq!(amount.to_string(), big);

        let sum = amount.checked_add(MicroCredits::from_micro(1)).unwrap();
        assert_eq!(sum.to_string(), "36893488147419103233");
    }

    #[test]
    fn test_overflow_detected() {
        // 30 nines exceeds the 96-bit magnitude
        let raw = "999999999999999999999999999999";
        assert_eq!(
            MicroCredits::parse(raw).unwrap_err(),
            MoneyError::Overflow
        );
    }

    #[test]
    fn test_checked_arithmetic() {
        let a = MicroCredits::from_micro(700_000);
        let b = MicroCredits::from_micro(300_000);
        assert_eq!(
            a.checked_add(b).unwrap(),
            MicroCredits::from_credits(1)
        );
        assert_eq!(
            a.checked_sub(b).unwrap(),
            MicroCredits::from_micro(400_000)
        );
        assert!(b.checked_sub(a).unwrap().is_negative());
    }

    #[test]
    fn test_serde_round_trips_as_string() {
        let amount = MicroCredits::parse("18446744073709551616").unwrap(); // 2^64
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"18446744073709551616\"");

        let back: MicroCredits = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);
    }

    #[test]
    fn test_serde_rejects_fractional() {
        let err = serde_json::from_str::<MicroCredits>("\"10.5\"");
        assert!(err.is_err());
    }
}
