//! Money in minor currency units
//!
//! Amounts are held as integer pence so that persisted totals never carry
//! floating-point drift. On the wire they appear as decimal numbers with two
//! fractional digits (`7.66`).

use rust_decimal::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};

/// Number of fractional digits carried by every amount
pub const DECIMAL_PLACES: u32 = 2;

/// Integer amount of pence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_pence(pence: i64) -> Self {
        Self(pence)
    }

    pub const fn pence(self) -> i64 {
        self.0
    }

    /// Convert a decimal amount, rounding half away from zero to whole pence
    ///
    /// Returns `None` when the value does not fit in an `i64` of pence.
    pub fn from_decimal(value: Decimal) -> Option<Self> {
        let pence = value
            .checked_mul(Decimal::ONE_HUNDRED)?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        pence.to_i64().map(Self)
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, DECIMAL_PLACES)
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Subtraction that stops at zero
    pub fn saturating_sub(self, rhs: Money) -> Money {
        Money((self.0 - rhs.0).max(0))
    }

    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    /// Multiply by an integer quantity, `None` on overflow
    pub fn checked_mul(self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(i64::from(quantity)).map(Money)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.copied().sum()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "£{}", self.to_decimal())
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        rust_decimal::serde::float::serialize(&self.to_decimal(), serializer)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = <Decimal as Deserialize>::deserialize(deserializer)?;
        Money::from_decimal(value)
            .ok_or_else(|| serde::de::Error::custom("amount out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_decimal_rounds_half_up() {
        assert_eq!(
            Money::from_decimal(Decimal::new(1665, 3)),
            Some(Money::from_pence(167))
        );
        assert_eq!(
            Money::from_decimal(Decimal::new(1664, 3)),
            Some(Money::from_pence(166))
        );
        assert_eq!(
            Money::from_decimal(Decimal::new(-1665, 3)),
            Some(Money::from_pence(-167))
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_pence(766).to_string(), "£7.66");
        assert_eq!(Money::from_pence(250).to_string(), "£2.50");
        assert_eq!(Money::ZERO.to_string(), "£0.00");
    }

    #[test]
    fn test_serde_as_decimal_number() {
        let json = serde_json::to_string(&Money::from_pence(766)).unwrap();
        assert_eq!(json, "7.66");

        let parsed: Money = serde_json::from_str("1.65").unwrap();
        assert_eq!(parsed, Money::from_pence(165));

        let parsed: Money = serde_json::from_str("10").unwrap();
        assert_eq!(parsed, Money::from_pence(1000));
    }

    #[test]
    fn test_oversized_amount_is_rejected() {
        assert!(Money::from_decimal(Decimal::MAX).is_none());
        assert!(serde_json::from_str::<Money>("1e27").is_err());
        assert!(serde_json::from_str::<Money>("1e40").is_err());
    }

    #[test]
    fn test_arithmetic() {
        let items = [Money::from_pence(330), Money::from_pence(100)];
        let total: Money = items.iter().sum();
        assert_eq!(total, Money::from_pence(430));
        assert_eq!(
            Money::from_pence(100).saturating_sub(Money::from_pence(250)),
            Money::ZERO
        );
        assert_eq!(Money::from_pence(165).checked_mul(2), Some(Money::from_pence(330)));
        assert_eq!(Money::from_pence(i64::MAX).checked_mul(2), None);
    }
}
