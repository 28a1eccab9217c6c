//! Decimal amounts for balances and payments

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

/// Amount of money with exact decimal precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Amount(pub Decimal);

impl Amount {
    /// Create a new amount from a decimal
    pub fn new(value: Decimal) -> Self {
        Amount(value)
    }

    /// Create zero amount
    pub fn zero() -> Self {
        Amount(Decimal::ZERO)
    }

    /// Check if amount is zero
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Check if amount is strictly positive
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Check if amount is below zero
    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Create amount from integer with decimals
    /// e.g., from_integer(150, 2) = 1.50
    pub fn from_integer(value: i64, decimals: u32) -> Self {
        Amount(Decimal::new(value, decimals))
    }
}

impl Default for Amount {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Amount(Decimal::from_str(s)?))
    }
}

impl Add for Amount {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Amount(self.0 + other.0)
    }
}

impl Sub for Amount {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Amount(self.0 - other.0)
    }
}

impl From<Decimal> for Amount {
    fn from(decimal: Decimal) -> Self {
        Amount(decimal)
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Amount(Decimal::from(value))
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_operations() {
        let a = Amount::from_integer(150, 2); // 1.50
        let b = Amount::from_integer(250, 2); // 2.50

        assert_eq!(a + b, Amount::from(4));
        assert_eq!(b - a, Amount::from(1));
        assert!((a - b).is_negative());
    }

    #[test]
    fn test_amount_parse() {
        let a: Amount = "12.34".parse().unwrap();
        assert_eq!(a, Amount::from_integer(1234, 2));
        assert!(a.is_positive());
        assert!("twelve".parse::<Amount>().is_err());
    }
}
