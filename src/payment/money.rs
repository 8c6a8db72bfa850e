use std::fmt::{self, Display, Formatter};
use std::ops::{Add, Sub};
use std::str::FromStr;

use rust_decimal::prelude::Zero;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Non-negative amount of money in the ledger's unit of account.
///
/// Serialized as a decimal string (`"0.10"`); accepts either a string or a
/// JSON number when deserializing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct MoneyAmount(Decimal);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyAmountParseError {
    #[error("Failed to parse decimal")]
    DecimalParse,
    #[error("Negative amount not allowed")]
    Negative,
}

impl MoneyAmount {
    pub const ZERO: MoneyAmount = MoneyAmount(Decimal::ZERO);

    pub fn new(value: Decimal) -> Result<Self, MoneyAmountParseError> {
        if value < Decimal::zero() {
            return Err(MoneyAmountParseError::Negative);
        }
        Ok(Self(value))
    }

    /// `cents / 100`; never negative
    pub fn from_cents(cents: u32) -> Self {
        Self(Decimal::new(i64::from(cents), 2))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// `self - other`, floored at zero
    pub fn saturating_sub(self, other: MoneyAmount) -> MoneyAmount {
        if other.0 >= self.0 {
            MoneyAmount::ZERO
        } else {
            MoneyAmount(self.0 - other.0)
        }
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal = Decimal::from_str(s.trim()).map_err(|_| MoneyAmountParseError::DecimalParse)?;
        Self::new(decimal)
    }
}

impl TryFrom<Decimal> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MoneyAmount> for Decimal {
    fn from(value: MoneyAmount) -> Self {
        value.0
    }
}

impl Add for MoneyAmount {
    type Output = MoneyAmount;

    fn add(self, rhs: MoneyAmount) -> MoneyAmount {
        MoneyAmount(self.0 + rhs.0)
    }
}

/// Saturating: money never goes below zero.
impl Sub for MoneyAmount {
    type Output = MoneyAmount;

    fn sub(self, rhs: MoneyAmount) -> MoneyAmount {
        self.saturating_sub(rhs)
    }
}
