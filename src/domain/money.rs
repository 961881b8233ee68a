use crate::error::DispatchError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A strictly positive monetary amount (quotations, final bills, payments).
///
/// Deserialization goes through [`Amount::new`], so persisted or scripted
/// values can never smuggle in a zero or negative amount.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, DispatchError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(DispatchError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Amount in minor currency units (paise, cents), as gateways expect.
    pub fn minor_units(&self) -> Decimal {
        (self.0 * Decimal::ONE_HUNDRED).round()
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = DispatchError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}
