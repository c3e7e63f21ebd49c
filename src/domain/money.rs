use crate::app_error::AppError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use utoipa::ToSchema;

/// Number of fractional digits carried by every monetary value.
pub const MONEY_SCALE: u32 = 2;

/// A non-negative monetary value with two decimal places of precision.
///
/// Wraps `rust_decimal::Decimal` so totals, fees and escrow amounts are
/// compared and summed without floating point drift.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, ToSchema,
)]
#[schema(value_type = String, example = "45.00")]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Self = Self(Decimal::ZERO);
    /// Largest amount a `NUMERIC(12, 2)` column holds.
    pub const MAX: Self = Self(Decimal::from_parts(3_567_587_327, 232, 0, false, 2));

    /// Builds a value between zero and [`Money::MAX`] with at most two
    /// decimals.
    pub fn new(value: Decimal) -> Result<Self, AppError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(AppError::BadRequest(format!(
                "monetary amount must not be negative, got {value}"
            )));
        }
        if value.normalize().scale() > MONEY_SCALE {
            return Err(AppError::BadRequest(format!(
                "monetary amount {value} has more than {MONEY_SCALE} decimal places"
            )));
        }
        if value > Self::MAX.0 {
            return Err(AppError::BadRequest(format!(
                "monetary amount {value} exceeds {}",
                Self::MAX
            )));
        }
        Ok(Self::from_decimal_unchecked(value))
    }

    /// Builds a strictly positive value.
    pub fn positive(value: Decimal) -> Result<Self, AppError> {
        let money = Self::new(value)?;
        if money.is_zero() {
            return Err(AppError::BadRequest(
                "monetary amount must be positive".to_string(),
            ));
        }
        Ok(money)
    }

    /// Wraps a value read back from storage, where the column already
    /// enforces the scale.
    pub fn from_decimal_unchecked(value: Decimal) -> Self {
        let mut value = value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
        value.rescale(MONEY_SCALE);
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// `None` when the sum would exceed [`Money::MAX`].
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0
            .checked_add(rhs.0)
            .filter(|sum| *sum <= Self::MAX.0)
            .map(Self)
    }

    /// Line totals: unit price times quantity, `None` beyond [`Money::MAX`].
    pub fn checked_mul(self, quantity: u32) -> Option<Self> {
        self.0
            .checked_mul(Decimal::from(quantity))
            .filter(|product| *product <= Self::MAX.0)
            .map(Self::from_decimal_unchecked)
    }

    /// Subtraction that stops at zero.
    pub fn saturating_sub(self, rhs: Self) -> Self {
        if rhs.0 >= self.0 {
            Self::ZERO
        } else {
            Self(self.0 - rhs.0)
        }
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl TryFrom<Decimal> for Money {
    type Error = AppError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        self.saturating_sub(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money_validation() {
        assert!(Money::new(dec!(0)).is_ok());
        assert!(Money::new(dec!(45.00)).is_ok());
        assert!(Money::new(dec!(45.10000)).is_ok());
        assert!(matches!(
            Money::new(dec!(-1.00)),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            Money::new(dec!(1.005)),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            Money::positive(dec!(0.00)),
            Err(AppError::BadRequest(_))
        ));
        assert_eq!(Money::MAX.value(), dec!(9999999999.99));
        assert!(Money::new(dec!(9999999999.99)).is_ok());
        assert!(matches!(
            Money::new(dec!(10000000000.00)),
            Err(AppError::BadRequest(_))
        ));
        assert!(Money::new(Decimal::MAX).is_err());
    }

    #[test]
    fn test_money_arithmetic() {
        let price = Money::new(dec!(12.50)).unwrap();
        let fee = Money::new(dec!(7.50)).unwrap();
        assert_eq!(price.checked_mul(3).unwrap().value(), dec!(37.50));
        assert_eq!((price.checked_mul(3).unwrap() + fee).value(), dec!(45.00));
        assert_eq!(fee - price, Money::ZERO);
        assert_eq!(price - fee, Money::new(dec!(5.00)).unwrap());
    }

    #[test]
    fn test_checked_arithmetic_stops_at_column_range() {
        let big = Money::new(dec!(6000000000.00)).unwrap();
        assert!(big.checked_add(big).is_none());
        assert!(big.checked_mul(2).is_none());
        assert_eq!(Money::MAX.checked_add(Money::ZERO), Some(Money::MAX));
        assert!(Money::MAX.checked_mul(u32::MAX).is_none());

        let total = [dec!(1.10), dec!(2.20), dec!(3.30)]
            .into_iter()
            .map(|d| Money::new(d).unwrap())
            .try_fold(Money::ZERO, Money::checked_add)
            .unwrap();
        assert_eq!(total.to_string(), "6.60");
    }
}
