//! Money
//!
//! Minor-unit helpers shared by the normalizer, the savings evaluator and the fixtures.

use decimal_percentage::Percentage;
use num_traits::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use rusty_money::{Money, iso::Currency};
use thiserror::Error;

/// Errors raised while converting amounts between representations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AmountError {
    /// A major-unit amount could not be represented in minor units.
    #[error("amount {0} cannot be represented in minor units")]
    NotRepresentable(Decimal),

    /// Percentage calculation overflowed.
    #[error("percentage conversion overflowed or was not finite")]
    PercentConversion,
}

/// Number of minor units in one major unit of `currency` (100 for GBP and USD).
pub fn minor_scale(currency: &Currency) -> Decimal {
    10_i64
        .checked_pow(currency.exponent)
        .map_or(Decimal::ONE_HUNDRED, Decimal::from)
}

/// Convert a major-unit amount (e.g. `12.50`) into minor units, rounding half away from zero.
///
/// # Errors
///
/// Returns [`AmountError::NotRepresentable`] if the amount overflows an `i64` of minor units.
pub fn to_minor(amount: Decimal, currency: &Currency) -> Result<i64, AmountError> {
    amount
        .checked_mul(minor_scale(currency))
        .map(|scaled| scaled.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|rounded| rounded.to_i64())
        .ok_or(AmountError::NotRepresentable(amount))
}

/// Convert minor units back into a major-unit decimal.
pub fn to_major(minor: i64, currency: &Currency) -> Decimal {
    Decimal::from(minor) / minor_scale(currency)
}

/// Build a [`Money`] value from a major-unit amount.
///
/// # Errors
///
/// Returns [`AmountError::NotRepresentable`] if the amount overflows minor units.
pub fn money_from_major(
    amount: Decimal,
    currency: &Currency,
) -> Result<Money<'_, Currency>, AmountError> {
    Ok(Money::from_minor(to_minor(amount, currency)?, currency))
}

/// Turn percentage points (`15` for 15%) into a [`Percentage`].
pub fn percentage_from_points(points: Decimal) -> Percentage {
    Percentage::from(points / Decimal::ONE_HUNDRED)
}

/// Turn a [`Percentage`] back into percentage points.
pub fn percent_points(percent: Percentage) -> Decimal {
    (percent * Decimal::ONE) * Decimal::ONE_HUNDRED
}

/// Calculate a percentage of a minor-unit amount, rounding half away from zero.
///
/// # Errors
///
/// Returns [`AmountError::PercentConversion`] if the multiplication overflows.
pub fn percent_of_minor(percent: &Percentage, minor: i64) -> Result<i64, AmountError> {
    let minor = Decimal::from_i64(minor).ok_or(AmountError::PercentConversion)?;

    ((*percent) * Decimal::ONE)
        .checked_mul(minor)
        .ok_or(AmountError::PercentConversion)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or(AmountError::PercentConversion)
}
