//! Savings
//!
//! Replays a subset's offers against the product price in canonical order and records
//! what each step saved. All arithmetic is done in minor units.

use rust_decimal::Decimal;
use rusty_money::{Money, iso::Currency};
use smallvec::SmallVec;
use thiserror::Error;

use crate::{
    compatibility::CandidateSubset,
    constraints::Constraints,
    money::{AmountError, percent_of_minor, percentage_from_points, to_minor},
    offers::{Offer, OfferKey, OfferKind, OfferSet},
    products::ProductContext,
};

/// Why an offer contributed nothing to a breakdown.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SavingsError {
    /// The offer has no face value for a mechanism that needs one.
    #[error("{0} offer has no value")]
    MissingValue(OfferKind),

    /// A buy-x-get-y offer has no quantities.
    #[error("buy-x-get-y offer has no quantities")]
    MissingQuantities,

    /// Too few units are being bought for a buy-x-get-y offer.
    #[error("buy-x-get-y offer needs {required} units, only {quantity} bought")]
    NotQualifying {
        /// Units one buy-and-get group needs
        required: u32,

        /// Units being bought
        quantity: u32,
    },

    /// The offer's mechanism is unknown.
    #[error("offer mechanism is unknown")]
    Unclassified,

    /// Converting an amount failed.
    #[error(transparent)]
    Amount(#[from] AmountError),

    /// Summing savings overflowed.
    #[error("savings total overflowed")]
    Overflow,
}

/// One offer's effect within a breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct SavingsStep<'a> {
    /// Offer applied
    pub offer: OfferKey,

    /// Its mechanism
    pub kind: OfferKind,

    /// Amount saved by this step
    pub savings: Money<'a, Currency>,

    /// Running price before the step
    pub price_before: Money<'a, Currency>,

    /// Running price after the step; unchanged for shipping and cashback
    pub price_after: Money<'a, Currency>,

    /// Set when the offer contributed nothing because it could not be evaluated
    pub skipped: Option<SavingsError>,
}

impl SavingsStep<'_> {
    /// Whether the step was skipped.
    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }
}

/// Per-step savings and totals for one subset.
///
/// `total` includes cashback, which never lowers `final_price`, so it is not always
/// `base_price - final_price`. `immediate_savings` and `deferred_credit` split it.
#[derive(Debug, Clone, PartialEq)]
pub struct SavingsBreakdown<'a> {
    /// Steps in application order
    pub steps: SmallVec<[SavingsStep<'a>; 8]>,

    /// Price before any offer
    pub base_price: Money<'a, Currency>,

    /// Immediate savings plus deferred credit
    pub total: Money<'a, Currency>,

    /// Reductions to the payable price, including waived shipping
    pub immediate_savings: Money<'a, Currency>,

    /// Cashback credited after purchase
    pub deferred_credit: Money<'a, Currency>,

    /// Price left to pay, never negative
    pub final_price: Money<'a, Currency>,

    /// `total / base_price * 100`, zero when the base price is zero
    pub effective_discount_percent: Decimal,
}

impl<'a> SavingsBreakdown<'a> {
    /// A breakdown with no steps and zero savings.
    pub fn empty(product: &ProductContext<'a>) -> Self {
        let currency = product.currency();
        let base_minor = product.base_price.to_minor_units().max(0);

        Self {
            steps: SmallVec::new(),
            base_price: product.base_price,
            total: Money::from_minor(0, currency),
            immediate_savings: Money::from_minor(0, currency),
            deferred_credit: Money::from_minor(0, currency),
            final_price: Money::from_minor(base_minor, currency),
            effective_discount_percent: Decimal::ZERO,
        }
    }

    /// Number of steps, skipped ones included.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Whether any step was skipped.
    pub fn has_skipped(&self) -> bool {
        self.steps.iter().any(SavingsStep::is_skipped)
    }
}

/// Evaluate a subset, applying its offers in canonical order.
pub fn evaluate<'a>(
    subset: &CandidateSubset,
    offers: &OfferSet<'a>,
    product: &ProductContext<'a>,
    constraints: &Constraints<'a>,
) -> SavingsBreakdown<'a> {
    let ordered = canonical_order(&subset.offers, offers);

    replay(&ordered, offers, product, constraints)
}

/// Sort `keys` into canonical application order: percentage, fixed amount, buy-x-get-y,
/// free shipping, cashback. Offers of the same kind keep their relative order.
pub fn canonical_order(keys: &[OfferKey], offers: &OfferSet<'_>) -> SmallVec<[OfferKey; 8]> {
    let mut ordered: SmallVec<[OfferKey; 8]> = keys.iter().copied().collect();

    ordered.sort_by_key(|key| {
        offers
            .get(*key)
            .map_or(u8::MAX, |offer| offer.kind.application_rank())
    });

    ordered
}

/// Apply `ordered` offers to the product price exactly in the order given.
///
/// Malformed offers contribute zero and are flagged on their step; this never fails.
pub fn replay<'a>(
    ordered: &[OfferKey],
    offers: &OfferSet<'a>,
    product: &ProductContext<'a>,
    constraints: &Constraints<'a>,
) -> SavingsBreakdown<'a> {
    let currency = product.currency();
    let base_minor = product.base_price.to_minor_units().max(0);

    let mut running = base_minor;
    let mut immediate: i64 = 0;
    let mut deferred: i64 = 0;
    let mut steps = SmallVec::with_capacity(ordered.len());

    for key in ordered {
        let Some(offer) = offers.get(*key) else {
            continue;
        };

        let before = running;
        let outcome = step_savings(offer, running, product, constraints).and_then(|amount| {
            let (immediate_after, deferred_after) = if offer.kind == OfferKind::Cashback {
                (immediate, deferred.checked_add(amount).ok_or(SavingsError::Overflow)?)
            } else {
                (immediate.checked_add(amount).ok_or(SavingsError::Overflow)?, deferred)
            };

            Ok((amount, immediate_after, deferred_after))
        });

        let (amount, skipped) = match outcome {
            Ok((amount, immediate_after, deferred_after)) => {
                immediate = immediate_after;
                deferred = deferred_after;

                if offer.kind.reduces_price() {
                    running -= amount;
                }

                (amount, None)
            }
            Err(error) => (0, Some(error)),
        };

        steps.push(SavingsStep {
            offer: *key,
            kind: offer.kind,
            savings: Money::from_minor(amount, currency),
            price_before: Money::from_minor(before, currency),
            price_after: Money::from_minor(running, currency),
            skipped,
        });
    }

    let total = immediate.saturating_add(deferred);

    SavingsBreakdown {
        steps,
        base_price: product.base_price,
        total: Money::from_minor(total, currency),
        immediate_savings: Money::from_minor(immediate, currency),
        deferred_credit: Money::from_minor(deferred, currency),
        final_price: Money::from_minor(running.max(0), currency),
        effective_discount_percent: discount_percent(total, base_minor),
    }
}

/// Savings for one offer at the current running price, capped and never negative.
fn step_savings(
    offer: &Offer<'_>,
    running: i64,
    product: &ProductContext<'_>,
    constraints: &Constraints<'_>,
) -> Result<i64, SavingsError> {
    let currency = product.currency();

    let raw = match offer.kind {
        OfferKind::Percentage | OfferKind::Cashback => {
            let points = offer.value.ok_or(SavingsError::MissingValue(offer.kind))?;

            percent_of_minor(&percentage_from_points(points), running)?
        }
        OfferKind::FixedAmount => {
            let value = offer.value.ok_or(SavingsError::MissingValue(offer.kind))?;

            to_minor(value, currency)?
        }
        OfferKind::BuyXGetY => buy_get_savings(offer, product)?,
        OfferKind::FreeShipping => constraints.shipping_minor(),
        OfferKind::Other => return Err(SavingsError::Unclassified),
    };

    let mut amount = raw.max(0);

    if offer.kind.reduces_price() {
        amount = amount.min(running.max(0));
    }

    if let Some(cap) = &offer.max_savings {
        amount = amount.min(cap.to_minor_units().max(0));
    }

    Ok(amount)
}

/// One free unit set per complete group of `buy + get` units bought.
fn buy_get_savings(offer: &Offer<'_>, product: &ProductContext<'_>) -> Result<i64, SavingsError> {
    let buy_get = offer.buy_get.ok_or(SavingsError::MissingQuantities)?;
    let required = buy_get
        .buy
        .checked_add(buy_get.get)
        .filter(|required| *required > 0)
        .ok_or(SavingsError::MissingQuantities)?;

    if product.quantity < required {
        return Err(SavingsError::NotQualifying {
            required,
            quantity: product.quantity,
        });
    }

    let groups = product.quantity / required;

    product
        .unit_price_minor()
        .checked_mul(i64::from(buy_get.get))
        .and_then(|per_group| per_group.checked_mul(i64::from(groups)))
        .ok_or(SavingsError::Overflow)
}

fn discount_percent(total_minor: i64, base_minor: i64) -> Decimal {
    if base_minor <= 0 {
        return Decimal::ZERO;
    }

    Decimal::from(total_minor) * Decimal::ONE_HUNDRED / Decimal::from(base_minor)
}
