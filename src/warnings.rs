//! Warnings
//!
//! Advisory notes attached to a chosen stack. None of these stop a stack from being used.

use std::fmt;

use jiff::{SignedDuration, Timestamp};
use rust_decimal::Decimal;
use rusty_money::{Money, iso::Currency};

use crate::offers::{OfferKey, OfferSet};

/// Stacks with more offers than this are flagged as complex.
pub const COMPLEX_STACK_SIZE: usize = 3;

/// Stacks below this confidence are flagged.
pub const LOW_CONFIDENCE: Decimal = Decimal::from_parts(8, 0, 0, false, 1);

/// Offers expiring within this window of the evaluation time are flagged.
pub const EXPIRY_WINDOW: SignedDuration = SignedDuration::from_hours(24);

/// An advisory note about a chosen stack.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning<'a> {
    /// The stack has many offers and may be tedious to apply
    ComplexStack {
        /// Number of offers
        offers: usize,
    },

    /// The stack's mean confidence is low
    LowConfidence {
        /// Mean confidence
        confidence: Decimal,
    },

    /// An offer expires soon
    ExpiresSoon {
        /// Offer concerned
        offer: OfferKey,

        /// Its expiry
        expires_at: Timestamp,
    },

    /// An offer only applies above a minimum spend
    MinimumSpend {
        /// Offer concerned
        offer: OfferKey,

        /// The minimum spend
        amount: Money<'a, Currency>,
    },
}

impl fmt::Display for Warning<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::ComplexStack { offers } => {
                write!(f, "{offers} offers to apply; this may take a while")
            }
            Warning::LowConfidence { confidence } => {
                write!(f, "some offers may not work (confidence {})", confidence.round_dp(2))
            }
            Warning::ExpiresSoon { expires_at, .. } => write!(f, "an offer expires at {expires_at}"),
            Warning::MinimumSpend { amount, .. } => write!(f, "requires a minimum spend of {amount}"),
        }
    }
}

/// Warnings for a stack of `keys` with mean `confidence`, evaluated at `now`.
pub fn stack_warnings<'a>(
    keys: &[OfferKey],
    offers: &OfferSet<'a>,
    confidence: Decimal,
    now: Timestamp,
) -> Vec<Warning<'a>> {
    let mut warnings = Vec::new();

    if keys.is_empty() {
        return warnings;
    }

    if keys.len() > COMPLEX_STACK_SIZE {
        warnings.push(Warning::ComplexStack { offers: keys.len() });
    }

    if confidence < LOW_CONFIDENCE {
        warnings.push(Warning::LowConfidence { confidence });
    }

    for key in keys {
        let Some(offer) = offers.get(*key) else {
            continue;
        };

        if let Some(expires_at) = offer.expires_at
            && expires_at.duration_since(now) <= EXPIRY_WINDOW
        {
            warnings.push(Warning::ExpiresSoon {
                offer: *key,
                expires_at,
            });
        }

        if let Some(amount) = offer.min_spend {
            warnings.push(Warning::MinimumSpend { offer: *key, amount });
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use jiff::ToSpan;
    use rusty_money::iso::GBP;
    use testresult::TestResult;

    use super::*;
    use crate::offers::{OfferKind, test_support::offer};

    #[test]
    fn large_low_confidence_stacks_are_flagged() {
        let mut offers = OfferSet::with_key();
        let keys: Vec<_> = (0..4)
            .map(|index| offers.insert(offer(&format!("o{index}"), OfferKind::FixedAmount, None)))
            .collect();

        let warnings = stack_warnings(&keys, &offers, Decimal::new(7, 1), Timestamp::UNIX_EPOCH);

        assert_eq!(
            warnings,
            vec![
                Warning::ComplexStack { offers: 4 },
                Warning::LowConfidence {
                    confidence: Decimal::new(7, 1)
                },
            ]
        );
    }

    #[test]
    fn expiring_offers_and_minimum_spends_are_flagged() -> TestResult {
        let now = Timestamp::UNIX_EPOCH;
        let mut offers = OfferSet::with_key();

        let mut soon = offer("soon", OfferKind::FixedAmount, None);
        soon.expires_at = Some(now.checked_add(2.hours())?);

        let mut later = offer("later", OfferKind::FixedAmount, None);
        later.expires_at = Some(now.checked_add(72.hours())?);
        later.min_spend = Some(Money::from_minor(2000, GBP));

        let soon = offers.insert(soon);
        let later = offers.insert(later);

        let warnings = stack_warnings(&[soon, later], &offers, Decimal::ONE, now);

        assert_eq!(
            warnings,
            vec![
                Warning::ExpiresSoon {
                    offer: soon,
                    expires_at: now.checked_add(2.hours())?,
                },
                Warning::MinimumSpend {
                    offer: later,
                    amount: Money::from_minor(2000, GBP),
                },
            ]
        );

        Ok(())
    }

    #[test]
    fn empty_stacks_have_no_warnings() {
        let offers = OfferSet::with_key();

        assert!(stack_warnings(&[], &offers, Decimal::ZERO, Timestamp::UNIX_EPOCH).is_empty());
    }
}
