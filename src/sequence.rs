//! Application Sequence
//!
//! Turns a winning breakdown into the ordered steps a shopper (or checkout automation)
//! follows to realise its savings.

use std::{fmt, time::Duration};

use rusty_money::{Money, iso::Currency};
use smallvec::SmallVec;

use crate::{
    offers::{OfferKey, OfferKind, OfferSet},
    savings::{SavingsBreakdown, SavingsError},
};

/// Seconds assumed per step when estimating how long a plan takes.
pub const DEFAULT_SECONDS_PER_STEP: u64 = 20;

/// Minimum spend within this percentage of the running price counts as a risk.
const THRESHOLD_MARGIN_PERCENT: i128 = 5;

/// What the shopper does for one step.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StepAction {
    /// Type a code at checkout
    EnterCode(String),

    /// Nothing; the offer applies itself
    AutoApplied,

    /// Activate the cashback offer before paying
    ActivateCashback,

    /// Put enough units in the basket to qualify
    AddQualifyingItems {
        /// Units to buy
        buy: u32,

        /// Units received free
        get: u32,
    },
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepAction::EnterCode(code) => write!(f, "enter code {code} at checkout"),
            StepAction::AutoApplied => f.write_str("no action, applied automatically"),
            StepAction::ActivateCashback => f.write_str("activate cashback before paying"),
            StepAction::AddQualifyingItems { buy, get } => {
                write!(f, "add {} qualifying items to the basket", buy.saturating_add(*get))
            }
        }
    }
}

/// How the shopper can confirm a step worked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verification {
    /// The subtotal drops before payment
    ReducedSubtotal,

    /// Shipping shows as free
    ShippingWaived,

    /// The cashback is tracked after purchase
    CashbackTracked,

    /// Nothing to confirm; the step cannot be evaluated
    Unverifiable,
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verification::ReducedSubtotal => "confirm reduced subtotal shown before payment",
            Verification::ShippingWaived => "confirm shipping shows as free",
            Verification::CashbackTracked => "confirm cashback is tracked after purchase",
            Verification::Unverifiable => "nothing to confirm",
        })
    }
}

impl From<OfferKind> for Verification {
    fn from(kind: OfferKind) -> Self {
        match kind {
            OfferKind::Percentage | OfferKind::FixedAmount | OfferKind::BuyXGetY => {
                Verification::ReducedSubtotal
            }
            OfferKind::FreeShipping => Verification::ShippingWaived,
            OfferKind::Cashback => Verification::CashbackTracked,
            OfferKind::Other => Verification::Unverifiable,
        }
    }
}

/// One step of an application sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationStep<'a> {
    /// 1-based position
    pub position: usize,

    /// Offer applied
    pub offer: OfferKey,

    /// Offer identifier, for display
    pub offer_id: String,

    /// What to do
    pub action: StepAction,

    /// Savings expected from this step
    pub expected_savings: Money<'a, Currency>,

    /// How to confirm it worked
    pub verification: Verification,

    /// Whether the step could not be evaluated and is expected to save nothing
    pub skipped: bool,
}

/// Something that may stop a plan from delivering its expected savings.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskFactor<'a> {
    /// The offer has not been verified upstream
    Unverified {
        /// Offer concerned
        offer: OfferKey,
    },

    /// The minimum spend is within a few percent of the running price, so earlier
    /// reductions may drop the order below it
    ThresholdNearPrice {
        /// Offer concerned
        offer: OfferKey,

        /// Its minimum spend
        min_spend: Money<'a, Currency>,

        /// Running price when the offer is applied
        price: Money<'a, Currency>,
    },

    /// The offer could not be evaluated
    Skipped {
        /// Offer concerned
        offer: OfferKey,

        /// Why it was skipped
        reason: SavingsError,
    },
}

impl RiskFactor<'_> {
    /// Offer the risk concerns.
    pub fn offer(&self) -> OfferKey {
        match self {
            RiskFactor::Unverified { offer }
            | RiskFactor::ThresholdNearPrice { offer, .. }
            | RiskFactor::Skipped { offer, .. } => *offer,
        }
    }
}

impl fmt::Display for RiskFactor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskFactor::Unverified { .. } => f.write_str("offer has not been verified"),
            RiskFactor::ThresholdNearPrice {
                min_spend, price, ..
            } => write!(f, "minimum spend {min_spend} is close to the running price {price}"),
            RiskFactor::Skipped { reason, .. } => write!(f, "offer was skipped: {reason}"),
        }
    }
}

/// Ordered, actionable plan for a chosen stack.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApplicationSequence<'a> {
    /// Steps in canonical application order
    pub steps: SmallVec<[ApplicationStep<'a>; 8]>,

    /// Fixed per-step estimate of how long the plan takes
    pub estimated_time: Duration,

    /// Risks found while building the plan
    pub risk_factors: Vec<RiskFactor<'a>>,
}

impl ApplicationSequence<'_> {
    /// Whether the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Estimated time in whole seconds.
    pub fn estimated_seconds(&self) -> u64 {
        self.estimated_time.as_secs()
    }
}

/// Build the application sequence for `breakdown`, one step per offer in the order the
/// breakdown applied them.
pub fn build_sequence<'a>(
    breakdown: &SavingsBreakdown<'a>,
    offers: &OfferSet<'a>,
    seconds_per_step: u64,
) -> ApplicationSequence<'a> {
    let mut steps = SmallVec::with_capacity(breakdown.steps.len());
    let mut risk_factors = Vec::new();

    for savings_step in &breakdown.steps {
        let Some(offer) = offers.get(savings_step.offer) else {
            continue;
        };

        let action = match (&offer.code, offer.kind, offer.buy_get) {
            (Some(code), _, _) if offer.requires_code() => StepAction::EnterCode(code.clone()),
            (_, OfferKind::Cashback, _) => StepAction::ActivateCashback,
            (_, OfferKind::BuyXGetY, Some(buy_get)) => StepAction::AddQualifyingItems {
                buy: buy_get.buy,
                get: buy_get.get,
            },
            _ => StepAction::AutoApplied,
        };

        if !offer.verified {
            risk_factors.push(RiskFactor::Unverified {
                offer: savings_step.offer,
            });
        }

        if let Some(min_spend) = &offer.min_spend
            && near_threshold(
                min_spend.to_minor_units(),
                savings_step.price_before.to_minor_units(),
            )
        {
            risk_factors.push(RiskFactor::ThresholdNearPrice {
                offer: savings_step.offer,
                min_spend: *min_spend,
                price: savings_step.price_before,
            });
        }

        if let Some(reason) = &savings_step.skipped {
            risk_factors.push(RiskFactor::Skipped {
                offer: savings_step.offer,
                reason: reason.clone(),
            });
        }

        steps.push(ApplicationStep {
            position: steps.len() + 1,
            offer: savings_step.offer,
            offer_id: offer.id.clone(),
            action,
            expected_savings: savings_step.savings,
            verification: Verification::from(offer.kind),
            skipped: savings_step.is_skipped(),
        });
    }

    let step_count = u64::try_from(steps.len()).unwrap_or(u64::MAX);

    ApplicationSequence {
        steps,
        estimated_time: Duration::from_secs(seconds_per_step.saturating_mul(step_count)),
        risk_factors,
    }
}

/// Whether a positive minimum spend is at least 95% of `price`.
fn near_threshold(min_spend_minor: i64, price_minor: i64) -> bool {
    min_spend_minor > 0
        && i128::from(min_spend_minor) * 100
            >= i128::from(price_minor) * (100 - THRESHOLD_MARGIN_PERCENT)
}
