//! Ranking
//!
//! Composite scoring of evaluated subsets.

use std::cmp::Ordering;

use rust_decimal::Decimal;

use crate::{
    compatibility::CandidateSubset,
    money::to_major,
    offers::OfferSet,
    savings::SavingsBreakdown,
};

/// Runners-up kept alongside the winning stack.
pub const MAX_ALTERNATIVES: usize = 3;

const SAVINGS_WEIGHT: Decimal = Decimal::from_parts(40, 0, 0, false, 2);
const CONFIDENCE_WEIGHT: Decimal = Decimal::from_parts(25, 0, 0, false, 2);
const USABILITY_WEIGHT: Decimal = Decimal::from_parts(20, 0, 0, false, 2);
const STEP_PENALTY: Decimal = Decimal::from_parts(15, 0, 0, false, 2);

/// An evaluated subset with its scores.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedStack<'a> {
    /// The subset
    pub subset: CandidateSubset,

    /// Its savings breakdown
    pub breakdown: SavingsBreakdown<'a>,

    /// Mean confidence of its offers, in `0..=1`
    pub confidence: Decimal,

    /// `1 / (1 + steps)`
    pub usability: Decimal,

    /// Weighted blend of savings, confidence, usability and step count
    pub composite_score: Decimal,

    /// Composite score after personalisation; equal to it when no signal is given
    pub personalized_score: Decimal,
}

impl<'a> RankedStack<'a> {
    /// Score an evaluated subset.
    pub fn new(
        subset: CandidateSubset,
        breakdown: SavingsBreakdown<'a>,
        offers: &OfferSet<'a>,
    ) -> Self {
        let steps = Decimal::from(breakdown.step_count());
        let confidence = mean_confidence(&subset, offers);
        let usability = Decimal::ONE / (Decimal::ONE + steps);
        let savings = to_major(
            breakdown.total.to_minor_units(),
            breakdown.total.currency(),
        );

        let composite_score = SAVINGS_WEIGHT * savings
            + CONFIDENCE_WEIGHT * confidence * Decimal::ONE_HUNDRED
            + USABILITY_WEIGHT * usability * Decimal::ONE_HUNDRED
            - STEP_PENALTY * steps;

        Self {
            subset,
            breakdown,
            confidence,
            usability,
            composite_score,
            personalized_score: composite_score,
        }
    }
}

/// Mean confidence of a subset's offers; zero for an empty subset.
pub fn mean_confidence(subset: &CandidateSubset, offers: &OfferSet<'_>) -> Decimal {
    let (sum, count) = subset
        .offers
        .iter()
        .filter_map(|key| offers.get(*key))
        .fold((Decimal::ZERO, 0_u32), |(sum, count), offer| {
            (sum + offer.confidence, count + 1)
        });

    if count == 0 {
        Decimal::ZERO
    } else {
        sum / Decimal::from(count)
    }
}

/// Ordering used for every ranked list: higher (personalised) score first, then higher
/// compatibility score, then fewer steps.
pub fn compare(left: &RankedStack<'_>, right: &RankedStack<'_>) -> Ordering {
    right
        .personalized_score
        .cmp(&left.personalized_score)
        .then_with(|| {
            right
                .subset
                .compatibility_score
                .cmp(&left.subset.compatibility_score)
        })
        .then_with(|| {
            left.breakdown
                .step_count()
                .cmp(&right.breakdown.step_count())
        })
}

/// Score and sort evaluated subsets, best first.
///
/// The sort is stable, so fully tied stacks keep their evaluation order.
pub fn rank<'a, I>(evaluated: I, offers: &OfferSet<'a>) -> Vec<RankedStack<'a>>
where
    I: IntoIterator<Item = (CandidateSubset, SavingsBreakdown<'a>)>,
{
    let mut ranked: Vec<RankedStack<'a>> = evaluated
        .into_iter()
        .map(|(subset, breakdown)| RankedStack::new(subset, breakdown, offers))
        .collect();

    ranked.sort_by(compare);

    ranked
}

/// The best stacks pushed so far, best first, holding at most `capacity` of them.
///
/// Memory stays bounded however many stacks are pushed. Stacks that tie under
/// [`compare`] keep the order they were pushed in.
#[derive(Debug, Clone)]
pub struct TopStacks<'a> {
    stacks: Vec<RankedStack<'a>>,
    capacity: usize,
}

impl<'a> TopStacks<'a> {
    /// Keep at most `capacity` stacks.
    pub fn new(capacity: usize) -> Self {
        Self {
            stacks: Vec::with_capacity(capacity.saturating_add(1)),
            capacity,
        }
    }

    /// Offer `stack` for selection; it is dropped unless it beats a kept stack or there
    /// is room.
    pub fn push(&mut self, stack: RankedStack<'a>) {
        let position = self
            .stacks
            .partition_point(|kept| compare(kept, &stack) != Ordering::Greater);

        if position >= self.capacity {
            return;
        }

        self.stacks.insert(position, stack);
        self.stacks.truncate(self.capacity);
    }

    /// Number of kept stacks.
    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    /// Whether nothing has been kept.
    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    /// Kept stacks, best first.
    pub fn into_vec(self) -> Vec<RankedStack<'a>> {
        self.stacks
    }
}
