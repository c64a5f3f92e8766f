//! Personalization
//!
//! Re-weights ranked stacks with an externally computed preference signal. Nothing here
//! learns; the signal is consumed as given.

use std::{
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
};

use rust_decimal::Decimal;
use rustc_hash::FxHasher;

use crate::{
    offers::{Offer, OfferKind, OfferSet},
    ranking::{RankedStack, compare},
};

/// Smallest match factor applied; signals may not zero a stack out.
pub const MIN_MATCH_FACTOR: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Largest match factor applied.
pub const MAX_MATCH_FACTOR: Decimal = Decimal::TWO;

/// A caller-supplied user preference signal.
pub trait PreferenceSignal: fmt::Debug + Send + Sync {
    /// Factor in `(0, 2]` to multiply a stack's composite score by. Values outside the
    /// range are clamped.
    fn match_factor(&self, offers: &[&Offer<'_>]) -> Decimal;

    /// Stable digest of the signal, folded into result cache keys.
    fn fingerprint(&self) -> u64;
}

/// Preference signal built from per-source and per-mechanism affinities.
///
/// A stack's factor is the mean over its offers of `source affinity * kind affinity`;
/// anything without an affinity counts as `1`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AffinitySignal {
    sources: BTreeMap<String, Decimal>,
    kinds: BTreeMap<OfferKind, Decimal>,
}

impl AffinitySignal {
    /// A neutral signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the affinity for offers from `source`.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>, affinity: Decimal) -> Self {
        self.sources.insert(source.into(), affinity);
        self
    }

    /// Set the affinity for offers of `kind`.
    #[must_use]
    pub fn with_kind(mut self, kind: OfferKind, affinity: Decimal) -> Self {
        self.kinds.insert(kind, affinity);
        self
    }

    /// Whether no affinity has been set.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.kinds.is_empty()
    }

    fn affinity(&self, offer: &Offer<'_>) -> Decimal {
        let source = offer
            .source
            .as_ref()
            .and_then(|source| self.sources.get(source))
            .copied()
            .unwrap_or(Decimal::ONE);
        let kind = self.kinds.get(&offer.kind).copied().unwrap_or(Decimal::ONE);

        source * kind
    }
}

impl PreferenceSignal for AffinitySignal {
    fn match_factor(&self, offers: &[&Offer<'_>]) -> Decimal {
        if offers.is_empty() {
            return Decimal::ONE;
        }

        let sum: Decimal = offers.iter().map(|offer| self.affinity(offer)).sum();

        sum / Decimal::from(offers.len())
    }

    fn fingerprint(&self) -> u64 {
        let mut hasher = FxHasher::default();

        for (source, affinity) in &self.sources {
            source.hash(&mut hasher);
            affinity.normalize().hash(&mut hasher);
        }

        for (kind, affinity) in &self.kinds {
            kind.hash(&mut hasher);
            affinity.normalize().hash(&mut hasher);
        }

        hasher.finish()
    }
}

/// Multiply each stack's composite score by the signal's clamped match factor and
/// re-sort. Without a signal the list is returned unchanged.
pub fn personalize<'a>(
    mut ranked: Vec<RankedStack<'a>>,
    offers: &OfferSet<'a>,
    signal: Option<&dyn PreferenceSignal>,
) -> Vec<RankedStack<'a>> {
    if signal.is_none() {
        return ranked;
    }

    for stack in &mut ranked {
        personalize_stack(stack, offers, signal);
    }

    ranked.sort_by(compare);

    ranked
}

/// Set one stack's personalised score to its composite score times the signal's clamped
/// match factor. Without a signal the two scores stay equal.
pub fn personalize_stack<'a>(
    stack: &mut RankedStack<'a>,
    offers: &OfferSet<'a>,
    signal: Option<&dyn PreferenceSignal>,
) {
    let Some(signal) = signal else {
        stack.personalized_score = stack.composite_score;

        return;
    };

    let members: Vec<&Offer<'a>> = stack
        .subset
        .offers
        .iter()
        .filter_map(|key| offers.get(*key))
        .collect();

    let factor = signal
        .match_factor(&members)
        .clamp(MIN_MATCH_FACTOR, MAX_MATCH_FACTOR);

    stack.personalized_score = stack.composite_score * factor;
}
