//! Stacking Engine
//!
//! Runs the full pipeline for one request (normalize, search, evaluate, rank, personalise,
//! sequence) and memoises the result.

use std::{fmt, sync::Arc, time::Duration};

use jiff::Timestamp;
use rust_decimal::Decimal;
use smallvec::SmallVec;
use tracing::{Span, debug, info, warn};

use crate::{
    cache::{CacheKey, CacheStats, Lookup, ResultCache},
    compatibility::{
        CandidateSubset, Conflict, pairwise_conflicts, search_deadline, visit_compatible_subsets,
    },
    constraints::{ConstraintError, Constraints},
    offers::{InvalidOffer, NormalizedOffers, OfferKey, OfferSet, RawOffer, normalize},
    personalization::{PreferenceSignal, personalize_stack},
    products::ProductContext,
    ranking::{MAX_ALTERNATIVES, RankedStack, TopStacks, mean_confidence},
    savings::{SavingsBreakdown, evaluate},
    sequence::{ApplicationSequence, DEFAULT_SECONDS_PER_STEP, build_sequence},
    warnings::{Warning, stack_warnings},
};

/// Default number of cached results.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Default time to live for cached results.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// Engine-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Maximum number of cached results
    pub cache_capacity: usize,

    /// Time to live for cached results; `None` keeps them until evicted
    pub cache_ttl: Option<Duration>,

    /// Seconds assumed per application step
    pub seconds_per_step: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_ttl: Some(DEFAULT_CACHE_TTL),
            seconds_per_step: DEFAULT_SECONDS_PER_STEP,
        }
    }
}

/// How the chosen stack was arrived at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Every compatible subset within the bound was evaluated
    Optimized,

    /// No subset was compatible; the highest-priority single offer was used
    SingleOfferFallback,

    /// No offer survived validation
    NoOffersApplicable,

    /// The search ran out of time; the highest-priority single offer was used
    Degraded,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Optimized => "optimized",
            Outcome::SingleOfferFallback => "single offer fallback",
            Outcome::NoOffersApplicable => "no offers applicable",
            Outcome::Degraded => "degraded",
        })
    }
}

/// Output of one optimisation call.
#[derive(Debug, Clone)]
pub struct OptimizationResult<'a> {
    /// Product optimised
    pub product_id: String,

    /// Every valid offer, keyed as referenced by the rest of the result
    pub offers: OfferSet<'a>,

    /// Chosen stack; empty when nothing applies
    pub chosen: CandidateSubset,

    /// Savings for the chosen stack
    pub breakdown: SavingsBreakdown<'a>,

    /// Mean confidence of the chosen offers
    pub confidence: Decimal,

    /// Usability of the chosen stack, in `0..=1`
    pub usability: Decimal,

    /// Composite score of the chosen stack
    pub composite_score: Decimal,

    /// Score after personalisation
    pub personalized_score: Decimal,

    /// How to apply the chosen stack
    pub application_sequence: ApplicationSequence<'a>,

    /// Best runners-up, best first
    pub alternatives: SmallVec<[RankedStack<'a>; MAX_ALTERNATIVES]>,

    /// Offers rejected during validation
    pub dropped: Vec<InvalidOffer>,

    /// Valid offers that could not be classified and were never stacked
    pub unclassified: Vec<OfferKey>,

    /// Whether valid offers were left out of the search by its bound
    pub truncated: bool,

    /// How the chosen stack was arrived at
    pub outcome: Outcome,

    /// Number of compatible subsets evaluated
    pub combinations_evaluated: usize,

    /// Advisory notes about the chosen stack
    pub warnings: Vec<Warning<'a>>,
}

impl OptimizationResult<'_> {
    /// Number of offers rejected during validation.
    pub fn dropped_count(&self) -> usize {
        self.dropped.len()
    }

    /// Whether any offer is applied.
    pub fn has_savings(&self) -> bool {
        !self.chosen.is_empty()
    }
}

/// Result of checking a caller-chosen stack.
#[derive(Debug, Clone)]
pub struct StackValidation<'a> {
    /// Valid offers from the stack
    pub offers: OfferSet<'a>,

    /// Offers rejected during validation
    pub rejected: Vec<InvalidOffer>,

    /// Valid offers that could not be classified
    pub unclassified: Vec<OfferKey>,

    /// Every incompatible pair
    pub conflicts: Vec<Conflict>,

    /// Whether the stack is larger than the caller's stack size cap
    pub oversized: bool,

    /// Savings for the stack, when it is valid
    pub breakdown: Option<SavingsBreakdown<'a>>,

    /// Mean confidence of the stack, when it is valid
    pub confidence: Option<Decimal>,

    /// Advisory notes, when the stack is valid
    pub warnings: Vec<Warning<'a>>,
}

impl StackValidation<'_> {
    /// Whether every offer is valid, classified and compatible with the others.
    pub fn is_valid(&self) -> bool {
        self.rejected.is_empty()
            && self.unclassified.is_empty()
            && self.conflicts.is_empty()
            && !self.oversized
    }
}

/// Optimise `raw_offers` for `product` at time `now`, bypassing any cache.
///
/// # Errors
///
/// Returns a [`ConstraintError`] if the constraints or product are malformed.
pub fn optimize_uncached<'a>(
    product: &ProductContext<'a>,
    raw_offers: &[RawOffer],
    constraints: &Constraints<'a>,
    signal: Option<&dyn PreferenceSignal>,
    now: Timestamp,
    seconds_per_step: u64,
) -> Result<OptimizationResult<'a>, ConstraintError> {
    constraints.validate(product)?;

    let run = PipelineRun {
        product,
        constraints,
        signal,
        now,
        seconds_per_step,
    };

    Ok(run.execute(raw_offers))
}

/// Inputs shared by every stage of one pipeline run.
struct PipelineRun<'r, 'a> {
    product: &'r ProductContext<'a>,
    constraints: &'r Constraints<'a>,
    signal: Option<&'r dyn PreferenceSignal>,
    now: Timestamp,
    seconds_per_step: u64,
}

impl<'a> PipelineRun<'_, 'a> {
    fn execute(&self, raw_offers: &[RawOffer]) -> OptimizationResult<'a> {
        let mut normalized = normalize(raw_offers, self.product, self.now);
        normalized.retain_confident(self.constraints.min_confidence);

        if !normalized.dropped.is_empty() {
            debug!(dropped = normalized.dropped.len(), "offers dropped during validation");
        }

        // Subsets are scored as the search finds them; only the leaders are kept.
        let mut leaders = TopStacks::new(1 + MAX_ALTERNATIVES);
        let search = visit_compatible_subsets(
            &normalized,
            self.constraints,
            search_deadline(self.constraints),
            |subset| {
                let breakdown = evaluate(&subset, &normalized.offers, self.product, self.constraints);
                let mut stack = RankedStack::new(subset, breakdown, &normalized.offers);

                personalize_stack(&mut stack, &normalized.offers, self.signal);
                leaders.push(stack);
            },
        );

        if search.budget_exceeded {
            warn!(
                product = %self.product.id,
                visited = search.visited,
                "search time budget exceeded; falling back to a single offer"
            );

            return self.single_offer(normalized, Outcome::Degraded, search.truncated);
        }

        if leaders.is_empty() {
            let outcome = if search.searched.is_empty() {
                Outcome::NoOffersApplicable
            } else {
                warn!(product = %self.product.id, "no compatible subset; falling back to a single offer");

                Outcome::SingleOfferFallback
            };

            return self.single_offer(normalized, outcome, search.truncated);
        }

        let mut ranked = leaders.into_vec().into_iter();
        let best = ranked.next();
        let alternatives = ranked.collect();

        self.finish(
            normalized,
            best,
            alternatives,
            Outcome::Optimized,
            search.truncated,
            search.compatible,
        )
    }

    /// Use the highest-priority searchable offer on its own, or nothing if there is none.
    fn single_offer(
        &self,
        normalized: NormalizedOffers<'a>,
        outcome: Outcome,
        truncated: bool,
    ) -> OptimizationResult<'a> {
        let stack = normalized.searchable().next().map(|key| {
            let subset = CandidateSubset::new(SmallVec::from_elem(key, 1), &normalized.offers);
            let breakdown = evaluate(&subset, &normalized.offers, self.product, self.constraints);
            let mut stack = RankedStack::new(subset, breakdown, &normalized.offers);

            personalize_stack(&mut stack, &normalized.offers, self.signal);

            stack
        });

        let (outcome, evaluated) = match stack {
            Some(_) => (outcome, 1),
            None => (Outcome::NoOffersApplicable, 0),
        };

        self.finish(normalized, stack, SmallVec::new(), outcome, truncated, evaluated)
    }

    fn finish(
        &self,
        normalized: NormalizedOffers<'a>,
        stack: Option<RankedStack<'a>>,
        alternatives: SmallVec<[RankedStack<'a>; MAX_ALTERNATIVES]>,
        outcome: Outcome,
        truncated: bool,
        combinations_evaluated: usize,
    ) -> OptimizationResult<'a> {
        let unclassified: Vec<OfferKey> = normalized.unclassified().collect();
        let NormalizedOffers {
            offers, dropped, ..
        } = normalized;

        let (chosen, breakdown, confidence, usability, composite_score, personalized_score) =
            match stack {
                Some(stack) => (
                    stack.subset,
                    stack.breakdown,
                    stack.confidence,
                    stack.usability,
                    stack.composite_score,
                    stack.personalized_score,
                ),
                None => (
                    CandidateSubset::new(SmallVec::new(), &offers),
                    SavingsBreakdown::empty(self.product),
                    Decimal::ZERO,
                    Decimal::ONE,
                    Decimal::ZERO,
                    Decimal::ZERO,
                ),
            };

        let application_sequence = build_sequence(&breakdown, &offers, self.seconds_per_step);
        let warnings = stack_warnings(&chosen.offers, &offers, confidence, self.now);

        OptimizationResult {
            product_id: self.product.id.clone(),
            offers,
            chosen,
            breakdown,
            confidence,
            usability,
            composite_score,
            personalized_score,
            application_sequence,
            alternatives,
            dropped,
            unclassified,
            truncated,
            outcome,
            combinations_evaluated,
            warnings,
        }
    }
}

/// Check a caller-chosen stack at time `now` without searching.
///
/// # Errors
///
/// Returns a [`ConstraintError`] if the constraints or product are malformed.
pub fn validate_stack<'a>(
    product: &ProductContext<'a>,
    raw_offers: &[RawOffer],
    constraints: &Constraints<'a>,
    now: Timestamp,
) -> Result<StackValidation<'a>, ConstraintError> {
    constraints.validate(product)?;

    let mut normalized = normalize(raw_offers, product, now);
    normalized.retain_confident(constraints.min_confidence);

    let stack: SmallVec<[OfferKey; 8]> = normalized.searchable().collect();
    let unclassified: Vec<OfferKey> = normalized.unclassified().collect();
    let conflicts = pairwise_conflicts(&stack, &normalized.offers, &constraints.conflict_rules);
    let oversized = constraints
        .max_stack_size
        .is_some_and(|max| stack.len() > max);

    let NormalizedOffers {
        offers, dropped, ..
    } = normalized;

    let mut validation = StackValidation {
        offers,
        rejected: dropped,
        unclassified,
        conflicts,
        oversized,
        breakdown: None,
        confidence: None,
        warnings: Vec::new(),
    };

    if validation.is_valid() {
        let subset = CandidateSubset::new(stack, &validation.offers);
        let confidence = mean_confidence(&subset, &validation.offers);

        validation.warnings = stack_warnings(&subset.offers, &validation.offers, confidence, now);
        validation.breakdown = Some(evaluate(&subset, &validation.offers, product, constraints));
        validation.confidence = Some(confidence);
    }

    Ok(validation)
}

/// Offer stacking engine with a memoising result cache.
///
/// One engine is meant to live for the process and be shared between threads; identical
/// concurrent requests run the pipeline once.
#[derive(Debug)]
pub struct StackingEngine<'a> {
    settings: EngineSettings,
    cache: ResultCache<CacheKey, OptimizationResult<'a>>,
}

impl Default for StackingEngine<'_> {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

impl<'a> StackingEngine<'a> {
    /// Create an engine with the given settings.
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            cache: ResultCache::new(settings.cache_capacity, settings.cache_ttl),
        }
    }

    /// Engine settings.
    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Optimise `raw_offers` for `product` as of now.
    ///
    /// # Errors
    ///
    /// Returns a [`ConstraintError`] if the constraints or product are malformed.
    pub fn optimize(
        &self,
        product: &ProductContext<'a>,
        raw_offers: &[RawOffer],
        constraints: &Constraints<'a>,
        signal: Option<&dyn PreferenceSignal>,
    ) -> Result<Arc<OptimizationResult<'a>>, ConstraintError> {
        self.optimize_at(product, raw_offers, constraints, signal, Timestamp::now())
    }

    /// Optimise `raw_offers` for `product` as of `now`, serving identical requests from
    /// the cache.
    ///
    /// A cached result is reused at a later `now` only while every offer stays in the same
    /// [`ExpiryPhase`](crate::cache::ExpiryPhase). Degraded results are returned but never
    /// cached.
    ///
    /// # Errors
    ///
    /// Returns a [`ConstraintError`] if the constraints or product are malformed. Invalid
    /// constraints are never cached.
    #[tracing::instrument(
        name = "engine.optimize",
        skip_all,
        fields(
            product = %product.id,
            offers = raw_offers.len(),
            cache = tracing::field::Empty,
            outcome = tracing::field::Empty
        ),
        err
    )]
    pub fn optimize_at(
        &self,
        product: &ProductContext<'a>,
        raw_offers: &[RawOffer],
        constraints: &Constraints<'a>,
        signal: Option<&dyn PreferenceSignal>,
        now: Timestamp,
    ) -> Result<Arc<OptimizationResult<'a>>, ConstraintError> {
        constraints.validate(product)?;

        let key = CacheKey::new(product, raw_offers, constraints, signal, now);
        let (result, lookup) = self.cache.get_or_compute_if(
            key,
            || {
                PipelineRun {
                    product,
                    constraints,
                    signal,
                    now,
                    seconds_per_step: self.settings.seconds_per_step,
                }
                .execute(raw_offers)
            },
            |result| result.outcome != Outcome::Degraded,
        );

        let span = Span::current();

        span.record("cache", tracing::field::display(lookup));
        span.record("outcome", tracing::field::display(result.outcome));

        if lookup == Lookup::Miss {
            info!(
                evaluated = result.combinations_evaluated,
                truncated = result.truncated,
                total = %result.breakdown.total,
                "optimised offer stack"
            );
        }

        Ok(result)
    }

    /// Check a caller-chosen stack as of `now`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConstraintError`] if the constraints or product are malformed.
    pub fn validate_stack(
        &self,
        product: &ProductContext<'a>,
        raw_offers: &[RawOffer],
        constraints: &Constraints<'a>,
        now: Timestamp,
    ) -> Result<StackValidation<'a>, ConstraintError> {
        validate_stack(product, raw_offers, constraints, now)
    }

    /// Cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Number of cached results.
    pub fn cached_results(&self) -> usize {
        self.cache.len()
    }

    /// Drop every cached result.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use jiff::ToSpan;
    use rusty_money::{Money, iso::USD};
    use testresult::TestResult;

    use super::*;
    use crate::{constraints::ConflictRules, offers::OfferKind};

    fn fixed_offers(count: i64) -> Vec<RawOffer> {
        (1..=count)
            .map(|value| {
                RawOffer::auto_applied(format!("offer-{value}"))
                    .with_type("fixed")
                    .with_value(Decimal::from(value))
            })
            .collect()
    }

    fn product<'a>() -> ProductContext<'a> {
        ProductContext::new("headphones", Money::from_minor(20_000, USD))
    }

    fn now() -> Timestamp {
        Timestamp::UNIX_EPOCH
    }

    #[test]
    fn malformed_constraints_are_rejected_before_any_work() {
        let engine = StackingEngine::default();
        let constraints = Constraints::new().with_shipping_cost(Money::from_minor(-1, USD));

        let result = engine.optimize_at(&product(), &[], &constraints, None, now());

        assert_eq!(result.err(), Some(ConstraintError::NegativeShippingCost(-1)));
        assert_eq!(engine.cache_stats(), CacheStats::default());
    }

    #[test]
    fn no_offers_gives_a_zero_result() -> TestResult {
        let engine = StackingEngine::default();

        let result = engine.optimize_at(&product(), &[], &Constraints::new(), None, now())?;

        assert_eq!(result.outcome, Outcome::NoOffersApplicable);
        assert_eq!(result.breakdown.total, Money::from_minor(0, USD));
        assert_eq!(result.breakdown.final_price, Money::from_minor(20_000, USD));
        assert!(result.application_sequence.is_empty());
        assert!(result.warnings.is_empty());

        Ok(())
    }

    #[test]
    fn chooses_the_best_stack_and_keeps_alternatives() -> TestResult {
        let engine = StackingEngine::default();
        let product = ProductContext::new("monitor", Money::from_minor(200_000, USD));
        let offers = [
            RawOffer::auto_applied("sale")
                .with_type("percentage")
                .with_value(Decimal::from(20))
                .with_source("store")
                .verified(),
            RawOffer::code_offer("welcome", "WELCOME5")
                .with_type("fixed")
                .with_value(Decimal::from(5))
                .verified(),
            RawOffer::auto_applied("card")
                .with_type("cashback")
                .with_value(Decimal::from(3))
                .with_source("bank")
                .verified(),
        ];

        let result = engine.optimize_at(&product, &offers, &Constraints::new(), None, now())?;

        assert_eq!(result.outcome, Outcome::Optimized);
        assert_eq!(result.combinations_evaluated, 7);
        assert_eq!(result.chosen.len(), 3);
        assert_eq!(result.alternatives.len(), MAX_ALTERNATIVES);

        // 20% of 2000 = 400; 5 off 1600 = 5; 3% of 1595 = 47.85
        assert_eq!(result.breakdown.immediate_savings, Money::from_minor(40_500, USD));
        assert_eq!(result.breakdown.deferred_credit, Money::from_minor(4785, USD));
        assert_eq!(result.breakdown.final_price, Money::from_minor(159_500, USD));
        assert_eq!(result.application_sequence.len(), 3);

        Ok(())
    }

    #[test]
    fn identical_requests_are_served_from_cache() -> TestResult {
        let engine = StackingEngine::default();
        let offers = [RawOffer::auto_applied("sale")
            .with_type("percentage")
            .with_value(Decimal::TEN)];

        let first = engine.optimize_at(&product(), &offers, &Constraints::new(), None, now())?;
        let second = engine.optimize_at(&product(), &offers, &Constraints::new(), None, now())?;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.cache_stats().hits, 1);
        assert_eq!(engine.cached_results(), 1);

        engine.clear_cache();

        assert_eq!(engine.cached_results(), 0);

        Ok(())
    }

    #[test]
    fn cached_results_are_not_reused_once_an_offer_expires() -> TestResult {
        let engine = StackingEngine::default();
        let start = Timestamp::from_second(1_000_000)?;
        let offers = [RawOffer::code_offer("flash", "FLASH")
            .with_type("fixed")
            .with_value(Decimal::from(100))
            .with_expiry(start.checked_add(50.seconds())?)];

        let before = engine.optimize_at(&product(), &offers, &Constraints::new(), None, start)?;
        let still_valid = engine.optimize_at(
            &product(),
            &offers,
            &Constraints::new(),
            None,
            start.checked_add(10.seconds())?,
        )?;
        let after = engine.optimize_at(
            &product(),
            &offers,
            &Constraints::new(),
            None,
            start.checked_add(100.seconds())?,
        )?;

        assert_eq!(before.chosen.len(), 1);
        assert!(Arc::ptr_eq(&before, &still_valid));

        assert_eq!(after.outcome, Outcome::NoOffersApplicable);
        assert!(after.chosen.is_empty());
        assert_eq!(after.breakdown.total, Money::from_minor(0, USD));
        assert_eq!(engine.cache_stats().misses, 2);

        Ok(())
    }

    #[test]
    fn corrected_offer_values_are_not_served_stale() -> TestResult {
        let engine = StackingEngine::default();
        let original = RawOffer::code_offer("save", "SAVE")
            .with_type("fixed")
            .with_value(Decimal::from(30));
        let corrected = original.clone().with_value(Decimal::from(10));

        let first = engine.optimize_at(&product(), &[original], &Constraints::new(), None, now())?;
        let second = engine.optimize_at(&product(), &[corrected], &Constraints::new(), None, now())?;

        assert_eq!(first.breakdown.total, Money::from_minor(3000, USD));
        assert_eq!(second.breakdown.total, Money::from_minor(1000, USD));
        assert_eq!(engine.cache_stats().hits, 0);

        Ok(())
    }

    #[test]
    fn degraded_results_are_not_cached() -> TestResult {
        let engine = StackingEngine::default();
        let offers = fixed_offers(14);
        let constraints = Constraints::new()
            .with_max_combination_size(14)
            .with_time_budget(Duration::ZERO);

        let first = engine.optimize_at(&product(), &offers, &constraints, None, now())?;
        let second = engine.optimize_at(&product(), &offers, &constraints, None, now())?;

        assert_eq!(first.outcome, Outcome::Degraded);
        assert_eq!(second.outcome, Outcome::Degraded);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(engine.cached_results(), 0);
        assert_eq!(engine.cache_stats().misses, 2);
        assert_eq!(engine.cache_stats().uncached, 2);

        Ok(())
    }

    #[test]
    fn wide_searches_keep_only_the_leading_stacks() -> TestResult {
        let offers = fixed_offers(16);
        let constraints = Constraints::new().with_max_combination_size(16);
        let product = ProductContext::new("laptop", Money::from_minor(500_000, USD));

        let result =
            optimize_uncached(&product, &offers, &constraints, None, now(), DEFAULT_SECONDS_PER_STEP)?;

        assert_eq!(result.outcome, Outcome::Optimized);
        assert_eq!(result.combinations_evaluated, 65_535);
        assert_eq!(result.alternatives.len(), MAX_ALTERNATIVES);

        let scores: Vec<_> = std::iter::once(result.personalized_score)
            .chain(result.alternatives.iter().map(|stack| stack.personalized_score))
            .collect();

        assert!(scores.windows(2).all(|pair| match pair {
            [first, second] => first >= second,
            _ => true,
        }));

        Ok(())
    }

    #[test]
    fn elapsed_time_budget_degrades_to_single_offer() -> TestResult {
        let offers = fixed_offers(14);
        let constraints = Constraints::new()
            .with_max_combination_size(14)
            .with_time_budget(Duration::ZERO);

        let result =
            optimize_uncached(&product(), &offers, &constraints, None, now(), DEFAULT_SECONDS_PER_STEP)?;

        assert_eq!(result.outcome, Outcome::Degraded);
        assert_eq!(result.chosen.len(), 1);

        let chosen = result
            .chosen
            .offers
            .first()
            .and_then(|key| result.offers.get(*key))
            .ok_or("missing chosen offer")?;

        assert_eq!(chosen.id, "offer-14");

        Ok(())
    }

    #[test]
    fn low_confidence_offers_are_dropped_by_threshold() -> TestResult {
        let offers = [
            RawOffer::code_offer("maybe", "MAYBE")
                .with_type("fixed")
                .with_value(Decimal::TEN),
            RawOffer::code_offer("sure", "SURE")
                .with_type("fixed")
                .with_value(Decimal::ONE)
                .verified(),
        ];
        let constraints = Constraints::new().with_min_confidence(Decimal::new(7, 1));

        let result =
            optimize_uncached(&product(), &offers, &constraints, None, now(), DEFAULT_SECONDS_PER_STEP)?;

        assert_eq!(result.dropped_count(), 1);
        assert_eq!(result.chosen.len(), 1);
        assert_eq!(result.breakdown.total, Money::from_minor(100, USD));

        Ok(())
    }

    #[test]
    fn validate_stack_reports_conflicts_with_reasons() -> TestResult {
        let offers = [
            RawOffer::code_offer("students", "STUDENT")
                .with_type("percentage")
                .with_value(Decimal::TEN)
                .with_restriction("students"),
            RawOffer::code_offer("members", "MEMBER")
                .with_type("free_shipping")
                .with_restriction("members"),
        ];
        let constraints = Constraints::new()
            .with_conflict_rules(ConflictRules::new().forbid("students", "members"));

        let validation = validate_stack(&product(), &offers, &constraints, now())?;

        assert!(!validation.is_valid());
        assert_eq!(
            validation
                .conflicts
                .iter()
                .map(|conflict| conflict.reason)
                .collect::<Vec<_>>(),
            vec![crate::compatibility::ConflictReason::RestrictionConflict]
        );
        assert!(validation.breakdown.is_none());

        Ok(())
    }

    #[test]
    fn validate_stack_evaluates_valid_stacks() -> TestResult {
        let offers = [
            RawOffer::code_offer("sale", "SALE")
                .with_type("percentage")
                .with_value(Decimal::TEN)
                .verified(),
            RawOffer::auto_applied("ship").with_type("free_shipping"),
        ];
        let constraints = Constraints::new().with_shipping_cost(Money::from_minor(700, USD));

        let validation = validate_stack(&product(), &offers, &constraints, now())?;
        let breakdown = validation.breakdown.as_ref().ok_or("missing breakdown")?;

        assert!(validation.is_valid());
        assert_eq!(breakdown.total, Money::from_minor(2700, USD));
        assert_eq!(
            breakdown.steps.iter().map(|step| step.kind).collect::<Vec<_>>(),
            vec![OfferKind::Percentage, OfferKind::FreeShipping]
        );

        Ok(())
    }

    #[test]
    fn validate_stack_flags_oversized_stacks() -> TestResult {
        let offers = [
            RawOffer::auto_applied("a").with_type("free_shipping"),
            RawOffer::auto_applied("b").with_type("fixed").with_value(Decimal::ONE),
        ];

        let validation = validate_stack(
            &product(),
            &offers,
            &Constraints::new().with_max_stack_size(1),
            now(),
        )?;

        assert!(validation.oversized);
        assert!(!validation.is_valid());

        Ok(())
    }
}
