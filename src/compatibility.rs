//! Compatibility
//!
//! Pairwise offer compatibility and the bounded search for compatible subsets.
//!
//! The search takes the `k` highest-priority searchable offers and visits every non-empty
//! subset of them as a `u32` mask, so `k` is capped at [`MAX_SEARCH_BOUND`]. Each offer's
//! conflicts are precomputed as a mask; a subset is compatible when no member's conflict
//! mask intersects it. Offers past the bound are never stacked and the result is flagged
//! as truncated.

use std::{fmt, time::Instant};

use rust_decimal::Decimal;
use smallvec::SmallVec;
use tracing::debug;

use crate::{
    constraints::{ConflictRules, Constraints, MAX_SEARCH_BOUND},
    offers::{NormalizedOffers, Offer, OfferKey, OfferKind, OfferSet},
    tags::TagSet,
};

const _: () = assert!(MAX_SEARCH_BOUND < u32::BITS as usize);

/// Masks visited between deadline checks.
const DEADLINE_CHECK_INTERVAL: u32 = 1024;

/// Penalty applied per distinct restriction tag in a subset's compatibility score.
const TAG_PENALTY: Decimal = Decimal::from_parts(5, 0, 0, false, 1);

/// Why two offers may not be applied together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictReason {
    /// At least one of the offers cannot be combined with anything
    NotStackable,

    /// One offer lists the other as mutually exclusive
    MutuallyExclusive,

    /// Both are percentage offers from the same source
    SameSourcePercentage,

    /// Their restriction tags are declared incompatible
    RestrictionConflict,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConflictReason::NotStackable => "not stackable",
            ConflictReason::MutuallyExclusive => "mutually exclusive",
            ConflictReason::SameSourcePercentage => "percentage offers from the same source",
            ConflictReason::RestrictionConflict => "conflicting restrictions",
        })
    }
}

/// An incompatible pair of offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Conflict {
    /// First offer of the pair
    pub left: OfferKey,

    /// Second offer of the pair
    pub right: OfferKey,

    /// Why they conflict
    pub reason: ConflictReason,
}

/// Decide whether `left` and `right` may be applied together.
///
/// Symmetric in its arguments: swapping them always gives the same answer.
pub fn conflict_between(
    left: &Offer<'_>,
    right: &Offer<'_>,
    rules: &ConflictRules,
) -> Option<ConflictReason> {
    if !left.stackable || !right.stackable {
        return Some(ConflictReason::NotStackable);
    }

    if left.excludes(right) || right.excludes(left) {
        return Some(ConflictReason::MutuallyExclusive);
    }

    if left.kind == OfferKind::Percentage
        && right.kind == OfferKind::Percentage
        && left.source == right.source
    {
        return Some(ConflictReason::SameSourcePercentage);
    }

    if rules.conflicting_tags(&left.restrictions, &right.restrictions) {
        return Some(ConflictReason::RestrictionConflict);
    }

    None
}

/// Every incompatible pair among `keys`, in key order.
pub fn pairwise_conflicts(
    keys: &[OfferKey],
    offers: &OfferSet<'_>,
    rules: &ConflictRules,
) -> Vec<Conflict> {
    let mut conflicts = Vec::new();

    for (position, left_key) in keys.iter().enumerate() {
        let Some(left) = offers.get(*left_key) else {
            continue;
        };

        for right_key in keys.iter().skip(position + 1) {
            let Some(right) = offers.get(*right_key) else {
                continue;
            };

            if let Some(reason) = conflict_between(left, right, rules) {
                conflicts.push(Conflict {
                    left: *left_key,
                    right: *right_key,
                    reason,
                });
            }
        }
    }

    conflicts
}

/// A compatible grouping of offers.
///
/// Holds keys into the call's [`OfferSet`]; the same offer appears in many subsets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateSubset {
    /// Member offers in priority order
    pub offers: SmallVec<[OfferKey; 8]>,

    /// Offer count minus half the number of distinct restriction tags; a tie-breaker only
    pub compatibility_score: Decimal,
}

impl CandidateSubset {
    /// Build a subset from `keys`, computing its compatibility score.
    pub fn new(keys: SmallVec<[OfferKey; 8]>, offers: &OfferSet<'_>) -> Self {
        let compatibility_score = compatibility_score(&keys, offers);

        Self {
            offers: keys,
            compatibility_score,
        }
    }

    /// Number of offers in the subset.
    pub fn len(&self) -> usize {
        self.offers.len()
    }

    /// Whether the subset holds no offers.
    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }

    /// Whether the subset holds `key`.
    pub fn contains(&self, key: OfferKey) -> bool {
        self.offers.contains(&key)
    }
}

/// Compatibility score of a set of offers.
pub fn compatibility_score(keys: &[OfferKey], offers: &OfferSet<'_>) -> Decimal {
    let tags = keys
        .iter()
        .filter_map(|key| offers.get(*key))
        .fold(TagSet::empty(), |tags, offer| tags | offer.restrictions.clone());

    Decimal::from(keys.len()) - TAG_PENALTY * Decimal::from(tags.len())
}

/// Outcome of the bounded subset search.
#[derive(Debug, Clone, Default)]
pub struct SubsetSearch {
    /// Compatible subsets in mask order; left empty by [`visit_compatible_subsets`]
    pub subsets: Vec<CandidateSubset>,

    /// Offers that entered the search, highest priority first
    pub searched: SmallVec<[OfferKey; 16]>,

    /// Searchable offers left out by the search bound
    pub excluded: Vec<OfferKey>,

    /// Whether any searchable offer was left out
    pub truncated: bool,

    /// Whether the deadline passed before every subset was visited
    pub budget_exceeded: bool,

    /// Number of subsets visited
    pub visited: u64,

    /// Number of compatible subsets found
    pub compatible: usize,
}

/// Deadline for a search starting now under `constraints.time_budget`.
pub fn search_deadline(constraints: &Constraints<'_>) -> Option<Instant> {
    constraints
        .time_budget
        .and_then(|budget| Instant::now().checked_add(budget))
}

/// Enumerate compatible subsets of the highest-priority offers.
///
/// The search stops early once `constraints.time_budget` has elapsed.
pub fn find_compatible_subsets(
    normalized: &NormalizedOffers<'_>,
    constraints: &Constraints<'_>,
) -> SubsetSearch {
    find_compatible_subsets_until(normalized, constraints, search_deadline(constraints))
}

/// Enumerate compatible subsets, giving up when `deadline` passes.
///
/// Every compatible subset is collected, so memory grows with `2^k`. The engine streams
/// them through [`visit_compatible_subsets`] instead.
pub fn find_compatible_subsets_until(
    normalized: &NormalizedOffers<'_>,
    constraints: &Constraints<'_>,
    deadline: Option<Instant>,
) -> SubsetSearch {
    let mut subsets = Vec::new();
    let mut search =
        visit_compatible_subsets(normalized, constraints, deadline, |subset| subsets.push(subset));

    search.subsets = subsets;

    search
}

/// Enumerate compatible subsets, handing each to `visit` as it is found rather than
/// keeping it. Gives up when `deadline` passes.
pub fn visit_compatible_subsets<F>(
    normalized: &NormalizedOffers<'_>,
    constraints: &Constraints<'_>,
    deadline: Option<Instant>,
    mut visit: F,
) -> SubsetSearch
where
    F: FnMut(CandidateSubset),
{
    let bound = constraints
        .max_combination_size
        .min(MAX_SEARCH_BOUND);

    let mut searchable = normalized.searchable();
    let searched: SmallVec<[OfferKey; 16]> = searchable.by_ref().take(bound).collect();
    let excluded: Vec<OfferKey> = searchable.collect();
    let truncated = !excluded.is_empty();

    if truncated {
        debug!(
            searched = searched.len(),
            excluded = excluded.len(),
            "search bound reached; lower-priority offers excluded"
        );
    }

    let conflicts = conflict_masks(&searched, &normalized.offers, &constraints.conflict_rules);
    let max_stack = constraints.max_stack_size.unwrap_or(usize::MAX);

    let mut search = SubsetSearch {
        searched,
        excluded,
        truncated,
        ..SubsetSearch::default()
    };

    // `searched` holds at most MAX_SEARCH_BOUND offers, so the shift cannot overflow.
    let limit: u32 = 1 << search.searched.len();

    for mask in 1..limit {
        if mask % DEADLINE_CHECK_INTERVAL == 0
            && deadline.is_some_and(|deadline| Instant::now() >= deadline)
        {
            debug!(visited = search.visited, "search time budget exceeded");

            search.budget_exceeded = true;

            break;
        }

        search.visited += 1;

        if mask.count_ones() as usize > max_stack || !is_compatible(mask, &conflicts) {
            continue;
        }

        search.compatible += 1;

        visit(CandidateSubset::new(members(mask, &search.searched), &normalized.offers));
    }

    search
}

/// Conflict mask per searched offer: bit `j` of entry `i` is set when offers `i` and `j`
/// conflict.
fn conflict_masks(keys: &[OfferKey], offers: &OfferSet<'_>, rules: &ConflictRules) -> Vec<u32> {
    let mut masks = vec![0_u32; keys.len()];

    for conflict in pairwise_conflicts(keys, offers, rules) {
        let left = keys.iter().position(|key| *key == conflict.left);
        let right = keys.iter().position(|key| *key == conflict.right);

        if let (Some(left), Some(right)) = (left, right) {
            if let Some(mask) = masks.get_mut(left) {
                *mask |= 1 << right;
            }

            if let Some(mask) = masks.get_mut(right) {
                *mask |= 1 << left;
            }
        }
    }

    masks
}

fn is_compatible(mask: u32, conflicts: &[u32]) -> bool {
    conflicts
        .iter()
        .enumerate()
        .filter(|(position, _)| mask & (1 << position) != 0)
        .all(|(_, conflict)| conflict & mask == 0)
}

fn members(mask: u32, keys: &[OfferKey]) -> SmallVec<[OfferKey; 8]> {
    keys.iter()
        .enumerate()
        .filter(|(position, _)| mask & (1 << position) != 0)
        .map(|(_, key)| *key)
        .collect()
}

#[cfg(test)]
mod tests {
    use jiff::Timestamp;
    use rusty_money::{Money, iso::USD};
    use testresult::TestResult;

    use super::*;
    use crate::{
        offers::{RawOffer, normalize, test_support::offer},
        products::ProductContext,
    };

    fn normalized<'a>(raw: &[RawOffer]) -> NormalizedOffers<'a> {
        let product = ProductContext::new("tv", Money::from_minor(50_000, USD));

        normalize(raw, &product, Timestamp::UNIX_EPOCH)
    }

    fn percent(id: &str, value: i64, source: &str) -> RawOffer {
        RawOffer::code_offer(id, id.to_uppercase())
            .with_type("percentage")
            .with_value(Decimal::from(value))
            .with_source(source)
    }

    fn ids(normalized: &NormalizedOffers<'_>, subset: &CandidateSubset) -> Vec<String> {
        subset
            .offers
            .iter()
            .filter_map(|key| normalized.offers.get(*key))
            .map(|offer| offer.id.clone())
            .collect()
    }

    #[test]
    fn same_source_percentages_never_share_a_subset() {
        let normalized = normalized(&[percent("ten", 10, "store"), percent("twenty", 20, "store")]);
        let search = find_compatible_subsets(&normalized, &Constraints::new());

        let mut found: Vec<_> = search
            .subsets
            .iter()
            .map(|subset| ids(&normalized, subset))
            .collect();
        found.sort();

        assert_eq!(found, vec![vec!["ten".to_string()], vec!["twenty".to_string()]]);
    }

    #[test]
    fn percentages_from_different_sources_combine() {
        let normalized = normalized(&[percent("store", 10, "store"), percent("bank", 5, "bank")]);
        let search = find_compatible_subsets(&normalized, &Constraints::new());

        assert_eq!(search.subsets.len(), 3);
    }

    #[test]
    fn conflicts_are_symmetric() {
        let rules = ConflictRules::new().forbid("students", "members");

        let mut exclusive = offer("exclusive", OfferKind::FixedAmount, None);
        exclusive.mutually_exclusive.push("plain".to_string());

        let mut lone = offer("lone", OfferKind::FixedAmount, None);
        lone.stackable = false;

        let mut students = offer("students", OfferKind::Cashback, None);
        students.restrictions = TagSet::from_strs(&["students"]);

        let mut members = offer("members", OfferKind::FreeShipping, None);
        members.restrictions = TagSet::from_strs(&["members"]);

        let mut store_pct = offer("store-pct", OfferKind::Percentage, None);
        store_pct.source = Some("store".to_string());

        let mut other_pct = offer("other-pct", OfferKind::Percentage, None);
        other_pct.source = Some("store".to_string());

        let plain = offer("plain", OfferKind::FixedAmount, None);

        let all = [exclusive, lone, students, members, store_pct, other_pct, plain];

        for left in &all {
            for right in &all {
                assert_eq!(
                    conflict_between(left, right, &rules),
                    conflict_between(right, left, &rules),
                    "{} vs {}",
                    left.id,
                    right.id
                );
            }
        }
    }

    #[test]
    fn non_stackable_offers_only_appear_alone() {
        let lone = RawOffer::auto_applied("lone")
            .with_type("fixed")
            .with_value(Decimal::TEN)
            .not_stackable();
        let other = RawOffer::auto_applied("other")
            .with_type("free_shipping");

        let normalized = normalized(&[lone, other]);
        let search = find_compatible_subsets(&normalized, &Constraints::new());

        assert_eq!(search.subsets.len(), 2);
        assert!(search.subsets.iter().all(|subset| subset.len() == 1));
    }

    #[test]
    fn restriction_rules_block_pairs() {
        let students = RawOffer::auto_applied("students")
            .with_type("fixed")
            .with_value(Decimal::TEN)
            .with_restriction("students");
        let members = RawOffer::auto_applied("members")
            .with_type("free_shipping")
            .with_restriction("members");

        let normalized = normalized(&[students, members]);
        let constraints = Constraints::new()
            .with_conflict_rules(ConflictRules::new().forbid("members", "students"));

        let search = find_compatible_subsets(&normalized, &constraints);

        assert!(search.subsets.iter().all(|subset| subset.len() == 1));
    }

    #[test]
    fn search_is_bounded_by_priority() -> TestResult {
        let raw: Vec<_> = (1..=15)
            .map(|value| {
                RawOffer::auto_applied(format!("offer-{value}"))
                    .with_type("fixed")
                    .with_value(Decimal::from(value))
            })
            .collect();

        let normalized = normalized(&raw);
        let search = find_compatible_subsets(&normalized, &Constraints::new());

        assert!(search.truncated);
        assert_eq!(search.searched.len(), 10);
        assert_eq!(search.excluded.len(), 5);
        assert_eq!(search.subsets.len(), 1023);

        let lowest_searched = search
            .searched
            .last()
            .and_then(|key| normalized.offers.get(*key))
            .ok_or("missing searched offer")?;

        assert_eq!(lowest_searched.id, "offer-6");

        Ok(())
    }

    #[test]
    fn max_stack_size_limits_subset_length() {
        let raw: Vec<_> = (1..=4)
            .map(|value| {
                RawOffer::auto_applied(format!("offer-{value}"))
                    .with_type("fixed")
                    .with_value(Decimal::from(value))
            })
            .collect();

        let normalized = normalized(&raw);
        let search =
            find_compatible_subsets(&normalized, &Constraints::new().with_max_stack_size(2));

        // 4 singles + 6 pairs
        assert_eq!(search.subsets.len(), 10);
        assert_eq!(search.compatible, 10);
        assert_eq!(search.visited, 15);
    }

    #[test]
    fn visiting_streams_subsets_without_collecting_them() {
        let raw: Vec<_> = (1..=16)
            .map(|value| {
                RawOffer::auto_applied(format!("offer-{value}"))
                    .with_type("fixed")
                    .with_value(Decimal::from(value))
            })
            .collect();

        let normalized = normalized(&raw);
        let mut largest = 0;
        let search = visit_compatible_subsets(
            &normalized,
            &Constraints::new().with_max_combination_size(16),
            None,
            |subset| largest = largest.max(subset.len()),
        );

        assert!(search.subsets.is_empty());
        assert_eq!(search.compatible, 65_535);
        assert_eq!(search.visited, 65_535);
        assert_eq!(largest, 16);
    }

    #[test]
    fn elapsed_deadline_stops_the_search() {
        let raw: Vec<_> = (1..=12)
            .map(|value| {
                RawOffer::auto_applied(format!("offer-{value}"))
                    .with_type("fixed")
                    .with_value(Decimal::from(value))
            })
            .collect();

        let normalized = normalized(&raw);
        let search = find_compatible_subsets_until(
            &normalized,
            &Constraints::new().with_max_combination_size(12),
            Some(Instant::now()),
        );

        assert!(search.budget_exceeded);
        assert!(search.visited < 4095);
    }

    #[test]
    fn compatibility_score_penalises_restriction_tags() {
        let tagged = RawOffer::auto_applied("tagged")
            .with_type("fixed")
            .with_value(Decimal::TEN)
            .with_restriction("app-only");
        let plain = RawOffer::auto_applied("plain").with_type("free_shipping");

        let normalized = normalized(&[tagged, plain]);
        let keys: Vec<_> = normalized.ranked.clone();

        assert_eq!(
            compatibility_score(&keys, &normalized.offers),
            Decimal::new(15, 1)
        );
    }

    #[test]
    fn unclassified_offers_are_not_searched() {
        let normalized = normalized(&[RawOffer::auto_applied("mystery").with_description("??")]);
        let search = find_compatible_subsets(&normalized, &Constraints::new());

        assert!(search.subsets.is_empty());
        assert!(search.searched.is_empty());
    }
}
