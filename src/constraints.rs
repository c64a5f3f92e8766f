//! Constraints

use std::{collections::BTreeSet, time::Duration};

use rust_decimal::Decimal;
use rusty_money::{Money, iso::Currency};
use thiserror::Error;

use crate::{products::ProductContext, tags::TagSet};

/// Offers searched when the caller does not say otherwise.
pub const DEFAULT_MAX_COMBINATION_SIZE: usize = 10;

/// Largest accepted search bound. Subsets are tracked as `u32` masks.
pub const MAX_SEARCH_BOUND: usize = 24;

/// Malformed caller input. The engine performs no computation when these are returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConstraintError {
    /// The product's base price is negative.
    #[error("base price must not be negative (got {0} minor units)")]
    NegativeBasePrice(i64),

    /// The shipping cost is negative.
    #[error("shipping cost must not be negative (got {0} minor units)")]
    NegativeShippingCost(i64),

    /// An amount is in a different currency from the product.
    #[error("expected amounts in {expected}, found {found}")]
    CurrencyMismatch {
        /// Product currency
        expected: &'static str,

        /// Offending currency
        found: &'static str,
    },

    /// The combination search bound is zero or too large.
    #[error("combination search bound must be between 1 and {MAX_SEARCH_BOUND} (got {0})")]
    SearchBoundOutOfRange(usize),

    /// The stack size cap is zero.
    #[error("maximum stack size must be at least 1")]
    EmptyStackSize,

    /// The confidence threshold is outside `0..=1`.
    #[error("minimum confidence must be between 0 and 1 (got {0})")]
    ConfidenceOutOfRange(Decimal),
}

/// Restriction tag pairs that may not appear together in one stack.
///
/// Rules are symmetric: forbidding `("a", "b")` also forbids `("b", "a")`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ConflictRules {
    pairs: BTreeSet<(String, String)>,
}

impl ConflictRules {
    /// Create an empty rule table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule, returning the updated table.
    #[must_use]
    pub fn forbid(mut self, left: &str, right: &str) -> Self {
        self.insert(left, right);
        self
    }

    /// Add a rule forbidding `left` and `right` together.
    pub fn insert(&mut self, left: &str, right: &str) {
        self.pairs.insert(Self::ordered(left, right));
    }

    /// Whether any tag of `left` is declared incompatible with any tag of `right`.
    pub fn conflicting_tags(&self, left: &TagSet, right: &TagSet) -> bool {
        if self.pairs.is_empty() {
            return false;
        }

        left.iter().any(|left_tag| {
            right
                .iter()
                .any(|right_tag| self.pairs.contains(&Self::ordered(left_tag, right_tag)))
        })
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the table has no rules.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Iterate over rules with each pair in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs
            .iter()
            .map(|(left, right)| (left.as_str(), right.as_str()))
    }

    fn ordered(left: &str, right: &str) -> (String, String) {
        let (left, right) = (left.trim(), right.trim());

        if left <= right {
            (left.to_string(), right.to_string())
        } else {
            (right.to_string(), left.to_string())
        }
    }
}

/// Caller-supplied limits for one optimisation call.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraints<'a> {
    /// Known shipping cost, used to value free-shipping offers
    pub shipping_cost: Option<Money<'a, Currency>>,

    /// Number of highest-priority offers entering the combination search
    pub max_combination_size: usize,

    /// Largest stack the caller will accept
    pub max_stack_size: Option<usize>,

    /// Offers below this confidence are dropped
    pub min_confidence: Decimal,

    /// Wall-clock budget for the combination search
    pub time_budget: Option<Duration>,

    /// Restriction tag conflicts
    pub conflict_rules: ConflictRules,
}

impl Default for Constraints<'_> {
    fn default() -> Self {
        Self {
            shipping_cost: None,
            max_combination_size: DEFAULT_MAX_COMBINATION_SIZE,
            max_stack_size: None,
            min_confidence: Decimal::ZERO,
            time_budget: None,
            conflict_rules: ConflictRules::default(),
        }
    }
}

impl<'a> Constraints<'a> {
    /// Default constraints: no shipping cost and a search bound of ten offers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shipping cost.
    #[must_use]
    pub fn with_shipping_cost(mut self, shipping_cost: Money<'a, Currency>) -> Self {
        self.shipping_cost = Some(shipping_cost);
        self
    }

    /// Set the combination search bound.
    #[must_use]
    pub fn with_max_combination_size(mut self, max_combination_size: usize) -> Self {
        self.max_combination_size = max_combination_size;
        self
    }

    /// Cap the number of offers in any stack.
    #[must_use]
    pub fn with_max_stack_size(mut self, max_stack_size: usize) -> Self {
        self.max_stack_size = Some(max_stack_size);
        self
    }

    /// Set the confidence threshold.
    #[must_use]
    pub fn with_min_confidence(mut self, min_confidence: Decimal) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Set the search time budget.
    #[must_use]
    pub fn with_time_budget(mut self, time_budget: Duration) -> Self {
        self.time_budget = Some(time_budget);
        self
    }

    /// Set the restriction conflict rules.
    #[must_use]
    pub fn with_conflict_rules(mut self, conflict_rules: ConflictRules) -> Self {
        self.conflict_rules = conflict_rules;
        self
    }

    /// Shipping cost in minor units, zero when unknown.
    pub fn shipping_minor(&self) -> i64 {
        self.shipping_cost
            .as_ref()
            .map_or(0, Money::to_minor_units)
    }

    /// Check these constraints against `product`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConstraintError`] describing the first malformed value found.
    pub fn validate(&self, product: &ProductContext<'_>) -> Result<(), ConstraintError> {
        let base_minor = product.base_price.to_minor_units();

        if base_minor < 0 {
            return Err(ConstraintError::NegativeBasePrice(base_minor));
        }

        if let Some(shipping) = &self.shipping_cost {
            if shipping.currency() != product.currency() {
                return Err(ConstraintError::CurrencyMismatch {
                    expected: product.currency().iso_alpha_code,
                    found: shipping.currency().iso_alpha_code,
                });
            }

            if shipping.to_minor_units() < 0 {
                return Err(ConstraintError::NegativeShippingCost(shipping.to_minor_units()));
            }
        }

        if !(1..=MAX_SEARCH_BOUND).contains(&self.max_combination_size) {
            return Err(ConstraintError::SearchBoundOutOfRange(
                self.max_combination_size,
            ));
        }

        if self.max_stack_size == Some(0) {
            return Err(ConstraintError::EmptyStackSize);
        }

        if !(Decimal::ZERO..=Decimal::ONE).contains(&self.min_confidence) {
            return Err(ConstraintError::ConfidenceOutOfRange(self.min_confidence));
        }

        Ok(())
    }
}
