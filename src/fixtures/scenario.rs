//! Scenario Fixtures

use std::{collections::BTreeMap, time::Duration};

use jiff::Timestamp;
use rust_decimal::Decimal;
use rusty_money::{Money, iso::Currency};
use serde::Deserialize;

use crate::{
    constraints::{ConflictRules, Constraints},
    fixtures::{FixtureError, parse_price},
    offers::{OfferKind, RawOffer},
    personalization::AffinitySignal,
    products::ProductContext,
};

/// A scenario as written in YAML.
#[derive(Debug, Deserialize)]
pub struct ScenarioFixture {
    /// Scenario name
    pub name: String,

    /// What the scenario exercises
    #[serde(default)]
    pub description: String,

    /// Evaluation time used for expiry checks
    pub evaluated_at: Timestamp,

    /// The product being bought
    pub product: ProductFixture,

    /// Search and pricing constraints
    #[serde(default)]
    pub constraints: ConstraintsFixture,

    /// Optional preference affinities
    #[serde(default)]
    pub affinities: Option<AffinitiesFixture>,

    /// Offers found for the product
    #[serde(default)]
    pub offers: Vec<RawOffer>,
}

/// Product Fixture
#[derive(Debug, Deserialize)]
pub struct ProductFixture {
    /// Product identifier
    pub id: String,

    /// Price (e.g. `"249.99 GBP"`)
    pub price: String,

    /// Category
    #[serde(default)]
    pub category: String,

    /// Brand
    #[serde(default)]
    pub brand: String,

    /// Units covered by the price
    #[serde(default)]
    pub quantity: Option<u32>,
}

/// Constraints Fixture
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConstraintsFixture {
    /// Shipping cost (e.g. `"4.99 GBP"`)
    pub shipping: Option<String>,

    /// Combination search bound
    pub max_combination_size: Option<usize>,

    /// Largest stack allowed
    pub max_stack_size: Option<usize>,

    /// Offers below this confidence are dropped
    pub min_confidence: Option<Decimal>,

    /// Search budget in milliseconds
    pub time_budget_ms: Option<u64>,

    /// Restriction tag pairs that cannot be combined
    pub conflicts: Vec<(String, String)>,
}

/// Affinities Fixture
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AffinitiesFixture {
    /// Affinity by offer source
    pub sources: BTreeMap<String, Decimal>,

    /// Affinity by declared offer type
    pub kinds: BTreeMap<String, Decimal>,
}

/// A resolved scenario, ready to optimise.
#[derive(Debug, Clone)]
pub struct Scenario<'a> {
    /// Scenario name
    pub name: String,

    /// What the scenario exercises
    pub description: String,

    /// Evaluation time
    pub now: Timestamp,

    /// Product context
    pub product: ProductContext<'a>,

    /// Constraints
    pub constraints: Constraints<'a>,

    /// Preference signal, if the scenario has one
    pub signal: Option<AffinitySignal>,

    /// Raw offers
    pub offers: Vec<RawOffer>,
}

impl Scenario<'static> {
    /// Parse and resolve a scenario from YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid, or if it holds an invalid price,
    /// currency or offer type.
    pub fn from_yaml(contents: &str) -> Result<Self, FixtureError> {
        let fixture: ScenarioFixture = serde_norway::from_str(contents)?;

        Self::try_from(fixture)
    }
}

impl TryFrom<ScenarioFixture> for Scenario<'static> {
    type Error = FixtureError;

    fn try_from(fixture: ScenarioFixture) -> Result<Self, Self::Error> {
        let (minor_units, currency) = parse_price(&fixture.product.price)?;

        let mut product = ProductContext::new(fixture.product.id, Money::from_minor(minor_units, currency))
            .with_category(fixture.product.category)
            .with_brand(fixture.product.brand);

        if let Some(quantity) = fixture.product.quantity {
            product = product.with_quantity(quantity);
        }

        let constraints = fixture.constraints.resolve(currency)?;
        let signal = fixture.affinities.map(AffinitiesFixture::resolve).transpose()?;

        Ok(Scenario {
            name: fixture.name,
            description: fixture.description,
            now: fixture.evaluated_at,
            product,
            constraints,
            signal,
            offers: fixture.offers,
        })
    }
}

impl ConstraintsFixture {
    fn resolve(self, currency: &'static Currency) -> Result<Constraints<'static>, FixtureError> {
        let mut constraints = Constraints::new();

        if let Some(shipping) = self.shipping.as_deref() {
            let (minor_units, shipping_currency) = parse_price(shipping)?;

            if shipping_currency != currency {
                return Err(FixtureError::CurrencyMismatch(
                    currency.iso_alpha_code.to_string(),
                    shipping_currency.iso_alpha_code.to_string(),
                ));
            }

            constraints = constraints.with_shipping_cost(Money::from_minor(minor_units, currency));
        }

        if let Some(bound) = self.max_combination_size {
            constraints = constraints.with_max_combination_size(bound);
        }

        if let Some(max_stack_size) = self.max_stack_size {
            constraints = constraints.with_max_stack_size(max_stack_size);
        }

        if let Some(min_confidence) = self.min_confidence {
            constraints = constraints.with_min_confidence(min_confidence);
        }

        if let Some(millis) = self.time_budget_ms {
            constraints = constraints.with_time_budget(Duration::from_millis(millis));
        }

        let rules = self
            .conflicts
            .iter()
            .fold(ConflictRules::new(), |rules, (left, right)| rules.forbid(left, right));

        Ok(constraints.with_conflict_rules(rules))
    }
}

impl AffinitiesFixture {
    fn resolve(self) -> Result<AffinitySignal, FixtureError> {
        let signal = self
            .sources
            .into_iter()
            .fold(AffinitySignal::new(), |signal, (source, affinity)| {
                signal.with_source(source, affinity)
            });

        self.kinds
            .into_iter()
            .try_fold(signal, |signal, (declared, affinity)| {
                let kind = OfferKind::from_declared(&declared)
                    .ok_or(FixtureError::UnknownOfferKind(declared))?;

                Ok(signal.with_kind(kind, affinity))
            })
    }
}
