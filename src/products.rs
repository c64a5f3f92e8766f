//! Products

use rusty_money::{Money, iso::Currency};

/// The purchase under consideration for one optimisation call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductContext<'a> {
    /// Product identifier
    pub id: String,

    /// Price of the whole purchase before any offer
    pub base_price: Money<'a, Currency>,

    /// Product category
    pub category: String,

    /// Product brand
    pub brand: String,

    /// Units being bought; `base_price` covers all of them
    pub quantity: u32,
}

impl<'a> ProductContext<'a> {
    /// Create a single-unit product context with no category or brand.
    pub fn new(id: impl Into<String>, base_price: Money<'a, Currency>) -> Self {
        Self {
            id: id.into(),
            base_price,
            category: String::new(),
            brand: String::new(),
            quantity: 1,
        }
    }

    /// Set the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Set the brand.
    #[must_use]
    pub fn with_brand(mut self, brand: impl Into<String>) -> Self {
        self.brand = brand.into();
        self
    }

    /// Set the number of units covered by the base price.
    #[must_use]
    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    /// Currency shared by every amount in the call.
    pub fn currency(&self) -> &'a Currency {
        self.base_price.currency()
    }

    /// Price of one unit in minor units. A zero quantity is treated as one unit.
    pub fn unit_price_minor(&self) -> i64 {
        self.base_price.to_minor_units() / i64::from(self.quantity.max(1))
    }
}
