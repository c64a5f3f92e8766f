//! Fixtures
//!
//! Scenario files under `<base>/scenarios/<name>.yml` describe one product, its
//! constraints and the raw offers found for it.

use std::{fs, path::PathBuf};

use rust_decimal::Decimal;
use rusty_money::iso::{Currency, EUR, GBP, INR, USD};
use thiserror::Error;

use crate::money::to_minor;

pub mod scenario;

pub use scenario::{Scenario, ScenarioFixture};

/// Fixture Parsing Errors
#[derive(Debug, Error)]
pub enum FixtureError {
    /// IO error reading fixture files
    #[error("Failed to read fixture file: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_norway::Error),

    /// Invalid price format
    #[error("Invalid price format: {0}")]
    InvalidPrice(String),

    /// Unknown currency code
    #[error("Unknown currency code: {0}")]
    UnknownCurrency(String),

    /// Currency differs from the product's
    #[error("Currency mismatch: expected {0}, found {1}")]
    CurrencyMismatch(String, String),

    /// Affinity names an offer type that does not exist
    #[error("Unknown offer type: {0}")]
    UnknownOfferKind(String),
}

/// Loads scenario fixtures from a directory.
#[derive(Debug, Clone)]
pub struct Fixture {
    base_path: PathBuf,
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    /// Fixtures rooted at `./fixtures`.
    pub fn new() -> Self {
        Self::with_base_path("./fixtures")
    }

    /// Fixtures rooted at `base_path`.
    pub fn with_base_path(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Path of the scenario file called `name`.
    pub fn scenario_path(&self, name: &str) -> PathBuf {
        self.base_path.join("scenarios").join(format!("{name}.yml"))
    }

    /// Load and resolve the scenario called `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if it holds an invalid
    /// price, currency or offer type.
    pub fn load_scenario(&self, name: &str) -> Result<Scenario<'static>, FixtureError> {
        let contents = fs::read_to_string(self.scenario_path(name))?;

        Scenario::from_yaml(&contents)
    }
}

/// Parse a price string (e.g. `"249.99 GBP"`) into minor units and currency.
///
/// # Errors
///
/// Returns an error if the string is not in the format `AMOUNT CURRENCY`, if the amount
/// is not a decimal, or if the currency code is not recognised.
pub fn parse_price(s: &str) -> Result<(i64, &'static Currency), FixtureError> {
    let mut parts = s.split_whitespace();

    let (Some(amount), Some(code), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(FixtureError::InvalidPrice(format!(
            "Expected format 'AMOUNT CURRENCY', got: {s}"
        )));
    };

    let amount = amount
        .parse::<Decimal>()
        .map_err(|_err| FixtureError::InvalidPrice(s.to_string()))?;

    let currency = parse_currency(code)?;

    let minor_units =
        to_minor(amount, currency).map_err(|_err| FixtureError::InvalidPrice(s.to_string()))?;

    Ok((minor_units, currency))
}

fn parse_currency(code: &str) -> Result<&'static Currency, FixtureError> {
    match code {
        "GBP" => Ok(GBP),
        "USD" => Ok(USD),
        "EUR" => Ok(EUR),
        "INR" => Ok(INR),
        other => Err(FixtureError::UnknownCurrency(other.to_string())),
    }
}
