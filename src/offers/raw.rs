//! Raw Offers

use jiff::Timestamp;
use rust_decimal::Decimal;
use serde::Deserialize;

/// An offer record as supplied by upstream discovery, before validation.
///
/// Amounts are in major units and percentages in percentage points. Every field is
/// optional so partially scraped records can still be deserialized and then rejected
/// with a reason by [`normalize`](super::normalize).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(default)]
pub struct RawOffer {
    /// Upstream identifier
    pub id: Option<String>,

    /// Redemption code
    pub code: Option<String>,

    /// Declared mechanism (e.g. `"percentage"`, `"free_shipping"`)
    #[serde(rename = "type")]
    pub declared_type: Option<String>,

    /// Face value
    pub value: Option<Decimal>,

    /// Free-text description, used to classify offers with no declared type
    pub description: Option<String>,

    /// Savings cap in major units
    pub max_savings: Option<Decimal>,

    /// Minimum spend in major units
    pub min_spend: Option<Decimal>,

    /// Expiry
    pub expires_at: Option<Timestamp>,

    /// Applied without a code
    pub automatic: bool,

    /// Verified by the upstream source
    pub verified: bool,

    /// Whether the offer may be combined with others; defaults to `true`
    pub stackable: Option<bool>,

    /// Originating store or source
    pub source: Option<String>,

    /// Caller-supplied confidence in `0..=1`
    pub confidence: Option<Decimal>,

    /// Identifiers or codes of offers this one cannot be combined with
    pub mutually_exclusive: Vec<String>,

    /// Restriction tags
    pub restrictions: Vec<String>,

    /// Units to buy for buy-x-get-y offers
    pub buy_quantity: Option<u32>,

    /// Units received free for buy-x-get-y offers
    pub get_quantity: Option<u32>,
}

impl RawOffer {
    /// An offer redeemed by entering `code`.
    pub fn code_offer(id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            code: Some(code.into()),
            ..Self::default()
        }
    }

    /// An offer applied automatically with no code.
    pub fn auto_applied(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            automatic: true,
            ..Self::default()
        }
    }

    /// Set the declared type.
    #[must_use]
    pub fn with_type(mut self, declared_type: impl Into<String>) -> Self {
        self.declared_type = Some(declared_type.into());
        self
    }

    /// Set the face value.
    #[must_use]
    pub fn with_value(mut self, value: Decimal) -> Self {
        self.value = Some(value);
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the savings cap.
    #[must_use]
    pub fn with_max_savings(mut self, max_savings: Decimal) -> Self {
        self.max_savings = Some(max_savings);
        self
    }

    /// Set the minimum spend.
    #[must_use]
    pub fn with_min_spend(mut self, min_spend: Decimal) -> Self {
        self.min_spend = Some(min_spend);
        self
    }

    /// Set the expiry.
    #[must_use]
    pub fn with_expiry(mut self, expires_at: Timestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Mark the offer as verified.
    #[must_use]
    pub fn verified(mut self) -> Self {
        self.verified = true;
        self
    }

    /// Mark the offer as not combinable with any other.
    #[must_use]
    pub fn not_stackable(mut self) -> Self {
        self.stackable = Some(false);
        self
    }

    /// Set the source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set an explicit confidence.
    #[must_use]
    pub fn with_confidence(mut self, confidence: Decimal) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Declare `ident` mutually exclusive with this offer.
    #[must_use]
    pub fn exclusive_with(mut self, ident: impl Into<String>) -> Self {
        self.mutually_exclusive.push(ident.into());
        self
    }

    /// Add a restriction tag.
    #[must_use]
    pub fn with_restriction(mut self, tag: impl Into<String>) -> Self {
        self.restrictions.push(tag.into());
        self
    }

    /// Set buy-x-get-y quantities.
    #[must_use]
    pub fn with_buy_get(mut self, buy: u32, get: u32) -> Self {
        self.buy_quantity = Some(buy);
        self.get_quantity = Some(get);
        self
    }

    /// Best available label for reporting, even when the offer is unusable.
    pub fn identifier(&self) -> &str {
        [&self.id, &self.code, &self.description]
            .into_iter()
            .flatten()
            .map(|label| label.trim())
            .find(|label| !label.is_empty())
            .unwrap_or_default()
    }
}
