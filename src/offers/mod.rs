//! Offers
//!
//! Normalised discount instruments and the closed set of mechanisms they use.

use std::fmt;

use jiff::Timestamp;
use rust_decimal::Decimal;
use rusty_money::{Money, iso::Currency};
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::tags::TagSet;

pub mod normalize;
pub mod raw;

pub use normalize::{InvalidOffer, InvalidReason, NormalizedOffers, classify, normalize};
pub use raw::RawOffer;

new_key_type! {
    /// Offer Key
    pub struct OfferKey;
}

/// Normalised offers for one optimisation call, keyed by [`OfferKey`].
///
/// Candidate subsets and savings steps hold keys into this map rather than owning offers.
pub type OfferSet<'a> = SlotMap<OfferKey, Offer<'a>>;

/// Mechanism an offer uses to reduce what the shopper pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OfferKind {
    /// Percentage off the remaining price (e.g. "15% off")
    Percentage,

    /// Fixed amount off the remaining price (e.g. "£10 off")
    FixedAmount,

    /// Buy some units, get some free
    BuyXGetY,

    /// Shipping cost waived
    FreeShipping,

    /// Percentage of the remaining price credited back after purchase
    Cashback,

    /// Unrecognised mechanism; kept for reporting and never stacked
    Other,
}

impl OfferKind {
    /// Every kind in canonical application order.
    pub const ALL: [OfferKind; 6] = [
        OfferKind::Percentage,
        OfferKind::FixedAmount,
        OfferKind::BuyXGetY,
        OfferKind::FreeShipping,
        OfferKind::Cashback,
        OfferKind::Other,
    ];

    /// Position in the canonical application order.
    ///
    /// Percentages run first so they act on the largest price, cashback runs last.
    pub const fn application_rank(self) -> u8 {
        match self {
            OfferKind::Percentage => 0,
            OfferKind::FixedAmount => 1,
            OfferKind::BuyXGetY => 2,
            OfferKind::FreeShipping => 3,
            OfferKind::Cashback => 4,
            OfferKind::Other => u8::MAX,
        }
    }

    /// Whether offers of this kind take part in combination search.
    pub const fn is_searchable(self) -> bool {
        !matches!(self, OfferKind::Other)
    }

    /// Whether applying the offer lowers the running price.
    pub const fn reduces_price(self) -> bool {
        matches!(
            self,
            OfferKind::Percentage | OfferKind::FixedAmount | OfferKind::BuyXGetY
        )
    }

    /// Map a declared type string from upstream onto a kind.
    pub fn from_declared(declared: &str) -> Option<Self> {
        let normalized = declared.trim().to_ascii_lowercase().replace(['-', ' '], "_");

        match normalized.as_str() {
            "percentage" | "percent" | "percent_off" => Some(OfferKind::Percentage),
            "fixed" | "fixed_amount" | "amount" | "amount_off" => Some(OfferKind::FixedAmount),
            "bogo" | "buy_x_get_y" | "buy_get" => Some(OfferKind::BuyXGetY),
            "free_shipping" | "shipping" => Some(OfferKind::FreeShipping),
            "cashback" | "cash_back" => Some(OfferKind::Cashback),
            _ => None,
        }
    }
}

impl fmt::Display for OfferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OfferKind::Percentage => "percentage",
            OfferKind::FixedAmount => "fixed_amount",
            OfferKind::BuyXGetY => "buy_x_get_y",
            OfferKind::FreeShipping => "free_shipping",
            OfferKind::Cashback => "cashback",
            OfferKind::Other => "other",
        })
    }
}

/// Unit economics of a buy-x-get-y offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuyGet {
    /// Units that must be bought
    pub buy: u32,

    /// Units received free
    pub get: u32,
}

/// A validated, classified offer.
#[derive(Debug, Clone, PartialEq)]
pub struct Offer<'a> {
    /// Identifier (upstream id, falling back to the redemption code)
    pub id: String,

    /// Redemption code; `None` for automatic offers
    pub code: Option<String>,

    /// Mechanism
    pub kind: OfferKind,

    /// Face value: percentage points for percentage and cashback, major units otherwise
    pub value: Option<Decimal>,

    /// Largest saving this offer may contribute
    pub max_savings: Option<Money<'a, Currency>>,

    /// Minimum spend before the offer applies
    pub min_spend: Option<Money<'a, Currency>>,

    /// Expiry
    pub expires_at: Option<Timestamp>,

    /// Applied without a code
    pub automatic: bool,

    /// Verified by the upstream source
    pub verified: bool,

    /// Whether the offer may be combined with others at all
    pub stackable: bool,

    /// Originating store or source
    pub source: Option<String>,

    /// Confidence that the offer works, in `0..=1`
    pub confidence: Decimal,

    /// Identifiers of offers this one cannot be combined with
    pub mutually_exclusive: SmallVec<[String; 2]>,

    /// Free-form restriction tags
    pub restrictions: TagSet,

    /// Buy-x-get-y quantities
    pub buy_get: Option<BuyGet>,

    /// Standalone priority used to bound the combination search
    pub priority: Decimal,
}

impl Offer<'_> {
    /// Whether `ident` names this offer, by id or by code.
    pub fn is_identified_by(&self, ident: &str) -> bool {
        self.id == ident || self.code.as_deref() == Some(ident)
    }

    /// Whether this offer lists `other` as mutually exclusive.
    pub fn excludes(&self, other: &Offer<'_>) -> bool {
        self.mutually_exclusive
            .iter()
            .any(|ident| other.is_identified_by(ident))
    }

    /// Whether the shopper has to enter a code.
    pub fn requires_code(&self) -> bool {
        !self.automatic && self.code.is_some()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use rust_decimal::Decimal;
    use smallvec::SmallVec;

    use super::{Offer, OfferKind};
    use crate::tags::TagSet;

    /// A verified, automatic offer with no caps or restrictions.
    pub(crate) fn offer<'a>(id: &str, kind: OfferKind, value: Option<Decimal>) -> Offer<'a> {
        Offer {
            id: id.to_string(),
            code: None,
            kind,
            value,
            max_savings: None,
            min_spend: None,
            expires_at: None,
            automatic: true,
            verified: true,
            stackable: true,
            source: None,
            confidence: Decimal::ONE,
            mutually_exclusive: SmallVec::new(),
            restrictions: TagSet::empty(),
            buy_get: None,
            priority: Decimal::ZERO,
        }
    }
}
