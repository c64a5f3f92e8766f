//! Offer Normalization
//!
//! Validates raw records against the product and the evaluation time, classifies each
//! survivor by mechanism and assigns the standalone priority used to bound the search.

use std::{fmt, sync::LazyLock};

use jiff::Timestamp;
use regex::Regex;
use rust_decimal::Decimal;
use rusty_money::{Money, iso::Currency};
use smallvec::SmallVec;
use tracing::debug;

use crate::{
    money::{AmountError, money_from_major, to_minor},
    offers::{BuyGet, Offer, OfferKey, OfferKind, OfferSet, RawOffer},
    products::ProductContext,
    tags::TagSet,
};

/// Weight applied to an offer's face value in its standalone priority.
const VALUE_WEIGHT: Decimal = Decimal::from_parts(1, 0, 0, false, 1);

/// Priority bonus for offers that need no code.
const AUTOMATIC_BONUS: Decimal = Decimal::TEN;

/// Priority bonus for verified offers.
const VERIFIED_BONUS: Decimal = Decimal::from_parts(5, 0, 0, false, 0);

/// Priority penalty per restriction tag beyond [`FREE_RESTRICTIONS`].
const RESTRICTION_PENALTY: Decimal = Decimal::from_parts(3, 0, 0, false, 0);

/// Restriction tags an offer may carry before it is penalised.
const FREE_RESTRICTIONS: usize = 2;

/// Confidence assumed for verified offers without an explicit value.
const VERIFIED_CONFIDENCE: Decimal = Decimal::ONE;

/// Confidence assumed for unverified offers without an explicit value.
const UNVERIFIED_CONFIDENCE: Decimal = Decimal::from_parts(6, 0, 0, false, 1);

#[expect(clippy::expect_used, reason = "pattern is a compile-time constant")]
static PERCENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").expect("valid percent pattern"));

#[expect(clippy::expect_used, reason = "pattern is a compile-time constant")]
static CURRENCY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:[$£€₹]\s*(\d+(?:\.\d+)?))|(?:(\d+(?:\.\d+)?)\s*(?:usd|gbp|eur|inr|dollars?|pounds?|euros?)\b)")
        .expect("valid currency pattern")
});

#[expect(clippy::expect_used, reason = "pattern is a compile-time constant")]
static BUY_GET_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bbuy\s+(\d+|one|two|three|four|five)\b.*?\bget\s+(\d+|one|two|three|four|five)\b")
        .expect("valid buy/get pattern")
});

#[expect(clippy::expect_used, reason = "pattern is a compile-time constant")]
static BOGO_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bbogo\b").expect("valid bogo pattern"));

#[expect(clippy::expect_used, reason = "pattern is a compile-time constant")]
static CASHBACK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bcash\s*-?\s*back\b").expect("valid cashback pattern"));

#[expect(clippy::expect_used, reason = "pattern is a compile-time constant")]
static SHIPPING_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:free\s+)?(?:shipping|delivery|postage)\b").expect("valid shipping pattern")
});

/// Why a raw offer was dropped during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvalidReason {
    /// Neither a redemption code nor the automatic flag
    Unidentifiable,

    /// Expired before the evaluation time
    Expired,

    /// Minimum spend exceeds the product's base price
    BelowMinimumSpend,

    /// Negative value, cap or minimum spend
    NegativeValue,

    /// Percentage or cashback value above 100
    PercentageOutOfRange,

    /// Confidence below the caller's threshold
    LowConfidence,

    /// An amount too large to represent in minor units
    UnrepresentableAmount,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InvalidReason::Unidentifiable => "no code and not automatic",
            InvalidReason::Expired => "expired",
            InvalidReason::BelowMinimumSpend => "minimum spend not met",
            InvalidReason::NegativeValue => "negative amount",
            InvalidReason::PercentageOutOfRange => "percentage above 100",
            InvalidReason::LowConfidence => "confidence below threshold",
            InvalidReason::UnrepresentableAmount => "amount out of range",
        })
    }
}

impl From<AmountError> for InvalidReason {
    fn from(_: AmountError) -> Self {
        InvalidReason::UnrepresentableAmount
    }
}

/// A raw offer that failed validation, kept for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvalidOffer {
    /// Best available label for the dropped record
    pub identifier: String,

    /// Reason it was dropped
    pub reason: InvalidReason,
}

/// Output of [`normalize`]: the valid offers, their priority order and the rejects.
#[derive(Debug, Clone)]
pub struct NormalizedOffers<'a> {
    /// Valid offers, including unclassified ones
    pub offers: OfferSet<'a>,

    /// Keys of `offers` sorted by descending priority; equal priorities keep input order
    pub ranked: Vec<OfferKey>,

    /// Records dropped by validation
    pub dropped: Vec<InvalidOffer>,
}

impl NormalizedOffers<'_> {
    /// Offers eligible for combination search, highest priority first.
    pub fn searchable(&self) -> impl Iterator<Item = OfferKey> + '_ {
        self.ranked.iter().copied().filter(|key| {
            self.offers
                .get(*key)
                .is_some_and(|offer| offer.kind.is_searchable())
        })
    }

    /// Offers that could not be classified, highest priority first.
    pub fn unclassified(&self) -> impl Iterator<Item = OfferKey> + '_ {
        self.ranked.iter().copied().filter(|key| {
            self.offers
                .get(*key)
                .is_some_and(|offer| !offer.kind.is_searchable())
        })
    }

    /// Drop every offer whose confidence is below `min_confidence`.
    pub fn retain_confident(&mut self, min_confidence: Decimal) {
        let offers = &mut self.offers;
        let dropped = &mut self.dropped;

        self.ranked.retain(|key| {
            let Some(offer) = offers.get(*key) else {
                return false;
            };

            if offer.confidence >= min_confidence {
                return true;
            }

            debug!(offer = %offer.id, confidence = %offer.confidence, "dropping low-confidence offer");

            dropped.push(InvalidOffer {
                identifier: offer.id.clone(),
                reason: InvalidReason::LowConfidence,
            });

            offers.remove(*key);

            false
        });
    }

    /// Number of valid offers.
    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    /// Whether no offer survived validation.
    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }
}

/// Validate, classify and prioritise raw offers for `product` at time `now`.
///
/// Invalid records are dropped and reported in [`NormalizedOffers::dropped`]; nothing
/// here fails the call.
pub fn normalize<'a>(
    raw_offers: &[RawOffer],
    product: &ProductContext<'a>,
    now: Timestamp,
) -> NormalizedOffers<'a> {
    let mut offers = OfferSet::with_capacity_and_key(raw_offers.len());
    let mut ranked = Vec::with_capacity(raw_offers.len());
    let mut dropped = Vec::new();

    for (index, raw) in raw_offers.iter().enumerate() {
        match validate(raw, index, product, now) {
            Ok(offer) => ranked.push(offers.insert(offer)),
            Err(reason) => {
                debug!(offer = raw.identifier(), %reason, "dropping invalid offer");

                dropped.push(InvalidOffer {
                    identifier: raw.identifier().to_string(),
                    reason,
                });
            }
        }
    }

    // Stable, so equal priorities keep their input order.
    ranked.sort_by(|left, right| {
        let left = offers.get(*left).map(|offer| offer.priority);
        let right = offers.get(*right).map(|offer| offer.priority);

        right.cmp(&left)
    });

    NormalizedOffers {
        offers,
        ranked,
        dropped,
    }
}

fn validate<'a>(
    raw: &RawOffer,
    index: usize,
    product: &ProductContext<'a>,
    now: Timestamp,
) -> Result<Offer<'a>, InvalidReason> {
    let code = non_blank(raw.code.as_deref());

    if code.is_none() && !raw.automatic {
        return Err(InvalidReason::Unidentifiable);
    }

    if raw.expires_at.is_some_and(|expiry| expiry < now) {
        return Err(InvalidReason::Expired);
    }

    let negative = |amount: Option<Decimal>| amount.is_some_and(|amount| amount.is_sign_negative());

    if negative(raw.value) || negative(raw.max_savings) || negative(raw.min_spend) {
        return Err(InvalidReason::NegativeValue);
    }

    let kind = classify(raw);
    let value = raw.value.or_else(|| extract_value(kind, raw.description.as_deref()));

    if matches!(kind, OfferKind::Percentage | OfferKind::Cashback)
        && value.is_some_and(|points| points > Decimal::ONE_HUNDRED)
    {
        return Err(InvalidReason::PercentageOutOfRange);
    }

    let currency = product.currency();
    let min_spend = optional_money(raw.min_spend, currency)?;

    if min_spend.as_ref().is_some_and(|threshold| {
        threshold.to_minor_units() > product.base_price.to_minor_units()
    }) {
        return Err(InvalidReason::BelowMinimumSpend);
    }

    let max_savings = optional_money(raw.max_savings, currency)?;

    if kind == OfferKind::FixedAmount
        && let Some(value) = value
    {
        to_minor(value, currency)?;
    }

    let id = non_blank(raw.id.as_deref())
        .or(code)
        .map_or_else(|| format!("offer-{index}"), ToString::to_string);

    let confidence = raw.confidence.map_or(
        if raw.verified {
            VERIFIED_CONFIDENCE
        } else {
            UNVERIFIED_CONFIDENCE
        },
        |confidence| confidence.clamp(Decimal::ZERO, Decimal::ONE),
    );

    let restrictions: TagSet = raw
        .restrictions
        .iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .collect();

    let buy_get = match kind {
        OfferKind::BuyXGetY => buy_get(raw),
        _ => None,
    };

    let mut offer = Offer {
        id,
        code: code.map(ToString::to_string),
        kind,
        value,
        max_savings,
        min_spend,
        expires_at: raw.expires_at,
        automatic: raw.automatic,
        verified: raw.verified,
        stackable: raw.stackable.unwrap_or(true),
        source: non_blank(raw.source.as_deref()).map(ToString::to_string),
        confidence,
        mutually_exclusive: raw
            .mutually_exclusive
            .iter()
            .filter_map(|ident| non_blank(Some(ident)))
            .map(ToString::to_string)
            .collect::<SmallVec<_>>(),
        restrictions,
        buy_get,
        priority: Decimal::ZERO,
    };

    offer.priority = priority(&offer);

    Ok(offer)
}

/// Standalone priority of an offer.
///
/// Scaled face value, plus bonuses for automatic and verified offers, minus a penalty for
/// each restriction tag past the second.
pub fn priority(offer: &Offer<'_>) -> Decimal {
    let mut priority = offer.value.unwrap_or_default() * VALUE_WEIGHT;

    if offer.automatic {
        priority += AUTOMATIC_BONUS;
    }

    if offer.verified {
        priority += VERIFIED_BONUS;
    }

    let excess = offer.restrictions.len().saturating_sub(FREE_RESTRICTIONS);

    priority - RESTRICTION_PENALTY * Decimal::from(excess)
}

/// Determine an offer's mechanism from its declared type, falling back to its description.
///
/// More specific mechanisms are tried first, so "5% cashback" is cashback rather than a
/// percentage discount.
pub fn classify(raw: &RawOffer) -> OfferKind {
    if let Some(kind) = raw.declared_type.as_deref().and_then(OfferKind::from_declared) {
        return kind;
    }

    let description = raw.description.as_deref().unwrap_or_default();
    let shipping_code = raw
        .code
        .as_deref()
        .is_some_and(|code| code.to_ascii_uppercase().contains("SHIP"));

    if CASHBACK_PATTERN.is_match(description) {
        OfferKind::Cashback
    } else if shipping_code || SHIPPING_PATTERN.is_match(description) {
        OfferKind::FreeShipping
    } else if BOGO_PATTERN.is_match(description) || BUY_GET_PATTERN.is_match(description) {
        OfferKind::BuyXGetY
    } else if PERCENT_PATTERN.is_match(description) {
        OfferKind::Percentage
    } else if CURRENCY_PATTERN.is_match(description) {
        OfferKind::FixedAmount
    } else {
        OfferKind::Other
    }
}

fn extract_value(kind: OfferKind, description: Option<&str>) -> Option<Decimal> {
    let description = description?;

    let captured = match kind {
        OfferKind::Percentage | OfferKind::Cashback => PERCENT_PATTERN
            .captures(description)
            .and_then(|captures| captures.get(1)),
        OfferKind::FixedAmount => CURRENCY_PATTERN
            .captures(description)
            .and_then(|captures| captures.get(1).or_else(|| captures.get(2))),
        OfferKind::BuyXGetY | OfferKind::FreeShipping | OfferKind::Other => None,
    }?;

    captured.as_str().parse().ok()
}

fn buy_get(raw: &RawOffer) -> Option<BuyGet> {
    if let (Some(buy), Some(get)) = (raw.buy_quantity, raw.get_quantity) {
        return Some(BuyGet { buy, get });
    }

    let description = raw.description.as_deref()?;

    if let Some(captures) = BUY_GET_PATTERN.captures(description) {
        let buy = quantity(captures.get(1)?.as_str())?;
        let get = quantity(captures.get(2)?.as_str())?;

        return Some(BuyGet { buy, get });
    }

    BOGO_PATTERN
        .is_match(description)
        .then_some(BuyGet { buy: 1, get: 1 })
}

fn quantity(word: &str) -> Option<u32> {
    match word.to_ascii_lowercase().as_str() {
        "one" => Some(1),
        "two" => Some(2),
        "three" => Some(3),
        "four" => Some(4),
        "five" => Some(5),
        digits => digits.parse().ok(),
    }
}

fn optional_money(
    amount: Option<Decimal>,
    currency: &Currency,
) -> Result<Option<Money<'_, Currency>>, InvalidReason> {
    amount
        .map(|amount| money_from_major(amount, currency))
        .transpose()
        .map_err(InvalidReason::from)
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|text| !text.is_empty())
}
