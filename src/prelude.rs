//! Trellis prelude.
//!
//! Convenience exports for common library consumers.

pub use crate::{
    cache::{CacheKey, CacheStats, ExpiryPhase, Lookup, ResultCache},
    compatibility::{CandidateSubset, Conflict, ConflictReason},
    constraints::{ConflictRules, ConstraintError, Constraints},
    engine::{
        EngineSettings, OptimizationResult, Outcome, StackValidation, StackingEngine,
        optimize_uncached, validate_stack,
    },
    fixtures::{Fixture, FixtureError, Scenario},
    offers::{InvalidOffer, InvalidReason, Offer, OfferKey, OfferKind, RawOffer},
    personalization::{AffinitySignal, PreferenceSignal},
    products::ProductContext,
    ranking::{RankedStack, TopStacks},
    receipt::{PlanReceipt, ReceiptError},
    savings::{SavingsBreakdown, SavingsError, SavingsStep},
    sequence::{ApplicationSequence, ApplicationStep, RiskFactor, StepAction, Verification},
    tags::TagSet,
    warnings::Warning,
};
