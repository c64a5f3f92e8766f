//! Integration tests for result caching across threads

use std::{
    sync::{Arc, Barrier},
    thread,
    time::Duration,
};

use jiff::Timestamp;
use rust_decimal::Decimal;
use rusty_money::{Money, iso::EUR};
use testresult::TestResult;

use trellis::{
    cache::CacheStats,
    constraints::Constraints,
    engine::{EngineSettings, OptimizationResult, StackingEngine},
    offers::RawOffer,
    products::ProductContext,
};

fn offers() -> Vec<RawOffer> {
    (1..=12)
        .map(|index| {
            RawOffer::code_offer(format!("offer-{index}"), format!("CODE{index}"))
                .with_type(if index % 2 == 0 { "percentage" } else { "fixed" })
                .with_value(Decimal::from(index))
                .with_source(format!("source-{index}"))
                .verified()
        })
        .collect()
}

#[test]
fn concurrent_identical_requests_compute_once() -> TestResult {
    let engine = StackingEngine::default();
    let product = ProductContext::new("sofa", Money::from_minor(89_900, EUR));
    let offers = offers();
    let constraints = Constraints::new().with_max_combination_size(12);
    let now = Timestamp::UNIX_EPOCH;
    let barrier = Barrier::new(8);

    let results: Vec<Arc<OptimizationResult<'_>>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();

                    engine.optimize_at(&product, &offers, &constraints, None, now)
                })
            })
            .collect();

        handles
            .into_iter()
            .filter_map(|handle| handle.join().ok())
            .collect::<Result<Vec<_>, _>>()
    })?;

    assert_eq!(results.len(), 8);

    let first = results.first().ok_or("no results")?;

    assert!(results.iter().all(|result| Arc::ptr_eq(result, first)));

    let stats = engine.cache_stats();

    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits + stats.coalesced, 7);
    assert_eq!(engine.cached_results(), 1);

    Ok(())
}

#[test]
fn different_products_are_cached_separately() -> TestResult {
    let engine = StackingEngine::default();
    let offers = offers();
    let constraints = Constraints::new();
    let now = Timestamp::UNIX_EPOCH;

    let results = thread::scope(|scope| {
        let handles: Vec<_> = (0..4_i64)
            .map(|index| {
                let engine = &engine;
                let offers = &offers;
                let constraints = &constraints;

                scope.spawn(move || {
                    let product = ProductContext::new(
                        format!("chair-{index}"),
                        Money::from_minor(10_000 + index, EUR),
                    );

                    engine
                        .optimize_at(&product, offers, constraints, None, now)
                        .map(|result| result.product_id.clone())
                })
            })
            .collect();

        handles
            .into_iter()
            .filter_map(|handle| handle.join().ok())
            .collect::<Result<Vec<_>, _>>()
    })?;

    assert_eq!(results.len(), 4);
    assert_eq!(engine.cached_results(), 4);
    assert_eq!(engine.cache_stats().misses, 4);

    Ok(())
}

#[test]
fn capacity_and_ttl_come_from_settings() -> TestResult {
    let engine = StackingEngine::new(EngineSettings {
        cache_capacity: 2,
        cache_ttl: Some(Duration::from_secs(60)),
        ..EngineSettings::default()
    });
    let offers = offers();
    let constraints = Constraints::new();

    for index in 0..3 {
        let product = ProductContext::new(format!("table-{index}"), Money::from_minor(25_000, EUR));

        engine.optimize_at(&product, &offers, &constraints, None, Timestamp::UNIX_EPOCH)?;
    }

    assert_eq!(engine.cached_results(), 2);
    assert_eq!(
        engine.cache_stats(),
        CacheStats {
            misses: 3,
            evictions: 1,
            ..CacheStats::default()
        }
    );

    Ok(())
}
