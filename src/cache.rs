//! Result Cache
//!
//! Bounded, in-memory memo of optimisation results.
//!
//! Entries are evicted least-recently-used first and expire after an optional time to
//! live. Concurrent lookups of a missing key are coalesced: the first caller computes
//! while the rest block on that flight's condition variable and share its result. If the
//! computing caller panics, its flight is abandoned and the waiters retry.
//!
//! A [`CacheKey`] holds the whole request, with each offer's [`ExpiryPhase`] at the
//! evaluation time in place of the time itself.

use std::{
    collections::BTreeMap,
    fmt,
    hash::Hash,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use jiff::Timestamp;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;

use crate::{
    constraints::{ConflictRules, Constraints},
    offers::RawOffer,
    personalization::PreferenceSignal,
    products::ProductContext,
    warnings::EXPIRY_WINDOW,
};

/// Where an offer's expiry stands relative to the evaluation time.
///
/// Results only depend on the evaluation time through these phases, so two requests at
/// different times share a result while every offer stays in the same phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExpiryPhase {
    /// The offer never expires
    Open,

    /// Expiry is further away than the warning window
    Live,

    /// Expiry falls within the warning window
    ExpiringSoon,

    /// Expiry has passed
    Expired,
}

impl ExpiryPhase {
    /// Phase of an offer expiring at `expires_at`, seen at `now`.
    pub fn at(expires_at: Option<Timestamp>, now: Timestamp) -> Self {
        match expires_at {
            None => ExpiryPhase::Open,
            Some(expiry) if expiry < now => ExpiryPhase::Expired,
            Some(expiry) if expiry.duration_since(now) <= EXPIRY_WINDOW => {
                ExpiryPhase::ExpiringSoon
            }
            Some(_) => ExpiryPhase::Live,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProductIdentity {
    id: String,
    base_minor: i64,
    currency: &'static str,
    category: String,
    brand: String,
    quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ConstraintsIdentity {
    shipping: Option<(i64, &'static str)>,
    max_combination_size: usize,
    max_stack_size: Option<usize>,
    min_confidence: Decimal,
    time_budget: Option<Duration>,
    conflict_rules: ConflictRules,
}

/// Identity of one optimisation request.
///
/// Holds the full request rather than a digest of it, so distinct requests never share
/// an entry. Offers are kept sorted, which makes the key independent of input order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    product: ProductIdentity,
    offers: Vec<(RawOffer, ExpiryPhase)>,
    constraints: ConstraintsIdentity,
    signal: Option<u64>,
}

impl CacheKey {
    /// Derive a key from the product, every offer record with its expiry phase at `now`,
    /// the constraints and the preference signal's fingerprint.
    pub fn new(
        product: &ProductContext<'_>,
        raw_offers: &[RawOffer],
        constraints: &Constraints<'_>,
        signal: Option<&dyn PreferenceSignal>,
        now: Timestamp,
    ) -> Self {
        let mut offers: Vec<(RawOffer, ExpiryPhase)> = raw_offers
            .iter()
            .map(|raw| (raw.clone(), ExpiryPhase::at(raw.expires_at, now)))
            .collect();
        offers.sort_unstable();

        Self {
            product: ProductIdentity {
                id: product.id.clone(),
                base_minor: product.base_price.to_minor_units(),
                currency: product.currency().iso_alpha_code,
                category: product.category.clone(),
                brand: product.brand.clone(),
                quantity: product.quantity,
            },
            offers,
            constraints: ConstraintsIdentity {
                shipping: constraints
                    .shipping_cost
                    .as_ref()
                    .map(|cost| (cost.to_minor_units(), cost.currency().iso_alpha_code)),
                max_combination_size: constraints.max_combination_size,
                max_stack_size: constraints.max_stack_size,
                min_confidence: constraints.min_confidence.normalize(),
                time_budget: constraints.time_budget,
                conflict_rules: constraints.conflict_rules.clone(),
            },
            signal: signal.map(PreferenceSignal::fingerprint),
        }
    }
}

/// How a [`ResultCache::get_or_compute`] call was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lookup {
    /// A stored entry was returned
    Hit,

    /// This caller computed the value
    Miss,

    /// Another caller's in-flight computation was shared
    Coalesced,
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Lookup::Hit => "hit",
            Lookup::Miss => "miss",
            Lookup::Coalesced => "coalesced",
        })
    }
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from a stored entry
    pub hits: u64,

    /// Lookups that computed a value
    pub misses: u64,

    /// Lookups that waited for another caller's computation
    pub coalesced: u64,

    /// Entries removed to make room
    pub evictions: u64,

    /// Entries removed because their time to live passed
    pub expirations: u64,

    /// Computed values that were not stored
    pub uncached: u64,
}

struct Entry<V> {
    value: Arc<V>,
    inserted: Instant,
    tick: u64,
}

enum FlightState<V> {
    Running,
    Done(Arc<V>),
    Abandoned,
}

struct Flight<V> {
    state: Mutex<FlightState<V>>,
    ready: Condvar,
}

impl<V> Flight<V> {
    fn new() -> Self {
        Self {
            state: Mutex::new(FlightState::Running),
            ready: Condvar::new(),
        }
    }

    fn finish(&self, state: FlightState<V>) {
        *lock(&self.state) = state;
        self.ready.notify_all();
    }

    fn wait(&self) -> Option<Arc<V>> {
        let guard = self
            .ready
            .wait_while(lock(&self.state), |state| {
                matches!(state, FlightState::Running)
            })
            .unwrap_or_else(PoisonError::into_inner);

        match &*guard {
            FlightState::Done(value) => Some(Arc::clone(value)),
            FlightState::Running | FlightState::Abandoned => None,
        }
    }
}

struct CacheState<K, V> {
    entries: FxHashMap<K, Entry<V>>,
    recency: BTreeMap<u64, K>,
    flights: FxHashMap<K, Arc<Flight<V>>>,
    tick: u64,
    stats: CacheStats,
}

impl<K: Eq + Hash + Clone, V> CacheState<K, V> {
    fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
            recency: BTreeMap::new(),
            flights: FxHashMap::default(),
            tick: 0,
            stats: CacheStats::default(),
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick = self.tick.wrapping_add(1);
        self.tick
    }

    /// Return a live entry, refreshing its recency, or drop it if it has expired.
    fn lookup(&mut self, key: &K, ttl: Option<Duration>) -> Option<Arc<V>> {
        let expired = self.entries.get(key).map(|entry| {
            ttl.is_some_and(|ttl| entry.inserted.elapsed() >= ttl)
        })?;

        if expired {
            self.remove(key);
            self.stats.expirations += 1;

            return None;
        }

        let tick = self.next_tick();
        let entry = self.entries.get_mut(key)?;

        self.recency.remove(&entry.tick);
        self.recency.insert(tick, key.clone());
        entry.tick = tick;

        Some(Arc::clone(&entry.value))
    }

    fn insert(&mut self, key: K, value: Arc<V>, capacity: usize) {
        if capacity == 0 {
            return;
        }

        self.remove(&key);

        while self.entries.len() >= capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };

            self.entries.remove(&oldest);
            self.stats.evictions += 1;
        }

        let tick = self.next_tick();

        self.recency.insert(tick, key.clone());
        self.entries.insert(
            key,
            Entry {
                value,
                inserted: Instant::now(),
                tick,
            },
        );
    }

    fn remove(&mut self, key: &K) {
        if let Some(entry) = self.entries.remove(key) {
            self.recency.remove(&entry.tick);
        }
    }
}

/// Bounded LRU cache with per-entry expiry and single-flight computation.
///
/// Keys are compared in full; the map only uses their hash to find a bucket.
pub struct ResultCache<K, V> {
    state: Mutex<CacheState<K, V>>,
    capacity: usize,
    ttl: Option<Duration>,
}

impl<K, V> fmt::Debug for ResultCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);

        f.debug_struct("ResultCache")
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .field("len", &state.entries.len())
            .field("in_flight", &state.flights.len())
            .field("stats", &state.stats)
            .finish()
    }
}

impl<K: Eq + Hash + Clone, V> ResultCache<K, V> {
    /// Create a cache holding at most `capacity` entries, each living for `ttl` if set.
    ///
    /// A capacity of zero disables storage; concurrent computations are still coalesced.
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            state: Mutex::new(CacheState::new()),
            capacity,
            ttl,
        }
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Time to live for each entry.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Stored value for `key`, if present and unexpired.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut state = lock(&self.state);
        let found = state.lookup(key, self.ttl);

        if found.is_some() {
            state.stats.hits += 1;
        }

        found
    }

    /// Store `value` under `key`, evicting the least recently used entry if full.
    pub fn put(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);

        lock(&self.state).insert(key, Arc::clone(&value), self.capacity);

        value
    }

    /// Return the value for `key`, computing it with `compute` at most once across
    /// concurrent callers.
    pub fn get_or_compute<F>(&self, key: K, compute: F) -> (Arc<V>, Lookup)
    where
        F: FnOnce() -> V,
    {
        self.get_or_compute_if(key, compute, |_| true)
    }

    /// As [`get_or_compute`](Self::get_or_compute), but a computed value is only stored
    /// when `storable` accepts it. Callers already waiting on the flight still share it.
    pub fn get_or_compute_if<F, P>(&self, key: K, compute: F, storable: P) -> (Arc<V>, Lookup)
    where
        F: FnOnce() -> V,
        P: FnOnce(&V) -> bool,
    {
        let flight = loop {
            let mut state = lock(&self.state);

            if let Some(value) = state.lookup(&key, self.ttl) {
                state.stats.hits += 1;

                return (value, Lookup::Hit);
            }

            if let Some(flight) = state.flights.get(&key).map(Arc::clone) {
                drop(state);

                if let Some(value) = flight.wait() {
                    lock(&self.state).stats.coalesced += 1;

                    return (value, Lookup::Coalesced);
                }

                // The computing caller panicked; try again.
                continue;
            }

            let flight = Arc::new(Flight::new());

            state.flights.insert(key.clone(), Arc::clone(&flight));
            state.stats.misses += 1;

            break flight;
        };

        let mut guard = FlightGuard {
            cache: self,
            key,
            flight,
            completed: false,
        };

        let value = Arc::new(compute());

        {
            let mut state = lock(&self.state);

            if storable(&value) {
                state.insert(guard.key.clone(), Arc::clone(&value), self.capacity);
            } else {
                state.stats.uncached += 1;
            }

            state.flights.remove(&guard.key);
        }

        guard.flight.finish(FlightState::Done(Arc::clone(&value)));
        guard.completed = true;

        (value, Lookup::Miss)
    }

    /// Number of stored entries, expired ones included until they are next looked up.
    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        lock(&self.state).entries.is_empty()
    }

    /// Remove every stored entry. In-flight computations are unaffected.
    pub fn clear(&self) {
        let mut state = lock(&self.state);

        state.entries.clear();
        state.recency.clear();
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        lock(&self.state).stats
    }
}

/// Releases waiters if the computing caller unwinds before publishing a value.
struct FlightGuard<'c, K: Eq + Hash + Clone, V> {
    cache: &'c ResultCache<K, V>,
    key: K,
    flight: Arc<Flight<V>>,
    completed: bool,
}

impl<K: Eq + Hash + Clone, V> Drop for FlightGuard<'_, K, V> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }

        lock(&self.cache.state).flights.remove(&self.key);
        self.flight.finish(FlightState::Abandoned);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::{
        panic,
        sync::{
            Barrier,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
    };

    use jiff::ToSpan;
    use rusty_money::{Money, iso::USD};
    use testresult::TestResult;

    use super::*;
    use crate::personalization::AffinitySignal;

    #[test]
    fn get_or_compute_memoises() {
        let cache = ResultCache::new(4, None);

        let (first, first_lookup) = cache.get_or_compute(1_u64, || 42);
        let (second, second_lookup) = cache.get_or_compute(1_u64, || 0);

        assert_eq!((*first, first_lookup), (42, Lookup::Miss));
        assert_eq!((*second, second_lookup), (42, Lookup::Hit));
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn least_recently_used_entry_is_evicted() {
        let cache = ResultCache::new(2, None);

        cache.put(1_u64, "one");
        cache.put(2, "two");

        // Touch 1 so 2 becomes the oldest.
        assert!(cache.get(&1).is_some());

        cache.put(3, "three");

        assert!(cache.get(&2).is_none());
        assert!(cache.get(&1).is_some());
        assert!(cache.get(&3).is_some());
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn expired_entries_are_recomputed() {
        let cache = ResultCache::new(4, Some(Duration::ZERO));

        cache.get_or_compute(7_u64, || 1);
        let (value, lookup) = cache.get_or_compute(7_u64, || 2);

        assert_eq!((*value, lookup), (2, Lookup::Miss));
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let cache = ResultCache::new(0, None);

        cache.put(1_u64, 1);

        assert!(cache.is_empty());
    }

    #[test]
    fn clear_removes_entries() {
        let cache = ResultCache::new(4, None);

        cache.put(1_u64, 1);
        cache.put(2, 2);
        cache.clear();

        assert!(cache.is_empty());
        assert!(cache.get(&1).is_none());
    }

    #[test]
    fn rejected_values_are_returned_but_not_stored() {
        let cache = ResultCache::new(4, None);

        let (first, first_lookup) = cache.get_or_compute_if(3_u64, || -1, |value| *value >= 0);
        let (second, second_lookup) = cache.get_or_compute_if(3_u64, || 5, |value| *value >= 0);
        let (third, third_lookup) = cache.get_or_compute(3_u64, || 0);

        assert_eq!((*first, first_lookup), (-1, Lookup::Miss));
        assert_eq!((*second, second_lookup), (5, Lookup::Miss));
        assert_eq!((*third, third_lookup), (5, Lookup::Hit));
        assert_eq!(cache.stats().uncached, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_callers_share_one_computation() {
        let cache = ResultCache::new(4, None);
        let computations = AtomicUsize::new(0);
        let threads = 8;
        let barrier = Barrier::new(threads);

        let results: Vec<(Arc<usize>, Lookup)> = thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();

                        cache.get_or_compute(99_u64, || {
                            computations.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));

                            7
                        })
                    })
                })
                .collect();

            handles.into_iter().filter_map(|handle| handle.join().ok()).collect()
        });

        assert_eq!(computations.load(Ordering::SeqCst), 1);
        assert_eq!(results.len(), threads);
        assert!(results.iter().all(|(value, _)| **value == 7));
        assert_eq!(
            results
                .iter()
                .filter(|(_, lookup)| *lookup == Lookup::Miss)
                .count(),
            1
        );
    }

    #[test]
    fn panicking_computation_releases_waiters() {
        let cache = ResultCache::new(4, None);

        let outcome = thread::scope(|scope| {
            scope
                .spawn(|| {
                    cache.get_or_compute(5_u64, || -> u32 { panic::resume_unwind(Box::new("boom")) })
                })
                .join()
        });

        assert!(outcome.is_err());

        let (value, lookup) = cache.get_or_compute(5_u64, || 3);

        assert_eq!((*value, lookup), (3, Lookup::Miss));
    }

    #[test]
    fn keys_ignore_offer_order_but_not_signal() {
        let product = ProductContext::new("item", Money::from_minor(1000, USD));
        let constraints = Constraints::new();
        let first = RawOffer::code_offer("a", "A");
        let second = RawOffer::code_offer("b", "B");
        let signal = AffinitySignal::new().with_source("store", Decimal::TWO);
        let now = Timestamp::UNIX_EPOCH;

        let forward = CacheKey::new(
            &product,
            &[first.clone(), second.clone()],
            &constraints,
            None,
            now,
        );
        let backward = CacheKey::new(
            &product,
            &[second.clone(), first.clone()],
            &constraints,
            None,
            now,
        );
        let personalised =
            CacheKey::new(&product, &[first, second], &constraints, Some(&signal), now);

        assert_eq!(forward, backward);
        assert_ne!(forward, personalised);
    }

    #[test]
    fn keys_cover_offer_contents_not_just_identifiers() {
        let product = ProductContext::new("item", Money::from_minor(1000, USD));
        let constraints = Constraints::new();
        let now = Timestamp::UNIX_EPOCH;
        let original = RawOffer::code_offer("a", "A")
            .with_type("fixed")
            .with_value(Decimal::from(5));
        let corrected = original.clone().with_value(Decimal::from(3));
        let capped = original.clone().with_max_savings(Decimal::ONE);

        let key = |offer: &RawOffer| CacheKey::new(&product, &[offer.clone()], &constraints, None, now);

        assert_ne!(key(&original), key(&corrected));
        assert_ne!(key(&original), key(&capped));
    }

    #[test]
    fn keys_follow_expiry_phase_not_clock_time() -> TestResult {
        let product = ProductContext::new("item", Money::from_minor(1000, USD));
        let constraints = Constraints::new();
        let start = Timestamp::from_second(1_000_000)?;
        let offer = RawOffer::code_offer("a", "A").with_expiry(start.checked_add(50.seconds())?);

        let key = |now: Timestamp| CacheKey::new(&product, &[offer.clone()], &constraints, None, now);

        assert_eq!(key(start), key(start.checked_add(10.seconds())?));
        assert_ne!(key(start), key(start.checked_add(100.seconds())?));

        Ok(())
    }

    #[test]
    fn expiry_phases_split_at_now_and_the_warning_window() -> TestResult {
        let now = Timestamp::from_second(1_000_000)?;

        assert_eq!(ExpiryPhase::at(None, now), ExpiryPhase::Open);
        assert_eq!(
            ExpiryPhase::at(Some(now.checked_sub(1.second())?), now),
            ExpiryPhase::Expired
        );
        assert_eq!(ExpiryPhase::at(Some(now), now), ExpiryPhase::ExpiringSoon);
        assert_eq!(
            ExpiryPhase::at(Some(now.checked_add(24.hours())?), now),
            ExpiryPhase::ExpiringSoon
        );
        assert_eq!(
            ExpiryPhase::at(Some(now.checked_add(25.hours())?), now),
            ExpiryPhase::Live
        );

        Ok(())
    }
}
