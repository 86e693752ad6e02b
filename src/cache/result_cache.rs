//! TTL result cache with single-flight computes.
//!
//! The map is guarded by one `parking_lot` mutex that is never held while a
//! compute runs. A miss installs a pending flight; later callers for the same
//! key block on that flight's condvar instead of starting their own compute.
//! `clear()` bumps a generation and drops every slot, so a compute that began
//! before the clear still answers its leader but never installs, and callers
//! that joined it recompute.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::core::config::CacheConfig;
use crate::core::errors::{LtcError, Result};
use crate::core::request::RequestContext;
use crate::metrics::filter::FilterSpec;

/// Upper bound on one condvar wait, so blocked callers notice their own
/// cancellation promptly.
const WAIT_SLICE: Duration = Duration::from_millis(25);

/// Which engine operation produced a cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    ClaimsSummary,
    ClaimsRows,
    PolicySummary,
    PolicyRows,
    StateDistribution,
}

impl QueryKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClaimsSummary => "claims_summary",
            Self::ClaimsRows => "claims_rows",
            Self::PolicySummary => "policy_summary",
            Self::PolicyRows => "policy_rows",
            Self::StateDistribution => "state_distribution",
        }
    }
}

/// Cache slot identity. The fact source itself is not part of the key, only
/// its logical identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    source: String,
    query: QueryKind,
    filter: FilterSpec,
    limit: Option<usize>,
}

impl CacheKey {
    pub fn new(source: &str, query: QueryKind, filter: &FilterSpec, limit: Option<usize>) -> Self {
        Self {
            source: source.to_string(),
            query,
            filter: filter.clone(),
            limit,
        }
    }

    pub const fn query(&self) -> QueryKind {
        self.query
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/",
            self.source,
            self.query.as_str(),
            self.filter.carrier().unwrap_or("*")
        )?;
        match self.filter.as_of() {
            Some(d) => write!(f, "{d}")?,
            None => f.write_str("*")?,
        }
        if let Some(limit) = self.limit {
            write!(f, "/{limit}")?;
        }
        Ok(())
    }
}

/// Point-in-time counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub joins: u64,
    pub expired: u64,
    pub clears: u64,
    pub entries: usize,
    pub in_flight: usize,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    joins: AtomicU64,
    expired: AtomicU64,
    clears: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Clone)]
enum Outcome<V> {
    Value(V),
    Failed(String),
    /// Leader cancelled, expired, or unwound; waiters should retry.
    Abandoned,
}

struct Flight<V> {
    outcome: Mutex<Option<Outcome<V>>>,
    done: Condvar,
}

impl<V: Clone> Flight<V> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn publish(&self, outcome: Outcome<V>) {
        *self.outcome.lock() = Some(outcome);
        self.done.notify_all();
    }

    /// Block until the leader publishes, bounded by the waiter's own context.
    fn wait(&self, ctx: &RequestContext) -> Result<Outcome<V>> {
        let mut guard = self.outcome.lock();
        loop {
            if let Some(outcome) = guard.as_ref() {
                return Ok(outcome.clone());
            }
            ctx.check("wait for in-flight compute")?;
            let slice = ctx.remaining().map_or(WAIT_SLICE, |r| r.min(WAIT_SLICE));
            self.done.wait_for(&mut guard, slice);
        }
    }
}

enum Slot<V> {
    Ready { value: V, created_at: Instant },
    Pending(Arc<Flight<V>>),
}

struct CacheState<V> {
    generation: u64,
    slots: HashMap<CacheKey, Slot<V>>,
}

enum Lookup<V> {
    Fresh(V),
    Join(Arc<Flight<V>>),
    Lead(Arc<Flight<V>>, u64),
}

/// Memoizes `CacheKey -> V` for a fixed TTL with at most one compute per key.
pub struct ResultCache<V> {
    ttl: Duration,
    enabled: bool,
    state: Mutex<CacheState<V>>,
    counters: Counters,
}

impl<V: Clone> ResultCache<V> {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            enabled: true,
            state: Mutex::new(CacheState {
                generation: 0,
                slots: HashMap::new(),
            }),
            counters: Counters::default(),
        }
    }

    /// A cache that never stores anything; every call computes.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(Duration::ZERO)
        }
    }

    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        if config.enabled {
            Self::new(config.ttl())
        } else {
            Self::disabled()
        }
    }

    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Return the cached value for `key`, or run `compute` and cache it.
    ///
    /// Entries are fresh while strictly younger than the TTL. Concurrent
    /// callers for a key that is already being computed wait for that compute
    /// (bounded by their own `ctx`) and share its value.
    pub fn get_or_compute<F>(&self, key: CacheKey, ctx: &RequestContext, compute: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        if !self.enabled {
            ctx.check("cache passthrough")?;
            bump(&self.counters.misses);
            return compute();
        }

        let mut compute = Some(compute);
        loop {
            ctx.check("cache lookup")?;
            match self.lookup(&key) {
                Lookup::Fresh(value) => {
                    bump(&self.counters.hits);
                    log::debug!("cache hit {key}");
                    return Ok(value);
                }
                Lookup::Join(flight) => {
                    bump(&self.counters.joins);
                    log::debug!("cache join {key}");
                    match flight.wait(ctx)? {
                        Outcome::Value(value) => return Ok(value),
                        Outcome::Failed(details) => {
                            return Err(LtcError::SourceUnavailable {
                                details: format!("shared compute for {key} failed: {details}"),
                            });
                        }
                        Outcome::Abandoned => {
                            log::debug!("in-flight compute for {key} abandoned; retrying");
                        }
                    }
                }
                Lookup::Lead(flight, generation) => {
                    bump(&self.counters.misses);
                    log::debug!("cache miss {key}");
                    let f = compute.take().ok_or_else(|| LtcError::Runtime {
                        details: format!("compute for {key} already consumed"),
                    })?;
                    let guard = FlightGuard {
                        cache: self,
                        key: &key,
                        flight,
                        generation,
                        settled: false,
                    };
                    return match f() {
                        Ok(value) => {
                            guard.settle(Outcome::Value(value.clone()));
                            Ok(value)
                        }
                        Err(err) => {
                            // Leader-local failures let waiters retry under
                            // their own deadlines.
                            let local = matches!(err, LtcError::ComputeCancelled { .. })
                                || ctx.is_expired();
                            guard.settle(if local {
                                Outcome::Abandoned
                            } else {
                                Outcome::Failed(err.to_string())
                            });
                            Err(err)
                        }
                    };
                }
            }
        }
    }

    fn lookup(&self, key: &CacheKey) -> Lookup<V> {
        let mut state = self.state.lock();
        let stale = match state.slots.get(key) {
            Some(Slot::Ready { value, created_at }) => {
                if created_at.elapsed() < self.ttl {
                    return Lookup::Fresh(value.clone());
                }
                true
            }
            Some(Slot::Pending(flight)) => return Lookup::Join(Arc::clone(flight)),
            None => false,
        };
        if stale {
            bump(&self.counters.expired);
            log::debug!("cache entry {key} expired");
        }
        let flight = Arc::new(Flight::new());
        state
            .slots
            .insert(key.clone(), Slot::Pending(Arc::clone(&flight)));
        Lookup::Lead(flight, state.generation)
    }

    /// Resolve a flight: install or remove its slot, then wake waiters.
    ///
    /// Waiters are woken under the state lock. A flight that straddled a
    /// `clear()` publishes `Abandoned`, so joined callers recompute against
    /// the post-clear state instead of seeing the pre-clear result.
    fn settle(&self, key: &CacheKey, flight: &Arc<Flight<V>>, generation: u64, outcome: Outcome<V>) {
        let mut state = self.state.lock();
        let cleared = state.generation != generation;
        let ours = matches!(
            state.slots.get(key),
            Some(Slot::Pending(f)) if Arc::ptr_eq(f, flight)
        );
        if ours {
            match &outcome {
                Outcome::Value(value) if !cleared => {
                    state.slots.insert(
                        key.clone(),
                        Slot::Ready {
                            value: value.clone(),
                            created_at: Instant::now(),
                        },
                    );
                }
                _ => {
                    state.slots.remove(key);
                }
            }
        }
        if cleared {
            log::debug!("discarding result for {key}: cache cleared during compute");
            flight.publish(Outcome::Abandoned);
        } else {
            flight.publish(outcome);
        }
    }

    /// Drop every entry and every pending slot. Atomic with respect to
    /// lookups: nothing computed before this call is served after it.
    pub fn clear(&self) {
        let (dropped, generation) = {
            let mut state = self.state.lock();
            state.generation += 1;
            let dropped = state.slots.len();
            state.slots.clear();
            (dropped, state.generation)
        };
        bump(&self.counters.clears);
        log::info!("result cache cleared ({dropped} slots, generation {generation})");
    }

    /// Remove expired entries. Pending computes are left alone.
    pub fn prune_expired(&self) -> usize {
        let ttl = self.ttl;
        let mut state = self.state.lock();
        let before = state.slots.len();
        state.slots.retain(|_, slot| match slot {
            Slot::Ready { created_at, .. } => created_at.elapsed() < ttl,
            Slot::Pending(_) => true,
        });
        before - state.slots.len()
    }

    /// Number of settled entries, fresh or stale.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .slots
            .values()
            .filter(|s| matches!(s, Slot::Ready { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, in_flight) = {
            let state = self.state.lock();
            let pending = state
                .slots
                .values()
                .filter(|s| matches!(s, Slot::Pending(_)))
                .count();
            (state.slots.len() - pending, pending)
        };
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            joins: self.counters.joins.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            clears: self.counters.clears.load(Ordering::Relaxed),
            entries,
            in_flight,
        }
    }
}

/// Settles the leader's flight exactly once; abandons it on early exit or
/// unwind.
struct FlightGuard<'a, V: Clone> {
    cache: &'a ResultCache<V>,
    key: &'a CacheKey,
    flight: Arc<Flight<V>>,
    generation: u64,
    settled: bool,
}

impl<V: Clone> FlightGuard<'_, V> {
    fn settle(mut self, outcome: Outcome<V>) {
        self.settled = true;
        self.cache
            .settle(self.key, &self.flight, self.generation, outcome);
    }
}

impl<V: Clone> Drop for FlightGuard<'_, V> {
    fn drop(&mut self) {
        if !self.settled {
            self.cache
                .settle(self.key, &self.flight, self.generation, Outcome::Abandoned);
        }
    }
}
