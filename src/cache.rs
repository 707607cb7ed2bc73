//! Cache and invalidation layer
//!
//! Memoizes expensive computations (the normalized table and derived
//! aggregates) behind generation tokens. Invalidation is intentionally
//! coarse: any write notification bumps a generation and every entry minted
//! under an older generation stops being served. A TTL guards against missed
//! invalidation signals; it is a safety net, not the correctness mechanism.
//!
//! Concurrency: entries live behind a `parking_lot::RwLock`. Concurrent
//! readers share the read lock; a generation bump takes the write lock only
//! for the swap instant. A reader may observe a value that a concurrent
//! invalidation is about to retire (stale-but-not-torn), which is
//! acceptable; torn reads are not possible.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Default safety-net TTL in seconds
pub const DEFAULT_TTL_SECONDS: i64 = 300;

/// Injected time source. No component reads the wall clock directly; tests
/// drive expiry deterministically through `ManualClock`.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time source
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually-advanced time source for tests
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.write();
        *now += duration;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// Cache key: scope tuple plus parameter tuple, both pre-rendered
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Scope component (e.g. "global", "category:focus")
    pub scope: String,
    /// Parameter component (metric name, window, etc.)
    pub params: String,
}

impl CacheKey {
    pub fn new(scope: impl Into<String>, params: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            params: params.into(),
        }
    }
}

struct Entry<V> {
    value: V,
    global_generation: u64,
    scope_generation: u64,
    inserted_at: DateTime<Utc>,
}

#[derive(Default)]
struct Generations {
    global: u64,
    per_scope: HashMap<String, u64>,
}

impl Generations {
    fn of_scope(&self, scope: &str) -> u64 {
        self.per_scope.get(scope).copied().unwrap_or(0)
    }
}

/// Generation-token cache shared by concurrent requests
pub struct EngineCache<V> {
    entries: RwLock<HashMap<CacheKey, Entry<V>>>,
    generations: RwLock<Generations>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> EngineCache<V> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(clock, Duration::seconds(DEFAULT_TTL_SECONDS))
    }

    pub fn with_ttl(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            generations: RwLock::new(Generations::default()),
            ttl,
            clock,
        }
    }

    /// Return the cached value for `key`, computing and storing it when the
    /// entry is missing, generation-stale, or past its TTL.
    pub fn get_or_compute<F>(&self, key: CacheKey, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        let now = self.clock.now();
        let (global_generation, scope_generation) = {
            let generations = self.generations.read();
            (generations.global, generations.of_scope(&key.scope))
        };

        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(&key) {
                let fresh = entry.global_generation == global_generation
                    && entry.scope_generation == scope_generation
                    && now - entry.inserted_at <= self.ttl;
                if fresh {
                    tracing::debug!(scope = %key.scope, params = %key.params, "Cache hit");
                    return entry.value.clone();
                }
            }
        }

        tracing::debug!(scope = %key.scope, params = %key.params, "Cache miss");
        let value = compute();

        let mut entries = self.entries.write();
        entries.insert(
            key,
            Entry {
                value: value.clone(),
                global_generation,
                scope_generation,
                inserted_at: now,
            },
        );
        value
    }

    /// Return the cached value for `key` when fresh, without computing.
    ///
    /// Used where the computation is fallible and errors must not be cached.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let now = self.clock.now();
        let generations = self.generations.read();
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        let fresh = entry.global_generation == generations.global
            && entry.scope_generation == generations.of_scope(&key.scope)
            && now - entry.inserted_at <= self.ttl;
        if fresh {
            tracing::debug!(scope = %key.scope, params = %key.params, "Cache hit");
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Store a value under the current generations
    pub fn insert(&self, key: CacheKey, value: V) {
        let now = self.clock.now();
        let (global_generation, scope_generation) = {
            let generations = self.generations.read();
            (generations.global, generations.of_scope(&key.scope))
        };
        let mut entries = self.entries.write();
        entries.insert(
            key,
            Entry {
                value,
                global_generation,
                scope_generation,
                inserted_at: now,
            },
        );
    }

    /// Invalidate cached results.
    ///
    /// With no scope, bumps the global generation: the cheapest
    /// always-correct response to any write notification, and the default.
    /// With a scope, bumps only that scope's generation.
    pub fn invalidate(&self, scope: Option<&str>) {
        let mut generations = self.generations.write();
        match scope {
            None => {
                generations.global += 1;
                tracing::debug!(generation = generations.global, "Global cache invalidation");
            }
            Some(scope) => {
                let generation = generations.per_scope.entry(scope.to_string()).or_insert(0);
                *generation += 1;
                tracing::debug!(scope = scope, generation = *generation, "Scoped cache invalidation");
            }
        }
    }

    /// Current global generation (observable for diagnostics)
    pub fn generation(&self) -> u64 {
        self.generations.read().global
    }
}
