//! Single-flight TTL cache shared by the key-set and token-response caches
//!
//! Each key maps to one slot that is either a settled value with an absolute
//! expiry, or a pending load. A lookup that misses spawns the load as its own
//! task and parks a [`Shared`] handle to it in the slot; every concurrent
//! lookup for the same key awaits that handle instead of loading again.
//!
//! The load runs detached from the caller, so dropping a waiting future (the
//! host cancelled its request) never cancels the load for other waiters. The
//! spawned task settles the slot itself: success with a non-zero TTL becomes a
//! ready value, anything else clears the slot so the next lookup loads again.
//!
//! Timing uses [`tokio::time::Instant`], so tests can drive expiry with a
//! paused clock.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::auth_metrics;
use crate::error::{Error, Result};

type Outcome<V> = Shared<BoxFuture<'static, Result<V>>>;

enum Slot<V> {
    Ready { value: V, expires_at: Instant },
    Pending { id: u64, outcome: Outcome<V> },
}

impl<V> Slot<V> {
    fn is_expired(&self, now: Instant) -> bool {
        match self {
            Self::Ready { expires_at, .. } => now >= *expires_at,
            Self::Pending { .. } => false,
        }
    }
}

enum Lookup<V> {
    Hit(V),
    Wait(Outcome<V>),
    Stale,
}

/// Per-key single-flight cache
pub(crate) struct SingleFlight<K, V> {
    name: &'static str,
    slots: Arc<DashMap<K, Slot<V>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// `name` labels log lines and metrics; `capacity` bounds settled entries
    pub(crate) fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            slots: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
            capacity,
        }
    }

    /// Return the cached value for `key`, or load it once for all callers
    ///
    /// `ttl_of` decides how long a loaded value stays; a zero TTL hands the
    /// value to the current waiters without storing it. `on_abort` builds the
    /// error delivered when the load task dies without producing a result.
    pub(crate) async fn get_or_load<F, Fut, T, A>(
        &self,
        key: K,
        load: F,
        ttl_of: T,
        on_abort: A,
    ) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
        T: FnOnce(&V) -> Duration + Send + 'static,
        A: FnOnce(String) -> Error + Send + 'static,
    {
        let outcome = match self.slots.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let lookup = match occupied.get() {
                    Slot::Ready { value, expires_at } if Instant::now() < *expires_at => {
                        Lookup::Hit(value.clone())
                    }
                    Slot::Pending { outcome, .. } => Lookup::Wait(outcome.clone()),
                    Slot::Ready { .. } => Lookup::Stale,
                };
                match lookup {
                    Lookup::Hit(value) => {
                        auth_metrics::record_cache_lookup(self.name, "hit");
                        return Ok(value);
                    }
                    Lookup::Wait(outcome) => {
                        auth_metrics::record_cache_lookup(self.name, "coalesced");
                        outcome
                    }
                    Lookup::Stale => {
                        auth_metrics::record_cache_lookup(self.name, "miss");
                        let (id, outcome) = self.launch(key, load(), ttl_of, on_abort);
                        occupied.insert(Slot::Pending {
                            id,
                            outcome: outcome.clone(),
                        });
                        outcome
                    }
                }
            }
            Entry::Vacant(vacant) => {
                auth_metrics::record_cache_lookup(self.name, "miss");
                let (id, outcome) = self.launch(key, load(), ttl_of, on_abort);
                vacant.insert(Slot::Pending {
                    id,
                    outcome: outcome.clone(),
                });
                outcome
            }
        };

        outcome.await
    }

    fn launch<Fut, T, A>(&self, key: K, load: Fut, ttl_of: T, on_abort: A) -> (u64, Outcome<V>)
    where
        Fut: Future<Output = Result<V>> + Send + 'static,
        T: FnOnce(&V) -> Duration + Send + 'static,
        A: FnOnce(String) -> Error + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(cache = self.name, key = ?key, "Loading cache entry");

        let slots = Arc::clone(&self.slots);
        let settle_key = key.clone();
        let capacity = self.capacity;
        let name = self.name;
        let task = tokio::spawn(async move {
            let result = load.await;
            let ready = match &result {
                Ok(value) => {
                    let ttl = ttl_of(value);
                    (!ttl.is_zero()).then(|| Slot::Ready {
                        value: value.clone(),
                        expires_at: Instant::now() + ttl,
                    })
                }
                Err(_) => None,
            };
            settle(&slots, settle_key, id, ready, capacity, name);
            result
        });

        let slots = Arc::clone(&self.slots);
        let outcome = async move {
            match task.await {
                Ok(result) => result,
                Err(join_error) => {
                    warn!(cache = name, error = %join_error, "Cache load task aborted");
                    settle(&slots, key, id, None, capacity, name);
                    Err(on_abort(join_error.to_string()))
                }
            }
        }
        .boxed()
        .shared();

        (id, outcome)
    }

    /// Drop a settled entry so the next lookup loads again
    ///
    /// A pending load is left alone; its waiters get its outcome.
    pub(crate) fn invalidate(&self, key: &K) {
        self.slots
            .remove_if(key, |_, slot| matches!(slot, Slot::Ready { .. }));
    }

    /// Number of slots, settled or pending
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Drop every settled entry
    pub(crate) fn clear(&self) {
        self.slots.retain(|_, slot| matches!(slot, Slot::Pending { .. }));
    }
}

/// Replace the pending slot `id` with `ready`, or clear it
///
/// A slot that no longer holds load `id` was replaced in the meantime and is
/// left untouched. Storing into a full cache first sweeps expired entries,
/// then evicts the settled entries closest to expiry.
fn settle<K, V>(
    slots: &DashMap<K, Slot<V>>,
    key: K,
    id: u64,
    ready: Option<Slot<V>>,
    capacity: usize,
    name: &'static str,
) where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    let ready = ready.filter(|_| capacity > 0).inspect(|_| {
        let now = Instant::now();
        slots.retain(|_, existing| !existing.is_expired(now));
        make_room(slots, &key, capacity, name);
    });

    if let Entry::Occupied(mut occupied) = slots.entry(key) {
        let current = matches!(occupied.get(), Slot::Pending { id: pending, .. } if *pending == id);
        if current {
            match ready {
                Some(slot) => {
                    occupied.insert(slot);
                }
                None => {
                    occupied.remove();
                }
            }
        }
    }
}

/// Evict settled entries other than `key` until one more fits
///
/// Pending loads do not count against `capacity`.
fn make_room<K, V>(slots: &DashMap<K, Slot<V>>, key: &K, capacity: usize, name: &'static str)
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    loop {
        let mut settled = 0;
        let mut closest: Option<(K, Instant)> = None;
        for entry in slots.iter() {
            if let Slot::Ready { expires_at, .. } = entry.value()
                && entry.key() != key
            {
                settled += 1;
                if closest.as_ref().is_none_or(|(_, at)| expires_at < at) {
                    closest = Some((entry.key().clone(), *expires_at));
                }
            }
        }

        if settled < capacity {
            return;
        }
        let Some((victim, at)) = closest else {
            return;
        };
        debug!(cache = name, capacity, key = ?victim, "Cache full, evicting entry");
        slots.remove_if(&victim, |_, slot| {
            matches!(slot, Slot::Ready { expires_at, .. } if *expires_at == at)
        });
    }
}
