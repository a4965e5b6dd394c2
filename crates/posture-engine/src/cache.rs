//! Per-scope memoization with single-flight computation.
//!
//! Checks in the same scope usually need the same provider listings (every
//! CloudTrail check wants `DescribeTrails`). [`RunCache::get_or_compute`]
//! makes sure each listing is fetched once per scope even when several checks
//! ask for it at the same moment: the first caller computes, the rest wait for
//! its result.
//!
//! Failed computations are never stored. Everyone waiting on a failed
//! computation receives the same error, and the next caller tries again.

use posture_core::CheckError;
use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, trace};

type Shared = Arc<dyn Any + Send + Sync>;
type Outcome = Result<Shared, CheckError>;
type SlotKey = (Cow<'static, str>, TypeId);

/// Typed cache key
///
/// The value type is part of the key, so two keys with the same name but
/// different types never collide.
pub struct CacheKey<T> {
    name: Cow<'static, str>,
    _value: PhantomData<fn() -> T>,
}

impl<T> CacheKey<T> {
    /// Key with a static name
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            _value: PhantomData,
        }
    }

    /// Key with a name built at runtime, e.g. one listing per resource
    #[must_use]
    pub fn dynamic(name: impl Into<String>) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            _value: PhantomData,
        }
    }

    /// Key name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for CacheKey<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            _value: PhantomData,
        }
    }
}

impl<T> fmt::Debug for CacheKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CacheKey").field(&self.name).finish()
    }
}

enum Slot {
    Ready(Shared),
    Pending(watch::Receiver<Option<Outcome>>),
}

enum Claim {
    Hit(Shared),
    Wait(watch::Receiver<Option<Outcome>>),
    Lead(watch::Sender<Option<Outcome>>),
}

/// Counters describing how a cache was used
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from a stored value
    pub hits: usize,
    /// Computations started
    pub computes: usize,
    /// Lookups that waited on another caller's computation
    pub waits: usize,
}

#[derive(Default)]
struct CacheInner {
    slots: Mutex<HashMap<SlotKey, Slot>>,
    hits: AtomicUsize,
    computes: AtomicUsize,
    waits: AtomicUsize,
}

/// Memoization store shared by every check running in one scope
///
/// Cloning yields another handle to the same store.
#[derive(Clone, Default)]
pub struct RunCache {
    inner: Arc<CacheInner>,
}

impl fmt::Debug for RunCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunCache")
            .field("entries", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl RunCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the value stored under `key`, computing it if absent.
    ///
    /// At most one computation per key is in flight at any time. Callers that
    /// arrive while it runs wait for it and receive the same value or the same
    /// error. If the computing caller is dropped before finishing (timeout,
    /// cancellation) one of the waiters takes over.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &CacheKey<T>,
        compute: F,
    ) -> Result<Arc<T>, CheckError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CheckError>>,
    {
        let slot_key: SlotKey = (key.name.clone(), TypeId::of::<T>());

        let tx = loop {
            match self.claim(&slot_key) {
                Claim::Hit(value) => {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(key = key.name(), "cache hit");
                    return downcast(key, value);
                }
                Claim::Wait(mut rx) => {
                    self.inner.waits.fetch_add(1, Ordering::Relaxed);
                    trace!(key = key.name(), "waiting on in-flight computation");
                    let outcome = rx
                        .wait_for(Option::is_some)
                        .await
                        .ok()
                        .and_then(|outcome| outcome.clone());
                    match outcome {
                        Some(Ok(value)) => return downcast(key, value),
                        Some(Err(e)) => return Err(e),
                        // The computing caller went away; claim again.
                        None => debug!(key = key.name(), "cache computation abandoned, retrying"),
                    }
                }
                Claim::Lead(tx) => break tx,
            }
        };

        self.inner.computes.fetch_add(1, Ordering::Relaxed);
        debug!(key = key.name(), "computing cache entry");

        let mut guard = PendingGuard {
            cache: self,
            key: Some(slot_key),
        };
        let result = compute().await.map(Arc::new);

        let outcome: Outcome = match &result {
            Ok(value) => Ok(Arc::clone(value) as Shared),
            Err(e) => Err(e.clone()),
        };
        if let Some(slot_key) = guard.key.take() {
            let mut slots = self.lock();
            match &outcome {
                Ok(value) => {
                    slots.insert(slot_key, Slot::Ready(Arc::clone(value)));
                }
                Err(e) => {
                    debug!(key = key.name(), error = %e, "cache computation failed");
                    slots.remove(&slot_key);
                }
            }
        }
        tx.send_replace(Some(outcome));

        result
    }

    /// Look up a stored value without computing it
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self, key: &CacheKey<T>) -> Option<Arc<T>> {
        let slot_key: SlotKey = (key.name.clone(), TypeId::of::<T>());
        match self.lock().get(&slot_key) {
            Some(Slot::Ready(value)) => Arc::clone(value).downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Number of stored values
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    /// Returns true if nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Usage counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            computes: self.inner.computes.load(Ordering::Relaxed),
            waits: self.inner.waits.load(Ordering::Relaxed),
        }
    }

    fn claim(&self, slot_key: &SlotKey) -> Claim {
        let mut slots = self.lock();
        match slots.get(slot_key) {
            Some(Slot::Ready(value)) => Claim::Hit(Arc::clone(value)),
            Some(Slot::Pending(rx)) if rx.has_changed().is_ok() => Claim::Wait(rx.clone()),
            // Absent, or pending on a sender that no longer exists.
            _ => {
                let (tx, rx) = watch::channel(None);
                slots.insert(slot_key.clone(), Slot::Pending(rx));
                Claim::Lead(tx)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SlotKey, Slot>> {
        self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears a pending slot if the computing future is dropped before finishing
struct PendingGuard<'a> {
    cache: &'a RunCache,
    key: Option<SlotKey>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let mut slots = self.cache.lock();
            if matches!(slots.get(&key), Some(Slot::Pending(_))) {
                slots.remove(&key);
            }
        }
    }
}

fn downcast<T: Send + Sync + 'static>(key: &CacheKey<T>, value: Shared) -> Result<Arc<T>, CheckError> {
    value
        .downcast::<T>()
        .map_err(|_| CheckError::Failed(format!("cache entry `{}` has an unexpected type", key.name())))
}
