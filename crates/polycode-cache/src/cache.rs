//! LRU memoization cache with a background janitor.
//!
//! All state sits behind a single coarse lock. The recency order is kept as a
//! `BTreeMap` from a monotonically increasing access tick to the key, so the
//! least-recently-used entry is always the first element.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{CacheConfig, Capacity};

struct Entry<V> {
  value: V,
  last_access: Instant,
  /// Sliding expiry is suspended until this instant.
  fixed_expiry: Option<Instant>,
  /// Key into the recency index. Larger is more recent.
  tick: u64,
}

impl<V> Entry<V> {
  fn is_protected(&self, now: Instant) -> bool {
    self.fixed_expiry.is_some_and(|until| now < until)
  }

  fn is_stale(&self, now: Instant, ttl: Duration) -> bool {
    now.saturating_duration_since(self.last_access) > ttl
  }
}

struct State<V> {
  entries: HashMap<String, Entry<V>>,
  recency: BTreeMap<u64, String>,
  next_tick: u64,
}

impl<V> State<V> {
  fn new() -> Self {
    Self {
      entries: HashMap::new(),
      recency: BTreeMap::new(),
      next_tick: 0,
    }
  }

  fn tick(&mut self) -> u64 {
    let tick = self.next_tick;
    self.next_tick += 1;
    tick
  }

  /// Mark `key` as most recently used.
  fn touch(&mut self, key: &str, now: Instant) {
    let tick = self.tick();
    if let Some(entry) = self.entries.get_mut(key) {
      self.recency.remove(&entry.tick);
      entry.tick = tick;
      entry.last_access = now;
      self.recency.insert(tick, key.to_string());
    }
  }

  fn remove(&mut self, key: &str) -> Option<Entry<V>> {
    let entry = self.entries.remove(key)?;
    self.recency.remove(&entry.tick);
    Some(entry)
  }

  fn upsert(
    &mut self,
    key: &str,
    value: V,
    fixed_expiry: Option<Instant>,
    now: Instant,
    capacity: Capacity,
  ) {
    if let Some(entry) = self.entries.get_mut(key) {
      entry.value = value;
      entry.fixed_expiry = fixed_expiry;
      self.touch(key, now);
      return;
    }

    let tick = self.tick();
    self.recency.insert(tick, key.to_string());
    self.entries.insert(
      key.to_string(),
      Entry {
        value,
        last_access: now,
        fixed_expiry,
        tick,
      },
    );

    while capacity.exceeded_by(self.entries.len()) {
      let Some((_, oldest)) = self.recency.pop_first() else {
        break;
      };
      self.entries.remove(&oldest);
      debug!(key = %oldest, "evicted least recently used entry");
    }
  }
}

struct Inner<V> {
  config: CacheConfig,
  state: Mutex<State<V>>,
  shutdown: CancellationToken,
  janitor: Mutex<Option<JoinHandle<()>>>,
}

impl<V> Inner<V> {
  fn lock(&self) -> MutexGuard<'_, State<V>> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn sweep(&self) -> usize {
    let now = Instant::now();
    let ttl = self.config.ttl;
    let mut state = self.lock();

    let expired: Vec<String> = state
      .entries
      .iter()
      .filter(|(_, entry)| !entry.is_protected(now) && entry.is_stale(now, ttl))
      .map(|(key, _)| key.clone())
      .collect();

    for key in &expired {
      state.remove(key);
    }
    expired.len()
  }
}

impl<V> Drop for Inner<V> {
  fn drop(&mut self) {
    self.shutdown.cancel();
  }
}

/// Thread-safe LRU cache with sliding and fixed expiry.
///
/// Cloning yields another handle to the same cache. The janitor started by
/// [`MemoCache::start`] exits on [`MemoCache::stop`] or when the last handle
/// is dropped. Using the cache after `stop` is allowed, but expired entries
/// are then only removed lazily by `get`.
pub struct MemoCache<V> {
  inner: Arc<Inner<V>>,
}

impl<V> Clone for MemoCache<V> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<V: Clone> MemoCache<V> {
  /// Create a cache without a background janitor.
  pub fn new(config: CacheConfig) -> Self {
    Self {
      inner: Arc::new(Inner {
        config,
        state: Mutex::new(State::new()),
        shutdown: CancellationToken::new(),
        janitor: Mutex::new(None),
      }),
    }
  }

  /// Create a cache and spawn its janitor on the current tokio runtime.
  pub fn start(config: CacheConfig) -> Self
  where
    V: Send + 'static,
  {
    let cache = Self::new(config);
    let handle = tokio::spawn(run_janitor(
      Arc::downgrade(&cache.inner),
      cache.inner.config.sweep_interval,
      cache.inner.shutdown.clone(),
    ));
    *cache
      .inner
      .janitor
      .lock()
      .unwrap_or_else(|e| e.into_inner()) = Some(handle);
    cache
  }

  pub fn config(&self) -> &CacheConfig {
    &self.inner.config
  }

  /// Look up `key`, refreshing its recency on a hit.
  pub fn get(&self, key: &str) -> Option<V> {
    let now = Instant::now();
    let ttl = self.inner.config.ttl;
    let mut state = self.inner.lock();

    let (protected, stale) = {
      let entry = state.entries.get(key)?;
      (entry.is_protected(now), entry.is_stale(now, ttl))
    };

    if !protected && stale {
      state.remove(key);
      return None;
    }

    state.touch(key, now);
    state.entries.get(key).map(|entry| entry.value.clone())
  }

  /// Insert or replace `key` with sliding expiry only.
  ///
  /// Replacing an entry clears any fixed expiry set earlier.
  pub fn put(&self, key: impl Into<String>, value: V) {
    let key = key.into();
    let now = Instant::now();
    let capacity = self.inner.config.capacity;
    self.inner.lock().upsert(&key, value, None, now, capacity);
  }

  /// Insert or replace `key`, protecting it from sliding expiry until
  /// `not_before`.
  pub fn put_with_fixed_expiry(&self, key: impl Into<String>, value: V, not_before: Instant) {
    let key = key.into();
    let now = Instant::now();
    let capacity = self.inner.config.capacity;
    self
      .inner
      .lock()
      .upsert(&key, value, Some(not_before), now, capacity);
  }

  /// Return the cached value for `key`, or run `supplier` and cache its
  /// result.
  ///
  /// The supplier runs at most once per call and under the cache lock, so it
  /// must not call back into this cache. Errors are returned as-is and
  /// nothing is cached for them. A hit behaves like `put` on an existing key:
  /// recency is refreshed and any fixed expiry is cleared.
  pub fn compute_if_absent<E>(
    &self,
    key: &str,
    supplier: impl FnOnce() -> Result<V, E>,
  ) -> Result<V, E> {
    let now = Instant::now();
    let capacity = self.inner.config.capacity;
    let mut state = self.inner.lock();

    if let Some(entry) = state.entries.get_mut(key) {
      entry.fixed_expiry = None;
      let value = entry.value.clone();
      state.touch(key, now);
      return Ok(value);
    }

    let value = supplier()?;
    state.upsert(key, value.clone(), None, now, capacity);
    Ok(value)
  }

  /// Remove every entry whose sliding TTL elapsed and that is not protected
  /// by a fixed expiry. Returns how many entries were removed.
  pub fn sweep(&self) -> usize {
    self.inner.sweep()
  }

  /// Whether `key` is stored, without refreshing it or checking expiry.
  pub fn contains_key(&self, key: &str) -> bool {
    self.inner.lock().entries.contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.inner.lock().entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Stop the janitor and wait for it to exit.
  pub async fn stop(&self) {
    self.inner.shutdown.cancel();
    let handle = self
      .inner
      .janitor
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .take();
    if let Some(handle) = handle {
      let _ = handle.await;
    }
  }
}

async fn run_janitor<V>(cache: Weak<Inner<V>>, interval: Duration, shutdown: CancellationToken) {
  let interval = interval.max(Duration::from_millis(1));
  let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      _ = shutdown.cancelled() => break,
      _ = ticker.tick() => {
        let Some(inner) = cache.upgrade() else {
          break;
        };
        let evicted = inner.sweep();
        if evicted > 0 {
          debug!(evicted, "janitor removed expired entries");
        }
      }
    }
  }

  debug!("cache janitor stopped");
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config(capacity: Capacity, ttl_secs: u64) -> CacheConfig {
    CacheConfig {
      capacity,
      ttl: Duration::from_secs(ttl_secs),
      sweep_interval: Duration::from_secs(1),
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_capacity_evicts_least_recently_accessed() {
    let cache = MemoCache::new(config(Capacity::Bounded(2), 5));

    cache.put("a", 1);
    cache.put("b", 2);
    assert_eq!(cache.get("a"), Some(1));
    cache.put("c", 3);

    assert!(cache.contains_key("a"));
    assert!(!cache.contains_key("b"));
    assert!(cache.contains_key("c"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_recency_not_insertion_order() {
    let cache = MemoCache::new(config(Capacity::Bounded(3), 60));

    cache.put("a", 1);
    cache.put("b", 2);
    cache.put("c", 3);
    cache.get("a");
    cache.get("b");
    cache.put("d", 4);

    assert!(!cache.contains_key("c"));
    assert_eq!(cache.len(), 3);

    // Updating an existing key also counts as a use.
    cache.put("a", 10);
    cache.put("e", 5);
    assert!(!cache.contains_key("b"));
    assert_eq!(cache.get("a"), Some(10));
  }

  #[tokio::test(start_paused = true)]
  async fn test_sliding_ttl() {
    let cache = MemoCache::new(config(Capacity::Unbounded, 5));
    cache.put("k", "v");

    tokio::time::advance(Duration::from_secs(4)).await;
    assert_eq!(cache.get("k"), Some("v"));

    tokio::time::advance(Duration::from_secs(4)).await;
    assert_eq!(cache.get("k"), Some("v"));

    tokio::time::advance(Duration::from_secs(6)).await;
    assert_eq!(cache.get("k"), None);
    assert!(!cache.contains_key("k"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_fixed_expiry_protects_until_deadline() {
    let cache = MemoCache::new(config(Capacity::Unbounded, 5));
    let until = Instant::now() + Duration::from_secs(10);
    cache.put_with_fixed_expiry("k", 7, until);

    tokio::time::advance(Duration::from_secs(7)).await;
    assert_eq!(cache.get("k"), Some(7));

    // Past the deadline sliding rules apply from the last access at 7s.
    tokio::time::advance(Duration::from_secs(4)).await;
    assert_eq!(cache.get("k"), Some(7));

    tokio::time::advance(Duration::from_secs(6)).await;
    assert_eq!(cache.get("k"), None);
  }

  #[tokio::test(start_paused = true)]
  async fn test_put_clears_fixed_expiry() {
    let cache = MemoCache::new(config(Capacity::Unbounded, 5));
    cache.put_with_fixed_expiry("k", 1, Instant::now() + Duration::from_secs(60));
    cache.put("k", 2);

    tokio::time::advance(Duration::from_secs(6)).await;
    assert_eq!(cache.get("k"), None);
  }

  #[tokio::test(start_paused = true)]
  async fn test_capacity_overrides_fixed_expiry() {
    let cache = MemoCache::new(config(Capacity::Bounded(1), 5));
    cache.put_with_fixed_expiry("pinned", 1, Instant::now() + Duration::from_secs(600));
    cache.put("fresh", 2);

    assert!(!cache.contains_key("pinned"));
    assert_eq!(cache.get("fresh"), Some(2));
  }

  #[tokio::test(start_paused = true)]
  async fn test_sweep_skips_protected_entries() {
    let cache = MemoCache::new(config(Capacity::Unbounded, 5));
    cache.put("plain", 1);
    cache.put_with_fixed_expiry("pinned", 2, Instant::now() + Duration::from_secs(20));

    tokio::time::advance(Duration::from_secs(6)).await;
    assert_eq!(cache.sweep(), 1);
    assert!(!cache.contains_key("plain"));
    assert!(cache.contains_key("pinned"));

    tokio::time::advance(Duration::from_secs(20)).await;
    assert_eq!(cache.sweep(), 1);
    assert!(cache.is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_compute_if_absent_runs_supplier_once() {
    let cache = MemoCache::new(config(Capacity::Unbounded, 60));
    let mut calls = 0;

    let first: Result<u32, String> = cache.compute_if_absent("k", || {
      calls += 1;
      Ok(42)
    });
    assert_eq!(first, Ok(42));

    let second: Result<u32, String> = cache.compute_if_absent("k", || {
      calls += 1;
      Ok(0)
    });
    assert_eq!(second, Ok(42));
    assert_eq!(calls, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_compute_if_absent_does_not_cache_errors() {
    let cache: MemoCache<u32> = MemoCache::new(config(Capacity::Unbounded, 60));

    let failed = cache.compute_if_absent("k", || Err("boom".to_string()));
    assert_eq!(failed, Err("boom".to_string()));
    assert!(!cache.contains_key("k"));

    let ok: Result<u32, String> = cache.compute_if_absent("k", || Ok(1));
    assert_eq!(ok, Ok(1));
  }

  #[tokio::test(start_paused = true)]
  async fn test_janitor_evicts_and_stops() {
    let cache = MemoCache::start(config(Capacity::Unbounded, 5));
    cache.put("k", 1);

    tokio::time::sleep(Duration::from_secs(8)).await;
    assert!(!cache.contains_key("k"));

    cache.stop().await;

    // With the janitor gone nothing is removed in the background.
    cache.put("later", 2);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(cache.contains_key("later"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_janitor_exits_when_cache_dropped() {
    let cache: MemoCache<u8> = MemoCache::start(config(Capacity::Unbounded, 5));
    let shutdown = cache.inner.shutdown.clone();
    drop(cache);

    assert!(shutdown.is_cancelled());
  }
}
