use std::time::Duration;

/// Maximum number of entries a cache may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
  /// Evict the least-recently-used entry once this many are stored.
  Bounded(usize),
  /// Never evict for capacity.
  Unbounded,
}

impl Capacity {
  /// Interpret a raw capacity where any negative value means unbounded.
  pub fn from_raw(raw: i64) -> Self {
    if raw < 0 {
      Self::Unbounded
    } else {
      Self::Bounded(raw as usize)
    }
  }

  pub(crate) fn exceeded_by(&self, len: usize) -> bool {
    match self {
      Self::Bounded(max) => len > *max,
      Self::Unbounded => false,
    }
  }
}

/// Configuration for a [`MemoCache`](crate::MemoCache).
#[derive(Debug, Clone)]
pub struct CacheConfig {
  pub capacity: Capacity,
  /// Sliding time-to-live measured from the last access.
  pub ttl: Duration,
  /// How often the janitor scans for expired entries.
  pub sweep_interval: Duration,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      capacity: Capacity::Bounded(1024),
      ttl: Duration::from_secs(300),
      sweep_interval: Duration::from_secs(60),
    }
  }
}
