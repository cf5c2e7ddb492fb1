//! Process configuration.
//!
//! [`ClientConfig`] is read from `polycode_*` environment variables; any
//! variable that is unset keeps its default.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `polycode_SIDECAR_URL` | `http://127.0.0.1:9999` |
//! | `polycode_APP_NAME` | empty |
//! | `polycode_APP_PORT` | `9998` |
//! | `polycode_ENV_ID` | empty |
//! | `polycode_CACHE_CAPACITY` | `1024` (`-1` for unbounded) |
//! | `polycode_CACHE_TTL_SECS` | `300` |
//! | `polycode_CACHE_SWEEP_SECS` | `60` |
//! | `polycode_MEMO_PIN_SECS` | `3600` |
//! | `polycode_REQUEST_TIMEOUT_SECS` | `30` |

use std::sync::Arc;
use std::time::Duration;

use polycode_cache::{CacheConfig, Capacity};
use polycode_client::{ERR_BAD_REQUEST, Error, TransportError};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub const ENV_SIDECAR_URL: &str = "polycode_SIDECAR_URL";
pub const ENV_APP_NAME: &str = "polycode_APP_NAME";
pub const ENV_APP_PORT: &str = "polycode_APP_PORT";
pub const ENV_ENV_ID: &str = "polycode_ENV_ID";
pub const ENV_CACHE_CAPACITY: &str = "polycode_CACHE_CAPACITY";
pub const ENV_CACHE_TTL_SECS: &str = "polycode_CACHE_TTL_SECS";
pub const ENV_CACHE_SWEEP_SECS: &str = "polycode_CACHE_SWEEP_SECS";
pub const ENV_MEMO_PIN_SECS: &str = "polycode_MEMO_PIN_SECS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "polycode_REQUEST_TIMEOUT_SECS";

/// Errors building the runtime configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  /// An environment variable is set but does not parse.
  #[error("invalid value for {name}: expected {expected}, got {value:?}")]
  InvalidVar {
    name: &'static str,
    expected: &'static str,
    value: String,
  },

  /// The application config is not a JSON object.
  #[error("app config must be a JSON object")]
  AppConfigNotObject,

  /// The platform transport could not be built.
  #[error("failed to build transport: {0}")]
  Transport(#[from] TransportError),
}

/// Settings for talking to the sidecar and sizing the memo cache.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
  pub sidecar_url: String,
  pub app_name: String,
  pub app_port: u16,
  pub env_id: String,
  /// Maximum memo entries; `-1` for unbounded.
  pub cache_capacity: i64,
  pub cache_ttl_secs: u64,
  pub cache_sweep_secs: u64,
  /// How long a memoized local computation stays pinned in the cache.
  pub memo_pin_secs: u64,
  pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      sidecar_url: "http://127.0.0.1:9999".to_string(),
      app_name: String::new(),
      app_port: 9998,
      env_id: String::new(),
      cache_capacity: 1024,
      cache_ttl_secs: 300,
      cache_sweep_secs: 60,
      memo_pin_secs: 3600,
      request_timeout_secs: 30,
    }
  }
}

impl ClientConfig {
  /// Defaults overridden by the process environment.
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::from_lookup(|name| std::env::var(name).ok())
  }

  /// Defaults overridden by whatever `lookup` returns for each variable.
  pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
    let mut config = Self::default();

    if let Some(val) = lookup(ENV_SIDECAR_URL) {
      config.sidecar_url = val;
    }
    if let Some(val) = lookup(ENV_APP_NAME) {
      config.app_name = val;
    }
    if let Some(val) = lookup(ENV_APP_PORT) {
      config.app_port = parse(ENV_APP_PORT, &val, "port number")?;
    }
    if let Some(val) = lookup(ENV_ENV_ID) {
      config.env_id = val;
    }
    if let Some(val) = lookup(ENV_CACHE_CAPACITY) {
      config.cache_capacity = parse(ENV_CACHE_CAPACITY, &val, "integer")?;
      if config.cache_capacity < -1 {
        return Err(ConfigError::InvalidVar {
          name: ENV_CACHE_CAPACITY,
          expected: "-1 or a non-negative integer",
          value: val,
        });
      }
    }
    if let Some(val) = lookup(ENV_CACHE_TTL_SECS) {
      config.cache_ttl_secs = parse(ENV_CACHE_TTL_SECS, &val, "seconds")?;
    }
    if let Some(val) = lookup(ENV_CACHE_SWEEP_SECS) {
      config.cache_sweep_secs = parse(ENV_CACHE_SWEEP_SECS, &val, "seconds")?;
    }
    if let Some(val) = lookup(ENV_MEMO_PIN_SECS) {
      config.memo_pin_secs = parse(ENV_MEMO_PIN_SECS, &val, "seconds")?;
    }
    if let Some(val) = lookup(ENV_REQUEST_TIMEOUT_SECS) {
      config.request_timeout_secs = parse(ENV_REQUEST_TIMEOUT_SECS, &val, "seconds")?;
    }

    Ok(config)
  }

  pub fn cache_config(&self) -> CacheConfig {
    CacheConfig {
      capacity: Capacity::from_raw(self.cache_capacity),
      ttl: Duration::from_secs(self.cache_ttl_secs),
      sweep_interval: Duration::from_secs(self.cache_sweep_secs.max(1)),
    }
  }

  pub fn memo_pin(&self) -> Duration {
    Duration::from_secs(self.memo_pin_secs)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }
}

fn parse<T: std::str::FromStr>(
  name: &'static str,
  val: &str,
  expected: &'static str,
) -> Result<T, ConfigError> {
  val.trim().parse::<T>().map_err(|_| ConfigError::InvalidVar {
    name,
    expected,
    value: val.to_string(),
  })
}

/// Application settings handed to every context.
///
/// The embedder loads these however it likes; the runtime only sees a JSON
/// object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppConfig(Arc<Map<String, Value>>);

impl AppConfig {
  pub fn new(values: Map<String, Value>) -> Self {
    Self(Arc::new(values))
  }

  pub fn from_value(value: Value) -> Result<Self, ConfigError> {
    match value {
      Value::Object(map) => Ok(Self::new(map)),
      Value::Null => Ok(Self::default()),
      _ => Err(ConfigError::AppConfigNotObject),
    }
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.0.get(key)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Decode the whole config as `T`.
  pub fn decode<T: DeserializeOwned>(&self) -> Result<T, Error> {
    serde_json::from_value(Value::Object((*self.0).clone())).map_err(|e| ERR_BAD_REQUEST.wrap(&e))
  }
}
