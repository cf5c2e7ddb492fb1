//! The value-or-error result of every remote call.

use polycode_client::{ERR_INTERNAL, Error};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Result of a remote call, a memoized computation or a signal wait.
///
/// A response holds either a value, an error, or nothing at all (the null
/// response, for calls that legitimately produce no result).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
  value: Option<Value>,
  error: Option<Error>,
}

impl Response {
  pub fn value(value: Value) -> Self {
    Self {
      value: Some(value),
      error: None,
    }
  }

  pub fn error(error: Error) -> Self {
    Self {
      value: None,
      error: Some(error),
    }
  }

  pub fn null() -> Self {
    Self::default()
  }

  /// Encode `value` through JSON.
  pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Self {
    match serde_json::to_value(value) {
      Ok(v) => Self::value(v),
      Err(e) => Self::error(ERR_INTERNAL.wrap(&e)),
    }
  }

  /// Build from the `{output, isError, error}` triple used on the wire.
  pub(crate) fn from_reply(output: Value, is_error: bool, error: Option<Error>) -> Self {
    if is_error {
      Self::error(error.unwrap_or_else(|| ERR_INTERNAL.wrap("remote reported an error without detail")))
    } else if output.is_null() {
      Self::null()
    } else {
      Self::value(output)
    }
  }

  /// Decode the stored value as `T`, or return the stored error.
  ///
  /// A value that arrived string-encoded is parsed again when `T` does not
  /// decode from a plain string. The null response decodes from JSON `null`,
  /// so `Option<T>` and `()` targets accept it.
  pub fn get<T: DeserializeOwned>(&self) -> Result<T, Error> {
    if let Some(err) = &self.error {
      return Err(err.clone());
    }
    let value = self.value.clone().unwrap_or(Value::Null);
    decode_value(value).map_err(|e| ERR_INTERNAL.wrap(&e))
  }

  pub fn get_any(&self) -> (Option<&Value>, Option<&Error>) {
    (self.value.as_ref(), self.error.as_ref())
  }

  pub fn is_null(&self) -> bool {
    self.value.is_none() && self.error.is_none()
  }

  pub fn is_error(&self) -> bool {
    self.error.is_some()
  }
}

/// Decode `value` as `T`.
///
/// A JSON string that does not decode as `T` is parsed again as JSON text.
/// Any other non-null value that does not decode is retried as its JSON
/// text, so a `String` target receives e.g. `"3"` for the number 3.
pub(crate) fn decode_value<T: DeserializeOwned>(value: Value) -> Result<T, serde_json::Error> {
  match value {
    Value::String(text) => match serde_json::from_value(Value::String(text.clone())) {
      Ok(decoded) => Ok(decoded),
      Err(first) => serde_json::from_str(&text).map_err(|_| first),
    },
    Value::Null => serde_json::from_value(Value::Null),
    other => match T::deserialize(&other) {
      Ok(decoded) => Ok(decoded),
      Err(first) => serde_json::from_value(Value::String(other.to_string())).map_err(|_| first),
    },
  }
}
