//! Structured platform errors.
//!
//! Every error that crosses the wire is an [`Error`]: a module id, a numeric
//! code, a reason template with positional `{}` arguments, an optional cause
//! and a retry flag. Two errors are the same kind when module and code match;
//! arguments and cause are ignored by [`Error::is`].

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Module id used by every error raised by the client itself.
pub const CLIENT_MODULE: &str = "polycode.client";

pub const ERR_BAD_REQUEST: Error = Error::define(CLIENT_MODULE, 2, "bad request");
pub const ERR_TASK_EXEC_ERROR: Error = Error::define(CLIENT_MODULE, 3, "task execution error");
pub const ERR_UNKNOWN_ERROR: Error = Error::define(CLIENT_MODULE, 4, "unknown error");
/// Suspension sentinel. Not a failure: the remote platform has not produced
/// a result yet and the current invocation must be abandoned.
pub const ERR_TASK_IN_PROGRESS: Error = Error::define(CLIENT_MODULE, 5, "task in progress");
pub const ERR_CONTEXT_NOT_FOUND: Error = Error::define(CLIENT_MODULE, 6, "context not found");
pub const ERR_INTERNAL: Error = Error::define(CLIENT_MODULE, 7, "internal error");
pub const ERR_SERVICE_NOT_FOUND: Error = Error::define(CLIENT_MODULE, 8, "service [{}] not found");
pub const ERR_METHOD_NOT_FOUND: Error =
  Error::define(CLIENT_MODULE, 9, "method [{}] not found in service [{}]");
pub const ERR_CANCELLED: Error = Error::define(CLIENT_MODULE, 10, "execution cancelled");
pub const ERR_HTTP_STATUS: Error = Error::define(CLIENT_MODULE, 11, "http error, status: {}");
pub const ERR_NON_DETERMINISTIC: Error = Error::define(
  CLIENT_MODULE,
  12,
  "call slot [{}] replayed with a different target",
);

/// A structured, wire-serializable error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "ErrorBody", from = "ErrorBody")]
pub struct Error {
  module: Cow<'static, str>,
  code: i32,
  template: Cow<'static, str>,
  args: Vec<String>,
  cause: Option<String>,
  retryable: bool,
}

impl Error {
  /// Define an error kind. Usable in `const` items.
  pub const fn define(module: &'static str, code: i32, template: &'static str) -> Self {
    Self {
      module: Cow::Borrowed(module),
      code,
      template: Cow::Borrowed(template),
      args: Vec::new(),
      cause: None,
      retryable: false,
    }
  }

  /// Same kind, with `cause` recorded as the text of another error.
  pub fn wrap(&self, cause: &(impl fmt::Display + ?Sized)) -> Self {
    Self {
      cause: Some(cause.to_string()),
      ..self.clone()
    }
  }

  /// Same kind, with positional arguments for the reason template.
  pub fn with<I, S>(&self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: ToString,
  {
    Self {
      args: args.into_iter().map(|a| a.to_string()).collect(),
      ..self.clone()
    }
  }

  /// Same kind, with the retry flag set to `retryable`.
  pub fn retry(&self, retryable: bool) -> Self {
    Self {
      retryable,
      ..self.clone()
    }
  }

  /// Whether `self` and `other` are the same kind of error.
  pub fn is(&self, other: &Error) -> bool {
    self.module == other.module && self.code == other.code
  }

  /// Whether this is the suspension sentinel.
  pub fn is_in_progress(&self) -> bool {
    self.is(&ERR_TASK_IN_PROGRESS)
  }

  pub fn module(&self) -> &str {
    &self.module
  }

  pub fn code(&self) -> i32 {
    self.code
  }

  pub fn cause(&self) -> Option<&str> {
    self.cause.as_deref()
  }

  pub fn is_retryable(&self) -> bool {
    self.retryable
  }

  /// The reason template with its arguments filled in.
  pub fn reason(&self) -> String {
    let mut args = self.args.iter();
    let mut out = String::with_capacity(self.template.len());
    let mut rest: &str = &self.template;

    while let Some(pos) = rest.find("{}") {
      out.push_str(&rest[..pos]);
      match args.next() {
        Some(arg) => out.push_str(arg),
        None => out.push_str("{}"),
      }
      rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
  }

  /// Render the JSON error envelope.
  pub fn to_json(&self) -> String {
    serde_json::to_string(&ErrorBody::from(self.clone())).unwrap_or_else(|_| {
      format!(
        r#"{{"module":"{}","errorNo":{}}}"#,
        self.module, self.code
      )
    })
  }
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "module: [{}], errorNo : [{}], reason: [{}]",
      self.module,
      self.code,
      self.reason()
    )?;
    if let Some(cause) = &self.cause {
      write!(f, ", causeBy: [{}]", cause)?;
    }
    Ok(())
  }
}

impl std::error::Error for Error {}

/// Wire shape of [`Error`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
  #[serde(default)]
  module: String,
  #[serde(default)]
  error_no: i32,
  #[serde(default)]
  reason: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  cause_by: Option<String>,
  #[serde(default)]
  can_retry: bool,
}

impl From<Error> for ErrorBody {
  fn from(err: Error) -> Self {
    Self {
      reason: err.reason(),
      module: err.module.into_owned(),
      error_no: err.code,
      cause_by: err.cause,
      can_retry: err.retryable,
    }
  }
}

impl From<ErrorBody> for Error {
  fn from(body: ErrorBody) -> Self {
    Self {
      module: Cow::Owned(body.module),
      code: body.error_no,
      template: Cow::Owned(body.reason),
      args: Vec::new(),
      cause: body.cause_by.filter(|c| !c.is_empty()),
      retryable: body.can_retry,
    }
  }
}

/// Failures talking to the platform, before they are turned into an [`Error`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
  /// The HTTP exchange itself failed.
  #[error("http request failed: {0}")]
  Http(#[from] reqwest::Error),

  /// A request or response body was not valid JSON for its type.
  #[error("invalid json: {0}")]
  Json(#[from] serde_json::Error),
}

impl From<TransportError> for Error {
  fn from(err: TransportError) -> Self {
    let retryable = matches!(&err, TransportError::Http(e) if e.is_timeout() || e.is_connect());
    ERR_INTERNAL.wrap(&err).retry(retryable)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_identity_ignores_cause_and_args() {
    let wrapped = ERR_TASK_IN_PROGRESS.wrap("remote call pending").with(["x"]);
    assert!(wrapped.is(&ERR_TASK_IN_PROGRESS));
    assert!(wrapped.is_in_progress());
    assert!(!ERR_BAD_REQUEST.is(&ERR_TASK_IN_PROGRESS));

    let foreign = Error::define("other.module", 5, "task in progress");
    assert!(!foreign.is_in_progress());
  }

  #[test]
  fn test_reason_fills_placeholders() {
    let err = ERR_METHOD_NOT_FOUND.with(["hello", "greeter"]);
    assert_eq!(err.reason(), "method [hello] not found in service [greeter]");

    // Missing arguments leave the placeholder in place.
    assert_eq!(ERR_SERVICE_NOT_FOUND.reason(), "service [{}] not found");
  }

  #[test]
  fn test_display() {
    let err = ERR_TASK_EXEC_ERROR.wrap("boom");
    assert_eq!(
      err.to_string(),
      "module: [polycode.client], errorNo : [3], reason: [task execution error], causeBy: [boom]"
    );
    assert_eq!(
      ERR_BAD_REQUEST.to_string(),
      "module: [polycode.client], errorNo : [2], reason: [bad request]"
    );
  }

  #[test]
  fn test_json_envelope() {
    let err = ERR_SERVICE_NOT_FOUND.with(["orders"]).wrap("lookup failed");
    let value: serde_json::Value = serde_json::from_str(&err.to_json()).unwrap();

    assert_eq!(value["module"], "polycode.client");
    assert_eq!(value["errorNo"], 8);
    assert_eq!(value["reason"], "service [orders] not found");
    assert_eq!(value["causeBy"], "lookup failed");

    let plain: serde_json::Value = serde_json::from_str(&ERR_BAD_REQUEST.to_json()).unwrap();
    assert!(plain.get("causeBy").is_none());
  }

  #[test]
  fn test_deserialize_from_wire() {
    let err: Error = serde_json::from_value(serde_json::json!({
      "module": "orders.service",
      "errorNo": 42,
      "reason": "out of stock",
      "causeBy": "",
      "canRetry": true,
    }))
    .unwrap();

    assert_eq!(err.module(), "orders.service");
    assert_eq!(err.code(), 42);
    assert_eq!(err.reason(), "out of stock");
    assert_eq!(err.cause(), None);
    assert!(err.is_retryable());
  }

  #[test]
  fn test_retry_flag() {
    assert!(!ERR_INTERNAL.is_retryable());
    assert!(ERR_INTERNAL.retry(true).is_retryable());
  }
}
