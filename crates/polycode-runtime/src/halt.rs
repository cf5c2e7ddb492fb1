//! Control signals that end a handler invocation early.

use std::fmt;

use polycode_client::Error;
use serde_json::Value;

/// Why a handler stopped before producing a value.
///
/// Handlers return `Result<_, Halt>` and propagate with `?`. Converting an
/// [`Error`] picks [`Halt::Suspended`] for the in-progress sentinel, so a
/// pending remote call travels through any number of frames unchanged and
/// is only classified at the dispatch boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Halt {
  /// A remote result is not ready; the invocation will be replayed.
  Suspended,
  /// The handler failed.
  Failed(Error),
}

impl Halt {
  pub fn is_suspended(&self) -> bool {
    match self {
      Halt::Suspended => true,
      Halt::Failed(err) => err.is_in_progress(),
    }
  }
}

impl From<Error> for Halt {
  fn from(err: Error) -> Self {
    if err.is_in_progress() {
      Halt::Suspended
    } else {
      Halt::Failed(err)
    }
  }
}

impl fmt::Display for Halt {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Halt::Suspended => f.write_str("suspended"),
      Halt::Failed(err) => write!(f, "failed: {}", err),
    }
  }
}

/// Terminal state of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
  /// The handler returned; `None` is an explicit null result.
  Completed(Option<Value>),
  Failed(Error),
  Suspended,
}

impl From<Result<Option<Value>, Halt>> for Outcome {
  fn from(result: Result<Option<Value>, Halt>) -> Self {
    match result {
      Ok(value) => Outcome::Completed(value),
      Err(halt) if halt.is_suspended() => Outcome::Suspended,
      Err(Halt::Failed(err)) => Outcome::Failed(err),
      Err(Halt::Suspended) => Outcome::Suspended,
    }
  }
}
