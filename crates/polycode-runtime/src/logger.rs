//! Handler logs.
//!
//! Lines written through a [`Logger`] are buffered per dispatch and shipped
//! with the completion, so the platform can attach them to the task. Each
//! line is also emitted as a `tracing` event.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use polycode_client::{LogLevel, LogMsg};
use serde_json::Value;
use tracing::{debug, error, info, warn};

/// Section used by [`crate::BaseContext::logger`].
pub const DEFAULT_SECTION: &str = "task";

/// Log lines collected during one dispatch.
#[derive(Clone, Default)]
pub(crate) struct LogBuffer(Arc<Mutex<Vec<LogMsg>>>);

impl LogBuffer {
  fn publish(&self, msg: LogMsg) {
    self.0.lock().unwrap_or_else(|e| e.into_inner()).push(msg);
  }

  /// Take every line published so far.
  pub(crate) fn drain(&self) -> Vec<LogMsg> {
    std::mem::take(&mut *self.0.lock().unwrap_or_else(|e| e.into_inner()))
  }
}

#[derive(Clone)]
pub struct Logger {
  section: String,
  buffer: LogBuffer,
}

impl Logger {
  pub(crate) fn new(section: impl Into<String>, buffer: LogBuffer) -> Self {
    Self {
      section: section.into(),
      buffer,
    }
  }

  /// A logger writing to the same dispatch under another section.
  pub fn section(&self, section: impl Into<String>) -> Logger {
    Logger::new(section, self.buffer.clone())
  }

  pub fn log(&self, level: LogLevel) -> LogEntry {
    LogEntry {
      msg: LogMsg {
        level,
        section: self.section.clone(),
        tags: BTreeMap::new(),
        timestamp: 0,
        message: String::new(),
      },
      buffer: self.buffer.clone(),
    }
  }

  pub fn debug(&self) -> LogEntry {
    self.log(LogLevel::Debug)
  }

  pub fn info(&self) -> LogEntry {
    self.log(LogLevel::Info)
  }

  pub fn warn(&self) -> LogEntry {
    self.log(LogLevel::Warn)
  }

  pub fn error(&self) -> LogEntry {
    self.log(LogLevel::Error)
  }
}

/// One log line being built. Nothing is published until [`LogEntry::msg`]
/// or [`LogEntry::done`].
#[must_use]
pub struct LogEntry {
  msg: LogMsg,
  buffer: LogBuffer,
}

impl LogEntry {
  pub fn str(self, key: &str, value: impl Into<String>) -> Self {
    self.tag(key, Value::String(value.into()))
  }

  pub fn int(self, key: &str, value: i64) -> Self {
    self.tag(key, Value::from(value))
  }

  /// Non-finite values are recorded as `null`.
  pub fn float(self, key: &str, value: f64) -> Self {
    self.tag(key, Value::from(value))
  }

  pub fn bool(self, key: &str, value: bool) -> Self {
    self.tag(key, Value::Bool(value))
  }

  pub fn tag(mut self, key: &str, value: Value) -> Self {
    self.msg.tags.insert(key.to_string(), value);
    self
  }

  pub fn msg(mut self, message: impl Into<String>) {
    self.msg.message = message.into();
    self.done();
  }

  pub fn done(mut self) {
    self.msg.timestamp = Utc::now().timestamp_micros();
    trace_line(&self.msg);
    self.buffer.publish(self.msg);
  }
}

fn trace_line(msg: &LogMsg) {
  let section = msg.section.as_str();
  let message = msg.message.as_str();
  match msg.level {
    LogLevel::Debug => debug!(section, tags = ?msg.tags, "{}", message),
    LogLevel::Info => info!(section, tags = ?msg.tags, "{}", message),
    LogLevel::Warn => warn!(section, tags = ?msg.tags, "{}", message),
    LogLevel::Error => error!(section, tags = ?msg.tags, "{}", message),
  }
}
