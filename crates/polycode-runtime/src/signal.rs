//! Named signals and realtime events.

use polycode_client::{Error, RealtimeEventEmitRequest, SignalEmitRequest, SignalWaitRequest};
use serde::Serialize;
use tracing::debug;

use crate::context::{BaseContext, SlotOutcome, WorkflowContext};
use crate::halt::Halt;
use crate::remote::encode_input;
use crate::response::Response;

impl WorkflowContext {
  /// Wait for `signal_name` to be emitted for this session.
  ///
  /// Suspends until the platform has the signal.
  pub async fn signal_await(&self, signal_name: &str) -> Result<Response, Halt> {
    let target = format!("signal:{}", signal_name);
    let req = SignalWaitRequest {
      signal_name: signal_name.to_string(),
    };

    self
      .call_slot(&target, false, |seq| async move {
        debug!(slot = seq, signal = %req.signal_name, "awaiting signal");
        match self.client().wait_for_signal(self.session_id(), &req).await {
          Err(err) if err.is_in_progress() => Err(Halt::Suspended),
          Err(err) => Ok(SlotOutcome::Transient(Response::error(err))),
          Ok(res) if res.is_async => Err(Halt::Suspended),
          Ok(res) => Ok(SlotOutcome::Recorded(Response::from_reply(
            res.output,
            res.is_error,
            res.error,
          ))),
        }
      })
      .await
  }

  /// Handle for emitting `signal_name` to a waiting task.
  pub fn signal(&self, signal_name: impl Into<String>) -> Signal {
    Signal {
      ctx: (**self).clone(),
      name: signal_name.into(),
    }
  }

  /// Publish `data` on a realtime channel.
  pub async fn emit_realtime_event<T: Serialize + ?Sized>(
    &self,
    channel: &str,
    data: &T,
  ) -> Result<(), Error> {
    self.ensure_active()?;
    let req = RealtimeEventEmitRequest {
      channel: channel.to_string(),
      input: encode_input(data)?,
    };
    self.client().emit_realtime_event(self.session_id(), &req).await
  }
}

/// A named signal that can resume a waiting task.
pub struct Signal {
  ctx: BaseContext,
  name: String,
}

impl Signal {
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Resume `task_id` with a value.
  pub async fn emit_value<T: Serialize + ?Sized>(&self, task_id: &str, data: &T) -> Result<(), Error> {
    let req = SignalEmitRequest {
      task_id: task_id.to_string(),
      signal_name: self.name.clone(),
      output: encode_input(data)?,
      is_error: false,
      error: None,
    };
    self.emit(req).await
  }

  /// Resume `task_id` with an error.
  pub async fn emit_error(&self, task_id: &str, err: Error) -> Result<(), Error> {
    let req = SignalEmitRequest {
      task_id: task_id.to_string(),
      signal_name: self.name.clone(),
      output: serde_json::Value::Null,
      is_error: true,
      error: Some(err),
    };
    self.emit(req).await
  }

  async fn emit(&self, req: SignalEmitRequest) -> Result<(), Error> {
    self.ctx.ensure_active()?;
    debug!(signal = %self.name, task_id = %req.task_id, is_error = req.is_error, "emitting signal");
    self.ctx.client().emit_signal(self.ctx.session_id(), &req).await
  }
}
