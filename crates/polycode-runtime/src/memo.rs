//! Replay-safe local computations.

use polycode_client::{Error, ExecFuncRequest, ExecFuncResult};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::context::{SlotOutcome, WorkflowContext};
use crate::halt::Halt;
use crate::response::Response;

impl WorkflowContext {
  /// Run `supplier` once per call slot across replays.
  ///
  /// The platform is asked first whether an earlier attempt recorded a
  /// result for this slot. If so it is returned and `supplier` does not run;
  /// otherwise `supplier` runs, its outcome is recorded, and returned. A
  /// supplier error is recorded too and comes back as an error response.
  pub async fn memo<T, F>(&self, supplier: F) -> Result<Response, Halt>
  where
    T: Serialize,
    F: FnOnce() -> Result<T, Error>,
  {
    let session_id = self.session_id().to_string();
    let client = self.client().clone();

    self
      .call_slot("memo", true, |seq| async move {
        let input = json!({ "slot": seq });
        let recorded = client
          .exec_func(
            &session_id,
            &ExecFuncRequest {
              input: input.clone(),
            },
          )
          .await;

        let recorded = match recorded {
          Err(err) if err.is_in_progress() => return Err(Halt::Suspended),
          Err(err) => return Ok(SlotOutcome::Transient(Response::error(err))),
          Ok(res) if res.is_async => return Err(Halt::Suspended),
          Ok(res) => res,
        };

        if recorded.is_completed {
          debug!(slot = seq, "memo replayed from platform");
          return Ok(SlotOutcome::Recorded(Response::from_reply(
            recorded.output,
            recorded.is_error,
            recorded.error,
          )));
        }

        let response = match supplier() {
          Ok(value) => Response::from_serialize(&value),
          Err(err) => Response::error(err),
        };
        let (output, error) = response.get_any();
        let result = ExecFuncResult {
          input,
          output: output.cloned().unwrap_or_default(),
          is_error: error.is_some(),
          error: error.cloned(),
        };

        match client.exec_func_result(&session_id, &result).await {
          Ok(()) => Ok(SlotOutcome::Recorded(response)),
          Err(err) if err.is_in_progress() => Err(Halt::Suspended),
          Err(err) => {
            warn!(slot = seq, error = %err, "failed to record memo result");
            Ok(SlotOutcome::Transient(Response::error(err)))
          }
        }
      })
      .await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::testing::context;
  use polycode_client::{ERR_BAD_REQUEST, paths};

  #[tokio::test]
  async fn test_memo_runs_supplier_when_unrecorded() {
    let (base, transport) = context(json!({"isCompleted": false}));
    let ctx = WorkflowContext::new(base);

    let res = ctx.memo(|| Ok(41 + 1)).await.unwrap();
    assert_eq!(res.get::<u32>().unwrap(), 42);
    assert_eq!(
      *transport.calls.lock().unwrap(),
      vec![paths::EXEC_FUNC, paths::EXEC_FUNC_RESULT]
    );
  }

  #[tokio::test]
  async fn test_memo_skips_supplier_when_recorded() {
    let (base, transport) = context(json!({"isCompleted": true, "output": "recorded"}));
    let ctx = WorkflowContext::new(base);

    let res = ctx
      .memo::<String, _>(|| panic!("supplier must not run"))
      .await
      .unwrap();
    assert_eq!(res.get::<String>().unwrap(), "recorded");
    assert_eq!(*transport.calls.lock().unwrap(), vec![paths::EXEC_FUNC]);
  }

  #[tokio::test]
  async fn test_memo_records_supplier_error() {
    let (base, _) = context(json!({}));
    let ctx = WorkflowContext::new(base);

    let res = ctx
      .memo::<u32, _>(|| Err(ERR_BAD_REQUEST.wrap("clock unavailable")))
      .await
      .unwrap();
    assert!(res.get::<u32>().unwrap_err().is(&ERR_BAD_REQUEST));
  }
}
