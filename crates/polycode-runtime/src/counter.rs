//! Platform-side counters.

use polycode_client::{Error, IncrementCounterRequest, IncrementCounterResponse};

use crate::context::BaseContext;

impl BaseContext {
  /// Counter `name` in `group`; `ttl` is in seconds, `0` for none.
  pub fn counter(&self, group: impl Into<String>, name: impl Into<String>, ttl: i64) -> Counter {
    Counter {
      ctx: self.clone(),
      group: group.into(),
      name: name.into(),
      ttl,
    }
  }
}

pub struct Counter {
  ctx: BaseContext,
  group: String,
  name: String,
  ttl: i64,
}

impl Counter {
  pub async fn increment(&self, count: u64) -> Result<IncrementCounterResponse, Error> {
    self.increment_with_limit(count, u64::MAX).await
  }

  /// Add `count` unless the result would exceed `limit`.
  ///
  /// `incremented` in the reply is false when the limit stopped it.
  pub async fn increment_with_limit(
    &self,
    count: u64,
    limit: u64,
  ) -> Result<IncrementCounterResponse, Error> {
    self.ctx.ensure_active()?;
    let req = IncrementCounterRequest {
      group: self.group.clone(),
      name: self.name.clone(),
      count,
      limit,
      ttl: self.ttl,
    };
    self
      .ctx
      .client()
      .increment_counter(self.ctx.session_id(), &req)
      .await
  }
}

#[cfg(test)]
mod tests {
  use crate::context::testing::context;
  use serde_json::json;

  #[tokio::test]
  async fn test_increment() {
    let (ctx, _) = context(json!({"value": 3, "incremented": true}));
    let res = ctx.counter("quota", "emails", 60).increment(1).await.unwrap();
    assert_eq!(res.value, 3);
    assert!(res.incremented);
  }
}
