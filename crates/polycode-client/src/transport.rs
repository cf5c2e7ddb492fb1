//! Transport to the platform sidecar.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, TransportError};

/// Header carrying the session id on every platform call.
pub const SESSION_HEADER: &str = "x-polycode-task-session-id";

/// Posts JSON bodies to the platform.
///
/// Implementations return the decoded response body together with the HTTP
/// status. Interpreting non-200 statuses is left to the caller.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn post_json(
    &self,
    path: &str,
    session_id: &str,
    body: serde_json::Value,
  ) -> Result<(serde_json::Value, u16), Error>;
}

/// [`Transport`] over HTTP using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: String,
}

impl HttpTransport {
  pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Self {
      client,
      base_url: base_url.into(),
    })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }
}

/// Join a base url and an endpoint path with exactly one slash.
pub fn endpoint_url(base_url: &str, path: &str) -> String {
  format!(
    "{}/{}",
    base_url.trim_end_matches('/'),
    path.trim_start_matches('/')
  )
}

#[async_trait]
impl Transport for HttpTransport {
  async fn post_json(
    &self,
    path: &str,
    session_id: &str,
    body: serde_json::Value,
  ) -> Result<(serde_json::Value, u16), Error> {
    let url = endpoint_url(&self.base_url, path);
    debug!(url = %url, session_id = %session_id, "posting to platform");

    let response = self
      .client
      .post(&url)
      .header(SESSION_HEADER, session_id)
      .json(&body)
      .send()
      .await
      .map_err(TransportError::from)?;

    let status = response.status().as_u16();
    let bytes = response.bytes().await.map_err(TransportError::from)?;

    let value = if bytes.is_empty() {
      serde_json::Value::Null
    } else {
      match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        // Error pages are not always JSON; keep the text for the caller.
        Err(_) if status != 200 => {
          serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
        }
        Err(e) => return Err(TransportError::from(e).into()),
      }
    };

    Ok((value, status))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_endpoint_url() {
    assert_eq!(
      endpoint_url("http://127.0.0.1:9999", "v1/context/service/exec"),
      "http://127.0.0.1:9999/v1/context/service/exec"
    );
    assert_eq!(
      endpoint_url("http://sidecar/", "/v1/context/acknowledge"),
      "http://sidecar/v1/context/acknowledge"
    );
  }
}
