//! Integration tests for ServiceClient over a scripted transport.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use polycode_client::{
  DbAction, ERR_HTTP_STATUS, ERR_INTERNAL, Error, ExecServiceRequest, FileKeyRequest,
  IncrementCounterRequest, ListFilePageRequest, PutRequest, QueryRequest, ServiceClient,
  SignalWaitRequest, Transport, paths,
};
use serde_json::{Value, json};

#[derive(Default)]
struct ScriptedTransport {
  replies: Mutex<VecDeque<Result<(Value, u16), Error>>>,
  calls: Mutex<Vec<(String, String, Value)>>,
}

impl ScriptedTransport {
  fn reply(self, body: Value, status: u16) -> Self {
    self.replies.lock().unwrap().push_back(Ok((body, status)));
    self
  }

  fn fail(self, err: Error) -> Self {
    self.replies.lock().unwrap().push_back(Err(err));
    self
  }

  fn calls(&self) -> Vec<(String, String, Value)> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl Transport for ScriptedTransport {
  async fn post_json(
    &self,
    path: &str,
    session_id: &str,
    body: Value,
  ) -> Result<(Value, u16), Error> {
    self
      .calls
      .lock()
      .unwrap()
      .push((path.to_string(), session_id.to_string(), body));
    self
      .replies
      .lock()
      .unwrap()
      .pop_front()
      .unwrap_or(Ok((Value::Null, 200)))
  }
}

fn client(transport: ScriptedTransport) -> (ServiceClient, Arc<ScriptedTransport>) {
  let transport = Arc::new(transport);
  (ServiceClient::new(transport.clone()), transport)
}

#[tokio::test]
async fn test_exec_service_round_trip() {
  let (client, transport) = client(
    ScriptedTransport::default().reply(json!({"isAsync": false, "output": {"total": 3}}), 200),
  );

  let req = ExecServiceRequest {
    service: "orders".to_string(),
    method: "count".to_string(),
    input: json!({"customer": "c-1"}),
    ..Default::default()
  };
  let res = client.exec_service("session-1", &req).await.unwrap();

  assert!(!res.is_async);
  assert!(!res.is_error);
  assert_eq!(res.output["total"], 3);

  let calls = transport.calls();
  assert_eq!(calls.len(), 1);
  assert_eq!(calls[0].0, paths::EXEC_SERVICE);
  assert_eq!(calls[0].1, "session-1");
  assert_eq!(calls[0].2["service"], "orders");
  assert_eq!(calls[0].2["input"]["customer"], "c-1");
}

#[tokio::test]
async fn test_async_reply_is_not_interpreted() {
  let (client, _) = client(ScriptedTransport::default().reply(json!({"isAsync": true}), 200));

  let res = client
    .wait_for_signal(
      "s",
      &SignalWaitRequest {
        signal_name: "approved".to_string(),
      },
    )
    .await
    .unwrap();

  assert!(res.is_async);
}

#[tokio::test]
async fn test_non_200_becomes_structured_error() {
  let (client, _) = client(ScriptedTransport::default().reply(json!("upstream down"), 502));

  let err = client.acknowledge("s").await.unwrap_err();
  assert!(err.is(&ERR_HTTP_STATUS));
  assert_eq!(err.reason(), "http error, status: 502");
  assert_eq!(err.cause(), Some("upstream down"));
}

#[tokio::test]
async fn test_transport_failure_propagates() {
  let (client, _) = client(ScriptedTransport::default().fail(ERR_INTERNAL.wrap("connection refused")));

  let err = client
    .increment_counter("s", &IncrementCounterRequest::default())
    .await
    .unwrap_err();
  assert!(err.is(&ERR_INTERNAL));
}

#[tokio::test]
async fn test_undecodable_reply_is_internal_error() {
  let (client, _) = client(ScriptedTransport::default().reply(json!({"value": "many"}), 200));

  let err = client
    .increment_counter("s", &IncrementCounterRequest::default())
    .await
    .unwrap_err();
  assert!(err.is(&ERR_INTERNAL));
}

#[tokio::test]
async fn test_counter_request_shape() {
  let (client, transport) = client(
    ScriptedTransport::default().reply(json!({"value": 4, "incremented": true}), 200),
  );

  let req = IncrementCounterRequest {
    group: "quota".to_string(),
    name: "emails".to_string(),
    count: 1,
    limit: 10,
    ttl: 60,
  };
  let res = client.increment_counter("s", &req).await.unwrap();
  assert_eq!(res.value, 4);
  assert!(res.incremented);

  let body = &transport.calls()[0].2;
  assert_eq!(body["TTL"], 60);
  assert_eq!(body["limit"], 10);
}

#[tokio::test]
async fn test_get_item_null_is_missing() {
  let (client, transport) = client(
    ScriptedTransport::default()
      .reply(Value::Null, 200)
      .reply(json!({"id": "o-1"}), 200),
  );

  let req = QueryRequest {
    collection: "orders".to_string(),
    key: "o-1".to_string(),
    ..Default::default()
  };
  assert_eq!(client.get_item("s", &req).await.unwrap(), None);
  assert_eq!(client.get_item("s", &req).await.unwrap(), Some(json!({"id": "o-1"})));

  let calls = transport.calls();
  assert_eq!(calls[0].0, paths::DB_GET);
  assert_eq!(calls[0].2["collection"], "orders");
  assert_eq!(calls[0].2["args"], json!([]));
}

#[tokio::test]
async fn test_query_items_null_is_empty() {
  let (client, transport) = client(ScriptedTransport::default().reply(Value::Null, 200));

  let items = client.query_items("s", &QueryRequest::default()).await.unwrap();
  assert!(items.is_empty());
  assert_eq!(transport.calls()[0].0, paths::DB_QUERY);
}

#[tokio::test]
async fn test_put_item_shape() {
  let (client, transport) = client(ScriptedTransport::default());

  let req = PutRequest {
    action: DbAction::Delete,
    collection: "orders".to_string(),
    key: "o-1".to_string(),
    ..Default::default()
  };
  client.put_item("s-9", &req).await.unwrap();

  let (path, session, body) = transport.calls()[0].clone();
  assert_eq!(path, paths::DB_PUT);
  assert_eq!(session, "s-9");
  assert_eq!(body["action"], "delete");
  assert_eq!(body["key"], "o-1");
}

#[tokio::test]
async fn test_file_calls() {
  let (client, transport) = client(
    ScriptedTransport::default()
      .reply(json!({"content": "aGk="}), 200)
      .reply(json!({"files": [], "isTruncated": false}), 200),
  );

  let file = client
    .get_file("s", &FileKeyRequest { key: "a.txt".to_string() })
    .await
    .unwrap();
  assert_eq!(file.content, "aGk=");

  let page = client
    .list_files(
      "s",
      &ListFilePageRequest {
        prefix: "docs".to_string(),
        max_keys: 10,
        continuation_token: None,
      },
    )
    .await
    .unwrap();
  assert!(page.files.is_empty());

  let calls = transport.calls();
  assert_eq!(calls[0].0, paths::FILE_GET);
  assert_eq!(calls[1].0, paths::FILE_LIST);
  assert_eq!(calls[1].2["maxKeys"], 10);
  assert!(calls[1].2["continuationToken"].is_null());
}
