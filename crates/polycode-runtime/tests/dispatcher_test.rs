//! Dispatcher tests over a scripted platform.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use http::{Method, StatusCode};
use polycode_cache::{CacheConfig, MemoCache};
use polycode_client::{
  ApiCompleteEvent, ApiRequest, ApiStartEvent, ContextMeta, ERR_BAD_REQUEST, ERR_TASK_EXEC_ERROR,
  Error, LogLevel, ServiceClient, ServiceCompleteEvent, ServiceStartEvent, TaskOptions, Transport,
  paths,
};
use polycode_runtime::{
  ApiContext, Completion, Dispatcher, Event, Halt, HasId, HttpRequest, Platform, Routes, ServiceBuilder,
  ServiceContext, ServiceRegistry, Validate, WorkflowContext, json_response,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// Answers each path from its own queue of replies; `{}` once a queue is
/// empty.
#[derive(Default)]
struct ScriptedPlatform {
  replies: Mutex<HashMap<String, VecDeque<Value>>>,
  calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedPlatform {
  fn push(&self, path: &str, reply: Value) {
    self
      .replies
      .lock()
      .unwrap()
      .entry(path.to_string())
      .or_default()
      .push_back(reply);
  }

  fn paths(&self) -> Vec<String> {
    self.calls.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
  }

  fn body(&self, index: usize) -> Value {
    self.calls.lock().unwrap()[index].1.clone()
  }
}

#[async_trait]
impl Transport for ScriptedPlatform {
  async fn post_json(&self, path: &str, _: &str, body: Value) -> Result<(Value, u16), Error> {
    self.calls.lock().unwrap().push((path.to_string(), body));
    let reply = self
      .replies
      .lock()
      .unwrap()
      .get_mut(path)
      .and_then(|queue| queue.pop_front())
      .unwrap_or_else(|| json!({}));
    Ok((reply, 200))
  }
}

fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

fn dispatcher(registry: ServiceRegistry) -> (Dispatcher, Arc<ScriptedPlatform>) {
  init_tracing();
  let platform = Arc::new(ScriptedPlatform::default());
  let dispatcher = Dispatcher::new(
    Arc::new(registry),
    Platform::new(
      ServiceClient::new(platform.clone()),
      MemoCache::new(CacheConfig::default()),
    ),
  );
  (dispatcher, platform)
}

fn service_event(session_id: &str, service: &str, method: &str, input: Value) -> ServiceStartEvent {
  ServiceStartEvent {
    session_id: session_id.to_string(),
    service: service.to_string(),
    method: method.to_string(),
    meta: ContextMeta::default(),
    input,
  }
}

fn api_event(method: &str, path: &str, body: &str) -> ApiStartEvent {
  ApiStartEvent {
    session_id: "api-1".to_string(),
    meta: ContextMeta::default(),
    request: ApiRequest {
      method: method.to_string(),
      path: path.to_string(),
      body: body.to_string(),
      ..Default::default()
    },
  }
}

fn error_of(done: &ServiceCompleteEvent) -> Error {
  assert!(done.is_error, "expected an error completion, got {:?}", done);
  let err = done.error.clone().unwrap();
  assert!(err.is(&ERR_TASK_EXEC_ERROR));
  err
}

#[derive(Debug, Serialize, Deserialize)]
struct Order {
  sku: String,
}

impl Validate for Order {
  fn validate(&self) -> Result<(), Error> {
    if self.sku.is_empty() {
      return Err(ERR_BAD_REQUEST.wrap("sku is required"));
    }
    Ok(())
  }
}

fn explode() -> Result<(), Halt> {
  panic!("boom")
}

/// `orders.place` reserves stock, then charges. Counts how often it starts.
fn orders(starts: Arc<AtomicUsize>) -> ServiceRegistry {
  let service = ServiceBuilder::new("orders")
    .workflow("place", move |ctx: WorkflowContext, order: Order| {
      let starts = starts.clone();
      async move {
        starts.fetch_add(1, Ordering::SeqCst);
        let reserved: bool = ctx
          .service("inventory")
          .get()
          .request_reply(TaskOptions::default(), "reserve", &order)
          .await?
          .get()?;
        let charge: String = ctx
          .service("payments")
          .get()
          .request_reply(TaskOptions::default(), "charge", &order)
          .await?
          .get()?;
        Ok::<_, Halt>(json!({"reserved": reserved, "charge": charge}))
      }
    })
    .method("ping", |_ctx: ServiceContext, _: ()| async move { Ok::<_, Halt>(()) })
    .method("explode", |_ctx: ServiceContext, _: ()| async move { explode() })
    .build();

  let mut registry = ServiceRegistry::new();
  registry.register(service).unwrap();
  registry
}

#[tokio::test]
async fn test_unknown_service() {
  let (dispatcher, platform) = dispatcher(ServiceRegistry::new());

  let done = dispatcher
    .dispatch_service(service_event("s-1", "orders", "place", json!({})), CancellationToken::new())
    .await;

  let err = error_of(&done);
  assert!(err.cause().unwrap().contains("service [orders] not found"));
  assert!(!done.is_async);
  assert!(platform.paths().is_empty());
}

#[tokio::test]
async fn test_unit_output_is_null() {
  let (dispatcher, _) = dispatcher(orders(Arc::default()));

  let done = dispatcher
    .dispatch_service(service_event("s-1", "orders", "ping", Value::Null), CancellationToken::new())
    .await;

  assert!(done.is_null);
  assert!(!done.is_error);
  assert!(!done.is_async);
  assert!(!done.meta.is_workflow);
}

#[tokio::test]
async fn test_pending_call_suspends() {
  let (dispatcher, platform) = dispatcher(orders(Arc::default()));
  platform.push(paths::EXEC_SERVICE, json!({"isAsync": true}));

  let done = dispatcher
    .dispatch_service(
      service_event("s-1", "orders", "place", json!({"sku": "A"})),
      CancellationToken::new(),
    )
    .await;

  assert!(done.is_async);
  assert!(!done.is_error);
  assert!(done.meta.is_workflow);
  assert_eq!(platform.paths(), vec![paths::EXEC_SERVICE]);
  assert_eq!(platform.body(0)["service"], "inventory");
  assert_eq!(platform.body(0)["input"]["sku"], "A");
}

#[tokio::test]
async fn test_replay_reuses_completed_calls() {
  let starts = Arc::new(AtomicUsize::new(0));
  let (dispatcher, platform) = dispatcher(orders(starts.clone()));
  let event = service_event("s-1", "orders", "place", json!({"sku": "A"}));

  platform.push(paths::EXEC_SERVICE, json!({"output": true}));
  platform.push(paths::EXEC_SERVICE, json!({"isAsync": true}));
  let first = dispatcher.dispatch_service(event.clone(), CancellationToken::new()).await;
  assert!(first.is_async);

  platform.push(paths::EXEC_SERVICE, json!({"output": "ch_1"}));
  let second = dispatcher.dispatch_service(event, CancellationToken::new()).await;

  assert!(!second.is_error);
  assert_eq!(second.output, json!({"reserved": true, "charge": "ch_1"}));
  assert_eq!(starts.load(Ordering::SeqCst), 2);
  // the reservation was answered from the call slot on replay
  assert_eq!(
    platform.paths(),
    vec![paths::EXEC_SERVICE, paths::EXEC_SERVICE, paths::EXEC_SERVICE]
  );
  assert_eq!(platform.body(2)["service"], "payments");
}

#[tokio::test]
async fn test_memo_survives_replay() {
  let supplied = Arc::new(AtomicUsize::new(0));
  let counter = supplied.clone();
  let service = ServiceBuilder::new("ids")
    .workflow("issue", move |ctx: WorkflowContext, _: ()| {
      let counter = counter.clone();
      async move {
        let id: usize = ctx
          .memo(move || Ok(counter.fetch_add(1, Ordering::SeqCst) + 100))
          .await?
          .get()?;
        ctx
          .service("audit")
          .get()
          .request_reply(TaskOptions::default(), "log", &id)
          .await?;
        Ok::<_, Halt>(id)
      }
    })
    .build();
  let mut registry = ServiceRegistry::new();
  registry.register(service).unwrap();

  let (dispatcher, platform) = dispatcher(registry);
  let event = service_event("s-9", "ids", "issue", Value::Null);

  platform.push(paths::EXEC_SERVICE, json!({"isAsync": true}));
  assert!(dispatcher.dispatch_service(event.clone(), CancellationToken::new()).await.is_async);

  let done = dispatcher.dispatch_service(event, CancellationToken::new()).await;
  assert_eq!(done.output, json!(100));
  assert_eq!(supplied.load(Ordering::SeqCst), 1);
  assert_eq!(
    platform.paths(),
    vec![
      paths::EXEC_FUNC,
      paths::EXEC_FUNC_RESULT,
      paths::EXEC_SERVICE,
      paths::EXEC_SERVICE
    ]
  );
}

#[tokio::test]
async fn test_panic_is_internal_failure() {
  let (dispatcher, _) = dispatcher(orders(Arc::default()));

  let done = dispatcher
    .dispatch_service(service_event("s-1", "orders", "explode", Value::Null), CancellationToken::new())
    .await;

  let err = error_of(&done);
  let cause = err.cause().unwrap();
  assert!(cause.contains("internal error"));
  assert!(cause.contains("panic: boom"));
}

#[tokio::test]
async fn test_invalid_input_skips_handler() {
  let starts = Arc::new(AtomicUsize::new(0));
  let (dispatcher, platform) = dispatcher(orders(starts.clone()));

  let done = dispatcher
    .dispatch_service(
      service_event("s-1", "orders", "place", json!({"sku": ""})),
      CancellationToken::new(),
    )
    .await;

  let err = error_of(&done);
  assert!(err.cause().unwrap().contains("sku is required"));
  assert_eq!(starts.load(Ordering::SeqCst), 0);
  assert!(platform.paths().is_empty());
}

#[tokio::test]
async fn test_cancelled_session_fails_fast() {
  let (dispatcher, platform) = dispatcher(orders(Arc::default()));
  let cancel = CancellationToken::new();
  cancel.cancel();

  let done = dispatcher
    .dispatch_service(service_event("s-1", "orders", "place", json!({"sku": "A"})), cancel)
    .await;

  let err = error_of(&done);
  assert!(err.cause().unwrap().contains("execution cancelled"));
  assert!(platform.paths().is_empty());
}

#[tokio::test]
async fn test_replay_with_different_call_fails() {
  let attempts = Arc::new(AtomicUsize::new(0));
  let service = ServiceBuilder::new("flaky")
    .workflow("run", move |ctx: WorkflowContext, _: ()| {
      let attempts = attempts.clone();
      async move {
        let first = match attempts.fetch_add(1, Ordering::SeqCst) {
          0 => "inventory",
          _ => "billing",
        };
        ctx
          .service(first)
          .get()
          .request_reply(TaskOptions::default(), "go", &())
          .await?;
        ctx
          .service("payments")
          .get()
          .request_reply(TaskOptions::default(), "go", &())
          .await?;
        Ok::<_, Halt>(())
      }
    })
    .build();
  let mut registry = ServiceRegistry::new();
  registry.register(service).unwrap();

  let (dispatcher, platform) = dispatcher(registry);
  let event = service_event("s-1", "flaky", "run", Value::Null);

  platform.push(paths::EXEC_SERVICE, json!({"output": 1}));
  platform.push(paths::EXEC_SERVICE, json!({"isAsync": true}));
  assert!(dispatcher.dispatch_service(event.clone(), CancellationToken::new()).await.is_async);

  let done = dispatcher.dispatch_service(event, CancellationToken::new()).await;
  let err = error_of(&done);
  assert!(err.cause().unwrap().contains("replayed with a different target"));
  assert_eq!(platform.paths().len(), 2);
}

#[tokio::test]
async fn test_malformed_event() {
  let (dispatcher, _) = dispatcher(ServiceRegistry::new());

  let done = dispatcher
    .dispatch_json(json!({"unexpected": true}), CancellationToken::new())
    .await;

  match done {
    Completion::Service(done) => {
      let err = error_of(&done);
      assert!(err.cause().unwrap().contains("internal error"));
    }
    other => panic!("expected a service completion, got {:?}", other),
  }
}

#[tokio::test]
async fn test_malformed_api_event() {
  let (dispatcher, platform) = dispatcher(ServiceRegistry::new());

  let done = dispatcher
    .dispatch_json(
      json!({"sessionId": "api-1", "request": {"method": 5, "path": "/orders"}}),
      CancellationToken::new(),
    )
    .await;

  match done {
    Completion::Api(done) => {
      assert_eq!(done.path, "/orders");
      assert_eq!(done.response.status_code, 500);
      assert_eq!(done.response.header["content-type"], "application/json");
      let body: Value = serde_json::from_str(&done.response.body).unwrap();
      assert_eq!(body["errorNo"], 3);
      assert!(body["causeBy"].as_str().unwrap().contains("internal error"));
    }
    other => panic!("expected an api completion, got {:?}", other),
  }
  assert!(platform.paths().is_empty());
}

#[tokio::test]
async fn test_repeated_suspension_is_stable() {
  let starts = Arc::new(AtomicUsize::new(0));
  let (dispatcher, platform) = dispatcher(orders(starts.clone()));
  let event = service_event("s-4", "orders", "place", json!({"sku": "B"}));

  platform.push(paths::EXEC_SERVICE, json!({"isAsync": true}));
  platform.push(paths::EXEC_SERVICE, json!({"isAsync": true}));
  let first = dispatcher.dispatch_service(event.clone(), CancellationToken::new()).await;
  let second = dispatcher.dispatch_service(event, CancellationToken::new()).await;

  assert!(first.is_async);
  assert_eq!(first, second);
  assert_eq!(starts.load(Ordering::SeqCst), 2);
  assert_eq!(platform.paths(), vec![paths::EXEC_SERVICE, paths::EXEC_SERVICE]);
  assert_eq!(platform.body(0), platform.body(1));
  assert!(dispatcher.platform().cache().is_empty());
}

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
  id: String,
  amount: i64,
}

impl HasId for Entry {
  fn id(&self) -> &str {
    &self.id
  }
}

impl Validate for Entry {}

fn ledger() -> ServiceRegistry {
  let service = ServiceBuilder::new("ledger")
    .method("record", |ctx: ServiceContext, entry: Entry| async move {
      ctx
        .logger()
        .info()
        .str("entry", entry.id.clone())
        .int("amount", entry.amount)
        .msg("recording");
      ctx.db().collection("entries").insert_one(&entry).await?;
      Ok::<_, Halt>(())
    })
    .workflow("settle", |ctx: WorkflowContext, _: ()| async move {
      ctx.logger().warn().msg("settling");
      ctx
        .service("payments")
        .get()
        .request_reply(TaskOptions::default(), "settle", &())
        .await?;
      Ok::<_, Halt>(())
    })
    .build();

  let mut registry = ServiceRegistry::new();
  registry.register(service).unwrap();
  registry
}

#[tokio::test]
async fn test_logs_ride_on_completions() {
  let (dispatcher, platform) = dispatcher(ledger());

  let done = dispatcher
    .dispatch_service(
      service_event("s-5", "ledger", "record", json!({"id": "e-1", "amount": 40})),
      CancellationToken::new(),
    )
    .await;
  assert!(done.is_null);
  assert_eq!(done.logs.len(), 1);
  assert_eq!(done.logs[0].level, LogLevel::Info);
  assert_eq!(done.logs[0].message, "recording");
  assert_eq!(done.logs[0].tags["amount"], json!(40));
  assert_eq!(platform.paths(), vec![paths::DB_PUT]);
  assert_eq!(platform.body(0)["key"], "e-1");
  assert_eq!(platform.body(0)["item"]["amount"], 40);

  platform.push(paths::EXEC_SERVICE, json!({"isAsync": true}));
  let done = dispatcher
    .dispatch_service(service_event("s-6", "ledger", "settle", Value::Null), CancellationToken::new())
    .await;
  assert!(done.is_async);
  assert_eq!(done.logs.len(), 1);
  assert_eq!(done.logs[0].level, LogLevel::Warn);
}

fn order_routes() -> Routes {
  Routes::new()
    .workflow(Method::POST, "/orders", |ctx: WorkflowContext, order: Order| async move {
      let res = ctx
        .service("inventory")
        .get()
        .request_reply(TaskOptions::default(), "reserve", &order)
        .await?;
      Ok::<_, Halt>(json!({"sku": order.sku, "reserved": res.get::<bool>()?}))
    })
    .raw(Method::DELETE, "/orders", |_ctx: ApiContext, _req: HttpRequest| async move {
      Err::<polycode_runtime::HttpResponse, _>(Halt::Failed(ERR_BAD_REQUEST.wrap("orders are final")))
    })
    .raw(Method::GET, "/health", |_ctx: ApiContext, _req: HttpRequest| async move {
      Ok::<_, Halt>(json_response(StatusCode::OK, &json!({"ok": true})))
    })
}

async fn call_api(dispatcher: &Dispatcher, event: ApiStartEvent) -> ApiCompleteEvent {
  match dispatcher.dispatch(Event::Api(event), CancellationToken::new()).await {
    Completion::Api(done) => done,
    other => panic!("expected an api completion, got {:?}", other),
  }
}

#[tokio::test]
async fn test_api_routes() {
  let (dispatcher, platform) = dispatcher(ServiceRegistry::new());
  let dispatcher = dispatcher.with_router(Arc::new(order_routes()));

  platform.push(paths::EXEC_SERVICE, json!({"output": true}));
  let done = call_api(&dispatcher, api_event("POST", "/orders", r#"{"sku":"A"}"#)).await;
  assert_eq!(done.path, "/orders");
  assert_eq!(done.response.status_code, 200);
  let body: Value = serde_json::from_str(&done.response.body).unwrap();
  assert_eq!(body, json!({"sku": "A", "reserved": true}));

  let done = call_api(&dispatcher, api_event("GET", "/health", "")).await;
  assert_eq!(done.response.status_code, 200);

  let done = call_api(&dispatcher, api_event("GET", "/missing", "")).await;
  assert_eq!(done.response.status_code, 404);
  assert_eq!(done.response.body, r#"{"error":"Not found"}"#);

  let done = call_api(&dispatcher, api_event("POST", "/orders", r#"{"sku":""}"#)).await;
  assert_eq!(done.response.status_code, 400);
}

#[tokio::test]
async fn test_api_suspension_and_failure() {
  let (dispatcher, platform) = dispatcher(ServiceRegistry::new());
  let dispatcher = dispatcher.with_router(Arc::new(order_routes()));

  platform.push(paths::EXEC_SERVICE, json!({"isAsync": true}));
  let done = call_api(&dispatcher, api_event("POST", "/orders", r#"{"sku":"A"}"#)).await;
  assert_eq!(done.response.status_code, 202);
  assert!(done.response.body.is_empty());

  let done = call_api(&dispatcher, api_event("DELETE", "/orders", "")).await;
  assert_eq!(done.response.status_code, 500);
  assert_eq!(done.response.header["content-type"], "application/json");
  let body: Value = serde_json::from_str(&done.response.body).unwrap();
  assert_eq!(body["errorNo"], 3);
  assert!(body["causeBy"].as_str().unwrap().contains("orders are final"));
}

#[tokio::test]
async fn test_api_without_router() {
  let (dispatcher, _) = dispatcher(ServiceRegistry::new());
  let done = call_api(&dispatcher, api_event("GET", "/health", "")).await;
  assert_eq!(done.response.status_code, 500);
}

#[tokio::test]
async fn test_announce() {
  let (dispatcher, platform) = dispatcher(orders(Arc::default()));
  let dispatcher = dispatcher.with_router(Arc::new(order_routes()));

  dispatcher.announce("shop", 9998).await.unwrap();

  assert_eq!(platform.paths(), vec![paths::START_APP]);
  let body = platform.body(0);
  assert_eq!(body["appName"], "shop");
  assert_eq!(body["appPort"], 9998);
  assert_eq!(body["apiHandler"], polycode_runtime::INVOKE_API_PATH);
  assert_eq!(body["services"][0]["name"], "orders");
  assert_eq!(body["services"][0]["tasks"].as_array().unwrap().len(), 3);
  assert_eq!(body["routes"].as_array().unwrap().len(), 3);
  assert_eq!(body["routes"][0], json!({"method": "GET", "path": "/health"}));
}
