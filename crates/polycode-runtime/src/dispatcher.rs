//! Continuation engine.
//!
//! The [`Dispatcher`] takes one inbound event, resolves its handler, builds
//! the matching context and runs it. Whatever happens inside the handler is
//! classified into an [`Outcome`] and encoded as the completion the platform
//! expects:
//!
//! - `Completed` becomes a success completion (`isNull` for no value).
//! - `Failed` becomes an error completion wrapped in the execution-error
//!   envelope, keeping the inner retry flag.
//! - `Suspended` becomes the no-op completion (`isAsync`), and the platform
//!   replays the event once the pending call resolves.
//!
//! Handler panics are caught here and reported as internal failures. Lines
//! the handler logged ride along on every completion, whatever the outcome.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use http::StatusCode;
use polycode_client::{
  ApiCompleteEvent, ApiStartEvent, ERR_BAD_REQUEST, ERR_INTERNAL, ERR_TASK_EXEC_ERROR, Error,
  ServiceCompleteEvent, ServiceMeta, ServiceStartEvent, StartAppRequest,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::api::{ApiRouter, HttpResponse, from_http_response, to_http_request};
use crate::context::{ApiContext, BaseContext, Platform, ServiceContext, WorkflowContext};
use crate::halt::{Halt, Outcome};
use crate::logger::LogBuffer;
use crate::registry::ServiceRegistry;

/// Path on the app server that receives API events.
pub const INVOKE_API_PATH: &str = "v1/invoke/api";
/// Path on the app server that receives service events.
pub const INVOKE_SERVICE_PATH: &str = "v1/invoke/service";

/// An inbound event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Event {
  Api(ApiStartEvent),
  Service(ServiceStartEvent),
}

/// What the dispatcher reports back for an [`Event`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Completion {
  Service(ServiceCompleteEvent),
  Api(ApiCompleteEvent),
}

/// Runs events against a [`ServiceRegistry`] and an optional API router.
pub struct Dispatcher {
  registry: Arc<ServiceRegistry>,
  router: Option<Arc<dyn ApiRouter>>,
  platform: Platform,
}

impl Dispatcher {
  pub fn new(registry: Arc<ServiceRegistry>, platform: Platform) -> Self {
    Self {
      registry,
      router: None,
      platform,
    }
  }

  pub fn with_router(mut self, router: Arc<dyn ApiRouter>) -> Self {
    self.router = Some(router);
    self
  }

  pub fn platform(&self) -> &Platform {
    &self.platform
  }

  /// The announcement sent to the platform when the app starts.
  pub fn start_app_request(&self, app_name: &str, app_port: u16) -> StartAppRequest {
    let (api_handler, routes) = match &self.router {
      Some(router) => (INVOKE_API_PATH.to_string(), router.routes()),
      None => (String::new(), Vec::new()),
    };

    StartAppRequest {
      app_name: app_name.to_string(),
      app_port,
      services: self.registry.describe(),
      api_handler,
      routes,
    }
  }

  /// Announce this app, its services and its routes to the platform.
  pub async fn announce(&self, app_name: &str, app_port: u16) -> Result<(), Error> {
    let req = self.start_app_request(app_name, app_port);
    info!(
      app_name = %app_name,
      services = req.services.len(),
      routes = req.routes.len(),
      "app_started"
    );
    self.platform.client().start_app(&req).await
  }

  pub async fn dispatch(&self, event: Event, cancel: CancellationToken) -> Completion {
    match event {
      Event::Service(event) => Completion::Service(self.dispatch_service(event, cancel).await),
      Event::Api(event) => Completion::Api(self.dispatch_api(event, cancel).await),
    }
  }

  /// Dispatch a raw inbound JSON event. Malformed events fail as internal
  /// errors, reported as an API completion when the event carries a
  /// `request` and as a service completion otherwise.
  pub async fn dispatch_json(&self, raw: Value, cancel: CancellationToken) -> Completion {
    match Event::deserialize(&raw) {
      Ok(event) => self.dispatch(event, cancel).await,
      Err(e) => {
        error!(error = %e, "malformed event");
        let err = ERR_INTERNAL.wrap(&e);
        match raw.get("request") {
          Some(request) => Completion::Api(ApiCompleteEvent {
            path: request
              .get("path")
              .and_then(Value::as_str)
              .unwrap_or_default()
              .to_string(),
            response: from_http_response(failed_response(&err)),
            logs: Vec::new(),
          }),
          None => Completion::Service(failed_completion(err, false)),
        }
      }
    }
  }

  #[instrument(
    name = "dispatch_service",
    skip(self, event, cancel),
    fields(
      session_id = %event.session_id,
      service = %event.service,
      method = %event.method,
    )
  )]
  pub async fn dispatch_service(
    &self,
    event: ServiceStartEvent,
    cancel: CancellationToken,
  ) -> ServiceCompleteEvent {
    info!("task_started");

    let logs = LogBuffer::default();
    let (outcome, is_workflow) = self.execute_service(event, cancel, logs.clone()).await;
    let meta = ServiceMeta { is_workflow };

    let done = match outcome {
      Outcome::Completed(output) => {
        info!(is_null = output.is_none(), "task_completed");
        ServiceCompleteEvent {
          is_null: output.is_none(),
          output: output.unwrap_or(Value::Null),
          meta,
          ..Default::default()
        }
      }
      Outcome::Suspended => {
        info!("task_suspended");
        ServiceCompleteEvent {
          is_async: true,
          meta,
          ..Default::default()
        }
      }
      Outcome::Failed(err) => {
        error!(error = %err, "task_failed");
        failed_completion(err, is_workflow)
      }
    };

    ServiceCompleteEvent {
      logs: logs.drain(),
      ..done
    }
  }

  /// Resolve, decode and run a service event, returning its outcome and
  /// whether the method is a workflow.
  pub async fn run_service(
    &self,
    event: ServiceStartEvent,
    cancel: CancellationToken,
  ) -> (Outcome, bool) {
    self
      .execute_service(event, cancel, LogBuffer::default())
      .await
  }

  async fn execute_service(
    &self,
    event: ServiceStartEvent,
    cancel: CancellationToken,
    logs: LogBuffer,
  ) -> (Outcome, bool) {
    let service = match self.registry.get(&event.service) {
      Ok(service) => service,
      Err(err) => return (Outcome::Failed(err), false),
    };

    let input = match service.decode_input(&event.method, event.input) {
      Ok(input) => input,
      Err(err) => return (Outcome::Failed(err), false),
    };

    let is_workflow = service.is_workflow(&event.method);
    let base = BaseContext::new(
      event.session_id,
      event.meta,
      self.platform.clone(),
      cancel,
      logs,
    );
    let method = event.method.as_str();

    let run = async {
      if is_workflow {
        service
          .execute_workflow(WorkflowContext::new(base), method, input)
          .await
      } else {
        service
          .execute_service(ServiceContext::new(base), method, input)
          .await
      }
    };

    (guard(run).await, is_workflow)
  }

  #[instrument(
    name = "dispatch_api",
    skip(self, event, cancel),
    fields(
      session_id = %event.session_id,
      method = %event.request.method,
      path = %event.request.path,
    )
  )]
  pub async fn dispatch_api(&self, event: ApiStartEvent, cancel: CancellationToken) -> ApiCompleteEvent {
    info!("task_started");

    let path = event.request.path.clone();
    let logs = LogBuffer::default();
    let response = match self.run_api(event, cancel, logs.clone()).await {
      Ok(response) => {
        info!(status = response.status().as_u16(), "task_completed");
        from_http_response(response)
      }
      Err(Halt::Suspended) => {
        info!("task_suspended");
        from_http_response(empty_response(StatusCode::ACCEPTED))
      }
      Err(Halt::Failed(err)) => {
        error!(error = %err, "task_failed");
        from_http_response(failed_response(&err))
      }
    };

    ApiCompleteEvent {
      path,
      response,
      logs: logs.drain(),
    }
  }

  async fn run_api(
    &self,
    event: ApiStartEvent,
    cancel: CancellationToken,
    logs: LogBuffer,
  ) -> Result<HttpResponse, Halt> {
    let router = self
      .router
      .clone()
      .ok_or_else(|| ERR_BAD_REQUEST.wrap("no api router configured"))?;
    let request = to_http_request(&event.request)?;
    let ctx = ApiContext::new(BaseContext::new(
      event.session_id,
      event.meta,
      self.platform.clone(),
      cancel,
      logs,
    ));

    let run = async move { router.route(ctx, request).await };
    match AssertUnwindSafe(run).catch_unwind().await {
      Ok(Err(halt)) if halt.is_suspended() => Err(Halt::Suspended),
      Ok(result) => result,
      Err(panic) => Err(panic_halt(panic)),
    }
  }
}

/// Run a handler future, turning panics into halts.
async fn guard<F>(run: F) -> Outcome
where
  F: std::future::Future<Output = Result<Option<Value>, Halt>>,
{
  match AssertUnwindSafe(run).catch_unwind().await {
    Ok(result) => Outcome::from(result),
    Err(panic) => Outcome::from(Err(panic_halt(panic))),
  }
}

/// A panic carrying the in-progress sentinel still suspends; any other
/// panic is an internal failure.
fn panic_halt(payload: Box<dyn Any + Send>) -> Halt {
  if let Some(err) = payload.downcast_ref::<Error>() {
    return Halt::from(err.clone());
  }
  let message = extract_panic_message(payload.as_ref());
  error!(panic = %message, "handler panicked");
  Halt::Failed(ERR_INTERNAL.wrap(&format!("panic: {}", message)))
}

fn extract_panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}

fn failed_completion(err: Error, is_workflow: bool) -> ServiceCompleteEvent {
  let envelope = ERR_TASK_EXEC_ERROR.wrap(&err).retry(err.is_retryable());
  ServiceCompleteEvent {
    is_error: true,
    error: Some(envelope),
    meta: ServiceMeta { is_workflow },
    ..Default::default()
  }
}

/// The 500 response carrying the execution-error envelope.
fn failed_response(err: &Error) -> HttpResponse {
  let envelope = ERR_TASK_EXEC_ERROR.wrap(err).retry(err.is_retryable());
  let mut res = empty_response(StatusCode::INTERNAL_SERVER_ERROR);
  *res.body_mut() = envelope.to_json().into_bytes();
  res.headers_mut().insert(
    http::header::CONTENT_TYPE,
    http::HeaderValue::from_static("application/json"),
  );
  res
}

fn empty_response(status: StatusCode) -> HttpResponse {
  let mut res = http::Response::new(Vec::new());
  *res.status_mut() = status;
  res
}
