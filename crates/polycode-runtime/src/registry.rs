//! Registered services and their typed methods.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use polycode_client::{
  ERR_BAD_REQUEST, ERR_INTERNAL, ERR_METHOD_NOT_FOUND, ERR_SERVICE_NOT_FOUND, Error,
  MethodDescription, ServiceDescription,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::info;

use crate::context::{ServiceContext, WorkflowContext};
use crate::halt::Halt;
use crate::response::decode_value;

/// Decoded, validated input for one method call.
pub struct Input(Box<dyn Any + Send>);

impl Input {
  pub fn new<T: Any + Send>(value: T) -> Self {
    Self(Box::new(value))
  }

  pub fn downcast<T: Any>(self) -> Result<T, Error> {
    self
      .0
      .downcast::<T>()
      .map(|value| *value)
      .map_err(|_| ERR_INTERNAL.wrap(&format!("input is not a {}", std::any::type_name::<T>())))
  }
}

/// Checks run on a decoded input before the handler sees it.
pub trait Validate {
  fn validate(&self) -> Result<(), Error> {
    Ok(())
  }
}

macro_rules! accept_all {
  ($($ty:ty),* $(,)?) => {
    $(impl Validate for $ty {})*
  };
}

accept_all!(
  (),
  bool,
  String,
  Value,
  i32,
  i64,
  u32,
  u64,
  f64
);

impl<T: Validate> Validate for Option<T> {
  fn validate(&self) -> Result<(), Error> {
    match self {
      Some(value) => value.validate(),
      None => Ok(()),
    }
  }
}

impl<T: Validate> Validate for Vec<T> {
  fn validate(&self) -> Result<(), Error> {
    self.iter().try_for_each(Validate::validate)
  }
}

/// A named set of methods the dispatcher can run.
#[async_trait]
pub trait Service: Send + Sync {
  fn name(&self) -> &str;

  /// Whether `method` runs with a [`WorkflowContext`]. False for unknown
  /// methods.
  fn is_workflow(&self, method: &str) -> bool;

  /// Decode and validate the input for `method`.
  ///
  /// Fails with method-not-found for unknown methods and with bad-request
  /// for input that does not decode or validate.
  fn decode_input(&self, method: &str, input: Value) -> Result<Input, Error>;

  async fn execute_service(
    &self,
    ctx: ServiceContext,
    method: &str,
    input: Input,
  ) -> Result<Option<Value>, Halt>;

  async fn execute_workflow(
    &self,
    ctx: WorkflowContext,
    method: &str,
    input: Input,
  ) -> Result<Option<Value>, Halt>;

  fn describe(&self) -> ServiceDescription;
}

type MethodFuture = BoxFuture<'static, Result<Option<Value>, Halt>>;
type Decoder = Box<dyn Fn(Value) -> Result<Input, Error> + Send + Sync>;

enum Handler {
  Service(Box<dyn Fn(ServiceContext, Input) -> MethodFuture + Send + Sync>),
  Workflow(Box<dyn Fn(WorkflowContext, Input) -> MethodFuture + Send + Sync>),
}

struct Method {
  description: String,
  decode: Decoder,
  handler: Handler,
}

/// Builds a [`Service`] from typed async closures.
///
/// Inputs are decoded from JSON (string-encoded JSON is accepted) and run
/// through [`Validate`]. Outputs are encoded to JSON; an output that encodes
/// to `null`, such as `()` or `None`, is reported as a null result.
pub struct ServiceBuilder {
  name: String,
  methods: BTreeMap<String, Method>,
}

impl ServiceBuilder {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      methods: BTreeMap::new(),
    }
  }

  /// Add a plain service method.
  pub fn method<I, O, F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
  where
    I: DeserializeOwned + Validate + Send + 'static,
    O: Serialize + Send + 'static,
    F: Fn(ServiceContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, Halt>> + Send + 'static,
  {
    let handler = Handler::Service(Box::new(move |ctx, input: Input| -> MethodFuture {
      match input.downcast::<I>() {
        Ok(input) => {
          let fut = handler(ctx, input);
          Box::pin(async move { encode_output(&fut.await?) })
        }
        Err(err) => Box::pin(futures::future::ready(Err(Halt::Failed(err)))),
      }
    }));
    self.insert::<I>(name.into(), handler);
    self
  }

  /// Add a workflow method. Workflow methods may make suspending calls.
  pub fn workflow<I, O, F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
  where
    I: DeserializeOwned + Validate + Send + 'static,
    O: Serialize + Send + 'static,
    F: Fn(WorkflowContext, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, Halt>> + Send + 'static,
  {
    let handler = Handler::Workflow(Box::new(move |ctx, input: Input| -> MethodFuture {
      match input.downcast::<I>() {
        Ok(input) => {
          let fut = handler(ctx, input);
          Box::pin(async move { encode_output(&fut.await?) })
        }
        Err(err) => Box::pin(futures::future::ready(Err(Halt::Failed(err)))),
      }
    }));
    self.insert::<I>(name.into(), handler);
    self
  }

  /// Set the description announced for method `name`.
  pub fn describe_method(mut self, name: &str, description: impl Into<String>) -> Self {
    if let Some(method) = self.methods.get_mut(name) {
      method.description = description.into();
    }
    self
  }

  pub fn build(self) -> TypedService {
    TypedService {
      name: self.name,
      methods: self.methods,
    }
  }

  fn insert<I>(&mut self, name: String, handler: Handler)
  where
    I: DeserializeOwned + Validate + Send + 'static,
  {
    let decode: Decoder = Box::new(|value| {
      let input: I = decode_value(value).map_err(|e| ERR_BAD_REQUEST.wrap(&e))?;
      input.validate().map_err(|e| {
        if e.is(&ERR_BAD_REQUEST) {
          e
        } else {
          ERR_BAD_REQUEST.wrap(&e)
        }
      })?;
      Ok(Input::new(input))
    });

    self.methods.insert(
      name,
      Method {
        description: String::new(),
        decode,
        handler,
      },
    );
  }
}

fn encode_output<O: Serialize>(output: &O) -> Result<Option<Value>, Halt> {
  match serde_json::to_value(output) {
    Ok(Value::Null) => Ok(None),
    Ok(value) => Ok(Some(value)),
    Err(e) => Err(Halt::Failed(ERR_INTERNAL.wrap(&e))),
  }
}

/// A [`Service`] made by [`ServiceBuilder`].
pub struct TypedService {
  name: String,
  methods: BTreeMap<String, Method>,
}

impl TypedService {
  fn method(&self, method: &str) -> Result<&Method, Error> {
    self
      .methods
      .get(method)
      .ok_or_else(|| ERR_METHOD_NOT_FOUND.with([method, self.name.as_str()]))
  }
}

#[async_trait]
impl Service for TypedService {
  fn name(&self) -> &str {
    &self.name
  }

  fn is_workflow(&self, method: &str) -> bool {
    matches!(
      self.methods.get(method),
      Some(Method {
        handler: Handler::Workflow(_),
        ..
      })
    )
  }

  fn decode_input(&self, method: &str, input: Value) -> Result<Input, Error> {
    (self.method(method)?.decode)(input)
  }

  async fn execute_service(
    &self,
    ctx: ServiceContext,
    method: &str,
    input: Input,
  ) -> Result<Option<Value>, Halt> {
    match &self.method(method)?.handler {
      Handler::Service(handler) => handler(ctx, input).await,
      Handler::Workflow(_) => Err(Halt::Failed(
        ERR_BAD_REQUEST.wrap(&format!("{} is a workflow method", method)),
      )),
    }
  }

  async fn execute_workflow(
    &self,
    ctx: WorkflowContext,
    method: &str,
    input: Input,
  ) -> Result<Option<Value>, Halt> {
    match &self.method(method)?.handler {
      Handler::Workflow(handler) => handler(ctx, input).await,
      Handler::Service(_) => Err(Halt::Failed(
        ERR_BAD_REQUEST.wrap(&format!("{} is not a workflow method", method)),
      )),
    }
  }

  fn describe(&self) -> ServiceDescription {
    ServiceDescription {
      name: self.name.clone(),
      tasks: self
        .methods
        .iter()
        .map(|(name, method)| MethodDescription {
          name: name.clone(),
          description: method.description.clone(),
          is_workflow: matches!(method.handler, Handler::Workflow(_)),
          input: Value::Null,
        })
        .collect(),
    }
  }
}

/// Services by name. Built before dispatching starts, read-only after.
#[derive(Default, Clone)]
pub struct ServiceRegistry {
  services: HashMap<String, Arc<dyn Service>>,
}

impl ServiceRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add `service`, replacing nothing: a second service with the same name
  /// is rejected.
  pub fn register(&mut self, service: impl Service + 'static) -> Result<(), Error> {
    let name = service.name().to_string();
    if self.services.contains_key(&name) {
      return Err(ERR_BAD_REQUEST.wrap(&format!("service [{}] already registered", name)));
    }
    info!(service = %name, "service_registered");
    self.services.insert(name, Arc::new(service));
    Ok(())
  }

  pub fn get(&self, name: &str) -> Result<Arc<dyn Service>, Error> {
    self
      .services
      .get(name)
      .cloned()
      .ok_or_else(|| ERR_SERVICE_NOT_FOUND.with([name]))
  }

  /// Descriptions of every service, sorted by name.
  pub fn describe(&self) -> Vec<ServiceDescription> {
    let mut descriptions: Vec<_> = self.services.values().map(|s| s.describe()).collect();
    descriptions.sort_by(|a, b| a.name.cmp(&b.name));
    descriptions
  }

  pub fn len(&self) -> usize {
    self.services.len()
  }

  pub fn is_empty(&self) -> bool {
    self.services.is_empty()
  }
}
