//! Proxies for calling other services, apps and controllers.

use polycode_client::{
  ApiRequest, ApiResponse, ERR_INTERNAL, Error, ExecApiRequest, ExecAppRequest,
  ExecServiceRequest, ExecServiceResponse, TaskOptions,
};
use serde::Serialize;
use tracing::debug;

use crate::context::{BaseContext, SlotOutcome, WorkflowContext};
use crate::halt::Halt;
use crate::response::Response;

impl WorkflowContext {
  /// Call a service in the default environment.
  pub fn service(&self, service: impl Into<String>) -> RemoteServiceBuilder {
    let env_id = self.default_env_id().to_string();
    self.service_ex(env_id, service)
  }

  pub fn service_ex(
    &self,
    env_id: impl Into<String>,
    service: impl Into<String>,
  ) -> RemoteServiceBuilder {
    RemoteServiceBuilder {
      ctx: (**self).clone(),
      env_id: env_id.into(),
      service: service.into(),
      tenant_id: String::new(),
      partition_key: String::new(),
    }
  }

  /// Call another app in the default environment.
  pub fn app(&self, app_name: impl Into<String>) -> RemoteApp {
    let env_id = self.default_env_id().to_string();
    self.app_ex(env_id, app_name)
  }

  pub fn app_ex(&self, env_id: impl Into<String>, app_name: impl Into<String>) -> RemoteApp {
    RemoteApp {
      ctx: (**self).clone(),
      env_id: env_id.into(),
      app_name: app_name.into(),
    }
  }

  /// Call an API controller in the default environment.
  pub fn controller(&self, controller: impl Into<String>) -> RemoteController {
    let env_id = self.default_env_id().to_string();
    self.controller_ex(env_id, controller)
  }

  pub fn controller_ex(
    &self,
    env_id: impl Into<String>,
    controller: impl Into<String>,
  ) -> RemoteController {
    RemoteController {
      ctx: (**self).clone(),
      env_id: env_id.into(),
      controller: controller.into(),
    }
  }
}

pub struct RemoteServiceBuilder {
  ctx: BaseContext,
  env_id: String,
  service: String,
  tenant_id: String,
  partition_key: String,
}

impl RemoteServiceBuilder {
  pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
    self.tenant_id = tenant_id.into();
    self
  }

  pub fn with_partition_key(mut self, partition_key: impl Into<String>) -> Self {
    self.partition_key = partition_key.into();
    self
  }

  pub fn get(self) -> RemoteService {
    RemoteService {
      ctx: self.ctx,
      env_id: self.env_id,
      service: self.service,
      tenant_id: self.tenant_id,
      partition_key: self.partition_key,
    }
  }
}

pub struct RemoteService {
  ctx: BaseContext,
  env_id: String,
  service: String,
  tenant_id: String,
  partition_key: String,
}

impl RemoteService {
  /// Call `method` and wait for its result.
  ///
  /// Returns `Err(Halt::Suspended)` while the platform has no result yet.
  /// Failures of the remote method and of the transport come back as an
  /// error [`Response`].
  pub async fn request_reply<T: Serialize + ?Sized>(
    &self,
    options: TaskOptions,
    method: &str,
    input: &T,
  ) -> Result<Response, Halt> {
    let target = format!("service:{}/{}.{}", self.env_id, self.service, method);
    let req = self.request(options, method, input, false)?;

    self
      .ctx
      .call_slot(&target, false, |seq| async move {
        debug!(slot = seq, service = %self.service, method = %method, "calling service");
        reply_outcome(self.ctx.client().exec_service(self.ctx.session_id(), &req).await)
      })
      .await
  }

  /// Call `method` without waiting for its result. Never suspends.
  pub async fn send<T: Serialize + ?Sized>(
    &self,
    options: TaskOptions,
    method: &str,
    input: &T,
  ) -> Result<(), Error> {
    self.ctx.ensure_active()?;
    let req = self.request(options, method, input, true)?;
    debug!(service = %self.service, method = %method, "sending to service");
    let res = self.ctx.client().exec_service(self.ctx.session_id(), &req).await?;
    send_outcome(res)
  }

  fn request<T: Serialize + ?Sized>(
    &self,
    options: TaskOptions,
    method: &str,
    input: &T,
    fire_and_forget: bool,
  ) -> Result<ExecServiceRequest, Error> {
    Ok(ExecServiceRequest {
      env_id: self.env_id.clone(),
      service: self.service.clone(),
      tenant_id: self.tenant_id.clone(),
      partition_key: self.partition_key.clone(),
      method: method.to_string(),
      options,
      fire_and_forget,
      input: encode_input(input)?,
    })
  }
}

pub struct RemoteApp {
  ctx: BaseContext,
  env_id: String,
  app_name: String,
}

impl RemoteApp {
  /// Call `method` on the app and wait for its result. See
  /// [`RemoteService::request_reply`].
  pub async fn request_reply<T: Serialize + ?Sized>(
    &self,
    options: TaskOptions,
    method: &str,
    input: &T,
  ) -> Result<Response, Halt> {
    let target = format!("app:{}/{}.{}", self.env_id, self.app_name, method);
    let req = self.request(options, method, input, false)?;

    self
      .ctx
      .call_slot(&target, false, |seq| async move {
        debug!(slot = seq, app = %self.app_name, method = %method, "calling app");
        reply_outcome(self.ctx.client().exec_app(self.ctx.session_id(), &req).await)
      })
      .await
  }

  pub async fn send<T: Serialize + ?Sized>(
    &self,
    options: TaskOptions,
    method: &str,
    input: &T,
  ) -> Result<(), Error> {
    self.ctx.ensure_active()?;
    let req = self.request(options, method, input, true)?;
    debug!(app = %self.app_name, method = %method, "sending to app");
    let res = self.ctx.client().exec_app(self.ctx.session_id(), &req).await?;
    send_outcome(res)
  }

  fn request<T: Serialize + ?Sized>(
    &self,
    options: TaskOptions,
    method: &str,
    input: &T,
    fire_and_forget: bool,
  ) -> Result<ExecAppRequest, Error> {
    Ok(ExecAppRequest {
      env_id: self.env_id.clone(),
      app_name: self.app_name.clone(),
      method: method.to_string(),
      options,
      fire_and_forget,
      input: encode_input(input)?,
    })
  }
}

pub struct RemoteController {
  ctx: BaseContext,
  env_id: String,
  controller: String,
}

impl RemoteController {
  /// Send `request` to `path` on the controller and wait for the response.
  ///
  /// Unlike service calls, a failed call is a [`Halt::Failed`], since there
  /// is no HTTP response to hand back.
  pub async fn call(
    &self,
    options: TaskOptions,
    path: &str,
    request: ApiRequest,
  ) -> Result<ApiResponse, Halt> {
    let target = format!("controller:{}/{}{}", self.env_id, self.controller, path);
    let req = ExecApiRequest {
      env_id: self.env_id.clone(),
      controller: self.controller.clone(),
      path: path.to_string(),
      options,
      request,
    };

    let response = self
      .ctx
      .call_slot(&target, false, |seq| async move {
        debug!(slot = seq, controller = %self.controller, path = %path, "calling controller");
        match self.ctx.client().exec_api(self.ctx.session_id(), &req).await {
          Err(err) if err.is_in_progress() => Err(Halt::Suspended),
          Err(err) => Ok(SlotOutcome::Transient(Response::error(err))),
          Ok(res) if res.is_async => Err(Halt::Suspended),
          Ok(res) if res.is_error => Ok(SlotOutcome::Recorded(Response::error(
            res.error.unwrap_or(ERR_INTERNAL),
          ))),
          Ok(res) => Ok(SlotOutcome::Recorded(Response::from_serialize(&res.response))),
        }
      })
      .await?;

    Ok(response.get::<ApiResponse>()?)
  }
}

pub(crate) fn encode_input<T: Serialize + ?Sized>(input: &T) -> Result<serde_json::Value, Error> {
  serde_json::to_value(input).map_err(|e| ERR_INTERNAL.wrap(&e))
}

/// Classify the reply to a suspending service or app call.
fn reply_outcome(reply: Result<ExecServiceResponse, Error>) -> Result<SlotOutcome, Halt> {
  match reply {
    Err(err) if err.is_in_progress() => Err(Halt::Suspended),
    Err(err) => Ok(SlotOutcome::Transient(Response::error(err))),
    Ok(res) if res.is_async => Err(Halt::Suspended),
    Ok(res) => Ok(SlotOutcome::Recorded(Response::from_reply(
      res.output,
      res.is_error,
      res.error,
    ))),
  }
}

fn send_outcome(res: ExecServiceResponse) -> Result<(), Error> {
  if res.is_error {
    return Err(res.error.unwrap_or(ERR_INTERNAL));
  }
  Ok(())
}
