//! Typed calls to the platform sidecar.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{ERR_HTTP_STATUS, ERR_INTERNAL, Error};
use crate::model::{
  CreateFolderRequest, ErrorEvent, ExecApiRequest, ExecApiResponse, ExecAppRequest,
  ExecAppResponse, ExecFuncRequest, ExecFuncResponse, ExecFuncResult, ExecServiceRequest,
  ExecServiceResponse, FileKeyRequest, GetFileResponse, GetLinkResponse, IncrementCounterRequest,
  IncrementCounterResponse, ListFilePageRequest, ListFilePageResponse, PutFileRequest, PutRequest,
  QueryRequest, RealtimeEventEmitRequest, RenameFileRequest, SignalEmitRequest, SignalWaitRequest,
  SignalWaitResponse, StartAppRequest, UnsafePutRequest, UnsafeQueryRequest,
};
use crate::transport::Transport;

/// Platform endpoints, relative to the sidecar base url.
pub mod paths {
  pub const START_APP: &str = "v1/system/app/start";
  pub const EXEC_SERVICE: &str = "v1/context/service/exec";
  pub const EXEC_APP: &str = "v1/context/app/exec";
  pub const EXEC_API: &str = "v1/context/api/exec";
  pub const EXEC_FUNC: &str = "v1/context/func/exec";
  pub const EXEC_FUNC_RESULT: &str = "v1/context/func/exec/result";
  pub const SIGNAL_EMIT: &str = "v1/context/signal/emit";
  pub const SIGNAL_AWAIT: &str = "v1/context/signal/await";
  pub const REALTIME_EMIT: &str = "v1/realtime/event/emit";
  pub const COUNTER_INCREMENT: &str = "v1/utils/counter/increment";
  pub const ACKNOWLEDGE: &str = "v1/context/acknowledge";

  pub const DB_GET: &str = "v1/context/db/get";
  pub const DB_UNSAFE_GET: &str = "v1/context/db/unsafe-get";
  pub const DB_QUERY: &str = "v1/context/db/query";
  pub const DB_UNSAFE_QUERY: &str = "v1/context/db/unsafe-query";
  pub const DB_PUT: &str = "v1/context/db/put";
  pub const DB_UNSAFE_PUT: &str = "v1/context/db/unsafe-put";

  pub const FILE_GET: &str = "v1/context/file/get";
  pub const FILE_DOWNLOAD_LINK: &str = "v1/context/file/get-download-link";
  pub const FILE_PUT: &str = "v1/context/file/put";
  pub const FILE_UPLOAD_LINK: &str = "v1/context/file/get-upload-link";
  pub const FILE_DELETE: &str = "v1/context/file/delete";
  pub const FILE_RENAME: &str = "v1/context/file/rename";
  pub const FILE_LIST: &str = "v1/context/file/list";
  pub const FILE_CREATE_FOLDER: &str = "v1/context/file/create-folder";
}

/// Client for the platform's context API.
///
/// The client never interprets `isAsync`; deciding whether a reply means
/// "suspend" belongs to the call proxies.
#[derive(Clone)]
pub struct ServiceClient {
  transport: Arc<dyn Transport>,
}

impl ServiceClient {
  pub fn new(transport: Arc<dyn Transport>) -> Self {
    Self { transport }
  }

  pub async fn start_app(&self, req: &StartAppRequest) -> Result<(), Error> {
    self.send(paths::START_APP, "", req).await
  }

  pub async fn exec_service(
    &self,
    session_id: &str,
    req: &ExecServiceRequest,
  ) -> Result<ExecServiceResponse, Error> {
    self.call(paths::EXEC_SERVICE, session_id, req).await
  }

  pub async fn exec_app(
    &self,
    session_id: &str,
    req: &ExecAppRequest,
  ) -> Result<ExecAppResponse, Error> {
    self.call(paths::EXEC_APP, session_id, req).await
  }

  pub async fn exec_api(
    &self,
    session_id: &str,
    req: &ExecApiRequest,
  ) -> Result<ExecApiResponse, Error> {
    self.call(paths::EXEC_API, session_id, req).await
  }

  pub async fn exec_func(
    &self,
    session_id: &str,
    req: &ExecFuncRequest,
  ) -> Result<ExecFuncResponse, Error> {
    self.call(paths::EXEC_FUNC, session_id, req).await
  }

  pub async fn exec_func_result(&self, session_id: &str, req: &ExecFuncResult) -> Result<(), Error> {
    self.send(paths::EXEC_FUNC_RESULT, session_id, req).await
  }

  pub async fn emit_signal(&self, session_id: &str, req: &SignalEmitRequest) -> Result<(), Error> {
    self.send(paths::SIGNAL_EMIT, session_id, req).await
  }

  pub async fn wait_for_signal(
    &self,
    session_id: &str,
    req: &SignalWaitRequest,
  ) -> Result<SignalWaitResponse, Error> {
    self.call(paths::SIGNAL_AWAIT, session_id, req).await
  }

  pub async fn emit_realtime_event(
    &self,
    session_id: &str,
    req: &RealtimeEventEmitRequest,
  ) -> Result<(), Error> {
    self.send(paths::REALTIME_EMIT, session_id, req).await
  }

  pub async fn increment_counter(
    &self,
    session_id: &str,
    req: &IncrementCounterRequest,
  ) -> Result<IncrementCounterResponse, Error> {
    self.call(paths::COUNTER_INCREMENT, session_id, req).await
  }

  pub async fn acknowledge(&self, session_id: &str) -> Result<(), Error> {
    self
      .send(paths::ACKNOWLEDGE, session_id, &serde_json::Value::Null)
      .await
  }

  /// Fetch one item. A `null` reply means no such item.
  pub async fn get_item(
    &self,
    session_id: &str,
    req: &QueryRequest,
  ) -> Result<Option<serde_json::Value>, Error> {
    self.call(paths::DB_GET, session_id, req).await
  }

  pub async fn unsafe_get_item(
    &self,
    session_id: &str,
    req: &UnsafeQueryRequest,
  ) -> Result<Option<serde_json::Value>, Error> {
    self.call(paths::DB_UNSAFE_GET, session_id, req).await
  }

  pub async fn query_items(
    &self,
    session_id: &str,
    req: &QueryRequest,
  ) -> Result<Vec<serde_json::Value>, Error> {
    let items: Option<Vec<serde_json::Value>> = self.call(paths::DB_QUERY, session_id, req).await?;
    Ok(items.unwrap_or_default())
  }

  pub async fn unsafe_query_items(
    &self,
    session_id: &str,
    req: &UnsafeQueryRequest,
  ) -> Result<Vec<serde_json::Value>, Error> {
    let items: Option<Vec<serde_json::Value>> =
      self.call(paths::DB_UNSAFE_QUERY, session_id, req).await?;
    Ok(items.unwrap_or_default())
  }

  pub async fn put_item(&self, session_id: &str, req: &PutRequest) -> Result<(), Error> {
    self.send(paths::DB_PUT, session_id, req).await
  }

  pub async fn unsafe_put_item(&self, session_id: &str, req: &UnsafePutRequest) -> Result<(), Error> {
    self.send(paths::DB_UNSAFE_PUT, session_id, req).await
  }

  pub async fn get_file(&self, session_id: &str, req: &FileKeyRequest) -> Result<GetFileResponse, Error> {
    self.call(paths::FILE_GET, session_id, req).await
  }

  pub async fn get_file_download_link(
    &self,
    session_id: &str,
    req: &FileKeyRequest,
  ) -> Result<GetLinkResponse, Error> {
    self.call(paths::FILE_DOWNLOAD_LINK, session_id, req).await
  }

  pub async fn put_file(&self, session_id: &str, req: &PutFileRequest) -> Result<(), Error> {
    self.send(paths::FILE_PUT, session_id, req).await
  }

  pub async fn get_file_upload_link(
    &self,
    session_id: &str,
    req: &FileKeyRequest,
  ) -> Result<GetLinkResponse, Error> {
    self.call(paths::FILE_UPLOAD_LINK, session_id, req).await
  }

  pub async fn delete_file(&self, session_id: &str, req: &FileKeyRequest) -> Result<(), Error> {
    self.send(paths::FILE_DELETE, session_id, req).await
  }

  pub async fn rename_file(&self, session_id: &str, req: &RenameFileRequest) -> Result<(), Error> {
    self.send(paths::FILE_RENAME, session_id, req).await
  }

  pub async fn list_files(
    &self,
    session_id: &str,
    req: &ListFilePageRequest,
  ) -> Result<ListFilePageResponse, Error> {
    self.call(paths::FILE_LIST, session_id, req).await
  }

  pub async fn create_folder(&self, session_id: &str, req: &CreateFolderRequest) -> Result<(), Error> {
    self.send(paths::FILE_CREATE_FOLDER, session_id, req).await
  }

  /// Post `req` and decode the reply as `Res`.
  async fn call<Req, Res>(&self, path: &str, session_id: &str, req: &Req) -> Result<Res, Error>
  where
    Req: Serialize + ?Sized,
    Res: DeserializeOwned,
  {
    let body = self.post(path, session_id, req).await?;
    serde_json::from_value(body).map_err(|e| ERR_INTERNAL.wrap(&e))
  }

  /// Post `req` and ignore the reply body.
  async fn send<Req>(&self, path: &str, session_id: &str, req: &Req) -> Result<(), Error>
  where
    Req: Serialize + ?Sized,
  {
    self.post(path, session_id, req).await.map(|_| ())
  }

  async fn post<Req>(
    &self,
    path: &str,
    session_id: &str,
    req: &Req,
  ) -> Result<serde_json::Value, Error>
  where
    Req: Serialize + ?Sized,
  {
    let body = serde_json::to_value(req).map_err(|e| ERR_INTERNAL.wrap(&e))?;
    debug!(path = %path, session_id = %session_id, "platform call");

    let (reply, status) = self.transport.post_json(path, session_id, body).await?;
    if status != 200 {
      let err = status_error(status, reply);
      warn!(path = %path, status, error = %err, "platform call rejected");
      return Err(err);
    }
    Ok(reply)
  }
}

/// Turn a non-200 reply into a structured error carrying the status.
///
/// A structured platform error in the body becomes the cause and lends its
/// retry flag. The suspension sentinel is passed through untouched.
fn status_error(status: u16, body: serde_json::Value) -> Error {
  let status_err = ERR_HTTP_STATUS.with([status]);

  match serde_json::from_value::<ErrorEvent>(body.clone()) {
    Ok(event) if event.error.is_in_progress() => event.error,
    Ok(event) if !event.error.module().is_empty() => status_err
      .wrap(&event.error)
      .retry(event.error.is_retryable()),
    _ => match body {
      serde_json::Value::Null => status_err,
      serde_json::Value::String(text) => status_err.wrap(&text),
      other => status_err.wrap(&other),
    },
  }
}
