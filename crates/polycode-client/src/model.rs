//! Wire types exchanged with the platform sidecar.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Retry backoff for a remote task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffStrategy {
  pub initial_interval_ms: u64,
  pub max_interval_ms: u64,
  pub multiplier: f64,
}

/// Execution options attached to every remote call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskOptions {
  /// Timeout in milliseconds. Zero leaves it to the platform.
  #[serde(rename = "timeout")]
  pub timeout_ms: u64,
  pub retries: u32,
  pub retry_on_fail: bool,
  pub backoff_strategy: BackoffStrategy,
}

impl TaskOptions {
  pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
    self.timeout_ms = timeout_ms;
    self
  }

  pub fn with_retries(mut self, retries: u32) -> Self {
    self.retries = retries;
    self.retry_on_fail = retries > 0;
    self
  }
}

/// Who is running and on whose behalf.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextMeta {
  pub org_id: String,
  pub env_id: String,
  pub app_name: String,
  pub app_id: String,
  pub tenant_id: String,
  pub partition_key: String,
  pub task_group: String,
  pub task_name: String,
  pub task_id: String,
  pub parent_id: String,
  pub trace_id: String,
  pub input_id: String,
  pub caller: CallerContextMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallerContextMeta {
  pub org_id: String,
  pub env_id: String,
  pub app_name: String,
  pub app_id: String,
  pub tenant_id: String,
  pub partition_key: String,
  pub task_group: String,
  pub task_name: String,
  pub task_id: String,
}

// ---------------------------------------------------------------------------
// Inbound events and completions
// ---------------------------------------------------------------------------

/// A request to run one service method.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStartEvent {
  pub session_id: String,
  pub service: String,
  pub method: String,
  #[serde(default)]
  pub meta: ContextMeta,
  #[serde(default)]
  pub input: serde_json::Value,
}

/// A request to run one HTTP-shaped API call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiStartEvent {
  pub session_id: String,
  #[serde(default)]
  pub meta: ContextMeta,
  pub request: ApiRequest,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMeta {
  pub is_workflow: bool,
}

/// Outcome of a service call as reported back to the platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCompleteEvent {
  /// The invocation was suspended and will be replayed.
  #[serde(default)]
  pub is_async: bool,
  /// The handler returned no value.
  #[serde(default)]
  pub is_null: bool,
  #[serde(default)]
  pub is_error: bool,
  #[serde(default)]
  pub output: serde_json::Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<Error>,
  #[serde(default)]
  pub meta: ServiceMeta,
  #[serde(default)]
  pub logs: Vec<LogMsg>,
}

/// Outcome of an API call as reported back to the platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCompleteEvent {
  #[serde(default)]
  pub path: String,
  pub response: ApiResponse,
  #[serde(default)]
  pub logs: Vec<LogMsg>,
}

/// Body of a non-200 platform reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
  pub error: Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiRequest {
  pub id: String,
  pub host: String,
  pub method: String,
  pub path: String,
  pub query: BTreeMap<String, String>,
  pub header: BTreeMap<String, String>,
  pub body: String,
  pub is_base64_encoded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiResponse {
  pub status_code: u16,
  pub header: BTreeMap<String, String>,
  pub body: String,
  pub is_base64_encoded: bool,
}

// ---------------------------------------------------------------------------
// Outbound platform calls
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteData {
  pub method: String,
  pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDescription {
  pub name: String,
  #[serde(default)]
  pub description: String,
  pub is_workflow: bool,
  #[serde(default)]
  pub input: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescription {
  pub name: String,
  pub tasks: Vec<MethodDescription>,
}

/// Announces the app, its services and its routes to the platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAppRequest {
  pub app_name: String,
  pub app_port: u16,
  pub services: Vec<ServiceDescription>,
  pub api_handler: String,
  pub routes: Vec<RouteData>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecServiceRequest {
  pub env_id: String,
  pub service: String,
  pub tenant_id: String,
  pub partition_key: String,
  pub method: String,
  pub options: TaskOptions,
  pub fire_and_forget: bool,
  pub input: serde_json::Value,
}

/// Reply to a service, app or signal call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecServiceResponse {
  /// No result yet; the caller must suspend.
  pub is_async: bool,
  pub output: serde_json::Value,
  pub is_error: bool,
  pub error: Option<Error>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecAppRequest {
  pub env_id: String,
  #[serde(rename = "service")]
  pub app_name: String,
  pub method: String,
  pub options: TaskOptions,
  pub fire_and_forget: bool,
  pub input: serde_json::Value,
}

pub type ExecAppResponse = ExecServiceResponse;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecApiRequest {
  pub env_id: String,
  pub controller: String,
  pub path: String,
  pub options: TaskOptions,
  pub request: ApiRequest,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecApiResponse {
  pub is_async: bool,
  pub response: ApiResponse,
  pub is_error: bool,
  pub error: Option<Error>,
}

/// Asks whether a memoized call slot already has a recorded result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecFuncRequest {
  pub input: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecFuncResponse {
  pub is_async: bool,
  /// A previous attempt already recorded a result for this slot.
  pub is_completed: bool,
  pub output: serde_json::Value,
  pub is_error: bool,
  pub error: Option<Error>,
}

/// Records the outcome of a memoized call slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecFuncResult {
  pub input: serde_json::Value,
  pub output: serde_json::Value,
  pub is_error: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<Error>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalWaitRequest {
  pub signal_name: String,
}

pub type SignalWaitResponse = ExecServiceResponse;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalEmitRequest {
  pub task_id: String,
  pub signal_name: String,
  pub output: serde_json::Value,
  pub is_error: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<Error>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeEventEmitRequest {
  pub channel: String,
  pub input: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementCounterRequest {
  pub group: String,
  pub name: String,
  pub count: u64,
  /// Upper bound for the counter; `u64::MAX` means no limit.
  pub limit: u64,
  #[serde(rename = "TTL")]
  pub ttl: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IncrementCounterResponse {
  pub value: u64,
  pub incremented: bool,
}

/// Write action applied by a data store put.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbAction {
  #[default]
  Insert,
  Update,
  Upsert,
  Delete,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutRequest {
  pub action: DbAction,
  pub is_global: bool,
  pub collection: String,
  pub key: String,
  pub item: serde_json::Value,
  #[serde(rename = "TTL")]
  pub ttl: i64,
}

/// A put addressed to an explicit tenant and partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsafePutRequest {
  pub tenant_id: String,
  pub partition_key: String,
  pub put_request: PutRequest,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
  pub is_global: bool,
  pub collection: String,
  pub key: String,
  pub filter: String,
  pub args: Vec<serde_json::Value>,
  pub limit: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsafeQueryRequest {
  pub tenant_id: String,
  pub partition_key: String,
  pub query_request: QueryRequest,
}

/// Request naming a single file by key. Used by get, link and delete calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileKeyRequest {
  pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetFileResponse {
  /// Base64 file content; empty when the file does not exist.
  pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GetLinkResponse {
  pub link: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PutFileRequest {
  pub key: String,
  /// Base64 file content.
  pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameFileRequest {
  pub old_key: String,
  pub new_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateFolderRequest {
  pub folder: String,
}

/// One page of a folder listing. `continuation_token` is `None` for the
/// first page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilePageRequest {
  pub prefix: String,
  pub max_keys: i32,
  pub continuation_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
  pub key: String,
  pub size: i64,
  pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListFilePageResponse {
  pub files: Vec<FileEntry>,
  pub next_continuation_token: Option<String>,
  pub is_truncated: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
  Debug,
  #[default]
  Info,
  Warn,
  Error,
}

/// A log line published by a handler and shipped with its completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogMsg {
  pub level: LogLevel,
  pub section: String,
  pub tags: BTreeMap<String, serde_json::Value>,
  /// Unix time in microseconds.
  pub timestamp: i64,
  pub message: String,
}
