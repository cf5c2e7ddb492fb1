//! Polycode
//!
//! Client-side execution engine for the polycode platform. Register
//! services (and optionally an API router) on an [`App`], start it to
//! announce them to the platform, then feed inbound events to the returned
//! [`Dispatcher`].
//!
//! The building blocks live in their own crates and are re-exported here:
//! [`polycode_client`] for errors, wire models and the platform client,
//! [`polycode_cache`] for the memo cache, and [`polycode_runtime`] for
//! contexts, proxies, the registry and the dispatcher.

mod app;

pub use app::{App, StartError};

pub use polycode_cache::{CacheConfig, Capacity, MemoCache};
pub use polycode_client::{
  ApiRequest, ApiResponse, ContextMeta, ERR_BAD_REQUEST, ERR_CANCELLED, ERR_CONTEXT_NOT_FOUND,
  ERR_HTTP_STATUS, ERR_INTERNAL, ERR_METHOD_NOT_FOUND, ERR_NON_DETERMINISTIC,
  ERR_SERVICE_NOT_FOUND, ERR_TASK_EXEC_ERROR, ERR_TASK_IN_PROGRESS, ERR_UNKNOWN_ERROR, Error,
  FileEntry, ListFilePageResponse, LogLevel, LogMsg, ServiceClient, TaskOptions, Transport,
};
pub use polycode_runtime::*;
