//! Polycode Runtime
//!
//! Runs service, workflow and API handlers on behalf of the platform.
//!
//! A handler receives a context and returns `Result<_, Halt>`. Calls made
//! through a [`WorkflowContext`] (remote services, apps, controllers,
//! signals, memoized computations) either produce a [`Response`] or halt
//! the handler with [`Halt::Suspended`] while the platform has no result
//! yet. The [`Dispatcher`] turns the halt into a no-op completion; the
//! platform replays the event later, and every call that already completed
//! is answered from the session's call slots without reaching the
//! platform again.
//!
//! Service contexts also reach the platform's data store, file store and
//! parameter store. Lines written through [`BaseContext::logger`] travel
//! back with the completion.

mod api;
mod config;
mod context;
mod counter;
mod datastore;
mod dispatcher;
mod filestore;
mod halt;
mod logger;
mod memo;
mod paramstore;
mod registry;
mod remote;
mod response;
mod signal;

pub use api::{ApiRouter, HttpRequest, HttpResponse, Routes, from_http_response, json_response, to_http_request};
pub use config::{
  AppConfig, ClientConfig, ConfigError, ENV_APP_NAME, ENV_APP_PORT, ENV_CACHE_CAPACITY,
  ENV_CACHE_SWEEP_SECS, ENV_CACHE_TTL_SECS, ENV_ENV_ID, ENV_MEMO_PIN_SECS,
  ENV_REQUEST_TIMEOUT_SECS, ENV_SIDECAR_URL,
};
pub use context::{ApiContext, BaseContext, Platform, ServiceContext, SlotRecord, WorkflowContext};
pub use counter::Counter;
pub use datastore::{Collection, DataStore, HasId, Query, UnsafeDataStoreBuilder};
pub use dispatcher::{Completion, Dispatcher, Event, INVOKE_API_PATH, INVOKE_SERVICE_PATH};
pub use filestore::{FileStore, Folder};
pub use halt::{Halt, Outcome};
pub use logger::{DEFAULT_SECTION, LogEntry, Logger};
pub use paramstore::{PARAM_COLLECTION, Param, ParamRecord, ParamScope, ParamStore};
pub use registry::{Input, Service, ServiceBuilder, ServiceRegistry, TypedService, Validate};
pub use remote::{RemoteApp, RemoteController, RemoteService, RemoteServiceBuilder};
pub use response::Response;
pub use signal::Signal;
