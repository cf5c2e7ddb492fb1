//! Execution contexts handed to handlers.
//!
//! Every dispatch builds one context. [`BaseContext`] carries what all
//! handlers get; [`ServiceContext`] is for plain service methods,
//! [`WorkflowContext`] adds the suspending remote-call proxies, and
//! [`ApiContext`] is the workflow context of an HTTP-shaped call.

use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use polycode_cache::MemoCache;
use polycode_client::{
  ContextMeta, ERR_CANCELLED, ERR_NON_DETERMINISTIC, Error, HttpTransport, ServiceClient,
};
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{AppConfig, ClientConfig, ConfigError};
use crate::datastore::{DataStore, UnsafeDataStoreBuilder};
use crate::filestore::FileStore;
use crate::halt::Halt;
use crate::logger::{DEFAULT_SECTION, LogBuffer, Logger};
use crate::paramstore::ParamStore;
use crate::response::Response;

/// What the memo cache remembers for one call slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotRecord {
  /// The call made from this slot, e.g. `service:prod/orders.place`.
  pub target: String,
  pub response: Response,
}

/// Process-wide collaborators shared by every dispatch.
#[derive(Clone)]
pub struct Platform {
  client: ServiceClient,
  cache: MemoCache<SlotRecord>,
  app_config: AppConfig,
  env_id: String,
  memo_pin: Duration,
}

impl Platform {
  pub fn new(client: ServiceClient, cache: MemoCache<SlotRecord>) -> Self {
    Self {
      client,
      cache,
      app_config: AppConfig::default(),
      env_id: String::new(),
      memo_pin: ClientConfig::default().memo_pin(),
    }
  }

  /// Build the HTTP transport and start the memo cache janitor.
  ///
  /// Must be called from within a tokio runtime.
  pub fn from_config(config: &ClientConfig, app_config: AppConfig) -> Result<Self, ConfigError> {
    let transport = HttpTransport::new(config.sidecar_url.clone(), config.request_timeout())?;
    let client = ServiceClient::new(Arc::new(transport));
    let cache = MemoCache::start(config.cache_config());

    Ok(
      Self::new(client, cache)
        .with_app_config(app_config)
        .with_env_id(config.env_id.clone())
        .with_memo_pin(config.memo_pin()),
    )
  }

  pub fn with_app_config(mut self, app_config: AppConfig) -> Self {
    self.app_config = app_config;
    self
  }

  /// Environment used by remote calls that do not name one.
  pub fn with_env_id(mut self, env_id: impl Into<String>) -> Self {
    self.env_id = env_id.into();
    self
  }

  pub fn with_memo_pin(mut self, memo_pin: Duration) -> Self {
    self.memo_pin = memo_pin;
    self
  }

  pub fn client(&self) -> &ServiceClient {
    &self.client
  }

  pub fn cache(&self) -> &MemoCache<SlotRecord> {
    &self.cache
  }
}

/// How a call slot ended, and whether it may be replayed from the cache.
pub(crate) enum SlotOutcome {
  /// The platform recorded this result; replays must see the same one.
  Recorded(Response),
  /// A local or transport failure; the next replay asks again.
  Transient(Response),
}

struct ContextState {
  session_id: String,
  meta: ContextMeta,
  platform: Platform,
  cancel: CancellationToken,
  next_slot: AtomicU64,
  logs: LogBuffer,
}

/// Context shared by every kind of handler.
#[derive(Clone)]
pub struct BaseContext {
  state: Arc<ContextState>,
}

impl BaseContext {
  pub(crate) fn new(
    session_id: impl Into<String>,
    meta: ContextMeta,
    platform: Platform,
    cancel: CancellationToken,
    logs: LogBuffer,
  ) -> Self {
    Self {
      state: Arc::new(ContextState {
        session_id: session_id.into(),
        meta,
        platform,
        cancel,
        next_slot: AtomicU64::new(0),
        logs,
      }),
    }
  }

  pub fn session_id(&self) -> &str {
    &self.state.session_id
  }

  pub fn meta(&self) -> &ContextMeta {
    &self.state.meta
  }

  pub fn app_config(&self) -> &AppConfig {
    &self.state.platform.app_config
  }

  pub fn app_config_as<T: DeserializeOwned>(&self) -> Result<T, Error> {
    self.state.platform.app_config.decode()
  }

  pub fn cancellation(&self) -> &CancellationToken {
    &self.state.cancel
  }

  pub fn is_cancelled(&self) -> bool {
    self.state.cancel.is_cancelled()
  }

  /// Logger whose lines are shipped with this dispatch's completion.
  pub fn logger(&self) -> Logger {
    Logger::new(DEFAULT_SECTION, self.state.logs.clone())
  }

  /// Tell the platform the event was received.
  pub async fn acknowledge(&self) -> Result<(), Error> {
    self.ensure_active()?;
    self.client().acknowledge(self.session_id()).await
  }

  pub(crate) fn client(&self) -> &ServiceClient {
    &self.state.platform.client
  }

  pub(crate) fn default_env_id(&self) -> &str {
    &self.state.platform.env_id
  }

  pub(crate) fn ensure_active(&self) -> Result<(), Error> {
    if self.is_cancelled() {
      return Err(ERR_CANCELLED.wrap(&format!("session {}", self.session_id())));
    }
    Ok(())
  }

  /// Run a suspending call in the next call slot.
  ///
  /// Slots are numbered in call order, so a replay of the same handler
  /// reaches the same slot for the same call. A slot already recorded in
  /// the memo cache is answered from there without calling `call`; a
  /// recorded slot replayed with a different `target` fails. Pinned slots
  /// survive sliding expiry for the platform's memo pin duration.
  pub(crate) async fn call_slot<F, Fut>(
    &self,
    target: &str,
    pinned: bool,
    call: F,
  ) -> Result<Response, Halt>
  where
    F: FnOnce(u64) -> Fut,
    Fut: Future<Output = Result<SlotOutcome, Halt>>,
  {
    let seq = self.state.next_slot.fetch_add(1, Ordering::SeqCst);
    let key = format!("{}:{}", self.session_id(), seq);
    let cache = &self.state.platform.cache;

    if let Some(record) = cache.get(&key) {
      if record.target != target {
        return Err(Halt::Failed(ERR_NON_DETERMINISTIC.with([&key]).wrap(
          &format!("recorded {}, now {}", record.target, target),
        )));
      }
      debug!(slot = %key, target = %target, "slot replayed from cache");
      return Ok(record.response);
    }

    self.ensure_active()?;

    match call(seq).await? {
      SlotOutcome::Recorded(response) => {
        let record = SlotRecord {
          target: target.to_string(),
          response: response.clone(),
        };
        if pinned {
          let not_before = Instant::now() + self.state.platform.memo_pin;
          cache.put_with_fixed_expiry(key, record, not_before);
        } else {
          cache.put(key, record);
        }
        Ok(response)
      }
      SlotOutcome::Transient(response) => Ok(response),
    }
  }
}

/// Context for plain service methods. Cannot make suspending calls.
#[derive(Clone)]
pub struct ServiceContext {
  base: BaseContext,
}

impl ServiceContext {
  pub(crate) fn new(base: BaseContext) -> Self {
    Self { base }
  }

  /// Collections in the session's tenant and partition.
  pub fn db(&self) -> DataStore {
    DataStore::new(self.base.clone())
  }

  pub fn unsafe_db(&self) -> UnsafeDataStoreBuilder {
    UnsafeDataStoreBuilder::new(self.base.clone())
  }

  pub fn file_store(&self) -> FileStore {
    FileStore::new(self.base.clone())
  }

  /// Vars and secrets of this app and of the tenant.
  pub fn param_store(&self) -> ParamStore {
    ParamStore::new(&self.db(), self.base.meta().app_name.clone())
  }
}

impl Deref for ServiceContext {
  type Target = BaseContext;

  fn deref(&self) -> &BaseContext {
    &self.base
  }
}

/// Context for workflow methods.
///
/// Code that runs before a suspending call may be executed again on replay,
/// so it must be idempotent or derived from the input and recorded results.
/// Wrap clocks, random ids and similar local effects in
/// [`WorkflowContext::memo`].
#[derive(Clone)]
pub struct WorkflowContext {
  base: BaseContext,
}

impl WorkflowContext {
  pub(crate) fn new(base: BaseContext) -> Self {
    Self { base }
  }

  /// Data store over an explicit tenant and partition. Its calls are not
  /// recorded, so they run again on every replay.
  pub fn unsafe_db(&self) -> UnsafeDataStoreBuilder {
    UnsafeDataStoreBuilder::new(self.base.clone())
  }
}

impl Deref for WorkflowContext {
  type Target = BaseContext;

  fn deref(&self) -> &BaseContext {
    &self.base
  }
}

/// Context for API calls; a workflow context with HTTP routing around it.
#[derive(Clone)]
pub struct ApiContext {
  workflow: WorkflowContext,
}

impl ApiContext {
  pub(crate) fn new(base: BaseContext) -> Self {
    Self {
      workflow: WorkflowContext::new(base),
    }
  }

  pub fn workflow(&self) -> &WorkflowContext {
    &self.workflow
  }
}

impl Deref for ApiContext {
  type Target = WorkflowContext;

  fn deref(&self) -> &WorkflowContext {
    &self.workflow
  }
}
