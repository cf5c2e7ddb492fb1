use std::sync::Arc;

use polycode_client::Error;
use polycode_runtime::{
  ApiRouter, AppConfig, ClientConfig, ConfigError, Dispatcher, Platform, Service, ServiceRegistry,
};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum StartError {
  #[error("invalid configuration: {0}")]
  Config(#[from] ConfigError),

  #[error("failed to register service: {0}")]
  Register(#[source] Error),

  #[error("failed to announce app: {0}")]
  Announce(#[source] Error),
}

/// An application: its services, its optional API router and the settings
/// used to reach the platform.
pub struct App {
  config: ClientConfig,
  app_config: AppConfig,
  registry: ServiceRegistry,
  router: Option<Arc<dyn ApiRouter>>,
}

impl App {
  pub fn new(config: ClientConfig) -> Self {
    Self {
      config,
      app_config: AppConfig::default(),
      registry: ServiceRegistry::new(),
      router: None,
    }
  }

  /// Settings from the `polycode_*` environment variables.
  pub fn from_env() -> Result<Self, StartError> {
    Ok(Self::new(ClientConfig::from_env()?))
  }

  pub fn config(&self) -> &ClientConfig {
    &self.config
  }

  pub fn with_app_config(mut self, app_config: AppConfig) -> Self {
    self.app_config = app_config;
    self
  }

  pub fn register(mut self, service: impl Service + 'static) -> Result<Self, StartError> {
    self.registry.register(service).map_err(StartError::Register)?;
    Ok(self)
  }

  pub fn with_router(mut self, router: Arc<dyn ApiRouter>) -> Self {
    self.router = Some(router);
    self
  }

  /// Connect to the sidecar, announce the app and return the dispatcher
  /// that runs its events.
  ///
  /// Must be called from within a tokio runtime; the memo cache janitor is
  /// spawned on it.
  pub async fn start(self) -> Result<Dispatcher, StartError> {
    let platform = Platform::from_config(&self.config, AppConfig::default())?;
    self.start_on(platform).await
  }

  /// Like [`App::start`], over an already built platform. A non-empty app
  /// config set on this app replaces the platform's.
  pub async fn start_on(self, platform: Platform) -> Result<Dispatcher, StartError> {
    let app_name = self.config.app_name.clone();
    let app_port = self.config.app_port;
    let platform = if self.app_config.is_empty() {
      platform
    } else {
      platform.with_app_config(self.app_config)
    };

    let mut dispatcher = Dispatcher::new(Arc::new(self.registry), platform);
    if let Some(router) = self.router {
      dispatcher = dispatcher.with_router(router);
    }

    dispatcher
      .announce(&app_name, app_port)
      .await
      .map_err(StartError::Announce)?;

    info!(app_name = %app_name, app_port, "app ready");
    Ok(dispatcher)
  }
}
