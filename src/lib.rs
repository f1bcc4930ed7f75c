pub mod config;
pub mod errors;
pub mod logger;
pub mod query;
pub mod registry;
pub mod replication;
pub mod telemetry;
pub mod types;
pub mod utils;

use std::path::Path;
use std::time::Duration;

use crate::config::AdapterConfig;
use crate::errors::DbError;
use crate::query::{CompileRequest, CompiledQuery};
use crate::registry::{ModelDescriptor, ModelRegistry};
use crate::replication::{EventBus, HttpLogSource, ListenerConfig, ReplicationListener};

/// Configuration plus the models it serves.
#[derive(Debug, Clone, Default)]
pub struct Adapter {
    config: AdapterConfig,
    registry: ModelRegistry,
}

impl Adapter {
    #[must_use]
    pub fn new(config: AdapterConfig) -> Self {
        Self { config, registry: ModelRegistry::new() }
    }

    /// Loads configuration the way [`AdapterConfig::load`] does.
    ///
    /// # Errors
    /// Returns `Config` or `Io` if configuration cannot be resolved.
    pub fn from_config_path(path: Option<&Path>) -> Result<Self, DbError> {
        Ok(Self::new(AdapterConfig::load(path)?))
    }

    #[must_use]
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn register_model(&mut self, desc: ModelDescriptor) -> Option<ModelDescriptor> {
        self.registry.register(desc)
    }

    /// Compiles a request for a registered model.
    ///
    /// # Errors
    /// Returns `NoSuchModel` or any compile error.
    pub fn compile(&self, identity: &str, req: CompileRequest) -> Result<CompiledQuery, DbError> {
        self.registry.compile(identity, req)
    }

    /// Listener against the configured server, publishing to `bus`. Call
    /// `start()` on the result inside a tokio runtime.
    ///
    /// # Errors
    /// Returns `Transport` if the HTTP client cannot be built.
    pub fn listener(&self, bus: EventBus) -> Result<ReplicationListener, DbError> {
        let rc = &self.config.replication;
        let source = HttpLogSource::new(&self.config.connection, Duration::from_millis(rc.request_timeout_ms))?;
        Ok(ReplicationListener::new(source, bus, ListenerConfig::from(rc)))
    }
}

/// Initializes logging from `log4rs.yaml` when present.
///
/// # Errors
/// Returns `Config` if the file exists but is invalid.
pub fn init() -> Result<(), DbError> {
    logger::init()?;
    Ok(())
}
