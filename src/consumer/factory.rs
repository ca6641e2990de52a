//! Session factory
//!
//! Builds fresh consumer-group sessions from the installed `FactoryConfig`.
//! The config is swappable at runtime; reconfigure installs a new one after
//! stopping the managed groups, so every restart builds against the new
//! brokers and client settings.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

use crate::config::FactoryConfig;
use crate::consumer::session::{ConsumerSession, SessionBuilder};
use crate::error::Result;

/// Factory for consumer-group sessions bound to a swappable config
pub struct SessionFactory {
    config: RwLock<FactoryConfig>,
    builder: Arc<dyn SessionBuilder>,
}

impl SessionFactory {
    pub fn new(config: FactoryConfig, builder: Arc<dyn SessionBuilder>) -> Self {
        Self {
            config: RwLock::new(config),
            builder,
        }
    }

    /// Build a fresh session for `group_id` from the current config.
    ///
    /// A builder failure is returned verbatim; no state is registered.
    pub async fn create(&self, group_id: &str) -> Result<Arc<dyn ConsumerSession>> {
        let (brokers, client) = {
            let config = self.config.read();
            (config.brokers.clone(), config.client.clone())
        };
        debug!(group_id = %group_id, brokers = ?brokers, "Building consumer session");
        self.builder.build(&brokers, group_id, &client).await
    }

    /// Atomically install a new config. Sessions already built are
    /// unaffected; every subsequent `create` uses the new values.
    pub fn replace_config(&self, config: FactoryConfig) {
        *self.config.write() = config;
    }

    /// Snapshot of the currently installed config.
    pub fn config(&self) -> FactoryConfig {
        self.config.read().clone()
    }
}
