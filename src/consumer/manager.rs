//! Group manager
//!
//! The public facade over the registry of managed groups. User code starts
//! and closes groups here; the control dispatcher routes stop/start
//! commands into the lock-carrying operations; reconfigure coordinates a
//! global stop → config swap → restart cycle across every managed group.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, FactoryConfig, ManagerConfig};
use crate::consumer::factory::SessionFactory;
use crate::consumer::group::{ErrorStream, ManagedGroup};
use crate::consumer::registry::GroupRegistry;
use crate::consumer::session::{
    ConsumeOptions, ConsumerRecord, ConsumerSession, RecordHandler, SessionBuilder,
};
use crate::control::commands::CommandLock;
use crate::error::{AggregateError, Result, SessionError, ShepherdError};

/// Reserved lock token used by manager-internal operations (reconfigure).
/// External controllers must choose a different token.
pub const INTERNAL_LOCK_TOKEN: &str = "internal-token";

/// Supervisor owning a dynamic set of managed consumer groups
pub struct GroupManager {
    config: ManagerConfig,
    factory: SessionFactory,
    registry: GroupRegistry,
}

impl GroupManager {
    pub fn new(
        config: ManagerConfig,
        factory_config: FactoryConfig,
        builder: Arc<dyn SessionBuilder>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            factory: SessionFactory::new(factory_config, builder),
            registry: GroupRegistry::new(),
        })
    }

    /// Build a session from the factory, register a managed group for it,
    /// and launch the supervised consume loop.
    ///
    /// Fails with `AlreadyManaged` when the id is registered and with the
    /// factory's own error when session creation fails; neither changes
    /// the registry.
    pub async fn start_consumer_group(
        &self,
        group_id: &str,
        topics: Vec<String>,
        handler: Arc<dyn RecordHandler>,
        options: ConsumeOptions,
    ) -> Result<()> {
        validate_group_id(group_id)?;
        if self.registry.contains(group_id) {
            return Err(ShepherdError::already_managed(group_id));
        }
        info!(group_id = %group_id, "Creating new managed consumer group");
        let session = self.factory.create(group_id).await.map_err(|error| {
            warn!(group_id = %group_id, %error, "Failed to create new managed consumer group");
            error
        })?;
        self.install_group(group_id, session, topics, handler, options)
            .await
    }

    /// Admit a session created by an external factory under management.
    /// Identical to [`start_consumer_group`] except the factory call is
    /// skipped and the provided session is registered as-is.
    ///
    /// [`start_consumer_group`]: GroupManager::start_consumer_group
    pub async fn add_existing_group(
        &self,
        group_id: &str,
        session: Arc<dyn ConsumerSession>,
        topics: Vec<String>,
        handler: Arc<dyn RecordHandler>,
        options: ConsumeOptions,
    ) -> Result<()> {
        validate_group_id(group_id)?;
        if self.registry.contains(group_id) {
            return Err(ShepherdError::already_managed(group_id));
        }
        info!(group_id = %group_id, "Adding existing consumer group to management");
        self.install_group(group_id, session, topics, handler, options)
            .await
    }

    async fn install_group(
        &self,
        group_id: &str,
        session: Arc<dyn ConsumerSession>,
        topics: Vec<String>,
        handler: Arc<dyn RecordHandler>,
        options: ConsumeOptions,
    ) -> Result<()> {
        let capacity = options
            .error_channel_capacity
            .unwrap_or(self.config.error_channel_capacity);
        let group = ManagedGroup::new(group_id, self.config.lock_timeout, capacity);
        group.start(Arc::clone(&session))?;

        if !self.registry.insert_if_absent(group_id, Arc::clone(&group)) {
            // A concurrent start won the id; release the session we built.
            if let Err(error) = session.close().await {
                warn!(group_id = %group_id, %error, "Failed to close session after losing start race");
            }
            return Err(ShepherdError::already_managed(group_id));
        }

        let handler = wrap_handler(&group, handler);
        let loop_group = Arc::clone(&group);
        tokio::spawn(async move {
            let group_id = loop_group.group_id().to_string();
            match loop_group.consume(&topics, handler).await {
                Ok(()) => debug!(group_id = %group_id, "Supervised consume loop finished"),
                Err(error) if matches!(error, ShepherdError::ShuttingDown) => {
                    debug!(group_id = %group_id, "Supervised consume loop cancelled")
                }
                Err(error) => {
                    warn!(group_id = %group_id, %error, "Supervised consume loop exited with error")
                }
            }
        });
        Ok(())
    }

    /// Drive the group to Closed and remove it from the registry.
    pub async fn close_consumer_group(&self, group_id: &str) -> Result<()> {
        let Some(group) = self.registry.get(group_id) else {
            warn!(group_id = %group_id, "Close requested for unmanaged consumer group");
            return Err(ShepherdError::not_managed(group_id));
        };
        info!(group_id = %group_id, "Closing consumer group and removing from management");
        group.close().await.map_err(|error| {
            warn!(group_id = %group_id, %error, "Failed to close managed consumer group");
            error
        })?;
        self.registry.remove(group_id);
        Ok(())
    }

    /// The group's persistent error stream, or `None` for an unknown id.
    /// The stream survives stop/start cycles; callers may hold it across
    /// them.
    pub fn errors(&self, group_id: &str) -> Option<ErrorStream> {
        self.registry.get(group_id).map(|group| group.errors())
    }

    /// True when the id corresponds to a managed group.
    pub fn is_managed(&self, group_id: &str) -> bool {
        self.registry.contains(group_id)
    }

    /// Stop a managed group under the command-lock discipline. The lock is
    /// acquired first when `lock.lock_before` is set and released after
    /// when `lock.unlock_after` is set.
    pub async fn stop_group(&self, lock: &CommandLock, group_id: &str) -> Result<()> {
        self.lock_before(lock, group_id).await?;
        let Some(group) = self.registry.get(group_id) else {
            info!(group_id = %group_id, "Stop requested for unmanaged consumer group");
            return Err(ShepherdError::not_managed(group_id));
        };
        info!(group_id = %group_id, "Stopping managed consumer group");
        group.stop().await.map_err(|error| {
            warn!(group_id = %group_id, %error, "Failed to stop managed consumer group");
            error
        })?;
        self.unlock_after(lock, group_id);
        Ok(())
    }

    /// Restart a stopped managed group with a fresh session from the
    /// factory, under the command-lock discipline.
    pub async fn start_group(&self, lock: &CommandLock, group_id: &str) -> Result<()> {
        self.lock_before(lock, group_id).await?;
        let Some(group) = self.registry.get(group_id) else {
            info!(group_id = %group_id, "Start requested for unmanaged consumer group");
            return Err(ShepherdError::not_managed(group_id));
        };
        info!(group_id = %group_id, "Starting managed consumer group");
        let session = self.factory.create(group_id).await.map_err(|error| {
            warn!(group_id = %group_id, %error, "Failed to restart managed consumer group");
            error
        })?;
        group.start(session)?;
        self.unlock_after(lock, group_id);
        Ok(())
    }

    /// Swap the factory config and cycle every managed group through
    /// stop → restart so new sessions bind to the new brokers.
    ///
    /// Every stop precedes the config swap, and the swap precedes every
    /// restart, so no restart can observe the old config. A group whose
    /// stop fails (a lock conflict with an external controller, usually)
    /// is skipped: whoever holds its lock restarts it against the new
    /// config later. Per-group failures are combined into one error.
    pub async fn reconfigure(&self, brokers: Vec<String>, client: ClientConfig) -> Result<()> {
        let new_config = FactoryConfig::new(brokers, client);
        new_config.validate()?;

        info!("Reconfiguring consumer group manager; stopping all managed groups");
        let mut failures = AggregateError::new();
        let mut to_restart = Vec::new();
        for group_id in self.registry.group_ids() {
            let lock = CommandLock::new(INTERNAL_LOCK_TOKEN, true, false);
            match self.stop_group(&lock, &group_id).await {
                Ok(()) => to_restart.push(group_id),
                Err(error) => {
                    warn!(group_id = %group_id, %error, "Skipping restart for group that failed to stop");
                    if !error.is_lock_conflict() {
                        // The internal token took the lock but the stop
                        // failed for another reason; do not leave the
                        // group locked forever.
                        self.unlock_after(
                            &CommandLock::new(INTERNAL_LOCK_TOKEN, false, true),
                            &group_id,
                        );
                    }
                    failures.push(error);
                }
            }
        }

        self.factory.replace_config(new_config);

        info!("Reconfiguring consumer group manager; restarting stopped groups");
        for group_id in &to_restart {
            let lock = CommandLock::new(INTERNAL_LOCK_TOKEN, false, true);
            if let Err(error) = self.start_group(&lock, group_id).await {
                warn!(group_id = %group_id, %error, "Failed to restart group after reconfigure");
                failures.push(error);
            }
        }
        failures.into_result()
    }

    /// Close every managed group, combining per-group failures.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down consumer group manager");
        let mut failures = AggregateError::new();
        for group_id in self.registry.group_ids() {
            if let Err(error) = self.close_consumer_group(&group_id).await {
                failures.push(error);
            }
        }
        failures.into_result()
    }

    /// Snapshot of the installed factory config.
    pub fn factory_config(&self) -> FactoryConfig {
        self.factory.config()
    }

    /// Acquire the group's lock when `lock.lock_before` is set. An absent
    /// group is nothing to lock: vacuously successful.
    async fn lock_before(&self, lock: &CommandLock, group_id: &str) -> Result<()> {
        if !lock.lock_before {
            return Ok(());
        }
        let Some(group) = self.registry.get(group_id) else {
            return Ok(());
        };
        group.acquire_lock(&lock.token).await
    }

    /// Release the group's lock when `lock.unlock_after` is set. Absent
    /// groups are vacuously unlocked.
    fn unlock_after(&self, lock: &CommandLock, group_id: &str) {
        if !lock.unlock_after {
            return;
        }
        let Some(group) = self.registry.get(group_id) else {
            return;
        };
        group.release_lock(&lock.token);
    }
}

fn validate_group_id(group_id: &str) -> Result<()> {
    if group_id.is_empty() {
        return Err(ShepherdError::config("group id must not be empty"));
    }
    Ok(())
}

/// Wrap the user handler so its failures fan into the group's persistent
/// error stream; a handler failure never ends the session.
fn wrap_handler(group: &ManagedGroup, inner: Arc<dyn RecordHandler>) -> Arc<dyn RecordHandler> {
    match group.error_sender() {
        Some(errors) => Arc::new(ErrorForwardingHandler { inner, errors }),
        None => inner,
    }
}

struct ErrorForwardingHandler {
    inner: Arc<dyn RecordHandler>,
    errors: mpsc::Sender<SessionError>,
}

#[async_trait]
impl RecordHandler for ErrorForwardingHandler {
    async fn handle(&self, record: ConsumerRecord) -> std::result::Result<(), SessionError> {
        if let Err(error) = self.inner.handle(record).await {
            warn!(%error, "Record handler failed; forwarding to error stream");
            if self.errors.send(error).await.is_err() {
                debug!("Persistent error channel closed; dropping handler error");
            }
        }
        Ok(())
    }
}
