//! Per-group state machine
//!
//! A `ManagedGroup` wraps one *current* consumer session and outlives any
//! number of them. It owns the persistent error channel surfaced to the
//! caller, the parking primitive that suspends the consume loop while the
//! group is stopped, the command-lock token that serializes control-plane
//! batches, and the cancellation signal that ends the supervised loop for
//! good.
//!
//! State machine:
//!
//! ```text
//!         start(session)          stop()              close()
//! [init] ─────────────────▶ Running ─────────▶ Stopped ─────────▶ Closed
//!                            ▲    │              │
//!                            │    └──────────────┘
//!                            │       start(session')
//!                            │
//!                            └── close() → Closed
//! ```

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex, Notify};
use tracing::{debug, warn};

use crate::consumer::session::{ConsumerSession, RecordHandler};
use crate::error::{GroupError, Result, SessionError, ShepherdError};

/// Lifecycle of a managed group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    /// A session is installed and the consume loop is (or will be) inside it
    Running,
    /// No session; the consume loop is parked awaiting restart
    Stopped,
    /// Terminal; the group is gone from the registry
    Closed,
}

/// Caller-visible error stream of a managed group.
///
/// A cloneable handle over the group's persistent error channel: every
/// clone observes the same underlying stream, which survives stop/start
/// cycles and closes only when the group is closed.
#[derive(Clone)]
pub struct ErrorStream {
    inner: Arc<AsyncMutex<mpsc::Receiver<SessionError>>>,
}

impl ErrorStream {
    fn new(receiver: mpsc::Receiver<SessionError>) -> Self {
        Self {
            inner: Arc::new(AsyncMutex::new(receiver)),
        }
    }

    /// Receive the next error. Returns `None` once the group is closed and
    /// the channel is drained.
    pub async fn recv(&self) -> Option<SessionError> {
        self.inner.lock().await.recv().await
    }

    /// Non-blocking receive; `None` when no error is queued right now.
    pub fn try_recv(&self) -> Option<SessionError> {
        self.inner.try_lock().ok()?.try_recv().ok()
    }

    /// True when both handles observe the same underlying channel.
    pub fn same_channel(&self, other: &ErrorStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

struct GroupCore {
    status: GroupStatus,
    session: Option<Arc<dyn ConsumerSession>>,
    lock_token: Option<String>,
    closing: bool,
}

/// The manager's per-group state record; outlives any single session.
pub struct ManagedGroup {
    group_id: String,
    core: Mutex<GroupCore>,
    lock_timeout: Duration,
    /// Sender half of the persistent error channel; taken on close.
    errors_tx: Mutex<Option<mpsc::Sender<SessionError>>>,
    errors: ErrorStream,
    /// Parks the consume loop while Stopped; `start` stores a wake permit.
    consume_waiter: Notify,
    /// Bumped on every lock release so blocked acquirers re-check.
    lock_epoch: watch::Sender<u64>,
    /// Terminates the supervised consume loop entirely.
    cancel: watch::Sender<bool>,
    /// Set once the supervised loop has drained; `close` waits on it.
    released: watch::Sender<bool>,
}

impl ManagedGroup {
    /// Create a group in the init (Stopped, no session) state. The caller
    /// follows up with `start` before spawning the consume loop.
    pub(crate) fn new(
        group_id: impl Into<String>,
        lock_timeout: Duration,
        error_capacity: usize,
    ) -> Arc<Self> {
        let (errors_tx, errors_rx) = mpsc::channel(error_capacity.max(1));
        let (lock_epoch, _) = watch::channel(0u64);
        let (cancel, _) = watch::channel(false);
        let (released, _) = watch::channel(false);
        Arc::new(Self {
            group_id: group_id.into(),
            core: Mutex::new(GroupCore {
                status: GroupStatus::Stopped,
                session: None,
                lock_token: None,
                closing: false,
            }),
            lock_timeout,
            errors_tx: Mutex::new(Some(errors_tx)),
            errors: ErrorStream::new(errors_rx),
            consume_waiter: Notify::new(),
            lock_epoch,
            cancel,
            released,
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn status(&self) -> GroupStatus {
        self.core.lock().status
    }

    /// The persistent error stream; identical across stop/start cycles.
    pub fn errors(&self) -> ErrorStream {
        self.errors.clone()
    }

    pub(crate) fn current_session(&self) -> Option<Arc<dyn ConsumerSession>> {
        self.core.lock().session.clone()
    }

    pub(crate) fn error_sender(&self) -> Option<mpsc::Sender<SessionError>> {
        self.errors_tx.lock().clone()
    }

    /// Install a fresh session and transition to Running, waking a parked
    /// consume loop. Valid from init or Stopped.
    pub fn start(&self, session: Arc<dyn ConsumerSession>) -> Result<()> {
        {
            let mut core = self.core.lock();
            if core.closing {
                return Err(ShepherdError::ShuttingDown);
            }
            match core.status {
                GroupStatus::Closed => return Err(GroupError::Closed.into()),
                GroupStatus::Running => return Err(GroupError::AlreadyRunning.into()),
                GroupStatus::Stopped => {}
            }
            core.session = Some(session);
            core.status = GroupStatus::Running;
        }
        debug!(group_id = %self.group_id, "Managed group started");
        self.consume_waiter.notify_one();
        Ok(())
    }

    /// Close the current session and transition to Stopped. The consume
    /// loop parks until the next `start`; the persistent error channel is
    /// untouched. Valid from Running.
    pub async fn stop(&self) -> Result<()> {
        let session = {
            let mut core = self.core.lock();
            if core.closing {
                return Err(ShepherdError::ShuttingDown);
            }
            match core.status {
                GroupStatus::Closed => return Err(GroupError::Closed.into()),
                GroupStatus::Stopped => return Err(GroupError::NotRunning.into()),
                GroupStatus::Running => {}
            }
            core.status = GroupStatus::Stopped;
            core.session.take()
        };
        debug!(group_id = %self.group_id, "Managed group stopping");
        if let Some(session) = session {
            session.close().await?;
        }
        Ok(())
    }

    /// Cancel the supervised loop, wait for it to drain, close the current
    /// session if any, and close the persistent error channel. Valid from
    /// any non-Closed state; a concurrent close observes `ShuttingDown`.
    pub async fn close(&self) -> Result<()> {
        {
            let mut core = self.core.lock();
            if core.status == GroupStatus::Closed {
                return Err(GroupError::Closed.into());
            }
            if core.closing {
                return Err(ShepherdError::ShuttingDown);
            }
            core.closing = true;
        }
        debug!(group_id = %self.group_id, "Closing managed group");
        let _ = self.cancel.send(true);

        // Wait for the supervised loop to drain before touching the session.
        let mut released = self.released.subscribe();
        let _ = released.wait_for(|drained| *drained).await;

        let session = { self.core.lock().session.take() };
        if let Some(session) = session {
            if let Err(error) = session.close().await {
                warn!(group_id = %self.group_id, %error, "Failed to close session during group close");
                // Leave the group closable again rather than wedged.
                self.core.lock().closing = false;
                return Err(error);
            }
        }

        self.errors_tx.lock().take();
        self.core.lock().status = GroupStatus::Closed;
        debug!(group_id = %self.group_id, "Managed group closed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Command-lock discipline
    // ------------------------------------------------------------------

    /// Acquire the group's command lock for `token`, waiting up to the lock
    /// timeout for a conflicting holder to release. Re-acquisition by the
    /// holder is a no-op.
    pub(crate) async fn acquire_lock(&self, token: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.lock_timeout;
        let mut epoch = self.lock_epoch.subscribe();
        loop {
            {
                let mut core = self.core.lock();
                match core.lock_token.as_deref() {
                    None => {
                        core.lock_token = Some(token.to_string());
                        debug!(group_id = %self.group_id, "Command lock acquired");
                        return Ok(());
                    }
                    Some(held) if held == token => return Ok(()),
                    Some(_) => {}
                }
            }
            match tokio::time::timeout_at(deadline, epoch.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => {
                    warn!(group_id = %self.group_id, "Timed out waiting for conflicting command lock");
                    return Err(ShepherdError::lock_conflict(&self.group_id));
                }
            }
        }
    }

    /// Release the command lock held by `token`. A release by a non-holder
    /// is a logged no-op; the lock stays with its holder.
    pub(crate) fn release_lock(&self, token: &str) {
        let released = {
            let mut core = self.core.lock();
            match core.lock_token.as_deref() {
                Some(held) if held == token => {
                    core.lock_token = None;
                    true
                }
                Some(_) => {
                    warn!(group_id = %self.group_id, "Ignoring unlock request from non-holder token");
                    false
                }
                None => false,
            }
        };
        if released {
            debug!(group_id = %self.group_id, "Command lock released");
            self.lock_epoch.send_modify(|epoch| *epoch += 1);
        }
    }

    #[cfg(test)]
    pub(crate) fn lock_token(&self) -> Option<String> {
        self.core.lock().lock_token.clone()
    }

    // ------------------------------------------------------------------
    // Supervised consume loop
    // ------------------------------------------------------------------

    /// The supervised consume entry point: a single outward call that
    /// outlives arbitrarily many stop/start cycles of the underlying
    /// session. Parks while Stopped, resumes on `start`, exits only on
    /// cancellation, and fires the released signal on the way out.
    pub(crate) async fn consume(
        &self,
        topics: &[String],
        handler: Arc<dyn RecordHandler>,
    ) -> Result<()> {
        let mut cancel = self.cancel.subscribe();
        let result = self.consume_supervised(topics, handler, &mut cancel).await;
        let _ = self.released.send(true);
        result
    }

    async fn consume_supervised(
        &self,
        topics: &[String],
        handler: Arc<dyn RecordHandler>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            // Park while stopped; wake on start or cancellation.
            loop {
                if *cancel.borrow() {
                    return Err(ShepherdError::ShuttingDown);
                }
                match self.status() {
                    GroupStatus::Closed => return Err(GroupError::Closed.into()),
                    GroupStatus::Running => break,
                    GroupStatus::Stopped => {
                        debug!(group_id = %self.group_id, "Consume loop parked awaiting restart");
                        tokio::select! {
                            _ = self.consume_waiter.notified() => {}
                            _ = cancel.changed() => {}
                        }
                    }
                }
            }

            // A stop may have raced the wakeup; go park again.
            let Some(session) = self.current_session() else {
                continue;
            };

            self.spawn_error_forwarder(&session);

            let consume_result = tokio::select! {
                result = session.consume(topics, Arc::clone(&handler)) => result,
                _ = cancel.changed() => {
                    // The session must not outlive the cancelled loop.
                    if let Err(error) = session.close().await {
                        warn!(group_id = %self.group_id, %error, "Failed to close session under cancellation");
                    }
                    self.core.lock().session = None;
                    return Err(ShepherdError::ShuttingDown);
                }
            };

            match consume_result {
                Ok(()) => {
                    // Session ended without error (e.g. rebalance); rejoin.
                }
                Err(error) if error.is_closed_group() => {
                    debug!(group_id = %self.group_id, "Session closed; awaiting restart");
                }
                Err(error) => {
                    // A stopped group without the sentinel still parks.
                    if self.status() != GroupStatus::Stopped {
                        warn!(group_id = %self.group_id, %error, "Consume returned an error; surfacing and retrying");
                        self.publish_error(session_error(error), cancel).await;
                    }
                }
            }

            if *cancel.borrow() {
                return Err(ShepherdError::ShuttingDown);
            }
        }
    }

    /// Forward the session's own error stream into the persistent channel.
    /// The task drains when the session closes its stream or the group is
    /// cancelled.
    fn spawn_error_forwarder(&self, session: &Arc<dyn ConsumerSession>) {
        let Some(mut stream) = session.error_stream() else {
            return;
        };
        let Some(sender) = self.error_sender() else {
            return;
        };
        let mut cancel = self.cancel.subscribe();
        let group_id = self.group_id.clone();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    next = stream.recv() => next,
                    _ = cancel.changed() => break,
                };
                let Some(error) = next else { break };
                tokio::select! {
                    sent = sender.send(error) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                    _ = cancel.changed() => break,
                }
            }
            debug!(group_id = %group_id, "Session error forwarder drained");
        });
    }

    async fn publish_error(&self, error: SessionError, cancel: &mut watch::Receiver<bool>) {
        let Some(sender) = self.error_sender() else {
            return;
        };
        tokio::select! {
            sent = sender.send(error) => {
                if sent.is_err() {
                    debug!(group_id = %self.group_id, "Persistent error channel closed");
                }
            }
            _ = cancel.changed() => {}
        }
    }
}

fn session_error(error: ShepherdError) -> SessionError {
    match error {
        ShepherdError::Session(inner) => inner,
        other => SessionError::Consume(other.to_string()),
    }
}
