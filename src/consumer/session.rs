//! The consumed Kafka client seam
//!
//! The manager never talks to a broker directly; it drives sessions through
//! the traits here. `SessionBuilder` is the injection point for the real
//! client library, and the seam tests use to substitute mock sessions.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::ClientConfig;
use crate::error::{Result, SessionError};

/// One record delivered to a [`RecordHandler`]
#[derive(Debug, Clone)]
pub struct ConsumerRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub payload: Bytes,
}

/// User-supplied record processing callback.
///
/// A handler failure does not end the session; it is forwarded to the
/// group's persistent error stream and consumption continues.
#[async_trait]
pub trait RecordHandler: Send + Sync {
    async fn handle(&self, record: ConsumerRecord) -> std::result::Result<(), SessionError>;
}

/// Handle to one Kafka consumer-group session.
///
/// Sessions are single-use: a closed session is never reopened. To restart
/// a group, a fresh session is obtained from the factory.
#[async_trait]
pub trait ConsumerSession: Send + Sync {
    /// Join the group and consume the given topics, blocking for the
    /// lifetime of the session. Returns [`ShepherdError::ClosedGroup`]
    /// when the session was closed out from under the call; any other
    /// error is a non-terminal session failure.
    ///
    /// [`ShepherdError::ClosedGroup`]: crate::error::ShepherdError::ClosedGroup
    async fn consume(&self, topics: &[String], handler: Arc<dyn RecordHandler>) -> Result<()>;

    /// Take the session's error stream. Yields `None` after the first take;
    /// implementations close the stream when the session closes.
    fn error_stream(&self) -> Option<mpsc::Receiver<SessionError>>;

    /// Close the session and release its claims.
    async fn close(&self) -> Result<()>;
}

impl std::fmt::Debug for dyn ConsumerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn ConsumerSession").finish()
    }
}

/// Seam for the Kafka client library: builds a fresh consumer-group session
/// bound to a broker list, client config, and group id.
#[async_trait]
pub trait SessionBuilder: Send + Sync {
    async fn build(
        &self,
        brokers: &[String],
        group_id: &str,
        config: &ClientConfig,
    ) -> Result<Arc<dyn ConsumerSession>>;
}

/// Per-start tuning for a managed group's consume loop
#[derive(Debug, Clone, Default)]
pub struct ConsumeOptions {
    /// Override the manager-wide persistent error channel capacity
    pub error_channel_capacity: Option<usize>,
}
