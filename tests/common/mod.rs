//! Shared test fixtures for shepherd integration tests
//!
//! In your test file, add:
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```
//!
//! Provides mock consumer sessions, a recording session builder, and a
//! recording control server so tests can drive the manager end to end
//! without a broker or a transport.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shepherd::config::{ClientConfig, FactoryConfig, ManagerConfig};
use shepherd::consumer::{
    ConsumeOptions, ConsumerRecord, ConsumerSession, ErrorStream, GroupManager, RecordHandler,
    SessionBuilder,
};
use shepherd::control::commands::OpCode;
use shepherd::control::{AsyncCommandHandler, AsyncCommandMessage, ControlServer};
use shepherd::error::{Result, SessionError, ShepherdError};
use tokio::sync::{mpsc, watch};

/// Error channel capacity inside each mock session
const MOCK_ERROR_CAPACITY: usize = 8;

// ============================================================================
// Mock consumer session
// ============================================================================

/// A consumer session whose consume call blocks until the session is
/// closed (returning the closed-group sentinel) or a scripted failure is
/// injected. Errors can be injected onto its error stream at any time.
pub struct MockSession {
    pub group_id: String,
    /// Broker list the builder was given; lets tests assert which factory
    /// config a session was built from.
    pub brokers: Vec<String>,
    closed: watch::Sender<bool>,
    fail_signal: watch::Sender<u64>,
    next_consume_error: Mutex<Option<ShepherdError>>,
    error_tx: Mutex<Option<mpsc::Sender<SessionError>>>,
    error_rx: Mutex<Option<mpsc::Receiver<SessionError>>>,
    handler: Mutex<Option<Arc<dyn RecordHandler>>>,
    consume_calls: AtomicUsize,
    close_calls: AtomicUsize,
}

impl MockSession {
    pub fn new(group_id: impl Into<String>, brokers: Vec<String>) -> Arc<Self> {
        let (error_tx, error_rx) = mpsc::channel(MOCK_ERROR_CAPACITY);
        let (closed, _) = watch::channel(false);
        let (fail_signal, _) = watch::channel(0u64);
        Arc::new(Self {
            group_id: group_id.into(),
            brokers,
            closed,
            fail_signal,
            next_consume_error: Mutex::new(None),
            error_tx: Mutex::new(Some(error_tx)),
            error_rx: Mutex::new(Some(error_rx)),
            handler: Mutex::new(None),
            consume_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
        })
    }

    /// Push an error onto the session's own error stream, as the client
    /// library would for a runtime session error.
    pub async fn inject_error(&self, error: SessionError) {
        let sender = self.error_tx.lock().clone();
        let sender = sender.expect("mock error stream closed");
        sender.send(error).await.expect("mock error stream closed");
    }

    /// Make the blocking consume call return `error` once.
    pub fn fail_consume(&self, error: ShepherdError) {
        *self.next_consume_error.lock() = Some(error);
        self.fail_signal.send_modify(|n| *n += 1);
    }

    /// Deliver one record through whatever handler the current consume
    /// call was given.
    pub async fn deliver(&self, record: ConsumerRecord) {
        let handler = self.handler.lock().clone();
        let handler = handler.expect("no consume call in progress");
        let _ = handler.handle(record).await;
    }

    pub fn consume_calls(&self) -> usize {
        self.consume_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.subscribe().borrow()
    }
}

#[async_trait]
impl ConsumerSession for MockSession {
    async fn consume(&self, _topics: &[String], handler: Arc<dyn RecordHandler>) -> Result<()> {
        self.consume_calls.fetch_add(1, Ordering::SeqCst);
        *self.handler.lock() = Some(handler);
        let mut closed = self.closed.subscribe();
        let mut fail = self.fail_signal.subscribe();
        loop {
            if *closed.borrow() {
                return Err(ShepherdError::ClosedGroup);
            }
            if let Some(error) = self.next_consume_error.lock().take() {
                return Err(error);
            }
            tokio::select! {
                _ = closed.changed() => {}
                _ = fail.changed() => {}
            }
        }
    }

    fn error_stream(&self) -> Option<mpsc::Receiver<SessionError>> {
        self.error_rx.lock().take()
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        // Closing ends the error stream and releases the handler claim,
        // like the real client library.
        self.error_tx.lock().take();
        self.handler.lock().take();
        let _ = self.closed.send(true);
        Ok(())
    }
}

// ============================================================================
// Mock session builder
// ============================================================================

/// Records every session it builds, per group, so tests can reach the
/// session behind a managed group and assert how many were created.
#[derive(Default)]
pub struct MockSessionBuilder {
    sessions: Mutex<HashMap<String, Vec<Arc<MockSession>>>>,
    fail_for: Mutex<HashSet<String>>,
}

impl MockSessionBuilder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `build` fail for the given group id.
    pub fn fail_for(&self, group_id: impl Into<String>) {
        self.fail_for.lock().insert(group_id.into());
    }

    /// The most recently built session for a group.
    pub fn latest_session(&self, group_id: &str) -> Arc<MockSession> {
        self.sessions
            .lock()
            .get(group_id)
            .and_then(|sessions| sessions.last().cloned())
            .expect("no session built for group")
    }

    /// Every session built for a group, oldest first.
    pub fn sessions_for(&self, group_id: &str) -> Vec<Arc<MockSession>> {
        self.sessions
            .lock()
            .get(group_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn session_count(&self, group_id: &str) -> usize {
        self.sessions
            .lock()
            .get(group_id)
            .map(|sessions| sessions.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl SessionBuilder for MockSessionBuilder {
    async fn build(
        &self,
        brokers: &[String],
        group_id: &str,
        _config: &ClientConfig,
    ) -> Result<Arc<dyn ConsumerSession>> {
        if self.fail_for.lock().contains(group_id) {
            return Err(ShepherdError::factory_failed(
                group_id,
                "refused by test builder",
            ));
        }
        let session = MockSession::new(group_id, brokers.to_vec());
        self.sessions
            .lock()
            .entry(group_id.to_string())
            .or_default()
            .push(Arc::clone(&session));
        Ok(session)
    }
}

// ============================================================================
// Mock control server
// ============================================================================

/// The reply a handler sent for one dispatched command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Success,
    Failed(String),
}

/// One dispatched command message, capturing the handler's reply
pub struct MockCommandMessage {
    payload: Vec<u8>,
    reply: Mutex<Option<CommandReply>>,
}

impl MockCommandMessage {
    pub fn new(payload: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            payload,
            reply: Mutex::new(None),
        })
    }

    /// The reply, if the handler sent one. `None` means the message was
    /// silently dropped.
    pub fn reply(&self) -> Option<CommandReply> {
        self.reply.lock().clone()
    }

    pub fn is_success(&self) -> bool {
        matches!(self.reply(), Some(CommandReply::Success))
    }

    pub fn failure_message(&self) -> Option<String> {
        match self.reply() {
            Some(CommandReply::Failed(message)) => Some(message),
            _ => None,
        }
    }
}

#[async_trait]
impl AsyncCommandMessage for MockCommandMessage {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn notify_success(&self) {
        *self.reply.lock() = Some(CommandReply::Success);
    }

    async fn notify_failed(&self, error: ShepherdError) {
        *self.reply.lock() = Some(CommandReply::Failed(error.to_string()));
    }
}

/// Control server that stores registered handlers and lets tests dispatch
/// payloads to them directly.
#[derive(Default)]
pub struct MockControlServer {
    handlers: Mutex<HashMap<OpCode, AsyncCommandHandler>>,
}

impl MockControlServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Dispatch `payload` to the handler registered for `op_code` and
    /// return the message so the caller can inspect the reply.
    pub async fn dispatch(&self, op_code: OpCode, payload: Vec<u8>) -> Arc<MockCommandMessage> {
        let handler = self
            .handlers
            .lock()
            .get(&op_code)
            .cloned()
            .expect("no handler registered for op code");
        let message = MockCommandMessage::new(payload);
        handler(Arc::clone(&message) as Arc<dyn AsyncCommandMessage>).await;
        message
    }
}

impl ControlServer for MockControlServer {
    fn add_async_handler(
        &self,
        op_code: OpCode,
        _result_op_code: OpCode,
        handler: AsyncCommandHandler,
    ) {
        self.handlers.lock().insert(op_code, handler);
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Record handler that counts deliveries
#[derive(Default)]
pub struct CountingHandler {
    handled: AtomicUsize,
}

impl CountingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordHandler for CountingHandler {
    async fn handle(&self, _record: ConsumerRecord) -> std::result::Result<(), SessionError> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Record handler that rejects every delivery
pub struct FailingHandler;

#[async_trait]
impl RecordHandler for FailingHandler {
    async fn handle(&self, record: ConsumerRecord) -> std::result::Result<(), SessionError> {
        Err(SessionError::handler(
            record.topic,
            record.partition,
            record.offset,
            "rejected by test handler",
        ))
    }
}

// ============================================================================
// Manager fixtures
// ============================================================================

/// Lock timeout used by test managers; long enough to be reliable, short
/// enough that conflict tests stay fast.
pub const TEST_LOCK_TIMEOUT: Duration = Duration::from_millis(200);

/// Deadline for waiting on error streams in tests
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub const OLD_BROKERS: &[&str] = &["old-broker:9092"];
pub const NEW_BROKERS: &[&str] = &["new-broker:9092"];

pub fn brokers(addresses: &[&str]) -> Vec<String> {
    addresses.iter().map(|a| a.to_string()).collect()
}

/// A manager wired to a recording mock builder.
pub fn test_manager() -> (Arc<GroupManager>, Arc<MockSessionBuilder>) {
    let builder = MockSessionBuilder::new();
    let manager = GroupManager::new(
        ManagerConfig {
            lock_timeout: TEST_LOCK_TIMEOUT,
            ..ManagerConfig::default()
        },
        FactoryConfig::new(brokers(OLD_BROKERS), ClientConfig::default()),
        Arc::clone(&builder) as Arc<dyn SessionBuilder>,
    );
    (manager, builder)
}

/// Start a group with a counting handler on one topic.
pub async fn start_group(manager: &GroupManager, group_id: &str) -> Result<()> {
    manager
        .start_consumer_group(
            group_id,
            vec!["t".to_string()],
            CountingHandler::new(),
            ConsumeOptions::default(),
        )
        .await
}

/// Receive from an error stream with a deadline, so a broken test fails
/// instead of hanging.
pub async fn recv_timeout(stream: &ErrorStream, timeout: Duration) -> Option<SessionError> {
    tokio::time::timeout(timeout, stream.recv())
        .await
        .expect("timed out waiting on error stream")
}

/// A record for handler-path tests.
pub fn record(topic: &str, partition: i32, offset: i64) -> ConsumerRecord {
    ConsumerRecord {
        topic: topic.to_string(),
        partition,
        offset,
        key: None,
        payload: bytes::Bytes::from_static(b"payload"),
    }
}
