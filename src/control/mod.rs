//! Control-plane command dispatch
//!
//! Registers the asynchronous stop/start handlers with the control-protocol
//! server and routes validated commands into the group manager. The
//! transport (framing, reply correlation) lives behind the [`ControlServer`]
//! and [`AsyncCommandMessage`] traits; this module only decides what a
//! command means and what to reply.

pub mod commands;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, info};

use crate::consumer::GroupManager;
use crate::control::commands::{
    ConsumerGroupAsyncCommand, OpCode, CONSUMER_GROUP_COMMAND_VERSION,
};
use crate::error::ShepherdError;

/// Boxed callback registered for one op code
pub type AsyncCommandHandler =
    Arc<dyn Fn(Arc<dyn AsyncCommandMessage>) -> BoxFuture<'static, ()> + Send + Sync>;

/// One async command delivered by the control-protocol server
#[async_trait]
pub trait AsyncCommandMessage: Send + Sync {
    /// Raw payload bytes of the command.
    fn payload(&self) -> &[u8];

    /// Reply success to the sender.
    async fn notify_success(&self);

    /// Reply failure to the sender.
    async fn notify_failed(&self, error: ShepherdError);
}

/// Registration surface of the control-protocol server
pub trait ControlServer: Send + Sync {
    fn add_async_handler(
        &self,
        op_code: OpCode,
        result_op_code: OpCode,
        handler: AsyncCommandHandler,
    );
}

/// Which manager operation a decoded command maps to
#[derive(Debug, Clone, Copy)]
enum GroupCommandKind {
    Stop,
    Start,
}

/// Register the stop/start consumer-group handlers for `manager` on
/// `server`.
pub fn register_control_handlers(manager: &Arc<GroupManager>, server: &dyn ControlServer) {
    info!("Registering consumer group manager control handlers");

    let stop_manager = Arc::clone(manager);
    let stop_handler: AsyncCommandHandler = Arc::new(move |message| {
        let manager = Arc::clone(&stop_manager);
        Box::pin(process_group_command(
            manager,
            GroupCommandKind::Stop,
            message,
        ))
    });
    server.add_async_handler(
        OpCode::StopConsumerGroup,
        OpCode::StopConsumerGroupResult,
        stop_handler,
    );

    let start_manager = Arc::clone(manager);
    let start_handler: AsyncCommandHandler = Arc::new(move |message| {
        let manager = Arc::clone(&start_manager);
        Box::pin(process_group_command(
            manager,
            GroupCommandKind::Start,
            message,
        ))
    });
    server.add_async_handler(
        OpCode::StartConsumerGroup,
        OpCode::StartConsumerGroupResult,
        start_handler,
    );
}

/// Decode, version-gate, dispatch, and reply for one command message.
/// Undecodable payloads are not addressed to this handler and are dropped.
async fn process_group_command(
    manager: Arc<GroupManager>,
    kind: GroupCommandKind,
    message: Arc<dyn AsyncCommandMessage>,
) {
    let Some(command) = ConsumerGroupAsyncCommand::decode(message.payload()) else {
        debug!("Dropping control message with undecodable payload");
        return;
    };

    if command.version != CONSUMER_GROUP_COMMAND_VERSION {
        message
            .notify_failed(ShepherdError::version_mismatch(
                CONSUMER_GROUP_COMMAND_VERSION,
                command.version,
            ))
            .await;
        return;
    }

    let result = match kind {
        GroupCommandKind::Stop => manager.stop_group(&command.lock, &command.group_id).await,
        GroupCommandKind::Start => manager.start_group(&command.lock, &command.group_id).await,
    };

    match result {
        Ok(()) => message.notify_success().await,
        Err(error) => message.notify_failed(error).await,
    }
}
