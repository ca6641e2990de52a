//! Control-plane command payloads
//!
//! The wire shape of the asynchronous consumer-group commands and the lock
//! bits they carry. Payloads are JSON on the wire; framing and reply
//! correlation belong to the control-protocol transport.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Compiled-in version of the consumer-group command payload. Versions are
/// matched exactly; a mismatch is rejected with no side effects.
pub const CONSUMER_GROUP_COMMAND_VERSION: u16 = 1;

/// Operation codes understood by the control dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    StopConsumerGroup = 1,
    StopConsumerGroupResult = 2,
    StartConsumerGroup = 3,
    StartConsumerGroupResult = 4,
}

/// Lock bits carried by a consumer-group command.
///
/// A controller batching several commands locks the group on the first
/// (`lock_before`) and unlocks on the last (`unlock_after`), keeping other
/// controllers out in between.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLock {
    /// Opaque identifier of the lock holder
    pub token: String,
    /// Acquire the group's lock before the operation
    #[serde(default)]
    pub lock_before: bool,
    /// Release the group's lock after the operation
    #[serde(default)]
    pub unlock_after: bool,
}

impl CommandLock {
    pub fn new(token: impl Into<String>, lock_before: bool, unlock_after: bool) -> Self {
        Self {
            token: token.into(),
            lock_before,
            unlock_after,
        }
    }

    /// Lock for `token` before the operation, keep it held after.
    pub fn acquiring(token: impl Into<String>) -> Self {
        Self::new(token, true, false)
    }

    /// Release `token`'s lock after the operation.
    pub fn releasing(token: impl Into<String>) -> Self {
        Self::new(token, false, true)
    }
}

/// Async command instructing the manager to stop or start a managed group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerGroupAsyncCommand {
    pub version: u16,
    pub group_id: String,
    pub lock: CommandLock,
}

impl ConsumerGroupAsyncCommand {
    /// A command at the compiled-in version.
    pub fn new(group_id: impl Into<String>, lock: CommandLock) -> Self {
        Self {
            version: CONSUMER_GROUP_COMMAND_VERSION,
            group_id: group_id.into(),
            lock,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a payload. `None` means the bytes are not a consumer-group
    /// command at all; the dispatcher drops such messages silently.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        serde_json::from_slice(payload).ok()
    }
}
