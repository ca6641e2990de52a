//! Managed consumer groups
//!
//! This module is organized into submodules:
//! - `session` - the consumed Kafka client seam (traits and record types)
//! - `factory` - session creation from a swappable broker/client config
//! - `group` - the per-group state machine and persistent error stream
//! - `registry` - the id → group map
//! - `manager` - the public facade and supervised consume loop

pub mod factory;
pub mod group;
pub mod manager;
pub mod registry;
pub mod session;

pub use factory::SessionFactory;
pub use group::{ErrorStream, GroupStatus, ManagedGroup};
pub use manager::{GroupManager, INTERNAL_LOCK_TOKEN};
pub use registry::GroupRegistry;
pub use session::{
    ConsumeOptions, ConsumerRecord, ConsumerSession, RecordHandler, SessionBuilder,
};
