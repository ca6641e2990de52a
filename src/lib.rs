#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # shepherd
//!
//! Shepherd is a supervisor for Kafka consumer-group sessions. It keeps a
//! dynamic set of groups reachable by stable ids across stop/restart
//! cycles and exposes that lifecycle to a remote control plane over an
//! asynchronous command protocol.
//!
//! ## What it solves
//!
//! A broker-side consumer-group session is transient, and its blocking
//! consume call lives exactly as long as the session. Shepherd wraps each
//! session in a managed group so that:
//!
//! - a single outward consume call survives arbitrarily many stop/start
//!   cycles of the underlying session,
//! - the caller-visible error stream persists across those cycles and
//!   closes exactly once, when the group is closed,
//! - an external controller can stop, start, and reconfigure groups over
//!   async control commands, serialized by per-group lock tokens so a
//!   controller can batch safely.
//!
//! ## Usage
//!
//! ```ignore
//! use shepherd::{ClientConfig, FactoryConfig, GroupManager, ManagerConfig};
//! use shepherd::consumer::ConsumeOptions;
//! use shepherd::control::register_control_handlers;
//! use std::sync::Arc;
//!
//! # async fn example(builder: Arc<dyn shepherd::SessionBuilder>,
//! #                  handler: Arc<dyn shepherd::RecordHandler>,
//! #                  server: &dyn shepherd::control::ControlServer) -> shepherd::Result<()> {
//! let manager = GroupManager::new(
//!     ManagerConfig::default(),
//!     FactoryConfig::new(vec!["broker-1:9092".into()], ClientConfig::default()),
//!     builder,
//! );
//! register_control_handlers(&manager, server);
//!
//! manager
//!     .start_consumer_group("orders", vec!["orders".into()], handler, ConsumeOptions::default())
//!     .await?;
//!
//! // The stream below stays valid even while the control plane cycles
//! // the group through stop/start.
//! let errors = manager.errors("orders");
//!
//! manager.close_consumer_group("orders").await?;
//! # Ok(())
//! # }
//! ```
//!
//! The Kafka client library itself is out of scope: sessions are built
//! through the [`SessionBuilder`] trait, and the control-protocol
//! transport plugs in behind [`control::ControlServer`].

pub mod config;
pub mod consumer;
pub mod control;
pub mod error;

pub use config::{ClientConfig, FactoryConfig, ManagerConfig};
pub use consumer::{
    ConsumerRecord, ConsumerSession, ErrorStream, GroupManager, RecordHandler, SessionBuilder,
};
pub use error::{Result, SessionError, ShepherdError};
