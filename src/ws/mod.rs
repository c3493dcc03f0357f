//! Core WebSocket infrastructure.
//!
//! This module provides generic connection management that can be
//! specialized for different feeds through the [`Protocol`] and
//! [`EventHandler`] traits.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: WebSocket lifecycle with heartbeat, debounce, timeouts and bounded reconnection
//! - [`Protocol`]: Parses inbound frames and builds heartbeat frames
//! - [`EventHandler`]: Caller callbacks for open, message, error and close events
//! - [`Target`]: Endpoint URL plus optional sub-protocol auth token

pub mod config;
pub mod connection;
pub mod error;
pub mod state;
pub mod target;
pub mod traits;

pub use config::{Config, ReconnectConfig};
pub use connection::ConnectionManager;
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use state::{CloseInfo, ConnectionState, ErrorInfo, ReadyState, Status};
pub use target::Target;
pub use traits::*;
