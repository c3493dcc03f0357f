//! Core traits for generic WebSocket infrastructure.

use serde::de::DeserializeOwned;

use super::state::{CloseInfo, ErrorInfo};

/// Wire protocol spoken over a connection.
///
/// A protocol turns inbound frames into messages and knows what a heartbeat
/// looks like. Heartbeat acknowledgements should be filtered out by
/// [`Protocol::parse`] so they never reach subscribers.
///
/// # Example
///
/// ```ignore
/// pub struct JsonProtocol;
///
/// impl Protocol<MyMessage> for JsonProtocol {
///     fn parse(&self, bytes: &[u8]) -> crate::Result<Vec<MyMessage>> {
///         let msg: MyMessage = serde_json::from_slice(bytes)?;
///         Ok(vec![msg])
///     }
///
///     fn heartbeat(&self) -> String {
///         r#"{"type":"ping"}"#.to_owned()
///     }
/// }
/// ```
pub trait Protocol<M: DeserializeOwned>: Send + Sync + 'static {
    /// Parse incoming bytes into messages.
    ///
    /// May return an empty vec if the frame carries nothing for the caller.
    fn parse(&self, bytes: &[u8]) -> crate::Result<Vec<M>>;

    /// Text frame sent on every heartbeat tick.
    fn heartbeat(&self) -> String;
}

/// Callbacks invoked by [`crate::ws::ConnectionManager`].
///
/// Handlers run synchronously on the connection task, one event at a time, and
/// are never invoked for a connection that has been superseded or after
/// `disconnect` has returned. A handler may call back into the manager.
pub trait EventHandler<M>: Send + Sync + 'static {
    fn on_open(&self) {}

    fn on_message(&self, message: &M) {
        let _ = message;
    }

    fn on_error(&self, error: &ErrorInfo) {
        let _ = error;
    }

    fn on_close(&self, close: &CloseInfo) {
        let _ = close;
    }
}

impl<M> EventHandler<M> for () {}
