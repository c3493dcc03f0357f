use std::fmt;

use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Close code used by the manager when it tears a connection down itself.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when the transport went away without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Lifecycle status of a connection manager.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    /// No connection and none pending
    #[default]
    Idle,
    /// Handshake in progress
    Connecting,
    /// Connected; heartbeats are running
    Open,
    /// Connection lost; a reconnect may be pending
    Closed,
    /// Reconnect attempts exhausted; requires an explicit caller action
    Failed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Snapshot of connection state, observable through
/// [`crate::ws::ConnectionManager::state`] and its watch channel.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionState {
    pub status: Status,
    /// Consecutive involuntary reconnects since the last successful open
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
    /// When `connect` last passed its preconditions; drives the debounce window
    pub last_connect_attempt_at: Option<Instant>,
    /// When the current connection was opened
    pub opened_at: Option<Instant>,
}

impl ConnectionState {
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.status, Status::Open)
    }

    /// `true` once retries are exhausted.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self.status, Status::Failed)
    }
}

/// Where in its lifecycle the transport was when an error was observed.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// The handshake never completed
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Error details handed to [`crate::ws::EventHandler::on_error`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub ready_state: ReadyState,
    /// Underlying transport message
    pub message: String,
}

impl ErrorInfo {
    #[must_use]
    pub fn new<S: Into<String>>(ready_state: ReadyState, message: S) -> Self {
        Self {
            ready_state,
            message: message.into(),
        }
    }

    /// Human readable description, as stored in [`ConnectionState::last_error`].
    #[must_use]
    pub fn describe(&self) -> String {
        match self.ready_state {
            ReadyState::Connecting => {
                format!("connection failed before opening: {}", self.message)
            }
            ReadyState::Open => format!("connection error while open: {}", self.message),
            ReadyState::Closing => format!("connection error while closing: {}", self.message),
            ReadyState::Closed => format!("connection error after close: {}", self.message),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Close details handed to [`crate::ws::EventHandler::on_close`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
    /// `true` when a close frame was exchanged
    pub was_clean: bool,
}

impl CloseInfo {
    /// A close without a close frame (refused, dropped, timed out).
    #[must_use]
    pub fn abnormal<S: Into<String>>(reason: S) -> Self {
        Self {
            code: ABNORMAL_CLOSURE,
            reason: reason.into(),
            was_clean: false,
        }
    }

    /// Whether this close should trigger the reconnect policy.
    #[must_use]
    pub const fn is_involuntary(&self) -> bool {
        self.code != NORMAL_CLOSURE
    }
}

impl From<Option<CloseFrame>> for CloseInfo {
    fn from(frame: Option<CloseFrame>) -> Self {
        match frame {
            Some(frame) => Self {
                code: u16::from(frame.code),
                reason: frame.reason.as_str().to_owned(),
                was_clean: true,
            },
            // RFC 6455 7.1.5: a close frame without a status code reports 1005.
            None => Self {
                code: u16::from(CloseCode::Status),
                reason: String::new(),
                was_clean: true,
            },
        }
    }
}
