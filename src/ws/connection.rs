#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::cell::Cell;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_stream::try_stream;
use backoff::backoff::Backoff as _;
use futures::{SinkExt as _, Stream, StreamExt as _};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, timeout};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use super::config::{Config, ReconnectBackoff};
use super::error::WsError;
use super::state::{CloseInfo, ConnectionState, ErrorInfo, ReadyState, Status};
use super::target::Target;
use super::traits::{EventHandler, Protocol};
use crate::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reason attached to the close frame sent by [`ConnectionManager::disconnect`].
const CLIENT_CLOSE_REASON: &str = "client disconnect";

/// How long a closing handshake may take before the socket is simply dropped.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

thread_local! {
    /// Set while a handler callback runs on this thread.
    static IN_HANDLER: Cell<bool> = const { Cell::new(false) };
}

struct HandlerScope;

impl HandlerScope {
    fn enter() -> Self {
        IN_HANDLER.set(true);
        Self
    }
}

impl Drop for HandlerScope {
    fn drop(&mut self) {
        IN_HANDLER.set(false);
    }
}

/// Manages one WebSocket subscription: connect, heartbeat, reconnect, teardown.
///
/// The manager is a state machine over [`Status`]:
///
/// - `Idle` → `Connecting` on [`connect`](Self::connect)
/// - `Connecting` → `Open` once the handshake completes
/// - `Connecting`/`Open` → `Closed` on an involuntary close or a handshake timeout
/// - `Closed` → `Connecting` when the backoff delay elapses
/// - `Closed` → `Failed` on the `max_attempts`-th consecutive involuntary close
/// - any → `Idle` on [`disconnect`](Self::disconnect)
///
/// Each connection run executes on its own Tokio task and is tagged with a
/// generation number. Events from a run that has been superseded are dropped,
/// so callers never observe a stale connection.
///
/// # Type Parameters
///
/// - `M`: Message type delivered to handlers and subscribers
/// - `P`: [`Protocol`] used to parse inbound frames and build heartbeats
/// - `H`: [`EventHandler`] receiving lifecycle callbacks
///
/// # Example
///
/// ```ignore
/// let manager = ConnectionManager::new(Config::default(), FeedProtocol, ());
/// manager.set_target(Some(Target::new(url, None)));
/// manager.connect();
///
/// let mut rx = manager.subscribe();
/// while let Ok(msg) = rx.recv().await {
///     println!("Received: {:?}", msg);
/// }
/// ```
pub struct ConnectionManager<M, P, H = ()>
where
    M: DeserializeOwned + Debug + Clone + Send + 'static,
    P: Protocol<M>,
    H: EventHandler<M>,
{
    shared: Arc<Shared<M, P, H>>,
}

struct Shared<M, P, H> {
    config: Config,
    protocol: P,
    handler: H,
    /// Bumped on every `connect` that starts a run and on every `disconnect`
    generation: AtomicU64,
    /// Serializes state writes and handler callbacks against `connect`/`disconnect`
    gate: Mutex<()>,
    control: Mutex<Control>,
    state_tx: watch::Sender<ConnectionState>,
    broadcast_tx: broadcast::Sender<M>,
}

struct Control {
    target: Option<Target>,
    enabled: bool,
    run: Option<Run>,
    /// Present only while the current run is `Open`
    outbound: Option<mpsc::UnboundedSender<String>>,
}

struct Run {
    cancel: CancellationToken,
}

enum Outcome {
    /// The run was cancelled by `disconnect`, or superseded
    Cancelled,
    Closed(CloseInfo),
}

impl<M, P, H> ConnectionManager<M, P, H>
where
    M: DeserializeOwned + Debug + Clone + Send + 'static,
    P: Protocol<M>,
    H: EventHandler<M>,
{
    /// Create an idle connection manager. No I/O happens until [`connect`](Self::connect).
    pub fn new(config: Config, protocol: P, handler: H) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::default());
        let (broadcast_tx, _) = broadcast::channel(config.channel_capacity.max(1));

        Self {
            shared: Arc::new(Shared {
                config,
                protocol,
                handler,
                generation: AtomicU64::new(0),
                gate: Mutex::new(()),
                control: Mutex::new(Control {
                    target: None,
                    enabled: true,
                    run: None,
                    outbound: None,
                }),
                state_tx,
                broadcast_tx,
            }),
        }
    }

    /// Set the endpoint used by the next [`connect`](Self::connect).
    ///
    /// A running connection is left untouched; callers that switch targets
    /// should [`disconnect`](Self::disconnect) first.
    pub fn set_target(&self, target: Option<Target>) {
        self.shared.control().target = target;
    }

    /// Enable or disable the manager. Disabling tears down any connection.
    pub fn set_enabled(&self, enabled: bool) {
        self.shared.control().enabled = enabled;
        if !enabled {
            self.disconnect();
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.shared.control().enabled
    }

    /// Start connecting in the background.
    ///
    /// This is a no-op when the manager is disabled, has no target, was
    /// called within the debounce window, or already has a live connection.
    /// When the previous run exhausted its reconnect attempts the manager is
    /// moved to [`Status::Failed`] instead; use [`reconnect`](Self::reconnect)
    /// to start over.
    pub fn connect(&self) {
        let shared = &self.shared;
        let _gate = shared.gate();
        let mut control = shared.control();

        if !control.enabled {
            #[cfg(feature = "tracing")]
            tracing::trace!("Connect ignored, manager is disabled");
            return;
        }
        let Some(target) = control.target.clone() else {
            #[cfg(feature = "tracing")]
            tracing::trace!("Connect ignored, no target configured");
            return;
        };

        let now = Instant::now();
        let state = shared.state_tx.borrow().clone();

        if let Some(last) = state.last_connect_attempt_at
            && now.saturating_duration_since(last) < shared.config.debounce
        {
            #[cfg(feature = "tracing")]
            tracing::debug!("Connect ignored, called again within the debounce window");
            return;
        }

        let max_attempts = shared.config.reconnect.max_attempts;
        if state.reconnect_attempts > 0 && state.reconnect_attempts >= max_attempts {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                attempts = state.reconnect_attempts,
                "Connect refused, reconnect attempts exhausted"
            );
            shared.state_tx.send_modify(|state| {
                state.status = Status::Failed;
                state.last_error = Some(exhausted_message(max_attempts));
                state.last_connect_attempt_at = Some(now);
            });
            return;
        }

        if control.run.is_some() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Connect ignored, a connection is already active");
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            #[cfg(feature = "tracing")]
            tracing::warn!("Connect ignored, no Tokio runtime available");
            shared.state_tx.send_modify(|state| {
                state.last_error = Some(WsError::NoRuntime.to_string());
            });
            return;
        };

        let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        shared.state_tx.send_modify(|state| {
            state.status = Status::Connecting;
            state.last_connect_attempt_at = Some(now);
            state.opened_at = None;
        });

        let cancel = CancellationToken::new();
        // The task ends on its own once the token is cancelled.
        runtime.spawn(Self::connection_loop(
            Arc::clone(shared),
            generation,
            target,
            cancel.clone(),
        ));
        control.run = Some(Run { cancel });
    }

    /// Tear down the connection and return to [`Status::Idle`].
    ///
    /// Cancels the pending reconnect, heartbeat and handshake timers, closes
    /// the socket with a normal closure and resets the attempt counter. Safe
    /// to call at any time, any number of times.
    pub fn disconnect(&self) {
        let shared = &self.shared;
        let _gate = shared.gate();

        shared.generation.fetch_add(1, Ordering::SeqCst);
        let run = {
            let mut control = shared.control();
            control.outbound = None;
            control.run.take()
        };

        if let Some(run) = run {
            #[cfg(feature = "tracing")]
            tracing::debug!("Disconnecting WebSocket");
            run.cancel.cancel();
        }

        shared.state_tx.send_modify(|state| {
            state.status = Status::Idle;
            state.reconnect_attempts = 0;
            state.last_connect_attempt_at = None;
            state.opened_at = None;
        });
    }

    /// Disconnect and immediately connect again with a fresh attempt budget.
    pub fn reconnect(&self) {
        self.disconnect();
        self.connect();
    }

    /// Serialize and send a message on the open connection.
    ///
    /// Fails with [`WsError::NotOpen`] when no connection is open.
    pub fn send<R: Serialize>(&self, request: &R) -> Result<()> {
        let json = serde_json::to_string(request)?;
        self.send_text(json)
    }

    /// Send a raw text frame on the open connection.
    pub fn send_text(&self, text: String) -> Result<()> {
        let control = self.shared.control();
        let Some(outbound) = &control.outbound else {
            #[cfg(feature = "tracing")]
            tracing::warn!(status = %self.status(), "Cannot send, WebSocket is not open");
            return Err(WsError::NotOpen.into());
        };

        outbound
            .send(text)
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state_tx.borrow().clone()
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.shared.state_tx.borrow().status
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Subscribe to incoming messages.
    ///
    /// Each call returns a new independent receiver.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<M> {
        self.shared.broadcast_tx.subscribe()
    }

    /// Incoming messages as a stream. A lagging consumer gets [`WsError::Lagged`]
    /// and the stream ends.
    pub fn messages(&self) -> impl Stream<Item = Result<M>> + use<M, P, H> {
        let mut rx = self.subscribe();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(message) => yield message,
                    Err(RecvError::Lagged(count)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(count, "Message stream lagged");
                        Err(WsError::Lagged { count })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Body of a connection run: attempt, wait, retry until cancelled, closed
    /// normally, or out of attempts.
    async fn connection_loop(
        shared: Arc<Shared<M, P, H>>,
        generation: u64,
        target: Target,
        cancel: CancellationToken,
    ) {
        let mut backoff: ReconnectBackoff = shared.config.reconnect.clone().into();

        loop {
            let close = match Self::attempt(&shared, generation, &target, &cancel, &mut backoff)
                .await
            {
                Outcome::Cancelled => return,
                Outcome::Closed(close) => close,
            };

            let Some(Some(delay)) =
                shared.with_current(generation, |shared| shared.closed(&close, &mut backoff))
            else {
                return;
            };

            #[cfg(feature = "tracing")]
            tracing::debug!(
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis(),
                "Scheduling reconnect"
            );

            tokio::select! {
                () = cancel.cancelled() => return,
                () = sleep(delay) => {}
            }

            let resumed = shared.with_current(generation, |shared| {
                shared
                    .state_tx
                    .send_modify(|state| state.status = Status::Connecting);
            });
            if resumed.is_none() {
                return;
            }
        }
    }

    /// One connection attempt, from handshake to close.
    async fn attempt(
        shared: &Shared<M, P, H>,
        generation: u64,
        target: &Target,
        cancel: &CancellationToken,
        backoff: &mut ReconnectBackoff,
    ) -> Outcome {
        let request = match target.request() {
            Ok(request) => request,
            Err(e) => {
                let error = ErrorInfo::new(ReadyState::Connecting, e.to_string());
                shared.report_error(generation, &error);
                return Outcome::Closed(CloseInfo::abnormal(error.message));
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(url = %target.url, "Opening WebSocket connection");

        let connect_timeout = shared.config.connect_timeout;
        let connected = tokio::select! {
            () = cancel.cancelled() => return Outcome::Cancelled,
            result = timeout(connect_timeout, connect_async(request)) => result,
        };

        let ws_stream = match connected {
            Ok(Ok((ws_stream, _response))) => ws_stream,
            Ok(Err(e)) => {
                let error = ErrorInfo::new(ReadyState::Connecting, e.to_string());
                shared.report_error(generation, &error);
                return Outcome::Closed(CloseInfo::abnormal(error.message));
            }
            Err(_elapsed) => {
                let timed_out = WsError::Timeout {
                    after: connect_timeout,
                };
                let error = ErrorInfo::new(ReadyState::Connecting, timed_out.to_string());
                shared.report_error(generation, &error);
                return Outcome::Closed(CloseInfo::abnormal(error.message));
            }
        };

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let opened = shared.with_current(generation, |shared| {
            backoff.reset();
            shared.control().outbound = Some(outbound_tx);
            shared.state_tx.send_modify(|state| {
                state.status = Status::Open;
                state.reconnect_attempts = 0;
                state.last_error = None;
                state.opened_at = Some(Instant::now());
            });
            #[cfg(feature = "tracing")]
            tracing::debug!("WebSocket connection open");
            shared.handler.on_open();
        });

        if opened.is_none() {
            Self::close_quietly(ws_stream).await;
            return Outcome::Cancelled;
        }

        match Self::session(shared, generation, ws_stream, &mut outbound_rx, cancel).await {
            Some(close) => Outcome::Closed(close),
            None => Outcome::Cancelled,
        }
    }

    /// Drive an open connection. Returns `None` when cancelled.
    async fn session(
        shared: &Shared<M, P, H>,
        generation: u64,
        ws_stream: WsStream,
        outbound_rx: &mut mpsc::UnboundedReceiver<String>,
        cancel: &CancellationToken,
    ) -> Option<CloseInfo> {
        let (mut write, mut read) = ws_stream.split();

        let period = shared.config.heartbeat_interval;
        let heartbeat_enabled = !period.is_zero();
        let period = period.max(Duration::from_millis(1));
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let ping = shared.protocol.heartbeat();

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: CLIENT_CLOSE_REASON.into(),
                    };
                    _ = timeout(CLOSE_FLUSH_TIMEOUT, write.send(Message::Close(Some(frame)))).await;
                    return None;
                }

                _ = heartbeat.tick(), if heartbeat_enabled => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Sending heartbeat");
                    if let Err(e) = write.send(Message::Text(ping.clone().into())).await {
                        return Some(shared.transport_failure(generation, &e));
                    }
                }

                Some(text) = outbound_rx.recv() => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        return Some(shared.transport_failure(generation, &e));
                    }
                }

                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            #[cfg(feature = "tracing")]
                            tracing::trace!(%text, "Received WebSocket text message");
                            shared.dispatch(generation, text.as_bytes());
                        }
                        Some(Ok(Message::Binary(bytes))) => shared.dispatch(generation, &bytes),
                        Some(Ok(Message::Close(frame))) => {
                            let close = CloseInfo::from(frame);
                            #[cfg(feature = "tracing")]
                            tracing::debug!(code = close.code, reason = %close.reason, "Server closed WebSocket");
                            // Flush the close reply queued by tungstenite.
                            if let Ok(Err(e)) = timeout(CLOSE_FLUSH_TIMEOUT, write.close()).await
                                && !matches!(e, tungstenite::Error::ConnectionClosed)
                            {
                                let error = ErrorInfo::new(ReadyState::Closing, e.to_string());
                                shared.report_error(generation, &error);
                            }
                            return Some(close);
                        }
                        Some(Ok(_)) => {
                            // Ping/pong frames are answered by tungstenite.
                        }
                        Some(Err(e)) => return Some(shared.transport_failure(generation, &e)),
                        None => return Some(CloseInfo::abnormal("connection closed by peer")),
                    }
                }
            }
        }
    }

    async fn close_quietly(mut ws_stream: WsStream) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: CLIENT_CLOSE_REASON.into(),
        };
        _ = timeout(CLOSE_FLUSH_TIMEOUT, ws_stream.close(Some(frame))).await;
    }
}

impl<M, P, H> Drop for ConnectionManager<M, P, H>
where
    M: DeserializeOwned + Debug + Clone + Send + 'static,
    P: Protocol<M>,
    H: EventHandler<M>,
{
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl<M, P, H> Shared<M, P, H>
where
    M: DeserializeOwned + Debug + Clone + Send + 'static,
    P: Protocol<M>,
    H: EventHandler<M>,
{
    /// Take the delivery gate unless this thread is already inside a handler.
    fn gate(&self) -> Option<MutexGuard<'_, ()>> {
        if IN_HANDLER.get() {
            None
        } else {
            // The gate guards no data, so a poisoned lock is still usable.
            Some(self.gate.lock().unwrap_or_else(PoisonError::into_inner))
        }
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` if `generation` is still the current run. Handlers invoked
    /// inside `f` may call back into the manager.
    fn with_current<T, F>(&self, generation: u64, f: F) -> Option<T>
    where
        F: FnOnce(&Self) -> T,
    {
        let _gate = self.gate();
        if self.generation.load(Ordering::SeqCst) != generation {
            #[cfg(feature = "tracing")]
            tracing::trace!(generation, "Dropping event from superseded connection");
            return None;
        }
        let _scope = HandlerScope::enter();
        Some(f(self))
    }

    fn report_error(&self, generation: u64, error: &ErrorInfo) {
        self.with_current(generation, |shared| {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %error, "WebSocket error");
            shared
                .state_tx
                .send_modify(|state| state.last_error = Some(error.describe()));
            shared.handler.on_error(error);
        });
    }

    fn transport_failure(&self, generation: u64, e: &tungstenite::Error) -> CloseInfo {
        let ready_state = match e {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                ReadyState::Closed
            }
            _ => ReadyState::Open,
        };
        let error = ErrorInfo::new(ready_state, e.to_string());
        self.report_error(generation, &error);
        CloseInfo::abnormal(error.message)
    }

    /// Handle a close of the current run. Returns the reconnect delay, if any.
    ///
    /// Every involuntary close counts against the budget; the close that
    /// brings the count to `max_attempts` fails the run without another
    /// connection attempt.
    fn closed(&self, close: &CloseInfo, backoff: &mut ReconnectBackoff) -> Option<Duration> {
        let max_attempts = self.config.reconnect.max_attempts;
        let retry = if close.is_involuntary() {
            backoff
                .next_backoff()
                .filter(|_delay| backoff.attempt() < max_attempts)
        } else {
            None
        };

        self.control().outbound = None;
        self.state_tx.send_modify(|state| {
            state.opened_at = None;
            if retry.is_some() {
                state.status = Status::Closed;
                state.reconnect_attempts = backoff.attempt();
            } else if close.is_involuntary() {
                state.status = Status::Failed;
                state.reconnect_attempts = backoff.attempt();
                state.last_error = Some(exhausted_message(max_attempts));
            } else {
                state.status = Status::Closed;
            }
        });

        if retry.is_none() {
            // The run ends here; a later `connect` may start a new one.
            self.control().run = None;
            #[cfg(feature = "tracing")]
            if close.is_involuntary() {
                tracing::error!(max_attempts, "Reconnect attempts exhausted");
            }
        }

        self.handler.on_close(close);
        retry
    }

    fn dispatch(&self, generation: u64, bytes: &[u8]) {
        match self.protocol.parse(bytes) {
            Ok(messages) => {
                for message in messages {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(?message, "Parsed WebSocket message");
                    let delivered = self.with_current(generation, |shared| {
                        _ = shared.broadcast_tx.send(message.clone());
                        shared.handler.on_message(&message);
                    });
                    if delivered.is_none() {
                        return;
                    }
                }
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Failed to parse WebSocket message");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }
}

fn exhausted_message(max_attempts: u32) -> String {
    format!("gave up after {max_attempts} reconnect attempts")
}
