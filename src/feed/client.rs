use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bon::Builder;
use futures::Stream;
use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::{broadcast, watch};

use super::endpoint::Endpoint;
use super::types::{FeedProtocol, InboundMessage};
use crate::Result;
use crate::ws::config::Config;
use crate::ws::{ConnectionManager, ConnectionState, EventHandler, Status, Target};

/// Caller-supplied subscription settings.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct FeedConfig {
    /// Auction to subscribe to. Without a key nothing is connected.
    pub subscription_key: Option<String>,
    /// Bearer token offered during the WebSocket handshake
    pub auth_token: Option<SecretString>,
    /// When `false` no connection is attempted
    #[builder(default = true)]
    pub enabled: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            subscription_key: None,
            auth_token: None,
            enabled: true,
        }
    }
}

/// Real-time client for a single auction feed.
///
/// Changing the subscription key tears down the old connection before the
/// new one is opened, so messages never cross between auctions.
///
/// # Examples
///
/// ```rust, no_run
/// use auction_feed_client::feed::{Endpoint, FeedClient, FeedConfig};
/// use auction_feed_client::ws::config::Config;
/// use futures::StreamExt as _;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let endpoint = Endpoint::new("feed.example.com", "https")?;
///     let feed = FeedConfig::builder().subscription_key("abc".to_owned()).build();
///     let client = FeedClient::new(endpoint, feed, Config::default(), ());
///     client.connect();
///
///     let mut messages = Box::pin(client.messages());
///     while let Some(message) = messages.next().await {
///         println!("{:?}", message?);
///     }
///
///     Ok(())
/// }
/// ```
pub struct FeedClient<H: EventHandler<InboundMessage> = ()> {
    inner: Arc<ClientInner<H>>,
}

impl<H: EventHandler<InboundMessage>> Clone for FeedClient<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ClientInner<H: EventHandler<InboundMessage>> {
    endpoint: Endpoint,
    feed: Mutex<FeedConfig>,
    connection: ConnectionManager<InboundMessage, FeedProtocol, H>,
}

impl<H: EventHandler<InboundMessage>> FeedClient<H> {
    /// Create a client. Nothing is connected until [`connect`](Self::connect)
    /// or a subscription key change.
    pub fn new(endpoint: Endpoint, feed: FeedConfig, config: Config, handler: H) -> Self {
        let connection = ConnectionManager::new(config, FeedProtocol, handler);
        connection.set_enabled(feed.enabled);
        connection.set_target(target_for(&endpoint, &feed));

        Self {
            inner: Arc::new(ClientInner {
                endpoint,
                feed: Mutex::new(feed),
                connection,
            }),
        }
    }

    /// Switch to another auction, or to none.
    ///
    /// When the key changes the current subscription is disconnected and a
    /// connection for the new key is started. Empty keys count as `None`.
    pub fn set_subscription_key(&self, subscription_key: Option<String>) {
        let subscription_key = subscription_key.filter(|key| !key.is_empty());
        {
            let mut feed = self.feed();
            if feed.subscription_key == subscription_key {
                return;
            }
            #[cfg(feature = "tracing")]
            tracing::debug!(
                from = ?feed.subscription_key,
                to = ?subscription_key,
                "Switching auction subscription"
            );
            feed.subscription_key = subscription_key;
            self.inner
                .connection
                .set_target(target_for(&self.inner.endpoint, &feed));
        }

        self.inner.connection.disconnect();
        self.inner.connection.connect();
    }

    /// Replace the auth token. Takes effect on the next connection.
    pub fn set_auth_token(&self, auth_token: Option<SecretString>) {
        let mut feed = self.feed();
        feed.auth_token = auth_token;
        self.inner
            .connection
            .set_target(target_for(&self.inner.endpoint, &feed));
    }

    /// Enable or disable the subscription. Disabling tears the connection
    /// down; enabling connects.
    pub fn set_enabled(&self, enabled: bool) {
        self.feed().enabled = enabled;
        self.inner.connection.set_enabled(enabled);
        if enabled {
            self.inner.connection.connect();
        }
    }

    #[must_use]
    pub fn subscription_key(&self) -> Option<String> {
        self.feed().subscription_key.clone()
    }

    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// See [`ConnectionManager::connect`].
    pub fn connect(&self) {
        self.inner.connection.connect();
    }

    /// See [`ConnectionManager::disconnect`].
    pub fn disconnect(&self) {
        self.inner.connection.disconnect();
    }

    /// Start over after [`Status::Failed`] or at any other time.
    pub fn reconnect(&self) {
        self.inner.connection.reconnect();
    }

    /// Send a JSON message to the feed. Fails when the connection is not open.
    pub fn send_message<R: Serialize>(&self, payload: &R) -> Result<()> {
        self.inner.connection.send(payload)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.connection.status()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.state_receiver()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.inner.connection.subscribe()
    }

    /// Messages for the current subscription, without heartbeat acknowledgements.
    pub fn messages(&self) -> impl Stream<Item = Result<InboundMessage>> + use<H> {
        self.inner.connection.messages()
    }

    fn feed(&self) -> MutexGuard<'_, FeedConfig> {
        // FeedConfig is replaced field by field and stays consistent on poison.
        self.inner
            .feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn target_for(endpoint: &Endpoint, feed: &FeedConfig) -> Option<Target> {
    let key = feed.subscription_key.as_deref()?;
    match endpoint.url_for(key) {
        Ok(url) => Some(Target::new(url, feed.auth_token.clone())),
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %e, "Cannot build feed URL");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(feed: FeedConfig) -> FeedClient {
        let endpoint = Endpoint::new("127.0.0.1:1", "http").unwrap();
        FeedClient::new(endpoint, feed, Config::default(), ())
    }

    #[test]
    fn builder_defaults_to_enabled() {
        let feed = FeedConfig::builder().build();

        assert!(feed.enabled);
        assert!(feed.subscription_key.is_none());
        assert!(feed.auth_token.is_none());
    }

    #[test]
    fn new_client_is_idle() {
        let client = client(FeedConfig::builder().subscription_key("abc".to_owned()).build());

        assert_eq!(client.status(), Status::Idle);
        assert_eq!(client.subscription_key().as_deref(), Some("abc"));
    }

    #[test]
    fn connect_without_key_is_noop() {
        let client = client(FeedConfig::default());
        client.connect();

        assert_eq!(client.status(), Status::Idle);
        assert!(client.state().last_connect_attempt_at.is_none());
    }

    #[test]
    fn connect_while_disabled_is_noop() {
        let client = client(
            FeedConfig::builder()
                .subscription_key("abc".to_owned())
                .enabled(false)
                .build(),
        );
        client.connect();

        assert_eq!(client.status(), Status::Idle);
    }

    #[test]
    fn empty_key_counts_as_none() {
        let client = client(FeedConfig::default());
        client.set_subscription_key(Some(String::new()));

        assert!(client.subscription_key().is_none());
        assert_eq!(client.status(), Status::Idle);
    }

    #[test]
    fn send_before_open_fails() {
        let client = client(FeedConfig::default());
        let error = client
            .send_message(&serde_json::json!({ "type": "bid" }))
            .unwrap_err();

        assert!(matches!(
            error.downcast_ref::<crate::ws::WsError>(),
            Some(crate::ws::WsError::NotOpen)
        ));
    }

    #[test]
    fn connect_outside_runtime_records_error() {
        let client = client(FeedConfig::builder().subscription_key("abc".to_owned()).build());
        client.connect();

        let state = client.state();
        assert_eq!(state.status, Status::Idle);
        assert!(state.last_error.is_some());
    }
}
