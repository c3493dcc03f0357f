//! Live auction feed explorer.
//!
//! This demo:
//! 1. Reads the feed host from `AUCTION_FEED_HOST` (and `AUCTION_FEED_PAGE_SCHEME`)
//! 2. Subscribes to the auction given as the first argument
//! 3. Logs lifecycle callbacks and the first few messages
//! 4. Switches to a second auction if one is given, then disconnects
//!
//! Run with tracing enabled:
//! ```sh
//! AUCTION_FEED_HOST=localhost:8080 AUCTION_FEED_PAGE_SCHEME=http \
//!     RUST_LOG=info,auction_feed_client=debug cargo run --example auction_feed -- abc def
//! ```

use std::time::Duration;

use auction_feed_client::feed::{Endpoint, FeedClient, FeedConfig, InboundMessage};
use auction_feed_client::ws::config::Config;
use auction_feed_client::ws::{CloseInfo, ErrorInfo, EventHandler};
use futures::StreamExt as _;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

struct LoggingHandler;

impl EventHandler<InboundMessage> for LoggingHandler {
    fn on_open(&self) {
        info!(event = "open");
    }

    fn on_error(&self, error: &ErrorInfo) {
        warn!(event = "error", error = %error);
    }

    fn on_close(&self, close: &CloseInfo) {
        info!(event = "close", code = close.code, reason = %close.reason, clean = close.was_clean);
    }
}

async fn watch(client: &FeedClient<LoggingHandler>, limit: usize) {
    let mut stream = Box::pin(client.messages());
    let mut count = 0;

    while let Ok(Some(result)) = timeout(Duration::from_secs(10), stream.next()).await {
        match result {
            Ok(message) => {
                info!(
                    auction = ?message.auction_id,
                    kind = %message.msg_type,
                    data = %message.data
                );
                count += 1;
                if count >= limit {
                    break;
                }
            }
            Err(e) => debug!(error = %e),
        }
    }

    info!(received = count, state = ?client.state());
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let first = args.next().unwrap_or_else(|| "demo".to_owned());
    let second = args.next();

    let endpoint = Endpoint::from_env()?;
    info!(host = %endpoint.host, scheme = endpoint.scheme(), "Using feed endpoint");

    let feed = FeedConfig::builder().subscription_key(first.clone()).build();
    let client = FeedClient::new(endpoint, feed, Config::default(), LoggingHandler);

    info!(auction = %first, "Subscribing");
    client.connect();
    watch(&client, 5).await;

    if let Some(second) = second {
        info!(from = %first, to = %second, "Switching auction");
        client.set_subscription_key(Some(second));
        watch(&client, 5).await;
    }

    client.disconnect();
    info!(state = ?client.state(), "Disconnected");

    Ok(())
}
