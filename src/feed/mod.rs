//! Auction feed client.
//!
//! Specializes the generic [`crate::ws`] layer for the auction feed:
//!
//! - [`Endpoint`]: host and scheme of the feed server, `/ws?auctionId=` URL derivation
//! - [`FeedClient`]: one subscription, re-targeted when the auction id changes
//! - [`InboundMessage`]: `snapshot`, `update` and `error` messages (heartbeat
//!   acknowledgements are consumed internally)

pub mod client;
pub mod endpoint;
pub mod types;

pub use client::{FeedClient, FeedConfig};
pub use endpoint::Endpoint;
pub use types::{ClientMessage, FeedProtocol, InboundMessage, MessageType};
