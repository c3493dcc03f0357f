use std::env;

use url::Url;

use crate::Result;
use crate::error::Error;

/// Environment variable holding the feed host (`host[:port]`).
pub const HOST_VAR: &str = "AUCTION_FEED_HOST";

/// Environment variable holding the scheme of the hosting page (`http` or `https`).
pub const PAGE_SCHEME_VAR: &str = "AUCTION_FEED_PAGE_SCHEME";

const DEFAULT_PAGE_SCHEME: &str = "https";

/// Location of the auction feed server.
///
/// The WebSocket scheme follows the scheme of the page hosting the client:
/// `https` pages use `wss`, everything else uses `ws`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub secure: bool,
}

impl Endpoint {
    pub fn new<S: Into<String>>(host: S, page_scheme: &str) -> Result<Self> {
        let host = host.into();
        let host = host.trim().trim_end_matches('/');
        if host.is_empty() {
            return Err(Error::validation("feed host must not be empty"));
        }
        if host.contains("://") {
            return Err(Error::validation(format!(
                "feed host must not include a scheme, got {host}"
            )));
        }

        Ok(Self {
            host: host.to_owned(),
            secure: page_scheme.trim().eq_ignore_ascii_case("https"),
        })
    }

    /// Read the endpoint from [`HOST_VAR`] and [`PAGE_SCHEME_VAR`].
    pub fn from_env() -> Result<Self> {
        let host = env::var(HOST_VAR)
            .map_err(|_e| Error::validation(format!("{HOST_VAR} is not set")))?;
        let scheme = env::var(PAGE_SCHEME_VAR).unwrap_or_else(|_e| DEFAULT_PAGE_SCHEME.to_owned());

        Self::new(host, &scheme)
    }

    #[must_use]
    pub const fn scheme(&self) -> &'static str {
        if self.secure { "wss" } else { "ws" }
    }

    /// URL of the feed for `subscription_key`: `{scheme}://{host}/ws?auctionId={key}`.
    pub fn url_for(&self, subscription_key: &str) -> Result<Url> {
        if subscription_key.is_empty() {
            return Err(Error::validation("subscription key must not be empty"));
        }

        let mut url = Url::parse(&format!("{}://{}/ws", self.scheme(), self.host))?;
        url.query_pairs_mut()
            .append_pair("auctionId", subscription_key);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Kind;

    #[test]
    fn https_page_uses_wss() {
        let endpoint = Endpoint::new("feed.example.com", "https").unwrap();
        let url = endpoint.url_for("abc").unwrap();

        assert_eq!(url.as_str(), "wss://feed.example.com/ws?auctionId=abc");
    }

    #[test]
    fn http_page_uses_ws() {
        let endpoint = Endpoint::new("localhost:8080/", "http").unwrap();
        let url = endpoint.url_for("abc").unwrap();

        assert_eq!(url.as_str(), "ws://localhost:8080/ws?auctionId=abc");
    }

    #[test]
    fn key_is_query_encoded() {
        let endpoint = Endpoint::new("localhost", "HTTPS").unwrap();
        let url = endpoint.url_for("lot 7&x=1").unwrap();

        assert_eq!(url.as_str(), "wss://localhost/ws?auctionId=lot+7%26x%3D1");
        let (_, key) = url.query_pairs().next().unwrap();
        assert_eq!(key, "lot 7&x=1");
    }

    #[test]
    fn empty_key_is_rejected() {
        let endpoint = Endpoint::new("localhost", "http").unwrap();
        let error = endpoint.url_for("").unwrap_err();

        assert_eq!(error.kind(), Kind::Validation);
    }

    #[test]
    fn invalid_hosts_are_rejected() {
        assert!(Endpoint::new("  ", "https").is_err());
        assert!(Endpoint::new("wss://feed.example.com", "https").is_err());
    }
}
