use secrecy::{ExposeSecret as _, SecretString};
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use url::Url;

use crate::Result;
use crate::error::Error;

/// Where a connection goes and how it authenticates.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Target {
    pub url: Url,
    /// Bearer credential offered as the WebSocket sub-protocol
    pub auth_token: Option<SecretString>,
}

impl Target {
    #[must_use]
    pub fn new(url: Url, auth_token: Option<SecretString>) -> Self {
        Self { url, auth_token }
    }

    /// Build the client handshake request.
    pub fn request(&self) -> Result<Request> {
        let mut request = self.url.as_str().into_client_request()?;

        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(token.expose_secret()).map_err(|_e| {
                Error::validation("auth token is not a valid WebSocket sub-protocol value")
            })?;
            request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }

        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Kind;

    #[test]
    fn request_without_token_has_no_protocol() {
        let target = Target::new(Url::parse("ws://localhost:9000/ws?auctionId=a1").unwrap(), None);
        let request = target.request().unwrap();

        assert_eq!(request.uri().to_string(), "ws://localhost:9000/ws?auctionId=a1");
        assert!(request.headers().get(SEC_WEBSOCKET_PROTOCOL).is_none());
    }

    #[test]
    fn token_is_sent_as_sub_protocol() {
        let target = Target::new(
            Url::parse("wss://feed.example.com/ws?auctionId=a1").unwrap(),
            Some(SecretString::from("token-123")),
        );
        let request = target.request().unwrap();

        assert_eq!(
            request.headers().get(SEC_WEBSOCKET_PROTOCOL).unwrap(),
            "token-123"
        );
    }

    #[test]
    fn token_with_newline_is_rejected() {
        let target = Target::new(
            Url::parse("ws://localhost/ws").unwrap(),
            Some(SecretString::from("bad\ntoken")),
        );

        let error = target.request().unwrap_err();
        assert_eq!(error.kind(), Kind::Validation);
    }
}
