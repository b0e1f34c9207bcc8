//! Client configuration: relay URL and protocol timings.
//!
//! The defaults mirror what the hosted relay expects from browser clients:
//! an 8 s connect budget, a 25 s heartbeat, a 1.2 s fixed reconnect delay and
//! a 10 s wait for the join reply.

use crate::error::{RealtimeError, Result};
use std::time::Duration;
use url::Url;

/// Protocol version advertised in the socket query string.
pub const REALTIME_VSN: &str = "1.0.0";

/// Path of the websocket endpoint on the relay host.
pub const SOCKET_PATH: &str = "/realtime/v1/websocket";

/// Prefix every channel topic carries on the wire.
pub const TOPIC_PREFIX: &str = "realtime:";

/// Timings and endpoint for a [`RealtimeClient`](crate::RealtimeClient).
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeConfig {
    /// Relay base URL (`https://project.example.co` or `ws://127.0.0.1:4000`)
    pub base_url: String,
    /// API key sent as the `apikey` query parameter
    pub api_key: String,
    /// Upper bound on how long opening the socket may take
    pub connect_timeout: Duration,
    /// Interval between heartbeat frames on the `phoenix` topic
    pub heartbeat_interval: Duration,
    /// Fixed delay before a reconnect attempt
    pub reconnect_delay: Duration,
    /// Upper bound on how long a join reply may take
    pub join_timeout: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:54321".to_string(),
            api_key: String::new(),
            connect_timeout: Duration::from_millis(8_000),
            heartbeat_interval: Duration::from_millis(25_000),
            reconnect_delay: Duration::from_millis(1_200),
            join_timeout: Duration::from_millis(10_000),
        }
    }
}

impl RealtimeConfig {
    /// Creates a configuration with default timings for the given relay.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Builds the websocket URL for this relay.
    ///
    /// `http` becomes `ws` and `https` becomes `wss`; schemes that are already
    /// websocket schemes are kept. Any path or query on the base URL is
    /// replaced by the socket endpoint and its `apikey`/`vsn` parameters.
    pub fn socket_url(&self) -> Result<String> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| RealtimeError::InvalidUrl(format!("{}: {e}", self.base_url)))?;

        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(RealtimeError::InvalidUrl(format!(
                    "unsupported scheme '{other}'"
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| RealtimeError::InvalidUrl(format!("cannot use scheme '{scheme}'")))?;
        url.set_path(SOCKET_PATH);
        url.set_query(None);
        url.query_pairs_mut()
            .append_pair("apikey", &self.api_key)
            .append_pair("vsn", REALTIME_VSN);

        Ok(url.to_string())
    }

    /// Checks that every timing is non-zero and the URL is usable.
    pub fn validate(&self) -> Result<()> {
        self.socket_url()?;
        let timings = [
            ("connect_timeout", self.connect_timeout),
            ("heartbeat_interval", self.heartbeat_interval),
            ("reconnect_delay", self.reconnect_delay),
            ("join_timeout", self.join_timeout),
        ];
        for (name, value) in timings {
            if value.is_zero() {
                return Err(RealtimeError::InvalidConfig(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}

/// Returns the wire topic for a channel name, adding the `realtime:` prefix
/// unless it is already present.
pub fn wire_topic(name: &str) -> String {
    if name.starts_with(TOPIC_PREFIX) {
        name.to_string()
    } else {
        format!("{TOPIC_PREFIX}{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_url_from_https() {
        let config = RealtimeConfig::new("https://abc.example.co/some/path?x=1", "key123");
        let url = config.socket_url().unwrap();
        assert_eq!(
            url,
            "wss://abc.example.co/realtime/v1/websocket?apikey=key123&vsn=1.0.0"
        );
    }

    #[test]
    fn test_socket_url_from_http_keeps_port() {
        let config = RealtimeConfig::new("http://127.0.0.1:4000", "k");
        let url = config.socket_url().unwrap();
        assert_eq!(url, "ws://127.0.0.1:4000/realtime/v1/websocket?apikey=k&vsn=1.0.0");
    }

    #[test]
    fn test_socket_url_rejects_unknown_scheme() {
        let config = RealtimeConfig::new("ftp://example.com", "k");
        assert!(matches!(config.socket_url(), Err(RealtimeError::InvalidUrl(_))));
    }

    #[test]
    fn test_validate_rejects_zero_timing() {
        let mut config = RealtimeConfig::default();
        assert!(config.validate().is_ok());
        config.join_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_wire_topic_prefix() {
        assert_eq!(wire_topic("duel-ABC"), "realtime:duel-ABC");
        assert_eq!(wire_topic("realtime:duel-ABC"), "realtime:duel-ABC");
    }
}
