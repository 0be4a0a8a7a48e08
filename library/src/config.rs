use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:9001/bus";
const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

/// Client settings, read from `PUBSUB_`-prefixed environment variables.
///
/// | variable                    | default                    |
/// |-----------------------------|----------------------------|
/// | `PUBSUB_RELAY_URL`          | `ws://127.0.0.1:9001/bus`  |
/// | `PUBSUB_SESSION_ID`         | random                     |
/// | `PUBSUB_RECONNECT_DELAY_MS` | `1000`                     |
#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_relay_url")]
    pub relay_url: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl ClientConfig {
    /// # Errors
    /// Fails when a variable is set but can't be parsed.
    pub fn from_env() -> Result<Self> {
        Ok(envy::prefixed("PUBSUB_").from_env()?)
    }

    /// # Errors
    /// Fails when a variable is set but can't be parsed.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::prefixed("PUBSUB_").from_iter(vars)?)
    }

    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            session_id: None,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
        }
    }
}

fn default_relay_url() -> String {
    DEFAULT_RELAY_URL.to_owned()
}

const fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect()
    }

    #[test]
    fn missing_variables_fall_back_to_defaults() {
        let config = ClientConfig::from_vars(vars(&[("UNRELATED", "1")])).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.reconnect_delay(), Duration::from_secs(1));
    }

    #[test]
    fn prefixed_variables_are_read() {
        let config = ClientConfig::from_vars(vars(&[
            ("PUBSUB_RELAY_URL", "ws://relay.example:80/bus"),
            ("PUBSUB_SESSION_ID", "abc"),
            ("PUBSUB_RECONNECT_DELAY_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.relay_url, "ws://relay.example:80/bus");
        assert_eq!(config.session_id.as_deref(), Some("abc"));
        assert_eq!(config.reconnect_delay(), Duration::from_millis(250));
    }

    #[test]
    fn unparsable_delay_is_an_error() {
        let result = ClientConfig::from_vars(vars(&[("PUBSUB_RECONNECT_DELAY_MS", "soon")]));
        assert!(result.is_err());
    }
}
