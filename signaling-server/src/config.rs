use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::Context;
use log::LevelFilter;
use serde::Deserialize;

/// Relay settings, read from `RELAY_`-prefixed environment variables.
#[derive(Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct RelayConfig {
    /// `RELAY_ADDRESS`, socket address to listen on.
    #[serde(default = "default_address")]
    pub address: String,
    /// `RELAY_LOG_LEVEL`, one of `off`, `error`, `warn`, `info`, `debug`, `trace`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl RelayConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        envy::prefixed("RELAY_")
            .from_env()
            .context("invalid relay configuration")
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> anyhow::Result<Self> {
        envy::prefixed("RELAY_")
            .from_iter(vars)
            .context("invalid relay configuration")
    }

    pub fn socket_address(&self) -> anyhow::Result<SocketAddr> {
        SocketAddr::from_str(&self.address)
            .with_context(|| format!("invalid ip address provided: {}", self.address))
    }

    pub fn level_filter(&self) -> anyhow::Result<LevelFilter> {
        LevelFilter::from_str(&self.log_level)
            .with_context(|| format!("invalid log level provided: {}", self.log_level))
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            log_level: default_log_level(),
        }
    }
}

fn default_address() -> String {
    "127.0.0.1:9001".to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}
