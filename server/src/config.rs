use crate::error::{Result, ServerError};
use clap::Parser;
use std::{
    net::{SocketAddr, ToSocketAddrs},
    time::Duration,
};

/// Multi-room chat relay server
#[derive(Debug, Clone, Parser)]
#[command(name = "server", version)]
pub struct Config {
    /// Address to listen on
    #[arg(long, default_value = shared::DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    pub port: u16,

    /// Seconds without inbound traffic before a client is dropped (0 disables)
    #[arg(long, default_value_t = 0)]
    pub idle_timeout: u64,

    /// Server name shown to clients in the welcome message
    #[arg(long, default_value = "relay")]
    pub name: String,
}

impl Config {
    pub fn address(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                ServerError::Config(format!("{}:{} resolves to no address", self.host, self.port))
            })
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout))
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: shared::DEFAULT_HOST.to_string(),
            port: shared::DEFAULT_PORT,
            idle_timeout: 0,
            name: "relay".to_string(),
        }
    }
}
