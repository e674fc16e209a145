//! Role/address input and node tuning.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::frame::{DEFAULT_MAX_FRAME_LEN, DEFAULT_MAX_HEADER_LEN};

/// Which side of the hub this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Role::Client),
            "server" => Ok(Role::Server),
            other => Err(ConfigError::UnknownRole(other.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

/// `host:port` of the hub a client dials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    /// Exactly two `:`-separated parts, port in `1..=65535`.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let parts: Vec<&str> = input.split(':').collect();
        let [host, port] = parts.as_slice() else {
            return Err(ConfigError::MalformedAddress(input.to_string()));
        };
        Ok(Self {
            host: host.to_string(),
            port: parse_port(port)?,
        })
    }
}

impl FromStr for PeerAddr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Bare port number a hub listens on.
pub fn parse_listen_port(input: &str) -> Result<u16, ConfigError> {
    parse_port(input)
}

fn parse_port(input: &str) -> Result<u16, ConfigError> {
    match input.trim().parse::<u16>() {
        Ok(port) if port >= 1 => Ok(port),
        _ => Err(ConfigError::InvalidPort(input.to_string())),
    }
}

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Interface the hub binds to.
    pub bind_host: String,
    /// How long a client waits for the hub to accept.
    pub connect_timeout: Duration,
    /// Largest frame body accepted from a peer.
    pub max_frame_len: usize,
    /// Largest header block accepted from a peer.
    pub max_header_len: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            connect_timeout: Duration::from_secs(5),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            max_header_len: DEFAULT_MAX_HEADER_LEN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!("client".parse::<Role>().unwrap(), Role::Client);
        assert_eq!("server".parse::<Role>().unwrap(), Role::Server);
        assert!(matches!(
            "Server".parse::<Role>(),
            Err(ConfigError::UnknownRole(_))
        ));
        assert_eq!(Role::Server.to_string(), "server");
    }

    #[test]
    fn test_peer_addr_parse() {
        let addr = PeerAddr::parse("localhost:8080").unwrap();
        assert_eq!(addr.host, "localhost");
        assert_eq!(addr.port, 8080);
        assert_eq!(addr.to_string(), "localhost:8080");
    }

    #[test]
    fn test_peer_addr_rejects_wrong_part_count() {
        assert!(matches!(
            PeerAddr::parse("localhost"),
            Err(ConfigError::MalformedAddress(_))
        ));
        assert!(matches!(
            PeerAddr::parse("::1:8080"),
            Err(ConfigError::MalformedAddress(_))
        ));
    }

    #[test]
    fn test_peer_addr_port_range() {
        assert!(PeerAddr::parse("host:1").is_ok());
        assert!(PeerAddr::parse("host:65535").is_ok());
        assert!(matches!(
            PeerAddr::parse("host:0"),
            Err(ConfigError::InvalidPort(_))
        ));
        assert!(matches!(
            PeerAddr::parse("host:65536"),
            Err(ConfigError::InvalidPort(_))
        ));
        assert!(matches!(
            PeerAddr::parse("host:http"),
            Err(ConfigError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_listen_port() {
        assert_eq!(parse_listen_port("8080").unwrap(), 8080);
        assert!(parse_listen_port("0").is_err());
        assert!(parse_listen_port("").is_err());
    }

    #[test]
    fn test_node_config_default() {
        let config = NodeConfig::default();
        assert_eq!(config.bind_host, "0.0.0.0");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.max_frame_len, DEFAULT_MAX_FRAME_LEN);
    }
}
