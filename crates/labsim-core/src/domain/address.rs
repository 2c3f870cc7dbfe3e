//! Network bind addresses for TCP and UDP transports.
//!
//! Configuration files describe where a transport listens as a short string.
//! The accepted forms are:
//!
//! | Form            | Meaning                                  |
//! |-----------------|------------------------------------------|
//! | `"host:port"`   | bind `host` on `port`                    |
//! | `":port"`       | bind every interface (`0.0.0.0`)         |
//! | `"[::1]:port"`  | bracketed IPv6 host                      |
//! | `["host", port]`| list form, handled by `TransportUrl`     |
//!
//! Port `0` asks the operating system for a free port; the transport reports
//! the port it actually bound after `start`.

use std::fmt;

use thiserror::Error;

/// Host used when an address omits it.
pub const ANY_HOST: &str = "0.0.0.0";

/// Error type for address parsing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddressError {
    /// The address has no `:port` part.
    #[error("address {0:?} has no port (expected host:port)")]
    MissingPort(String),

    /// The port is not an integer in `0..=65535`.
    #[error("address {address:?} has an invalid port {port:?}")]
    InvalidPort { address: String, port: String },

    /// A `[` opened an IPv6 host without a matching `]`.
    #[error("address {0:?} has an unterminated IPv6 bracket")]
    UnterminatedBracket(String),
}

/// A host/port pair a TCP or UDP transport binds to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindAddress {
    pub host: String,
    pub port: u16,
}

impl BindAddress {
    /// Builds an address, substituting [`ANY_HOST`] for an empty host.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let host = if host.is_empty() {
            ANY_HOST.to_string()
        } else {
            host
        };
        Self { host, port }
    }

    /// Parses the `"host:port"` / `":port"` / `"[v6]:port"` string forms.
    pub fn parse(address: &str) -> Result<Self, AddressError> {
        let address = address.trim();

        let (host, port) = if let Some(rest) = address.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| AddressError::UnterminatedBracket(address.to_string()))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| AddressError::MissingPort(address.to_string()))?;
            (host, port)
        } else {
            address
                .rsplit_once(':')
                .ok_or_else(|| AddressError::MissingPort(address.to_string()))?
        };

        let port = port.parse::<u16>().map_err(|_| AddressError::InvalidPort {
            address: address.to_string(),
            port: port.to_string(),
        })?;

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for BindAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_and_port() {
        let addr = BindAddress::parse("localhost:5000").expect("valid");
        assert_eq!(addr, BindAddress::new("localhost", 5000));
    }

    #[test]
    fn test_parse_port_only_binds_all_interfaces() {
        let addr = BindAddress::parse(":12345").expect("valid");
        assert_eq!(addr.host, ANY_HOST);
        assert_eq!(addr.port, 12345);
    }

    #[test]
    fn test_parse_bracketed_ipv6() {
        let addr = BindAddress::parse("[::1]:7000").expect("valid");
        assert_eq!(addr.host, "::1");
        assert_eq!(addr.to_string(), "[::1]:7000");
    }

    #[test]
    fn test_parse_missing_port_fails() {
        assert_eq!(
            BindAddress::parse("localhost"),
            Err(AddressError::MissingPort("localhost".to_string()))
        );
    }

    #[test]
    fn test_parse_non_numeric_port_fails() {
        let err = BindAddress::parse("host:http").unwrap_err();
        assert!(matches!(err, AddressError::InvalidPort { .. }));
    }

    #[test]
    fn test_parse_port_out_of_range_fails() {
        let err = BindAddress::parse("host:70000").unwrap_err();
        assert!(matches!(err, AddressError::InvalidPort { .. }));
    }

    #[test]
    fn test_parse_unterminated_bracket_fails() {
        let err = BindAddress::parse("[::1:7000").unwrap_err();
        assert!(matches!(err, AddressError::UnterminatedBracket(_)));
    }

    #[test]
    fn test_display_round_trips_ipv4() {
        let addr = BindAddress::new("127.0.0.1", 0);
        assert_eq!(addr.to_string(), "127.0.0.1:0");
    }
}
