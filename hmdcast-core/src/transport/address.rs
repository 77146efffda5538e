//! Transport connection strings.
//!
//! ```text
//! [@|>]tcp://<host>:<port>
//! ```
//!
//! `@` binds and waits for subscribers, `>` connects to an upstream
//! peer (typically an XSUB proxy). Without a prefix the socket's default
//! applies: publishers bind, subscribers connect.

use std::fmt;

use crate::error::{Result, StreamError};

const TCP_SCHEME: &str = "tcp://";

/// Whether the socket listens or dials out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    Bind,
    Connect,
}

/// A parsed connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportAddress {
    mode: AddressMode,
    host: String,
    port: u16,
}

impl TransportAddress {
    /// Parse `address`, using `default_mode` when it has no `@`/`>` prefix.
    pub fn parse(address: &str, default_mode: AddressMode) -> Result<Self> {
        let invalid = |reason| StreamError::InvalidAddress {
            address: address.to_string(),
            reason,
        };

        let trimmed = address.trim();
        let (mode, rest) = match trimmed.as_bytes().first() {
            Some(b'@') => (AddressMode::Bind, &trimmed[1..]),
            Some(b'>') => (AddressMode::Connect, &trimmed[1..]),
            Some(_) => (default_mode, trimmed),
            None => return Err(invalid("empty address")),
        };

        let Some((scheme, authority)) = rest.split_once("://") else {
            return Err(invalid("missing scheme"));
        };
        if !scheme.eq_ignore_ascii_case("tcp") {
            return Err(invalid("unsupported scheme, only tcp is supported"));
        }

        let Some((host, port)) = authority.rsplit_once(':') else {
            return Err(invalid("missing port"));
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        if host == "*" && mode == AddressMode::Connect {
            return Err(invalid("wildcard host can only be bound"));
        }
        let port: u16 = port.parse().map_err(|_| invalid("invalid port"))?;
        if port == 0 && mode == AddressMode::Connect {
            return Err(invalid("cannot connect to port 0"));
        }

        Ok(Self {
            mode,
            host: host.to_string(),
            port,
        })
    }

    pub fn mode(&self) -> AddressMode {
        self.mode
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` suitable for `TcpListener::bind` / `TcpStream::connect`.
    pub fn socket_addr(&self) -> String {
        let host = if self.host == "*" {
            "0.0.0.0"
        } else {
            &self.host
        };
        format!("{host}:{}", self.port)
    }
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.mode {
            AddressMode::Bind => '@',
            AddressMode::Connect => '>',
        };
        write!(f, "{prefix}{TCP_SCHEME}{}:{}", self.host, self.port)
    }
}
