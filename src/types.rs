use crate::error::{GridwanError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One committed mutation waiting to be shipped to a peer cluster.
///
/// Immutable once built. `value_envelope` is produced by the record store and
/// carries whatever the peer needs to merge the entry (value, version,
/// timestamps); the link never looks inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    container_name: String,
    key: Bytes,
    value_envelope: Bytes,
}

impl PendingUpdate {
    pub fn new(
        container_name: impl Into<String>,
        key: impl Into<Bytes>,
        value_envelope: impl Into<Bytes>,
    ) -> Self {
        Self {
            container_name: container_name.into(),
            key: key.into(),
            value_envelope: value_envelope.into(),
        }
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn value_envelope(&self) -> &Bytes {
        &self.value_envelope
    }
}

/// A resolved peer endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a configured target string.
    ///
    /// Accepts `host`, `host:port`, `[v6]` and `[v6]:port`. A bare IPv6
    /// literal without brackets is taken as a host with no port. When the port
    /// is absent `default_port` (the local node's listening port) is used.
    pub fn parse(raw: &str, default_port: u16) -> Result<Self> {
        let target = raw.trim();
        let invalid = |reason: &str| GridwanError::InvalidTarget {
            target: raw.to_string(),
            reason: reason.to_string(),
        };

        if target.is_empty() {
            return Err(invalid("empty target"));
        }

        let (host, port) = if let Some(rest) = target.strip_prefix('[') {
            let (host, after) = rest
                .split_once(']')
                .ok_or_else(|| invalid("missing closing bracket"))?;
            if after.is_empty() {
                (host, None)
            } else {
                let port = after
                    .strip_prefix(':')
                    .ok_or_else(|| invalid("unexpected characters after bracket"))?;
                (host, Some(port))
            }
        } else {
            match target.matches(':').count() {
                0 => (target, None),
                1 => {
                    let (host, port) = target.split_once(':').unwrap_or((target, ""));
                    (host, Some(port))
                }
                _ => (target, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("empty host"));
        }

        let port = match port {
            None => default_port,
            Some(p) => match p.parse::<u16>() {
                Ok(0) => return Err(invalid("port must be non-zero")),
                Ok(port) => port,
                Err(_) => return Err(invalid("port is not a number in 1..=65535")),
            },
        };

        Ok(Address::new(host, port))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Group identity and password presented to the peer cluster.
///
/// Opaque to the forwarder; the transport sends it and the peer validates it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCredentials {
    pub group_name: String,
    pub password: String,
}

impl LinkCredentials {
    pub fn new(group_name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            group_name: group_name.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for LinkCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkCredentials")
            .field("group_name", &self.group_name)
            .field("password", &"<redacted>")
            .finish()
    }
}
