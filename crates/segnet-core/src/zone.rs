//! Zones, roles and the capabilities a role grants
//!
//! A role is a tagged variant over two capabilities: a zone with the
//! `Listener` capability accepts its upstream link, a zone with the
//! `Connector` capability originates its downstream link. `ServerClient`
//! is both composed, not a specialization of either.

use std::borrow::Borrow;
use std::fmt;

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Unique name of a zone in the schedule
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneName(String);

impl ZoneName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ZoneName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ZoneName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl PartialEq<str> for ZoneName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Network behaviour of a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Originates the downstream link only (head of the chain)
    Client,
    /// Accepts the upstream link only (tail of the chain)
    Server,
    /// Accepts upstream and originates downstream
    ServerClient,
}

impl Role {
    pub fn capabilities(self) -> Capabilities {
        match self {
            Role::Client => Capabilities {
                listener: false,
                connector: true,
            },
            Role::Server => Capabilities {
                listener: true,
                connector: false,
            },
            Role::ServerClient => Capabilities {
                listener: true,
                connector: true,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
            Role::ServerClient => "server_client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single network capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Listener,
    Connector,
}

/// The capability set granted by a [`Role`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    listener: bool,
    connector: bool,
}

impl Capabilities {
    pub fn contains(self, capability: Capability) -> bool {
        match capability {
            Capability::Listener => self.listener,
            Capability::Connector => self.connector,
        }
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        [
            self.listener.then_some(Capability::Listener),
            self.connector.then_some(Capability::Connector),
        ]
        .into_iter()
        .flatten()
    }
}

/// A validated zone entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub name: ZoneName,
    pub role: Role,
    /// Upstream zone this zone accepts from
    pub listen_source: Option<ZoneName>,
    /// Downstream zone this zone connects to
    pub target: Option<ZoneName>,
    /// Address other zones use to reach this zone's listeners
    pub host: String,
}

impl Zone {
    pub fn capabilities(&self) -> Capabilities {
        self.role.capabilities()
    }

    /// First zone of the chain: reads the ingestion feed
    pub fn is_head(&self) -> bool {
        self.listen_source.is_none()
    }

    /// Last zone of the chain: delivers into the terminal sink
    pub fn is_tail(&self) -> bool {
        self.target.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_capabilities() {
        let client = Role::Client.capabilities();
        assert!(client.contains(Capability::Connector));
        assert!(!client.contains(Capability::Listener));

        let server = Role::Server.capabilities();
        assert!(server.contains(Capability::Listener));
        assert!(!server.contains(Capability::Connector));

        let both: Vec<_> = Role::ServerClient.capabilities().iter().collect();
        assert_eq!(both, vec![Capability::Listener, Capability::Connector]);
    }

    #[test]
    fn test_role_serde_names() {
        let role: Role = serde_json::from_str("\"server_client\"").unwrap();
        assert_eq!(role, Role::ServerClient);
        assert_eq!(Role::Client.to_string(), "client");
        assert!(serde_json::from_str::<Role>("\"gateway\"").is_err());
    }

    #[test]
    fn test_zone_name_lookup_by_str() {
        let mut zones = std::collections::BTreeMap::new();
        zones.insert(ZoneName::new("control_zone"), 1);
        assert_eq!(zones.get("control_zone"), Some(&1));
    }
}
