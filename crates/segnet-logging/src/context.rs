//! Zone context for multi-process logging
//!
//! Every zone runs in its own process and all of them usually write to one
//! aggregated stream. The root span built here stamps each line with the
//! zone identity and a per-process instance id.

use segnet_core::{Role, ZoneName};
use tracing::Span;
use uuid::Uuid;

/// Identity of the zone process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneContext {
    pub zone: ZoneName,
    pub role: Role,
    /// Unique per process start
    pub instance_id: Uuid,
}

impl ZoneContext {
    pub fn new(zone: ZoneName, role: Role) -> Self {
        Self::with_instance_id(zone, role, Uuid::new_v4())
    }

    /// Context with a fixed instance id
    pub fn with_instance_id(zone: ZoneName, role: Role, instance_id: Uuid) -> Self {
        Self {
            zone,
            role,
            instance_id,
        }
    }

    /// Root span of the zone process; instrument the agent future with it
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "zone",
            zone = %self.zone,
            role = %self.role,
            instance = %self.short_instance(),
        )
    }

    /// First eight hex digits of the instance id
    pub fn short_instance(&self) -> String {
        let mut id = self.instance_id.simple().to_string();
        id.truncate(8);
        id
    }
}
