use herd_core::HerdEvent;
use std::time::Instant;

/// Events emitted by the registry.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    ServerAdded {
        server_id: String,
        url: String,
        timestamp: Instant,
    },
    ServerRemoved {
        server_id: String,
        timestamp: Instant,
    },
    ServerUpdated {
        server_id: String,
        timestamp: Instant,
    },
    HealthChanged {
        server_id: String,
        healthy: bool,
        timestamp: Instant,
    },
    ModelBanned {
        server_id: String,
        model: String,
        reason: String,
        timestamp: Instant,
    },
    BanLifted {
        server_id: String,
        model: String,
        timestamp: Instant,
    },
}

impl HerdEvent for RegistryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RegistryEvent::ServerAdded { .. } => "ServerAdded",
            RegistryEvent::ServerRemoved { .. } => "ServerRemoved",
            RegistryEvent::ServerUpdated { .. } => "ServerUpdated",
            RegistryEvent::HealthChanged { .. } => "HealthChanged",
            RegistryEvent::ModelBanned { .. } => "ModelBanned",
            RegistryEvent::BanLifted { .. } => "BanLifted",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RegistryEvent::ServerAdded { timestamp, .. }
            | RegistryEvent::ServerRemoved { timestamp, .. }
            | RegistryEvent::ServerUpdated { timestamp, .. }
            | RegistryEvent::HealthChanged { timestamp, .. }
            | RegistryEvent::ModelBanned { timestamp, .. }
            | RegistryEvent::BanLifted { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            RegistryEvent::ServerAdded { server_id, .. }
            | RegistryEvent::ServerRemoved { server_id, .. }
            | RegistryEvent::ServerUpdated { server_id, .. }
            | RegistryEvent::HealthChanged { server_id, .. }
            | RegistryEvent::ModelBanned { server_id, .. }
            | RegistryEvent::BanLifted { server_id, .. } => server_id,
        }
    }
}
