//! Actor identity attached to intents and events.

use serde::{Deserialize, Serialize};

use crate::scope::LegalEntity;

/// Kind of principal acting on the platform.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Human,
    Agent,
    System,
    External,
    Import,
}

/// The authenticated (or ambient) identity behind an intent.
///
/// Mapped 1:1 from bearer-token claims at the HTTP boundary; constructed
/// directly for system intents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub sub: String,
    pub name: String,
    pub actor_type: ActorType,
    /// Legal-entity scope of the actor; `None` only for tenant-less system
    /// actors, which fall back to the default scope.
    pub legal_entity: Option<LegalEntity>,
    pub capabilities: Vec<String>,
}

impl Actor {
    /// Ambient system actor used by bootstrap and maintenance paths.
    pub fn system(name: impl Into<String>) -> Self {
        Self {
            sub: "system".to_string(),
            name: name.into(),
            actor_type: ActorType::System,
            legal_entity: None,
            capabilities: Vec::new(),
        }
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}
