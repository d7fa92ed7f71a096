//! Per-request context extracted by the auth middleware.

use keystone_core::Actor;

/// The authenticated identity for this request. Present on every route
/// behind the auth middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorContext {
    actor: Actor,
}

impl ActorContext {
    pub fn new(actor: Actor) -> Self {
        Self { actor }
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn into_actor(self) -> Actor {
        self.actor
    }
}
