//! Verified actors, their sessions, and the key directory.
//!
//! Identity verification happens upstream. A [`VerifiedActor`] is trusted as
//! given; the engine never re-checks it.

use std::collections::HashMap;
use std::sync::RwLock;

use medvault_core::{ActorId, ActorKeys, ActorPublicKeys, Role, SealingSecret};

use crate::error::{Result, VaultError};

/// An identity handed over by the upstream verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedActor {
    pub actor_id: ActorId,
    pub role: Role,
}

impl VerifiedActor {
    pub fn new(actor_id: impl Into<ActorId>, role: Role) -> Self {
        Self {
            actor_id: actor_id.into(),
            role,
        }
    }
}

/// A verified actor together with the keys generated for this session.
///
/// Private keys stay inside the session; operations borrow it.
#[derive(Debug)]
pub struct Session {
    actor: VerifiedActor,
    keys: ActorKeys,
}

impl Session {
    pub fn new(actor: VerifiedActor, keys: ActorKeys) -> Self {
        Self { actor, keys }
    }

    /// Start a session with freshly generated keys.
    pub fn establish(actor: VerifiedActor) -> Self {
        Self::new(actor, ActorKeys::generate())
    }

    pub fn actor(&self) -> &VerifiedActor {
        &self.actor
    }

    pub fn actor_id(&self) -> &ActorId {
        &self.actor.actor_id
    }

    pub fn role(&self) -> Role {
        self.actor.role
    }

    pub fn keys(&self) -> &ActorKeys {
        &self.keys
    }

    pub fn public_keys(&self) -> ActorPublicKeys {
        self.keys.public_keys()
    }

    pub(crate) fn sealing_secret(&self) -> &SealingSecret {
        self.keys.sealing_secret()
    }
}

/// Public entry for one registered actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub role: Role,
    pub keys: ActorPublicKeys,
}

/// Registry of verified actors and their public keys.
#[derive(Debug, Default)]
pub struct Directory {
    actors: RwLock<HashMap<ActorId, DirectoryEntry>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session's public half.
    ///
    /// Re-registering with the same role and keys is a no-op. Records and
    /// grants stay wrapped to the keys they were sealed for, so a changed
    /// key set is refused.
    pub fn register(&self, session: &Session) -> Result<()> {
        let entry = DirectoryEntry {
            role: session.role(),
            keys: session.public_keys(),
        };
        let mut actors = self
            .actors
            .write()
            .map_err(|e| VaultError::Internal(format!("directory lock: {e}")))?;

        match actors.get(session.actor_id()) {
            Some(existing) if *existing == entry => Ok(()),
            Some(_) => Err(VaultError::InvalidState(format!(
                "{} is already registered with different keys",
                session.actor_id()
            ))),
            None => {
                tracing::info!(actor = %session.actor_id(), role = %entry.role, "actor registered");
                actors.insert(session.actor_id().clone(), entry);
                Ok(())
            }
        }
    }

    /// Look up a registered actor. Fails with `NotFound` otherwise.
    pub fn lookup(&self, actor_id: &ActorId) -> Result<DirectoryEntry> {
        self.actors
            .read()
            .map_err(|e| VaultError::Internal(format!("directory lock: {e}")))?
            .get(actor_id)
            .copied()
            .ok_or_else(|| VaultError::NotFound(format!("actor {actor_id}")))
    }

    pub fn contains(&self, actor_id: &ActorId) -> bool {
        self.lookup(actor_id).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let directory = Directory::new();
        let session = Session::establish(VerifiedActor::new("did:eth:patient1", Role::Patient));
        directory.register(&session).unwrap();
        directory.register(&session).unwrap();

        let entry = directory.lookup(session.actor_id()).unwrap();
        assert_eq!(entry.keys, session.public_keys());
        assert_eq!(entry.role, Role::Patient);
    }

    #[test]
    fn test_changed_keys_are_refused() {
        let directory = Directory::new();
        let actor = VerifiedActor::new("did:eth:patient1", Role::Patient);
        directory.register(&Session::establish(actor.clone())).unwrap();
        let err = directory.register(&Session::establish(actor)).unwrap_err();
        assert!(matches!(err, VaultError::InvalidState(_)));
    }

    #[test]
    fn test_unknown_actor() {
        let directory = Directory::new();
        assert!(matches!(
            directory.lookup(&ActorId::new("did:eth:ghost")),
            Err(VaultError::NotFound(_))
        ));
    }
}
