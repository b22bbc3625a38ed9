//! Per-actor key material.

use serde::{Deserialize, Serialize};

use crate::crypto::{Ed25519PublicKey, Ed25519Signature, SigningKeypair};
use crate::seal::{SealingSecret, X25519PublicKey};

/// The key pair bound to one actor: Ed25519 for signing, X25519 for sealing.
///
/// Generated once per session establishment and never handed to the engine;
/// operations borrow it for the duration of a call.
#[derive(Debug)]
pub struct ActorKeys {
    signing: SigningKeypair,
    sealing: SealingSecret,
}

impl ActorKeys {
    pub fn generate() -> Self {
        Self {
            signing: SigningKeypair::generate(),
            sealing: SealingSecret::generate(),
        }
    }

    /// Deterministic keys for fixtures. The two halves use distinct seeds.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let sealing_seed = *blake3::Hasher::new_derive_key("medvault actor sealing seed")
            .update(&seed)
            .finalize()
            .as_bytes();
        Self {
            signing: SigningKeypair::from_seed(&seed),
            sealing: SealingSecret::from_bytes(sealing_seed),
        }
    }

    pub fn public_keys(&self) -> ActorPublicKeys {
        ActorPublicKeys {
            signing: self.signing.public_key(),
            sealing: self.sealing.public_key(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        self.signing.sign(message)
    }

    pub fn sealing_secret(&self) -> &SealingSecret {
        &self.sealing
    }
}

/// The shareable half of [`ActorKeys`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorPublicKeys {
    pub signing: Ed25519PublicKey,
    pub sealing: X25519PublicKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_keys_are_stable() {
        let a = ActorKeys::from_seed([7; 32]);
        let b = ActorKeys::from_seed([7; 32]);
        assert_eq!(a.public_keys(), b.public_keys());
    }

    #[test]
    fn test_signature_verifies_against_public_half() {
        let keys = ActorKeys::generate();
        let sig = keys.sign(b"hello");
        assert!(keys.public_keys().signing.is_valid(b"hello", &sig));
    }
}
