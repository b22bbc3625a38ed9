//! Sealing: symmetric and asymmetric envelopes for records and messages.
//!
//! Records use a two-layer model:
//!
//! 1. A per-record [`ContentKey`] encrypts the record body into an [`Envelope`].
//! 2. The content key is sealed to each reader's X25519 key as a [`WrappedKey`].
//!
//! Messages are sealed directly to the recipient with a [`SealedBox`]
//! (ephemeral X25519 agreement, Blake3 key derivation, ChaCha20-Poly1305).

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::error::{CoreError, Result};

const SEAL_DOMAIN: &str = "medvault seal v1 x25519-chacha20poly1305";

/// An X25519 public key (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct X25519PublicKey(pub [u8; 32]);

impl X25519PublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl fmt::Debug for X25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X25519Pub({})", &hex::encode(self.0)[..16])
    }
}

/// An X25519 secret held by exactly one actor.
pub struct SealingSecret(StaticSecret);

impl SealingSecret {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(StaticSecret::from(bytes))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey(*PublicKey::from(&self.0).as_bytes())
    }

    fn agree(&self, peer: &X25519PublicKey) -> [u8; 32] {
        *self.0.diffie_hellman(&peer.to_dalek()).as_bytes()
    }
}

impl fmt::Debug for SealingSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SealingSecret({:?})", self.public_key())
    }
}

/// A 96-bit ChaCha20-Poly1305 nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealNonce(pub [u8; 12]);

impl SealNonce {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

/// A 256-bit symmetric key.
#[derive(Clone, PartialEq, Eq)]
pub struct ContentKey([u8; 32]);

impl ContentKey {
    /// Fresh random key, one per record.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }

    pub fn encrypt(&self, plaintext: &[u8], nonce: &SealNonce, aad: &[u8]) -> Result<Vec<u8>> {
        self.cipher()
            .encrypt(
                Nonce::from_slice(&nonce.0),
                Payload { msg: plaintext, aad },
            )
            .map_err(|e| CoreError::Encryption(e.to_string()))
    }

    pub fn decrypt(&self, ciphertext: &[u8], nonce: &SealNonce, aad: &[u8]) -> Result<Vec<u8>> {
        self.cipher()
            .decrypt(
                Nonce::from_slice(&nonce.0),
                Payload { msg: ciphertext, aad },
            )
            .map_err(|e| CoreError::Decryption(e.to_string()))
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContentKey(..)")
    }
}

/// Ciphertext of a record body under its content key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub nonce: SealNonce,
    /// Includes the Poly1305 tag.
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    pub fn encrypt(plaintext: &[u8], key: &ContentKey) -> Result<Self> {
        let nonce = SealNonce::generate();
        let ciphertext = key.encrypt(plaintext, &nonce, &[])?;
        Ok(Self { nonce, ciphertext })
    }

    pub fn decrypt(&self, key: &ContentKey) -> Result<Vec<u8>> {
        key.decrypt(&self.ciphertext, &self.nonce, &[])
    }

    /// Serialize to CBOR bytes for the blob store.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        to_cbor(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        from_cbor(bytes)
    }
}

/// Plaintext sealed so only the holder of the recipient's secret can open it.
///
/// `context` binds the box to what it is for (a record id, a message id);
/// opening with a different context fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBox {
    pub ephemeral_public: X25519PublicKey,
    pub nonce: SealNonce,
    pub ciphertext: Vec<u8>,
}

impl SealedBox {
    pub fn seal(plaintext: &[u8], recipient: &X25519PublicKey, context: &[u8]) -> Result<Self> {
        let ephemeral = EphemeralSecret::random_from_rng(rand::thread_rng());
        let ephemeral_public = X25519PublicKey(*PublicKey::from(&ephemeral).as_bytes());
        let shared = ephemeral.diffie_hellman(&recipient.to_dalek());

        let key = derive_box_key(shared.as_bytes(), &ephemeral_public, recipient, context);
        let nonce = SealNonce::generate();
        let ciphertext = key.encrypt(plaintext, &nonce, context)?;

        Ok(Self {
            ephemeral_public,
            nonce,
            ciphertext,
        })
    }

    pub fn open(&self, secret: &SealingSecret, context: &[u8]) -> Result<Vec<u8>> {
        let shared = secret.agree(&self.ephemeral_public);
        let key = derive_box_key(&shared, &self.ephemeral_public, &secret.public_key(), context);
        key.decrypt(&self.ciphertext, &self.nonce, context)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        to_cbor(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        from_cbor(bytes)
    }
}

fn derive_box_key(
    shared: &[u8; 32],
    ephemeral: &X25519PublicKey,
    recipient: &X25519PublicKey,
    context: &[u8],
) -> ContentKey {
    let mut hasher = blake3::Hasher::new_derive_key(SEAL_DOMAIN);
    hasher.update(shared);
    hasher.update(&ephemeral.0);
    hasher.update(&recipient.0);
    hasher.update(context);
    ContentKey(*hasher.finalize().as_bytes())
}

/// A record's content key sealed to one reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey(SealedBox);

impl WrappedKey {
    pub fn wrap(key: &ContentKey, recipient: &X25519PublicKey, context: &[u8]) -> Result<Self> {
        SealedBox::seal(key.as_bytes(), recipient, context).map(Self)
    }

    pub fn unwrap_key(&self, secret: &SealingSecret, context: &[u8]) -> Result<ContentKey> {
        let bytes = self.0.open(secret, context)?;
        let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            CoreError::Decryption(format!("wrapped key has {} bytes, expected 32", bytes.len()))
        })?;
        Ok(ContentKey(arr))
    }
}

fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn from_cbor<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sealed_box_roundtrip() {
        let recipient = SealingSecret::generate();
        let sealed = SealedBox::seal(b"lab results", &recipient.public_key(), b"msg-1").unwrap();
        assert_ne!(sealed.ciphertext, b"lab results");
        assert_eq!(sealed.open(&recipient, b"msg-1").unwrap(), b"lab results");
    }

    #[test]
    fn test_sealed_box_wrong_recipient_fails() {
        let recipient = SealingSecret::generate();
        let intruder = SealingSecret::generate();
        let sealed = SealedBox::seal(b"secret", &recipient.public_key(), b"ctx").unwrap();
        assert!(matches!(
            sealed.open(&intruder, b"ctx"),
            Err(CoreError::Decryption(_))
        ));
    }

    #[test]
    fn test_sealed_box_context_is_bound() {
        let recipient = SealingSecret::generate();
        let sealed = SealedBox::seal(b"secret", &recipient.public_key(), b"record-a").unwrap();
        assert!(sealed.open(&recipient, b"record-b").is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let recipient = SealingSecret::generate();
        let mut sealed = SealedBox::seal(b"secret", &recipient.public_key(), b"").unwrap();
        sealed.ciphertext[0] ^= 0x01;
        assert!(sealed.open(&recipient, b"").is_err());
    }

    #[test]
    fn test_envelope_through_cbor() {
        let key = ContentKey::generate();
        let envelope = Envelope::encrypt(b"ecg trace", &key).unwrap();
        let bytes = envelope.to_bytes().unwrap();
        let recovered = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(recovered.decrypt(&key).unwrap(), b"ecg trace");
    }

    #[test]
    fn test_envelope_wrong_key_fails() {
        let envelope = Envelope::encrypt(b"x", &ContentKey::generate()).unwrap();
        assert!(envelope.decrypt(&ContentKey::generate()).is_err());
    }

    #[test]
    fn test_wrapped_key_rewrap_for_second_reader() {
        let owner = SealingSecret::generate();
        let reader = SealingSecret::generate();
        let key = ContentKey::generate();

        let for_owner = WrappedKey::wrap(&key, &owner.public_key(), b"r1").unwrap();
        let recovered = for_owner.unwrap_key(&owner, b"r1").unwrap();
        let for_reader = WrappedKey::wrap(&recovered, &reader.public_key(), b"r1").unwrap();

        assert_eq!(for_reader.unwrap_key(&reader, b"r1").unwrap(), key);
        assert!(for_reader.unwrap_key(&owner, b"r1").is_err());
    }

    proptest! {
        #[test]
        fn prop_open_inverts_seal(plaintext in prop::collection::vec(any::<u8>(), 0..2048), seed in any::<[u8; 32]>()) {
            let secret = SealingSecret::from_bytes(seed);
            let sealed = SealedBox::seal(&plaintext, &secret.public_key(), b"prop").unwrap();
            prop_assert_eq!(sealed.open(&secret, b"prop").unwrap(), plaintext);
        }
    }
}
