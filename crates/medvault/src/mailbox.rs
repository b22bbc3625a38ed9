//! Sealed peer-to-peer messages.
//!
//! Any two registered actors may exchange messages; there is no grant gate.
//! Each message is sealed to the recipient's X25519 key, signed by the
//! sender, and logged as `message_sent`. Delivery is out of scope: the
//! mailbox only holds sealed messages for their recipients.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use medvault_core::{
    now_millis, ActorId, AuditAction, Blake3Hash, Ed25519Signature, MessageId, SealedBox,
    SubjectId,
};

use crate::audit::AuditLog;
use crate::error::{Result, VaultError};
use crate::session::{Directory, Session};

const MESSAGE_DOMAIN: &str = "medvault message v1";

/// An immutable sealed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedMessage {
    pub message_id: MessageId,
    pub sender_id: ActorId,
    pub recipient_id: ActorId,
    pub sealed: SealedBox,
    /// Unix milliseconds.
    pub timestamp: i64,
    /// Sender's signature over [`digest`](Self::digest).
    pub signature: Ed25519Signature,
}

impl SealedMessage {
    /// Context bound into the sealed box.
    fn seal_context(message_id: &MessageId, sender: &ActorId, recipient: &ActorId) -> Vec<u8> {
        let mut ctx = Vec::with_capacity(16 + sender.as_str().len() + recipient.as_str().len() + 2);
        ctx.extend_from_slice(message_id.as_bytes());
        ctx.extend_from_slice(sender.as_str().as_bytes());
        ctx.push(0);
        ctx.extend_from_slice(recipient.as_str().as_bytes());
        ctx.push(0);
        ctx
    }

    /// The hash the sender signs.
    pub fn digest(&self) -> Result<Blake3Hash> {
        message_digest(
            &self.message_id,
            &self.sender_id,
            &self.recipient_id,
            &self.sealed,
            self.timestamp,
        )
    }
}

fn message_digest(
    message_id: &MessageId,
    sender: &ActorId,
    recipient: &ActorId,
    sealed: &SealedBox,
    timestamp: i64,
) -> Result<Blake3Hash> {
    let sealed = sealed.to_bytes()?;
    Ok(Blake3Hash::derive(
        MESSAGE_DOMAIN,
        &[
            message_id.as_bytes(),
            sender.as_str().as_bytes(),
            recipient.as_str().as_bytes(),
            &sealed,
            &timestamp.to_le_bytes(),
        ],
    ))
}

/// Holds sealed messages per recipient.
pub struct SecureMailbox {
    audit: AuditLog,
    directory: Arc<Directory>,
    inboxes: Arc<RwLock<HashMap<ActorId, Vec<SealedMessage>>>>,
}

impl SecureMailbox {
    pub fn new(audit: AuditLog, directory: Arc<Directory>) -> Self {
        Self {
            audit,
            directory,
            inboxes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Seal `plaintext` for `recipient`, sign it, log it, and store it.
    pub async fn send(
        &self,
        sender: &Session,
        recipient: &ActorId,
        plaintext: &[u8],
    ) -> Result<SealedMessage> {
        self.directory.lookup(sender.actor_id())?;
        let recipient_keys = self.directory.lookup(recipient)?.keys;

        let message_id = MessageId::generate();
        let context = SealedMessage::seal_context(&message_id, sender.actor_id(), recipient);
        let sealed = SealedBox::seal(plaintext, &recipient_keys.sealing, &context)?;
        let timestamp = now_millis();
        let digest = message_digest(&message_id, sender.actor_id(), recipient, &sealed, timestamp)?;
        let message = SealedMessage {
            message_id,
            sender_id: sender.actor_id().clone(),
            recipient_id: recipient.clone(),
            sealed,
            timestamp,
            signature: sender.keys().sign(digest.as_bytes()),
        };

        let inboxes = Arc::clone(&self.inboxes);
        let delivered = message.clone();
        let (_, stored) = self
            .audit
            .append_then(
                sender.actor_id(),
                AuditAction::MessageSent,
                SubjectId::from(message_id),
                move |_| -> Result<_> {
                    inboxes
                        .write()
                        .map_err(|e| VaultError::Internal(format!("mailbox lock: {e}")))?
                        .entry(delivered.recipient_id.clone())
                        .or_default()
                        .push(delivered);
                    Ok(())
                },
            )
            .await?;
        stored?;

        debug!(message = %message_id, sender = %message.sender_id, recipient = %recipient, "message sent");
        Ok(message)
    }

    /// Messages addressed to the session's actor, oldest first.
    ///
    /// The returned vector is a snapshot; the read is audited.
    pub async fn inbox(&self, reader: &Session) -> Result<Vec<SealedMessage>> {
        let mut messages = self
            .inboxes
            .read()
            .map_err(|e| VaultError::Internal(format!("mailbox lock: {e}")))?
            .get(reader.actor_id())
            .cloned()
            .unwrap_or_default();
        // Stable: equal timestamps keep arrival order.
        messages.sort_by_key(|m| m.timestamp);

        self.audit
            .append(
                reader.actor_id(),
                AuditAction::InboxRead,
                SubjectId::from(reader.actor_id()),
            )
            .await?;
        Ok(messages)
    }

    /// Verify the sender's signature and decrypt a message addressed to the
    /// session's actor.
    pub fn open(&self, reader: &Session, message: &SealedMessage) -> Result<Vec<u8>> {
        if &message.recipient_id != reader.actor_id() {
            return Err(VaultError::Authorization(format!(
                "message {} is not addressed to {}",
                message.message_id,
                reader.actor_id()
            )));
        }

        let sender = self.directory.lookup(&message.sender_id)?;
        sender
            .keys
            .signing
            .verify(message.digest()?.as_bytes(), &message.signature)?;

        let context = SealedMessage::seal_context(
            &message.message_id,
            &message.sender_id,
            &message.recipient_id,
        );
        Ok(message.sealed.open(reader.sealing_secret(), &context)?)
    }
}

impl std::fmt::Debug for SecureMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureMailbox").finish_non_exhaustive()
    }
}
