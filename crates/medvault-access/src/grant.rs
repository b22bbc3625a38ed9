//! Access grants.
//!
//! A grant is created when the owner approves a request and carries the
//! record's content key wrapped for the grantee. It ends by revocation or
//! expiry and is otherwise never changed, except that approving again while
//! it is active refreshes its expiry.

use serde::{Deserialize, Serialize};

use medvault_core::{ActorId, RecordId, WrappedKey};

/// Permission for one actor to decrypt one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub record_id: RecordId,
    pub grantee_id: ActorId,
    /// Unix milliseconds.
    pub granted_at: i64,
    /// `None` means the grant never expires.
    pub expires_at: Option<i64>,
    pub revoked_at: Option<i64>,
    /// Content key sealed to the grantee's X25519 key.
    pub wrapped_key: WrappedKey,
}

impl AccessGrant {
    pub fn new(
        record_id: RecordId,
        grantee_id: ActorId,
        granted_at: i64,
        expires_at: Option<i64>,
        wrapped_key: WrappedKey,
    ) -> Self {
        Self {
            record_id,
            grantee_id,
            granted_at,
            expires_at,
            revoked_at: None,
            wrapped_key,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }

    /// Not revoked and not expired at `now`.
    pub fn is_active(&self, now: i64) -> bool {
        self.revoked_at.is_none() && !self.is_expired(now)
    }

    pub(crate) fn refresh(&mut self, expires_at: Option<i64>) {
        self.expires_at = expires_at;
    }

    pub(crate) fn revoke(&mut self, now: i64) {
        if self.revoked_at.is_none() {
            self.revoked_at = Some(now);
        }
    }
}
