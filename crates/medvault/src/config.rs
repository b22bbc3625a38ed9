//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

/// Configuration for the [`Kernel`](crate::Kernel).
///
/// Every field has a default, so a partial JSON document is valid:
///
/// ```
/// let config = medvault::VaultConfig::from_json_str(r#"{ "grant_ttl_ms": 86400000 }"#).unwrap();
/// assert_eq!(config.storage_timeout_ms, 5_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VaultConfig {
    /// Deadline for each BlobStore and Ledger call.
    pub storage_timeout_ms: u64,

    /// Lifetime of a newly approved or refreshed grant. `None` never expires.
    pub grant_ttl_ms: Option<u64>,

    /// Whether auditors may deny pending requests.
    pub auditor_override: bool,

    /// Page size for audit cursors and chain verification.
    pub audit_page_size: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            storage_timeout_ms: 5_000,
            grant_ttl_ms: None,
            auditor_override: false,
            audit_page_size: 256,
        }
    }
}

impl VaultConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| VaultError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| VaultError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage_timeout_ms == 0 {
            return Err(VaultError::Config("storage_timeout_ms must be positive".into()));
        }
        if self.audit_page_size == 0 {
            return Err(VaultError::Config("audit_page_size must be positive".into()));
        }
        if self.grant_ttl_ms == Some(0) {
            return Err(VaultError::Config("grant_ttl_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    /// Expiry for a grant issued at `now`.
    pub fn grant_expiry(&self, now: i64) -> Option<i64> {
        self.grant_ttl_ms
            .map(|ttl| now.saturating_add(i64::try_from(ttl).unwrap_or(i64::MAX)))
    }
}
