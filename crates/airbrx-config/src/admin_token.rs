//! Admin token (God PAT) record
//!
//! Generated once per deployment by `airbrx setup` and stored next to the
//! configuration document as `{prefix}.god-pat.json`. The deployer uploads
//! the file bytes unchanged to `pats/{token}.json` in the admin bucket.

use crate::error::{ConfigError, Result};
use crate::write_private;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const TOKEN_PREFIX: &str = "pat_";
const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminToken {
    pub id: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
    /// Always null: the God PAT does not expire
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: serde_json::Map<String, serde_json::Value>,
    pub tenants: Vec<String>,
}

impl AdminToken {
    /// A fresh token with unrestricted tenant scope
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_token(format!("{}{}", TOKEN_PREFIX, hex::encode(bytes)))
    }

    /// Wrap an existing token value in a new record
    pub fn from_token(token: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            token: token.into(),
            created_at: Utc::now(),
            expires_at: None,
            scopes: serde_json::Map::new(),
            tenants: vec!["*".to_string()],
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_private(path, &self.to_bytes()?)?;
        tracing::info!("Wrote admin token record to {}", path.display());
        Ok(())
    }

    /// Object key the record is uploaded under
    pub fn object_key(&self) -> String {
        format!("pats/{}.json", self.token)
    }
}

/// A token record together with the exact bytes to upload
#[derive(Debug, Clone)]
pub struct StoredToken {
    pub record: AdminToken,
    pub bytes: Vec<u8>,
}

/// Path of the token file for a configuration document
pub fn token_file_path(config_path: &Path, prefix: &str) -> PathBuf {
    config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{}.god-pat.json", prefix))
}

/// Load the token file if present, otherwise synthesize a record for the
/// configured token. A file whose token differs from the configured one is
/// rejected: the gateway and the stored record must agree.
pub fn load_or_synthesize(path: &Path, configured_token: &str) -> Result<StoredToken> {
    if path.exists() {
        let bytes = std::fs::read(path)?;
        let record: AdminToken = serde_json::from_slice(&bytes)?;
        if record.token != configured_token {
            return Err(ConfigError::InvalidToken(format!(
                "{} holds a different token than GOD_PAT",
                path.display()
            )));
        }
        tracing::debug!("Using admin token record {}", path.display());
        return Ok(StoredToken { record, bytes });
    }

    tracing::debug!(
        "No admin token file at {}, synthesizing a record",
        path.display()
    );
    let record = AdminToken::from_token(configured_token);
    let bytes = record.to_bytes()?;
    Ok(StoredToken { record, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_shape() {
        let token = AdminToken::generate();
        assert!(token.token.starts_with("pat_"));
        assert_eq!(token.token.len(), TOKEN_PREFIX.len() + TOKEN_BYTES * 2);
        assert_eq!(token.tenants, vec!["*".to_string()]);
        assert!(uuid::Uuid::parse_str(&token.id).is_ok());
        assert_ne!(token.token, AdminToken::generate().token);
    }

    #[test]
    fn test_record_json_shape() {
        let token = AdminToken::from_token("pat_abc");
        let value: serde_json::Value = serde_json::from_slice(&token.to_bytes().unwrap()).unwrap();
        assert_eq!(value["token"], "pat_abc");
        assert!(value["expiresAt"].is_null());
        assert_eq!(value["scopes"], serde_json::json!({}));
        assert_eq!(value["tenants"], serde_json::json!(["*"]));
        assert!(value["createdAt"].is_string());
        assert_eq!(token.object_key(), "pats/pat_abc.json");
    }

    #[test]
    fn test_load_keeps_file_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acme-dev.god-pat.json");
        let token = AdminToken::generate();
        token.save(&path).unwrap();

        let stored = load_or_synthesize(&path, &token.token).unwrap();
        assert_eq!(stored.bytes, std::fs::read(&path).unwrap());
        assert_eq!(stored.record, token);
    }

    #[test]
    fn test_mismatched_token_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acme-dev.god-pat.json");
        AdminToken::generate().save(&path).unwrap();

        assert!(matches!(
            load_or_synthesize(&path, "pat_other"),
            Err(ConfigError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_synthesized_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let stored = load_or_synthesize(&dir.path().join("missing.json"), "pat_x").unwrap();
        assert_eq!(stored.record.token, "pat_x");
        let reparsed: AdminToken = serde_json::from_slice(&stored.bytes).unwrap();
        assert_eq!(reparsed, stored.record);
    }

    #[test]
    fn test_token_file_path() {
        let path = token_file_path(Path::new("/cfg/deployments/acme-dev.env"), "acme-dev");
        assert_eq!(path, PathBuf::from("/cfg/deployments/acme-dev.god-pat.json"));
    }
}
