//! Deployment configuration document
//!
//! A `KEY=VALUE` file, one per deployment, written by `airbrx setup` with
//! owner-only permissions because it holds the git token, the God PAT and
//! the signing secret.

use crate::error::{ConfigError, Result};
use crate::write_private;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

/// Value written for optional integrations the operator skipped
pub const NOT_CONFIGURED: &str = "NOT_CONFIGURED";

/// Default base URL of the application repositories
pub const DEFAULT_REPO_BASE: &str = "https://github.com/airbrx";

/// Longest prefix whose derived bucket names stay within S3's 63 characters
pub const MAX_PREFIX_LEN: usize = 40;

pub const KEY_PREFIX: &str = "AIRBRX_PREFIX";
pub const KEY_REGION: &str = "AWS_REGION";
pub const KEY_GIT_TOKEN: &str = "GIT_TOKEN";
pub const KEY_GIT_BRANCH: &str = "GIT_BRANCH";
pub const KEY_GIT_REPO_BASE: &str = "GIT_REPO_BASE";
pub const KEY_GOD_PAT: &str = "GOD_PAT";
pub const KEY_SIGNING_SECRET: &str = "SIGNING_SECRET";
pub const KEY_OAUTH_PROJECT_ID: &str = "OAUTH_PROJECT_ID";
pub const KEY_AI_API_KEY: &str = "AI_API_KEY";
pub const KEY_NOTIFICATION_WEBHOOK_URL: &str = "NOTIFICATION_WEBHOOK_URL";

const KNOWN_KEYS: &[&str] = &[
    KEY_PREFIX,
    KEY_REGION,
    KEY_GIT_TOKEN,
    KEY_GIT_BRANCH,
    KEY_GIT_REPO_BASE,
    KEY_GOD_PAT,
    KEY_SIGNING_SECRET,
    KEY_OAUTH_PROJECT_ID,
    KEY_AI_API_KEY,
    KEY_NOTIFICATION_WEBHOOK_URL,
];

static PREFIX_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]*[a-z0-9]$").expect("valid prefix pattern"));

static REGION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2}(-[a-z]+)+-\d+$").expect("valid region pattern"));

/// Empty, or the placeholder written for a skipped value
pub fn is_unset(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case(NOT_CONFIGURED)
}

/// Check a deployment prefix against the naming rules
pub fn validate_prefix(prefix: &str) -> Result<()> {
    let invalid = |reason: &str| ConfigError::InvalidPrefix {
        prefix: prefix.to_string(),
        reason: reason.to_string(),
    };

    if prefix.len() > MAX_PREFIX_LEN {
        return Err(invalid(&format!("longer than {} characters", MAX_PREFIX_LEN)));
    }
    if !PREFIX_PATTERN.is_match(prefix) {
        return Err(invalid(
            "use lowercase letters, digits and inner hyphens (at least two characters)",
        ));
    }
    Ok(())
}

pub fn validate_region(region: &str) -> Result<()> {
    if REGION_PATTERN.is_match(region) {
        Ok(())
    } else {
        Err(ConfigError::InvalidRegion(region.to_string()))
    }
}

/// Immutable input bundle of one deployment
#[derive(Clone, PartialEq, Eq)]
pub struct DeploymentConfig {
    pub prefix: String,
    pub region: String,
    pub git_token: String,
    /// Branch checked out from every application repository
    pub git_branch: String,
    pub git_repo_base: String,
    /// God PAT
    pub admin_token: String,
    pub signing_secret: String,
    pub oauth_project_id: Option<String>,
    pub ai_api_key: Option<String>,
    pub notification_webhook_url: Option<String>,
}

impl DeploymentConfig {
    /// Parse and validate a configuration document
    pub fn parse(content: &str) -> Result<Self> {
        let values = parse_pairs(content)?;

        let required = |key: &'static str| -> Result<String> {
            values
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !is_unset(v))
                .ok_or(ConfigError::MissingKey(key))
        };
        let optional = |key: &str| -> Option<String> {
            values
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let prefix = required(KEY_PREFIX)?;
        let config = Self {
            region: required(KEY_REGION)?,
            git_token: required(KEY_GIT_TOKEN)?,
            git_branch: optional(KEY_GIT_BRANCH).unwrap_or_else(|| prefix.clone()),
            git_repo_base: optional(KEY_GIT_REPO_BASE)
                .unwrap_or_else(|| DEFAULT_REPO_BASE.to_string()),
            admin_token: required(KEY_GOD_PAT)?,
            signing_secret: required(KEY_SIGNING_SECRET)?,
            oauth_project_id: optional(KEY_OAUTH_PROJECT_ID),
            ai_api_key: optional(KEY_AI_API_KEY),
            notification_webhook_url: optional(KEY_NOTIFICATION_WEBHOOK_URL),
            prefix,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::ConfigFileMissing(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::parse(&content)?;
        tracing::debug!(
            "Loaded deployment {} ({}) from {}",
            config.prefix,
            config.region,
            path.display()
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            (KEY_PREFIX, &self.prefix),
            (KEY_REGION, &self.region),
            (KEY_GIT_TOKEN, &self.git_token),
            (KEY_GOD_PAT, &self.admin_token),
            (KEY_SIGNING_SECRET, &self.signing_secret),
        ] {
            if is_unset(value) {
                return Err(ConfigError::MissingKey(key));
            }
        }
        validate_prefix(&self.prefix)?;
        validate_region(&self.region)?;
        Ok(())
    }

    /// Render the document. Skipped optional values are written as
    /// `NOT_CONFIGURED` so the file lists every key.
    pub fn to_document(&self) -> String {
        let optional = |v: &Option<String>| v.clone().unwrap_or_else(|| NOT_CONFIGURED.to_string());

        let mut out = String::new();
        out.push_str(&format!("# airbrx deployment: {}\n", self.prefix));
        out.push_str("# Contains secrets. Keep this file private (mode 0600).\n\n");
        for (key, value) in [
            (KEY_PREFIX, self.prefix.clone()),
            (KEY_REGION, self.region.clone()),
            (KEY_GIT_TOKEN, self.git_token.clone()),
            (KEY_GIT_BRANCH, self.git_branch.clone()),
            (KEY_GIT_REPO_BASE, self.git_repo_base.clone()),
            (KEY_GOD_PAT, self.admin_token.clone()),
            (KEY_SIGNING_SECRET, self.signing_secret.clone()),
            (KEY_OAUTH_PROJECT_ID, optional(&self.oauth_project_id)),
            (KEY_AI_API_KEY, optional(&self.ai_api_key)),
            (KEY_NOTIFICATION_WEBHOOK_URL, optional(&self.notification_webhook_url)),
        ] {
            out.push_str(&format!("{}={}\n", key, quote(&value)));
        }
        out
    }

    /// Write the document with owner-only permissions
    pub fn write(&self, path: &Path) -> Result<()> {
        write_private(path, self.to_document().as_bytes())?;
        tracing::info!("Wrote deployment configuration to {}", path.display());
        Ok(())
    }
}

impl std::fmt::Debug for DeploymentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentConfig")
            .field("prefix", &self.prefix)
            .field("region", &self.region)
            .field("git_token", &"***")
            .field("git_branch", &self.git_branch)
            .field("git_repo_base", &self.git_repo_base)
            .field("admin_token", &"***")
            .field("signing_secret", &"***")
            .field("oauth_project_id", &self.oauth_project_id)
            .field("ai_api_key", &self.ai_api_key.as_ref().map(|_| "***"))
            .field("notification_webhook_url", &self.notification_webhook_url)
            .finish()
    }
}

/// Split a document into key/value pairs
fn parse_pairs(content: &str) -> Result<BTreeMap<String, String>> {
    let mut values = BTreeMap::new();

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::Parse {
            line: index + 1,
            message: "expected KEY=VALUE".to_string(),
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::Parse {
                line: index + 1,
                message: "empty key".to_string(),
            });
        }
        if !KNOWN_KEYS.contains(&key) {
            tracing::warn!("Ignoring unknown configuration key {} (line {})", key, index + 1);
            continue;
        }

        values.insert(key.to_string(), unquote(value.trim()));
    }

    Ok(values)
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        let inner = &value[1..value.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some(next) => out.push(next),
                    None => out.push('\\'),
                }
            } else {
                out.push(c);
            }
        }
        out
    } else if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        value[1..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}

fn quote(value: &str) -> String {
    let plain = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:@+,".contains(c));
    if plain && !value.is_empty() {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"
# airbrx deployment
AIRBRX_PREFIX=acme-dev
AWS_REGION=us-west-2
GIT_TOKEN=ghp_example
GOD_PAT=pat_0123
export SIGNING_SECRET="s3cr\"et"
OAUTH_PROJECT_ID=NOT_CONFIGURED
AI_API_KEY=
"#;

    #[test]
    fn test_parse_document() {
        let config = DeploymentConfig::parse(DOCUMENT).unwrap();
        assert_eq!(config.prefix, "acme-dev");
        assert_eq!(config.region, "us-west-2");
        assert_eq!(config.git_branch, "acme-dev");
        assert_eq!(config.git_repo_base, DEFAULT_REPO_BASE);
        assert_eq!(config.signing_secret, "s3cr\"et");
        assert_eq!(config.oauth_project_id.as_deref(), Some(NOT_CONFIGURED));
        assert_eq!(config.ai_api_key, None);
    }

    #[test]
    fn test_missing_required_key() {
        let doc = DOCUMENT.replace("GOD_PAT=pat_0123", "GOD_PAT=");
        assert!(matches!(
            DeploymentConfig::parse(&doc),
            Err(ConfigError::MissingKey("GOD_PAT"))
        ));
    }

    #[test]
    fn test_required_key_rejects_placeholder() {
        let doc = DOCUMENT.replace("GOD_PAT=pat_0123", "GOD_PAT=NOT_CONFIGURED");
        assert!(matches!(
            DeploymentConfig::parse(&doc),
            Err(ConfigError::MissingKey("GOD_PAT"))
        ));

        let mut config = DeploymentConfig::parse(DOCUMENT).unwrap();
        config.signing_secret = "not_configured".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingKey("SIGNING_SECRET"))
        ));
        config.signing_secret = "s3cret".to_string();
        config.git_token = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingKey("GIT_TOKEN"))
        ));
    }

    #[test]
    fn test_prefix_rules() {
        assert!(validate_prefix("acme-dev").is_ok());
        assert!(validate_prefix("a1").is_ok());
        assert!(validate_prefix("a").is_err());
        assert!(validate_prefix("-acme").is_err());
        assert!(validate_prefix("acme-").is_err());
        assert!(validate_prefix("Acme").is_err());
        assert!(validate_prefix("acme_dev").is_err());
        assert!(validate_prefix(&"a".repeat(MAX_PREFIX_LEN + 1)).is_err());
    }

    #[test]
    fn test_region_rules() {
        assert!(validate_region("us-west-2").is_ok());
        assert!(validate_region("ap-southeast-1").is_ok());
        assert!(validate_region("us-gov-west-1").is_ok());
        assert!(validate_region("uswest2").is_err());
    }

    #[test]
    fn test_malformed_line() {
        let err = DeploymentConfig::parse("AIRBRX_PREFIX acme").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_document_reparses() {
        let config = DeploymentConfig::parse(DOCUMENT).unwrap();
        let reparsed = DeploymentConfig::parse(&config.to_document()).unwrap();
        assert_eq!(reparsed.signing_secret, config.signing_secret);
        assert_eq!(reparsed.ai_api_key.as_deref(), Some(NOT_CONFIGURED));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = DeploymentConfig::parse(DOCUMENT).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("ghp_example"));
        assert!(!debug.contains("pat_0123"));
    }

    #[cfg(unix)]
    #[test]
    fn test_write_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deployments").join("acme-dev.env");
        let config = DeploymentConfig::parse(DOCUMENT).unwrap();
        config.write(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(DeploymentConfig::load(&path).unwrap().prefix, "acme-dev");
    }
}
