//! Initial tenant records written to admin storage
//!
//! The tenant id is the gateway's public domain, which only exists once the
//! gateway function and its distribution are both up.

use crate::naming::ResourceNames;
use serde::{Deserialize, Serialize};

/// Statements that change data or schema; never cached
pub const MUTATING_STATEMENTS: [&str; 10] = [
    "INSERT", "UPDATE", "DELETE", "MERGE", "CREATE", "ALTER", "DROP", "TRUNCATE", "GRANT",
    "REVOKE",
];

pub const READ_STATEMENTS: [&str; 4] = ["SELECT", "SHOW", "DESCRIBE", "WITH"];

/// 24 hours
pub const READ_TTL_SECONDS: u64 = 86_400;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantConfig {
    pub tenant_id: String,
    pub tenant_name: String,
    pub data_adapter: DataAdapter,
    pub storage: TenantStorage,
    pub logging: TenantLogging,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataAdapter {
    #[serde(rename = "type")]
    pub kind: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantStorage {
    #[serde(rename = "type")]
    pub kind: String,
    pub bucket: String,
    pub region: String,
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantLogging {
    pub enabled: bool,
    pub bucket: String,
    pub prefix: String,
}

impl TenantConfig {
    pub fn new(tenant_id: &str, names: &ResourceNames, region: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            tenant_name: names.prefix.clone(),
            data_adapter: DataAdapter {
                kind: "passthrough".to_string(),
                timeout_ms: 30_000,
            },
            storage: TenantStorage {
                kind: "s3".to_string(),
                bucket: names.gateway_bucket.clone(),
                region: region.to_string(),
                prefix: format!("cache/{}/", tenant_id),
            },
            logging: TenantLogging {
                enabled: true,
                bucket: names.admin_bucket.clone(),
                prefix: format!("logs/{}/", tenant_id),
            },
        }
    }

    pub fn object_key(&self) -> String {
        tenant_object_key(&self.tenant_id, "conf.json")
    }
}

pub fn tenant_object_key(tenant_id: &str, file: &str) -> String {
    format!("config/tenants/{}/{}", tenant_id, file)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRule {
    pub id: String,
    /// Lower numbers are evaluated first
    pub priority: u32,
    pub statement_types: Vec<String>,
    pub cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRules {
    pub tenant_id: String,
    pub rules: Vec<CacheRule>,
}

impl CacheRules {
    pub fn defaults(tenant_id: &str) -> Self {
        let mut rules = vec![
            CacheRule {
                id: "cache-reads".to_string(),
                priority: 100,
                statement_types: READ_STATEMENTS.iter().map(|s| s.to_string()).collect(),
                cache: true,
                ttl_seconds: Some(READ_TTL_SECONDS),
            },
            CacheRule {
                id: "no-cache-mutations".to_string(),
                priority: 10,
                statement_types: MUTATING_STATEMENTS.iter().map(|s| s.to_string()).collect(),
                cache: false,
                ttl_seconds: None,
            },
        ];
        rules.sort_by_key(|r| r.priority);
        Self {
            tenant_id: tenant_id.to_string(),
            rules,
        }
    }

    pub fn object_key(&self) -> String {
        tenant_object_key(&self.tenant_id, "rules.json")
    }

    /// First matching rule for a statement keyword
    pub fn rule_for(&self, statement: &str) -> Option<&CacheRule> {
        let keyword = statement.trim().to_ascii_uppercase();
        self.rules
            .iter()
            .find(|r| r.statement_types.iter().any(|s| *s == keyword))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_config_shape() {
        let names = ResourceNames::new("acme-dev");
        let config = TenantConfig::new("d2.cloudfront.net", &names, "us-west-2");
        assert_eq!(config.object_key(), "config/tenants/d2.cloudfront.net/conf.json");

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["tenantId"], "d2.cloudfront.net");
        assert_eq!(json["tenantName"], "acme-dev");
        assert_eq!(json["storage"]["bucket"], "acme-dev-airbrx-gateway-storage");
        assert_eq!(json["dataAdapter"]["type"], "passthrough");
    }

    #[test]
    fn test_rules_are_priority_ordered() {
        let rules = CacheRules::defaults("d2.cloudfront.net");
        assert_eq!(rules.object_key(), "config/tenants/d2.cloudfront.net/rules.json");
        assert!(rules.rules.windows(2).all(|w| w[0].priority <= w[1].priority));

        let insert = rules.rule_for("insert").unwrap();
        assert!(!insert.cache);
        assert_eq!(insert.priority, 10);

        let select = rules.rule_for("SELECT").unwrap();
        assert_eq!(select.ttl_seconds, Some(86_400));
        assert!(rules.rule_for("CALL").is_none());
    }
}
