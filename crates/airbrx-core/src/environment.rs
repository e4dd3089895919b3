//! Function environment documents
//!
//! Optional integrations are left out of a function's environment entirely
//! when they are not configured, rather than passed as empty strings.

use crate::naming::ResourceNames;
use airbrx_config::DeploymentConfig;
use serde::Serialize;

/// Values that must never reach a function environment
pub use airbrx_config::is_unset;

#[derive(Debug, Default)]
pub struct EnvironmentBuilder {
    vars: Vec<(String, String)>,
}

impl EnvironmentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn var(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        if is_unset(&value) {
            tracing::debug!("Omitting unset variable {}", key);
            return self;
        }
        // A later declaration replaces the earlier value in place
        match self.vars.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value,
            None => self.vars.push((key.to_string(), value)),
        }
        self
    }

    pub fn var_opt(self, key: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.var(key, value),
            None => self,
        }
    }

    pub fn build(self) -> EnvironmentDocument {
        EnvironmentDocument { vars: self.vars }
    }
}

/// Ordered, filtered environment of one function
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnvironmentDocument {
    vars: Vec<(String, String)>,
}

impl EnvironmentDocument {
    /// Rebuild from stored key/value pairs, dropping unset values again
    pub fn from_vars<'a>(vars: impl IntoIterator<Item = &'a (String, String)>) -> Self {
        vars.into_iter()
            .fold(EnvironmentBuilder::new(), |builder, (k, v)| {
                builder.var(k, v.as_str())
            })
            .build()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn into_vars(self) -> Vec<(String, String)> {
        self.vars
    }

    /// Render as `{"Variables":{...}}`, escaping backslash and double quote
    pub fn to_json(&self) -> String {
        let body = self
            .vars
            .iter()
            .map(|(k, v)| format!("\"{}\":\"{}\"", escape(k), escape(v)))
            .collect::<Vec<_>>()
            .join(",");
        format!("{{\"Variables\":{{{}}}}}", body)
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Which configuration pass of the admin API is being built
#[derive(Debug, Clone, Copy)]
pub enum ApiPass<'a> {
    /// Before any CDN exists
    Initial,
    /// After the edge phase
    Full {
        api_cdn_domain: &'a str,
        gateway_cdn_domain: &'a str,
    },
}

pub fn api_environment(
    config: &DeploymentConfig,
    names: &ResourceNames,
    pass: ApiPass<'_>,
) -> EnvironmentDocument {
    let mut builder = EnvironmentBuilder::new()
        .var("TENANT_PREFIX", config.prefix.as_str())
        .var("ADMIN_BUCKET", names.admin_bucket.as_str())
        .var("STORAGE_REGION", config.region.as_str())
        .var("JWT_SECRET", config.signing_secret.as_str())
        .var("LOG_SUMMARY_FUNCTION", names.log_summary_function.as_str())
        .var_opt("GOOGLE_OAUTH_PROJECT_ID", config.oauth_project_id.as_deref());

    if let ApiPass::Full {
        api_cdn_domain,
        gateway_cdn_domain,
    } = pass
    {
        let api_url = format!("https://{}", api_cdn_domain);
        builder = builder
            .var("API_BASE_URL", api_url.as_str())
            .var("GATEWAY_URL", format!("https://{}", gateway_cdn_domain))
            // The app distribution does not exist yet; the dashboard is
            // served through the api edge until the app publishes config.json
            .var("DASHBOARD_URL", api_url.as_str())
            .var(
                "ALLOWED_REDIRECT_ORIGINS",
                [api_cdn_domain, gateway_cdn_domain]
                    .iter()
                    .map(|d| format!("https://{}", d))
                    .collect::<Vec<_>>()
                    .join(","),
            );
    }

    builder.build()
}

pub fn gateway_environment(
    config: &DeploymentConfig,
    names: &ResourceNames,
    api_function_url: &str,
    admin_token: &str,
) -> EnvironmentDocument {
    EnvironmentBuilder::new()
        .var("TENANT_PREFIX", config.prefix.as_str())
        .var("ADMIN_API_URL", api_function_url)
        .var("GOD_PAT", admin_token)
        .var("CACHE_BUCKET", names.gateway_bucket.as_str())
        .var("STORAGE_REGION", config.region.as_str())
        .build()
}

pub fn log_summary_environment(
    config: &DeploymentConfig,
    names: &ResourceNames,
) -> EnvironmentDocument {
    EnvironmentBuilder::new()
        .var("ADMIN_BUCKET", names.admin_bucket.as_str())
        .var("STORAGE_REGION", config.region.as_str())
        .var_opt("AI_API_KEY", config.ai_api_key.as_deref())
        .var_opt(
            "NOTIFICATION_WEBHOOK_URL",
            config.notification_webhook_url.as_deref(),
        )
        .build()
}
