//! Resource names derived from the deployment prefix

use serde::Serialize;

/// Deployable units of the topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Component {
    Api,
    Gateway,
    LogSummary,
    App,
}

impl Component {
    /// The three Lambda-backed components, in creation order
    pub const FUNCTIONS: [Component; 3] = [Component::Api, Component::Gateway, Component::LogSummary];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Api => "api",
            Component::Gateway => "gateway",
            Component::LogSummary => "log-summary",
            Component::App => "app",
        }
    }

    /// Source repository name under the configured repo base
    pub fn repository(&self) -> String {
        format!("airbrx-{}", self.as_str())
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceNames {
    pub prefix: String,
    pub admin_bucket: String,
    pub gateway_bucket: String,
    pub app_bucket: String,
    pub api_function: String,
    pub gateway_function: String,
    pub log_summary_function: String,
    pub app_oac: String,
}

impl ResourceNames {
    pub fn new(prefix: &str) -> Self {
        let base = format!("{}-airbrx", prefix);
        Self {
            prefix: prefix.to_string(),
            admin_bucket: format!("{}-admin-storage", base),
            gateway_bucket: format!("{}-gateway-storage", base),
            app_bucket: format!("{}-app", base),
            api_function: format!("{}-api", base),
            gateway_function: format!("{}-gateway", base),
            log_summary_function: format!("{}-log-summary", base),
            app_oac: format!("{}-app-oac", base),
        }
    }

    /// Function name of a Lambda-backed component
    pub fn function(&self, component: Component) -> Option<&str> {
        match component {
            Component::Api => Some(&self.api_function),
            Component::Gateway => Some(&self.gateway_function),
            Component::LogSummary => Some(&self.log_summary_function),
            Component::App => None,
        }
    }

    pub fn functions(&self) -> [&str; 3] {
        [
            &self.api_function,
            &self.gateway_function,
            &self.log_summary_function,
        ]
    }

    pub fn buckets(&self) -> [&str; 3] {
        [&self.admin_bucket, &self.gateway_bucket, &self.app_bucket]
    }

    pub fn role_for(function: &str) -> String {
        format!("{}-role", function)
    }

    pub fn policy_for(function: &str) -> String {
        format!("{}-policy", function)
    }

    pub fn log_group_for(function: &str) -> String {
        format!("/aws/lambda/{}", function)
    }

    pub fn roles(&self) -> Vec<String> {
        self.functions().iter().map(|f| Self::role_for(f)).collect()
    }

    pub fn log_groups(&self) -> Vec<String> {
        self.functions().iter().map(|f| Self::log_group_for(f)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acme_dev_names() {
        let names = ResourceNames::new("acme-dev");
        assert_eq!(
            names.buckets(),
            [
                "acme-dev-airbrx-admin-storage",
                "acme-dev-airbrx-gateway-storage",
                "acme-dev-airbrx-app"
            ]
        );
        assert_eq!(
            names.functions(),
            [
                "acme-dev-airbrx-api",
                "acme-dev-airbrx-gateway",
                "acme-dev-airbrx-log-summary"
            ]
        );
        assert_eq!(
            names.roles(),
            vec![
                "acme-dev-airbrx-api-role",
                "acme-dev-airbrx-gateway-role",
                "acme-dev-airbrx-log-summary-role"
            ]
        );
        assert_eq!(names.app_oac, "acme-dev-airbrx-app-oac");
        assert_eq!(names.log_groups()[0], "/aws/lambda/acme-dev-airbrx-api");
    }

    #[test]
    fn test_longest_prefix_fits_bucket_limit() {
        let prefix = "a".repeat(airbrx_config::deployment::MAX_PREFIX_LEN);
        let names = ResourceNames::new(&prefix);
        assert!(names.buckets().iter().all(|b| b.len() <= 63));
    }

    #[test]
    fn test_component_repository() {
        assert_eq!(Component::LogSummary.repository(), "airbrx-log-summary");
        assert_eq!(Component::App.to_string(), "app");
    }
}
