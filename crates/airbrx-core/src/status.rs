//! Read-only inspection of a deployment

use crate::error::Result;
use crate::health::{Endpoint, HealthProbe, HealthReport, check_endpoints};
use crate::naming::{Component, ResourceNames};
use airbrx_cloud::{CloudProvider, ResourceKind, ResourceTag, RunState};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ResourceStatus {
    pub kind: ResourceKind,
    pub name: String,
    pub present: bool,
    pub detail: Option<String>,
}

impl ResourceStatus {
    fn new(kind: ResourceKind, name: impl Into<String>, present: bool) -> Self {
        Self {
            kind,
            name: name.into(),
            present,
            detail: None,
        }
    }

    fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub prefix: String,
    pub resources: Vec<ResourceStatus>,
    pub last_run: Option<RunState>,
    pub health: Option<HealthReport>,
}

impl StatusReport {
    pub fn present(&self) -> usize {
        self.resources.iter().filter(|r| r.present).count()
    }

    pub fn missing(&self) -> impl Iterator<Item = &ResourceStatus> {
        self.resources.iter().filter(|r| !r.present)
    }

    pub fn is_complete(&self) -> bool {
        self.resources.iter().all(|r| r.present)
    }
}

/// Look every resource up without changing anything. Endpoints that exist
/// are probed when a probe is given.
pub async fn inspect(
    provider: &dyn CloudProvider,
    prefix: &str,
    last_run: Option<RunState>,
    probe: Option<&dyn HealthProbe>,
) -> Result<StatusReport> {
    let names = ResourceNames::new(prefix);
    let mut resources = Vec::new();
    let mut endpoints = Vec::new();

    for bucket in names.buckets() {
        let present = provider.bucket_exists(bucket).await?;
        resources.push(ResourceStatus::new(ResourceKind::Bucket, bucket, present));
    }

    for role in names.roles() {
        let found = provider.get_role(&role).await?;
        let status = ResourceStatus::new(ResourceKind::Role, &role, found.is_some());
        resources.push(match found {
            Some(info) => status.detail(info.arn),
            None => status,
        });
    }

    for function in names.functions() {
        let Some(info) = provider.get_function(function).await? else {
            resources.push(ResourceStatus::new(ResourceKind::Function, function, false));
            continue;
        };
        let url = provider.get_function_url(function).await?;
        let detail = match &url {
            Some(url) => format!("{} {}", info.state, url),
            None => info.state.to_string(),
        };
        resources.push(ResourceStatus::new(ResourceKind::Function, function, true).detail(detail));
        if let Some(url) = url {
            endpoints.push(Endpoint::new(
                function,
                format!("{}/health", url.trim_end_matches('/')),
            ));
        }
    }

    for component in [Component::Api, Component::Gateway, Component::App] {
        let tag = ResourceTag::new(prefix, component.as_str());
        let name = format!("{} distribution", component);
        match provider.find_distribution(&tag).await? {
            Some(info) => {
                let state = if info.enabled { "enabled" } else { "disabled" };
                resources.push(
                    ResourceStatus::new(ResourceKind::Distribution, &name, true).detail(format!(
                        "{} {} ({}, {})",
                        info.id, info.domain_name, info.status, state
                    )),
                );
                let path = if component == Component::App { "/" } else { "/health" };
                endpoints.push(Endpoint::new(
                    name,
                    format!("https://{}{}", info.domain_name, path),
                ));
            }
            None => resources.push(ResourceStatus::new(ResourceKind::Distribution, name, false)),
        }
    }

    let oac = provider.find_origin_access_control(&names.app_oac).await?;
    let status = ResourceStatus::new(ResourceKind::OriginAccessControl, &names.app_oac, oac.is_some());
    resources.push(match oac {
        Some(oac) => status.detail(oac.id),
        None => status,
    });

    let health = match probe {
        Some(probe) if !endpoints.is_empty() => Some(check_endpoints(probe, &endpoints).await),
        _ => None,
    };

    Ok(StatusReport {
        prefix: prefix.to_string(),
        resources,
        last_run,
        health,
    })
}
