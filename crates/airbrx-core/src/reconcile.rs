//! Check-then-act reconcilers
//!
//! Every `ensure_*` routine is safe to run against a partially completed
//! earlier run: it looks the resource up, creates it when absent, and
//! re-applies declarative settings where the resource family allows it.

use airbrx_cloud::{
    Action, ActionType, BucketSpec, CloudProvider, DistributionInfo, DistributionSpec,
    FunctionInfo, FunctionSpec, OriginAccessControlInfo, OriginAccessControlSpec, ResourceKind,
    Result, RoleInfo, RoleSpec,
};

/// A resource handle together with what was done to obtain it
#[derive(Debug, Clone)]
pub struct Reconciled<T> {
    pub handle: T,
    pub action: Action,
}

impl<T> Reconciled<T> {
    fn new(handle: T, action: Action) -> Self {
        Self { handle, action }
    }

    pub fn created(&self) -> bool {
        self.action.action_type == ActionType::Create
    }
}

/// Create the bucket if needed, then apply the access block and versioning
pub async fn ensure_bucket(
    provider: &dyn CloudProvider,
    spec: &BucketSpec,
) -> Result<Reconciled<String>> {
    let mut action_type = ActionType::NoOp;

    if provider.bucket_exists(&spec.name).await? {
        tracing::info!("Bucket {} exists, re-applying settings", spec.name);
    } else {
        match provider.create_bucket(spec).await {
            Ok(()) => {
                tracing::info!("Created bucket {} in {}", spec.name, spec.region);
                action_type = ActionType::Create;
            }
            // Lost a race with another creator, or eventual consistency on the
            // existence check
            Err(e) if e.is_conflict() => {
                tracing::warn!("Bucket {} appeared during creation: {}", spec.name, e);
            }
            Err(e) => return Err(e),
        }
    }

    provider
        .put_public_access_block(&spec.name, &spec.public_access)
        .await?;
    provider.put_versioning(&spec.name, spec.versioning).await?;

    let description = match action_type {
        ActionType::Create => format!("created in {}", spec.region),
        _ => "settings re-applied".to_string(),
    };
    Ok(Reconciled::new(
        spec.name.clone(),
        Action::new(action_type, ResourceKind::Bucket, &spec.name, description),
    ))
}

/// Create the role if needed; the inline policy is always replaced
pub async fn ensure_role(provider: &dyn CloudProvider, spec: &RoleSpec) -> Result<Reconciled<RoleInfo>> {
    let (role, action_type) = match provider.get_role(&spec.name).await? {
        Some(role) => {
            tracing::info!("Role {} exists, replacing inline policy", spec.name);
            (role, ActionType::Update)
        }
        None => {
            let role = provider.create_role(spec).await?;
            tracing::info!("Created role {}", role.arn);
            (role, ActionType::Create)
        }
    };

    provider
        .put_role_policy(&spec.name, &spec.policy_name, &spec.policy)
        .await?;

    let action = Action::new(
        action_type,
        ResourceKind::Role,
        &spec.name,
        format!("inline policy {}", spec.policy_name),
    );
    Ok(Reconciled::new(role, action))
}

/// Create the function, or update its code and then its configuration.
///
/// Blocks until the function is active either way.
pub async fn ensure_function(
    provider: &dyn CloudProvider,
    spec: &FunctionSpec,
    code: &[u8],
) -> Result<Reconciled<FunctionInfo>> {
    match provider.get_function(&spec.name).await? {
        Some(existing) => {
            tracing::info!("Function {} exists, updating code and configuration", spec.name);
            provider.update_function_code(&spec.name, code).await?;
            provider.wait_until_updated(&spec.name).await?;
            provider.update_function_configuration(spec).await?;
            provider.wait_until_updated(&spec.name).await?;
            provider.wait_until_active(&spec.name).await?;

            let action = Action::new(
                ActionType::Update,
                ResourceKind::Function,
                &spec.name,
                format!("code and {} environment variables", spec.environment.len()),
            );
            Ok(Reconciled::new(existing, action))
        }
        None => {
            let info = provider.create_function(spec, code).await?;
            tracing::info!("Created function {}", info.arn);
            provider.wait_until_active(&spec.name).await?;

            let action = Action::new(
                ActionType::Create,
                ResourceKind::Function,
                &spec.name,
                format!("{} / {} MB / {}s", spec.runtime, spec.memory_mb, spec.timeout_secs),
            );
            Ok(Reconciled::new(info, action))
        }
    }
}

/// Re-apply a function's configuration without touching its code
pub async fn patch_function_configuration(
    provider: &dyn CloudProvider,
    spec: &FunctionSpec,
) -> Result<Action> {
    tracing::info!("Patching configuration of {}", spec.name);
    provider.update_function_configuration(spec).await?;
    provider.wait_until_updated(&spec.name).await?;
    provider.wait_until_active(&spec.name).await?;

    Ok(Action::new(
        ActionType::Update,
        ResourceKind::Function,
        &spec.name,
        format!("configuration patched ({} variables)", spec.environment.len()),
    ))
}

/// Ensure a public function URL and its invoke permission
pub async fn ensure_function_url(
    provider: &dyn CloudProvider,
    function: &str,
) -> Result<Reconciled<String>> {
    let (url, action_type) = match provider.get_function_url(function).await? {
        Some(url) => (url, ActionType::NoOp),
        None => match provider.create_function_url(function).await {
            Ok(url) => {
                tracing::info!("Created function URL {}", url);
                (url, ActionType::Create)
            }
            Err(e) if e.is_conflict() => {
                let url = provider.get_function_url(function).await?.ok_or(e)?;
                (url, ActionType::NoOp)
            }
            Err(e) => return Err(e),
        },
    };

    // Also attempted for existing URLs so an interrupted run heals
    match provider.add_public_url_permission(function).await {
        Ok(()) => tracing::debug!("Granted public invoke on {}", function),
        Err(e) if e.is_conflict() || e.is_not_found() => {
            tracing::debug!("Public invoke on {} already granted: {}", function, e);
        }
        Err(e) => return Err(e),
    }

    let action = Action::new(action_type, ResourceKind::FunctionUrl, function, url.clone());
    Ok(Reconciled::new(url, action))
}

/// Look the distribution up by tag; create it when absent.
///
/// An existing distribution is taken as-is, its configuration is not
/// compared or re-applied.
pub async fn ensure_distribution(
    provider: &dyn CloudProvider,
    spec: &DistributionSpec,
) -> Result<Reconciled<DistributionInfo>> {
    if let Some(existing) = provider.find_distribution(&spec.tag).await? {
        tracing::info!(
            "Distribution for {} exists: {} ({})",
            spec.tag,
            existing.id,
            existing.domain_name
        );
        let action = Action::new(
            ActionType::NoOp,
            ResourceKind::Distribution,
            &existing.id,
            existing.domain_name.clone(),
        );
        return Ok(Reconciled::new(existing, action));
    }

    let created = provider.create_distribution(spec).await?;
    tracing::info!(
        "Created distribution {} for {} ({}), propagation continues in the background",
        created.id,
        spec.tag,
        created.domain_name
    );
    let action = Action::new(
        ActionType::Create,
        ResourceKind::Distribution,
        &created.id,
        created.domain_name.clone(),
    );
    Ok(Reconciled::new(created, action))
}

pub async fn ensure_origin_access_control(
    provider: &dyn CloudProvider,
    spec: &OriginAccessControlSpec,
) -> Result<Reconciled<OriginAccessControlInfo>> {
    if let Some(existing) = provider.find_origin_access_control(&spec.name).await? {
        let action = Action::new(
            ActionType::NoOp,
            ResourceKind::OriginAccessControl,
            &existing.id,
            existing.name.clone(),
        );
        return Ok(Reconciled::new(existing, action));
    }

    let created = match provider.create_origin_access_control(spec).await {
        Ok(created) => created,
        Err(e) if e.is_conflict() => provider
            .find_origin_access_control(&spec.name)
            .await?
            .ok_or(e)?,
        Err(e) => return Err(e),
    };
    tracing::info!("Created origin access control {} ({})", created.name, created.id);
    let action = Action::new(
        ActionType::Create,
        ResourceKind::OriginAccessControl,
        &created.id,
        created.name.clone(),
    );
    Ok(Reconciled::new(created, action))
}
