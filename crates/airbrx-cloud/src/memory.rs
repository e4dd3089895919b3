//! In-memory cloud provider
//!
//! Keeps every resource in process memory and journals each call. Used by
//! `airbrx deploy --dry-run` and by the pipeline tests. The rules that matter
//! to the deployer are enforced the way the real services enforce them:
//! non-empty buckets cannot be deleted, enabled distributions cannot be
//! deleted, roles with policies cannot be deleted, and an origin-access
//! control in use cannot be deleted.

use crate::error::{CloudError, Result};
use crate::provider::{AuthStatus, Cdn, CloudProvider, FunctionHost, ObjectStorage, RoleStore};
use crate::resource::{
    BucketSpec, DistributionInfo, DistributionSpec, FunctionInfo, FunctionSpec, FunctionState,
    ObjectVersion, OriginAccessControlInfo, OriginAccessControlSpec, PublicAccessBlock,
    ResourceTag, RoleInfo, RoleSpec,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

const DEFAULT_ACCOUNT_ID: &str = "123456789012";

/// Failure returned for an injected (operation, target) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    NotFound,
    Conflict,
    AccessDenied,
    /// Globally unique name held by another account
    NameTaken,
}

/// One journaled call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: &'static str,
    pub target: String,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: String,
    pub version_id: String,
    pub is_delete_marker: bool,
    pub body: Vec<u8>,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct MemoryBucket {
    pub region: String,
    pub public_access: Option<PublicAccessBlock>,
    pub versioning: bool,
    pub policy: Option<serde_json::Value>,
    /// Oldest first
    pub objects: Vec<StoredObject>,
}

#[derive(Debug, Clone)]
pub struct MemoryRole {
    pub arn: String,
    pub trust_policy: serde_json::Value,
    pub inline_policies: BTreeMap<String, serde_json::Value>,
    pub attached_policies: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MemoryFunction {
    pub spec: FunctionSpec,
    pub arn: String,
    pub code: Vec<u8>,
    pub url: Option<String>,
    pub public_permission: bool,
    /// Every configuration applied, creation included
    pub configurations: Vec<FunctionSpec>,
}

#[derive(Debug, Clone)]
pub struct MemoryDistribution {
    pub info: DistributionInfo,
    pub tag: ResourceTag,
    pub spec: DistributionSpec,
}

#[derive(Debug, Default)]
struct MemoryState {
    buckets: BTreeMap<String, MemoryBucket>,
    roles: BTreeMap<String, MemoryRole>,
    functions: BTreeMap<String, MemoryFunction>,
    distributions: BTreeMap<String, MemoryDistribution>,
    oacs: BTreeMap<String, OriginAccessControlInfo>,
    calls: Vec<Call>,
    failures: HashMap<(String, String), InjectedFailure>,
    sequence: u64,
}

impl MemoryState {
    fn next_id(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }
}

/// In-memory implementation of every resource client
pub struct MemoryProvider {
    region: String,
    account_id: String,
    state: Mutex<MemoryState>,
}

impl MemoryProvider {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account_id: DEFAULT_ACCOUNT_ID.to_string(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Journal the call and return the injected failure, if any
    fn record(&self, operation: &'static str, target: &str) -> Result<MutexGuard<'_, MemoryState>> {
        let mut state = self.state();
        state.calls.push(Call {
            operation,
            target: target.to_string(),
        });
        match state
            .failures
            .get(&(operation.to_string(), target.to_string()))
        {
            Some(InjectedFailure::NotFound) => Err(CloudError::ResourceNotFound(format!(
                "{} ({})",
                target, operation
            ))),
            Some(InjectedFailure::Conflict) => Err(CloudError::ResourceAlreadyExists(format!(
                "{} ({})",
                target, operation
            ))),
            Some(InjectedFailure::AccessDenied) => Err(CloudError::AccessDenied {
                operation: operation.to_string(),
                message: format!("not authorized to act on {}", target),
            }),
            Some(InjectedFailure::NameTaken) => Err(CloudError::NameTaken(target.to_string())),
            None => Ok(state),
        }
    }

    /// Make every future `operation` call on `target` fail
    pub fn inject_failure(&self, operation: &str, target: &str, failure: InjectedFailure) {
        self.state()
            .failures
            .insert((operation.to_string(), target.to_string()), failure);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Number of calls to `operation`
    pub fn call_count(&self, operation: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Number of calls to `operation` against `target`
    pub fn call_count_for(&self, operation: &str, target: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.operation == operation && c.target == target)
            .count()
    }

    /// Number of resource-creation calls (`create_*`)
    pub fn creation_calls(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.operation.starts_with("create_"))
            .count()
    }

    pub fn bucket(&self, name: &str) -> Option<MemoryBucket> {
        self.state().buckets.get(name).cloned()
    }

    pub fn bucket_names(&self) -> Vec<String> {
        self.state().buckets.keys().cloned().collect()
    }

    /// Body of the current version of an object
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let state = self.state();
        let bucket = state.buckets.get(bucket)?;
        let latest = bucket.objects.iter().rev().find(|o| o.key == key)?;
        if latest.is_delete_marker {
            None
        } else {
            Some(latest.body.clone())
        }
    }

    pub fn role(&self, name: &str) -> Option<MemoryRole> {
        self.state().roles.get(name).cloned()
    }

    pub fn role_names(&self) -> Vec<String> {
        self.state().roles.keys().cloned().collect()
    }

    pub fn function(&self, name: &str) -> Option<MemoryFunction> {
        self.state().functions.get(name).cloned()
    }

    pub fn function_names(&self) -> Vec<String> {
        self.state().functions.keys().cloned().collect()
    }

    pub fn distributions(&self) -> Vec<MemoryDistribution> {
        self.state().distributions.values().cloned().collect()
    }

    pub fn origin_access_controls(&self) -> Vec<OriginAccessControlInfo> {
        self.state().oacs.values().cloned().collect()
    }

    /// Append a delete marker for `key`, as a versioned bucket does on DELETE
    pub fn put_delete_marker(&self, bucket: &str, key: &str) -> Result<()> {
        let mut state = self.state();
        let version_id = format!("v{}", state.next_id());
        let bucket = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| CloudError::ResourceNotFound(bucket.to_string()))?;
        bucket.objects.push(StoredObject {
            key: key.to_string(),
            version_id,
            is_delete_marker: true,
            body: Vec::new(),
            content_type: String::new(),
        });
        Ok(())
    }

    /// Attach a managed policy the way an operator would by hand
    pub fn attach_managed_policy(&self, role: &str, policy_arn: &str) -> Result<()> {
        let mut state = self.state();
        let role = state
            .roles
            .get_mut(role)
            .ok_or_else(|| CloudError::ResourceNotFound(role.to_string()))?;
        role.attached_policies.push(policy_arn.to_string());
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for MemoryProvider {
    async fn bucket_exists(&self, name: &str) -> Result<bool> {
        let state = self.record("bucket_exists", name)?;
        Ok(state.buckets.contains_key(name))
    }

    async fn create_bucket(&self, spec: &BucketSpec) -> Result<()> {
        let mut state = self.record("create_bucket", &spec.name)?;
        if state.buckets.contains_key(&spec.name) {
            return Err(CloudError::ResourceAlreadyExists(spec.name.clone()));
        }
        state.buckets.insert(
            spec.name.clone(),
            MemoryBucket {
                region: spec.region.clone(),
                public_access: None,
                versioning: false,
                policy: None,
                objects: Vec::new(),
            },
        );
        Ok(())
    }

    async fn put_public_access_block(
        &self,
        bucket: &str,
        block: &PublicAccessBlock,
    ) -> Result<()> {
        let mut state = self.record("put_public_access_block", bucket)?;
        let entry = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| CloudError::ResourceNotFound(bucket.to_string()))?;
        entry.public_access = Some(*block);
        Ok(())
    }

    async fn put_versioning(&self, bucket: &str, enabled: bool) -> Result<()> {
        let mut state = self.record("put_versioning", bucket)?;
        let entry = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| CloudError::ResourceNotFound(bucket.to_string()))?;
        entry.versioning = enabled;
        Ok(())
    }

    async fn put_bucket_policy(&self, bucket: &str, policy: &serde_json::Value) -> Result<()> {
        let mut state = self.record("put_bucket_policy", bucket)?;
        let entry = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| CloudError::ResourceNotFound(bucket.to_string()))?;
        if entry
            .public_access
            .map(|b| b.block_public_policy)
            .unwrap_or(false)
        {
            return Err(CloudError::AccessDenied {
                operation: "put_bucket_policy".to_string(),
                message: format!("public access block on {} rejects bucket policies", bucket),
            });
        }
        entry.policy = Some(policy.clone());
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let mut state = self.record("put_object", &format!("{}/{}", bucket, key))?;
        let version_id = format!("v{}", state.next_id());
        let entry = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| CloudError::ResourceNotFound(bucket.to_string()))?;
        if !entry.versioning {
            entry.objects.retain(|o| o.key != key);
        }
        entry.objects.push(StoredObject {
            key: key.to_string(),
            version_id,
            is_delete_marker: false,
            body,
            content_type: content_type.to_string(),
        });
        Ok(())
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        let state = self.record("object_exists", &format!("{}/{}", bucket, key))?;
        let entry = state
            .buckets
            .get(bucket)
            .ok_or_else(|| CloudError::ResourceNotFound(bucket.to_string()))?;
        Ok(entry
            .objects
            .iter()
            .rev()
            .find(|o| o.key == key)
            .map(|o| !o.is_delete_marker)
            .unwrap_or(false))
    }

    async fn list_object_versions(&self, bucket: &str) -> Result<Vec<ObjectVersion>> {
        let state = self.record("list_object_versions", bucket)?;
        let entry = state
            .buckets
            .get(bucket)
            .ok_or_else(|| CloudError::ResourceNotFound(bucket.to_string()))?;
        Ok(entry
            .objects
            .iter()
            .map(|o| ObjectVersion {
                key: o.key.clone(),
                version_id: Some(o.version_id.clone()),
                is_delete_marker: o.is_delete_marker,
            })
            .collect())
    }

    async fn delete_object_versions(
        &self,
        bucket: &str,
        versions: &[ObjectVersion],
    ) -> Result<()> {
        let mut state = self.record("delete_object_versions", bucket)?;
        let entry = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| CloudError::ResourceNotFound(bucket.to_string()))?;
        entry.objects.retain(|o| {
            !versions
                .iter()
                .any(|v| v.key == o.key && v.version_id.as_deref() == Some(o.version_id.as_str()))
        });
        Ok(())
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        let mut state = self.record("delete_bucket", name)?;
        let entry = state
            .buckets
            .get(name)
            .ok_or_else(|| CloudError::ResourceNotFound(name.to_string()))?;
        if !entry.objects.is_empty() {
            return Err(CloudError::api(
                "delete_bucket",
                format!("BucketNotEmpty: {} still holds {} versions", name, entry.objects.len()),
            ));
        }
        state.buckets.remove(name);
        Ok(())
    }
}

#[async_trait]
impl RoleStore for MemoryProvider {
    async fn get_role(&self, name: &str) -> Result<Option<RoleInfo>> {
        let state = self.record("get_role", name)?;
        Ok(state.roles.get(name).map(|r| RoleInfo {
            name: name.to_string(),
            arn: r.arn.clone(),
        }))
    }

    async fn create_role(&self, spec: &RoleSpec) -> Result<RoleInfo> {
        let mut state = self.record("create_role", &spec.name)?;
        if state.roles.contains_key(&spec.name) {
            return Err(CloudError::ResourceAlreadyExists(spec.name.clone()));
        }
        let arn = format!("arn:aws:iam::{}:role/{}", self.account_id, spec.name);
        state.roles.insert(
            spec.name.clone(),
            MemoryRole {
                arn: arn.clone(),
                trust_policy: spec.trust_policy.clone(),
                inline_policies: BTreeMap::new(),
                attached_policies: Vec::new(),
            },
        );
        Ok(RoleInfo {
            name: spec.name.clone(),
            arn,
        })
    }

    async fn put_role_policy(
        &self,
        role: &str,
        policy_name: &str,
        policy: &serde_json::Value,
    ) -> Result<()> {
        let mut state = self.record("put_role_policy", role)?;
        let entry = state
            .roles
            .get_mut(role)
            .ok_or_else(|| CloudError::ResourceNotFound(role.to_string()))?;
        entry
            .inline_policies
            .insert(policy_name.to_string(), policy.clone());
        Ok(())
    }

    async fn list_role_policies(&self, role: &str) -> Result<Vec<String>> {
        let state = self.record("list_role_policies", role)?;
        let entry = state
            .roles
            .get(role)
            .ok_or_else(|| CloudError::ResourceNotFound(role.to_string()))?;
        Ok(entry.inline_policies.keys().cloned().collect())
    }

    async fn delete_role_policy(&self, role: &str, policy_name: &str) -> Result<()> {
        let mut state = self.record("delete_role_policy", role)?;
        let entry = state
            .roles
            .get_mut(role)
            .ok_or_else(|| CloudError::ResourceNotFound(role.to_string()))?;
        entry
            .inline_policies
            .remove(policy_name)
            .map(|_| ())
            .ok_or_else(|| CloudError::ResourceNotFound(format!("{}/{}", role, policy_name)))
    }

    async fn list_attached_policies(&self, role: &str) -> Result<Vec<String>> {
        let state = self.record("list_attached_policies", role)?;
        let entry = state
            .roles
            .get(role)
            .ok_or_else(|| CloudError::ResourceNotFound(role.to_string()))?;
        Ok(entry.attached_policies.clone())
    }

    async fn detach_role_policy(&self, role: &str, policy_arn: &str) -> Result<()> {
        let mut state = self.record("detach_role_policy", role)?;
        let entry = state
            .roles
            .get_mut(role)
            .ok_or_else(|| CloudError::ResourceNotFound(role.to_string()))?;
        entry.attached_policies.retain(|arn| arn != policy_arn);
        Ok(())
    }

    async fn delete_role(&self, name: &str) -> Result<()> {
        let mut state = self.record("delete_role", name)?;
        let entry = state
            .roles
            .get(name)
            .ok_or_else(|| CloudError::ResourceNotFound(name.to_string()))?;
        if !entry.inline_policies.is_empty() || !entry.attached_policies.is_empty() {
            return Err(CloudError::api(
                "delete_role",
                format!("DeleteConflict: {} still has policies", name),
            ));
        }
        state.roles.remove(name);
        Ok(())
    }
}

#[async_trait]
impl FunctionHost for MemoryProvider {
    async fn get_function(&self, name: &str) -> Result<Option<FunctionInfo>> {
        let state = self.record("get_function", name)?;
        Ok(state.functions.get(name).map(|f| FunctionInfo {
            name: name.to_string(),
            arn: f.arn.clone(),
            state: FunctionState::Active,
        }))
    }

    async fn create_function(&self, spec: &FunctionSpec, code: &[u8]) -> Result<FunctionInfo> {
        let mut state = self.record("create_function", &spec.name)?;
        if state.functions.contains_key(&spec.name) {
            return Err(CloudError::ResourceAlreadyExists(spec.name.clone()));
        }
        if !state.roles.values().any(|r| r.arn == spec.role_arn) {
            return Err(CloudError::api(
                "create_function",
                format!("InvalidParameterValue: role {} cannot be assumed", spec.role_arn),
            ));
        }
        let arn = format!(
            "arn:aws:lambda:{}:{}:function:{}",
            self.region, self.account_id, spec.name
        );
        state.functions.insert(
            spec.name.clone(),
            MemoryFunction {
                spec: spec.clone(),
                arn: arn.clone(),
                code: code.to_vec(),
                url: None,
                public_permission: false,
                configurations: vec![spec.clone()],
            },
        );
        Ok(FunctionInfo {
            name: spec.name.clone(),
            arn,
            state: FunctionState::Pending,
        })
    }

    async fn update_function_code(&self, name: &str, code: &[u8]) -> Result<()> {
        let mut state = self.record("update_function_code", name)?;
        let entry = state
            .functions
            .get_mut(name)
            .ok_or_else(|| CloudError::ResourceNotFound(name.to_string()))?;
        entry.code = code.to_vec();
        Ok(())
    }

    async fn update_function_configuration(&self, spec: &FunctionSpec) -> Result<()> {
        let mut state = self.record("update_function_configuration", &spec.name)?;
        let entry = state
            .functions
            .get_mut(&spec.name)
            .ok_or_else(|| CloudError::ResourceNotFound(spec.name.clone()))?;
        entry.spec = spec.clone();
        entry.configurations.push(spec.clone());
        Ok(())
    }

    async fn wait_until_updated(&self, name: &str) -> Result<()> {
        let state = self.record("wait_until_updated", name)?;
        if !state.functions.contains_key(name) {
            return Err(CloudError::ResourceNotFound(name.to_string()));
        }
        Ok(())
    }

    async fn wait_until_active(&self, name: &str) -> Result<()> {
        let state = self.record("wait_until_active", name)?;
        if !state.functions.contains_key(name) {
            return Err(CloudError::ResourceNotFound(name.to_string()));
        }
        Ok(())
    }

    async fn get_function_url(&self, name: &str) -> Result<Option<String>> {
        let state = self.record("get_function_url", name)?;
        let entry = state
            .functions
            .get(name)
            .ok_or_else(|| CloudError::ResourceNotFound(name.to_string()))?;
        Ok(entry.url.clone())
    }

    async fn create_function_url(&self, name: &str) -> Result<String> {
        let mut state = self.record("create_function_url", name)?;
        let region = self.region.clone();
        let entry = state
            .functions
            .get_mut(name)
            .ok_or_else(|| CloudError::ResourceNotFound(name.to_string()))?;
        if entry.url.is_some() {
            return Err(CloudError::ResourceAlreadyExists(format!("{} url", name)));
        }
        let url = format!("https://{}.lambda-url.{}.on.aws/", name, region);
        entry.url = Some(url.clone());
        Ok(url)
    }

    async fn add_public_url_permission(&self, name: &str) -> Result<()> {
        let mut state = self.record("add_public_url_permission", name)?;
        let entry = state
            .functions
            .get_mut(name)
            .ok_or_else(|| CloudError::ResourceNotFound(name.to_string()))?;
        if entry.public_permission {
            return Err(CloudError::ResourceAlreadyExists(format!(
                "{} public url permission",
                name
            )));
        }
        entry.public_permission = true;
        Ok(())
    }

    async fn delete_function_url(&self, name: &str) -> Result<()> {
        let mut state = self.record("delete_function_url", name)?;
        let entry = state
            .functions
            .get_mut(name)
            .ok_or_else(|| CloudError::ResourceNotFound(name.to_string()))?;
        entry
            .url
            .take()
            .map(|_| ())
            .ok_or_else(|| CloudError::ResourceNotFound(format!("{} url", name)))
    }

    async fn delete_function(&self, name: &str) -> Result<()> {
        let mut state = self.record("delete_function", name)?;
        state
            .functions
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| CloudError::ResourceNotFound(name.to_string()))
    }
}

#[async_trait]
impl Cdn for MemoryProvider {
    async fn find_distribution(&self, tag: &ResourceTag) -> Result<Option<DistributionInfo>> {
        let state = self.record("find_distribution", &tag.to_string())?;
        Ok(state
            .distributions
            .values()
            .find(|d| &d.tag == tag)
            .map(|d| d.info.clone()))
    }

    async fn create_distribution(&self, spec: &DistributionSpec) -> Result<DistributionInfo> {
        let mut state = self.record("create_distribution", &spec.tag.to_string())?;
        if let Some(oac) = &spec.origin_access_control_id {
            if !state.oacs.contains_key(oac) {
                return Err(CloudError::api(
                    "create_distribution",
                    format!("NoSuchOriginAccessControl: {}", oac),
                ));
            }
        }
        let seq = state.next_id();
        let id = format!("EMEM{:08}", seq);
        let info = DistributionInfo {
            arn: format!("arn:aws:cloudfront::{}:distribution/{}", self.account_id, id),
            domain_name: format!("d{:08}.cloudfront.net", seq),
            id: id.clone(),
            enabled: true,
            status: "InProgress".to_string(),
        };
        state.distributions.insert(
            id,
            MemoryDistribution {
                info: info.clone(),
                tag: spec.tag.clone(),
                spec: spec.clone(),
            },
        );
        Ok(info)
    }

    async fn get_distribution(&self, id: &str) -> Result<Option<DistributionInfo>> {
        let state = self.record("get_distribution", id)?;
        Ok(state.distributions.get(id).map(|d| d.info.clone()))
    }

    async fn disable_distribution(&self, id: &str) -> Result<()> {
        let mut state = self.record("disable_distribution", id)?;
        let entry = state
            .distributions
            .get_mut(id)
            .ok_or_else(|| CloudError::ResourceNotFound(id.to_string()))?;
        entry.info.enabled = false;
        entry.info.status = "InProgress".to_string();
        Ok(())
    }

    async fn wait_until_deployed(&self, id: &str) -> Result<()> {
        let mut state = self.record("wait_until_deployed", id)?;
        let entry = state
            .distributions
            .get_mut(id)
            .ok_or_else(|| CloudError::ResourceNotFound(id.to_string()))?;
        entry.info.status = "Deployed".to_string();
        Ok(())
    }

    async fn delete_distribution(&self, id: &str) -> Result<()> {
        let mut state = self.record("delete_distribution", id)?;
        let entry = state
            .distributions
            .get(id)
            .ok_or_else(|| CloudError::ResourceNotFound(id.to_string()))?;
        if entry.info.enabled || !entry.info.is_deployed() {
            return Err(CloudError::api(
                "delete_distribution",
                format!("DistributionNotDisabled: {}", id),
            ));
        }
        state.distributions.remove(id);
        Ok(())
    }

    async fn find_origin_access_control(
        &self,
        name: &str,
    ) -> Result<Option<OriginAccessControlInfo>> {
        let state = self.record("find_origin_access_control", name)?;
        Ok(state.oacs.values().find(|o| o.name == name).cloned())
    }

    async fn create_origin_access_control(
        &self,
        spec: &OriginAccessControlSpec,
    ) -> Result<OriginAccessControlInfo> {
        let mut state = self.record("create_origin_access_control", &spec.name)?;
        if state.oacs.values().any(|o| o.name == spec.name) {
            return Err(CloudError::ResourceAlreadyExists(spec.name.clone()));
        }
        let id = format!("OAC{:08}", state.next_id());
        let info = OriginAccessControlInfo {
            id: id.clone(),
            name: spec.name.clone(),
        };
        state.oacs.insert(id, info.clone());
        Ok(info)
    }

    async fn delete_origin_access_control(&self, id: &str) -> Result<()> {
        let mut state = self.record("delete_origin_access_control", id)?;
        if !state.oacs.contains_key(id) {
            return Err(CloudError::ResourceNotFound(id.to_string()));
        }
        if state
            .distributions
            .values()
            .any(|d| d.spec.origin_access_control_id.as_deref() == Some(id))
        {
            return Err(CloudError::api(
                "delete_origin_access_control",
                format!("OriginAccessControlInUse: {}", id),
            ));
        }
        state.oacs.remove(id);
        Ok(())
    }
}

#[async_trait]
impl CloudProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn region(&self) -> &str {
        &self.region
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        Ok(AuthStatus::ok(
            self.account_id.clone(),
            format!("arn:aws:iam::{}:user/dry-run", self.account_id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket_spec(name: &str) -> BucketSpec {
        BucketSpec {
            name: name.to_string(),
            region: "us-west-2".to_string(),
            public_access: PublicAccessBlock::all_blocked(),
            versioning: true,
        }
    }

    #[tokio::test]
    async fn test_versioned_put_keeps_history() {
        let provider = MemoryProvider::new("us-west-2");
        provider.create_bucket(&bucket_spec("b")).await.unwrap();
        provider.put_versioning("b", true).await.unwrap();

        for body in ["one", "two", "three"] {
            provider
                .put_object("b", "k", body.as_bytes().to_vec(), "text/plain")
                .await
                .unwrap();
        }

        assert_eq!(provider.list_object_versions("b").await.unwrap().len(), 3);
        assert_eq!(provider.object("b", "k").unwrap(), b"three".to_vec());

        provider.put_delete_marker("b", "k").unwrap();
        assert!(!provider.object_exists("b", "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_non_empty_bucket_cannot_be_deleted() {
        let provider = MemoryProvider::new("us-west-2");
        provider.create_bucket(&bucket_spec("b")).await.unwrap();
        provider
            .put_object("b", "k", b"x".to_vec(), "text/plain")
            .await
            .unwrap();

        let err = provider.delete_bucket("b").await.unwrap_err();
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let provider = MemoryProvider::new("us-west-2");
        provider.inject_failure("bucket_exists", "b", InjectedFailure::AccessDenied);

        let err = provider.bucket_exists("b").await.unwrap_err();
        assert!(matches!(err, CloudError::AccessDenied { .. }));
        assert_eq!(provider.call_count("bucket_exists"), 1);

        provider.clear_failures();
        assert!(!provider.bucket_exists("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_enabled_distribution_cannot_be_deleted() {
        let provider = MemoryProvider::new("us-west-2");
        let spec = DistributionSpec {
            tag: ResourceTag::new("acme-dev", "api"),
            comment: "airbrx acme-dev api".to_string(),
            origin_domain: "x.lambda-url.us-west-2.on.aws".to_string(),
            origin_kind: crate::resource::OriginKind::FunctionUrl,
            origin_access_control_id: None,
            default_root_object: None,
        };
        let info = provider.create_distribution(&spec).await.unwrap();
        assert!(provider.delete_distribution(&info.id).await.is_err());

        provider.disable_distribution(&info.id).await.unwrap();
        provider.wait_until_deployed(&info.id).await.unwrap();
        provider.delete_distribution(&info.id).await.unwrap();
        assert!(provider.distributions().is_empty());
    }
}
