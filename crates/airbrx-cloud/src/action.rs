//! Action types recorded while reconciling or tearing down resources

use serde::{Deserialize, Serialize};

/// Resource family an action touched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Bucket,
    BucketPolicy,
    Object,
    Role,
    Function,
    FunctionUrl,
    Distribution,
    OriginAccessControl,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Bucket => write!(f, "bucket"),
            ResourceKind::BucketPolicy => write!(f, "bucket-policy"),
            ResourceKind::Object => write!(f, "object"),
            ResourceKind::Role => write!(f, "role"),
            ResourceKind::Function => write!(f, "function"),
            ResourceKind::FunctionUrl => write!(f, "function-url"),
            ResourceKind::Distribution => write!(f, "distribution"),
            ResourceKind::OriginAccessControl => write!(f, "origin-access-control"),
        }
    }
}

/// Represents one thing done (or deliberately not done) to a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Type of action performed
    pub action_type: ActionType,

    pub resource_kind: ResourceKind,

    /// Resource name or id
    pub resource_id: String,

    /// Description of the action
    pub description: String,
}

impl Action {
    pub fn new(
        action_type: ActionType,
        resource_kind: ResourceKind,
        resource_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            action_type,
            resource_kind,
            resource_id: resource_id.into(),
            description: description.into(),
        }
    }
}

/// What a reconciler did to a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    /// Existing resource brought in line with the desired configuration
    Update,
    Delete,
    /// Already present and left untouched
    NoOp,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Delete => write!(f, "delete"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// Outcome of a best-effort sequence of deletions. Every step is attempted;
/// failures are collected instead of stopping the sequence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyResult {
    pub succeeded: Vec<ActionResult>,
    pub failed: Vec<ActionResult>,
    /// Problems that did not fail a step, such as a missing resource tag
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

impl ApplyResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn add_success(&mut self, action_id: impl Into<String>, message: impl Into<String>) {
        self.succeeded.push(ActionResult {
            action_id: action_id.into(),
            message: message.into(),
            error: None,
        });
    }

    pub fn add_failure(&mut self, action_id: impl Into<String>, error: impl Into<String>) {
        self.failed.push(ActionResult {
            action_id: action_id.into(),
            message: String::new(),
            error: Some(error.into()),
        });
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

/// One step of a teardown, keyed like `bucket/acme-dev-airbrx-app`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_id: String,
    pub message: String,
    pub error: Option<String>,
}

/// Counts of actions by type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub no_change: usize,
}

impl ActionSummary {
    pub fn from_actions<'a>(actions: impl IntoIterator<Item = &'a Action>) -> Self {
        let mut summary = Self::default();
        for action in actions {
            match action.action_type {
                ActionType::Create => summary.create += 1,
                ActionType::Update => summary.update += 1,
                ActionType::Delete => summary.delete += 1,
                ActionType::NoOp => summary.no_change += 1,
            }
        }
        summary
    }
}

impl std::fmt::Display for ActionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} deleted, {} unchanged",
            self.create, self.update, self.delete, self.no_change
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let actions = vec![
            Action::new(ActionType::Create, ResourceKind::Bucket, "a", "created"),
            Action::new(ActionType::Update, ResourceKind::Function, "b", "updated"),
            Action::new(ActionType::NoOp, ResourceKind::Distribution, "c", "exists"),
            Action::new(ActionType::NoOp, ResourceKind::Role, "d", "exists"),
        ];
        let summary = ActionSummary::from_actions(&actions);
        assert_eq!(summary.create, 1);
        assert_eq!(summary.update, 1);
        assert_eq!(summary.no_change, 2);
        assert_eq!(
            summary.to_string(),
            "1 created, 1 updated, 0 deleted, 2 unchanged"
        );
    }

    #[test]
    fn test_apply_result() {
        let mut result = ApplyResult::new();
        result.add_success("delete-bucket", "deleted");
        assert!(result.is_success());
        result.add_failure("delete-role", "access denied");
        assert!(!result.is_success());
        assert_eq!(result.failed[0].error.as_deref(), Some("access denied"));
    }
}
