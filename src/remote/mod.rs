//! SX-010/011: Stack API abstraction and subprocess plumbing.
//!
//! Every remote operation is keyed by a [`StackTarget`] (name, profile,
//! region). The production implementation shells out to the `aws` CLI;
//! tests drive an in-memory fake.

pub mod awscli;
pub mod local;
#[cfg(test)]
pub mod memory;
pub mod sops;

use crate::core::types::{ChangeSetType, ParameterSet, StackOutputs, StackTarget};
use std::collections::BTreeMap;
use thiserror::Error;

/// Output from a finished subprocess.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    /// The transport itself failed (spawn error, non-zero exit without a
    /// recognisable service error).
    #[error("command failed: {0}")]
    Command(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Result of `ValidateTemplate`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateValidation {
    /// Capabilities the template requires (e.g. `CAPABILITY_IAM`)
    pub capabilities: Vec<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackDescription {
    pub name: String,
    pub status: String,
    pub status_reason: Option<String>,
    pub outputs: StackOutputs,
}

impl StackDescription {
    /// Any `*_IN_PROGRESS` status, cleanup phases and review included.
    pub fn is_in_progress(&self) -> bool {
        self.status.ends_with("_IN_PROGRESS")
    }

    /// Created by a change set that was never executed.
    pub fn is_awaiting_review(&self) -> bool {
        self.status == "REVIEW_IN_PROGRESS"
    }

    pub fn is_successful(&self) -> bool {
        matches!(self.status.as_str(), "CREATE_COMPLETE" | "UPDATE_COMPLETE")
    }
}

/// Everything needed to create one change set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetRequest {
    pub name: String,
    pub change_set_type: ChangeSetType,
    pub template_body: String,
    pub parameters: ParameterSet,
    pub capabilities: Vec<String>,
    pub tags: BTreeMap<String, String>,
    pub role_arn: Option<String>,
    pub notification_arns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSetDescription {
    pub name: String,
    /// `CREATE_PENDING`, `CREATE_IN_PROGRESS`, `CREATE_COMPLETE`, `FAILED`, ...
    pub status: String,
    pub status_reason: Option<String>,
    /// `AVAILABLE` once the change set can be executed
    pub execution_status: String,
    pub changes: Vec<ResourceChange>,
}

impl ChangeSetDescription {
    pub fn is_pending(&self) -> bool {
        matches!(
            self.status.as_str(),
            "CREATE_PENDING" | "CREATE_IN_PROGRESS"
        )
    }

    pub fn is_created(&self) -> bool {
        self.status == "CREATE_COMPLETE"
    }

    pub fn is_executable(&self) -> bool {
        self.execution_status == "AVAILABLE"
    }

    /// The service refuses empty change sets with a FAILED status.
    pub fn failed_without_changes(&self) -> bool {
        self.status == "FAILED"
            && self.status_reason.as_deref().is_some_and(|r| {
                r.contains("didn't contain changes") || r.contains("No updates are to be performed")
            })
    }
}

/// One row of a change set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceChange {
    /// `Add`, `Modify`, `Remove`, `Import`, `Dynamic`
    pub action: String,
    pub logical_id: String,
    pub physical_id: Option<String>,
    pub resource_type: String,
    /// `True`, `False` or `Conditional` (modifications only)
    pub replacement: Option<String>,
    /// Attribute scopes touched (`Properties`, `Tags`, ...)
    pub scope: Vec<String>,
    pub details: Vec<PropertyChange>,
}

/// One changed attribute of a modified resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyChange {
    /// `Properties`, `Tags`, `Metadata`, ...
    pub attribute: String,
    /// Property name, when the attribute is `Properties`
    pub name: Option<String>,
    /// `Never`, `Conditionally` or `Always`
    pub requires_recreation: Option<String>,
}

impl PropertyChange {
    pub fn recreates(&self) -> bool {
        matches!(
            self.requires_recreation.as_deref(),
            Some("Always" | "Conditionally")
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackEvent {
    pub timestamp: String,
    pub logical_id: String,
    pub resource_type: String,
    pub status: String,
    pub reason: Option<String>,
}

impl StackEvent {
    pub fn is_failure(&self) -> bool {
        self.status.ends_with("_FAILED")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackResource {
    pub logical_id: String,
    pub physical_id: Option<String>,
    pub resource_type: String,
    pub status: String,
}

/// Remote Stack API.
pub trait StackApi {
    fn validate_template(
        &self,
        target: &StackTarget,
        body: &str,
    ) -> Result<TemplateValidation, ApiError>;

    /// `Ok(None)` when the stack does not exist.
    fn describe_stack(&self, target: &StackTarget) -> Result<Option<StackDescription>, ApiError>;

    fn create_change_set(
        &self,
        target: &StackTarget,
        request: &ChangeSetRequest,
    ) -> Result<(), ApiError>;

    fn describe_change_set(
        &self,
        target: &StackTarget,
        name: &str,
    ) -> Result<ChangeSetDescription, ApiError>;

    fn execute_change_set(&self, target: &StackTarget, name: &str) -> Result<(), ApiError>;

    fn delete_change_set(&self, target: &StackTarget, name: &str) -> Result<(), ApiError>;

    /// Most recent first.
    fn describe_stack_events(&self, target: &StackTarget) -> Result<Vec<StackEvent>, ApiError>;

    fn describe_stack_resources(
        &self,
        target: &StackTarget,
    ) -> Result<Vec<StackResource>, ApiError>;

    /// Template body of the deployed stack as YAML.
    fn get_template(&self, target: &StackTarget) -> Result<String, ApiError>;

    /// Start deleting the stack. Does not wait for completion.
    fn delete_stack(&self, target: &StackTarget) -> Result<(), ApiError>;
}
