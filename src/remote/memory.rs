//! In-memory Stack API for orchestrator and driver tests.
//!
//! Models just enough of the remote service: change sets that are pending
//! for a configurable number of polls, the "no changes" refusal, stacks that
//! stay in progress for a while after execution, and scripted failures.
//! Every call is recorded so tests can assert on the exact remote traffic.

use super::{
    ApiError, ChangeSetDescription, ChangeSetRequest, ResourceChange, StackApi,
    StackDescription, StackEvent, StackResource, TemplateValidation,
};
use crate::core::types::{ChangeSetType, ParameterValue, StackOutputs, StackTarget};
use std::cell::RefCell;
use std::collections::BTreeMap;

const NO_CHANGES_REASON: &str =
    "The submitted information didn't contain changes. Submit different information to create a change set.";

#[derive(Debug, Clone)]
struct MemStack {
    status: String,
    template: String,
    parameters: BTreeMap<String, String>,
    outputs: StackOutputs,
    polls_pending: u32,
    review_pending: u32,
    events: Vec<StackEvent>,
}

#[derive(Debug, Clone)]
struct MemChangeSet {
    request: ChangeSetRequest,
    description: ChangeSetDescription,
    polls_pending: u32,
}

#[derive(Debug, Default)]
struct State {
    stacks: BTreeMap<String, MemStack>,
    change_sets: BTreeMap<(String, String), MemChangeSet>,
    calls: Vec<String>,
    requests: Vec<(String, ChangeSetRequest)>,
    rejected_templates: BTreeMap<String, String>,
    failed_executions: BTreeMap<String, (String, String)>,
    outputs_after_execute: BTreeMap<String, StackOutputs>,
    change_set_delay: u32,
    stack_delay: u32,
    review_delay: u32,
}

#[derive(Debug, Default)]
pub struct MemoryStackApi {
    state: RefCell<State>,
}

impl MemoryStackApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing stack.
    pub fn with_stack(self, name: &str, template: &str, outputs: &[(&str, &str)]) -> Self {
        self.state.borrow_mut().stacks.insert(
            name.to_string(),
            MemStack {
                status: "CREATE_COMPLETE".into(),
                template: template.to_string(),
                parameters: BTreeMap::new(),
                outputs: outputs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                polls_pending: 0,
                review_pending: 0,
                events: Vec::new(),
            },
        );
        self
    }

    /// Seed stored parameter values for an existing stack.
    pub fn with_parameters(self, stack: &str, params: &[(&str, &str)]) -> Self {
        if let Some(s) = self.state.borrow_mut().stacks.get_mut(stack) {
            s.parameters = params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
        }
        self
    }

    /// Seed a change set left behind by an earlier run.
    pub fn with_change_set(
        self,
        stack: &str,
        name: &str,
        status: &str,
        execution_status: &str,
    ) -> Self {
        let request = ChangeSetRequest {
            name: name.to_string(),
            change_set_type: ChangeSetType::Update,
            template_body: String::new(),
            parameters: BTreeMap::new(),
            capabilities: Vec::new(),
            tags: BTreeMap::new(),
            role_arn: None,
            notification_arns: Vec::new(),
        };
        let description = ChangeSetDescription {
            name: name.to_string(),
            status: status.to_string(),
            status_reason: None,
            execution_status: execution_status.to_string(),
            changes: Vec::new(),
        };
        self.state.borrow_mut().change_sets.insert(
            (stack.to_string(), name.to_string()),
            MemChangeSet {
                request,
                description,
                polls_pending: 0,
            },
        );
        self
    }

    /// Validation of this stack's template is refused with `reason`.
    pub fn reject_template(self, stack: &str, reason: &str) -> Self {
        self.state
            .borrow_mut()
            .rejected_templates
            .insert(stack.to_string(), reason.to_string());
        self
    }

    /// Execution of this stack ends in `status` with a failed resource event.
    pub fn fail_execution(self, stack: &str, status: &str, reason: &str) -> Self {
        self.state
            .borrow_mut()
            .failed_executions
            .insert(stack.to_string(), (status.to_string(), reason.to_string()));
        self
    }

    /// Outputs the stack reports after its next successful execution.
    pub fn outputs_after_execute(self, stack: &str, outputs: &[(&str, &str)]) -> Self {
        self.state.borrow_mut().outputs_after_execute.insert(
            stack.to_string(),
            outputs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    /// Number of pending polls before a change set settles.
    pub fn change_set_delay(self, polls: u32) -> Self {
        self.state.borrow_mut().change_set_delay = polls;
        self
    }

    /// Number of in-progress polls after execution.
    pub fn stack_delay(self, polls: u32) -> Self {
        self.state.borrow_mut().stack_delay = polls;
        self
    }

    /// Polls that still report `REVIEW_IN_PROGRESS` after a create is executed.
    pub fn review_delay(self, polls: u32) -> Self {
        self.state.borrow_mut().review_delay = polls;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    /// Calls whose operation name equals `op`.
    pub fn count(&self, op: &str) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .count()
    }

    /// Change sets still present for `stack`.
    pub fn live_change_sets(&self, stack: &str) -> Vec<String> {
        self.state
            .borrow()
            .change_sets
            .keys()
            .filter(|(s, _)| s == stack)
            .map(|(_, n)| n.clone())
            .collect()
    }

    pub fn stack_status(&self, stack: &str) -> Option<String> {
        self.state
            .borrow()
            .stacks
            .get(stack)
            .map(|s| s.status.clone())
    }

    pub fn stack_template(&self, stack: &str) -> Option<String> {
        self.state
            .borrow()
            .stacks
            .get(stack)
            .map(|s| s.template.clone())
    }

    /// Most recent request that created a change set for `stack`.
    pub fn last_request(&self, stack: &str) -> Option<ChangeSetRequest> {
        self.state
            .borrow()
            .requests
            .iter()
            .rev()
            .find(|(s, _)| s == stack)
            .map(|(_, r)| r.clone())
    }

    fn record(&self, op: &str, target: &StackTarget, extra: Option<&str>) {
        let entry = match extra {
            Some(e) => format!("{} {} {}", op, target.name, e),
            None => format!("{} {}", op, target.name),
        };
        self.state.borrow_mut().calls.push(entry);
    }
}

fn resource_names(template: &str) -> Vec<(String, String)> {
    let value: serde_yaml_ng::Value = match serde_yaml_ng::from_str(template) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };
    match value.get("Resources") {
        Some(serde_yaml_ng::Value::Mapping(m)) => m
            .iter()
            .filter_map(|(k, v)| {
                let name = k.as_str()?.to_string();
                let ty = v
                    .get("Type")
                    .and_then(|t| t.as_str())
                    .unwrap_or("AWS::CloudFormation::CustomResource")
                    .to_string();
                Some((name, ty))
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn plan_changes(existing: Option<&MemStack>, request: &ChangeSetRequest) -> Vec<ResourceChange> {
    let desired = resource_names(&request.template_body);
    let Some(stack) = existing.filter(|s| s.status != "REVIEW_IN_PROGRESS") else {
        return desired
            .into_iter()
            .map(|(logical_id, resource_type)| ResourceChange {
                action: "Add".into(),
                logical_id,
                resource_type,
                ..Default::default()
            })
            .collect();
    };

    let params_changed = request.parameters.iter().any(|(k, v)| match v {
        ParameterValue::Literal(value) => stack.parameters.get(k) != Some(value),
        ParameterValue::UsePrevious => false,
    });
    if stack.template == request.template_body && !params_changed {
        return Vec::new();
    }

    let current = resource_names(&stack.template);
    let mut changes = Vec::new();
    for (logical_id, resource_type) in &desired {
        let action = if current.iter().any(|(n, _)| n == logical_id) {
            "Modify"
        } else {
            "Add"
        };
        changes.push(ResourceChange {
            action: action.into(),
            logical_id: logical_id.clone(),
            physical_id: (action == "Modify").then(|| format!("{}-phys", logical_id)),
            resource_type: resource_type.clone(),
            replacement: (action == "Modify").then(|| "False".to_string()),
            scope: vec!["Properties".into()],
            details: Vec::new(),
        });
    }
    for (logical_id, resource_type) in &current {
        if !desired.iter().any(|(n, _)| n == logical_id) {
            changes.push(ResourceChange {
                action: "Remove".into(),
                logical_id: logical_id.clone(),
                physical_id: Some(format!("{}-phys", logical_id)),
                resource_type: resource_type.clone(),
                ..Default::default()
            });
        }
    }
    changes
}

impl StackApi for MemoryStackApi {
    fn validate_template(
        &self,
        target: &StackTarget,
        body: &str,
    ) -> Result<TemplateValidation, ApiError> {
        self.record("validate_template", target, None);
        if let Some(reason) = self.state.borrow().rejected_templates.get(&target.name) {
            return Err(ApiError::Rejected(reason.clone()));
        }
        let capabilities = if body.contains("AWS::IAM::") {
            vec!["CAPABILITY_IAM".to_string()]
        } else {
            Vec::new()
        };
        Ok(TemplateValidation {
            capabilities,
            description: None,
        })
    }

    fn describe_stack(&self, target: &StackTarget) -> Result<Option<StackDescription>, ApiError> {
        self.record("describe_stack", target, None);
        let mut state = self.state.borrow_mut();
        let Some(stack) = state.stacks.get_mut(&target.name) else {
            return Ok(None);
        };
        let status = if stack.review_pending > 0 {
            stack.review_pending -= 1;
            "REVIEW_IN_PROGRESS".to_string()
        } else if stack.polls_pending > 0 {
            stack.polls_pending -= 1;
            if stack.status.starts_with("CREATE") || stack.status.starts_with("ROLLBACK") {
                "CREATE_IN_PROGRESS".to_string()
            } else {
                "UPDATE_IN_PROGRESS".to_string()
            }
        } else {
            stack.status.clone()
        };
        Ok(Some(StackDescription {
            name: target.name.clone(),
            status,
            status_reason: None,
            outputs: stack.outputs.clone(),
        }))
    }

    fn create_change_set(
        &self,
        target: &StackTarget,
        request: &ChangeSetRequest,
    ) -> Result<(), ApiError> {
        self.record("create_change_set", target, Some(&request.name));
        let mut state = self.state.borrow_mut();
        state
            .requests
            .push((target.name.clone(), request.clone()));
        let key = (target.name.clone(), request.name.clone());
        if state.change_sets.contains_key(&key) {
            return Err(ApiError::AlreadyExists(format!(
                "ChangeSet {} already exists",
                request.name
            )));
        }

        let existing = state.stacks.get(&target.name);
        match (request.change_set_type, existing) {
            (ChangeSetType::Update, None) => {
                return Err(ApiError::Rejected(format!(
                    "Stack [{}] does not exist",
                    target.name
                )))
            }
            (ChangeSetType::Create, Some(s)) if s.status != "REVIEW_IN_PROGRESS" => {
                return Err(ApiError::Rejected(format!(
                    "Stack [{}] already exists and cannot be created again",
                    target.name
                )))
            }
            _ => {}
        }

        let changes = plan_changes(existing, request);
        let description = if changes.is_empty() {
            ChangeSetDescription {
                name: request.name.clone(),
                status: "FAILED".into(),
                status_reason: Some(NO_CHANGES_REASON.into()),
                execution_status: "UNAVAILABLE".into(),
                changes,
            }
        } else {
            ChangeSetDescription {
                name: request.name.clone(),
                status: "CREATE_COMPLETE".into(),
                status_reason: None,
                execution_status: "AVAILABLE".into(),
                changes,
            }
        };

        if request.change_set_type == ChangeSetType::Create {
            state
                .stacks
                .entry(target.name.clone())
                .or_insert_with(|| MemStack {
                    status: "REVIEW_IN_PROGRESS".into(),
                    template: String::new(),
                    parameters: BTreeMap::new(),
                    outputs: StackOutputs::new(),
                    polls_pending: 0,
                    review_pending: 0,
                    events: Vec::new(),
                });
        }

        let polls_pending = state.change_set_delay;
        state.change_sets.insert(
            key,
            MemChangeSet {
                request: request.clone(),
                description,
                polls_pending,
            },
        );
        Ok(())
    }

    fn describe_change_set(
        &self,
        target: &StackTarget,
        name: &str,
    ) -> Result<ChangeSetDescription, ApiError> {
        self.record("describe_change_set", target, Some(name));
        let mut state = self.state.borrow_mut();
        let cs = state
            .change_sets
            .get_mut(&(target.name.clone(), name.to_string()))
            .ok_or_else(|| ApiError::NotFound(format!("ChangeSet [{}] does not exist", name)))?;
        if cs.polls_pending > 0 {
            cs.polls_pending -= 1;
            return Ok(ChangeSetDescription {
                name: name.to_string(),
                status: "CREATE_IN_PROGRESS".into(),
                status_reason: None,
                execution_status: "UNAVAILABLE".into(),
                changes: Vec::new(),
            });
        }
        Ok(cs.description.clone())
    }

    fn execute_change_set(&self, target: &StackTarget, name: &str) -> Result<(), ApiError> {
        self.record("execute_change_set", target, Some(name));
        let mut state = self.state.borrow_mut();
        let key = (target.name.clone(), name.to_string());
        match state.change_sets.get(&key) {
            None => {
                return Err(ApiError::NotFound(format!(
                    "ChangeSet [{}] does not exist",
                    name
                )))
            }
            Some(cs) if !cs.description.is_executable() => {
                return Err(ApiError::Rejected(format!(
                    "ChangeSet [{}] cannot be executed in its current status",
                    name
                )))
            }
            Some(_) => {}
        }
        let Some(cs) = state.change_sets.remove(&key) else {
            return Ok(());
        };
        // the service drops every other change set of the stack on execute
        state.change_sets.retain(|(s, _), _| s != &target.name);

        let failure = state.failed_executions.get(&target.name).cloned();
        let outputs = state.outputs_after_execute.get(&target.name).cloned();
        let delay = state.stack_delay;
        let review_delay = state.review_delay;
        let Some(stack) = state.stacks.get_mut(&target.name) else {
            return Err(ApiError::NotFound(format!(
                "Stack [{}] does not exist",
                target.name
            )));
        };
        let creating = cs.request.change_set_type == ChangeSetType::Create;
        stack.polls_pending = delay;
        if creating {
            stack.review_pending = review_delay;
        }
        match failure {
            Some((status, reason)) => {
                stack.status = status.clone();
                stack.events.insert(
                    0,
                    StackEvent {
                        timestamp: "2026-01-01T00:00:01Z".into(),
                        logical_id: target.name.clone(),
                        resource_type: "AWS::CloudFormation::Stack".into(),
                        status,
                        reason: Some("The following resource(s) failed".into()),
                    },
                );
                if let Some((logical_id, resource_type)) =
                    resource_names(&cs.request.template_body).into_iter().next()
                {
                    stack.events.insert(
                        0,
                        StackEvent {
                            timestamp: "2026-01-01T00:00:00Z".into(),
                            logical_id,
                            resource_type,
                            status: if creating {
                                "CREATE_FAILED".into()
                            } else {
                                "UPDATE_FAILED".into()
                            },
                            reason: Some(reason),
                        },
                    );
                }
            }
            None => {
                stack.status = if creating {
                    "CREATE_COMPLETE".into()
                } else {
                    "UPDATE_COMPLETE".into()
                };
                stack.template = cs.request.template_body.clone();
                for (k, v) in &cs.request.parameters {
                    if let ParameterValue::Literal(value) = v {
                        stack.parameters.insert(k.clone(), value.clone());
                    }
                }
                if let Some(outputs) = outputs {
                    stack.outputs = outputs;
                }
            }
        }
        Ok(())
    }

    fn delete_change_set(&self, target: &StackTarget, name: &str) -> Result<(), ApiError> {
        self.record("delete_change_set", target, Some(name));
        self.state
            .borrow_mut()
            .change_sets
            .remove(&(target.name.clone(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| ApiError::NotFound(format!("ChangeSet [{}] does not exist", name)))
    }

    fn describe_stack_events(&self, target: &StackTarget) -> Result<Vec<StackEvent>, ApiError> {
        self.record("describe_stack_events", target, None);
        self.state
            .borrow()
            .stacks
            .get(&target.name)
            .map(|s| s.events.clone())
            .ok_or_else(|| ApiError::NotFound(format!("Stack [{}] does not exist", target.name)))
    }

    fn describe_stack_resources(
        &self,
        target: &StackTarget,
    ) -> Result<Vec<StackResource>, ApiError> {
        self.record("describe_stack_resources", target, None);
        let state = self.state.borrow();
        let stack = state
            .stacks
            .get(&target.name)
            .ok_or_else(|| ApiError::NotFound(format!("Stack [{}] does not exist", target.name)))?;
        Ok(resource_names(&stack.template)
            .into_iter()
            .map(|(logical_id, resource_type)| StackResource {
                physical_id: Some(format!("{}-phys", logical_id)),
                logical_id,
                resource_type,
                status: stack.status.clone(),
            })
            .collect())
    }

    fn get_template(&self, target: &StackTarget) -> Result<String, ApiError> {
        self.record("get_template", target, None);
        self.state
            .borrow()
            .stacks
            .get(&target.name)
            .filter(|s| !s.template.is_empty())
            .map(|s| s.template.clone())
            .ok_or_else(|| ApiError::NotFound(format!("Stack [{}] does not exist", target.name)))
    }

    fn delete_stack(&self, target: &StackTarget) -> Result<(), ApiError> {
        self.record("delete_stack", target, None);
        let mut state = self.state.borrow_mut();
        state
            .stacks
            .remove(&target.name)
            .ok_or_else(|| ApiError::NotFound(format!("Stack [{}] does not exist", target.name)))?;
        state.change_sets.retain(|(s, _), _| s != &target.name);
        Ok(())
    }
}
