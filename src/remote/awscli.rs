//! SX-011: Stack API over the `aws cloudformation` command line.
//!
//! Each call runs `aws cloudformation <op> --profile P --region R --output json`.
//! Request bodies that may exceed argv limits (templates, change set input)
//! go through temp files referenced as `file://`.

use super::local::exec_command;
use super::{
    ApiError, ChangeSetDescription, ChangeSetRequest, PropertyChange, ResourceChange, StackApi,
    StackDescription, StackEvent, StackResource, TemplateValidation,
};
use crate::core::types::{ParameterValue, StackTarget};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::io::Write;

/// Cap on events fetched per call.
const MAX_EVENTS: &str = "100";

pub struct AwsCliStackApi {
    program: String,
}

impl Default for AwsCliStackApi {
    fn default() -> Self {
        Self::new("aws")
    }
}

impl AwsCliStackApi {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn call(
        &self,
        target: &StackTarget,
        operation: &str,
        extra: &[&str],
    ) -> Result<serde_json::Value, ApiError> {
        let mut args = vec![
            "cloudformation",
            operation,
            "--profile",
            target.profile.as_str(),
            "--region",
            target.region.as_str(),
            "--output",
            "json",
        ];
        args.extend_from_slice(extra);

        let out = exec_command(&self.program, &args, &[]).map_err(ApiError::Command)?;
        if !out.success() {
            return Err(classify_failure(&out.stderr));
        }
        if out.stdout.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&out.stdout)
            .map_err(|e| ApiError::Malformed(format!("{}: {}", operation, e)))
    }
}

/// Map CLI stderr onto the error kinds the orchestrator distinguishes.
pub fn classify_failure(stderr: &str) -> ApiError {
    let message = stderr
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .unwrap_or("")
        .to_string();
    let detail = message
        .split_once("operation: ")
        .map(|(_, d)| d.to_string())
        .unwrap_or_else(|| message.clone());

    if stderr.contains("(AlreadyExistsException)") {
        ApiError::AlreadyExists(detail)
    } else if stderr.contains("NotFoundException") || detail.contains("does not exist") {
        ApiError::NotFound(detail)
    } else if stderr.contains("(ValidationError)")
        || stderr.contains("(InsufficientCapabilitiesException)")
        || stderr.contains("(AccessDenied")
    {
        ApiError::Rejected(detail)
    } else {
        ApiError::Command(message)
    }
}

fn decode<T: DeserializeOwned>(operation: &str, value: serde_json::Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::Malformed(format!("{}: {}", operation, e)))
}

/// Write `contents` to a temp file and return it with its `file://` URI.
fn spill(contents: &str, suffix: &str) -> Result<(tempfile::NamedTempFile, String), ApiError> {
    let mut file = tempfile::Builder::new()
        .prefix("stax-")
        .suffix(suffix)
        .tempfile()
        .map_err(|e| ApiError::Command(format!("cannot create temp file: {}", e)))?;
    file.write_all(contents.as_bytes())
        .map_err(|e| ApiError::Command(format!("cannot write temp file: {}", e)))?;
    let uri = format!("file://{}", file.path().display());
    Ok((file, uri))
}

/// `--cli-input-json` document for `create-change-set`.
pub fn change_set_input(target: &StackTarget, request: &ChangeSetRequest) -> serde_json::Value {
    let parameters: Vec<serde_json::Value> = request
        .parameters
        .iter()
        .map(|(key, value)| match value {
            ParameterValue::Literal(v) => {
                serde_json::json!({ "ParameterKey": key, "ParameterValue": v })
            }
            ParameterValue::UsePrevious => {
                serde_json::json!({ "ParameterKey": key, "UsePreviousValue": true })
            }
        })
        .collect();
    let tags: Vec<serde_json::Value> = request
        .tags
        .iter()
        .map(|(k, v)| serde_json::json!({ "Key": k, "Value": v }))
        .collect();

    let mut input = serde_json::json!({
        "StackName": target.name,
        "ChangeSetName": request.name,
        "ChangeSetType": request.change_set_type.to_string(),
        "TemplateBody": request.template_body,
        "Parameters": parameters,
        "Capabilities": request.capabilities,
        "Tags": tags,
    });
    if let Some(map) = input.as_object_mut() {
        if let Some(role) = &request.role_arn {
            map.insert("RoleARN".into(), role.clone().into());
        }
        if !request.notification_arns.is_empty() {
            map.insert(
                "NotificationARNs".into(),
                request.notification_arns.clone().into(),
            );
        }
    }
    input
}

// ============================================================================
// Wire shapes
// ============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ValidateTemplateOutput {
    #[serde(default)]
    capabilities: Vec<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStacksOutput {
    #[serde(default)]
    stacks: Vec<WireStack>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireStack {
    stack_name: String,
    stack_status: String,
    stack_status_reason: Option<String>,
    #[serde(default)]
    outputs: Vec<WireOutput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireOutput {
    output_key: String,
    #[serde(default)]
    output_value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeChangeSetOutput {
    change_set_name: String,
    status: String,
    status_reason: Option<String>,
    #[serde(default)]
    execution_status: String,
    #[serde(default)]
    changes: Vec<WireChange>,
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireChange {
    resource_change: Option<WireResourceChange>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireResourceChange {
    #[serde(default)]
    action: String,
    logical_resource_id: String,
    physical_resource_id: Option<String>,
    #[serde(default)]
    resource_type: String,
    replacement: Option<String>,
    #[serde(default)]
    scope: Vec<String>,
    #[serde(default)]
    details: Vec<WireDetail>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireDetail {
    target: Option<WireDetailTarget>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireDetailTarget {
    #[serde(default)]
    attribute: String,
    name: Option<String>,
    requires_recreation: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStackEventsOutput {
    #[serde(default)]
    stack_events: Vec<WireEvent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireEvent {
    timestamp: String,
    logical_resource_id: String,
    #[serde(default)]
    resource_type: String,
    resource_status: String,
    resource_status_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStackResourcesOutput {
    #[serde(default)]
    stack_resources: Vec<WireResource>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireResource {
    logical_resource_id: String,
    physical_resource_id: Option<String>,
    resource_type: String,
    resource_status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetTemplateOutput {
    template_body: serde_json::Value,
}

fn stack_from_wire(w: WireStack) -> StackDescription {
    StackDescription {
        name: w.stack_name,
        status: w.stack_status,
        status_reason: w.stack_status_reason,
        outputs: w
            .outputs
            .into_iter()
            .map(|o| (o.output_key, o.output_value))
            .collect(),
    }
}

fn change_from_wire(w: WireResourceChange) -> ResourceChange {
    ResourceChange {
        action: w.action,
        logical_id: w.logical_resource_id,
        physical_id: w.physical_resource_id,
        resource_type: w.resource_type,
        replacement: w.replacement,
        scope: w.scope,
        details: w
            .details
            .into_iter()
            .filter_map(|d| d.target)
            .map(|t| PropertyChange {
                attribute: t.attribute,
                name: t.name,
                requires_recreation: t.requires_recreation,
            })
            .collect(),
    }
}

/// JSON templates come back as objects, YAML templates as strings.
fn template_body_to_yaml(body: serde_json::Value) -> Result<String, ApiError> {
    match body {
        serde_json::Value::String(s) => Ok(s),
        other => serde_yaml_ng::to_string(&other)
            .map_err(|e| ApiError::Malformed(format!("GetTemplate: {}", e))),
    }
}

impl StackApi for AwsCliStackApi {
    fn validate_template(
        &self,
        target: &StackTarget,
        body: &str,
    ) -> Result<TemplateValidation, ApiError> {
        let (_file, uri) = spill(body, ".yaml")?;
        let value = self.call(target, "validate-template", &["--template-body", &uri])?;
        let out: ValidateTemplateOutput = decode("ValidateTemplate", value)?;
        Ok(TemplateValidation {
            capabilities: out.capabilities,
            description: out.description,
        })
    }

    fn describe_stack(&self, target: &StackTarget) -> Result<Option<StackDescription>, ApiError> {
        let value = match self.call(target, "describe-stacks", &["--stack-name", &target.name]) {
            Ok(v) => v,
            Err(ApiError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let out: DescribeStacksOutput = decode("DescribeStacks", value)?;
        Ok(out.stacks.into_iter().next().map(stack_from_wire))
    }

    fn create_change_set(
        &self,
        target: &StackTarget,
        request: &ChangeSetRequest,
    ) -> Result<(), ApiError> {
        let input = change_set_input(target, request).to_string();
        let (_file, uri) = spill(&input, ".json")?;
        self.call(target, "create-change-set", &["--cli-input-json", &uri])?;
        Ok(())
    }

    fn describe_change_set(
        &self,
        target: &StackTarget,
        name: &str,
    ) -> Result<ChangeSetDescription, ApiError> {
        let mut description: Option<ChangeSetDescription> = None;
        let mut token: Option<String> = None;
        loop {
            let mut args = vec!["--stack-name", target.name.as_str(), "--change-set-name", name];
            if let Some(t) = token.as_deref() {
                args.extend_from_slice(&["--next-token", t]);
            }
            let value = self.call(target, "describe-change-set", &args)?;
            let page: DescribeChangeSetOutput = decode("DescribeChangeSet", value)?;
            let changes = page
                .changes
                .into_iter()
                .filter_map(|c| c.resource_change)
                .map(change_from_wire);
            match description.as_mut() {
                Some(d) => d.changes.extend(changes),
                None => {
                    description = Some(ChangeSetDescription {
                        name: page.change_set_name,
                        status: page.status,
                        status_reason: page.status_reason,
                        execution_status: page.execution_status,
                        changes: changes.collect(),
                    })
                }
            }
            match page.next_token {
                Some(t) if !t.is_empty() => token = Some(t),
                _ => break,
            }
        }
        description.ok_or_else(|| ApiError::Malformed("DescribeChangeSet: empty".into()))
    }

    fn execute_change_set(&self, target: &StackTarget, name: &str) -> Result<(), ApiError> {
        self.call(
            target,
            "execute-change-set",
            &["--stack-name", &target.name, "--change-set-name", name],
        )?;
        Ok(())
    }

    fn delete_change_set(&self, target: &StackTarget, name: &str) -> Result<(), ApiError> {
        self.call(
            target,
            "delete-change-set",
            &["--stack-name", &target.name, "--change-set-name", name],
        )?;
        Ok(())
    }

    fn describe_stack_events(&self, target: &StackTarget) -> Result<Vec<StackEvent>, ApiError> {
        let value = self.call(
            target,
            "describe-stack-events",
            &["--stack-name", &target.name, "--max-items", MAX_EVENTS],
        )?;
        let out: DescribeStackEventsOutput = decode("DescribeStackEvents", value)?;
        Ok(out
            .stack_events
            .into_iter()
            .map(|e| StackEvent {
                timestamp: e.timestamp,
                logical_id: e.logical_resource_id,
                resource_type: e.resource_type,
                status: e.resource_status,
                reason: e.resource_status_reason,
            })
            .collect())
    }

    fn describe_stack_resources(
        &self,
        target: &StackTarget,
    ) -> Result<Vec<StackResource>, ApiError> {
        let value = self.call(
            target,
            "describe-stack-resources",
            &["--stack-name", &target.name],
        )?;
        let out: DescribeStackResourcesOutput = decode("DescribeStackResources", value)?;
        Ok(out
            .stack_resources
            .into_iter()
            .map(|r| StackResource {
                logical_id: r.logical_resource_id,
                physical_id: r.physical_resource_id,
                resource_type: r.resource_type,
                status: r.resource_status,
            })
            .collect())
    }

    fn get_template(&self, target: &StackTarget) -> Result<String, ApiError> {
        let value = self.call(
            target,
            "get-template",
            &["--stack-name", &target.name, "--template-stage", "Original"],
        )?;
        let out: GetTemplateOutput = decode("GetTemplate", value)?;
        template_body_to_yaml(out.template_body)
    }

    fn delete_stack(&self, target: &StackTarget) -> Result<(), ApiError> {
        self.call(target, "delete-stack", &["--stack-name", &target.name])?;
        Ok(())
    }
}
