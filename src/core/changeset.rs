//! SX-007: Change set lifecycle for a single stack.
//!
//! render -> validate -> describe -> resolve parameters -> create change set
//! -> await -> inspect -> present diff -> confirm -> execute -> await
//! completion -> save outputs.
//!
//! From creation on, the change set is owned by a [`ChangeSetLease`]. Every
//! exit that does not execute it (error, timeout, cancellation, no changes)
//! drops the lease, which deletes the change set. Only a successful execute
//! or the no-execute hand-off releases it.

use super::error::{Result, StaxError};
use super::outputs::save_outputs;
use super::params::ParameterResolver;
use super::poll::{poll_until, Poll, PollError};
use super::settings::RunContext;
use super::types::{
    ChangeSetType, DeployEvent, DeployOptions, ParameterValue, Phase, StackOutcome, StackRecord,
    StackTarget, STACK_FILES_TOKEN, STACK_PATH_TOKEN,
};
use crate::provenance::eventlog::append_event;
use crate::provenance::hasher::change_set_name;
use crate::remote::{
    ApiError, ChangeSetDescription, ChangeSetRequest, StackApi, StackDescription,
};
use crate::review::changes::{change_table, event_table};
use crate::review::confirm::{is_affirmative, Confirmer};
use crate::review::diff::{diff_documents, render};
use std::collections::BTreeMap;
use std::time::Instant;

/// Failed events shown after an unsuccessful stack operation.
const FAILED_EVENTS_SHOWN: usize = 5;

type Step<T> = std::result::Result<T, (Phase, StaxError)>;

trait InPhase<T> {
    fn in_phase(self, phase: Phase) -> Step<T>;
}

impl<T> InPhase<T> for Result<T> {
    fn in_phase(self, phase: Phase) -> Step<T> {
        self.map_err(|e| (phase, e))
    }
}

/// Deletes its change set when dropped unless released.
pub struct ChangeSetLease<'a> {
    api: &'a dyn StackApi,
    target: StackTarget,
    name: String,
    released: bool,
}

impl<'a> ChangeSetLease<'a> {
    pub fn new(api: &'a dyn StackApi, target: StackTarget, name: String) -> Self {
        Self {
            api,
            target,
            name,
            released: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Give up ownership; the change set outlives the lease.
    pub fn release(mut self) -> String {
        self.released = true;
        std::mem::take(&mut self.name)
    }
}

impl Drop for ChangeSetLease<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.api.delete_change_set(&self.target, &self.name) {
            Ok(()) => tracing::debug!(stack = %self.target.name, change_set = %self.name, "change set deleted"),
            Err(e) => tracing::warn!(
                stack = %self.target.name,
                change_set = %self.name,
                error = %e,
                "could not delete change set"
            ),
        }
    }
}

pub struct ChangeSetOrchestrator<'a> {
    ctx: &'a RunContext,
    api: &'a dyn StackApi,
    params: &'a ParameterResolver<'a>,
    confirmer: &'a mut dyn Confirmer,
    options: DeployOptions,
}

impl<'a> ChangeSetOrchestrator<'a> {
    pub fn new(
        ctx: &'a RunContext,
        api: &'a dyn StackApi,
        params: &'a ParameterResolver<'a>,
        confirmer: &'a mut dyn Confirmer,
        options: DeployOptions,
    ) -> Self {
        Self {
            ctx,
            api,
            params,
            confirmer,
            options,
        }
    }

    /// Drive one stack through its lifecycle. Never returns an error: the
    /// failure and the phase it happened in are part of the outcome.
    pub fn deploy(&mut self, record: &StackRecord) -> StackOutcome {
        let started = Instant::now();
        self.log_event(
            &record.name,
            DeployEvent::DeployStarted {
                stack: record.name.clone(),
                run_id: self.ctx.run_id.clone(),
                stax_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        );

        let outcome = match self.run(record) {
            Ok(outcome) => outcome,
            Err((phase, error)) => StackOutcome::Failed { phase, error },
        };

        match &outcome {
            StackOutcome::Failed { phase, error } => {
                tracing::error!(stack = %record.name, %phase, %error, "deploy failed");
                self.log_event(
                    &record.name,
                    DeployEvent::DeployFailed {
                        stack: record.name.clone(),
                        phase: phase.to_string(),
                        error: error.to_string(),
                    },
                );
            }
            other => self.log_event(
                &record.name,
                DeployEvent::DeployCompleted {
                    stack: record.name.clone(),
                    run_id: self.ctx.run_id.clone(),
                    outcome: other.label().to_string(),
                    total_seconds: started.elapsed().as_secs_f64(),
                },
            ),
        }
        outcome
    }

    fn run(&mut self, record: &StackRecord) -> Step<StackOutcome> {
        let target = record.target();
        println!("Deploying {}", target);

        tracing::debug!(stack = %record.name, phase = %Phase::Rendering);
        let rendered = record
            .template
            .render()
            .map_err(|reason| StaxError::Render {
                stack: record.name.clone(),
                reason,
            })
            .in_phase(Phase::Rendering)?;
        let name = change_set_name(
            &self.ctx.settings.deploy.change_set_prefix,
            record,
            &rendered,
        );

        if self.options.execute_only {
            return self.execute_existing(record, &target, name);
        }

        tracing::debug!(stack = %record.name, phase = %Phase::Validating);
        let validation = self
            .api
            .validate_template(&target, &rendered)
            .map_err(|e| match e {
                ApiError::Rejected(reason) => StaxError::Validation {
                    stack: record.name.clone(),
                    reason,
                },
                other => StaxError::api(&record.name, "ValidateTemplate", other),
            })
            .in_phase(Phase::Validating)?;

        tracing::debug!(stack = %record.name, phase = %Phase::Describing);
        let existing = self
            .api
            .describe_stack(&target)
            .map_err(|e| StaxError::api(&record.name, "DescribeStacks", e))
            .in_phase(Phase::Describing)?;
        let change_set_type = match &existing {
            Some(stack) if !stack.is_awaiting_review() => ChangeSetType::Update,
            _ => ChangeSetType::Create,
        };

        tracing::debug!(stack = %record.name, phase = %Phase::ResolvingParameters);
        let parameters = self
            .params
            .resolve(record, self.options.use_previous_values)
            .in_phase(Phase::ResolvingParameters)?;
        if change_set_type == ChangeSetType::Create
            && parameters.values().any(|v| *v == ParameterValue::UsePrevious)
        {
            return Err((
                Phase::ResolvingParameters,
                StaxError::params(&record.name, "no previous values: stack does not exist yet"),
            ));
        }

        tracing::debug!(stack = %record.name, phase = %Phase::CreatingChangeSet, %change_set_type);
        let request = ChangeSetRequest {
            name: name.clone(),
            change_set_type,
            template_body: rendered.clone(),
            parameters,
            capabilities: validation.capabilities,
            tags: if record.tags_enabled {
                substitute_tags(record)
            } else {
                BTreeMap::new()
            },
            role_arn: record.role.clone(),
            notification_arns: self.ctx.settings.deploy.notification_arns.clone(),
        };
        match self.api.create_change_set(&target, &request) {
            Ok(()) => {}
            Err(ApiError::AlreadyExists(detail)) => {
                let conflict = StaxError::ChangeSetConflict {
                    stack: record.name.clone(),
                    name: name.clone(),
                };
                tracing::warn!(error = %conflict, %detail, "deleting stale change set");
                drop(ChangeSetLease::new(self.api, target.clone(), name));
                println!("  identical change set already exists; nothing to deploy");
                self.save_current(record, &target)?;
                return Ok(StackOutcome::AlreadyCurrent);
            }
            Err(e) => {
                return Err((
                    Phase::CreatingChangeSet,
                    StaxError::api(&record.name, "CreateChangeSet", e),
                ))
            }
        }
        let lease = ChangeSetLease::new(self.api, target.clone(), name.clone());
        tracing::info!(stack = %record.name, change_set = %name, %change_set_type, "change set created");
        self.log_event(
            &record.name,
            DeployEvent::ChangeSetCreated {
                stack: record.name.clone(),
                change_set: name.clone(),
                change_set_type: change_set_type.to_string(),
            },
        );

        tracing::debug!(stack = %record.name, phase = %Phase::AwaitingChangeSet);
        let description = match self.await_change_set(&target, &name) {
            Ok(d) => d,
            Err(PollError::Failed(d)) if d.failed_without_changes() => {
                drop(lease);
                return self.no_changes(record, &target);
            }
            Err(PollError::Failed(d)) => {
                return Err((
                    Phase::AwaitingChangeSet,
                    StaxError::ChangeSetFailed {
                        stack: record.name.clone(),
                        name,
                        reason: d
                            .status_reason
                            .unwrap_or_else(|| format!("status {}", d.status)),
                    },
                ))
            }
            Err(PollError::TimedOut { attempts }) => {
                return Err((
                    Phase::AwaitingChangeSet,
                    StaxError::Timeout {
                        stack: record.name.clone(),
                        waiting_for: format!("change set {}", name),
                        attempts,
                    },
                ))
            }
            Err(PollError::Check(e)) => {
                return Err((
                    Phase::AwaitingChangeSet,
                    StaxError::api(&record.name, "DescribeChangeSet", e),
                ))
            }
        };

        tracing::debug!(stack = %record.name, phase = %Phase::Inspecting, changes = description.changes.len());
        if description.changes.is_empty() {
            drop(lease);
            return self.no_changes(record, &target);
        }

        tracing::debug!(stack = %record.name, phase = %Phase::PresentingDiff);
        print!("{}", change_table(&description.changes));
        if change_set_type == ChangeSetType::Update {
            self.present_diff(&target, &rendered);
        }

        if self.options.no_execute {
            let name = lease.release();
            println!(
                "  change set {} left in place; run again with --execute-only to apply it",
                name
            );
            return Ok(StackOutcome::Previewed { change_set: name });
        }

        tracing::debug!(stack = %record.name, phase = %Phase::AwaitingConfirmation);
        let answer = self
            .confirmer
            .ask("Execute change set? Y to execute, anything else to cancel.")
            .map_err(|e| StaxError::io("<stdin>", e))
            .in_phase(Phase::AwaitingConfirmation)?;
        if !is_affirmative(&answer) {
            drop(lease);
            println!("  cancelled");
            self.log_event(
                &record.name,
                DeployEvent::Cancelled {
                    stack: record.name.clone(),
                    change_set: name,
                },
            );
            return Ok(StackOutcome::Cancelled);
        }

        self.execute(record, &target, lease)
    }

    /// Execute-only mode: the change set must already exist and be executable.
    fn execute_existing(
        &mut self,
        record: &StackRecord,
        target: &StackTarget,
        name: String,
    ) -> Step<StackOutcome> {
        let description = match self.api.describe_change_set(target, &name) {
            Ok(d) => d,
            Err(ApiError::NotFound(_)) => {
                return Err((
                    Phase::Executing,
                    StaxError::ChangeSetFailed {
                        stack: record.name.clone(),
                        name,
                        reason: "not found; create it first with --no-execute".into(),
                    },
                ))
            }
            Err(e) => {
                return Err((
                    Phase::Executing,
                    StaxError::api(&record.name, "DescribeChangeSet", e),
                ))
            }
        };
        // from here on every exit but a successful execute deletes it
        let lease = ChangeSetLease::new(self.api, target.clone(), name.clone());
        if !description.is_executable() {
            return Err((
                Phase::Executing,
                StaxError::ChangeSetFailed {
                    stack: record.name.clone(),
                    name,
                    reason: format!(
                        "not executable (status {}, execution status {})",
                        description.status, description.execution_status
                    ),
                },
            ));
        }
        print!("{}", change_table(&description.changes));
        self.execute(record, target, lease)
    }

    fn execute(
        &mut self,
        record: &StackRecord,
        target: &StackTarget,
        lease: ChangeSetLease<'_>,
    ) -> Step<StackOutcome> {
        tracing::debug!(stack = %record.name, phase = %Phase::Executing);
        println!("Executing {} on {}", lease.name(), target);
        self.api
            .execute_change_set(target, lease.name())
            .map_err(|e| StaxError::api(&record.name, "ExecuteChangeSet", e))
            .in_phase(Phase::Executing)?;
        let name = lease.release();
        self.log_event(
            &record.name,
            DeployEvent::Executed {
                stack: record.name.clone(),
                change_set: name.clone(),
            },
        );

        tracing::debug!(stack = %record.name, phase = %Phase::AwaitingCompletion);
        let stack = match self.await_stack(target) {
            Ok(s) => s,
            Err(PollError::Failed(s)) => {
                let reason = self.failure_reason(target, &s);
                return Err((
                    Phase::AwaitingCompletion,
                    StaxError::Execution {
                        stack: record.name.clone(),
                        status: s.status,
                        reason,
                    },
                ));
            }
            Err(PollError::TimedOut { attempts }) => {
                return Err((
                    Phase::AwaitingCompletion,
                    StaxError::Timeout {
                        stack: record.name.clone(),
                        waiting_for: "stack operation".into(),
                        attempts,
                    },
                ))
            }
            Err(PollError::Check(e)) => {
                return Err((
                    Phase::AwaitingCompletion,
                    StaxError::api(&record.name, "DescribeStacks", e),
                ))
            }
        };
        println!("  {} {}", record.name, stack.status);
        tracing::info!(stack = %record.name, status = %stack.status, "stack operation complete");

        if self.options.save {
            tracing::debug!(stack = %record.name, phase = %Phase::SavingOutputs);
            save_outputs(record, &self.ctx.settings.save.out_file_prefix, &stack.outputs)
                .in_phase(Phase::SavingOutputs)?;
        }

        Ok(StackOutcome::Deployed {
            change_set: name,
            status: stack.status,
        })
    }

    fn await_change_set(
        &self,
        target: &StackTarget,
        name: &str,
    ) -> std::result::Result<ChangeSetDescription, PollError<ChangeSetDescription, ApiError>> {
        let budget = self.ctx.change_set_budget();
        tracing::debug!(stack = %target.name, change_set = name, max_wait_secs = budget.max_wait().as_secs(), "waiting for change set");
        poll_until(&budget, |_| {
            let d = self.api.describe_change_set(target, name)?;
            Ok(if d.is_pending() {
                Poll::Pending
            } else if d.is_created() {
                Poll::Ready(d)
            } else {
                Poll::Failed(d)
            })
        })
    }

    fn await_stack(
        &self,
        target: &StackTarget,
    ) -> std::result::Result<StackDescription, PollError<StackDescription, ApiError>> {
        let budget = self.ctx.stack_budget();
        tracing::debug!(stack = %target.name, max_wait_secs = budget.max_wait().as_secs(), "waiting for stack operation");
        poll_until(&budget, |_| {
            let s = self
                .api
                .describe_stack(target)?
                .ok_or_else(|| ApiError::NotFound(format!("stack {} disappeared", target.name)))?;
            Ok(if s.is_in_progress() {
                Poll::Pending
            } else if s.is_successful() {
                Poll::Ready(s)
            } else {
                Poll::Failed(s)
            })
        })
    }

    /// Recent failed events, printed and summarised into one reason.
    fn failure_reason(&self, target: &StackTarget, stack: &StackDescription) -> String {
        let fallback = stack
            .status_reason
            .clone()
            .unwrap_or_else(|| "see stack events".to_string());
        match self.api.describe_stack_events(target) {
            Ok(events) => {
                let failed: Vec<_> = events
                    .into_iter()
                    .filter(|e| e.is_failure())
                    .take(FAILED_EVENTS_SHOWN)
                    .collect();
                if failed.is_empty() {
                    return fallback;
                }
                print!("{}", event_table(&failed));
                failed
                    .iter()
                    .find_map(|e| e.reason.clone())
                    .unwrap_or(fallback)
            }
            Err(e) => {
                tracing::warn!(stack = %target.name, error = %e, "could not fetch stack events");
                fallback
            }
        }
    }

    fn present_diff(&self, target: &StackTarget, rendered: &str) {
        let previous = match self.api.get_template(target) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(stack = %target.name, error = %e, "could not fetch deployed template");
                return;
            }
        };
        match diff_documents(&previous, rendered) {
            Ok(entries) if entries.is_empty() => println!("  template unchanged"),
            Ok(entries) => print!("{}", render(&entries)),
            Err(e) => tracing::warn!(stack = %target.name, error = %e, "could not diff templates"),
        }
    }

    fn no_changes(&mut self, record: &StackRecord, target: &StackTarget) -> Step<StackOutcome> {
        println!("  no changes to deploy");
        tracing::info!(stack = %record.name, "no changes");
        self.log_event(
            &record.name,
            DeployEvent::NoChanges {
                stack: record.name.clone(),
            },
        );
        self.save_current(record, target)?;
        Ok(StackOutcome::NoChanges)
    }

    /// Save outputs of an unchanged stack so dependents see current values.
    fn save_current(&self, record: &StackRecord, target: &StackTarget) -> Step<()> {
        if !self.options.save {
            return Ok(());
        }
        let existing = self
            .api
            .describe_stack(target)
            .map_err(|e| StaxError::api(&record.name, "DescribeStacks", e))
            .in_phase(Phase::SavingOutputs)?;
        if let Some(stack) = existing.filter(|s| !s.is_awaiting_review()) {
            save_outputs(record, &self.ctx.settings.save.out_file_prefix, &stack.outputs)
                .in_phase(Phase::SavingOutputs)?;
        }
        Ok(())
    }

    fn log_event(&self, stack: &str, event: DeployEvent) {
        if !self.ctx.event_log_enabled() {
            return;
        }
        if let Err(e) = append_event(&self.ctx.state_dir(), stack, event) {
            tracing::warn!(stack, error = %e, "could not append to event log");
        }
    }
}

/// Tags with path tokens substituted.
pub fn substitute_tags(record: &StackRecord) -> BTreeMap<String, String> {
    let files = record.location.files_label();
    record
        .tags
        .iter()
        .map(|(k, v)| {
            let value = v
                .replace(STACK_PATH_TOKEN, &record.location.rel_dir)
                .replace(STACK_FILES_TOKEN, &files);
            (k.clone(), value)
        })
        .collect()
}
