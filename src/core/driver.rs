//! SX-008: Deployment driver.
//!
//! Collects records from the config provider, orders them (dependency mode)
//! and hands each one to the change set orchestrator:
//! collect -> graph -> resolve -> for each stack: orchestrate -> record outcome

use super::changeset::ChangeSetOrchestrator;
use super::error::{Result, StaxError};
use super::graph::DependencyGraph;
use super::params::ParameterResolver;
use super::parser::ConfigProvider;
use super::settings::RunContext;
use super::types::{DeployEvent, DeployOptions, DeployReport, Phase, StackOutcome, StackRecord};
use crate::provenance::eventlog::append_event;
use crate::remote::sops::SecretDecryptor;
use crate::remote::StackApi;
use crate::review::confirm::Confirmer;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

/// Build the dependency graph over every collected record.
pub fn build_graph(records: &[StackRecord]) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for record in records {
        graph.add_node(&record.name, &record.depends_on);
    }
    graph
}

/// Records in deployment order. Dependency mode resolves the graph; any
/// cycle or unknown dependency aborts here, before a remote call is made.
pub fn deployment_order<'r>(
    records: &'r [StackRecord],
    graph: Option<&DependencyGraph>,
) -> Result<Vec<&'r StackRecord>> {
    let Some(graph) = graph else {
        return Ok(records.iter().collect());
    };
    let by_name: BTreeMap<&str, &StackRecord> =
        records.iter().map(|r| (r.name.as_str(), r)).collect();
    Ok(graph
        .resolve()?
        .iter()
        .filter_map(|name| by_name.get(name.as_str()).copied())
        .collect())
}

/// Deploy every stack under `scope`.
///
/// Run-level problems (config, dependency resolution) are returned as
/// errors. Per-stack failures are recorded in the report and the run goes
/// on; in dependency mode their transitive dependents are skipped.
pub fn deploy_all(
    ctx: &RunContext,
    provider: &dyn ConfigProvider,
    api: &dyn StackApi,
    decryptor: &dyn SecretDecryptor,
    confirmer: &mut dyn Confirmer,
    scope: &[PathBuf],
    options: DeployOptions,
) -> Result<DeployReport> {
    let start = Instant::now();
    let mut options = options;

    let records = provider.stacks(scope)?;
    if records.is_empty() {
        tracing::warn!("no stacks matched");
        println!("No stacks to deploy.");
        return Ok(DeployReport::default());
    }

    let graph = if options.dependencies {
        // dependents read outputs of the stacks they depend on
        options.save = true;
        Some(build_graph(&records))
    } else {
        None
    };
    let order = deployment_order(&records, graph.as_ref())?;
    tracing::info!(
        run_id = %ctx.run_id,
        stacks = order.len(),
        dependencies = options.dependencies,
        "deploy run started"
    );

    let params = ParameterResolver::new(&ctx.root, decryptor);
    let mut orchestrator = ChangeSetOrchestrator::new(ctx, api, &params, confirmer, options);
    let mut report = DeployReport::default();
    let mut blocked: BTreeMap<String, String> = BTreeMap::new();

    for record in order {
        if let Some(blocker) = blocked.get(&record.name) {
            println!("Skipping {}: depends on failed stack {}", record.name, blocker);
            tracing::warn!(stack = %record.name, blocked_by = %blocker, "skipped");
            log_skipped(ctx, &record.name, blocker);
            report.outcomes.push((
                record.name.clone(),
                StackOutcome::Skipped {
                    blocked_by: blocker.clone(),
                },
            ));
            continue;
        }

        let outcome = orchestrator.deploy(record);

        if let Some(graph) = &graph {
            if outcome.blocks_dependents() {
                for dependent in graph.dependents_of(&record.name) {
                    blocked
                        .entry(dependent)
                        .or_insert_with(|| record.name.clone());
                }
            }
        }
        let abort = aborts_run(&outcome, &options);
        report.outcomes.push((record.name.clone(), outcome));
        if let Some(reason) = abort {
            tracing::error!(stack = %record.name, "{}, aborting run", reason);
            println!("Aborting: {} ({})", reason, record.name);
            break;
        }
    }

    print_summary(&report);
    tracing::info!(
        run_id = %ctx.run_id,
        errors = report.error_count(),
        seconds = start.elapsed().as_secs_f64(),
        "deploy run finished"
    );
    Ok(report)
}

/// Outcomes that stop the rest of the run.
///
/// A template that cannot be rendered aborts a dependency-ordered run. A
/// stack that ends in a failed terminal state aborts any run that saves
/// outputs.
fn aborts_run(outcome: &StackOutcome, options: &DeployOptions) -> Option<&'static str> {
    match outcome {
        StackOutcome::Failed {
            phase: Phase::Rendering,
            ..
        } if options.dependencies => Some("template cannot be rendered"),
        StackOutcome::Failed {
            phase: Phase::AwaitingCompletion,
            error: StaxError::Execution { .. },
        } if options.save => Some("stack operation failed while saving outputs"),
        _ => None,
    }
}

fn log_skipped(ctx: &RunContext, stack: &str, blocked_by: &str) {
    if !ctx.event_log_enabled() {
        return;
    }
    let event = DeployEvent::Skipped {
        stack: stack.to_string(),
        blocked_by: blocked_by.to_string(),
    };
    if let Err(e) = append_event(&ctx.state_dir(), stack, event) {
        tracing::warn!(stack, error = %e, "could not append to event log");
    }
}

/// One line per stack, then the error count.
pub fn print_summary(report: &DeployReport) {
    if report.outcomes.is_empty() {
        return;
    }
    let width = report
        .outcomes
        .iter()
        .map(|(name, _)| name.len())
        .max()
        .unwrap_or(0);
    println!();
    for (name, outcome) in &report.outcomes {
        match outcome {
            StackOutcome::Failed { phase, error } => {
                println!("  {:<width$}  {} ({}): {}", name, outcome.label(), phase, error)
            }
            StackOutcome::Skipped { blocked_by } => {
                println!("  {:<width$}  {} (blocked by {})", name, outcome.label(), blocked_by)
            }
            _ => println!("  {:<width$}  {}", name, outcome.label()),
        }
    }
    println!(
        "{} stack(s), {} error(s)",
        report.outcomes.len(),
        report.error_count()
    );
}
