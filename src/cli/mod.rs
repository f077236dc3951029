//! SX-020: CLI subcommands — deploy, delete, diff, save, export, order, status, events, resources.

use crate::core::driver::{self, build_graph, deployment_order};
use crate::core::error::{Result, StaxError};
use crate::core::outputs::{export_template, remove_stack_files, save_outputs};
use crate::core::parser::{ConfigProvider, StackFilter, YamlConfigProvider};
use crate::core::settings::RunContext;
use crate::core::types::{DeployOptions, StackRecord};
use crate::remote::awscli::AwsCliStackApi;
use crate::remote::sops::SopsDecryptor;
use crate::remote::{ApiError, StackApi};
use crate::review::changes::{event_table, render_table, resource_table};
use crate::review::confirm::{Confirmer, StdinConfirmer};
use crate::review::diff::{diff_documents, render};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Flags accepted by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Path to stax.toml (default: searched upwards from the working directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Only stacks with this environment
    #[arg(short, long, global = true)]
    pub environment: Option<String>,

    /// Only stacks with this profile
    #[arg(long, global = true)]
    pub profile: Option<String>,

    /// Only stacks with this region code
    #[arg(short = 'r', long, global = true)]
    pub region_code: Option<String>,

    /// Regex on stack names
    #[arg(long, global = true)]
    pub stacks: Option<String>,

    /// Only stacks whose template has this dotted path (e.g. Parameters)
    #[arg(long, global = true)]
    pub has: Option<String>,

    /// Regex on the config-relative directory to include
    #[arg(long, global = true)]
    pub include: Option<String>,

    /// Regex on the config-relative directory to exclude
    #[arg(long, global = true)]
    pub exclude: Option<String>,

    /// Verbose diagnostic logging
    #[arg(long, global = true)]
    pub debug: bool,
}

impl GlobalArgs {
    pub fn filter(&self) -> Result<StackFilter> {
        Ok(StackFilter {
            environment: self.environment.clone(),
            profile: self.profile.clone(),
            region_code: self.region_code.clone(),
            stacks: StackFilter::pattern("stacks", self.stacks.as_deref())?,
            has: self.has.clone(),
            include: StackFilter::pattern("include", self.include.as_deref())?,
            exclude: StackFilter::pattern("exclude", self.exclude.as_deref())?,
        })
    }
}

/// Directories to search for stack files.
#[derive(Args, Debug, Clone)]
pub struct ScopeArgs {
    #[arg(default_value = ".")]
    pub paths: Vec<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create, review and execute change sets
    Deploy {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Deploy in dependency order (implies --save)
        #[arg(short, long)]
        dependencies: bool,

        /// Keep every parameter's currently stored value
        #[arg(short = 'v', long)]
        previous_values: bool,

        /// Save stack outputs after deploying
        #[arg(short, long)]
        save: bool,

        /// Stop after showing the change set; leave it for --execute-only
        #[arg(long, conflicts_with = "execute_only")]
        no_execute: bool,

        /// Execute the change set left by an earlier --no-execute run
        #[arg(long)]
        execute_only: bool,
    },

    /// Delete stacks along with their outputs and exported templates
    Delete {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Structural diff of rendered templates against deployed ones
    Diff {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Fetch and persist stack outputs
    Save {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Write rendered templates under the export directory
    Export {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Print the dependency-resolved deployment order
    Order {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Show remote stack status
    Status {
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Show recent stack events
    Events {
        #[command(flatten)]
        scope: ScopeArgs,

        /// Events per stack
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// List stack resources
    Resources {
        #[command(flatten)]
        scope: ScopeArgs,
    },
}

/// Dispatch a CLI command. Returns the process exit code.
pub fn dispatch(global: &GlobalArgs, cmd: Commands) -> Result<i32> {
    let cwd = std::env::current_dir().map_err(|e| StaxError::io(".", e))?;
    let ctx = RunContext::from_cli(global.config.as_deref(), &cwd)?;
    let provider = YamlConfigProvider::new(&ctx.root, global.filter()?);
    let api = AwsCliStackApi::default();
    tracing::debug!(root = %ctx.root.display(), run_id = %ctx.run_id, "context ready");

    match cmd {
        Commands::Deploy {
            scope,
            dependencies,
            previous_values,
            save,
            no_execute,
            execute_only,
        } => {
            let options = DeployOptions {
                dependencies,
                use_previous_values: previous_values,
                no_execute,
                execute_only,
                save,
            };
            let report = driver::deploy_all(
                &ctx,
                &provider,
                &api,
                &SopsDecryptor::default(),
                &mut StdinConfirmer,
                &scope_paths(&cwd, &scope),
                options,
            )?;
            Ok(report.exit_code())
        }
        Commands::Delete { scope } => cmd_delete(
            &ctx,
            &provider,
            &api,
            &mut StdinConfirmer,
            &scope_paths(&cwd, &scope),
        ),
        Commands::Diff { scope } => cmd_diff(&provider, &api, &scope_paths(&cwd, &scope)),
        Commands::Save { scope } => cmd_save(&ctx, &provider, &api, &scope_paths(&cwd, &scope)),
        Commands::Export { scope } => cmd_export(&ctx, &provider, &scope_paths(&cwd, &scope)),
        Commands::Order { scope } => cmd_order(&provider, &scope_paths(&cwd, &scope)),
        Commands::Status { scope } => cmd_status(&provider, &api, &scope_paths(&cwd, &scope)),
        Commands::Events { scope, limit } => {
            cmd_events(&provider, &api, &scope_paths(&cwd, &scope), limit)
        }
        Commands::Resources { scope } => {
            cmd_resources(&provider, &api, &scope_paths(&cwd, &scope))
        }
    }
}

/// Scope paths are given relative to the working directory.
fn scope_paths(cwd: &Path, scope: &ScopeArgs) -> Vec<PathBuf> {
    scope.paths.iter().map(|p| cwd.join(p)).collect()
}

/// Per-stack failure: reported, counted, never fatal.
fn report_error(stack: &str, error: &dyn std::fmt::Display, errors: &mut usize) {
    eprintln!("  ERROR: {}: {}", stack, error);
    *errors += 1;
}

fn exit_code(errors: usize) -> i32 {
    errors.min(125) as i32
}

fn render_record(record: &StackRecord) -> Result<String> {
    record.template.render().map_err(|reason| StaxError::Render {
        stack: record.name.clone(),
        reason,
    })
}

/// Each stack is deleted only when the operator types its exact name back.
fn cmd_delete(
    ctx: &RunContext,
    provider: &dyn ConfigProvider,
    api: &dyn StackApi,
    confirmer: &mut dyn Confirmer,
    scope: &[PathBuf],
) -> Result<i32> {
    let export_dir = ctx.export_dir();
    let mut errors = 0;
    for record in provider.stacks(scope)? {
        println!("You are about to DELETE {}", record.target());
        let answer = confirmer
            .ask("Enter the name of the stack to confirm:")
            .map_err(|e| StaxError::io("<stdin>", e))?;
        if answer.trim() != record.name {
            println!("  not confirmed; {} kept", record.name);
            continue;
        }

        tracing::info!(stack = %record.name, "deleting stack");
        if let Err(e) = api.delete_stack(&record.target()) {
            report_error(&record.name, &StaxError::api(&record.name, "DeleteStack", e), &mut errors);
            continue;
        }
        println!("  deleting {}", record.name);
        match remove_stack_files(&record, &ctx.settings.save.out_file_prefix, &export_dir) {
            Ok(removed) => {
                for path in removed {
                    println!("  removed {}", path.display());
                }
            }
            Err(e) => report_error(&record.name, &e, &mut errors),
        }
    }
    Ok(exit_code(errors))
}

fn cmd_diff(provider: &dyn ConfigProvider, api: &dyn StackApi, scope: &[PathBuf]) -> Result<i32> {
    let mut errors = 0;
    for record in provider.stacks(scope)? {
        println!("{}:", record.target());
        let rendered = match render_record(&record) {
            Ok(r) => r,
            Err(e) => {
                report_error(&record.name, &e, &mut errors);
                continue;
            }
        };
        let previous = match api.get_template(&record.target()) {
            Ok(t) => t,
            Err(ApiError::NotFound(_)) => {
                println!("  not deployed; every resource is new");
                continue;
            }
            Err(e) => {
                report_error(&record.name, &StaxError::api(&record.name, "GetTemplate", e), &mut errors);
                continue;
            }
        };
        match diff_documents(&previous, &rendered) {
            Ok(entries) if entries.is_empty() => println!("  no differences"),
            Ok(entries) => print!("{}", render(&entries)),
            Err(e) => report_error(&record.name, &e, &mut errors),
        }
    }
    Ok(exit_code(errors))
}

fn cmd_save(
    ctx: &RunContext,
    provider: &dyn ConfigProvider,
    api: &dyn StackApi,
    scope: &[PathBuf],
) -> Result<i32> {
    let mut errors = 0;
    for record in provider.stacks(scope)? {
        let stack = match api.describe_stack(&record.target()) {
            Ok(Some(s)) => s,
            Ok(None) => {
                println!("{}: not deployed", record.name);
                continue;
            }
            Err(e) => {
                report_error(&record.name, &StaxError::api(&record.name, "DescribeStacks", e), &mut errors);
                continue;
            }
        };
        match save_outputs(&record, &ctx.settings.save.out_file_prefix, &stack.outputs) {
            Ok(Some(path)) => println!("{}: saved {}", record.name, path.display()),
            Ok(None) => println!("{}: no outputs", record.name),
            Err(e) => report_error(&record.name, &e, &mut errors),
        }
    }
    Ok(exit_code(errors))
}

fn cmd_export(ctx: &RunContext, provider: &dyn ConfigProvider, scope: &[PathBuf]) -> Result<i32> {
    let export_dir = ctx.export_dir();
    let mut errors = 0;
    for record in provider.stacks(scope)? {
        let written = render_record(&record)
            .and_then(|rendered| export_template(&export_dir, &record, &rendered));
        match written {
            Ok(path) => println!("{}: {}", record.name, path.display()),
            Err(e) => report_error(&record.name, &e, &mut errors),
        }
    }
    Ok(exit_code(errors))
}

fn cmd_order(provider: &dyn ConfigProvider, scope: &[PathBuf]) -> Result<i32> {
    let records = provider.stacks(scope)?;
    let graph = build_graph(&records);
    let order = deployment_order(&records, Some(&graph))?;
    for (i, record) in order.iter().enumerate() {
        if record.depends_on.is_empty() {
            println!("{:>3}. {}", i + 1, record.name);
        } else {
            println!(
                "{:>3}. {} (after {})",
                i + 1,
                record.name,
                record.depends_on.join(", ")
            );
        }
    }
    Ok(0)
}

fn cmd_status(provider: &dyn ConfigProvider, api: &dyn StackApi, scope: &[PathBuf]) -> Result<i32> {
    let mut errors = 0;
    let mut rows = Vec::new();
    for record in provider.stacks(scope)? {
        match api.describe_stack(&record.target()) {
            Ok(Some(s)) => rows.push(vec![
                record.name.clone(),
                record.region.clone(),
                s.status,
                s.status_reason.unwrap_or_default(),
            ]),
            Ok(None) => rows.push(vec![
                record.name.clone(),
                record.region.clone(),
                "NOT_DEPLOYED".to_string(),
                String::new(),
            ]),
            Err(e) => {
                report_error(&record.name, &StaxError::api(&record.name, "DescribeStacks", e), &mut errors)
            }
        }
    }
    print!("{}", render_table(&["Stack", "Region", "Status", "Reason"], &rows));
    Ok(exit_code(errors))
}

fn cmd_events(
    provider: &dyn ConfigProvider,
    api: &dyn StackApi,
    scope: &[PathBuf],
    limit: usize,
) -> Result<i32> {
    let mut errors = 0;
    for record in provider.stacks(scope)? {
        println!("{}:", record.target());
        match api.describe_stack_events(&record.target()) {
            Ok(events) => {
                let recent: Vec<_> = events.into_iter().take(limit).collect();
                print!("{}", event_table(&recent));
            }
            Err(e) => report_error(
                &record.name,
                &StaxError::api(&record.name, "DescribeStackEvents", e),
                &mut errors,
            ),
        }
    }
    Ok(exit_code(errors))
}

fn cmd_resources(
    provider: &dyn ConfigProvider,
    api: &dyn StackApi,
    scope: &[PathBuf],
) -> Result<i32> {
    let mut errors = 0;
    for record in provider.stacks(scope)? {
        println!("{}:", record.target());
        match api.describe_stack_resources(&record.target()) {
            Ok(resources) => print!("{}", resource_table(&resources)),
            Err(e) => report_error(
                &record.name,
                &StaxError::api(&record.name, "DescribeStackResources", e),
                &mut errors,
            ),
        }
    }
    Ok(exit_code(errors))
}
