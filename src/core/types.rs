//! SX-001: Stack definitions, templates, parameters and run outcomes.
//!
//! Defines the YAML schema for stack files, the opaque template handle the
//! orchestrator works through, and the per-stack outcome/report types.

use super::error::StaxError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Substituted with the stack's config-relative directory.
pub const STACK_PATH_TOKEN: &str = "${STAX::StackPath}";

/// Substituted with the files contributing to the stack definition (tags only).
pub const STACK_FILES_TOKEN: &str = "${STAX::StackFiles}";

// ============================================================================
// Stack files
// ============================================================================

/// Root of a `*.stax.yaml` file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackFile {
    /// Stack definitions keyed by stack name (declaration order preserved)
    #[serde(default)]
    pub stacks: IndexMap<String, StackRecord>,
}

/// One deployable stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackRecord {
    /// Stack name (the key in `stacks:`)
    #[serde(skip)]
    pub name: String,

    /// Credential scope
    pub profile: String,

    /// Deployment region
    pub region: String,

    #[serde(default)]
    pub environment: Option<String>,

    #[serde(default)]
    pub region_code: Option<String>,

    /// Stacks that must be deployed first
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Parameter sources keyed by file path (may contain path tokens)
    #[serde(default)]
    pub overrides: BTreeMap<String, Override>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Apply `tags` to the change set
    #[serde(default = "default_true")]
    pub tags_enabled: bool,

    /// Execution role handed to the Stack API
    #[serde(default)]
    pub role: Option<String>,

    #[serde(default)]
    pub template: Template,

    /// Where this definition was loaded from
    #[serde(skip)]
    pub location: StackLocation,
}

fn default_true() -> bool {
    true
}

/// A file-backed source of parameter values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Override {
    /// Non-empty means the source is encrypted and must be decrypted first
    #[serde(default)]
    pub secret_profile: Option<String>,

    /// Source key -> parameter key. Empty means identity.
    #[serde(default)]
    pub map: BTreeMap<String, String>,
}

impl Override {
    pub fn is_encrypted(&self) -> bool {
        self.secret_profile.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// Origin of a stack definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackLocation {
    /// Absolute directory holding the definition
    pub dir: PathBuf,
    /// Directory relative to the config root ("." at the root)
    pub rel_dir: String,
    /// Files contributing to the definition
    pub files: Vec<PathBuf>,
}

impl StackLocation {
    /// Comma-separated file list, as substituted for `${STAX::StackFiles}`.
    pub fn files_label(&self) -> String {
        self.files
            .iter()
            .map(|f| f.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Identity of a stack on the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StackTarget {
    pub name: String,
    pub profile: String,
    pub region: String,
}

impl StackRecord {
    pub fn target(&self) -> StackTarget {
        StackTarget {
            name: self.name.clone(),
            profile: self.profile.clone(),
            region: self.region.clone(),
        }
    }
}

impl fmt::Display for StackTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.name, self.profile, self.region)
    }
}

// ============================================================================
// Template handle
// ============================================================================

/// Opaque renderable document. Only render, path lookup and parameter names
/// are exposed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Template(serde_yaml_ng::Value);

impl Template {
    pub fn new(value: serde_yaml_ng::Value) -> Self {
        Self(value)
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            serde_yaml_ng::Value::Null => true,
            serde_yaml_ng::Value::Mapping(m) => m.is_empty(),
            _ => false,
        }
    }

    /// Serialize to YAML.
    pub fn render(&self) -> Result<String, String> {
        if self.is_empty() {
            return Err("template is empty".to_string());
        }
        serde_yaml_ng::to_string(&self.0).map_err(|e| format!("YAML serialize error: {}", e))
    }

    /// Walk mapping keys (and sequence indices) along `path`.
    pub fn lookup(&self, path: &[&str]) -> Option<&serde_yaml_ng::Value> {
        let mut current = &self.0;
        for segment in path {
            current = match current {
                serde_yaml_ng::Value::Mapping(m) => m.get(*segment)?,
                serde_yaml_ng::Value::Sequence(s) => s.get(segment.parse::<usize>().ok()?)?,
                serde_yaml_ng::Value::Tagged(t) => match &t.value {
                    serde_yaml_ng::Value::Mapping(m) => m.get(*segment)?,
                    _ => return None,
                },
                _ => return None,
            };
        }
        Some(current)
    }

    /// Dotted-path form of [`Template::lookup`].
    pub fn has_path(&self, dotted: &str) -> bool {
        let segments: Vec<&str> = dotted.split('.').filter(|s| !s.is_empty()).collect();
        !segments.is_empty() && self.lookup(&segments).is_some()
    }

    /// Names declared under `Parameters`, in declaration order.
    pub fn parameter_names(&self) -> Vec<String> {
        match self.lookup(&["Parameters"]) {
            Some(serde_yaml_ng::Value::Mapping(m)) => m
                .keys()
                .filter_map(|k| k.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

// ============================================================================
// Parameters and outputs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterValue {
    Literal(String),
    /// Keep the value currently stored on the stack
    UsePrevious,
}

/// Final parameter mapping for one deploy attempt.
pub type ParameterSet = BTreeMap<String, ParameterValue>;

/// Output key -> output value.
pub type StackOutputs = IndexMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSetType {
    Create,
    Update,
}

impl fmt::Display for ChangeSetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
        }
    }
}

// ============================================================================
// Run options and outcomes
// ============================================================================

/// Flags for a deploy run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeployOptions {
    /// Deploy in dependency order (forces `save`)
    pub dependencies: bool,
    /// Reuse every parameter's stored value
    pub use_previous_values: bool,
    /// Stop after presenting the diff
    pub no_execute: bool,
    /// Execute a change set created by an earlier no-execute run
    pub execute_only: bool,
    /// Persist outputs after a successful deploy
    pub save: bool,
}

/// Change set lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Rendering,
    Validating,
    Describing,
    ResolvingParameters,
    CreatingChangeSet,
    AwaitingChangeSet,
    Inspecting,
    PresentingDiff,
    AwaitingConfirmation,
    Executing,
    AwaitingCompletion,
    SavingOutputs,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Rendering => "rendering",
            Self::Validating => "validating",
            Self::Describing => "describing",
            Self::ResolvingParameters => "resolving-parameters",
            Self::CreatingChangeSet => "creating-change-set",
            Self::AwaitingChangeSet => "awaiting-change-set",
            Self::Inspecting => "inspecting",
            Self::PresentingDiff => "presenting-diff",
            Self::AwaitingConfirmation => "awaiting-confirmation",
            Self::Executing => "executing",
            Self::AwaitingCompletion => "awaiting-completion",
            Self::SavingOutputs => "saving-outputs",
        };
        write!(f, "{}", s)
    }
}

/// How a single stack's deployment ended.
#[derive(Debug)]
pub enum StackOutcome {
    /// Change set executed and the stack reached `status`.
    Deployed { change_set: String, status: String },
    /// Remote stack already matches.
    NoChanges,
    /// A change set with the same name existed; it was deleted and skipped.
    AlreadyCurrent,
    /// No-execute mode: change set left in place for a later execute-only run.
    Previewed { change_set: String },
    /// Operator declined.
    Cancelled,
    /// Not attempted because a dependency failed.
    Skipped { blocked_by: String },
    Failed { phase: Phase, error: StaxError },
}

impl StackOutcome {
    /// Only failures count towards the exit code.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Whether dependents may still proceed.
    pub fn blocks_dependents(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Skipped { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Deployed { .. } => "deployed",
            Self::NoChanges => "no changes",
            Self::AlreadyCurrent => "already current",
            Self::Previewed { .. } => "previewed",
            Self::Cancelled => "cancelled",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "FAILED",
        }
    }
}

/// Result of a whole deploy run, in processing order.
#[derive(Debug, Default)]
pub struct DeployReport {
    pub outcomes: Vec<(String, StackOutcome)>,
}

impl DeployReport {
    pub fn error_count(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_error()).count()
    }

    /// Error count capped at 125.
    pub fn exit_code(&self) -> i32 {
        self.error_count().min(125) as i32
    }

    pub fn outcome(&self, stack: &str) -> Option<&StackOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == stack)
            .map(|(_, o)| o)
    }
}

// ============================================================================
// Provenance events
// ============================================================================

/// Event for the JSONL deployment log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DeployEvent {
    DeployStarted {
        stack: String,
        run_id: String,
        stax_version: String,
    },
    ChangeSetCreated {
        stack: String,
        change_set: String,
        change_set_type: String,
    },
    NoChanges {
        stack: String,
    },
    Cancelled {
        stack: String,
        change_set: String,
    },
    Executed {
        stack: String,
        change_set: String,
    },
    DeployCompleted {
        stack: String,
        run_id: String,
        outcome: String,
        total_seconds: f64,
    },
    DeployFailed {
        stack: String,
        phase: String,
        error: String,
    },
    Skipped {
        stack: String,
        blocked_by: String,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: DeployEvent,
}
