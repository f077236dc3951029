//! SX-002: `stax.toml` settings and the per-run context.
//!
//! Settings are looked up by walking from the working directory towards the
//! filesystem root; the directory holding `stax.toml` becomes the config
//! root that stack paths, exports and state are resolved against. Without a
//! file every field takes its default and the start directory is the root.

use super::error::{Result, StaxError};
use super::poll::PollBudget;
use crate::provenance::eventlog::generate_run_id;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SETTINGS_FILE: &str = "stax.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub export: ExportSettings,
    #[serde(default)]
    pub save: SaveSettings,
    #[serde(default)]
    pub deploy: DeploySettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportSettings {
    /// Where `stax export` writes rendered templates
    #[serde(default = "default_yml_path")]
    pub yml_path: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            yml_path: default_yml_path(),
        }
    }
}

fn default_yml_path() -> String {
    "./yml".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SaveSettings {
    /// Prepended to `<name>.out.yaml`; a trailing `/` makes it a subdirectory
    #[serde(default)]
    pub out_file_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeploySettings {
    #[serde(default = "default_change_set_prefix")]
    pub change_set_prefix: String,
    #[serde(default = "default_change_set_interval")]
    pub change_set_poll_interval_secs: u64,
    #[serde(default = "default_change_set_attempts")]
    pub change_set_poll_attempts: u32,
    #[serde(default = "default_stack_interval")]
    pub stack_poll_interval_secs: u64,
    #[serde(default = "default_stack_attempts")]
    pub stack_poll_attempts: u32,
    /// SNS topics notified of stack events
    #[serde(default)]
    pub notification_arns: Vec<String>,
    /// Event logs live under `<root>/<state_dir>/<stack>/`
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    #[serde(default = "default_true")]
    pub event_log: bool,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            change_set_prefix: default_change_set_prefix(),
            change_set_poll_interval_secs: default_change_set_interval(),
            change_set_poll_attempts: default_change_set_attempts(),
            stack_poll_interval_secs: default_stack_interval(),
            stack_poll_attempts: default_stack_attempts(),
            notification_arns: Vec::new(),
            state_dir: default_state_dir(),
            event_log: true,
        }
    }
}

fn default_change_set_prefix() -> String {
    "stax-".to_string()
}
fn default_change_set_interval() -> u64 {
    5
}
fn default_change_set_attempts() -> u32 {
    120
}
fn default_stack_interval() -> u64 {
    10
}
fn default_stack_attempts() -> u32 {
    360
}
fn default_state_dir() -> String {
    ".stax".to_string()
}
fn default_true() -> bool {
    true
}

impl Settings {
    /// Parse a settings document.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| StaxError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load a specific settings file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| StaxError::io(path, e))?;
        Self::parse(&content, path)
    }

    /// Nearest `stax.toml` at or above `start`, with its directory.
    pub fn discover(start: &Path) -> Result<(Self, PathBuf)> {
        for dir in start.ancestors() {
            let candidate = dir.join(SETTINGS_FILE);
            if candidate.is_file() {
                tracing::debug!(path = %candidate.display(), "settings found");
                return Ok((Self::load(&candidate)?, dir.to_path_buf()));
            }
        }
        tracing::debug!(start = %start.display(), "no settings file, using defaults");
        Ok((Self::default(), start.to_path_buf()))
    }
}

/// Everything a run needs that is not a stack definition.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub settings: Settings,
    /// Directory holding `stax.toml`
    pub root: PathBuf,
    pub run_id: String,
}

impl RunContext {
    pub fn new(settings: Settings, root: PathBuf) -> Self {
        Self {
            settings,
            root,
            run_id: generate_run_id(),
        }
    }

    /// Resolve settings from `--config` or by discovery from `cwd`.
    pub fn from_cli(config: Option<&Path>, cwd: &Path) -> Result<Self> {
        let (settings, root) = match config {
            Some(path) => {
                let settings = Settings::load(path)?;
                let root = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| cwd.to_path_buf());
                (settings, root)
            }
            None => Settings::discover(cwd)?,
        };
        Ok(Self::new(settings, root))
    }

    pub fn change_set_budget(&self) -> PollBudget {
        PollBudget::new(
            self.settings.deploy.change_set_poll_attempts,
            Duration::from_secs(self.settings.deploy.change_set_poll_interval_secs),
        )
    }

    pub fn stack_budget(&self) -> PollBudget {
        PollBudget::new(
            self.settings.deploy.stack_poll_attempts,
            Duration::from_secs(self.settings.deploy.stack_poll_interval_secs),
        )
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(&self.settings.deploy.state_dir)
    }

    pub fn export_dir(&self) -> PathBuf {
        self.root.join(&self.settings.export.yml_path)
    }

    pub fn event_log_enabled(&self) -> bool {
        self.settings.deploy.event_log
    }
}
