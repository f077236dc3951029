//! SX-006: Stack definition discovery, parsing and validation.
//!
//! Finds `*.stax.yaml` / `*.stax.yml` files under each scope path, parses
//! them, applies the CLI filters and validates structural constraints:
//! - Stack names are non-empty and unique across files
//! - `profile` and `region` are non-empty
//! - A stack does not depend on itself

use super::error::{Result, StaxError};
use super::types::{StackFile, StackLocation, StackRecord};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const STACK_FILE_SUFFIXES: [&str; 2] = ["stax.yaml", "stax.yml"];

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Source of stack records for a run.
pub trait ConfigProvider {
    /// Every admitted record under `scope`, files sorted by path and stacks
    /// in declaration order.
    fn stacks(&self, scope: &[PathBuf]) -> Result<Vec<StackRecord>>;
}

/// Record filters from the command line. Unset fields admit everything.
#[derive(Debug, Clone, Default)]
pub struct StackFilter {
    pub environment: Option<String>,
    pub profile: Option<String>,
    pub region_code: Option<String>,
    /// Matched against the stack name
    pub stacks: Option<Regex>,
    /// Dotted path that must exist in the template
    pub has: Option<String>,
    /// Matched against the config-relative directory
    pub include: Option<Regex>,
    pub exclude: Option<Regex>,
}

impl StackFilter {
    /// Compile a regex flag value into a config error on failure.
    pub fn pattern(flag: &str, value: Option<&str>) -> Result<Option<Regex>> {
        value
            .map(|v| {
                Regex::new(v).map_err(|e| StaxError::Config(format!("invalid --{} regex: {}", flag, e)))
            })
            .transpose()
    }

    pub fn admits_dir(&self, rel_dir: &str) -> bool {
        if let Some(re) = &self.include {
            if !re.is_match(rel_dir) {
                return false;
            }
        }
        if let Some(re) = &self.exclude {
            if re.is_match(rel_dir) {
                return false;
            }
        }
        true
    }

    pub fn admits(&self, record: &StackRecord) -> bool {
        if let Some(env) = &self.environment {
            if record.environment.as_deref() != Some(env.as_str()) {
                return false;
            }
        }
        if let Some(profile) = &self.profile {
            if &record.profile != profile {
                return false;
            }
        }
        if let Some(code) = &self.region_code {
            if record.region_code.as_deref() != Some(code.as_str()) {
                return false;
            }
        }
        if let Some(re) = &self.stacks {
            if !re.is_match(&record.name) {
                return false;
            }
        }
        if let Some(path) = &self.has {
            if !record.template.has_path(path) {
                return false;
            }
        }
        true
    }
}

/// Parse a stack file from disk.
pub fn parse_stack_file(path: &Path) -> Result<StackFile> {
    let content = std::fs::read_to_string(path).map_err(|e| StaxError::io(path, e))?;
    parse_stacks(&content).map_err(|reason| StaxError::Parse {
        path: path.to_path_buf(),
        reason,
    })
}

/// Parse a stack file from a string.
pub fn parse_stacks(yaml: &str) -> std::result::Result<StackFile, String> {
    let mut file: StackFile =
        serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))?;
    for (name, record) in file.stacks.iter_mut() {
        record.name = name.clone();
    }
    Ok(file)
}

/// Validate records collected for one run. Returns a list of errors (empty = valid).
pub fn validate_stacks(records: &[StackRecord]) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut seen: BTreeMap<&str, &StackLocation> = BTreeMap::new();

    for record in records {
        if record.name.trim().is_empty() {
            errors.push(ValidationError {
                message: format!("stack in {} has an empty name", record.location.rel_dir),
            });
        }
        if record.profile.trim().is_empty() {
            errors.push(ValidationError {
                message: format!("stack '{}' has no profile", record.name),
            });
        }
        if record.region.trim().is_empty() {
            errors.push(ValidationError {
                message: format!("stack '{}' has no region", record.name),
            });
        }
        if record.depends_on.iter().any(|d| d == &record.name) {
            errors.push(ValidationError {
                message: format!("stack '{}' depends on itself", record.name),
            });
        }
        if let Some(first) = seen.insert(&record.name, &record.location) {
            errors.push(ValidationError {
                message: format!(
                    "stack '{}' is defined in both {} and {}",
                    record.name,
                    first.files_label(),
                    record.location.files_label()
                ),
            });
        }
    }

    errors
}

/// Stack files under `scope`, sorted and deduplicated.
pub fn discover_files(scope: &Path) -> Result<Vec<PathBuf>> {
    if scope.is_file() {
        return Ok(vec![scope.to_path_buf()]);
    }
    if !scope.is_dir() {
        return Err(StaxError::Config(format!(
            "scope path {} does not exist",
            scope.display()
        )));
    }

    let base = glob::Pattern::escape(&scope.to_string_lossy());
    let mut files = Vec::new();
    for suffix in STACK_FILE_SUFFIXES {
        let pattern = format!("{}/**/*.{}", base, suffix);
        let entries =
            glob::glob(&pattern).map_err(|e| StaxError::Config(format!("bad glob {}: {}", pattern, e)))?;
        for entry in entries {
            let path = entry.map_err(|e| StaxError::io(e.path().to_path_buf(), e.into_error()))?;
            files.push(path);
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// Directory of `file` relative to `root`; `.` at the root itself.
pub fn relative_dir(root: &Path, file: &Path) -> String {
    let dir = file.parent().unwrap_or(Path::new(""));
    match dir.strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
        Err(_) => dir.to_string_lossy().to_string(),
    }
}

/// Stack files on disk, relative to the config root.
pub struct YamlConfigProvider {
    root: PathBuf,
    filter: StackFilter,
}

impl YamlConfigProvider {
    pub fn new(root: impl Into<PathBuf>, filter: StackFilter) -> Self {
        Self {
            root: root.into(),
            filter,
        }
    }

    fn load_file(&self, file: &Path) -> Result<Vec<StackRecord>> {
        let rel_dir = relative_dir(&self.root, file);
        if !self.filter.admits_dir(&rel_dir) {
            tracing::debug!(file = %file.display(), "directory filtered out");
            return Ok(Vec::new());
        }

        let parsed = parse_stack_file(file)?;
        let location = StackLocation {
            dir: file.parent().map(Path::to_path_buf).unwrap_or_default(),
            rel_dir,
            files: vec![file
                .strip_prefix(&self.root)
                .unwrap_or(file)
                .to_path_buf()],
        };

        Ok(parsed
            .stacks
            .into_values()
            .map(|mut record| {
                record.location = location.clone();
                record
            })
            .filter(|record| self.filter.admits(record))
            .collect())
    }
}

impl ConfigProvider for YamlConfigProvider {
    fn stacks(&self, scope: &[PathBuf]) -> Result<Vec<StackRecord>> {
        let mut files = Vec::new();
        for path in scope {
            // collecting components drops interior `.` segments
            let path: PathBuf = self.root.join(path).components().collect();
            files.extend(discover_files(&path)?);
        }
        files.sort();
        files.dedup();
        tracing::debug!(count = files.len(), "stack files discovered");

        let mut records = Vec::new();
        for file in &files {
            records.extend(self.load_file(file)?);
        }

        let errors = validate_stacks(&records);
        if !errors.is_empty() {
            let joined: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return Err(StaxError::Config(joined.join("; ")));
        }
        Ok(records)
    }
}
