//! SX-013: Output files and template export, written atomically.

use super::error::{Result, StaxError};
use super::types::{StackOutputs, StackRecord};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// On-disk shape of `<name>.out.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputsFile {
    pub outputs: IndexMap<String, StackOutputs>,
}

/// `<stack dir>/<prefix><name>.out.yaml`. A prefix ending in `/` names a
/// subdirectory.
pub fn output_file_path(record: &StackRecord, prefix: &str) -> PathBuf {
    record
        .location
        .dir
        .join(format!("{}{}.out.yaml", prefix, record.name))
}

/// `<export dir>/<rel dir>/<name>.yml`.
pub fn export_file_path(export_dir: &Path, record: &StackRecord) -> PathBuf {
    let dir = export_dir.join(&record.location.rel_dir);
    let dir: PathBuf = dir.components().collect();
    dir.join(format!("{}.yml", record.name))
}

/// Write `content` via a sibling temp file and rename.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StaxError::io(parent, e))?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, content).map_err(|e| StaxError::io(&tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| StaxError::io(path, e))?;
    Ok(())
}

/// Persist a stack's outputs. Returns the written path, or `None` when the
/// stack has no outputs.
pub fn save_outputs(
    record: &StackRecord,
    prefix: &str,
    outputs: &StackOutputs,
) -> Result<Option<PathBuf>> {
    if outputs.is_empty() {
        tracing::info!(stack = %record.name, "no outputs to save");
        return Ok(None);
    }

    let path = output_file_path(record, prefix);
    let mut file = OutputsFile::default();
    file.outputs.insert(record.name.clone(), outputs.clone());
    let yaml = serde_yaml_ng::to_string(&file).map_err(|e| StaxError::Parse {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    write_atomic(&path, &yaml)?;
    tracing::debug!(stack = %record.name, path = %path.display(), "outputs saved");
    Ok(Some(path))
}

/// Write a rendered template under the export directory.
pub fn export_template(export_dir: &Path, record: &StackRecord, rendered: &str) -> Result<PathBuf> {
    let path = export_file_path(export_dir, record);
    write_atomic(&path, rendered)?;
    Ok(path)
}

/// Remove a deleted stack's outputs file and exported template. Returns the
/// paths that existed and were removed.
pub fn remove_stack_files(
    record: &StackRecord,
    prefix: &str,
    export_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for path in [
        output_file_path(record, prefix),
        export_file_path(export_dir, record),
    ] {
        match std::fs::remove_file(&path) {
            Ok(()) => removed.push(path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StaxError::io(&path, e)),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_outputs(path: &Path) -> Option<OutputsFile> {
        let content = std::fs::read_to_string(path).ok()?;
        Some(serde_yaml_ng::from_str(&content).unwrap())
    }

    fn record(dir: &Path) -> StackRecord {
        let mut r: StackRecord = crate::core::parser::parse_stacks(
            "stacks:\n  net-vpc:\n    profile: net\n    region: us-west-2\n",
        )
        .unwrap()
        .stacks
        .into_values()
        .next()
        .unwrap();
        r.location.dir = dir.to_path_buf();
        r.location.rel_dir = "net".into();
        r
    }

    fn outputs() -> StackOutputs {
        let mut o = StackOutputs::new();
        o.insert("VpcId".into(), "vpc-123".into());
        o.insert("CidrBlock".into(), "10.0.0.0/16".into());
        o
    }

    #[test]
    fn test_sx013_output_path() {
        let r = record(Path::new("/cfg/net"));
        assert_eq!(
            output_file_path(&r, ""),
            PathBuf::from("/cfg/net/net-vpc.out.yaml")
        );
        assert_eq!(
            output_file_path(&r, "outputs/"),
            PathBuf::from("/cfg/net/outputs/net-vpc.out.yaml")
        );
        assert_eq!(
            output_file_path(&r, "prod-"),
            PathBuf::from("/cfg/net/prod-net-vpc.out.yaml")
        );
    }

    #[test]
    fn test_sx013_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let r = record(dir.path());
        let path = save_outputs(&r, "", &outputs()).unwrap().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("outputs:\n  net-vpc:\n    VpcId: vpc-123\n"));

        let loaded = load_outputs(&path).unwrap();
        assert_eq!(loaded.outputs["net-vpc"], outputs());
        assert!(!dir.path().join("net-vpc.out.yaml.tmp").exists());
    }

    #[test]
    fn test_sx013_prefix_directory_created() {
        let dir = tempfile::tempdir().unwrap();
        let r = record(dir.path());
        let path = save_outputs(&r, "outputs/", &outputs()).unwrap().unwrap();
        assert_eq!(path, dir.path().join("outputs/net-vpc.out.yaml"));
        assert!(path.exists());
    }

    #[test]
    fn test_sx013_empty_outputs_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let r = record(dir.path());
        assert!(save_outputs(&r, "", &StackOutputs::new()).unwrap().is_none());
        assert!(!output_file_path(&r, "").exists());
    }

    #[test]
    fn test_sx013_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let r = record(dir.path());
        save_outputs(&r, "", &outputs()).unwrap();
        let mut changed = StackOutputs::new();
        changed.insert("VpcId".into(), "vpc-456".into());
        let path = save_outputs(&r, "", &changed).unwrap().unwrap();
        let loaded = load_outputs(&path).unwrap();
        assert_eq!(loaded.outputs["net-vpc"].len(), 1);
        assert_eq!(loaded.outputs["net-vpc"]["VpcId"], "vpc-456");
    }

    #[test]
    fn test_sx013_remove_stack_files() {
        let dir = tempfile::tempdir().unwrap();
        let r = record(dir.path());
        let export_dir = dir.path().join("yml");
        let outputs_path = save_outputs(&r, "", &outputs()).unwrap().unwrap();
        let export_path = export_template(&export_dir, &r, "Resources: {}\n").unwrap();

        let removed = remove_stack_files(&r, "", &export_dir).unwrap();
        assert_eq!(removed, vec![outputs_path.clone(), export_path.clone()]);
        assert!(!outputs_path.exists());
        assert!(!export_path.exists());

        // nothing left to remove
        assert!(remove_stack_files(&r, "", &export_dir).unwrap().is_empty());
    }

    #[test]
    fn test_sx013_export_template() {
        let dir = tempfile::tempdir().unwrap();
        let r = record(Path::new("/unused"));
        let path = export_template(&dir.path().join("./yml"), &r, "Resources: {}\n").unwrap();
        assert_eq!(path, dir.path().join("yml/net/net-vpc.yml"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "Resources: {}\n");
    }
}
