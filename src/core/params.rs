//! SX-004: Parameter resolution.
//!
//! Produces the final parameter mapping for one deploy attempt from the
//! template's declared parameters and the stack's override files. All file
//! access and decryption happen here, before any remote call is made.

use super::error::{Result, StaxError};
use super::types::{Override, ParameterSet, ParameterValue, StackRecord, STACK_PATH_TOKEN};
use crate::remote::sops::SecretDecryptor;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Key/value pairs read from one override file.
pub type SourceValues = BTreeMap<String, String>;

pub struct ParameterResolver<'a> {
    root: PathBuf,
    decryptor: &'a dyn SecretDecryptor,
}

impl<'a> ParameterResolver<'a> {
    pub fn new(root: impl Into<PathBuf>, decryptor: &'a dyn SecretDecryptor) -> Self {
        Self {
            root: root.into(),
            decryptor,
        }
    }

    /// Resolve the parameter set for `record`.
    pub fn resolve(&self, record: &StackRecord, use_previous: bool) -> Result<ParameterSet> {
        let declared = record.template.parameter_names();
        if declared.is_empty() {
            return Ok(ParameterSet::new());
        }

        if use_previous {
            tracing::debug!(stack = %record.name, count = declared.len(), "reusing previous values");
            return Ok(declared
                .into_iter()
                .map(|name| (name, ParameterValue::UsePrevious))
                .collect());
        }

        if record.overrides.is_empty() {
            return Err(StaxError::params(
                &record.name,
                "template declares parameters but no overrides supplied",
            ));
        }

        let mut sources: Vec<(PathBuf, &Override)> = record
            .overrides
            .iter()
            .map(|(path, ov)| (self.source_path(record, path), ov))
            .collect();
        sources.sort_by(|a, b| a.0.cmp(&b.0));

        let mut params = ParameterSet::new();
        for (path, ov) in sources {
            let values = self.read_source(record, &path, ov)?;
            merge(&record.name, &path, ov, values, &mut params)?;
        }

        for key in params.keys() {
            if !declared.contains(key) {
                tracing::warn!(stack = %record.name, parameter = %key, "parameter not declared by template");
            }
        }
        Ok(params)
    }

    fn source_path(&self, record: &StackRecord, raw: &str) -> PathBuf {
        let substituted = raw.replace(STACK_PATH_TOKEN, &record.location.rel_dir);
        let joined = self.root.join(substituted);
        joined.components().collect()
    }

    fn read_source(&self, record: &StackRecord, path: &Path, ov: &Override) -> Result<SourceValues> {
        let content = match ov.secret_profile.as_deref() {
            Some(profile) if ov.is_encrypted() => {
                tracing::debug!(stack = %record.name, path = %path.display(), "decrypting override");
                self.decryptor
                    .decrypt(path, profile)
                    .map_err(|e| StaxError::params(&record.name, e))?
            }
            _ => std::fs::read_to_string(path).map_err(|e| {
                StaxError::params(&record.name, format!("cannot read {}: {}", path.display(), e))
            })?,
        };
        parse_values(path, &content).map_err(|e| {
            StaxError::params(&record.name, format!("cannot parse {}: {}", path.display(), e))
        })
    }
}

fn merge(
    stack: &str,
    path: &Path,
    ov: &Override,
    values: SourceValues,
    params: &mut ParameterSet,
) -> Result<()> {
    if ov.map.is_empty() {
        for (k, v) in values {
            params.insert(k, ParameterValue::Literal(v));
        }
        return Ok(());
    }
    for (from, to) in &ov.map {
        let value = values.get(from).ok_or_else(|| {
            StaxError::params(
                stack,
                format!("mapped key '{}' not found in {}", from, path.display()),
            )
        })?;
        params.insert(to.clone(), ParameterValue::Literal(value.clone()));
    }
    Ok(())
}

/// Parse key/values by file extension: `.yaml`/`.yml` and `.json` as flat
/// mappings, anything else as dotenv lines.
pub fn parse_values(path: &Path, content: &str) -> std::result::Result<SourceValues, String> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => {
            let value: serde_yaml_ng::Value =
                serde_yaml_ng::from_str(content).map_err(|e| e.to_string())?;
            match value {
                serde_yaml_ng::Value::Null => Ok(SourceValues::new()),
                serde_yaml_ng::Value::Mapping(m) => m
                    .into_iter()
                    .map(|(k, v)| -> std::result::Result<(String, String), String> {
                        let key = k.as_str().ok_or("non-string key")?.to_string();
                        Ok((key.clone(), yaml_scalar(&key, &v)?))
                    })
                    .collect(),
                _ => Err("expected a mapping".to_string()),
            }
        }
        Some("json") => {
            let value: serde_json::Value =
                serde_json::from_str(content).map_err(|e| e.to_string())?;
            let object = value.as_object().ok_or("expected an object")?;
            object
                .iter()
                .map(|(k, v)| Ok((k.clone(), json_scalar(k, v)?)))
                .collect::<std::result::Result<SourceValues, String>>()
        }
        _ => dotenvy::from_read_iter(content.as_bytes())
            .map(|item| item.map_err(|e| e.to_string()))
            .collect(),
    }
}

fn yaml_scalar(key: &str, value: &serde_yaml_ng::Value) -> std::result::Result<String, String> {
    match value {
        serde_yaml_ng::Value::String(s) => Ok(s.clone()),
        serde_yaml_ng::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml_ng::Value::Number(n) => Ok(n.to_string()),
        serde_yaml_ng::Value::Null => Ok(String::new()),
        // CommaDelimitedList parameters
        serde_yaml_ng::Value::Sequence(items) => items
            .iter()
            .map(|i| yaml_scalar(key, i))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(|v| v.join(",")),
        _ => Err(format!("value of '{}' is not a scalar", key)),
    }
}

fn json_scalar(key: &str, value: &serde_json::Value) -> std::result::Result<String, String> {
    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|i| json_scalar(key, i))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(|v| v.join(",")),
        serde_json::Value::Object(_) => Err(format!("value of '{}' is not a scalar", key)),
    }
}
