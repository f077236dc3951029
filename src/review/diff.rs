//! SX-016: Structural diff between the deployed and the rendered template.
//!
//! Walks both documents in parallel and reports added, removed and changed
//! paths instead of a plain text diff, so reordering keys does not show up
//! as a change. Multi-line string values (inline code, policies) get a line
//! diff of their own.

use serde_yaml_ng::Value;
use similar::{ChangeTag, TextDiff};
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffChange {
    Added(String),
    Removed(String),
    Changed { old: String, new: String },
}

/// One differing path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    /// Dotted path; sequence indices appear as `[n]`
    pub path: String,
    pub change: DiffChange,
}

/// Compare two YAML documents.
pub fn diff_documents(old: &str, new: &str) -> Result<Vec<DiffEntry>, String> {
    let old: Value = serde_yaml_ng::from_str(old).map_err(|e| format!("previous template: {}", e))?;
    let new: Value = serde_yaml_ng::from_str(new).map_err(|e| format!("new template: {}", e))?;
    let mut out = Vec::new();
    walk(&mut Vec::new(), &old, &new, &mut out);
    Ok(out)
}

fn key_label(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => render_value(other),
    }
}

fn join(path: &[String]) -> String {
    let mut out = String::new();
    for segment in path {
        if segment.starts_with('[') || out.is_empty() {
            out.push_str(segment);
        } else {
            out.push('.');
            out.push_str(segment);
        }
    }
    if out.is_empty() {
        out.push('.');
    }
    out
}

fn walk(path: &mut Vec<String>, old: &Value, new: &Value, out: &mut Vec<DiffEntry>) {
    match (old, new) {
        (Value::Mapping(a), Value::Mapping(b)) => {
            for (k, v) in a {
                path.push(key_label(k));
                match b.get(k) {
                    Some(nv) => walk(path, v, nv, out),
                    None => out.push(DiffEntry {
                        path: join(path),
                        change: DiffChange::Removed(render_value(v)),
                    }),
                }
                path.pop();
            }
            for (k, v) in b {
                if !a.contains_key(k) {
                    path.push(key_label(k));
                    out.push(DiffEntry {
                        path: join(path),
                        change: DiffChange::Added(render_value(v)),
                    });
                    path.pop();
                }
            }
        }
        (Value::Sequence(a), Value::Sequence(b)) if a.len() == b.len() => {
            for (i, (ov, nv)) in a.iter().zip(b).enumerate() {
                path.push(format!("[{}]", i));
                walk(path, ov, nv, out);
                path.pop();
            }
        }
        (Value::Tagged(a), Value::Tagged(b)) if a.tag == b.tag => walk(path, &a.value, &b.value, out),
        _ if old == new => {}
        _ => out.push(DiffEntry {
            path: join(path),
            change: DiffChange::Changed {
                old: render_value(old),
                new: render_value(new),
            },
        }),
    }
}

/// Compact YAML rendering of a value.
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => serde_yaml_ng::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_else(|_| format!("{:?}", other)),
    }
}

/// Human-readable listing, one entry per path.
pub fn render(entries: &[DiffEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        match &entry.change {
            DiffChange::Added(v) => push_block(&mut out, '+', &entry.path, v),
            DiffChange::Removed(v) => push_block(&mut out, '-', &entry.path, v),
            DiffChange::Changed { old, new } if old.contains('\n') || new.contains('\n') => {
                let _ = writeln!(out, "~ {}:", entry.path);
                for change in TextDiff::from_lines(old.as_str(), new.as_str()).iter_all_changes() {
                    let sign = match change.tag() {
                        ChangeTag::Delete => '-',
                        ChangeTag::Insert => '+',
                        ChangeTag::Equal => ' ',
                    };
                    let _ = writeln!(out, "    {}{}", sign, change.value().trim_end_matches('\n'));
                }
            }
            DiffChange::Changed { old, new } => {
                let _ = writeln!(out, "~ {}: {} => {}", entry.path, old, new);
            }
        }
    }
    out
}

fn push_block(out: &mut String, sign: char, path: &str, value: &str) {
    if value.contains('\n') {
        let _ = writeln!(out, "{} {}:", sign, path);
        for line in value.lines() {
            let _ = writeln!(out, "    {}", line);
        }
    } else {
        let _ = writeln!(out, "{} {}: {}", sign, path, value);
    }
}
