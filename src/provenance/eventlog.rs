//! SX-015: Append-only JSONL deployment event log.

use crate::core::error::{Result, StaxError};
use crate::core::types::{DeployEvent, TimestampedEvent};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Current UTC time as ISO 8601 with second precision.
pub fn now_iso8601() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

/// Short run identifier derived from the wall clock.
pub fn generate_run_id() -> String {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default() as u64;
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

pub fn event_log_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("events.jsonl")
}

/// Append an event to the stack's event log.
pub fn append_event(state_dir: &Path, stack: &str, event: DeployEvent) -> Result<()> {
    let path = event_log_path(state_dir, stack);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StaxError::io(parent, e))?;
    }

    let te = TimestampedEvent {
        ts: now_iso8601(),
        event,
    };
    let json = serde_json::to_string(&te).map_err(|e| StaxError::Parse {
        path: path.clone(),
        reason: e.to_string(),
    })?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| StaxError::io(&path, e))?;
    writeln!(file, "{}", json).map_err(|e| StaxError::io(&path, e))?;
    Ok(())
}

/// Read back every event; a missing log is empty.
pub fn read_events(state_dir: &Path, stack: &str) -> Result<Vec<TimestampedEvent>> {
    let path = event_log_path(state_dir, stack);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path).map_err(|e| StaxError::io(&path, e))?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| StaxError::Parse {
                path: path.clone(),
                reason: format!("line {}: {}", i + 1, e),
            })
        })
        .collect()
}
