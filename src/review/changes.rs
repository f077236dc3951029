//! SX-017: Plain-text tables for change sets, stack events and resources.

use crate::remote::{ResourceChange, StackEvent, StackResource};

/// Left-aligned columns separated by two spaces, with a dashed rule under
/// the header.
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let line = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<width$}", c, width = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    out.push_str(&line(headers.to_vec()));
    out.push('\n');
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(&line(rule.iter().map(String::as_str).collect()));
    out.push('\n');
    for row in rows {
        out.push_str(&line(row.iter().map(String::as_str).collect()));
        out.push('\n');
    }
    out
}

fn or_dash(value: Option<&str>) -> String {
    value.filter(|v| !v.is_empty()).unwrap_or("-").to_string()
}

/// One row per changed property; resources without property details get a
/// single row naming their scopes.
pub fn change_table(changes: &[ResourceChange]) -> String {
    let mut rows: Vec<Vec<String>> = Vec::new();
    for c in changes {
        let lead = vec![
            c.action.clone(),
            c.logical_id.clone(),
            c.resource_type.clone(),
            or_dash(c.physical_id.as_deref()),
            or_dash(c.replacement.as_deref()),
        ];
        if c.details.is_empty() {
            let scope = if c.scope.is_empty() {
                "-".to_string()
            } else {
                c.scope.join(",")
            };
            rows.push([lead, vec![scope, "-".to_string()]].concat());
            continue;
        }
        for d in &c.details {
            let property = match d.name.as_deref() {
                Some(name) if !name.is_empty() => format!("{}.{}", d.attribute, name),
                _ => d.attribute.clone(),
            };
            let recreation = match d.requires_recreation.as_deref() {
                Some(r) if d.recreates() => format!("{} (recreate)", r),
                other => or_dash(other),
            };
            rows.push([lead.clone(), vec![property, recreation]].concat());
        }
    }
    render_table(
        &["Action", "LogicalId", "Type", "PhysicalId", "Replace", "Property", "Recreation"],
        &rows,
    )
}

pub fn event_table(events: &[StackEvent]) -> String {
    let rows: Vec<Vec<String>> = events
        .iter()
        .map(|e| {
            vec![
                e.timestamp.clone(),
                e.logical_id.clone(),
                e.resource_type.clone(),
                e.status.clone(),
                or_dash(e.reason.as_deref()),
            ]
        })
        .collect();
    render_table(&["Timestamp", "LogicalId", "Type", "Status", "Reason"], &rows)
}

pub fn resource_table(resources: &[StackResource]) -> String {
    let rows: Vec<Vec<String>> = resources
        .iter()
        .map(|r| {
            vec![
                r.logical_id.clone(),
                r.resource_type.clone(),
                or_dash(r.physical_id.as_deref()),
                r.status.clone(),
            ]
        })
        .collect();
    render_table(&["LogicalId", "Type", "PhysicalId", "Status"], &rows)
}
