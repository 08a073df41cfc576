//! Formatting helpers

use itertools::Itertools;

use crate::{CubeReport, FieldReport};

/// Render the first `max` bytes of a value as spaced hex, with an
/// ellipsis when the value is longer
pub fn hex_preview(value: &[u8], max: usize) -> String {
    let head = value.iter().take(max).map(|b| format!("{b:02x}")).join(" ");
    if value.len() > max {
        format!("{head} ..")
    } else {
        head
    }
}

/// Format a single field line of an inspection report
pub fn format_field(field: &FieldReport) -> String {
    let start = field
        .start
        .map_or_else(|| "    ?".to_string(), |s| format!("{s:5}"));
    format!(
        "{start}  {:<16} {:>5} B  {}",
        field.field_type, field.length, field.preview
    )
}

/// Format a whole inspection report as human-readable lines
pub fn format_report(report: &CubeReport) -> String {
    let mut lines = vec![
        format!("type:       {:?}", report.cube_type),
        format!("key:        {}", report.key),
        format!("challenge:  {} ({} bits)", report.challenge, report.difficulty),
    ];
    if let Some(date) = report.date {
        lines.push(format!("date:       {date}"));
    }
    if let Some(count) = report.update_count {
        lines.push(format!("counter:    {count}"));
    }
    if let Some(notify) = &report.notify {
        lines.push(format!("notify:     {notify}"));
    }
    if let Some(valid) = report.signature_valid {
        lines.push(format!(
            "signature:  {}",
            if valid { "valid" } else { "INVALID" }
        ));
    }
    for relationship in &report.relationships {
        lines.push(format!("relates:    {relationship}"));
    }
    lines.push("fields:".to_string());
    for field in &report.fields {
        lines.push(format!("  {}", format_field(field)));
    }
    lines.join("\n")
}
