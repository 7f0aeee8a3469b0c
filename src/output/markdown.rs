//! Markdown summary written next to the exported tables

use crate::output::export::ExportSummary;
use crate::output::stats::TenantStatus;
use crate::output::OutputResult;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes the summary of one tenant's export to `output_path`
pub fn write_summary(
    output_path: &Path,
    status: &TenantStatus,
    export: &ExportSummary,
) -> OutputResult<()> {
    let markdown = format_summary(status, export);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a tenant's checkpoint status and export file list as markdown
pub fn format_summary(status: &TenantStatus, export: &ExportSummary) -> String {
    let mut md = String::new();

    md.push_str(&format!("# Crawl Summary: {} ({})\n\n", status.name, status.tenant));
    if status.enrichment_blocked {
        md.push_str("Building and request enrichment is disabled for this tenant.\n\n");
    }

    md.push_str("## Phases\n\n");
    md.push_str("| Phase | State | Items | Succeeded | Failed | Saved |\n");
    md.push_str("|-------|-------|-------|-----------|--------|-------|\n");
    for phase in &status.phases {
        let saved = phase
            .saved_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string());
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            phase.phase,
            phase.label(),
            phase.items,
            phase.succeeded,
            phase.failed,
            saved
        ));
    }
    md.push('\n');

    if !status.new_streets.is_empty() || !status.removed_streets.is_empty() {
        md.push_str("## Street Changes\n\n");
        md.push_str(&format!("- **New**: {}\n", status.new_streets.len()));
        md.push_str(&format!("- **Removed**: {}\n", status.removed_streets.len()));
        if !status.removed_streets.is_empty() {
            let codes: Vec<String> = status
                .removed_streets
                .iter()
                .take(50)
                .map(|c| c.to_string())
                .collect();
            md.push_str(&format!("- **Removed codes**: {}\n", codes.join(", ")));
        }
        md.push('\n');
    }

    let failures = status.failures();
    if !failures.is_empty() {
        md.push_str("## Error Summary\n\n");
        md.push_str("| Category | Count |\n");
        md.push_str("|----------|-------|\n");
        for (category, count) in &failures {
            md.push_str(&format!("| {} | {} |\n", category, count));
        }
        md.push('\n');
    }

    md.push_str("## Files\n\n");
    md.push_str("| File | Rows |\n");
    md.push_str("|------|------|\n");
    for (name, rows) in &export.files {
        md.push_str(&format!("| {} | {} |\n", name, rows));
    }
    md.push('\n');

    md
}
