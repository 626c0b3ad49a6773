use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::runner::RunReport;

/// Export a run report as pretty-printed JSON
pub fn export_as_json(report: &RunReport, output_path: &Path) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create directory: {}", parent.display()))?;
        }
    }

    let file = fs::File::create(output_path)
        .context(format!("Failed to create output file: {}", output_path.display()))?;

    serde_json::to_writer_pretty(file, report)
        .context("Failed to write run report to file")?;

    debug!("Wrote report with {} outcomes to {}", report.total, output_path.display());

    Ok(())
}
