use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::{error::Result, reconcile::ReconciliationReport};

/// File name for a report: `reconciliation-<since>-<generated>.json`.
pub fn report_file_name(report: &ReconciliationReport) -> String {
    format!(
        "reconciliation-{}-{}.json",
        report.since.format("%Y%m%d"),
        report.generated_at.format("%Y%m%dT%H%M%SZ")
    )
}

/// Write `report` as pretty JSON under `dir`, creating it if needed.
pub fn write_json(report: &ReconciliationReport, dir: impl AsRef<Path>) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let path = dir.join(report_file_name(report));
    let body = serde_json::to_string_pretty(report)?;
    fs::write(&path, body)?;

    info!("Report written to {}", path.display());
    Ok(path)
}
