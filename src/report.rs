//! CSV report: one row per record, in input order.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::outcome::{BatchSummary, TransferBatch, TransferOutcome};

#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    product_id: &'a str,
    media_id: &'a str,
    source_url: &'a str,
    file_name: &'a str,
    status: &'static str,
    attempts: u32,
    error_detail: &'a str,
    duration_ms: u64,
    staged_path: String,
    response: &'a str,
}

impl<'a> From<&'a TransferOutcome> for ReportRow<'a> {
    fn from(o: &'a TransferOutcome) -> Self {
        ReportRow {
            product_id: &o.record.product_id,
            media_id: &o.record.media_id,
            source_url: &o.record.source_url,
            file_name: &o.record.file_name,
            status: o.status.as_str(),
            attempts: o.attempts,
            error_detail: o.error_detail.as_deref().unwrap_or(""),
            duration_ms: o.duration_ms,
            staged_path: o
                .staged_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            response: o.response_excerpt.as_deref().unwrap_or(""),
        }
    }
}

/// Write the batch as CSV (header + one row per outcome).
pub fn write_report<W: Write>(writer: W, batch: &TransferBatch) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for outcome in batch {
        wtr.serialize(ReportRow::from(outcome))
            .context("serializing report row")?;
    }
    // An empty batch still gets a header line.
    if batch.is_empty() {
        wtr.write_record([
            "product_id",
            "media_id",
            "source_url",
            "file_name",
            "status",
            "attempts",
            "error_detail",
            "duration_ms",
            "staged_path",
            "response",
        ])?;
    }
    wtr.flush().context("flushing report")?;
    Ok(())
}

/// Write the report file, creating parent directories as needed.
pub fn write_report_file(path: &Path, batch: &TransferBatch) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating report directory {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("creating report {}", path.display()))?;
    write_report(file, batch)?;
    info!(path = %path.display(), rows = batch.len(), "report written");
    Ok(())
}

/// One-line human summary for the log.
pub fn summary_line(summary: &BatchSummary) -> String {
    let mut line = format!(
        "{} records: {} succeeded, {} failed download, {} failed upload, {} failed other ({} attempts)",
        summary.total,
        summary.succeeded,
        summary.failed_download,
        summary.failed_upload,
        summary.failed_other,
        summary.total_attempts
    );
    if summary.skipped > 0 {
        line.push_str(&format!(", {} source rows skipped", summary.skipped));
    }
    line
}
