//! CSV export of the audit trail.
//!
//! The CSV is written to a temp file beside the target, fsynced and then
//! renamed over it, so readers never see a half-written export.

use crate::{AuditEntry, Error, Result};
use std::path::Path;
use tempfile::NamedTempFile;

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    id: String,
    timestamp: String,
    actor: String,
    action: &'static str,
    medication_id: Option<String>,
    severity: Option<String>,
    /// Details as compact JSON
    details: String,
}

impl From<&AuditEntry> for CsvRow {
    fn from(entry: &AuditEntry) -> Self {
        CsvRow {
            id: entry.id.to_string(),
            timestamp: entry.timestamp.to_rfc3339(),
            actor: entry.actor.clone(),
            action: entry.action.as_str(),
            medication_id: entry.medication_id.map(|id| id.to_string()),
            severity: entry
                .severity
                .map(|s| format!("{:?}", s).to_uppercase()),
            details: entry.details.to_string(),
        }
    }
}

/// Write `entries` to `csv_path`, replacing any previous export
///
/// Returns the number of rows written.
pub fn export_csv(entries: &[AuditEntry], csv_path: &Path) -> Result<usize> {
    let parent = match csv_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let temp = NamedTempFile::new_in(parent)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(temp.as_file());

    for entry in entries {
        writer.serialize(CsvRow::from(entry))?;
    }
    writer.flush()?;
    drop(writer);

    temp.as_file().sync_all()?;
    temp.persist(csv_path).map_err(|e| Error::Io(e.error))?;

    tracing::info!("Exported {} audit entries to {:?}", entries.len(), csv_path);
    Ok(entries.len())
}

/// Roll a JSONL audit file up into CSV. The JSONL file is left untouched.
pub fn jsonl_to_csv(jsonl_path: &Path, csv_path: &Path) -> Result<usize> {
    let entries = crate::audit::read_audit_entries(jsonl_path)?;
    if entries.is_empty() {
        tracing::info!("No audit entries in {:?} to export", jsonl_path);
    }
    export_csv(&entries, csv_path)
}
