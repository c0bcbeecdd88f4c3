//! Append-only audit trail.
//!
//! Every mutating or rejected action is recorded here. The in-memory history
//! is the queryable view; an optional [`AuditSink`] mirrors each entry to
//! durable storage. Logging never fails the caller: sink errors are reported
//! through tracing and counted in [`AuditLog::sink_failures`].

use crate::{AuditAction, AuditEntry, AuditSeverity, Config, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Durable destination for audit entries
pub trait AuditSink: Send {
    fn append(&mut self, entry: &AuditEntry) -> Result<()>;
}

/// Audit sink writing one JSON object per line.
///
/// Each entry is rendered up front and written with a single `write_all`
/// under an exclusive lock, then synced, so a crash leaves at most one torn
/// trailing line.
pub struct JsonlAuditSink {
    path: PathBuf,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditSink {
    fn append(&mut self, entry: &AuditEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;
        let written = file.write_all(&line).and_then(|()| file.sync_data());
        file.unlock()?;
        written?;

        tracing::trace!(
            action = entry.action.as_str(),
            bytes = line.len(),
            "Audit entry appended to {:?}",
            self.path
        );
        Ok(())
    }
}

/// Everything recoverable from a JSONL audit file
#[derive(Debug, Default)]
pub struct AuditFileScan {
    /// Readable entries in file order
    pub entries: Vec<AuditEntry>,
    /// 1-based numbers of lines that were not valid entries
    pub skipped_lines: Vec<usize>,
}

impl AuditFileScan {
    /// Entries from the most recent AUDIT_CLEARED onward, or all of them
    /// if the file was never cleared
    pub fn since_last_clear(&self) -> &[AuditEntry] {
        let start = self
            .entries
            .iter()
            .rposition(|e| e.action == AuditAction::AuditCleared)
            .unwrap_or(0);
        &self.entries[start..]
    }
}

/// Read a JSONL audit file under a shared lock.
///
/// Lines that are not valid UTF-8 JSON entries (typically a torn final
/// write) are skipped and reported in [`AuditFileScan::skipped_lines`].
/// A missing file scans as empty.
pub fn scan_audit_file(path: &Path) -> Result<AuditFileScan> {
    let mut scan = AuditFileScan::default();
    if !path.exists() {
        return Ok(scan);
    }

    let file = File::open(path)?;
    file.lock_shared()?;
    let mut raw = Vec::new();
    let read = BufReader::new(&file).read_to_end(&mut raw);
    file.unlock()?;
    read?;

    for (index, line) in raw.split(|&b| b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<AuditEntry>(line) {
            Ok(entry) => scan.entries.push(entry),
            Err(e) => {
                tracing::warn!("Skipping unreadable audit line {} in {:?}: {}", index + 1, path, e);
                scan.skipped_lines.push(index + 1);
            }
        }
    }

    tracing::debug!(
        "Scanned {:?}: {} entries, {} unreadable lines",
        path,
        scan.entries.len(),
        scan.skipped_lines.len()
    );
    Ok(scan)
}

/// All readable entries of a JSONL audit file, including those before a clear
pub fn read_audit_entries(path: &Path) -> Result<Vec<AuditEntry>> {
    Ok(scan_audit_file(path)?.entries)
}

/// Filters for [`AuditLog::query`]. Unset fields match everything.
#[derive(Clone, Debug, Default)]
pub struct AuditQuery {
    pub action: Option<AuditAction>,
    pub actor: Option<String>,
    pub medication_id: Option<Uuid>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Keep only the most recent N matches
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn medication(mut self, id: Uuid) -> Self {
        self.medication_id = Some(id);
        self
    }

    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, entry: &AuditEntry) -> bool {
        self.action.map_or(true, |a| entry.action == a)
            && self.actor.as_deref().map_or(true, |a| entry.actor == a)
            && self
                .medication_id
                .map_or(true, |id| entry.medication_id == Some(id))
            && self.since.map_or(true, |t| entry.timestamp >= t)
            && self.until.map_or(true, |t| entry.timestamp <= t)
    }
}

/// Result of [`AuditLog::clear`]
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ClearOutcome {
    pub success: bool,
    pub entries_cleared: usize,
    pub message: String,
}

/// The audit store for one session
pub struct AuditLog {
    enabled: bool,
    actor: String,
    entries: Mutex<Vec<AuditEntry>>,
    sink: Mutex<Option<Box<dyn AuditSink>>>,
    sink_failures: AtomicU64,
    unreadable_lines: usize,
}

impl AuditLog {
    /// In-memory audit log attributing entries to `actor`
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            enabled: true,
            actor: actor.into(),
            entries: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
            sink_failures: AtomicU64::new(0),
            unreadable_lines: 0,
        }
    }

    /// An audit log that records nothing
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new("disabled")
        }
    }

    /// Mirror every new entry to `sink`
    pub fn with_sink(self, sink: impl AuditSink + 'static) -> Self {
        *lock(&self.sink) = Some(Box::new(sink));
        self
    }

    /// Open a JSONL-backed audit log.
    ///
    /// The queryable history is rebuilt from the last AUDIT_CLEARED entry
    /// onward; the file itself keeps everything.
    pub fn open(path: &Path, actor: impl Into<String>) -> Result<Self> {
        let scan = scan_audit_file(path)?;
        let history = scan.since_last_clear().to_vec();
        if !scan.skipped_lines.is_empty() {
            tracing::warn!(
                "Audit file {:?} has {} unreadable lines (first at line {})",
                path,
                scan.skipped_lines.len(),
                scan.skipped_lines[0]
            );
        }
        tracing::info!(
            "Restored {} of {} audit entries from {:?}",
            history.len(),
            scan.entries.len(),
            path
        );

        let mut log = Self::new(actor).with_sink(JsonlAuditSink::new(path));
        log.unreadable_lines = scan.skipped_lines.len();
        *lock(&log.entries) = history;
        Ok(log)
    }

    /// Build the audit log described by the configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        if !config.audit.enabled {
            tracing::info!("Audit logging disabled by configuration");
            return Ok(Self::disabled());
        }
        match config.audit_log_path() {
            Some(path) => Self::open(&path, config.audit.actor.clone()),
            None => Ok(Self::new(config.audit.actor.clone())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Number of entries the sink failed to persist since start-up
    pub fn sink_failures(&self) -> u64 {
        self.sink_failures.load(Ordering::Relaxed)
    }

    /// Lines of the backing file that could not be read at open time
    pub fn unreadable_lines(&self) -> usize {
        self.unreadable_lines
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build an entry for this log's actor and append it
    pub fn record(
        &self,
        action: AuditAction,
        medication_id: Option<Uuid>,
        details: serde_json::Value,
        severity: Option<AuditSeverity>,
    ) {
        self.log(AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor: self.actor.clone(),
            action,
            medication_id,
            details,
            severity,
        });
    }

    /// Append an entry. Never fails.
    pub fn log(&self, entry: AuditEntry) {
        if !self.enabled {
            return;
        }
        let mut entries = lock(&self.entries);
        self.persist(&entry);
        tracing::debug!(
            action = entry.action.as_str(),
            medication_id = ?entry.medication_id,
            "Audit entry recorded"
        );
        entries.push(entry);
    }

    fn persist(&self, entry: &AuditEntry) {
        let mut sink = lock(&self.sink);
        if let Some(sink) = sink.as_mut() {
            if let Err(e) = sink.append(entry) {
                let failures = self.sink_failures.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::error!(
                    "Audit sink failed for entry {} ({}): {}. {} entries not persisted so far",
                    entry.id,
                    entry.action.as_str(),
                    e,
                    failures
                );
            }
        }
    }

    /// Entries matching the filters, in insertion order
    pub fn query(&self, filters: &AuditQuery) -> Vec<AuditEntry> {
        let entries = lock(&self.entries);
        let mut matched: Vec<AuditEntry> = entries
            .iter()
            .filter(|e| filters.matches(e))
            .cloned()
            .collect();

        if let Some(limit) = filters.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        matched
    }

    /// The full history
    pub fn export_all(&self) -> Vec<AuditEntry> {
        lock(&self.entries).clone()
    }

    /// Empty the in-memory history. Requires `confirmed`.
    ///
    /// The clear itself is recorded first and is the only entry left
    /// afterwards. A durable sink keeps its full trail.
    pub fn clear(&self, confirmed: bool) -> ClearOutcome {
        if !confirmed {
            return ClearOutcome {
                success: false,
                entries_cleared: 0,
                message: "Clearing the audit log requires explicit confirmation".into(),
            };
        }

        let mut entries = lock(&self.entries);
        let cleared = entries.len();

        let clear_entry = AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor: self.actor.clone(),
            action: AuditAction::AuditCleared,
            medication_id: None,
            details: serde_json::json!({ "entries_cleared": cleared }),
            severity: Some(AuditSeverity::Warning),
        };

        entries.clear();
        if self.enabled {
            self.persist(&clear_entry);
            entries.push(clear_entry);
        }

        tracing::warn!("Audit log cleared by {} ({} entries)", self.actor, cleared);
        ClearOutcome {
            success: true,
            entries_cleared: cleared,
            message: format!("Cleared {} audit entries", cleared),
        }
    }
}

/// Lock ignoring poisoning; audit state stays usable after a panic elsewhere
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
