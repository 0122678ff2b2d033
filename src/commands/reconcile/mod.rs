use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cli::ReconcileArgs;
use crate::commands::{finish_manifest, start_manifest};
use crate::config::{PathConfig, RemoteConfig};
use crate::fields::FieldExtractor;
use crate::ledger::{CsvLedger, GoogleSheets, LedgerStore, SheetsLedger};
use crate::model::{InvoiceRecord, RunManifest};
use crate::text::{Pdftotext, TextExtractor};
use crate::util::{ensure_directory, file_name_string, list_documents};

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub candidates: usize,
    pub eligible: usize,
    pub ingested: usize,
    pub missing_files: usize,
    pub extraction_failures: usize,
    pub local_appended: usize,
    pub remote_appended: usize,
    pub remote_read_failed: bool,
    pub remote_append_failed: bool,
    pub records: Vec<InvoiceRecord>,
    pub warnings: Vec<String>,
}

impl ReconcileReport {
    pub fn record_in(&self, manifest: &mut RunManifest) {
        let counts = &mut manifest.counts;
        counts.candidates += self.candidates;
        counts.eligible += self.eligible;
        counts.ingested += self.ingested;
        counts.missing_files += self.missing_files;
        counts.extraction_failures += self.extraction_failures;
        counts.local_appended += self.local_appended;
        counts.remote_appended += self.remote_appended;

        manifest.warnings.extend(self.warnings.iter().cloned());
        if self.remote_read_failed {
            manifest
                .notes
                .push("remote ledger unreadable; all ingested records were offered".to_string());
        }
        if self.remote_append_failed {
            manifest
                .notes
                .push("remote append failed; the next run backfills the missing rows".to_string());
        }
    }

    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }
}

pub fn run(args: ReconcileArgs) -> Result<()> {
    let paths = PathConfig::from_args(&args.paths);
    let remote = RemoteConfig::from_args(&args.remote);

    let mut manifest = start_manifest("reconcile", paths.run_paths(remote.as_ref()));
    let candidates = list_documents(&paths.download_dir)?;
    let extractor = Pdftotext::with_program(args.text.pdftotext);
    let report = reconcile_with_ledgers(&candidates, &paths, remote.as_ref(), &extractor)?;
    report.record_in(&mut manifest);

    finish_manifest(&paths.manifest_dir(), manifest, &candidates)?;
    log_summary(&report);
    Ok(())
}

pub fn reconcile_with_ledgers(
    candidates: &[PathBuf],
    paths: &PathConfig,
    remote: Option<&RemoteConfig>,
    extractor: &dyn TextExtractor,
) -> Result<ReconcileReport> {
    let mut local = CsvLedger::new(&paths.ledger_path);
    let mut remote_ledger = match remote {
        Some(remote) => Some(SheetsLedger::new(
            GoogleSheets::new(&remote.credentials)?,
            remote.target.clone(),
        )),
        None => None,
    };
    reconcile(
        candidates,
        &mut local,
        remote_ledger
            .as_mut()
            .map(|ledger| ledger as &mut dyn LedgerStore),
        extractor,
        paths.text_dir(),
    )
}

pub fn log_summary(report: &ReconcileReport) {
    info!(
        candidates = report.candidates,
        eligible = report.eligible,
        ingested = report.ingested,
        missing = report.missing_files,
        extraction_failures = report.extraction_failures,
        local_appended = report.local_appended,
        remote_appended = report.remote_appended,
        "reconcile completed"
    );
}

/// Ingests every candidate missing from at least one required ledger and appends
/// each new record only to the ledgers that lack it.
pub fn reconcile(
    candidates: &[PathBuf],
    local: &mut dyn LedgerStore,
    mut remote: Option<&mut dyn LedgerStore>,
    extractor: &dyn TextExtractor,
    text_dir: &Path,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport {
        candidates: candidates.len(),
        ..ReconcileReport::default()
    };

    let local_keys = local
        .read_keys()
        .with_context(|| format!("failed to read {}", local.describe()))?;
    let remote_keys = match remote.as_deref_mut() {
        Some(store) => match store.read_keys() {
            Ok(keys) => keys,
            Err(err) => {
                report.remote_read_failed = true;
                report.warn(format!(
                    "failed to read {}; treating it as empty: {err:#}",
                    store.describe()
                ));
                HashSet::new()
            }
        },
        None => HashSet::new(),
    };
    let remote_enabled = remote.is_some();
    debug!(
        local_keys = local_keys.len(),
        remote_keys = remote_keys.len(),
        remote_enabled,
        "ledger keys loaded"
    );

    let fields = FieldExtractor::new()?;
    let mut built: HashSet<String> = HashSet::new();

    for path in candidates {
        let filename = match file_name_string(path) {
            Ok(filename) => filename,
            Err(err) => {
                report.extraction_failures += 1;
                report.warn(format!("skipping candidate: {err:#}"));
                continue;
            }
        };
        let eligible = !local_keys.contains(&filename)
            || (remote_enabled && !remote_keys.contains(&filename));
        if !eligible || built.contains(&filename) {
            continue;
        }
        report.eligible += 1;

        if !path.is_file() {
            report.missing_files += 1;
            report.warn(format!("{} is eligible but missing on disk", path.display()));
            continue;
        }

        let text = match extractor.extract_text(path) {
            Ok(text) => text,
            Err(err) => {
                report.extraction_failures += 1;
                report.warn(format!("failed to extract text from {filename}: {err:#}"));
                continue;
            }
        };
        if let Err(err) = persist_text(text_dir, path, &text) {
            report.extraction_failures += 1;
            report.warn(format!("failed to store text for {filename}: {err:#}"));
            continue;
        }

        let record = InvoiceRecord::new(filename.clone(), fields.extract(&text));
        debug!(filename = %filename, period = ?record.fields.period, "extracted fields");
        built.insert(filename);
        report.records.push(record);
    }
    report.ingested = report.records.len();

    let local_batch: Vec<InvoiceRecord> = report
        .records
        .iter()
        .filter(|record| !local_keys.contains(&record.filename))
        .cloned()
        .collect();
    if !local_batch.is_empty() {
        report.local_appended = local
            .append(&local_batch)
            .with_context(|| format!("failed to append to {}", local.describe()))?;
        info!(rows = report.local_appended, ledger = %local.describe(), "appended rows");
    }

    if let Some(store) = remote {
        let remote_batch: Vec<InvoiceRecord> = report
            .records
            .iter()
            .filter(|record| !remote_keys.contains(&record.filename))
            .cloned()
            .collect();
        if !remote_batch.is_empty() {
            match store.append(&remote_batch) {
                Ok(count) => {
                    report.remote_appended = count;
                    info!(rows = count, ledger = %store.describe(), "appended rows");
                }
                Err(err) => {
                    report.remote_append_failed = true;
                    report.warn(format!(
                        "failed to append {} rows to {}; the next run retries: {err:#}",
                        remote_batch.len(),
                        store.describe()
                    ));
                }
            }
        }
    }

    Ok(report)
}

fn persist_text(text_dir: &Path, document: &Path, text: &str) -> Result<()> {
    ensure_directory(text_dir)?;
    let stem = document
        .file_stem()
        .and_then(|stem| stem.to_str())
        .with_context(|| format!("invalid UTF-8 filename: {}", document.display()))?;
    let path = text_dir.join(format!("{stem}.txt"));
    fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))
}
