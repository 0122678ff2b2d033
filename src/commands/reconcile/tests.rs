use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};

use super::*;
use crate::ledger::CsvLedger;
use crate::model::{header_row, is_canonical_header};
use crate::util::scratch_dir;

const BILL_TEXT: &str = "\
01/02/2024 ENERO 2024 15/02/2024
TARIFA:T1R1 M CONSUMO: 345
";

#[derive(Default)]
struct FakeExtractor {
    calls: RefCell<Vec<String>>,
}

impl TextExtractor for FakeExtractor {
    fn extract_text(&self, path: &Path) -> Result<String> {
        self.calls
            .borrow_mut()
            .push(file_name_string(path).unwrap());
        let text = fs::read_to_string(path)?;
        if text.starts_with("%corrupt") {
            bail!("no text layer");
        }
        Ok(text)
    }
}

#[derive(Default)]
struct MemoryLedger {
    rows: Vec<InvoiceRecord>,
    fail_read: bool,
    fail_append: bool,
}

impl MemoryLedger {
    fn with_keys(keys: &[&str]) -> Self {
        Self {
            rows: keys
                .iter()
                .map(|key| InvoiceRecord::new(*key, Default::default()))
                .collect(),
            ..Self::default()
        }
    }

    fn keys(&self) -> Vec<&str> {
        self.rows.iter().map(|row| row.filename.as_str()).collect()
    }
}

impl LedgerStore for MemoryLedger {
    fn describe(&self) -> String {
        "memory ledger".to_string()
    }

    fn read_keys(&mut self) -> Result<HashSet<String>> {
        if self.fail_read {
            bail!("quota exceeded");
        }
        Ok(self.rows.iter().map(|row| row.filename.clone()).collect())
    }

    fn append(&mut self, records: &[InvoiceRecord]) -> Result<usize> {
        if self.fail_append {
            bail!("connection reset");
        }
        self.rows.extend(records.iter().cloned());
        Ok(records.len())
    }
}

fn write_documents(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            fs::write(&path, BILL_TEXT).unwrap();
            path
        })
        .collect()
}

#[test]
fn new_documents_reach_both_ledgers_with_text_artifacts() {
    let dir = scratch_dir("reconcile_new");
    let candidates = write_documents(&dir, &["01-2024.pdf", "02-2024.pdf"]);
    let text_dir = dir.join("outputs");
    let mut local = CsvLedger::new(dir.join("output.csv"));
    let mut remote = MemoryLedger::default();
    let extractor = FakeExtractor::default();

    let report = reconcile(&candidates, &mut local, Some(&mut remote), &extractor, &text_dir)
        .unwrap();

    assert_eq!(report.eligible, 2);
    assert_eq!(report.ingested, 2);
    assert_eq!(report.local_appended, 2);
    assert_eq!(report.remote_appended, 2);
    assert_eq!(remote.keys(), vec!["01-2024.pdf", "02-2024.pdf"]);

    let rows = local.read_rows().unwrap();
    assert_eq!(rows[0], header_row());
    assert_eq!(rows[1][0], "01-2024.pdf");
    assert_eq!(rows[1][1], "ENERO 2024");
    assert_eq!(rows[1][5], "345");
    assert_eq!(
        fs::read_to_string(text_dir.join("01-2024.txt")).unwrap(),
        BILL_TEXT
    );

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn second_pass_ingests_nothing() {
    let dir = scratch_dir("reconcile_idempotent");
    let candidates = write_documents(&dir, &["01-2024.pdf", "02-2024.pdf"]);
    let mut local = CsvLedger::new(dir.join("output.csv"));
    let mut remote = MemoryLedger::default();

    reconcile(
        &candidates,
        &mut local,
        Some(&mut remote),
        &FakeExtractor::default(),
        &dir,
    )
    .unwrap();

    let extractor = FakeExtractor::default();
    let report = reconcile(&candidates, &mut local, Some(&mut remote), &extractor, &dir).unwrap();

    assert_eq!(report.eligible, 0);
    assert_eq!(report.local_appended, 0);
    assert_eq!(report.remote_appended, 0);
    assert!(extractor.calls.borrow().is_empty());
    assert_eq!(local.read_rows().unwrap().len(), 3);
    assert_eq!(remote.rows.len(), 2);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn remote_gap_is_backfilled_without_touching_local() {
    let dir = scratch_dir("reconcile_backfill");
    let candidates = write_documents(&dir, &["01-2024.pdf", "02-2024.pdf", "03-2024.pdf"]);
    let mut local = MemoryLedger::with_keys(&["01-2024.pdf", "02-2024.pdf", "03-2024.pdf"]);
    let mut remote = MemoryLedger::with_keys(&["01-2024.pdf", "03-2024.pdf"]);
    let extractor = FakeExtractor::default();

    let report = reconcile(&candidates, &mut local, Some(&mut remote), &extractor, &dir).unwrap();

    assert_eq!(extractor.calls.borrow().as_slice(), ["02-2024.pdf"]);
    assert_eq!(report.local_appended, 0);
    assert_eq!(report.remote_appended, 1);
    assert_eq!(local.rows.len(), 3);
    assert_eq!(remote.keys(), vec!["01-2024.pdf", "03-2024.pdf", "02-2024.pdf"]);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn without_remote_only_the_local_ledger_decides() {
    let dir = scratch_dir("reconcile_local_only");
    let candidates = write_documents(&dir, &["01-2024.pdf", "02-2024.pdf"]);
    let mut local = MemoryLedger::with_keys(&["01-2024.pdf"]);
    let extractor = FakeExtractor::default();

    let report = reconcile(&candidates, &mut local, None, &extractor, &dir).unwrap();

    assert_eq!(report.eligible, 1);
    assert_eq!(local.keys(), vec!["01-2024.pdf", "02-2024.pdf"]);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn missing_and_unreadable_documents_are_skipped() {
    let dir = scratch_dir("reconcile_skips");
    let mut candidates = write_documents(&dir, &["01-2024.pdf"]);
    candidates.push(dir.join("02-2024.pdf"));
    let corrupt = dir.join("03-2024.pdf");
    fs::write(&corrupt, "%corrupt").unwrap();
    candidates.push(corrupt);

    let mut local = MemoryLedger::default();
    let report = reconcile(
        &candidates,
        &mut local,
        None,
        &FakeExtractor::default(),
        &dir,
    )
    .unwrap();

    assert_eq!(report.eligible, 3);
    assert_eq!(report.missing_files, 1);
    assert_eq!(report.extraction_failures, 1);
    assert_eq!(report.warnings.len(), 2);
    assert_eq!(local.keys(), vec!["01-2024.pdf"]);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn unreadable_remote_counts_as_empty() {
    let dir = scratch_dir("reconcile_remote_read");
    let candidates = write_documents(&dir, &["01-2024.pdf", "02-2024.pdf"]);
    let mut local = MemoryLedger::with_keys(&["01-2024.pdf"]);
    let mut remote = MemoryLedger {
        fail_read: true,
        ..MemoryLedger::default()
    };

    let report = reconcile(
        &candidates,
        &mut local,
        Some(&mut remote),
        &FakeExtractor::default(),
        &dir,
    )
    .unwrap();

    assert!(report.remote_read_failed);
    assert_eq!(report.eligible, 2);
    assert_eq!(report.local_appended, 1);
    assert_eq!(report.remote_appended, 2);
    assert_eq!(local.keys(), vec!["01-2024.pdf", "02-2024.pdf"]);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn remote_append_failure_keeps_local_rows() {
    let dir = scratch_dir("reconcile_remote_append");
    let candidates = write_documents(&dir, &["01-2024.pdf"]);
    let mut local = MemoryLedger::default();
    let mut remote = MemoryLedger {
        fail_append: true,
        ..MemoryLedger::default()
    };

    let report = reconcile(
        &candidates,
        &mut local,
        Some(&mut remote),
        &FakeExtractor::default(),
        &dir,
    )
    .unwrap();

    assert!(report.remote_append_failed);
    assert_eq!(report.remote_appended, 0);
    assert_eq!(report.local_appended, 1);
    assert_eq!(report.warnings.len(), 1);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn drifted_local_header_is_repaired_before_comparing_keys() {
    let dir = scratch_dir("reconcile_header");
    let candidates = write_documents(&dir, &["01-2024.pdf", "02-2024.pdf"]);
    let ledger_path = dir.join("output.csv");
    fs::write(&ledger_path, "Archivo,Periodo\n01-2024.pdf,ENERO 2024\n").unwrap();
    let mut local = CsvLedger::new(&ledger_path);

    let report = reconcile(
        &candidates,
        &mut local,
        None,
        &FakeExtractor::default(),
        &dir,
    )
    .unwrap();

    assert_eq!(report.local_appended, 1);
    let rows = local.read_rows().unwrap();
    assert!(is_canonical_header(&rows[0]));
    assert_eq!(rows[1], vec!["01-2024.pdf", "ENERO 2024"]);
    assert_eq!(rows[2][0], "02-2024.pdf");
    assert_eq!(rows.len(), 3);

    let _ = fs::remove_dir_all(&dir);
}

#[cfg(unix)]
#[test]
fn non_utf8_name_does_not_block_other_documents() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let dir = scratch_dir("reconcile_bad_name");
    let mut candidates = vec![dir.join(OsStr::from_bytes(b"Factura_\xf1.pdf"))];
    candidates.extend(write_documents(&dir, &["01-2024.pdf"]));
    let mut local = MemoryLedger::default();

    let report = reconcile(
        &candidates,
        &mut local,
        None,
        &FakeExtractor::default(),
        &dir,
    )
    .unwrap();

    assert_eq!(report.extraction_failures, 1);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.ingested, 1);
    assert_eq!(local.keys(), vec!["01-2024.pdf"]);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn text_that_cannot_be_stored_skips_only_that_document() {
    let dir = scratch_dir("reconcile_text_dir");
    let candidates = write_documents(&dir, &["01-2024.pdf"]);
    let blocked = dir.join("outputs");
    fs::write(&blocked, "not a directory").unwrap();
    let mut local = MemoryLedger::default();

    let report = reconcile(
        &candidates,
        &mut local,
        None,
        &FakeExtractor::default(),
        &blocked,
    )
    .unwrap();

    assert_eq!(report.eligible, 1);
    assert_eq!(report.extraction_failures, 1);
    assert_eq!(report.ingested, 0);
    assert!(local.rows.is_empty());

    let _ = fs::remove_dir_all(&dir);
}
